use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::options::ExtractionOptions;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub thumbnail_url: String,
    pub title: String,
    pub uploader: String,
}

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("not a valid URL: {0}")]
    InvalidUrl(String),
    #[error("video unavailable: {0}")]
    VideoUnavailable(String),
    #[error("extraction failed: {0}")]
    ExtractionFailed(String),
    #[error(transparent)]
    FileSystem(#[from] std::io::Error),
}

/// Everything one extraction call needs. The output lands in `output_dir`,
/// named by [`crate::util::output_filename`].
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub url: String,
    pub title: String,
    pub options: ExtractionOptions,
    pub output_dir: PathBuf,
}

/// The external download/transcode library, seen from the session controller.
#[async_trait]
pub trait MediaCollaborator: Send + Sync {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, MediaError>;

    /// Returns the path of the produced audio file.
    async fn extract_audio(&self, request: &ExtractionRequest) -> Result<PathBuf, MediaError>;
}
