use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};
use serde::Serialize;

use crate::media::{MediaError, Metadata};
use crate::options::{ExtractionOptions, OptionsSelection, OptionsUpdate};
use crate::util;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    #[default]
    Idle,
    MetadataReady,
    Extracting,
    DownloadReady,
    Error,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::MetadataReady => "metadata_ready",
            Phase::Extracting => "extracting",
            Phase::DownloadReady => "download_ready",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    VideoUnavailable,
    ExtractionFailed,
    FileSystemError,
}

/// User-facing error. Underlying causes are logged, not carried here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn from_media(err: &MediaError, url: &str) -> Self {
        let (kind, message) = match err {
            MediaError::InvalidUrl(_) => (ErrorKind::InvalidUrl, format!("'{}' is not a valid URL.", url)),
            MediaError::VideoUnavailable(_) => (ErrorKind::VideoUnavailable, "Video unavailable.".to_string()),
            MediaError::ExtractionFailed(_) => (ErrorKind::ExtractionFailed, "An error occurred.".to_string()),
            MediaError::FileSystem(_) => (
                ErrorKind::FileSystemError,
                "The extracted file could not be delivered.".to_string(),
            ),
        };
        Self { kind, message }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("an extraction is in progress for this session")]
    Busy,
    #[error("cannot {action} while the session is {phase}")]
    InvalidTransition { action: &'static str, phase: Phase },
    #[error("both codec and quality must be selected")]
    OptionsIncomplete,
    #[error("too many concurrent extractions (max: {0})")]
    AtCapacity(usize),
    #[error("the session has ended")]
    Ended,
}

/// Exclusive owner of one cached output file. Dropping it deletes the file.
#[derive(Debug)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheFile {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!("[CACHE] Removed {}", self.path.display()),
            Err(e) => warn!("[CACHE] Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

/// An extracted file waiting to be handed to the user.
#[derive(Debug)]
pub struct PendingDownload {
    pub file: CacheFile,
    pub filename: String,
    pub mime_type: &'static str,
}

/// Snapshot of what `begin_extraction` committed to.
#[derive(Debug, Clone)]
pub struct ExtractionJob {
    pub url: String,
    pub title: String,
    pub options: ExtractionOptions,
}

#[derive(Debug, Clone, Serialize)]
pub struct DownloadInfo {
    pub filename: String,
    pub mime_type: String,
}

/// Which controls the front-end should show or enable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Controls {
    pub url_editable: bool,
    pub options_visible: bool,
    pub extract_enabled: bool,
    pub download_visible: bool,
    pub cbr_effective: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionView {
    pub phase: Phase,
    pub url: String,
    pub metadata: Option<Metadata>,
    pub options: OptionsSelection,
    pub error: Option<ErrorInfo>,
    pub download: Option<DownloadInfo>,
    pub controls: Controls,
}

/// The one mutable record behind a session. Every change goes through the
/// transition methods below; each either applies fully or returns an error
/// and leaves the state untouched.
#[derive(Debug, Default)]
pub struct SessionState {
    url: String,
    metadata: Option<Metadata>,
    selection: OptionsSelection,
    phase: Phase,
    last_error: Option<ErrorInfo>,
    output: Option<PendingDownload>,
    // Bumped on every URL change so late metadata results can be discarded.
    revision: u64,
    ended: bool,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn metadata(&self) -> Option<&Metadata> {
        self.metadata.as_ref()
    }

    pub fn selection(&self) -> &OptionsSelection {
        &self.selection
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.last_error.as_ref()
    }

    /// The URL as handed to the media collaborator.
    pub fn target_url(&self) -> &str {
        self.url.trim()
    }

    pub fn output_file_path(&self) -> Option<&Path> {
        self.output.as_ref().map(|o| o.file.path())
    }

    /// Reset to IDLE around a new URL. Returns the revision the metadata
    /// result for this URL must carry.
    ///
    /// The input is kept as typed so error messages can quote it; collaborators
    /// see it trimmed (see [`SessionState::target_url`]).
    pub fn change_url(&mut self, url: &str) -> Result<u64, SessionError> {
        self.ensure_open()?;
        if self.phase == Phase::Extracting {
            return Err(SessionError::Busy);
        }

        self.url = url.to_string();
        self.metadata = None;
        self.selection = OptionsSelection::default();
        self.last_error = None;
        if let Some(stale) = self.output.take() {
            info!("[SESSION] Discarding unclaimed download {}", stale.filename);
        }
        self.phase = Phase::Idle;
        self.revision += 1;
        Ok(self.revision)
    }

    /// Returns false when the result belongs to a URL that has since been replaced.
    pub fn apply_metadata(&mut self, revision: u64, result: Result<Metadata, MediaError>) -> bool {
        if self.ended || revision != self.revision || self.phase != Phase::Idle {
            debug!("[SESSION] Dropping stale metadata (revision {} != {})", revision, self.revision);
            return false;
        }

        match result {
            Ok(metadata) => {
                self.metadata = Some(metadata);
                self.phase = Phase::MetadataReady;
            }
            Err(e) => self.record_failure(&e),
        }
        true
    }

    pub fn select_options(&mut self, update: OptionsUpdate) -> Result<(), SessionError> {
        self.ensure_open()?;
        match self.phase {
            Phase::MetadataReady => {
                self.selection.apply(update);
                Ok(())
            }
            Phase::Extracting => Err(SessionError::Busy),
            phase => Err(SessionError::InvalidTransition {
                action: "select options",
                phase,
            }),
        }
    }

    /// The job `begin_extraction` would start, without starting it.
    pub fn check_extraction(&self) -> Result<ExtractionJob, SessionError> {
        self.ensure_open()?;
        match self.phase {
            Phase::MetadataReady => {}
            Phase::Extracting => return Err(SessionError::Busy),
            phase => return Err(SessionError::InvalidTransition { action: "extract", phase }),
        }

        let options = self.selection.complete().ok_or(SessionError::OptionsIncomplete)?;
        let title = match &self.metadata {
            Some(m) => m.title.clone(),
            None => {
                return Err(SessionError::InvalidTransition {
                    action: "extract",
                    phase: self.phase,
                })
            }
        };
        Ok(ExtractionJob {
            url: self.target_url().to_string(),
            title,
            options,
        })
    }

    pub fn begin_extraction(&mut self) -> Result<ExtractionJob, SessionError> {
        let job = self.check_extraction()?;
        self.phase = Phase::Extracting;
        self.last_error = None;
        Ok(job)
    }

    pub fn finish_extraction(&mut self, job: &ExtractionJob, result: Result<PathBuf, MediaError>) {
        if self.phase != Phase::Extracting {
            warn!("[SESSION] Extraction result arrived while {}; discarding", self.phase);
            if let Ok(path) = result {
                // Unclaimable; delete it now.
                drop(CacheFile::new(path));
            }
            return;
        }

        match result {
            Ok(path) => {
                self.output = Some(PendingDownload {
                    file: CacheFile::new(path),
                    filename: util::output_filename(&job.title, job.options.codec),
                    mime_type: job.options.codec.mime_type(),
                });
                self.phase = Phase::DownloadReady;
            }
            Err(e) => self.record_failure(&e),
        }
    }

    /// Hand the cached file to the caller; the session goes back to IDLE.
    pub fn take_download(&mut self) -> Result<PendingDownload, SessionError> {
        self.ensure_open()?;
        match self.phase {
            Phase::DownloadReady => {}
            Phase::Extracting => return Err(SessionError::Busy),
            phase => return Err(SessionError::InvalidTransition { action: "download", phase }),
        }
        let download = self.output.take().ok_or(SessionError::InvalidTransition {
            action: "download",
            phase: self.phase,
        })?;

        self.metadata = None;
        self.selection = OptionsSelection::default();
        self.phase = Phase::Idle;
        Ok(download)
    }

    pub fn fail_delivery(&mut self, err: io::Error) {
        self.record_failure(&MediaError::FileSystem(err));
    }

    /// Close the session for good, dropping any cached output. Refused mid-extraction.
    pub fn end(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.phase == Phase::Extracting {
            return Err(SessionError::Busy);
        }
        self.ended = true;
        self.output = None;
        Ok(())
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.ended {
            Err(SessionError::Ended)
        } else {
            Ok(())
        }
    }

    fn record_failure(&mut self, err: &MediaError) {
        match err {
            MediaError::ExtractionFailed(_) | MediaError::FileSystem(_) => {
                warn!("[SESSION] {} ({})", err, self.url)
            }
            _ => info!("[SESSION] {} ({})", err, self.url),
        }
        self.last_error = Some(ErrorInfo::from_media(err, &self.url));
        self.phase = Phase::Error;
    }

    pub fn controls(&self) -> Controls {
        let options_visible = matches!(self.phase, Phase::MetadataReady | Phase::Extracting);
        Controls {
            url_editable: self.phase != Phase::Extracting,
            options_visible,
            extract_enabled: self.phase == Phase::MetadataReady && self.selection.complete().is_some(),
            download_visible: self.phase == Phase::DownloadReady,
            cbr_effective: self
                .selection
                .codec
                .map_or(true, |c| c.supports_constant_bitrate()),
        }
    }

    pub fn view(&self) -> SessionView {
        SessionView {
            phase: self.phase,
            url: self.url.clone(),
            metadata: self.metadata.clone(),
            options: self.selection,
            error: self.last_error.clone(),
            download: self.output.as_ref().map(|o| DownloadInfo {
                filename: o.filename.clone(),
                mime_type: o.mime_type.to_string(),
            }),
            controls: self.controls(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::{Codec, QualityTier};

    fn song() -> Metadata {
        Metadata {
            thumbnail_url: "https://img.example/a.jpg".into(),
            title: "Song A".into(),
            uploader: "Artist".into(),
        }
    }

    fn ready_state() -> SessionState {
        let mut state = SessionState::new();
        let rev = state.change_url("https://video.example/watch?v=a").unwrap();
        assert!(state.apply_metadata(rev, Ok(song())));
        state
    }

    fn mp3_high() -> OptionsUpdate {
        OptionsUpdate {
            codec: Some(Codec::Mp3),
            quality: Some(QualityTier::High),
            constant_bitrate: Some(false),
        }
    }

    #[test]
    fn starts_idle_and_empty() {
        let state = SessionState::new();
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.url(), "");
        assert!(state.metadata().is_none());
        assert!(state.output_file_path().is_none());
        assert!(state.last_error().is_none());
    }

    #[test]
    fn metadata_success_and_failure() {
        let state = ready_state();
        assert_eq!(state.phase(), Phase::MetadataReady);
        assert_eq!(state.metadata().map(|m| m.title.as_str()), Some("Song A"));

        let mut state = SessionState::new();
        let rev = state.change_url("not a url").unwrap();
        state.apply_metadata(rev, Err(MediaError::InvalidUrl("not a url".into())));
        assert_eq!(state.phase(), Phase::Error);
        let err = state.last_error().unwrap();
        assert_eq!(err.kind, ErrorKind::InvalidUrl);
        assert!(err.message.contains("'not a url'"));
    }

    #[test]
    fn stale_metadata_is_ignored() {
        let mut state = SessionState::new();
        let old = state.change_url("https://video.example/1").unwrap();
        let new = state.change_url("https://video.example/2").unwrap();
        assert!(!state.apply_metadata(old, Ok(song())));
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.apply_metadata(new, Ok(song())));
        assert_eq!(state.phase(), Phase::MetadataReady);
    }

    #[test]
    fn extract_requires_complete_options() {
        let mut state = ready_state();
        assert_eq!(state.begin_extraction().unwrap_err(), SessionError::OptionsIncomplete);
        assert!(!state.controls().extract_enabled);

        state
            .select_options(OptionsUpdate { codec: Some(Codec::Aac), ..Default::default() })
            .unwrap();
        assert_eq!(state.begin_extraction().unwrap_err(), SessionError::OptionsIncomplete);
        assert_eq!(state.phase(), Phase::MetadataReady);
    }

    #[test]
    fn extract_outside_metadata_ready_is_rejected() {
        let mut state = SessionState::new();
        assert_eq!(
            state.begin_extraction().unwrap_err(),
            SessionError::InvalidTransition { action: "extract", phase: Phase::Idle }
        );
    }

    #[test]
    fn extracting_locks_out_url_changes_and_reentry() {
        let mut state = ready_state();
        state.select_options(mp3_high()).unwrap();
        let job = state.begin_extraction().unwrap();
        assert_eq!(state.phase(), Phase::Extracting);
        assert_eq!(job.title, "Song A");
        assert!(!state.controls().extract_enabled);
        assert!(!state.controls().url_editable);

        assert_eq!(state.begin_extraction().unwrap_err(), SessionError::Busy);
        assert_eq!(state.change_url("https://other.example").unwrap_err(), SessionError::Busy);
        assert_eq!(state.select_options(mp3_high()).unwrap_err(), SessionError::Busy);
        assert_eq!(state.url(), "https://video.example/watch?v=a");
    }

    #[test]
    fn extraction_success_then_download() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Song A.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let mut state = ready_state();
        state.select_options(mp3_high()).unwrap();
        let job = state.begin_extraction().unwrap();
        state.finish_extraction(&job, Ok(path.clone()));

        assert_eq!(state.phase(), Phase::DownloadReady);
        assert_eq!(state.output_file_path(), Some(path.as_path()));
        let view = state.view();
        let info = view.download.unwrap();
        assert_eq!(info.filename, "Song A.mp3");
        assert_eq!(info.mime_type, "audio/mpeg");
        assert!(view.controls.download_visible);

        let download = state.take_download().unwrap();
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.output_file_path().is_none());
        assert!(path.exists());
        drop(download);
        assert!(!path.exists());

        assert!(matches!(
            state.take_download().unwrap_err(),
            SessionError::InvalidTransition { action: "download", .. }
        ));
    }

    #[test]
    fn extraction_failure_records_error() {
        let mut state = ready_state();
        state.select_options(mp3_high()).unwrap();
        let job = state.begin_extraction().unwrap();
        state.finish_extraction(&job, Err(MediaError::ExtractionFailed("ffmpeg exploded".into())));

        assert_eq!(state.phase(), Phase::Error);
        let err = state.last_error().unwrap();
        assert_eq!(err.kind, ErrorKind::ExtractionFailed);
        assert!(!err.message.contains("ffmpeg"));
    }

    #[test]
    fn url_change_resets_everything_and_deletes_cached_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Song A.opus");
        std::fs::write(&path, b"audio").unwrap();

        let mut state = ready_state();
        state
            .select_options(OptionsUpdate {
                codec: Some(Codec::Opus),
                quality: Some(QualityTier::Low),
                constant_bitrate: Some(true),
            })
            .unwrap();
        let job = state.begin_extraction().unwrap();
        state.finish_extraction(&job, Ok(path.clone()));
        assert_eq!(state.phase(), Phase::DownloadReady);

        state.change_url("https://video.example/watch?v=b").unwrap();
        assert_eq!(state.phase(), Phase::Idle);
        assert!(state.metadata().is_none());
        assert_eq!(*state.selection(), OptionsSelection::default());
        assert!(state.output_file_path().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn url_change_clears_error() {
        let mut state = SessionState::new();
        let rev = state.change_url("x").unwrap();
        state.apply_metadata(rev, Err(MediaError::VideoUnavailable("private".into())));
        assert_eq!(state.last_error().unwrap().message, "Video unavailable.");

        state.change_url("  https://video.example/ok  ").unwrap();
        assert_eq!(state.phase(), Phase::Idle);
        assert_eq!(state.target_url(), "https://video.example/ok");
        assert!(state.last_error().is_none());
    }

    #[test]
    fn invalid_url_message_quotes_the_input_as_typed() {
        let mut state = SessionState::new();
        let rev = state.change_url("  not a url ").unwrap();
        assert_eq!(state.url(), "  not a url ");
        assert_eq!(state.target_url(), "not a url");
        state.apply_metadata(rev, Err(MediaError::InvalidUrl("not a url".into())));
        assert_eq!(state.last_error().unwrap().message, "'  not a url ' is not a valid URL.");
    }

    #[test]
    fn options_only_in_metadata_ready() {
        let mut state = SessionState::new();
        assert!(matches!(
            state.select_options(mp3_high()),
            Err(SessionError::InvalidTransition { phase: Phase::Idle, .. })
        ));
    }

    #[test]
    fn delivery_failure_is_surfaced() {
        let mut state = SessionState::new();
        state.fail_delivery(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(state.phase(), Phase::Error);
        assert_eq!(state.last_error().unwrap().kind, ErrorKind::FileSystemError);
    }

    #[test]
    fn ended_session_refuses_everything() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Song A.mp3");
        std::fs::write(&path, b"audio").unwrap();

        let mut state = ready_state();
        state.select_options(mp3_high()).unwrap();
        let job = state.begin_extraction().unwrap();
        assert_eq!(state.end().unwrap_err(), SessionError::Busy);
        state.finish_extraction(&job, Ok(path.clone()));

        state.end().unwrap();
        assert!(state.is_ended());
        assert!(!path.exists());
        assert_eq!(state.change_url("https://video.example").unwrap_err(), SessionError::Ended);
        assert_eq!(state.begin_extraction().unwrap_err(), SessionError::Ended);
        assert_eq!(state.end().unwrap_err(), SessionError::Ended);
    }

    #[test]
    fn cbr_hint_follows_codec() {
        let mut state = ready_state();
        assert!(state.controls().cbr_effective);
        state
            .select_options(OptionsUpdate { codec: Some(Codec::Opus), ..Default::default() })
            .unwrap();
        assert!(!state.controls().cbr_effective);
    }
}
