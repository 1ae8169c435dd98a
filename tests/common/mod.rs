#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use soundharvest::media::{ExtractionRequest, MediaCollaborator, MediaError, Metadata};
use soundharvest::options::{Codec, OptionsUpdate, QualityTier};
use soundharvest::session::Phase;
use soundharvest::store::Session;
use soundharvest::util;

pub const SONG_A: &str = "https://video.example/watch?v=song-a";
pub const AWKWARD: &str = "https://video.example/watch?v=awkward";
pub const GONE: &str = "https://video.example/watch?v=gone";
pub const BROKEN: &str = "https://video.example/watch?v=broken";
/// Extraction writes its output and then fails, like a failed thumbnail embed.
pub const HALF_DONE: &str = "https://video.example/watch?v=half-done";
pub const AUDIO: &[u8] = b"fake audio bytes";

/// Scripted stand-in for yt-dlp.
#[derive(Default)]
pub struct FakeMedia {
    gate: Option<Notify>,
    pub fetches: AtomicUsize,
    pub extractions: AtomicUsize,
    pub last_request: Mutex<Option<ExtractionRequest>>,
}

impl FakeMedia {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Extractions block until `release` is called.
    pub fn gated() -> Arc<Self> {
        Arc::new(Self {
            gate: Some(Notify::new()),
            ..Self::default()
        })
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn last_request(&self) -> Option<ExtractionRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

#[async_trait]
impl MediaCollaborator for FakeMedia {
    async fn fetch_metadata(&self, url: &str) -> Result<Metadata, MediaError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let title = match url {
            SONG_A | BROKEN | HALF_DONE => "Song A",
            AWKWARD => "AC/DC: Live?",
            GONE => return Err(MediaError::VideoUnavailable("Private video".into())),
            _ => return Err(MediaError::InvalidUrl(url.to_string())),
        };
        Ok(Metadata {
            thumbnail_url: "https://img.example/thumb.jpg".into(),
            title: title.into(),
            uploader: "Artist".into(),
        })
    }

    async fn extract_audio(&self, request: &ExtractionRequest) -> Result<PathBuf, MediaError> {
        self.extractions.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if request.url == BROKEN {
            return Err(MediaError::ExtractionFailed("ffmpeg: conversion failed".into()));
        }
        let path = request
            .output_dir
            .join(util::output_filename(&request.title, request.options.codec));
        tokio::fs::write(&path, AUDIO).await?;
        if request.url == HALF_DONE {
            tokio::fs::write(path.with_extension("webp"), b"thumb").await?;
            return Err(MediaError::ExtractionFailed(
                "ERROR: Postprocessing: Cannot embed thumbnail".into(),
            ));
        }
        Ok(path)
    }
}

pub fn choose(codec: Codec, quality: QualityTier, constant_bitrate: bool) -> OptionsUpdate {
    OptionsUpdate {
        codec: Some(codec),
        quality: Some(quality),
        constant_bitrate: Some(constant_bitrate),
    }
}

pub async fn wait_for_phase(session: &Session, phase: Phase) {
    for _ in 0..400 {
        if session.phase().await == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("session never reached {}", phase);
}
