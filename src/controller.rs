use std::io;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::fs::File;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::media::{ExtractionRequest, MediaCollaborator, MediaError};
use crate::options::OptionsUpdate;
use crate::session::{CacheFile, ExtractionJob, SessionError, SessionView};
use crate::store::Session;

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("failed to open extracted file: {0}")]
    Io(#[from] io::Error),
}

/// A cached file opened for streaming. Dropping `guard` deletes the file.
pub struct OpenedDownload {
    pub file: File,
    pub len: u64,
    pub filename: String,
    pub mime_type: &'static str,
    pub guard: CacheFile,
}

/// Drives session transitions around calls into the media collaborator.
///
/// Collaborator calls run without the session lock held, so the session can
/// still be observed while a fetch or an extraction is in flight.
#[derive(Clone)]
pub struct SessionController {
    media: Arc<dyn MediaCollaborator>,
    limiter: Arc<Semaphore>,
    max_concurrent_extractions: usize,
}

impl SessionController {
    pub fn new(media: Arc<dyn MediaCollaborator>, max_concurrent_extractions: usize) -> Self {
        Self {
            media,
            limiter: Arc::new(Semaphore::new(max_concurrent_extractions)),
            max_concurrent_extractions,
        }
    }

    pub async fn enter_url(&self, session: &Session, url: &str) -> Result<SessionView, SessionError> {
        let (revision, url) = {
            let mut state = session.state.lock().await;
            let revision = state.change_url(url)?;
            if state.target_url().is_empty() {
                return Ok(state.view());
            }
            (revision, state.target_url().to_string())
        };

        info!("[SESSION] {} fetching metadata: url={}", session.id(), url);
        let result = self.media.fetch_metadata(&url).await;

        let mut state = session.state.lock().await;
        state.apply_metadata(revision, result);
        Ok(state.view())
    }

    pub async fn select_options(
        &self,
        session: &Session,
        update: OptionsUpdate,
    ) -> Result<SessionView, SessionError> {
        let mut state = session.state.lock().await;
        state.select_options(update)?;
        Ok(state.view())
    }

    /// Run one extraction to completion and return the resulting view.
    ///
    /// The work happens on its own task: dropping the returned future (client
    /// gone) does not abort it.
    pub async fn extract(&self, session: Arc<Session>) -> Result<SessionView, SessionError> {
        let (job, permit) = {
            let mut state = session.state.lock().await;
            // Transition errors win over the capacity check.
            state.check_extraction()?;
            let permit = self
                .limiter
                .clone()
                .try_acquire_owned()
                .map_err(|_| SessionError::AtCapacity(self.max_concurrent_extractions))?;
            (state.begin_extraction()?, permit)
        };

        info!(
            "[EXTRACT] {} codec={:?} quality={:?} cbr={} url={}",
            session.id(),
            job.options.codec,
            job.options.quality,
            job.options.constant_bitrate,
            job.url
        );

        let media = self.media.clone();
        let task_session = session.clone();
        let supervisor = tokio::spawn(async move {
            let worker = tokio::spawn(run_extraction(
                media,
                task_session.clone(),
                job.clone(),
                permit,
            ));
            if let Err(e) = worker.await {
                error!("[EXTRACT] {} extraction task died: {}", task_session.id(), e);
                discard_partial_output(&task_session).await;
                task_session.state.lock().await.finish_extraction(
                    &job,
                    Err(MediaError::ExtractionFailed(format!("extraction task died: {}", e))),
                );
            }
        });
        if let Err(e) = supervisor.await {
            error!("[EXTRACT] {} supervisor task died: {}", session.id(), e);
        }

        Ok(session.view().await)
    }

    /// Move the cached file out of the session and open it for streaming.
    pub async fn open_download(&self, session: &Session) -> Result<OpenedDownload, DeliveryError> {
        let mut state = session.state.lock().await;
        let pending = state.take_download()?;

        let opened = async {
            let file = File::open(pending.file.path()).await?;
            let len = file.metadata().await?.len();
            Ok::<_, io::Error>((file, len))
        }
        .await;

        match opened {
            Ok((file, len)) => {
                info!("[DOWNLOAD] {} streaming {} ({} bytes)", session.id(), pending.filename, len);
                Ok(OpenedDownload {
                    file,
                    len,
                    filename: pending.filename,
                    mime_type: pending.mime_type,
                    guard: pending.file,
                })
            }
            Err(e) => {
                error!(
                    "[DOWNLOAD] {} cannot open {}: {}",
                    session.id(),
                    pending.file.path().display(),
                    e
                );
                state.fail_delivery(io::Error::new(e.kind(), e.to_string()));
                Err(DeliveryError::Io(e))
            }
        }
    }
}

async fn run_extraction(
    media: Arc<dyn MediaCollaborator>,
    session: Arc<Session>,
    job: ExtractionJob,
    _permit: OwnedSemaphorePermit,
) {
    let output_dir = session.cache_dir().to_path_buf();
    let result = match tokio::fs::create_dir_all(&output_dir).await {
        Ok(()) => {
            let request = ExtractionRequest {
                url: job.url.clone(),
                title: job.title.clone(),
                options: job.options,
                output_dir,
            };
            media.extract_audio(&request).await
        }
        Err(e) => Err(MediaError::FileSystem(e)),
    };

    match &result {
        Ok(path) => info!("[EXTRACT] {} done: {}", session.id(), path.display()),
        Err(e) => {
            error!("[EXTRACT] {} failed: {}", session.id(), e);
            discard_partial_output(&session).await;
        }
    }
    session.state.lock().await.finish_extraction(&job, result);
}

/// Delete whatever a failed extraction left in the session's cache directory.
/// While a session is extracting, that directory holds nothing else.
async fn discard_partial_output(session: &Session) {
    let mut entries = match tokio::fs::read_dir(session.cache_dir()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            warn!(
                "[CACHE] {} cannot list {}: {}",
                session.id(),
                session.cache_dir().display(),
                e
            );
            return;
        }
    };
    loop {
        let path = match entries.next_entry().await {
            Ok(Some(entry)) => entry.path(),
            Ok(None) => break,
            Err(e) => {
                warn!("[CACHE] {} cannot list {}: {}", session.id(), session.cache_dir().display(), e);
                break;
            }
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => info!("[CACHE] {} removed partial output {}", session.id(), path.display()),
            Err(e) => warn!("[CACHE] Failed to remove {}: {}", path.display(), e),
        }
    }
}
