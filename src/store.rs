use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{info, warn};
use tokio::sync::Mutex as AsyncMutex;
use uuid::Uuid;

use crate::session::{Phase, SessionError, SessionState, SessionView};

/// One user's session: its state plus the cache directory only it writes to.
pub struct Session {
    id: Uuid,
    cache_dir: PathBuf,
    pub(crate) state: AsyncMutex<SessionState>,
}

impl Session {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub async fn view(&self) -> SessionView {
        self.state.lock().await.view()
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }
}

struct Entry {
    session: Arc<Session>,
    last_seen: Instant,
}

/// All live sessions. Sessions share nothing but this index.
pub struct SessionStore {
    root: PathBuf,
    entries: AsyncMutex<HashMap<Uuid, Entry>>,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            entries: AsyncMutex::new(HashMap::new()),
        }
    }

    pub async fn create(&self) -> Arc<Session> {
        let id = Uuid::new_v4();
        let session = Arc::new(Session {
            id,
            cache_dir: self.root.join(id.to_string()),
            state: AsyncMutex::new(SessionState::new()),
        });
        self.entries.lock().await.insert(
            id,
            Entry {
                session: session.clone(),
                last_seen: Instant::now(),
            },
        );
        info!("[SESSION] Created {}", id);
        session
    }

    /// Look a session up and mark it as active.
    pub async fn get(&self, id: Uuid) -> Option<Arc<Session>> {
        let mut entries = self.entries.lock().await;
        let entry = entries.get_mut(&id)?;
        entry.last_seen = Instant::now();
        Some(entry.session.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// End a session: drop its cached output and remove its cache directory.
    /// Returns `Ok(false)` when no such session exists.
    pub async fn end(&self, id: Uuid) -> Result<bool, SessionError> {
        let session = match self.entries.lock().await.get(&id) {
            Some(entry) => entry.session.clone(),
            None => return Ok(false),
        };
        session.state.lock().await.end()?;
        self.entries.lock().await.remove(&id);
        remove_cache_dir(&session).await;
        info!("[SESSION] Ended {}", id);
        Ok(true)
    }

    /// End every session idle for longer than `ttl`. Sessions mid-extraction are kept.
    pub async fn reap_idle(&self, ttl: Duration) -> usize {
        let idle: Vec<Arc<Session>> = self
            .entries
            .lock()
            .await
            .values()
            .filter(|entry| entry.last_seen.elapsed() > ttl)
            .map(|entry| entry.session.clone())
            .collect();

        let mut reaped = 0;
        for session in idle {
            if let Err(e) = session.state.lock().await.end() {
                info!("[REAPER] Keeping {}: {}", session.id(), e);
                continue;
            }
            self.entries.lock().await.remove(&session.id());
            remove_cache_dir(&session).await;
            info!("[REAPER] Ended idle session {}", session.id());
            reaped += 1;
        }
        reaped
    }
}

async fn remove_cache_dir(session: &Session) {
    match tokio::fs::remove_dir_all(session.cache_dir()).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            "[SESSION] Failed to remove cache dir {}: {}",
            session.cache_dir().display(),
            e
        ),
    }
}
