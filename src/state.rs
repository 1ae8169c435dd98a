use std::sync::Arc;

use crate::controller::SessionController;
use crate::store::SessionStore;

pub struct AppState {
    pub sessions: Arc<SessionStore>,
    pub controller: SessionController,
}
