use std::fmt;
use std::sync::Arc;

use lockstep_core::{SessionAuthenticator, SyncEngine};

use crate::config::Config;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub engine: Arc<SyncEngine>,
    pub authenticator: Arc<SessionAuthenticator>,
}

impl fmt::Debug for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
