use std::sync::Arc;

use tracing::error;

use tesoro_db::Database;

use crate::config::Config;
use crate::error::ApiError;
use crate::media::MediaStorage;
use crate::rate_limit::RateLimiter;
use crate::session::{SessionManager, SessionStore};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub sessions: SessionManager,
    pub media: MediaStorage,
    pub login_limiter: RateLimiter,
    pub config: Config,
}

impl AppStateInner {
    /// Wires the session manager and login limiter to `db` and `config`.
    pub fn new(db: Arc<Database>, media: MediaStorage, config: Config) -> AppState {
        let store: Arc<dyn SessionStore> = db.clone();
        Arc::new(Self {
            sessions: SessionManager::new(store, config.session_ttl),
            login_limiter: RateLimiter::new(config.login_rate_limit, config.login_rate_window),
            db,
            media,
            config,
        })
    }
}

/// Runs store work off the async runtime.
pub async fn blocking<F, T>(state: &AppState, f: F) -> Result<T, ApiError>
where
    F: FnOnce(&AppStateInner) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            ApiError::Internal(anyhow::anyhow!("background task failed"))
        })?
}
