use std::time::Duration;

use tracing::{info, warn};

use tesoro_api::AppState;
use tesoro_api::state::blocking;

/// Background task that drops expired sessions and stale login-limit
/// windows.
pub async fn run_cleanup_loop(state: AppState, interval_secs: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));

    loop {
        interval.tick().await;

        match blocking(&state, |inner| Ok(inner.sessions.purge_expired()?)).await {
            Ok(count) => {
                if count > 0 {
                    info!("Cleanup: purged {} expired sessions", count);
                }
            }
            Err(e) => {
                warn!("Cleanup error: {}", e);
            }
        }

        let pruned = state.login_limiter.prune();
        if pruned > 0 {
            info!("Cleanup: dropped {} stale rate-limit windows", pruned);
        }
    }
}
