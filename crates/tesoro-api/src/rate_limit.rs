use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tracing::warn;

use crate::error::ApiError;
use crate::state::AppState;

struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window request counter keyed by client address.
pub struct RateLimiter {
    windows: DashMap<String, Window>,
    max: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max: u32, window: Duration) -> Self {
        Self {
            windows: DashMap::new(),
            max,
            window,
        }
    }

    /// Counts one attempt for `key`. Returns false once the window is full.
    pub fn check(&self, key: &str) -> bool {
        self.check_at(key, Instant::now())
    }

    fn check_at(&self, key: &str, now: Instant) -> bool {
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started: now,
            count: 0,
        });

        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count += 1;
        entry.count <= self.max
    }

    /// Drops windows that have run out. Returns how many were removed.
    pub fn prune(&self) -> usize {
        self.prune_at(Instant::now())
    }

    fn prune_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, w| now.duration_since(w.started) < self.window);
        before - self.windows.len()
    }
}

/// Client address for rate limiting. Proxy headers are only honoured when
/// the deployment says they can be trusted.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy: bool) -> String {
    if trust_proxy {
        let forwarded = headers
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .or_else(|| {
                headers
                    .get("x-forwarded-for")
                    .and_then(|h| h.to_str().ok())
                    .and_then(|s| s.split(',').find(|ip| !ip.trim().is_empty()))
            })
            .map(|ip| ip.trim().to_string());

        if let Some(ip) = forwarded {
            return ip;
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".into())
}

pub async fn limit_login(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let peer = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0);
    let key = client_key(req.headers(), peer, state.config.trust_proxy_headers);

    if !state.login_limiter.check(&key) {
        warn!("Login rate limit hit for {}", key);
        return Err(ApiError::RateLimited);
    }

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blocks_after_max_until_window_passes() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();

        for _ in 0..3 {
            assert!(limiter.check_at("1.2.3.4", t0));
        }
        assert!(!limiter.check_at("1.2.3.4", t0 + Duration::from_secs(59)));
        // Other clients have their own window.
        assert!(limiter.check_at("5.6.7.8", t0));

        assert!(limiter.check_at("1.2.3.4", t0 + Duration::from_secs(60)));
    }

    #[test]
    fn prune_drops_only_stale_windows() {
        let limiter = RateLimiter::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        limiter.check_at("old", t0);
        limiter.check_at("new", t0 + Duration::from_secs(50));

        assert_eq!(limiter.prune_at(t0 + Duration::from_secs(70)), 1);
        assert_eq!(limiter.windows.len(), 1);
        assert!(limiter.windows.contains_key("new"));
    }

    #[test]
    fn proxy_headers_need_trust() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());
        let peer: SocketAddr = "10.0.0.1:5000".parse().unwrap();

        assert_eq!(client_key(&headers, Some(peer), false), "10.0.0.1");
        assert_eq!(client_key(&headers, Some(peer), true), "203.0.113.7");

        headers.insert("x-real-ip", "198.51.100.2".parse().unwrap());
        assert_eq!(client_key(&headers, Some(peer), true), "198.51.100.2");

        assert_eq!(client_key(&HeaderMap::new(), None, true), "unknown");
    }
}
