use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

/// Runtime settings, read once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub db_path: PathBuf,
    pub public_dir: PathBuf,
    pub media_dir: PathBuf,
    pub session_ttl: chrono::Duration,
    /// Sets the `Secure` flag on the session cookie.
    pub secure_cookies: bool,
    pub login_rate_limit: u32,
    pub login_rate_window: Duration,
    /// Key the login limiter on `X-Real-IP` / `X-Forwarded-For` instead of
    /// the peer address. Only safe behind a proxy that sets them.
    pub trust_proxy_headers: bool,
    pub admin_seed: Option<AdminSeed>,
}

/// Credentials for the administrator created on first start.
#[derive(Clone)]
pub struct AdminSeed {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for AdminSeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminSeed")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 3000,
            db_path: "tesoro.db".into(),
            public_dir: "./public".into(),
            media_dir: "./media".into(),
            session_ttl: chrono::Duration::hours(24),
            secure_cookies: false,
            login_rate_limit: 100,
            login_rate_window: Duration::from_secs(15 * 60),
            trust_proxy_headers: false,
            admin_seed: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let admin_seed = match (var("TESORO_ADMIN_EMAIL"), var("TESORO_ADMIN_PASSWORD")) {
            (Some(email), Some(password)) => Some(AdminSeed {
                name: var("TESORO_ADMIN_NAME").unwrap_or_else(|| "Admin".into()),
                email,
                password,
            }),
            _ => None,
        };

        Ok(Self {
            host: var("TESORO_HOST").unwrap_or(defaults.host),
            port: parse_var("TESORO_PORT", defaults.port)?,
            db_path: var("TESORO_DB_PATH").map(PathBuf::from).unwrap_or(defaults.db_path),
            public_dir: var("TESORO_PUBLIC_DIR").map(PathBuf::from).unwrap_or(defaults.public_dir),
            media_dir: var("TESORO_MEDIA_DIR").map(PathBuf::from).unwrap_or(defaults.media_dir),
            session_ttl: session_ttl(parse_var("TESORO_SESSION_TTL_HOURS", 24)?)?,
            secure_cookies: var("TESORO_ENV").is_some_and(|env| env == "production"),
            login_rate_limit: parse_var("TESORO_LOGIN_RATE_LIMIT", defaults.login_rate_limit)?,
            login_rate_window: Duration::from_secs(parse_var("TESORO_LOGIN_RATE_WINDOW_SECS", 900)?),
            trust_proxy_headers: parse_var("TESORO_TRUST_PROXY", false)?,
            admin_seed,
        })
    }
}

/// Ten years.
const MAX_SESSION_TTL_HOURS: i64 = 10 * 366 * 24;

fn session_ttl(hours: i64) -> Result<chrono::Duration> {
    if hours <= 0 || hours > MAX_SESSION_TTL_HOURS {
        anyhow::bail!(
            "TESORO_SESSION_TTL_HOURS must be between 1 and {MAX_SESSION_TTL_HOURS}, got {hours}"
        );
    }
    chrono::Duration::try_hours(hours)
        .with_context(|| format!("TESORO_SESSION_TTL_HOURS is out of range: {hours}"))
}

fn var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display + Send + Sync + 'static,
{
    match var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}
