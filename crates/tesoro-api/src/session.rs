//! Server-side sessions.
//!
//! The client holds an opaque random token (cookie or bearer header). The
//! store only ever sees its SHA-256, keyed to the bound identity and the
//! active journal. Sessions expire a fixed time after creation; use does not
//! extend them.

use std::sync::Arc;

use anyhow::Result;
use axum::http::{HeaderMap, header};
use axum_extra::extract::CookieJar;
use axum_extra::extract::cookie::{Cookie, SameSite};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use tesoro_db::Database;
use tesoro_db::models::SessionRow;
use tesoro_types::api::SessionUser;
use tesoro_types::models::SiteRole;

pub const SESSION_COOKIE: &str = "tesoro_session";

/// Persistence for session records, looked up by token hash.
pub trait SessionStore: Send + Sync {
    fn load(&self, token_hash: &str) -> Result<Option<SessionRow>>;
    fn save(&self, record: &SessionRow) -> Result<()>;
    fn delete(&self, token_hash: &str) -> Result<()>;
    fn delete_for_user(&self, user_id: i64) -> Result<usize>;
    /// Drops every record expired at `now` (unix seconds).
    fn purge_expired(&self, now: i64) -> Result<usize>;
}

impl SessionStore for Database {
    fn load(&self, token_hash: &str) -> Result<Option<SessionRow>> {
        self.load_session(token_hash)
    }

    fn save(&self, record: &SessionRow) -> Result<()> {
        self.save_session(record)
    }

    fn delete(&self, token_hash: &str) -> Result<()> {
        self.delete_session(token_hash)
    }

    fn delete_for_user(&self, user_id: i64) -> Result<usize> {
        self.delete_sessions_for_user(user_id)
    }

    fn purge_expired(&self, now: i64) -> Result<usize> {
        self.delete_expired_sessions(now)
    }
}

/// The authenticated identity attached to a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user_id: i64,
    pub name: String,
    pub role: SiteRole,
    pub active_journal_id: Option<i64>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == SiteRole::Admin
    }

    pub fn to_user(&self) -> SessionUser {
        SessionUser {
            id: self.user_id,
            name: self.name.clone(),
            role: self.role,
            active_journal_id: self.active_journal_id,
        }
    }

    fn from_row(row: SessionRow) -> Self {
        Self {
            user_id: row.user_id,
            name: row.name,
            role: row.role,
            active_journal_id: row.active_journal_id,
            expires_at: DateTime::from_timestamp(row.expires_at, 0).unwrap_or_default(),
        }
    }
}

/// The raw token the current request authenticated with.
#[derive(Debug, Clone)]
pub struct SessionToken(pub String);

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    ttl: chrono::Duration,
}

impl SessionManager {
    pub fn new(store: Arc<dyn SessionStore>, ttl: chrono::Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> chrono::Duration {
        self.ttl
    }

    /// Issues a new session. Returns the client token and the bound state.
    pub fn create(
        &self,
        user_id: i64,
        name: &str,
        role: SiteRole,
        active_journal_id: Option<i64>,
    ) -> Result<(String, Session)> {
        self.create_at(user_id, name, role, active_journal_id, Utc::now())
    }

    fn create_at(
        &self,
        user_id: i64,
        name: &str,
        role: SiteRole,
        active_journal_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(String, Session)> {
        let token = generate_token();
        let row = SessionRow {
            token_hash: hash_token(&token),
            user_id,
            name: name.to_string(),
            role,
            active_journal_id,
            created_at: now.timestamp(),
            expires_at: (now + self.ttl).timestamp(),
        };
        self.store.save(&row)?;

        info!("Session created for user {}", user_id);
        Ok((token, Session::from_row(row)))
    }

    pub fn resolve(&self, token: &str) -> Result<Option<Session>> {
        self.resolve_at(token, Utc::now())
    }

    fn resolve_at(&self, token: &str, now: DateTime<Utc>) -> Result<Option<Session>> {
        let token_hash = hash_token(token);
        let Some(row) = self.store.load(&token_hash)? else {
            return Ok(None);
        };

        if now.timestamp() >= row.expires_at {
            debug!("Session for user {} expired", row.user_id);
            self.store.delete(&token_hash)?;
            return Ok(None);
        }

        Ok(Some(Session::from_row(row)))
    }

    /// Points the session at another journal. Returns false when the
    /// session no longer exists.
    pub fn set_active_journal(&self, token: &str, journal_id: Option<i64>) -> Result<bool> {
        let token_hash = hash_token(token);
        let Some(mut row) = self.store.load(&token_hash)? else {
            return Ok(false);
        };
        row.active_journal_id = journal_id;
        self.store.save(&row)?;
        Ok(true)
    }

    /// Idempotent: destroying an unknown or expired token succeeds.
    pub fn destroy(&self, token: &str) -> Result<()> {
        self.store.delete(&hash_token(token))
    }

    pub fn destroy_for_user(&self, user_id: i64) -> Result<usize> {
        self.store.delete_for_user(user_id)
    }

    pub fn purge_expired(&self) -> Result<usize> {
        self.store.purge_expired(Utc::now().timestamp())
    }
}

/// 256 random bits, URL-safe base64.
pub fn generate_token() -> String {
    let bytes: [u8; 32] = rand::random();
    B64.encode(bytes)
}

pub fn hash_token(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

/// Token from the session cookie, falling back to `Authorization: Bearer`.
pub fn token_from_request(jar: &CookieJar, headers: &HeaderMap) -> Option<String> {
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Builds the session cookie.
/// - HttpOnly, SameSite=Strict, path `/`
/// - Max-Age matches the session lifetime
/// - Secure in production
pub fn session_cookie(token: String, ttl: chrono::Duration, secure: bool) -> Cookie<'static> {
    let mut c = Cookie::new(SESSION_COOKIE, token);

    c.set_http_only(true);
    c.set_secure(secure);
    c.set_same_site(SameSite::Strict);
    c.set_path("/");
    c.set_max_age(time::Duration::seconds(ttl.num_seconds()));

    c
}

pub fn clear_session_cookie(secure: bool) -> Cookie<'static> {
    let mut c = Cookie::new(SESSION_COOKIE, "");

    c.set_http_only(true);
    c.set_secure(secure);
    c.set_same_site(SameSite::Strict);
    c.set_path("/");
    c.set_max_age(time::Duration::seconds(0));

    c
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesoro_db::queries::Registration;

    fn manager() -> (SessionManager, Arc<Database>, i64, i64) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let Registration::Created { user_id, journal_id } = db
            .register_user("Ana", "a@x.com", "hash", SiteRole::User, "Bebé")
            .unwrap()
        else {
            panic!("registration failed");
        };
        let store: Arc<dyn SessionStore> = db.clone();
        (SessionManager::new(store, chrono::Duration::hours(24)), db, user_id, journal_id)
    }

    #[test]
    fn session_expires_after_ttl_even_when_used() {
        let (sessions, _db, user_id, journal_id) = manager();
        let t0 = Utc::now();
        let (token, _) = sessions
            .create_at(user_id, "Ana", SiteRole::User, Some(journal_id), t0)
            .unwrap();

        // Continuous use right up to the deadline does not slide it.
        for hours in [0, 6, 12, 23] {
            let at = t0 + chrono::Duration::hours(hours);
            assert!(sessions.resolve_at(&token, at).unwrap().is_some(), "valid at +{hours}h");
        }
        let just_before = t0 + chrono::Duration::hours(24) - chrono::Duration::seconds(1);
        assert!(sessions.resolve_at(&token, just_before).unwrap().is_some());

        let after = t0 + chrono::Duration::hours(24) + chrono::Duration::seconds(1);
        assert!(sessions.resolve_at(&token, after).unwrap().is_none());
        // The expired record is gone, not just hidden.
        assert!(sessions.resolve_at(&token, t0).unwrap().is_none());
    }

    #[test]
    fn destroy_is_idempotent() {
        let (sessions, _db, user_id, _) = manager();
        let (token, _) = sessions.create(user_id, "Ana", SiteRole::User, None).unwrap();

        sessions.destroy(&token).unwrap();
        sessions.destroy(&token).unwrap();
        sessions.destroy("never-issued").unwrap();
        assert!(sessions.resolve(&token).unwrap().is_none());
    }

    #[test]
    fn store_never_sees_raw_token() {
        let (sessions, db, user_id, _) = manager();
        let (token, _) = sessions.create(user_id, "Ana", SiteRole::User, None).unwrap();

        assert!(db.load_session(&token).unwrap().is_none());
        assert!(db.load_session(&hash_token(&token)).unwrap().is_some());
    }

    #[test]
    fn active_journal_is_persisted() {
        let (sessions, _db, user_id, journal_id) = manager();
        let (token, session) = sessions.create(user_id, "Ana", SiteRole::User, None).unwrap();
        assert_eq!(session.active_journal_id, None);

        assert!(sessions.set_active_journal(&token, Some(journal_id)).unwrap());
        let resolved = sessions.resolve(&token).unwrap().unwrap();
        assert_eq!(resolved.active_journal_id, Some(journal_id));

        sessions.destroy(&token).unwrap();
        assert!(!sessions.set_active_journal(&token, Some(journal_id)).unwrap());
    }

    #[test]
    fn tokens_are_unique_and_url_safe() {
        let a = generate_token();
        let b = generate_token();
        assert_ne!(a, b);
        assert_eq!(a.len(), 43);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
