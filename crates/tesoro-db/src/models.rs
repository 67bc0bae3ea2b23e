//! Database row types. These map directly to SQLite rows and stay separate
//! from the tesoro-types API models to keep the DB layer independent.

use tesoro_types::models::{EventKind, JournalRole, SiteRole};

pub struct UserRow {
    pub id: i64,
    pub name: String,
    pub email: String,
    pub password: String,
    pub role: SiteRole,
    pub created_at: String,
}

/// A journal joined with one member's grant.
pub struct JournalRow {
    pub id: i64,
    pub subject_name: String,
    pub role: JournalRole,
    pub created_at: String,
    pub last_accessed_at: String,
}

pub struct MemberRow {
    pub user_id: i64,
    pub name: String,
    pub email: String,
    pub role: JournalRole,
}

pub struct EventRow {
    pub id: i64,
    pub journal_id: i64,
    pub kind: EventKind,
    pub description: String,
    pub date: String,
    pub media_path: Option<String>,
    pub is_favorite: bool,
    pub author_id: Option<i64>,
    pub author_name: Option<String>,
    pub created_at: String,
}

pub struct NewEvent<'a> {
    pub journal_id: i64,
    pub kind: EventKind,
    pub description: &'a str,
    pub date: &'a str,
    pub media_path: Option<&'a str>,
    pub author_id: i64,
}

pub struct SiteConfigRow {
    pub site_name: String,
    pub allow_new_registrations: bool,
}

pub struct StatsRow {
    pub users: i64,
    pub journals: i64,
    pub events: i64,
}

/// Persisted session state. Keyed by the SHA-256 of the client token;
/// times are unix seconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRow {
    pub token_hash: String,
    pub user_id: i64,
    pub name: String,
    pub role: SiteRole,
    pub active_journal_id: Option<i64>,
    pub created_at: i64,
    pub expires_at: i64,
}
