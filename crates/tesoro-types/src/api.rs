use serde::{Deserialize, Serialize};

use crate::models::{Event, Journal, JournalRole, Member, SiteRole, User};

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub password: String,
    /// Name for the journal created alongside the account.
    #[serde(default)]
    pub subject_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

/// The identity bound to a session, as returned to the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub id: i64,
    pub name: String,
    pub role: SiteRole,
    pub active_journal_id: Option<i64>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub message: String,
    pub user: SessionUser,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// -- Journals --

#[derive(Debug, Serialize, Deserialize)]
pub struct JournalList {
    pub journals: Vec<Journal>,
    pub active_journal_id: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateJournalRequest {
    pub subject_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateJournalResponse {
    pub id: i64,
    pub subject_name: String,
    pub role: JournalRole,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetActiveJournalRequest {
    pub id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveJournalResponse {
    pub active_journal_id: i64,
    pub role: JournalRole,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ThemeConfig {
    pub config: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MemberList {
    pub members: Vec<Member>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GrantAccessRequest {
    pub email: String,
    pub role: JournalRole,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeRoleRequest {
    pub role: JournalRole,
}

// -- Events --

#[derive(Debug, Serialize, Deserialize)]
pub struct EventList {
    /// Caller's role on the journal; viewers get read-only UI.
    pub role: JournalRole,
    pub events: Vec<Event>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateEventResponse {
    pub id: i64,
    pub media_url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FavoriteRequest {
    pub is_favorite: bool,
}

// -- Admin --

#[derive(Debug, Serialize, Deserialize)]
pub struct AdminStats {
    pub total_users: i64,
    pub total_journals: i64,
    pub total_events: i64,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateSiteSettingsRequest {
    pub site_name: String,
    pub allow_new_registrations: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserList {
    pub users: Vec<User>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeSiteRoleRequest {
    pub role: SiteRole,
}
