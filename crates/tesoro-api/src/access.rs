//! Journal access gate.
//!
//! Every journal-scoped handler resolves the caller's grant through
//! [`check_access`] with the role set its operation needs. A missing grant is
//! always a 403, never an empty result.

use anyhow::Result;
use tracing::warn;

use tesoro_db::Database;
use tesoro_types::models::JournalRole;

use crate::error::ApiError;
use crate::session::Session;
use crate::state::{AppState, AppStateInner, blocking};

use JournalRole::{Editor, Owner, Viewer};

/// Reading events and media, switching to the journal, theme config, members.
pub const READ: &[JournalRole] = &[Owner, Editor, Viewer];
/// Creating, deleting and favoriting events.
pub const WRITE: &[JournalRole] = &[Owner, Editor];
/// Deleting the journal and managing other members' grants.
pub const MANAGE: &[JournalRole] = &[Owner];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Allow(JournalRole),
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NoGrant,
    InsufficientRole(JournalRole),
}

impl DenyReason {
    fn message(self) -> String {
        match self {
            Self::NoGrant => "You do not have access to this journal".into(),
            Self::InsufficientRole(role) => {
                format!("Your role on this journal ({role}) does not allow this action")
            }
        }
    }
}

/// Where grants come from. The database in production, a map in tests.
pub trait GrantLookup {
    fn role_for(&self, journal_id: i64, user_id: i64) -> Result<Option<JournalRole>>;
}

impl GrantLookup for Database {
    fn role_for(&self, journal_id: i64, user_id: i64) -> Result<Option<JournalRole>> {
        self.get_access_role(journal_id, user_id)
    }
}

pub fn check_access(
    session: &Session,
    journal_id: i64,
    required: &[JournalRole],
    grants: &impl GrantLookup,
) -> Result<Access> {
    let access = match grants.role_for(journal_id, session.user_id)? {
        None => Access::Deny(DenyReason::NoGrant),
        Some(role) if required.contains(&role) => Access::Allow(role),
        Some(role) => Access::Deny(DenyReason::InsufficientRole(role)),
    };
    Ok(access)
}

/// Blocking form for handlers already on the blocking pool.
pub fn require_role(
    inner: &AppStateInner,
    session: &Session,
    journal_id: i64,
    required: &[JournalRole],
) -> Result<JournalRole, ApiError> {
    match check_access(session, journal_id, required, inner.db.as_ref())? {
        Access::Allow(role) => Ok(role),
        Access::Deny(reason) => {
            warn!(
                "User {} denied on journal {}: {:?}",
                session.user_id, journal_id, reason
            );
            Err(ApiError::forbidden(reason.message()))
        }
    }
}

pub async fn authorize(
    state: &AppState,
    session: &Session,
    journal_id: i64,
    required: &'static [JournalRole],
) -> Result<JournalRole, ApiError> {
    let session = session.clone();
    blocking(state, move |inner| require_role(inner, &session, journal_id, required)).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;
    use tesoro_types::models::SiteRole;

    use super::*;

    struct Grants(HashMap<(i64, i64), JournalRole>);

    impl GrantLookup for Grants {
        fn role_for(&self, journal_id: i64, user_id: i64) -> Result<Option<JournalRole>> {
            Ok(self.0.get(&(journal_id, user_id)).copied())
        }
    }

    fn session(user_id: i64, role: SiteRole) -> Session {
        Session {
            user_id,
            name: format!("user-{user_id}"),
            role,
            active_journal_id: None,
            expires_at: Utc::now(),
        }
    }

    fn grants() -> Grants {
        Grants(HashMap::from([
            ((1, 10), Owner),
            ((1, 11), Editor),
            ((1, 12), Viewer),
            ((2, 11), Owner),
        ]))
    }

    #[test]
    fn role_sets_per_operation() {
        let g = grants();
        let cases = [
            (10, READ, Access::Allow(Owner)),
            (10, WRITE, Access::Allow(Owner)),
            (10, MANAGE, Access::Allow(Owner)),
            (11, READ, Access::Allow(Editor)),
            (11, WRITE, Access::Allow(Editor)),
            (11, MANAGE, Access::Deny(DenyReason::InsufficientRole(Editor))),
            (12, READ, Access::Allow(Viewer)),
            (12, WRITE, Access::Deny(DenyReason::InsufficientRole(Viewer))),
            (12, MANAGE, Access::Deny(DenyReason::InsufficientRole(Viewer))),
        ];
        for (user, required, expected) in cases {
            let got = check_access(&session(user, SiteRole::User), 1, required, &g).unwrap();
            assert_eq!(got, expected, "user {user} with {required:?}");
        }
    }

    #[test]
    fn no_grant_is_denied_even_for_admins() {
        let g = grants();
        let admin = session(99, SiteRole::Admin);
        assert_eq!(
            check_access(&admin, 1, READ, &g).unwrap(),
            Access::Deny(DenyReason::NoGrant)
        );
        // Owning another journal grants nothing here.
        assert_eq!(
            check_access(&session(11, SiteRole::User), 3, READ, &g).unwrap(),
            Access::Deny(DenyReason::NoGrant)
        );
    }

    #[test]
    fn denial_maps_to_forbidden() {
        let db = std::sync::Arc::new(Database::open_in_memory().unwrap());
        let config = crate::config::Config::default();
        let media = crate::media::MediaStorage::new(std::env::temp_dir().join("tesoro-access-test"));
        let inner = AppStateInner::new(db, media, config);

        let err = require_role(&inner, &session(1, SiteRole::User), 1, READ).unwrap_err();
        assert!(matches!(err, ApiError::Forbidden(_)));
    }
}
