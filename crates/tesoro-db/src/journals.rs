use crate::models::{JournalRow, MemberRow};
use crate::sessions::clear_active_journal;
use crate::{Database, OptionalExt, is_unique_violation, now_timestamp, parse_column};
use anyhow::Result;
use rusqlite::Connection;
use tesoro_types::models::JournalRole;
use tracing::info;

#[derive(Debug, PartialEq, Eq)]
pub enum GrantOutcome {
    Granted,
    AlreadyMember,
}

/// Result of changing or removing an existing grant.
#[derive(Debug, PartialEq, Eq)]
pub enum AccessChange {
    Applied,
    NotMember,
    /// Refused: the journal would be left without an owner.
    LastOwner,
}

impl Database {
    /// Creates a journal and grants `owner_id` ownership in one transaction.
    pub fn create_journal(&self, subject_name: &str, owner_id: i64) -> Result<i64> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let journal_id = insert_journal_with_owner(&tx, subject_name, owner_id)?;
            tx.commit()?;
            Ok(journal_id)
        })
    }

    /// Journals the user holds a grant on, most recently accessed first.
    pub fn list_journals_for_user(&self, user_id: i64) -> Result<Vec<JournalRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT j.id, j.subject_name, ja.role, j.created_at, ja.last_accessed_at
                 FROM journals j
                 JOIN journal_access ja ON ja.journal_id = j.id
                 WHERE ja.user_id = ?1
                 ORDER BY ja.last_accessed_at DESC, ja.id DESC",
            )?;
            let rows = stmt
                .query_map([user_id], |row| {
                    Ok(JournalRow {
                        id: row.get(0)?,
                        subject_name: row.get(1)?,
                        role: parse_column(row, 2)?,
                        created_at: row.get(3)?,
                        last_accessed_at: row.get(4)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// The journal a fresh session should target.
    pub fn most_recent_journal(&self, user_id: i64) -> Result<Option<i64>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT journal_id FROM journal_access
                 WHERE user_id = ?1
                 ORDER BY last_accessed_at DESC, id DESC
                 LIMIT 1",
                [user_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    pub fn get_access_role(&self, journal_id: i64, user_id: i64) -> Result<Option<JournalRole>> {
        self.with_conn(|conn| query_role(conn, journal_id, user_id))
    }

    /// Marks the journal as just accessed by the user.
    pub fn touch_journal(&self, journal_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE journal_access SET last_accessed_at = ?1 WHERE journal_id = ?2 AND user_id = ?3",
                rusqlite::params![now_timestamp(), journal_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    pub fn get_theme_config(&self, journal_id: i64, user_id: i64) -> Result<Option<String>> {
        self.with_conn(|conn| {
            let config: Option<Option<String>> = conn
                .query_row(
                    "SELECT theme_config FROM journal_access WHERE journal_id = ?1 AND user_id = ?2",
                    [journal_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(config.flatten())
        })
    }

    pub fn save_theme_config(&self, journal_id: i64, user_id: i64, config: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE journal_access SET theme_config = ?1 WHERE journal_id = ?2 AND user_id = ?3",
                rusqlite::params![config, journal_id, user_id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes a journal; grants and events go with it through the cascades.
    /// Sessions of every member that had it active are left without one.
    pub fn delete_journal(&self, journal_id: i64) -> Result<bool> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let changed = tx.execute("DELETE FROM journals WHERE id = ?1", [journal_id])?;
            if changed > 0 {
                clear_active_journal(&tx, journal_id, None)?;
            }
            tx.commit()?;
            if changed > 0 {
                info!("Deleted journal {}", journal_id);
            }
            Ok(changed > 0)
        })
    }

    pub fn list_members(&self, journal_id: i64) -> Result<Vec<MemberRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.name, u.email, ja.role
                 FROM journal_access ja
                 JOIN users u ON u.id = ja.user_id
                 WHERE ja.journal_id = ?1
                 ORDER BY ja.id",
            )?;
            let rows = stmt
                .query_map([journal_id], |row| {
                    Ok(MemberRow {
                        user_id: row.get(0)?,
                        name: row.get(1)?,
                        email: row.get(2)?,
                        role: parse_column(row, 3)?,
                    })
                })?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn grant_access(&self, journal_id: i64, user_id: i64, role: JournalRole) -> Result<GrantOutcome> {
        self.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO journal_access (journal_id, user_id, role, last_accessed_at)
                 VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![journal_id, user_id, role.as_str(), now_timestamp()],
            );
            match inserted {
                Ok(_) => Ok(GrantOutcome::Granted),
                Err(e) if is_unique_violation(&e) => Ok(GrantOutcome::AlreadyMember),
                Err(e) => Err(e.into()),
            }
        })
    }

    /// Changes a member's role, refusing to demote the journal's last owner.
    pub fn change_access_role(&self, journal_id: i64, user_id: i64, role: JournalRole) -> Result<AccessChange> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(current) = query_role(&tx, journal_id, user_id)? else {
                return Ok(AccessChange::NotMember);
            };
            if current == JournalRole::Owner && role != JournalRole::Owner && owner_count(&tx, journal_id)? <= 1 {
                return Ok(AccessChange::LastOwner);
            }
            tx.execute(
                "UPDATE journal_access SET role = ?1 WHERE journal_id = ?2 AND user_id = ?3",
                rusqlite::params![role.as_str(), journal_id, user_id],
            )?;
            tx.commit()?;
            Ok(AccessChange::Applied)
        })
    }

    /// Removes a member's grant, refusing to remove the journal's last owner.
    pub fn revoke_access(&self, journal_id: i64, user_id: i64) -> Result<AccessChange> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let Some(current) = query_role(&tx, journal_id, user_id)? else {
                return Ok(AccessChange::NotMember);
            };
            if current == JournalRole::Owner && owner_count(&tx, journal_id)? <= 1 {
                return Ok(AccessChange::LastOwner);
            }
            tx.execute(
                "DELETE FROM journal_access WHERE journal_id = ?1 AND user_id = ?2",
                [journal_id, user_id],
            )?;
            clear_active_journal(&tx, journal_id, Some(user_id))?;
            tx.commit()?;
            Ok(AccessChange::Applied)
        })
    }
}

pub(crate) fn insert_journal_with_owner(conn: &Connection, subject_name: &str, owner_id: i64) -> Result<i64> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO journals (subject_name, created_at) VALUES (?1, ?2)",
        rusqlite::params![subject_name, now],
    )?;
    let journal_id = conn.last_insert_rowid();
    conn.execute(
        "INSERT INTO journal_access (journal_id, user_id, role, last_accessed_at) VALUES (?1, ?2, 'owner', ?3)",
        rusqlite::params![journal_id, owner_id, now],
    )?;
    Ok(journal_id)
}

fn query_role(conn: &Connection, journal_id: i64, user_id: i64) -> Result<Option<JournalRole>> {
    conn.query_row(
        "SELECT role FROM journal_access WHERE journal_id = ?1 AND user_id = ?2",
        [journal_id, user_id],
        |row| parse_column(row, 0),
    )
    .optional()
}

fn owner_count(conn: &Connection, journal_id: i64) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM journal_access WHERE journal_id = ?1 AND role = 'owner'",
        [journal_id],
        |row| row.get(0),
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::Registration;
    use tesoro_types::models::SiteRole;

    fn user(db: &Database, email: &str) -> (i64, i64) {
        match db.register_user("U", email, "hash", SiteRole::User, "Bebé").unwrap() {
            Registration::Created {
                user_id,
                journal_id,
            } => (user_id, journal_id),
            Registration::EmailTaken => unreachable!(),
        }
    }

    #[test]
    fn most_recent_journal_follows_last_access() {
        let db = Database::open_in_memory().unwrap();
        let (a, first) = user(&db, "a@x.com");
        let second = db.create_journal("Segundo", a).unwrap();

        assert_eq!(db.most_recent_journal(a).unwrap(), Some(second));
        assert!(db.touch_journal(first, a).unwrap());
        assert_eq!(db.most_recent_journal(a).unwrap(), Some(first));

        let listed: Vec<i64> = db.list_journals_for_user(a).unwrap().iter().map(|j| j.id).collect();
        assert_eq!(listed, vec![first, second]);
    }

    #[test]
    fn last_owner_cannot_be_demoted_or_removed() {
        let db = Database::open_in_memory().unwrap();
        let (a, journal) = user(&db, "a@x.com");
        let (b, _) = user(&db, "b@x.com");

        assert_eq!(db.change_access_role(journal, a, JournalRole::Viewer).unwrap(), AccessChange::LastOwner);
        assert_eq!(db.revoke_access(journal, a).unwrap(), AccessChange::LastOwner);

        assert_eq!(db.grant_access(journal, b, JournalRole::Owner).unwrap(), GrantOutcome::Granted);
        assert_eq!(db.grant_access(journal, b, JournalRole::Viewer).unwrap(), GrantOutcome::AlreadyMember);
        assert_eq!(db.revoke_access(journal, a).unwrap(), AccessChange::Applied);
        assert_eq!(db.get_access_role(journal, a).unwrap(), None);
        assert_eq!(db.revoke_access(journal, a).unwrap(), AccessChange::NotMember);
    }

    #[test]
    fn deleting_journal_cascades_grants() {
        let db = Database::open_in_memory().unwrap();
        let (a, journal) = user(&db, "a@x.com");
        let (b, _) = user(&db, "b@x.com");
        db.grant_access(journal, b, JournalRole::Editor).unwrap();

        assert!(db.delete_journal(journal).unwrap());
        assert_eq!(db.get_access_role(journal, a).unwrap(), None);
        assert_eq!(db.get_access_role(journal, b).unwrap(), None);
        assert!(db.list_members(journal).unwrap().is_empty());
        assert!(!db.delete_journal(journal).unwrap());
    }

    #[test]
    fn sessions_lose_a_journal_that_goes_away() {
        let db = Database::open_in_memory().unwrap();
        let (a, journal) = user(&db, "a@x.com");
        let (b, _) = user(&db, "b@x.com");
        let (c, _) = user(&db, "c@x.com");
        db.grant_access(journal, b, JournalRole::Viewer).unwrap();
        db.grant_access(journal, c, JournalRole::Editor).unwrap();
        for (hash, user_id) in [("a", a), ("b", b), ("c", c)] {
            db.save_session(&session_on(hash, user_id, journal)).unwrap();
        }

        assert_eq!(db.revoke_access(journal, b).unwrap(), AccessChange::Applied);
        assert_eq!(db.load_session("b").unwrap().unwrap().active_journal_id, None);
        assert_eq!(db.load_session("c").unwrap().unwrap().active_journal_id, Some(journal));

        assert!(db.delete_journal(journal).unwrap());
        assert_eq!(db.load_session("a").unwrap().unwrap().active_journal_id, None);
        assert_eq!(db.load_session("c").unwrap().unwrap().active_journal_id, None);
    }

    #[test]
    fn grant_on_missing_journal_is_an_error_not_a_duplicate() {
        let db = Database::open_in_memory().unwrap();
        let (_, journal) = user(&db, "a@x.com");
        let (b, _) = user(&db, "b@x.com");

        assert!(db.grant_access(journal + 100, b, JournalRole::Viewer).is_err());
        assert!(db.grant_access(journal, b + 100, JournalRole::Viewer).is_err());
    }

    fn session_on(hash: &str, user_id: i64, journal_id: i64) -> crate::models::SessionRow {
        crate::models::SessionRow {
            token_hash: hash.to_string(),
            user_id,
            name: "U".to_string(),
            role: SiteRole::User,
            active_journal_id: Some(journal_id),
            created_at: 0,
            expires_at: i64::MAX,
        }
    }

    #[test]
    fn theme_config_is_per_member() {
        let db = Database::open_in_memory().unwrap();
        let (a, journal) = user(&db, "a@x.com");
        let (b, _) = user(&db, "b@x.com");
        db.grant_access(journal, b, JournalRole::Viewer).unwrap();

        assert!(db.save_theme_config(journal, a, r#"{"color":"pink"}"#).unwrap());
        assert_eq!(db.get_theme_config(journal, a).unwrap().as_deref(), Some(r#"{"color":"pink"}"#));
        assert_eq!(db.get_theme_config(journal, b).unwrap(), None);
    }
}
