use crate::models::SessionRow;
use crate::{Database, OptionalExt, parse_column};
use anyhow::Result;
use rusqlite::Connection;

impl Database {
    /// Inserts or replaces the session stored under `row.token_hash`.
    pub fn save_session(&self, row: &SessionRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions
                    (token_hash, user_id, name, role, active_journal_id, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    row.token_hash,
                    row.user_id,
                    row.name,
                    row.role.as_str(),
                    row.active_journal_id,
                    row.created_at,
                    row.expires_at,
                ],
            )?;
            Ok(())
        })
    }

    pub fn load_session(&self, token_hash: &str) -> Result<Option<SessionRow>> {
        self.with_conn(|conn| {
            conn.query_row(
                "SELECT token_hash, user_id, name, role, active_journal_id, created_at, expires_at
                 FROM sessions WHERE token_hash = ?1",
                [token_hash],
                |row| {
                    Ok(SessionRow {
                        token_hash: row.get(0)?,
                        user_id: row.get(1)?,
                        name: row.get(2)?,
                        role: parse_column(row, 3)?,
                        active_journal_id: row.get(4)?,
                        created_at: row.get(5)?,
                        expires_at: row.get(6)?,
                    })
                },
            )
            .optional()
        })
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM sessions WHERE token_hash = ?1", [token_hash])?;
            Ok(())
        })
    }

    pub fn delete_sessions_for_user(&self, user_id: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE user_id = ?1", [user_id])?))
    }

    /// Removes every session whose `expires_at` is at or before `now`.
    pub fn delete_expired_sessions(&self, now: i64) -> Result<usize> {
        self.with_conn(|conn| Ok(conn.execute("DELETE FROM sessions WHERE expires_at <= ?1", [now])?))
    }
}

/// Unsets `journal_id` as the active journal of live sessions, all of them or
/// only those of `user_id`.
pub(crate) fn clear_active_journal(conn: &Connection, journal_id: i64, user_id: Option<i64>) -> Result<usize> {
    let cleared = match user_id {
        Some(user_id) => conn.execute(
            "UPDATE sessions SET active_journal_id = NULL WHERE active_journal_id = ?1 AND user_id = ?2",
            [journal_id, user_id],
        )?,
        None => conn.execute(
            "UPDATE sessions SET active_journal_id = NULL WHERE active_journal_id = ?1",
            [journal_id],
        )?,
    };
    Ok(cleared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::Registration;
    use tesoro_types::models::SiteRole;

    fn session(user_id: i64, hash: &str, expires_at: i64) -> SessionRow {
        SessionRow {
            token_hash: hash.to_string(),
            user_id,
            name: "Ana".to_string(),
            role: SiteRole::User,
            active_journal_id: None,
            created_at: 0,
            expires_at,
        }
    }

    #[test]
    fn sessions_are_replaced_purged_and_cascade() {
        let db = Database::open_in_memory().unwrap();
        let Registration::Created { user_id, journal_id } =
            db.register_user("Ana", "a@x.com", "hash", SiteRole::User, "Bebé").unwrap()
        else {
            panic!("registration failed");
        };

        db.save_session(&session(user_id, "old", 100)).unwrap();
        let mut fresh = session(user_id, "fresh", 1_000);
        db.save_session(&fresh).unwrap();

        fresh.active_journal_id = Some(journal_id);
        db.save_session(&fresh).unwrap();
        assert_eq!(db.load_session("fresh").unwrap(), Some(fresh));

        assert_eq!(db.delete_expired_sessions(100).unwrap(), 1);
        assert!(db.load_session("old").unwrap().is_none());

        db.delete_user(user_id).unwrap();
        assert!(db.load_session("fresh").unwrap().is_none());
    }
}
