use crate::journals::insert_journal_with_owner;
use crate::models::{SiteConfigRow, StatsRow, UserRow};
use crate::{Database, OptionalExt, is_unique_violation, now_timestamp, parse_column};
use anyhow::Result;
use rusqlite::{Connection, Transaction};
use tesoro_types::models::SiteRole;
use tracing::info;

/// Outcome of creating an account together with its default journal.
#[derive(Debug, PartialEq, Eq)]
pub enum Registration {
    Created { user_id: i64, journal_id: i64 },
    EmailTaken,
}

/// What deleting a user did to the journals they owned alone.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct UserDeletion {
    /// Journals left without any member, deleted with their events.
    pub deleted_journals: Vec<i64>,
    /// (journal_id, user_id) grants promoted to owner.
    pub promoted: Vec<(i64, i64)>,
}

const USER_COLUMNS: &str = "id, name, email, password, role, created_at";

impl Database {
    // -- Users --

    /// Creates the user, a journal named `subject_name` and the owner grant
    /// linking them, all in one transaction.
    pub fn register_user(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
        role: SiteRole,
        subject_name: &str,
    ) -> Result<Registration> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let user_id = match insert_user(&tx, name, email, password_hash, role) {
                Ok(id) => id,
                Err(e) if is_unique_violation(&e) => return Ok(Registration::EmailTaken),
                Err(e) => return Err(e.into()),
            };
            let journal_id = insert_journal_with_owner(&tx, subject_name, user_id)?;

            tx.commit()?;
            info!("Registered user {} with default journal {}", user_id, journal_id);
            Ok(Registration::Created {
                user_id,
                journal_id,
            })
        })
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", &email))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id"))?;
            let rows = stmt
                .query_map([], map_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    /// Returns false when no such user exists.
    pub fn set_user_role(&self, id: i64, role: SiteRole) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET role = ?1 WHERE id = ?2",
                rusqlite::params![role.as_str(), id],
            )?;
            Ok(changed > 0)
        })
    }

    /// Deletes a user. Journals where they were the only owner are handed to
    /// their longest-standing remaining member (editors first) or, with no
    /// member left, deleted. Returns `None` if the user does not exist.
    pub fn delete_user(&self, id: i64) -> Result<Option<UserDeletion>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;

            let exists = tx
                .query_row("SELECT 1 FROM users WHERE id = ?1", [id], |_| Ok(()))
                .optional()?
                .is_some();
            if !exists {
                return Ok(None);
            }

            let outcome = hand_over_owned_journals(&tx, id)?;
            tx.execute("DELETE FROM users WHERE id = ?1", [id])?;
            tx.commit()?;

            info!(
                "Deleted user {} ({} journals removed, {} grants promoted)",
                id,
                outcome.deleted_journals.len(),
                outcome.promoted.len()
            );
            Ok(Some(outcome))
        })
    }

    // -- Site config --

    pub fn get_site_config(&self) -> Result<SiteConfigRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT site_name, allow_new_registrations FROM site_config WHERE id = 1",
                [],
                |row| {
                    Ok(SiteConfigRow {
                        site_name: row.get(0)?,
                        allow_new_registrations: row.get(1)?,
                    })
                },
            )?;
            Ok(row)
        })
    }

    pub fn update_site_config(&self, site_name: &str, allow_new_registrations: bool) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE site_config SET site_name = ?1, allow_new_registrations = ?2 WHERE id = 1",
                rusqlite::params![site_name, allow_new_registrations],
            )?;
            Ok(())
        })
    }

    pub fn stats(&self) -> Result<StatsRow> {
        self.with_conn(|conn| {
            let row = conn.query_row(
                "SELECT (SELECT COUNT(*) FROM users),
                        (SELECT COUNT(*) FROM journals),
                        (SELECT COUNT(*) FROM events)",
                [],
                |row| {
                    Ok(StatsRow {
                        users: row.get(0)?,
                        journals: row.get(1)?,
                        events: row.get(2)?,
                    })
                },
            )?;
            Ok(row)
        })
    }
}

fn insert_user(
    tx: &Transaction<'_>,
    name: &str,
    email: &str,
    password_hash: &str,
    role: SiteRole,
) -> rusqlite::Result<i64> {
    tx.execute(
        "INSERT INTO users (name, email, password, role, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        rusqlite::params![name, email, password_hash, role.as_str(), now_timestamp()],
    )?;
    Ok(tx.last_insert_rowid())
}

fn hand_over_owned_journals(tx: &Transaction<'_>, user_id: i64) -> Result<UserDeletion> {
    let owned: Vec<i64> = {
        let mut stmt = tx.prepare(
            "SELECT journal_id FROM journal_access WHERE user_id = ?1 AND role = 'owner'",
        )?;
        stmt.query_map([user_id], |row| row.get(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?
    };

    let mut outcome = UserDeletion::default();
    for journal_id in owned {
        let other_owners: i64 = tx.query_row(
            "SELECT COUNT(*) FROM journal_access
             WHERE journal_id = ?1 AND role = 'owner' AND user_id != ?2",
            [journal_id, user_id],
            |row| row.get(0),
        )?;
        if other_owners > 0 {
            continue;
        }

        let successor: Option<(i64, i64)> = tx
            .query_row(
                "SELECT id, user_id FROM journal_access
                 WHERE journal_id = ?1 AND user_id != ?2
                 ORDER BY CASE role WHEN 'editor' THEN 0 ELSE 1 END, id
                 LIMIT 1",
                [journal_id, user_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match successor {
            Some((grant_id, successor_id)) => {
                tx.execute("UPDATE journal_access SET role = 'owner' WHERE id = ?1", [grant_id])?;
                outcome.promoted.push((journal_id, successor_id));
            }
            None => {
                tx.execute("DELETE FROM journals WHERE id = ?1", [journal_id])?;
                outcome.deleted_journals.push(journal_id);
            }
        }
    }

    Ok(outcome)
}

fn query_user(conn: &Connection, column: &str, value: &dyn rusqlite::ToSql) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE {column} = ?1"))?;
    let row = stmt.query_row([value], map_user).optional()?;
    Ok(row)
}

fn map_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        name: row.get(1)?,
        email: row.get(2)?,
        password: row.get(3)?,
        role: parse_column(row, 4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tesoro_types::models::JournalRole;

    fn register(db: &Database, email: &str) -> (i64, i64) {
        match db
            .register_user("Ana", email, "hash", SiteRole::User, "Lucía")
            .unwrap()
        {
            Registration::Created {
                user_id,
                journal_id,
            } => (user_id, journal_id),
            Registration::EmailTaken => panic!("email {email} unexpectedly taken"),
        }
    }

    #[test]
    fn registration_creates_owned_default_journal() {
        let db = Database::open_in_memory().unwrap();
        let (user_id, journal_id) = register(&db, "a@x.com");

        assert_eq!(db.get_access_role(journal_id, user_id).unwrap(), Some(JournalRole::Owner));
        let journals = db.list_journals_for_user(user_id).unwrap();
        assert_eq!(journals.len(), 1);
        assert_eq!(journals[0].subject_name, "Lucía");
    }

    #[test]
    fn duplicate_email_is_reported_and_rolled_back() {
        let db = Database::open_in_memory().unwrap();
        register(&db, "a@x.com");

        let again = db
            .register_user("Otra", "a@x.com", "hash", SiteRole::User, "X")
            .unwrap();
        assert_eq!(again, Registration::EmailTaken);
        assert_eq!(db.stats().unwrap().journals, 1);
    }

    #[test]
    fn deleting_sole_owner_promotes_editor_before_viewer() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = register(&db, "owner@x.com");
        let (viewer, _) = register(&db, "viewer@x.com");
        let (editor, _) = register(&db, "editor@x.com");
        db.grant_access(journal, viewer, JournalRole::Viewer).unwrap();
        db.grant_access(journal, editor, JournalRole::Editor).unwrap();

        let outcome = db.delete_user(owner).unwrap().unwrap();
        assert_eq!(outcome.promoted, vec![(journal, editor)]);
        assert!(outcome.deleted_journals.is_empty());
        assert_eq!(db.get_access_role(journal, editor).unwrap(), Some(JournalRole::Owner));
        assert_eq!(db.get_access_role(journal, viewer).unwrap(), Some(JournalRole::Viewer));
    }

    #[test]
    fn deleting_sole_member_removes_the_journal() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = register(&db, "owner@x.com");

        let outcome = db.delete_user(owner).unwrap().unwrap();
        assert_eq!(outcome.deleted_journals, vec![journal]);
        assert_eq!(db.stats().unwrap().journals, 0);
        assert!(db.delete_user(owner).unwrap().is_none());
    }

    #[test]
    fn site_config_round_trip() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.get_site_config().unwrap().allow_new_registrations);

        db.update_site_config("Casa", false).unwrap();
        let config = db.get_site_config().unwrap();
        assert_eq!(config.site_name, "Casa");
        assert!(!config.allow_new_registrations);
    }
}
