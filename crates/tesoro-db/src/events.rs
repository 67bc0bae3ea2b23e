use crate::models::{EventRow, NewEvent};
use crate::{Database, OptionalExt, now_timestamp, parse_column};
use anyhow::Result;
use rusqlite::Connection;

/// Optional narrowing for event listings.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventFilter {
    pub favorites_only: bool,
    pub with_media_only: bool,
}

const EVENT_SELECT: &str = "SELECT e.id, e.journal_id, e.kind, e.description, e.date, e.media_path,
                                   e.is_favorite, e.author_id, u.name, e.created_at
                            FROM events e
                            LEFT JOIN users u ON e.author_id = u.id";

impl Database {
    pub fn insert_event(&self, event: &NewEvent<'_>) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO events (journal_id, kind, description, date, media_path, author_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    event.journal_id,
                    event.kind.as_str(),
                    event.description,
                    event.date,
                    event.media_path,
                    event.author_id,
                    now_timestamp(),
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Events of a journal, newest date first.
    pub fn list_events(&self, journal_id: i64, filter: EventFilter) -> Result<Vec<EventRow>> {
        self.with_conn(|conn| query_events(conn, journal_id, filter))
    }

    /// Looks an event up within its journal; ids from other journals miss.
    pub fn get_event(&self, journal_id: i64, event_id: i64) -> Result<Option<EventRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{EVENT_SELECT} WHERE e.id = ?1 AND e.journal_id = ?2"))?;
            stmt.query_row([event_id, journal_id], map_event).optional()
        })
    }

    /// Deletes the event row and hands back its media path so the caller can
    /// clean up the file. `None` when no such event exists in the journal.
    pub fn delete_event(&self, journal_id: i64, event_id: i64) -> Result<Option<Option<String>>> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let media_path: Option<Option<String>> = tx
                .query_row(
                    "SELECT media_path FROM events WHERE id = ?1 AND journal_id = ?2",
                    [event_id, journal_id],
                    |row| row.get(0),
                )
                .optional()?;
            if media_path.is_some() {
                tx.execute("DELETE FROM events WHERE id = ?1", [event_id])?;
            }
            tx.commit()?;
            Ok(media_path)
        })
    }

    pub fn set_favorite(&self, journal_id: i64, event_id: i64, is_favorite: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE events SET is_favorite = ?1 WHERE id = ?2 AND journal_id = ?3",
                rusqlite::params![is_favorite, event_id, journal_id],
            )?;
            Ok(changed > 0)
        })
    }
}

fn query_events(conn: &Connection, journal_id: i64, filter: EventFilter) -> Result<Vec<EventRow>> {
    let mut sql = format!("{EVENT_SELECT} WHERE e.journal_id = ?1");
    if filter.favorites_only {
        sql.push_str(" AND e.is_favorite = 1");
    }
    if filter.with_media_only {
        sql.push_str(" AND e.media_path IS NOT NULL");
    }
    sql.push_str(" ORDER BY e.date DESC, e.created_at DESC");

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([journal_id], map_event)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn map_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<EventRow> {
    Ok(EventRow {
        id: row.get(0)?,
        journal_id: row.get(1)?,
        kind: parse_column(row, 2)?,
        description: row.get(3)?,
        date: row.get(4)?,
        media_path: row.get(5)?,
        is_favorite: row.get(6)?,
        author_id: row.get(7)?,
        author_name: row.get(8)?,
        created_at: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::Registration;
    use tesoro_types::models::{EventKind, JournalRole, SiteRole};

    fn user(db: &Database, email: &str) -> (i64, i64) {
        match db.register_user("U", email, "hash", SiteRole::User, "Bebé").unwrap() {
            Registration::Created {
                user_id,
                journal_id,
            } => (user_id, journal_id),
            Registration::EmailTaken => unreachable!(),
        }
    }

    fn event<'a>(journal_id: i64, author_id: i64, date: &'a str, media: Option<&'a str>) -> NewEvent<'a> {
        NewEvent {
            journal_id,
            kind: EventKind::Photo,
            description: "primer paseo",
            date,
            media_path: media,
            author_id,
        }
    }

    #[test]
    fn events_survive_author_deletion_without_author() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = user(&db, "owner@x.com");
        let (editor, _) = user(&db, "editor@x.com");
        db.grant_access(journal, editor, JournalRole::Editor).unwrap();

        let id = db.insert_event(&event(journal, editor, "2024-03-01", None)).unwrap();
        db.delete_user(editor).unwrap().unwrap();

        let row = db.get_event(journal, id).unwrap().unwrap();
        assert_eq!(row.author_id, None);
        assert_eq!(row.author_name, None);
        assert_eq!(db.list_events(journal, EventFilter::default()).unwrap().len(), 1);
        assert_eq!(db.get_access_role(journal, owner).unwrap(), Some(JournalRole::Owner));
    }

    #[test]
    fn deleting_journal_removes_its_events() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = user(&db, "owner@x.com");
        let id = db.insert_event(&event(journal, owner, "2024-03-01", None)).unwrap();

        db.delete_journal(journal).unwrap();
        assert!(db.get_event(journal, id).unwrap().is_none());
        assert!(db.list_events(journal, EventFilter::default()).unwrap().is_empty());
        assert_eq!(db.stats().unwrap().events, 0);
    }

    #[test]
    fn listing_orders_and_filters() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = user(&db, "owner@x.com");
        let older = db.insert_event(&event(journal, owner, "2024-01-01", Some("1/a.jpg"))).unwrap();
        let newer = db.insert_event(&event(journal, owner, "2024-06-01", None)).unwrap();
        assert!(db.set_favorite(journal, newer, true).unwrap());

        let all: Vec<i64> = db
            .list_events(journal, EventFilter::default())
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(all, vec![newer, older]);

        let favorites = db
            .list_events(journal, EventFilter { favorites_only: true, ..Default::default() })
            .unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, newer);

        let media = db
            .list_events(journal, EventFilter { with_media_only: true, ..Default::default() })
            .unwrap();
        assert_eq!(media.len(), 1);
        assert_eq!(media[0].media_path.as_deref(), Some("1/a.jpg"));
    }

    #[test]
    fn delete_event_is_scoped_to_journal() {
        let db = Database::open_in_memory().unwrap();
        let (owner, journal) = user(&db, "owner@x.com");
        let other = db.create_journal("Otro", owner).unwrap();
        let id = db.insert_event(&event(journal, owner, "2024-01-01", Some("1/a.jpg"))).unwrap();

        assert_eq!(db.delete_event(other, id).unwrap(), None);
        assert_eq!(db.delete_event(journal, id).unwrap(), Some(Some("1/a.jpg".to_string())));
        assert_eq!(db.delete_event(journal, id).unwrap(), None);
    }
}
