use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub const DEFAULT_SITE_NAME: &str = "Mi Pequeño Tesoro";

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 =
        conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE site_config (
                id                      INTEGER PRIMARY KEY CHECK (id = 1),
                site_name               TEXT NOT NULL,
                allow_new_registrations INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE users (
                id          INTEGER PRIMARY KEY,
                name        TEXT NOT NULL,
                email       TEXT NOT NULL UNIQUE,
                password    TEXT NOT NULL,
                role        TEXT NOT NULL DEFAULT 'user' CHECK (role IN ('admin', 'user')),
                created_at  TEXT NOT NULL
            );

            CREATE TABLE journals (
                id            INTEGER PRIMARY KEY,
                subject_name  TEXT NOT NULL,
                created_at    TEXT NOT NULL
            );

            CREATE TABLE journal_access (
                id                INTEGER PRIMARY KEY,
                journal_id        INTEGER NOT NULL REFERENCES journals(id) ON DELETE CASCADE,
                user_id           INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                role              TEXT NOT NULL DEFAULT 'viewer'
                                  CHECK (role IN ('owner', 'editor', 'viewer')),
                theme_config      TEXT,
                last_accessed_at  TEXT NOT NULL,
                UNIQUE(journal_id, user_id)
            );

            CREATE INDEX idx_journal_access_user ON journal_access(user_id, last_accessed_at);

            CREATE TABLE events (
                id           INTEGER PRIMARY KEY,
                journal_id   INTEGER NOT NULL REFERENCES journals(id) ON DELETE CASCADE,
                kind         TEXT NOT NULL,
                description  TEXT NOT NULL DEFAULT '',
                date         TEXT NOT NULL,
                media_path   TEXT,
                is_favorite  INTEGER NOT NULL DEFAULT 0,
                author_id    INTEGER REFERENCES users(id) ON DELETE SET NULL,
                created_at   TEXT NOT NULL
            );

            CREATE INDEX idx_events_journal ON events(journal_id, date);

            CREATE TABLE sessions (
                token_hash         TEXT PRIMARY KEY,
                user_id            INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name               TEXT NOT NULL,
                role               TEXT NOT NULL,
                active_journal_id  INTEGER,
                created_at         INTEGER NOT NULL,
                expires_at         INTEGER NOT NULL
            );

            CREATE INDEX idx_sessions_expiry ON sessions(expires_at);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO site_config (id, site_name, allow_new_registrations) VALUES (1, ?1, 1)",
            [DEFAULT_SITE_NAME],
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(versions, 1);

        let site_name: String = conn
            .query_row("SELECT site_name FROM site_config WHERE id = 1", [], |r| r.get(0))
            .unwrap();
        assert_eq!(site_name, DEFAULT_SITE_NAME);
    }
}
