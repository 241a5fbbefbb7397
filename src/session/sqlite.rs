use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{Map, Value};
use tokio::sync::Mutex;
use tracing::info;

use super::{Session, SessionRepository};

/// Sessions persisted in SQLite, one row per (channel, identity)
#[derive(Clone)]
pub struct SqliteSessionRepository {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteSessionRepository {
    /// Open or create the session database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open session database: {}", path.display()))?;

        // journal_mode PRAGMA always returns the resulting mode
        let _: String = conn.query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))?;

        Self::run_migrations(&conn)?;

        info!("Session store initialized at: {}", path.display());
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::run_migrations(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS sessions (
                channel TEXT NOT NULL,
                identity TEXT NOT NULL,
                data TEXT NOT NULL DEFAULT '{}',
                updated_at TEXT NOT NULL DEFAULT (datetime('now')),
                PRIMARY KEY (channel, identity)
            );
            ",
        )
        .context("Failed to create sessions table")?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn load(&self, channel: &str, identity: &str) -> Result<Session> {
        let conn = self.conn.lock().await;

        let raw: Option<String> = conn
            .query_row(
                "SELECT data FROM sessions WHERE channel = ?1 AND identity = ?2",
                rusqlite::params![channel, identity],
                |row| row.get(0),
            )
            .optional()
            .context("Failed to load session")?;

        let data = match raw {
            Some(json) => serde_json::from_str::<Map<String, Value>>(&json).with_context(|| {
                format!("Corrupt session data for {}/{}", channel, identity)
            })?,
            None => Map::new(),
        };

        Ok(Session::with_data(channel, identity, data))
    }

    async fn store(&self, session: &Session) -> Result<()> {
        let json = serde_json::to_string(session.data())?;
        let conn = self.conn.lock().await;

        conn.execute(
            "INSERT INTO sessions (channel, identity, data) VALUES (?1, ?2, ?3)
             ON CONFLICT(channel, identity)
             DO UPDATE SET data = excluded.data, updated_at = datetime('now')",
            rusqlite::params![&session.channel, &session.identity, json],
        )
        .context("Failed to store session")?;

        Ok(())
    }
}
