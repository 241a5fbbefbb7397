pub mod buttons;
pub mod sqlite;

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::Mutex;

pub use buttons::ButtonMemory;
pub use sqlite::SqliteSessionRepository;

/// Key/value state for one counterpart on one channel
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub channel: String,
    pub identity: String,
    data: Map<String, Value>,
}

impl Session {
    pub fn new(channel: impl Into<String>, identity: impl Into<String>) -> Self {
        Self::with_data(channel, identity, Map::new())
    }

    pub fn with_data(
        channel: impl Into<String>,
        identity: impl Into<String>,
        data: Map<String, Value>,
    ) -> Self {
        Self {
            channel: channel.into(),
            identity: identity.into(),
            data,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Value under `key`, or `default` when unset
    pub fn get_or(&self, key: &str, default: Value) -> Value {
        self.data.get(key).cloned().unwrap_or(default)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.data.insert(key.into(), value);
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }
}

/// Storage backend for sessions.
/// `load` never fails for an unknown counterpart, it returns an empty session.
///
/// `store` writes the whole session. Callers doing load, modify and store for
/// the same (channel, identity) must not overlap, or one write drops the other's
/// keys; the adapter relies on one update per counterpart being in flight.
#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn load(&self, channel: &str, identity: &str) -> Result<Session>;

    async fn store(&self, session: &Session) -> Result<()>;
}

/// Process-local sessions, lost on restart
#[derive(Default)]
pub struct MemorySessionRepository {
    sessions: Mutex<HashMap<(String, String), Map<String, Value>>>,
}

impl MemorySessionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionRepository for MemorySessionRepository {
    async fn load(&self, channel: &str, identity: &str) -> Result<Session> {
        let sessions = self.sessions.lock().await;
        let data = sessions
            .get(&(channel.to_string(), identity.to_string()))
            .cloned()
            .unwrap_or_default();
        Ok(Session::with_data(channel, identity, data))
    }

    async fn store(&self, session: &Session) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        sessions.insert(
            (session.channel.clone(), session.identity.clone()),
            session.data.clone(),
        );
        Ok(())
    }
}
