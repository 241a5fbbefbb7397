//! Reply keyboards send back the visible label, not the key. The label to key
//! table is written into the counterpart's session when buttons go out and
//! read back when a text reply comes in.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use serde_json::Value;
use tracing::debug;

use super::SessionRepository;
use crate::platform::outgoing::ButtonCollection;

/// Session key holding the label to key table
pub const BUTTONS_MAP_KEY: &str = "_buttons_map";

/// Label to key table for every button of the collection.
/// Later buttons win when two share a label.
pub fn button_map(buttons: &ButtonCollection) -> BTreeMap<String, String> {
    buttons
        .all_buttons()
        .map(|button| (button.title.clone(), button.key().to_string()))
        .collect()
}

/// Session-backed remapping of button labels, shared by the send and receive paths
#[derive(Clone)]
pub struct ButtonMemory {
    sessions: Arc<dyn SessionRepository>,
}

impl ButtonMemory {
    pub fn new(sessions: Arc<dyn SessionRepository>) -> Self {
        Self { sessions }
    }

    /// Persist the table for `identity`. Must complete before the message is sent.
    /// Rewrites the whole session, so it must not race another writer for the
    /// same counterpart.
    pub async fn remember(
        &self,
        channel: &str,
        identity: &str,
        buttons: &ButtonCollection,
    ) -> Result<()> {
        let map = button_map(buttons);
        debug!(
            "Remembering {} button(s) for {}/{}",
            map.len(),
            channel,
            identity
        );

        let mut session = self.sessions.load(channel, identity).await?;
        session.set(BUTTONS_MAP_KEY, serde_json::to_value(map)?);
        self.sessions.store(&session).await
    }

    /// Key stored for `text`, if `text` is the label of a remembered button
    pub async fn resolve(&self, channel: &str, identity: &str, text: &str) -> Result<Option<String>> {
        let session = self.sessions.load(channel, identity).await?;

        let key = session
            .get(BUTTONS_MAP_KEY)
            .and_then(|map| map.get(text))
            .and_then(Value::as_str)
            .filter(|key| !key.is_empty())
            .map(str::to_string);

        Ok(key)
    }
}
