use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{redact, TelegramChannel};
use crate::error::{ChannelError, PollFailure};
use crate::listener::Listeners;

/// Hooks the long-polling loop reports to
pub trait PollObserver: Send {
    /// Every `getUpdates` response, before its body is interpreted
    fn on_response(&mut self, _status: StatusCode, _size: usize) {}

    /// Batch decoding and listener errors. Returning an error stops the loop
    /// with that error; the default logs and carries on.
    fn on_error(&mut self, error: ChannelError) -> Result<(), ChannelError> {
        warn!("Polling error: {}", error);
        Ok(())
    }
}

/// Writes one status line per polling response
pub struct StatusLog;

impl PollObserver for StatusLog {
    fn on_response(&mut self, status: StatusCode, size: usize) {
        if status.is_success() {
            info!("Received response with status code {} ({} bytes)", status.as_u16(), size);
        } else {
            warn!("Received response with status code {}", status.as_u16());
        }
    }

    fn on_error(&mut self, error: ChannelError) -> Result<(), ChannelError> {
        if let ChannelError::NotHandled { kind, payload } = &error {
            warn!("Incoming message ignored - {}\n{}", kind, payload);
        } else {
            warn!("Polling error: {}", error);
        }
        Ok(())
    }
}

/// Cursor and failure counter of one polling loop
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PollState {
    latest_update_id: i64,
    consecutive_failures: u32,
}

impl PollState {
    pub fn latest_update_id(&self) -> i64 {
        self.latest_update_id
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Offset for the next `getUpdates` call
    pub fn next_offset(&self) -> i64 {
        self.latest_update_id + 1
    }

    /// Move the cursor to the highest id seen. Never moves it back.
    pub fn advance(&mut self, update_ids: impl IntoIterator<Item = i64>) {
        for id in update_ids {
            if id > self.latest_update_id {
                self.latest_update_id = id;
            }
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
    }

    /// Count a failed poll; errors once `ceiling` consecutive failures are reached
    pub fn record_failure(&mut self, failure: PollFailure, ceiling: u32) -> Result<(), ChannelError> {
        self.consecutive_failures += 1;

        if self.consecutive_failures >= ceiling {
            let failures = self.consecutive_failures;
            self.consecutive_failures = 0;
            return Err(ChannelError::TooManyFailures {
                failures,
                last: failure,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct UpdateBatch {
    ok: bool,
    #[serde(default)]
    result: Vec<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Continuous `getUpdates` loop for one channel
pub struct LongPoller {
    channel: Arc<TelegramChannel>,
    state: PollState,
}

impl LongPoller {
    pub fn new(channel: Arc<TelegramChannel>) -> Self {
        Self {
            channel,
            state: PollState::default(),
        }
    }

    pub fn state(&self) -> &PollState {
        &self.state
    }

    /// Poll until `cancel` fires (`Ok`) or the failure ceiling is reached
    /// (`TooManyFailures`). Configuration errors end the loop immediately.
    pub async fn run<O: PollObserver>(
        &mut self,
        listeners: &Listeners,
        observer: &mut O,
        cancel: &CancellationToken,
    ) -> Result<(), ChannelError> {
        let config = self.channel.config();
        let ceiling = config.max_failures.max(1);
        let retry_delay = Duration::from_millis(config.retry_delay_ms);
        let name = self.channel.name().to_string();

        info!("[{}] Long polling started", name);

        loop {
            if cancel.is_cancelled() {
                info!("[{}] Long polling stopped", name);
                return Ok(());
            }

            let offset = self.state.next_offset();
            let fetched = tokio::select! {
                _ = cancel.cancelled() => continue,
                fetched = self.fetch(offset) => fetched,
            };

            let failure = match fetched {
                Ok((status, body)) => {
                    observer.on_response(status, body.len());

                    if status.is_success() {
                        // A 2xx resets the counter whatever the body turns out to be
                        self.state.record_success();
                        if let Err(e) = self.process_batch(&body, listeners, observer).await {
                            observer.on_error(e)?;
                        }
                        continue;
                    }
                    PollFailure::Status(status)
                }
                Err(ChannelError::Http(e)) => {
                    warn!("[{}] getUpdates failed: {}", name, e);
                    PollFailure::Transport(e.to_string())
                }
                Err(e) => return Err(e),
            };

            self.state.record_failure(failure, ceiling)?;
            debug!(
                "[{}] Backing off after failure {}/{}",
                name,
                self.state.consecutive_failures(),
                ceiling
            );

            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(retry_delay) => {}
            }
        }
    }

    async fn fetch(&self, offset: i64) -> Result<(StatusCode, String), ChannelError> {
        let response = self.channel.fetch_updates(offset).await?;
        let status = response.status();
        let body = response.text().await.map_err(redact)?;
        Ok((status, body))
    }

    async fn process_batch<O: PollObserver>(
        &mut self,
        body: &str,
        listeners: &Listeners,
        observer: &mut O,
    ) -> Result<(), ChannelError> {
        let batch: UpdateBatch = serde_json::from_str(body)?;

        if !batch.ok {
            warn!(
                "[{}] getUpdates not ok: {}",
                self.channel.name(),
                batch.description.unwrap_or_default()
            );
            return Ok(());
        }

        // The whole batch moves the cursor before anything is dispatched
        self.state.advance(
            batch
                .result
                .iter()
                .filter_map(|update| update.get("update_id").and_then(Value::as_i64)),
        );

        for update in &batch.result {
            let message = self.channel.make_message(update).await;
            if let Err(e) = listeners.dispatch(&message).await {
                observer.on_error(e)?;
            }
        }

        Ok(())
    }
}
