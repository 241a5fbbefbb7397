use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::ChannelError;
use crate::platform::outgoing::{OutgoingMessage, Receiver, Sent, TypingKind};
use crate::platform::telegram::TelegramChannel;
use crate::platform::IncomingMessage;

#[derive(Debug, thiserror::Error)]
pub enum ListenerError {
    /// The listener is not interested in this message
    #[error("message not handled")]
    NotHandled,

    #[error(transparent)]
    Failed(#[from] anyhow::Error),
}

/// Receives normalized incoming messages, one at a time
#[async_trait]
pub trait Listener: Send + Sync {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ListenerError>;
}

/// The set of listeners a channel dispatches into
#[derive(Clone, Default)]
pub struct Listeners {
    inner: Vec<Arc<dyn Listener>>,
}

impl Listeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn Listener>) {
        self.inner.push(listener);
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Hand the message to every listener.
    /// Fails with `NotHandled` when no listener took it.
    pub async fn dispatch(&self, message: &IncomingMessage) -> Result<(), ChannelError> {
        let mut handled = false;

        for listener in &self.inner {
            match listener.handle(message).await {
                Ok(()) => handled = true,
                Err(ListenerError::NotHandled) => {}
                Err(ListenerError::Failed(e)) => return Err(ChannelError::Listener(e)),
            }
        }

        if handled {
            Ok(())
        } else {
            Err(ChannelError::NotHandled {
                kind: message.kind.name(),
                payload: message.summary(),
            })
        }
    }
}

/// Logs every message it sees and claims it
pub struct LoggingListener;

#[async_trait]
impl Listener for LoggingListener {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ListenerError> {
        let sender = message.sender.as_ref().map(|s| s.id.as_str()).unwrap_or("-");
        info!(
            "[{}] {} message {} from {}: {}",
            message.channel,
            message.kind.name(),
            message.id.as_deref().unwrap_or("-"),
            sender,
            message.summary()
        );
        Ok(())
    }
}

/// Answers text messages with the same text
pub struct EchoListener {
    channel: Arc<TelegramChannel>,
}

impl EchoListener {
    pub fn new(channel: Arc<TelegramChannel>) -> Self {
        Self { channel }
    }
}

#[async_trait]
impl Listener for EchoListener {
    async fn handle(&self, message: &IncomingMessage) -> Result<(), ListenerError> {
        let (Some(text), Some(sender)) = (message.text(), message.sender.as_ref()) else {
            return Err(ListenerError::NotHandled);
        };

        let mut receiver = Receiver::new(sender.id.clone());
        if let Some(chat) = &sender.chat {
            receiver = receiver.in_chat(chat.id.clone());
        }

        match self
            .channel
            .send(&OutgoingMessage::typing(receiver.clone(), TypingKind::Text))
            .await
        {
            Ok(Sent::Success { .. }) => {}
            Ok(Sent::Failed { reason }) => debug!("Typing action to {} failed: {}", sender.id, reason),
            Err(e) => warn!("Typing action to {} failed: {}", sender.id, e),
        }

        let sent = self
            .channel
            .send(&OutgoingMessage::text(receiver, text))
            .await
            .map_err(anyhow::Error::from)?;

        if !sent.is_success() {
            warn!("Echo to {} was not delivered: {:?}", sender.id, sent);
        }
        Ok(())
    }
}
