use std::fmt;
use std::path::PathBuf;

use reqwest::StatusCode;

/// What went wrong on a failed polling request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollFailure {
    /// The API answered with a non-success status
    Status(StatusCode),
    /// No response at all (connection refused, reset, ...)
    Transport(String),
}

impl fmt::Display for PollFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollFailure::Status(status) => write!(f, "{}", status.as_u16()),
            PollFailure::Transport(reason) => write!(f, "transport error ({})", reason),
        }
    }
}

/// Errors produced by the channel adapter
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("No api_token configured for {channel} channel")]
    MissingToken { channel: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Failed to decode Telegram response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to open attachment {}: {source}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Terminated due to too many failures with status: {last}")]
    TooManyFailures { failures: u32, last: PollFailure },

    #[error("Telegram API error: {0}")]
    Api(String),

    #[error("Cannot edit a {0} message")]
    UnsupportedEdit(&'static str),

    #[error("Cannot edit a message that was never sent: {0}")]
    NoPriorMessage(String),

    #[error("Session store error: {0:#}")]
    Session(anyhow::Error),

    #[error("Incoming {kind} message not handled: {payload}")]
    NotHandled { kind: &'static str, payload: String },

    #[error("Listener failed: {0:#}")]
    Listener(anyhow::Error),
}

impl ChannelError {
    /// Whether the error is the listener set declining a message
    pub fn is_not_handled(&self) -> bool {
        matches!(self, ChannelError::NotHandled { .. })
    }
}
