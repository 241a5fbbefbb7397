pub mod outgoing;
pub mod telegram;

/// A chat or conversation on the platform side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chat {
    pub id: String,
}

impl Chat {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// The user (or bot) that produced an incoming message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    /// Platform-specific user ID as string
    pub id: String,
    pub is_bot: bool,
    pub language_code: Option<String>,
    /// Chat the message was posted in. Attached after the sender is built.
    pub chat: Option<Chat>,
}

impl Sender {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_bot: false,
            language_code: None,
            chat: None,
        }
    }

    pub fn with_chat(mut self, chat: Chat) -> Self {
        self.chat = Some(chat);
        self
    }
}

/// A platform file reference. `url` is filled in once the file has been
/// resolved to a downloadable location.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    pub file_id: String,
    pub url: Option<String>,
}

/// Payload of an incoming message, one variant per kind of update
#[derive(Debug, Clone, PartialEq)]
pub enum MessageKind {
    Text {
        text: String,
    },
    File {
        file: FileRef,
    },
    Sticker {
        file: FileRef,
    },
    Video {
        file: FileRef,
    },
    Poll {
        question: String,
        options: Vec<String>,
    },
    Location {
        latitude: f64,
        longitude: f64,
    },
    Contact {
        phone_number: Option<String>,
        first_name: Option<String>,
        last_name: Option<String>,
        user_id: Option<i64>,
    },
    Unknown,
    ChatMemberStatusChange {
        user_id: String,
        status: String,
    },
    /// Service update of a shape we do not recognise. Holds the raw update,
    /// pretty-printed, for whoever has to look at it.
    UnknownService {
        payload: String,
    },
}

impl MessageKind {
    pub fn name(&self) -> &'static str {
        match self {
            MessageKind::Text { .. } => "text",
            MessageKind::File { .. } => "file",
            MessageKind::Sticker { .. } => "sticker",
            MessageKind::Video { .. } => "video",
            MessageKind::Poll { .. } => "poll",
            MessageKind::Location { .. } => "location",
            MessageKind::Contact { .. } => "contact",
            MessageKind::Unknown => "unknown",
            MessageKind::ChatMemberStatusChange { .. } => "chat_member_status",
            MessageKind::UnknownService { .. } => "unknown_service",
        }
    }

    pub fn is_service(&self) -> bool {
        matches!(
            self,
            MessageKind::ChatMemberStatusChange { .. } | MessageKind::UnknownService { .. }
        )
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut FileRef> {
        match self {
            MessageKind::File { file }
            | MessageKind::Sticker { file }
            | MessageKind::Video { file } => Some(file),
            _ => None,
        }
    }
}

/// A message received from the platform, normalized
#[derive(Debug, Clone, PartialEq)]
pub struct IncomingMessage {
    /// Platform message id. Service updates usually have none.
    pub id: Option<String>,
    pub sender: Option<Sender>,
    /// Name of the channel that produced the message
    pub channel: String,
    pub kind: MessageKind,
}

impl IncomingMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { text } => Some(text),
            _ => None,
        }
    }

    pub fn chat(&self) -> Option<&Chat> {
        self.sender.as_ref().and_then(|s| s.chat.as_ref())
    }

    /// Short human-readable rendering used when reporting ignored messages
    pub fn summary(&self) -> String {
        match &self.kind {
            MessageKind::Text { text } => text.clone(),
            MessageKind::File { file }
            | MessageKind::Sticker { file }
            | MessageKind::Video { file } => {
                file.url.clone().unwrap_or_else(|| file.file_id.clone())
            }
            MessageKind::Poll { question, .. } => question.clone(),
            MessageKind::Location {
                latitude,
                longitude,
            } => format!("{}, {}", latitude, longitude),
            MessageKind::Contact { phone_number, .. } => {
                phone_number.clone().unwrap_or_default()
            }
            MessageKind::Unknown => String::new(),
            MessageKind::ChatMemberStatusChange { user_id, status } => {
                format!("{} -> {}", user_id, status)
            }
            MessageKind::UnknownService { payload } => payload.clone(),
        }
    }
}
