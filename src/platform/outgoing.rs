use std::path::PathBuf;

/// Destination of an outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receiver {
    /// Counterpart identity (user id). Sessions are keyed by it.
    pub id: String,
    /// Chat to post into when it differs from the user id (groups)
    pub chat_id: Option<String>,
}

impl Receiver {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            chat_id: None,
        }
    }

    pub fn in_chat(mut self, chat_id: impl Into<String>) -> Self {
        self.chat_id = Some(chat_id.into());
        self
    }

    pub fn chat_id(&self) -> &str {
        self.chat_id.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub title: String,
    pub key: Option<String>,
}

impl Button {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            key: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Callback payload; falls back to the title when no key was given
    pub fn key(&self) -> &str {
        match self.key.as_deref() {
            Some(key) if !key.is_empty() => key,
            _ => &self.title,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonLayout {
    /// Buttons attached to the message, pressing one sends the key back
    Inline,
    /// One-shot reply keyboard, pressing one sends the title as text
    Reply,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonCollection {
    pub layout: ButtonLayout,
    pub rows: Vec<Vec<Button>>,
}

impl ButtonCollection {
    pub fn inline(rows: Vec<Vec<Button>>) -> Self {
        Self {
            layout: ButtonLayout::Inline,
            rows,
        }
    }

    pub fn reply(rows: Vec<Vec<Button>>) -> Self {
        Self {
            layout: ButtonLayout::Reply,
            rows,
        }
    }

    /// All buttons, row by row
    pub fn all_buttons(&self) -> impl Iterator<Item = &Button> {
        self.rows.iter().flatten()
    }

    pub fn is_empty(&self) -> bool {
        self.all_buttons().next().is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypingKind {
    Text,
    UploadingPhoto,
    RecordingVideo,
    UploadingVideo,
    RecordingVideoNote,
    UploadingVideoNote,
    RecordingVoice,
    UploadingVoice,
    UploadingDocument,
    FindLocation,
}

impl TypingKind {
    /// Parse a sub-kind name as used in listener code and config.
    /// Anything unrecognised is plain typing.
    pub fn parse(name: &str) -> Self {
        match name {
            "uploading_photo" => TypingKind::UploadingPhoto,
            "recording_video" => TypingKind::RecordingVideo,
            "uploading_video" => TypingKind::UploadingVideo,
            "recording_video_note" => TypingKind::RecordingVideoNote,
            "uploading_video_note" => TypingKind::UploadingVideoNote,
            "recording_voice" => TypingKind::RecordingVoice,
            "uploading_voice" => TypingKind::UploadingVoice,
            "uploading_document" => TypingKind::UploadingDocument,
            "find_location" => TypingKind::FindLocation,
            _ => TypingKind::Text,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingKind {
    Text {
        text: String,
    },
    Photo {
        path: PathBuf,
        caption: Option<String>,
    },
    Typing(TypingKind),
    Location {
        latitude: f64,
        longitude: f64,
        /// Seconds the location stays live and can be edited
        live_period: Option<u32>,
    },
}

impl OutgoingKind {
    pub fn name(&self) -> &'static str {
        match self {
            OutgoingKind::Text { .. } => "text",
            OutgoingKind::Photo { .. } => "photo",
            OutgoingKind::Typing(_) => "typing",
            OutgoingKind::Location { .. } => "location",
        }
    }
}

/// A message to send through a channel
#[derive(Debug, Clone, PartialEq)]
pub struct OutgoingMessage {
    pub receiver: Receiver,
    pub buttons: Option<ButtonCollection>,
    pub kind: OutgoingKind,
}

impl OutgoingMessage {
    pub fn text(receiver: Receiver, text: impl Into<String>) -> Self {
        Self {
            receiver,
            buttons: None,
            kind: OutgoingKind::Text { text: text.into() },
        }
    }

    pub fn photo(receiver: Receiver, path: impl Into<PathBuf>, caption: Option<String>) -> Self {
        Self {
            receiver,
            buttons: None,
            kind: OutgoingKind::Photo {
                path: path.into(),
                caption,
            },
        }
    }

    pub fn typing(receiver: Receiver, kind: TypingKind) -> Self {
        Self {
            receiver,
            buttons: None,
            kind: OutgoingKind::Typing(kind),
        }
    }

    pub fn location(
        receiver: Receiver,
        latitude: f64,
        longitude: f64,
        live_period: Option<u32>,
    ) -> Self {
        Self {
            receiver,
            buttons: None,
            kind: OutgoingKind::Location {
                latitude,
                longitude,
                live_period,
            },
        }
    }

    pub fn with_buttons(mut self, buttons: ButtonCollection) -> Self {
        self.buttons = Some(buttons);
        self
    }
}

/// Outcome of one send attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Success { message_id: String },
    Failed { reason: String },
}

impl Sent {
    pub fn message_id(&self) -> Option<&str> {
        match self {
            Sent::Success { message_id } => Some(message_id),
            Sent::Failed { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Sent::Success { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_button_key_defaults_to_title() {
        assert_eq!(Button::new("No").key(), "No");
        assert_eq!(Button::new("Yes").with_key("Y").key(), "Y");
        assert_eq!(Button::new("Maybe").with_key("").key(), "Maybe");
    }

    #[test]
    fn test_receiver_chat_id_falls_back_to_id() {
        assert_eq!(Receiver::new("5").chat_id(), "5");
        assert_eq!(Receiver::new("5").in_chat("-100").chat_id(), "-100");
    }

    #[test]
    fn test_typing_parse_unknown_is_plain_typing() {
        assert_eq!(TypingKind::parse("find_location"), TypingKind::FindLocation);
        assert_eq!(TypingKind::parse("dancing"), TypingKind::Text);
    }

    #[test]
    fn test_empty_collection() {
        assert!(ButtonCollection::reply(vec![vec![]]).is_empty());
        assert!(!ButtonCollection::inline(vec![vec![Button::new("a")]]).is_empty());
    }
}
