//! Raw Bot API update -> `IncomingMessage`.
//!
//! The update is classified once by its top-level shape; a `message` update is
//! then matched against the typed extractors in a fixed order (text, document,
//! sticker, video, poll, location, contact) and the first hit wins. Nothing in
//! here fails: unexpected shapes become `Unknown` or `UnknownService`, and
//! missing fields come through empty.

use serde_json::Value;

use crate::platform::{Chat, FileRef, IncomingMessage, MessageKind, Sender};

/// Top-level shape of an update
enum UpdateShape<'a> {
    CallbackQuery(&'a Value),
    Message(&'a Value),
    ChatMember(&'a Value),
    Other,
}

fn classify(raw: &Value) -> UpdateShape<'_> {
    if let Some(callback) = non_empty(raw.get("callback_query")) {
        return UpdateShape::CallbackQuery(callback);
    }
    if let Some(message) = non_empty(raw.get("message")) {
        return UpdateShape::Message(message);
    }
    if let Some(member) =
        non_empty(raw.get("my_chat_member")).or_else(|| non_empty(raw.get("chat_member")))
    {
        return UpdateShape::ChatMember(member);
    }
    UpdateShape::Other
}

/// Whether the update is handled as a plain `message`. Callback queries win
/// over a `message` field carried alongside them.
pub fn is_plain_message(raw: &Value) -> bool {
    matches!(classify(raw), UpdateShape::Message(_))
}

/// Normalize one raw update for the given channel
pub fn normalize(raw: &Value, channel: &str) -> IncomingMessage {
    match classify(raw) {
        UpdateShape::CallbackQuery(callback) => {
            let original = callback.get("message").unwrap_or(&Value::Null);
            let kind = match callback.get("data").and_then(Value::as_str) {
                Some(data) if !data.is_empty() => MessageKind::Text {
                    text: data.to_string(),
                },
                _ => MessageKind::Unknown,
            };

            IncomingMessage {
                // The id of the message the button was attached to
                id: Some(id_string(original.get("message_id"))),
                sender: Some(sender(callback).with_chat(chat(original))),
                channel: channel.to_string(),
                kind,
            }
        }
        UpdateShape::Message(message) => IncomingMessage {
            id: Some(id_string(message.get("message_id"))),
            sender: Some(sender(message).with_chat(chat(message))),
            channel: channel.to_string(),
            kind: message_kind(message),
        },
        UpdateShape::ChatMember(member) => {
            let new_member = member.get("new_chat_member").unwrap_or(&Value::Null);
            let user_id = new_member.get("user").and_then(|user| user.get("id"));

            IncomingMessage {
                id: None,
                sender: Some(sender(member).with_chat(chat(member))),
                channel: channel.to_string(),
                kind: MessageKind::ChatMemberStatusChange {
                    user_id: id_string(user_id),
                    status: str_field(new_member, "status").unwrap_or_default(),
                },
            }
        }
        UpdateShape::Other => IncomingMessage {
            id: None,
            sender: None,
            channel: channel.to_string(),
            kind: MessageKind::UnknownService {
                payload: serde_json::to_string_pretty(raw).unwrap_or_else(|_| raw.to_string()),
            },
        },
    }
}

fn message_kind(message: &Value) -> MessageKind {
    if let Some(text) = str_field(message, "text").filter(|t| !t.is_empty()) {
        return MessageKind::Text { text };
    }
    if let Some(document) = non_empty(message.get("document")) {
        return MessageKind::File {
            file: file_ref(document),
        };
    }
    if let Some(sticker) = non_empty(message.get("sticker")) {
        return MessageKind::Sticker {
            file: file_ref(sticker),
        };
    }
    if let Some(video) = non_empty(message.get("video")) {
        return MessageKind::Video {
            file: file_ref(video),
        };
    }
    if let Some(poll) = non_empty(message.get("poll")) {
        let options = poll
            .get("options")
            .and_then(Value::as_array)
            .map(|options| {
                options
                    .iter()
                    .map(|option| str_field(option, "text").unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default();

        return MessageKind::Poll {
            question: str_field(poll, "question").unwrap_or_default(),
            options,
        };
    }
    if let Some(location) = non_empty(message.get("location")) {
        return MessageKind::Location {
            latitude: location.get("latitude").and_then(Value::as_f64).unwrap_or_default(),
            longitude: location.get("longitude").and_then(Value::as_f64).unwrap_or_default(),
        };
    }
    if let Some(contact) = non_empty(message.get("contact")) {
        return MessageKind::Contact {
            phone_number: str_field(contact, "phone_number"),
            first_name: str_field(contact, "first_name"),
            last_name: str_field(contact, "last_name"),
            user_id: contact.get("user_id").and_then(Value::as_i64),
        };
    }
    MessageKind::Unknown
}

fn sender(data: &Value) -> Sender {
    let from = data.get("from").unwrap_or(&Value::Null);
    Sender {
        id: id_string(from.get("id")),
        is_bot: from.get("is_bot").and_then(Value::as_bool).unwrap_or(false),
        language_code: str_field(from, "language_code"),
        chat: None,
    }
}

fn chat(data: &Value) -> Chat {
    Chat::new(id_string(data.get("chat").and_then(|chat| chat.get("id"))))
}

fn file_ref(data: &Value) -> FileRef {
    FileRef {
        file_id: str_field(data, "file_id").unwrap_or_default(),
        url: None,
    }
}

/// Treats null, `false`, empty strings, arrays and objects as absent
fn non_empty(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| match v {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Number(_) => true,
    })
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Platform ids arrive as numbers; keep them as strings, empty when absent
fn id_string(value: Option<&Value>) -> String {
    match value {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    }
}
