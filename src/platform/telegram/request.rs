//! Outgoing message -> Bot API request, and API reply -> `Sent`.

use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ChannelError;
use crate::platform::outgoing::{
    ButtonCollection, ButtonLayout, OutgoingKind, OutgoingMessage, Sent, TypingKind,
};

/// A fully specified Bot API call, not yet bound to a token or host
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Bot API method name, e.g. `sendMessage`
    pub endpoint: &'static str,
    pub payload: Payload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Query(Vec<(&'static str, String)>),
    Multipart(Vec<FormPart>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormPart {
    Text {
        name: &'static str,
        value: String,
    },
    File {
        name: &'static str,
        file_name: String,
        bytes: Vec<u8>,
    },
}

impl ApiRequest {
    fn query(endpoint: &'static str, params: Vec<(&'static str, Option<String>)>) -> Self {
        Self {
            method: Method::GET,
            endpoint,
            // Absent values are left out, not sent empty
            payload: Payload::Query(
                params
                    .into_iter()
                    .filter_map(|(name, value)| value.map(|v| (name, v)))
                    .collect(),
            ),
        }
    }

    /// Value of a query parameter, for inspection
    pub fn param(&self, name: &str) -> Option<&str> {
        match &self.payload {
            Payload::Query(params) => params
                .iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.as_str()),
            Payload::Multipart(parts) => parts.iter().find_map(|part| match part {
                FormPart::Text { name: key, value } if *key == name => Some(value.as_str()),
                _ => None,
            }),
        }
    }
}

/// Build the request for a message. With `prior` set the message edits the
/// previously sent one instead of creating a new message.
pub async fn build_request(
    message: &OutgoingMessage,
    prior: Option<&Sent>,
) -> Result<ApiRequest, ChannelError> {
    match prior {
        None => build_send(message).await,
        Some(sent) => build_edit(message, sent),
    }
}

async fn build_send(message: &OutgoingMessage) -> Result<ApiRequest, ChannelError> {
    let chat_id = message.receiver.chat_id().to_string();
    let markup = reply_markup(message.buttons.as_ref());

    let request = match &message.kind {
        OutgoingKind::Text { text } => ApiRequest::query(
            "sendMessage",
            vec![
                ("chat_id", Some(chat_id)),
                ("text", Some(text.clone())),
                ("reply_markup", markup),
            ],
        ),
        OutgoingKind::Photo { path, caption } => {
            let bytes = tokio::fs::read(path)
                .await
                .map_err(|source| ChannelError::Attachment {
                    path: path.clone(),
                    source,
                })?;
            let file_name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_else(|| "photo".to_string());

            ApiRequest {
                method: Method::POST,
                endpoint: "sendPhoto",
                payload: Payload::Multipart(vec![
                    FormPart::Text {
                        name: "chat_id",
                        value: chat_id,
                    },
                    FormPart::Text {
                        name: "caption",
                        value: caption.clone().unwrap_or_default(),
                    },
                    FormPart::File {
                        name: "photo",
                        file_name,
                        bytes,
                    },
                ]),
            }
        }
        OutgoingKind::Typing(kind) => ApiRequest::query(
            "sendChatAction",
            vec![
                ("chat_id", Some(chat_id)),
                ("action", Some(chat_action(*kind).to_string())),
            ],
        ),
        OutgoingKind::Location {
            latitude,
            longitude,
            live_period,
        } => ApiRequest::query(
            "sendLocation",
            vec![
                ("chat_id", Some(chat_id)),
                ("live_period", live_period.map(|p| p.to_string())),
                ("latitude", Some(latitude.to_string())),
                ("longitude", Some(longitude.to_string())),
                ("reply_markup", markup),
            ],
        ),
    };

    Ok(request)
}

fn build_edit(message: &OutgoingMessage, prior: &Sent) -> Result<ApiRequest, ChannelError> {
    let OutgoingKind::Location {
        latitude,
        longitude,
        ..
    } = &message.kind
    else {
        return Err(ChannelError::UnsupportedEdit(message.kind.name()));
    };

    let message_id = match prior {
        Sent::Success { message_id } => message_id.clone(),
        Sent::Failed { reason } => return Err(ChannelError::NoPriorMessage(reason.clone())),
    };

    Ok(ApiRequest::query(
        "editMessageLiveLocation",
        vec![
            ("chat_id", Some(message.receiver.chat_id().to_string())),
            ("message_id", Some(message_id)),
            ("latitude", Some(latitude.to_string())),
            ("longitude", Some(longitude.to_string())),
            ("reply_markup", reply_markup(message.buttons.as_ref())),
        ],
    ))
}

/// Bot API chat action for a typing sub-kind
pub fn chat_action(kind: TypingKind) -> &'static str {
    match kind {
        TypingKind::Text => "typing",
        TypingKind::UploadingPhoto => "upload_photo",
        TypingKind::RecordingVideo => "record_video",
        TypingKind::UploadingVideo => "upload_video",
        TypingKind::RecordingVideoNote => "record_video_note",
        TypingKind::UploadingVideoNote => "upload_video_note",
        TypingKind::RecordingVoice => "record_voice",
        TypingKind::UploadingVoice => "upload_voice",
        TypingKind::UploadingDocument => "upload_document",
        TypingKind::FindLocation => "find_location",
    }
}

/// JSON-encoded `reply_markup`, or `None` when the message carries no buttons
pub fn reply_markup(buttons: Option<&ButtonCollection>) -> Option<String> {
    let buttons = buttons?;

    let markup = match buttons.layout {
        ButtonLayout::Inline => {
            let grid: Vec<Vec<Value>> = buttons
                .rows
                .iter()
                .map(|row| {
                    row.iter()
                        .map(|b| json!({"text": b.title, "callback_data": b.key()}))
                        .collect()
                })
                .collect();
            json!({ "inline_keyboard": grid })
        }
        ButtonLayout::Reply => {
            let grid: Vec<Vec<&str>> = buttons
                .rows
                .iter()
                .map(|row| row.iter().map(|b| b.title.as_str()).collect())
                .collect();
            json!({ "keyboard": grid, "one_time_keyboard": true })
        }
    };

    Some(markup.to_string())
}

#[derive(Debug, Deserialize)]
struct SendReply {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

/// Turn a send/edit reply body into a `Sent`. A body that is not JSON at all
/// is a decode error rather than a failed send.
pub fn interpret_response(body: &str) -> Result<Sent, ChannelError> {
    let reply: SendReply = serde_json::from_str(body)?;

    let message_id = reply
        .result
        .as_ref()
        .and_then(|result| result.get("message_id"))
        .and_then(|id| match id {
            Value::Number(n) => Some(n.to_string()),
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            _ => None,
        });

    Ok(match message_id {
        Some(message_id) => Sent::Success { message_id },
        None => Sent::Failed {
            reason: reply.description.unwrap_or_default(),
        },
    })
}
