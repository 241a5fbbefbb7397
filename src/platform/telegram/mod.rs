pub mod normalize;
pub mod polling;
pub mod request;

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::TelegramConfig;
use crate::error::ChannelError;
use crate::listener::Listeners;
use crate::platform::outgoing::{OutgoingMessage, Sent};
use crate::platform::{IncomingMessage, MessageKind};
use crate::session::{ButtonMemory, SessionRepository};

use self::request::{build_request, interpret_response, ApiRequest, FormPart, Payload};

pub use self::polling::{LongPoller, PollObserver, PollState, StatusLog};

/// Reply of the management calls (`getFile`, `setWebhook`, ...)
#[derive(Debug, Deserialize)]
struct ApiReply {
    ok: bool,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    description: Option<String>,
}

impl ApiReply {
    fn into_result(self) -> Result<Value, ChannelError> {
        if self.ok {
            Ok(self.result.unwrap_or(Value::Null))
        } else {
            Err(ChannelError::Api(self.description.unwrap_or_default()))
        }
    }
}

/// Request URLs carry the bot token; keep them out of errors and logs
pub(crate) fn redact(error: reqwest::Error) -> ChannelError {
    ChannelError::Http(error.without_url())
}

/// One Telegram bot account
pub struct TelegramChannel {
    name: String,
    config: TelegramConfig,
    http: reqwest::Client,
    buttons: ButtonMemory,
}

impl TelegramChannel {
    pub fn new(
        name: impl Into<String>,
        config: TelegramConfig,
        sessions: Arc<dyn SessionRepository>,
    ) -> Self {
        Self {
            name: name.into(),
            config,
            http: reqwest::Client::new(),
            buttons: ButtonMemory::new(sessions),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &TelegramConfig {
        &self.config
    }

    fn api_token(&self) -> Result<&str, ChannelError> {
        self.config
            .api_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| ChannelError::MissingToken {
                channel: self.name.clone(),
            })
    }

    /// Whether `token` is this channel's bot token
    pub fn token_matches(&self, token: &str) -> bool {
        self.api_token().map(|t| t == token).unwrap_or(false)
    }

    fn method_url(&self, method: &str) -> Result<String, ChannelError> {
        let token = self.api_token()?;
        Ok(format!(
            "{}/bot{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            token,
            method
        ))
    }

    async fn execute(
        &self,
        request: ApiRequest,
        timeout: Option<Duration>,
    ) -> Result<reqwest::Response, ChannelError> {
        let url = self.method_url(request.endpoint)?;
        debug!("[{}] {} {}", self.name, request.method, request.endpoint);

        let mut builder = self.http.request(request.method, url);
        builder = match request.payload {
            Payload::Query(params) => builder.query(&params),
            Payload::Multipart(parts) => {
                let mut form = reqwest::multipart::Form::new();
                for part in parts {
                    form = match part {
                        FormPart::Text { name, value } => form.text(name, value),
                        FormPart::File {
                            name,
                            file_name,
                            bytes,
                        } => form.part(
                            name,
                            reqwest::multipart::Part::bytes(bytes).file_name(file_name),
                        ),
                    };
                }
                builder.multipart(form)
            }
        };
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        builder.send().await.map_err(redact)
    }

    fn send_timeout(&self) -> Option<Duration> {
        self.config.send_timeout_secs.map(Duration::from_secs)
    }

    /// Send a new message
    pub async fn send(&self, message: &OutgoingMessage) -> Result<Sent, ChannelError> {
        self.dispatch(message, None).await
    }

    /// Edit a previously sent message (live locations)
    pub async fn update(
        &self,
        sent: &Sent,
        message: &OutgoingMessage,
    ) -> Result<Sent, ChannelError> {
        self.dispatch(message, Some(sent)).await
    }

    async fn dispatch(
        &self,
        message: &OutgoingMessage,
        prior: Option<&Sent>,
    ) -> Result<Sent, ChannelError> {
        // Local failures (unreadable attachment) surface before anything is stored or sent
        let request = build_request(message, prior).await?;

        if let Some(buttons) = message.buttons.as_ref().filter(|b| !b.is_empty()) {
            self.buttons
                .remember(&self.name, &message.receiver.id, buttons)
                .await
                .map_err(ChannelError::Session)?;
        }

        let response = self.execute(request, self.send_timeout()).await?;
        let status = response.status();
        let body = response.text().await.map_err(redact)?;

        let sent = interpret_response(&body)?;
        match &sent {
            Sent::Success { message_id } => debug!(
                "[{}] {} message {} delivered to {}",
                self.name,
                message.kind.name(),
                message_id,
                message.receiver.chat_id()
            ),
            Sent::Failed { reason } => warn!(
                "[{}] {} message to {} failed ({}): {}",
                self.name,
                message.kind.name(),
                message.receiver.chat_id(),
                status,
                reason
            ),
        }
        Ok(sent)
    }

    async fn call(
        &self,
        endpoint: &'static str,
        params: Vec<(&'static str, String)>,
    ) -> Result<Value, ChannelError> {
        let request = ApiRequest {
            method: reqwest::Method::GET,
            endpoint,
            payload: Payload::Query(params),
        };
        let response = self.execute(request, self.send_timeout()).await?;
        let reply: ApiReply = serde_json::from_str(&response.text().await.map_err(redact)?)?;
        reply.into_result()
    }

    /// Resolve a file id to a download URL via `getFile`
    pub async fn resolve_file_url(&self, file_id: &str) -> Result<String, ChannelError> {
        let result = self
            .call("getFile", vec![("file_id", file_id.to_string())])
            .await?;

        let file_path = result
            .get("file_path")
            .and_then(Value::as_str)
            .ok_or_else(|| ChannelError::Api(format!("no file_path for file {}", file_id)))?;

        Ok(format!(
            "{}/file/bot{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.api_token()?,
            file_path
        ))
    }

    pub async fn register_webhook(&self, url: &str) -> Result<(), ChannelError> {
        self.call("setWebhook", vec![("url", url.to_string())])
            .await?;
        info!("[{}] Webhook registered: {}", self.name, url);
        Ok(())
    }

    pub async fn delete_webhook(&self) -> Result<(), ChannelError> {
        self.call(
            "deleteWebhook",
            vec![("drop_pending_updates", "true".to_string())],
        )
        .await?;
        info!("[{}] Webhook deleted", self.name);
        Ok(())
    }

    /// Normalize a raw update and enrich it: resolve file URLs and map reply
    /// keyboard labels back to their keys. Enrichment failures are logged and
    /// never drop the update.
    pub async fn make_message(&self, raw: &Value) -> IncomingMessage {
        let mut message = normalize::normalize(raw, &self.name);

        if let Some(file) = message.kind.file_mut() {
            match self.resolve_file_url(&file.file_id).await {
                Ok(url) => file.url = Some(url),
                Err(e) => warn!(
                    "[{}] Could not resolve file {}: {}",
                    self.name, file.file_id, e
                ),
            }
        }

        // Callback queries already carry the key
        if normalize::is_plain_message(raw) {
            if let (MessageKind::Text { text }, Some(sender)) = (&mut message.kind, &message.sender)
            {
                let resolved = self.buttons.resolve(&self.name, &sender.id, text.as_str()).await;
                match resolved {
                    Ok(Some(key)) => {
                        debug!("[{}] Button '{}' mapped to '{}'", self.name, text, key);
                        *text = key;
                    }
                    Ok(None) => {}
                    Err(e) => warn!("[{}] Could not load session for {}: {:#}", self.name, sender.id, e),
                }
            }
        }

        message
    }

    /// Handle one update delivered out of band (webhook push).
    /// Does not touch any polling state.
    pub async fn handle_push(&self, raw: &Value, listeners: &Listeners) -> Result<(), ChannelError> {
        let message = self.make_message(raw).await;
        listeners.dispatch(&message).await
    }

    pub(crate) async fn fetch_updates(&self, offset: i64) -> Result<reqwest::Response, ChannelError> {
        let mut params = vec![
            ("offset", offset.to_string()),
            ("timeout", self.config.timeout.to_string()),
            ("limit", self.config.limit.to_string()),
        ];
        if !self.config.allowed_updates.is_empty() {
            params.push((
                "allowed_updates",
                serde_json::to_string(&self.config.allowed_updates)?,
            ));
        }

        let request = ApiRequest {
            method: reqwest::Method::GET,
            endpoint: "getUpdates",
            payload: Payload::Query(params),
        };
        // The poll itself may legitimately hang for `timeout` seconds
        self.execute(request, None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::outgoing::{Button, ButtonCollection, Receiver};
    use crate::session::buttons::BUTTONS_MAP_KEY;
    use crate::session::MemorySessionRepository;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const TOKEN: &str = "123:abc";

    fn channel_for(server: &MockServer, sessions: Arc<dyn SessionRepository>) -> TelegramChannel {
        let config = TelegramConfig {
            api_token: Some(TOKEN.to_string()),
            api_base_url: server.uri(),
            ..TelegramConfig::default()
        };
        TelegramChannel::new("telegram", config, sessions)
    }

    fn sent_reply(id: i64) -> serde_json::Value {
        json!({"ok": true, "result": {"message_id": id, "chat": {"id": 100}}})
    }

    #[tokio::test]
    async fn test_missing_token_is_fatal_at_call_time() {
        let channel = TelegramChannel::new(
            "support",
            TelegramConfig::default(),
            Arc::new(MemorySessionRepository::new()),
        );
        let err = channel
            .send(&OutgoingMessage::text(Receiver::new("1"), "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, ChannelError::MissingToken { ref channel } if channel == "support"));
        assert_eq!(
            err.to_string(),
            "No api_token configured for support channel"
        );
    }

    #[tokio::test]
    async fn test_send_text_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/bot{}/sendMessage", TOKEN)))
            .and(query_param("chat_id", "100"))
            .and(query_param("text", "hello"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent_reply(42)))
            .expect(1)
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let sent = channel
            .send(&OutgoingMessage::text(Receiver::new("100"), "hello"))
            .await
            .unwrap();

        assert_eq!(
            sent,
            Sent::Success {
                message_id: "42".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_send_failure_is_a_value() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/sendMessage", TOKEN)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "error_code": 400,
                "description": "Bad Request: chat not found"
            })))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let sent = channel
            .send(&OutgoingMessage::text(Receiver::new("1"), "hi"))
            .await
            .unwrap();

        assert_eq!(
            sent,
            Sent::Failed {
                reason: "Bad Request: chat not found".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_photo_error_before_network() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/sendPhoto", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent_reply(1)))
            .expect(0)
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let err = channel
            .send(&OutgoingMessage::photo(
                Receiver::new("1"),
                "/no/such/photo.jpg",
                Some("caption".to_string()),
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Attachment { .. }));
    }

    #[tokio::test]
    async fn test_location_update_hits_edit_endpoint() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/editMessageLiveLocation", TOKEN)))
            .and(query_param("message_id", "42"))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent_reply(42)))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path(format!("/bot{}/sendLocation", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent_reply(43)))
            .expect(0)
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let prior = Sent::Success {
            message_id: "42".to_string(),
        };
        let sent = channel
            .update(
                &prior,
                &OutgoingMessage::location(Receiver::new("100"), 48.1, 11.5, Some(300)),
            )
            .await
            .unwrap();

        assert_eq!(sent.message_id(), Some("42"));
    }

    #[tokio::test]
    async fn test_buttons_stored_before_send_and_mapped_on_reply() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/sendMessage", TOKEN)))
            .respond_with(ResponseTemplate::new(200).set_body_json(sent_reply(5)))
            .mount(&server)
            .await;

        let sessions = Arc::new(MemorySessionRepository::new());
        let channel = channel_for(&server, sessions.clone());

        let buttons = ButtonCollection::reply(vec![vec![
            Button::new("Yes").with_key("Y"),
            Button::new("No"),
        ]]);
        channel
            .send(&OutgoingMessage::text(Receiver::new("1"), "Continue?").with_buttons(buttons))
            .await
            .unwrap();

        let session = sessions.load("telegram", "1").await.unwrap();
        assert_eq!(
            session.get(BUTTONS_MAP_KEY),
            Some(&json!({"Yes": "Y", "No": "No"}))
        );

        let reply = |text: &str| {
            json!({"update_id": 2, "message": {
                "message_id": 8,
                "from": {"id": 1, "is_bot": false},
                "chat": {"id": 1},
                "text": text
            }})
        };
        assert_eq!(channel.make_message(&reply("Yes")).await.text(), Some("Y"));
        assert_eq!(channel.make_message(&reply("No")).await.text(), Some("No"));
        assert_eq!(
            channel.make_message(&reply("something else")).await.text(),
            Some("something else")
        );
    }

    #[tokio::test]
    async fn test_callback_data_not_remapped() {
        let server = MockServer::start().await;
        let sessions = Arc::new(MemorySessionRepository::new());
        let mut session = sessions.load("telegram", "1").await.unwrap();
        session.set(BUTTONS_MAP_KEY, json!({"Y": "something-else"}));
        sessions.store(&session).await.unwrap();

        let channel = channel_for(&server, sessions);
        let raw = json!({"callback_query": {
            "from": {"id": 1},
            "data": "Y",
            "message": {"message_id": 5, "chat": {"id": 1}}
        }});

        assert_eq!(channel.make_message(&raw).await.text(), Some("Y"));
    }

    #[tokio::test]
    async fn test_callback_with_message_field_not_remapped() {
        let server = MockServer::start().await;
        let sessions = Arc::new(MemorySessionRepository::new());
        let mut session = sessions.load("telegram", "1").await.unwrap();
        session.set(BUTTONS_MAP_KEY, json!({"Yes": "Y"}));
        sessions.store(&session).await.unwrap();

        let channel = channel_for(&server, sessions);
        let raw = json!({
            "callback_query": {
                "from": {"id": 1},
                "data": "Yes",
                "message": {"message_id": 5, "chat": {"id": 1}}
            },
            "message": {"message_id": 6, "from": {"id": 1}, "chat": {"id": 1}, "text": "Yes"}
        });

        let message = channel.make_message(&raw).await;
        assert_eq!(message.id.as_deref(), Some("5"));
        assert_eq!(message.text(), Some("Yes"));
    }

    #[tokio::test]
    async fn test_transport_error_hides_token() {
        let config = TelegramConfig {
            api_token: Some("SECRET-TOKEN-123".to_string()),
            api_base_url: "http://127.0.0.1:9".to_string(),
            ..TelegramConfig::default()
        };
        let channel = TelegramChannel::new(
            "telegram",
            config,
            Arc::new(MemorySessionRepository::new()),
        );

        let err = channel
            .send(&OutgoingMessage::text(Receiver::new("1"), "hi"))
            .await
            .unwrap_err();

        assert!(matches!(err, ChannelError::Http(_)));
        assert!(!err.to_string().contains("SECRET-TOKEN-123"));
        assert!(!format!("{err:?}").contains("SECRET-TOKEN-123"));
    }

    #[tokio::test]
    async fn test_make_message_resolves_file_url() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/getFile", TOKEN)))
            .and(query_param("file_id", "doc-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "ok": true,
                "result": {"file_id": "doc-1", "file_path": "documents/file_3.pdf"}
            })))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let raw = json!({"message": {
            "message_id": 9,
            "from": {"id": 1},
            "chat": {"id": 1},
            "document": {"file_id": "doc-1", "file_name": "report.pdf"}
        }});

        let message = channel.make_message(&raw).await;
        match message.kind {
            MessageKind::File { file } => assert_eq!(
                file.url,
                Some(format!(
                    "{}/file/bot{}/documents/file_3.pdf",
                    server.uri(),
                    TOKEN
                ))
            ),
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unresolvable_file_keeps_message() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/getFile", TOKEN)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: invalid file_id"
            })))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let raw = json!({"message": {
            "message_id": 9,
            "from": {"id": 1},
            "chat": {"id": 1},
            "video": {"file_id": "vid-1"}
        }});

        let message = channel.make_message(&raw).await;
        match message.kind {
            MessageKind::Video { file } => {
                assert_eq!(file.file_id, "vid-1");
                assert_eq!(file.url, None);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_webhook_management_calls() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/setWebhook", TOKEN)))
            .and(query_param("url", "https://bot.example.com/hook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"ok": true, "result": true, "description": "Webhook was set"})),
            )
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(path(format!("/bot{}/deleteWebhook", TOKEN)))
            .and(query_param("drop_pending_updates", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true, "result": true})))
            .expect(1)
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        channel
            .register_webhook("https://bot.example.com/hook")
            .await
            .unwrap();
        channel.delete_webhook().await.unwrap();
    }

    #[tokio::test]
    async fn test_webhook_rejected_by_api() {
        let server = MockServer::start().await;
        Mock::given(path(format!("/bot{}/setWebhook", TOKEN)))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "ok": false,
                "description": "Bad Request: bad webhook: HTTPS url must be provided for webhook"
            })))
            .mount(&server)
            .await;

        let channel = channel_for(&server, Arc::new(MemorySessionRepository::new()));
        let err = channel.register_webhook("http://insecure").await.unwrap_err();
        assert!(matches!(err, ChannelError::Api(ref d) if d.contains("HTTPS")));
    }
}
