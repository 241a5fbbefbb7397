use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::listener::Listeners;
use crate::platform::telegram::TelegramChannel;

/// A channel together with the listeners its pushed updates go to
#[derive(Clone)]
pub struct Endpoint {
    pub channel: Arc<TelegramChannel>,
    pub listeners: Arc<Listeners>,
}

#[derive(Clone, Default)]
pub struct WebhookState {
    endpoints: Arc<HashMap<String, Endpoint>>,
}

impl WebhookState {
    pub fn new(endpoints: impl IntoIterator<Item = Endpoint>) -> Self {
        let endpoints = endpoints
            .into_iter()
            .map(|endpoint| (endpoint.channel.name().to_string(), endpoint))
            .collect();
        Self {
            endpoints: Arc::new(endpoints),
        }
    }
}

/// Routes `POST {prefix}/{channel}/{token}` to the matching channel
pub fn router(path_prefix: &str, state: WebhookState) -> Router {
    let prefix = path_prefix.trim_end_matches('/');
    Router::new()
        .route(&format!("{prefix}/{{channel}}/{{token}}"), post(receive_update))
        .with_state(state)
}

async fn receive_update(
    State(state): State<WebhookState>,
    Path((channel, token)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let endpoint = state.endpoints.get(&channel).ok_or_else(|| {
        warn!("Webhook call for unknown channel {}", channel);
        (
            StatusCode::NOT_FOUND,
            Json(json!({"success": false, "error": "unknown channel"})),
        )
    })?;

    if !endpoint.channel.token_matches(&token) {
        warn!("[{}] Webhook call with wrong token", channel);
        return Err((
            StatusCode::FORBIDDEN,
            Json(json!({"success": false, "error": "invalid token"})),
        ));
    }

    // Telegram retries anything but a 2xx, so bad payloads are still acknowledged
    match serde_json::from_slice::<Value>(&body) {
        Ok(update) => {
            if let Err(e) = endpoint
                .channel
                .handle_push(&update, &endpoint.listeners)
                .await
            {
                if e.is_not_handled() {
                    info!("[{}] {}", channel, e);
                } else {
                    warn!("[{}] Webhook update failed: {}", channel, e);
                }
            }
        }
        Err(e) => warn!(
            "[{}] Undecodable webhook body ({} bytes): {}",
            channel,
            body.len(),
            e
        ),
    }

    Ok(Json(json!({"success": true})))
}

/// Serve the webhook router on `bind` until `cancel` fires
pub async fn serve(
    bind: &str,
    path_prefix: &str,
    state: WebhookState,
    cancel: CancellationToken,
) -> Result<()> {
    let app = router(path_prefix, state);
    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind to {bind}"))?;

    info!("Webhook server listening on {}", bind);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .context("Webhook server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TelegramConfig;
    use crate::listener::{Listener, ListenerError};
    use crate::platform::IncomingMessage;
    use crate::session::MemorySessionRepository;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use std::sync::Mutex;
    use tower::ServiceExt;

    struct Collector {
        texts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Listener for Collector {
        async fn handle(&self, message: &IncomingMessage) -> Result<(), ListenerError> {
            self.texts
                .lock()
                .unwrap()
                .push(message.text().unwrap_or_default().to_string());
            Ok(())
        }
    }

    fn app() -> (Router, Arc<Collector>) {
        let collector = Arc::new(Collector {
            texts: Mutex::new(Vec::new()),
        });
        let mut listeners = Listeners::new();
        listeners.register(collector.clone());

        let config = TelegramConfig {
            api_token: Some("123:abc".to_string()),
            // Nothing in these tests reaches the API
            api_base_url: "http://127.0.0.1:9".to_string(),
            ..TelegramConfig::default()
        };
        let channel = Arc::new(TelegramChannel::new(
            "telegram",
            config,
            Arc::new(MemorySessionRepository::new()),
        ));
        let state = WebhookState::new([Endpoint {
            channel,
            listeners: Arc::new(listeners),
        }]);

        (router("/telegram-webhook/", state), collector)
    }

    fn push(uri: &str, body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_push_dispatches_update() {
        let (app, collector) = app();
        let update = json!({"update_id": 1, "message": {
            "message_id": 3,
            "from": {"id": 7},
            "chat": {"id": 7},
            "text": "pushed"
        }});

        let response = app
            .oneshot(push("/telegram-webhook/telegram/123:abc", update.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
        assert_eq!(*collector.texts.lock().unwrap(), vec!["pushed"]);
    }

    #[tokio::test]
    async fn test_undecodable_body_still_acknowledged() {
        let (app, collector) = app();

        let response = app
            .oneshot(push("/telegram-webhook/telegram/123:abc", "{not json"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({"success": true}));
        assert!(collector.texts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_token_rejected() {
        let (app, collector) = app();

        let response = app
            .oneshot(push("/telegram-webhook/telegram/999:zzz", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(collector.texts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_channel() {
        let (app, _) = app();

        let response = app
            .oneshot(push("/telegram-webhook/support/123:abc", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
