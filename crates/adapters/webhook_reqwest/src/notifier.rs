//! [`WebhookNotifier`] that POSTs JSON payloads with reqwest.

use std::future::Future;
use std::time::Duration;

use homesim_app::ports::WebhookNotifier;
use homesim_domain::api_key::ApiKey;
use homesim_domain::delta::{WebhookPayload, changes};
use homesim_domain::device::Device;
use homesim_domain::time::now;
use reqwest::Client;
use serde_json::{Map, Value};

/// Header carrying the subscriber's own API key on every delivery.
pub const API_KEY_HEADER: &str = "X-API-Key";

/// Request timeout used when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Failure to set up the HTTP client.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("cannot build HTTP client")]
    Client(#[from] reqwest::Error),
}

/// Delivers webhooks over HTTP. One attempt per notification, no retries.
#[derive(Debug, Clone)]
pub struct ReqwestWebhookNotifier {
    client: Client,
}

impl ReqwestWebhookNotifier {
    /// Build a notifier whose requests give up after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`WebhookError::Client`] if the TLS backend cannot be
    /// initialised.
    pub fn new(timeout: Duration) -> Result<Self, WebhookError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

impl WebhookNotifier for ReqwestWebhookNotifier {
    fn notify(
        &self,
        api_key: &ApiKey,
        device: &Device,
        previous: &Map<String, Value>,
        new: &Map<String, Value>,
    ) -> impl Future<Output = bool> + Send {
        let target = api_key.webhook_target().map(str::to_string);
        let token = api_key.key.as_str().to_string();
        let subscriber = api_key.name.clone();
        let payload = WebhookPayload {
            device_id: device.id,
            device_type: device.device_type(),
            timestamp: now(),
            changes: changes(previous, new),
        };

        async move {
            let Some(url) = target else {
                tracing::debug!(%subscriber, "no webhook configured");
                return false;
            };
            let response = self
                .client
                .post(&url)
                .header(API_KEY_HEADER, token)
                .json(&payload)
                .send()
                .await;
            match response {
                Ok(response) if response.status().is_success() => {
                    tracing::debug!(%subscriber, device_id = %payload.device_id, "webhook delivered");
                    true
                }
                Ok(response) => {
                    tracing::warn!(%subscriber, %url, status = %response.status(), "webhook rejected");
                    false
                }
                Err(err) => {
                    tracing::warn!(%subscriber, %url, error = %err, "webhook delivery failed");
                    false
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use homesim_domain::device::{DeviceState, NewDevice};
    use homesim_domain::id::{ApiKeyToken, DeviceId};
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::sync::mpsc;

    type Received = (Option<String>, Value);

    async fn spawn_receiver(
        status: StatusCode,
        delay: Duration,
    ) -> (SocketAddr, mpsc::UnboundedReceiver<Received>) {
        let (sender, receiver) = mpsc::unbounded_channel::<Received>();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(sender): State<mpsc::UnboundedSender<Received>>,
                          headers: HeaderMap,
                          axum::Json(body): axum::Json<Value>| async move {
                        tokio::time::sleep(delay).await;
                        let key = headers
                            .get("x-api-key")
                            .and_then(|value| value.to_str().ok())
                            .map(str::to_string);
                        let _ = sender.send((key, body));
                        status
                    },
                ),
            )
            .with_state(sender);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (addr, receiver)
    }

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            other => panic!("expected object, got {other}"),
        }
    }

    fn thermometer() -> Device {
        NewDevice::new("Kitchen", DeviceState::Thermometer { temperature: 21.5 })
            .into_device(DeviceId::new())
    }

    fn subscriber(url: &str) -> ApiKey {
        ApiKey::new(ApiKeyToken::from("secret-token"), "Integrator", now()).with_webhook_url(url)
    }

    #[tokio::test]
    async fn should_post_changes_with_api_key_header() {
        let (addr, mut received) = spawn_receiver(StatusCode::OK, Duration::ZERO).await;
        let notifier = ReqwestWebhookNotifier::new(DEFAULT_TIMEOUT).unwrap();
        let device = thermometer();

        let delivered = notifier
            .notify(
                &subscriber(&format!("http://{addr}/hook")),
                &device,
                &object(json!({"temperature": 21.0, "name": "Kitchen"})),
                &object(json!({"temperature": 21.5})),
            )
            .await;

        assert!(delivered);
        let (key, body) = received.recv().await.unwrap();
        assert_eq!(key.as_deref(), Some("secret-token"));
        assert_eq!(body["deviceId"], json!(device.id));
        assert_eq!(body["deviceType"], "thermometer");
        assert_eq!(body["changes"], json!({"temperature": 21.5}));
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn should_send_empty_changes_when_nothing_differs() {
        let (addr, mut received) = spawn_receiver(StatusCode::NO_CONTENT, Duration::ZERO).await;
        let notifier = ReqwestWebhookNotifier::new(DEFAULT_TIMEOUT).unwrap();
        let state = object(json!({"temperature": 21.5}));

        let delivered = notifier
            .notify(
                &subscriber(&format!("http://{addr}/hook")),
                &thermometer(),
                &state,
                &state,
            )
            .await;

        assert!(delivered);
        let (_, body) = received.recv().await.unwrap();
        assert_eq!(body["changes"], json!({}));
    }

    #[tokio::test]
    async fn should_report_non_success_status() {
        let (addr, _received) =
            spawn_receiver(StatusCode::INTERNAL_SERVER_ERROR, Duration::ZERO).await;
        let notifier = ReqwestWebhookNotifier::new(DEFAULT_TIMEOUT).unwrap();

        let delivered = notifier
            .notify(
                &subscriber(&format!("http://{addr}/hook")),
                &thermometer(),
                &Map::new(),
                &object(json!({"temperature": 21.5})),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn should_report_unreachable_subscriber() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let notifier = ReqwestWebhookNotifier::new(DEFAULT_TIMEOUT).unwrap();

        let delivered = notifier
            .notify(
                &subscriber(&format!("http://{addr}/hook")),
                &thermometer(),
                &Map::new(),
                &Map::new(),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn should_give_up_after_timeout() {
        let (addr, _received) = spawn_receiver(StatusCode::OK, Duration::from_secs(5)).await;
        let notifier = ReqwestWebhookNotifier::new(Duration::from_millis(100)).unwrap();

        let delivered = notifier
            .notify(
                &subscriber(&format!("http://{addr}/hook")),
                &thermometer(),
                &Map::new(),
                &Map::new(),
            )
            .await;
        assert!(!delivered);
    }

    #[tokio::test]
    async fn should_skip_key_without_webhook() {
        let notifier = ReqwestWebhookNotifier::new(DEFAULT_TIMEOUT).unwrap();
        let api_key = ApiKey::new(ApiKeyToken::from("k"), "No hook", now());

        let delivered = notifier
            .notify(&api_key, &thermometer(), &Map::new(), &Map::new())
            .await;
        assert!(!delivered);
    }
}
