use crate::config::toml_config::GatewayConfig;
use crate::core::phone;
use crate::domain::model::{MessageId, OutboundMessage};
use crate::domain::ports::NotificationGateway;
use crate::utils::error::{NotifyError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Serialize)]
struct CreateMessageRequest<'a> {
    encoding: &'a str,
    body: &'a str,
    route: &'a str,
    originator: &'a str,
    recipients: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct CreateMessageResponse {
    id: String,
    #[serde(default)]
    credits: Option<f64>,
}

/// SMS gateway over HTTP: `POST {endpoint}/v1/messages` with a bearer key.
pub struct HttpSmsGateway {
    client: Client,
    endpoint: String,
    api_key: String,
    route: String,
    encoding: String,
}

impl HttpSmsGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds()))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            route: config.route().to_string(),
            encoding: config.encoding().to_string(),
        })
    }
}

#[async_trait]
impl NotificationGateway for HttpSmsGateway {
    async fn submit(&self, message: &OutboundMessage) -> std::result::Result<MessageId, NotifyError> {
        let url = format!("{}/v1/messages", self.endpoint);
        let payload = CreateMessageRequest {
            encoding: &self.encoding,
            body: &message.body,
            route: &self.route,
            originator: &message.sender,
            recipients: vec![message.recipient.as_str()],
        };

        tracing::debug!("Making gateway request to: {}", url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await
            .map_err(|e| NotifyError::GatewayUnreachable {
                reason: e.to_string(),
            })?;

        let status = response.status();
        tracing::debug!("Gateway response status: {}", status);

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::GatewayRejected {
                status: status.as_u16(),
                body,
            });
        }

        let created: CreateMessageResponse =
            response
                .json()
                .await
                .map_err(|e| NotifyError::GatewayRejected {
                    status: status.as_u16(),
                    body: format!("unreadable gateway response: {}", e),
                })?;

        if let Some(credits) = created.credits {
            tracing::debug!(message_id = %created.id, credits, "Gateway accepted message");
        }
        Ok(MessageId(created.id))
    }
}

/// Keeps messages in memory instead of sending them. Used for `--dry-run`.
#[derive(Default)]
pub struct RecordingGateway {
    sent: Mutex<Vec<OutboundMessage>>,
    fail: bool,
}

impl RecordingGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission fails as unreachable.
    pub fn failing() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().map(|sent| sent.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn submit(&self, message: &OutboundMessage) -> std::result::Result<MessageId, NotifyError> {
        let count = {
            let mut sent = self.sent.lock().map_err(|_| NotifyError::GatewayUnreachable {
                reason: "recording gateway poisoned".to_string(),
            })?;
            sent.push(message.clone());
            sent.len()
        };

        if self.fail {
            return Err(NotifyError::GatewayUnreachable {
                reason: "dry-run gateway configured to fail".to_string(),
            });
        }

        tracing::info!(
            "🔍 DRY RUN - SMS to {} from '{}': {}",
            phone::mask(&message.recipient),
            message.sender,
            message.body
        );
        Ok(MessageId(format!("dry-run-{}", count)))
    }
}
