use crate::core::phone;
use crate::domain::model::{MessageId, OutboundMessage, SessionToken};
use crate::domain::ports::NotificationGateway;
use crate::utils::error::NotifyError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_SENDER: &str = "Cardlink";

/// Composes the SMS-code message and hands it to the gateway.
///
/// Holds no per-call state and never retries; retry policy belongs to the caller.
pub struct Notifier {
    gateway: Arc<dyn NotificationGateway>,
    sender: String,
}

impl Notifier {
    pub fn new(gateway: Arc<dyn NotificationGateway>, sender: impl Into<String>) -> Self {
        Self {
            gateway,
            sender: sender.into(),
        }
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn compose(&self, recipient: &str, code: &str) -> OutboundMessage {
        OutboundMessage {
            recipient: recipient.to_string(),
            body: format!("Your SMS-Code for Cardlink: {}", code),
            sender: self.sender.clone(),
        }
    }

    /// `phone_number` must already be canonical (E.164).
    pub async fn send_code(
        &self,
        session: &SessionToken,
        phone_number: &str,
        code: &str,
    ) -> Result<MessageId, NotifyError> {
        if code.trim().is_empty() {
            return Err(NotifyError::EmptyCode);
        }

        let message = self.compose(phone_number, code);
        tracing::debug!(
            session = %session,
            recipient = %phone::mask(phone_number),
            sender = %self.sender,
            "Submitting SMS code message"
        );

        let id = self.gateway.submit(&message).await?;
        tracing::info!(session = %session, message_id = %id, "📨 SMS code submitted");
        Ok(id)
    }
}

/// 重試設定：指數退避 `base * 2^attempt`，上限 `max_delay_ms`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 500,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 0,
            max_delay_ms: 0,
        }
    }

    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp_delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        Duration::from_millis(exp_delay_ms.min(self.max_delay_ms))
    }
}

/// Sends the code, retrying failed deliveries per `policy`.
///
/// Returns the last error once all attempts are used up.
pub async fn send_with_retry(
    notifier: &Notifier,
    policy: &RetryPolicy,
    session: &SessionToken,
    phone_number: &str,
    code: &str,
) -> Result<MessageId, NotifyError> {
    let mut attempt = 0;
    loop {
        match notifier.send_code(session, phone_number, code).await {
            Ok(id) => return Ok(id),
            // 參數錯誤，重試也沒用
            Err(NotifyError::EmptyCode) => return Err(NotifyError::EmptyCode),
            Err(e) if attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                tracing::warn!(
                    session = %session,
                    attempt = attempt + 1,
                    error = %e,
                    "SMS delivery failed, retrying in {:?}",
                    delay
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                tracing::warn!(
                    session = %session,
                    attempts = attempt + 1,
                    error = %e,
                    "SMS delivery failed, giving up"
                );
                return Err(e);
            }
        }
    }
}
