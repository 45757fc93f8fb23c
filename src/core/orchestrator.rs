use crate::core::negotiator::{ProtocolCapability, ResourceNegotiator};
use crate::core::notifier::{send_with_retry, Notifier, RetryPolicy};
use crate::core::phone::ValidatedPhoneNumber;
use crate::core::session::Session;
use crate::domain::model::{
    ActivationResult, FailureReason, Iccsn, PendingStepRequest, ProtocolState, ResumeHandle,
    StepKind, StepOutcome,
};
use crate::domain::ports::{CardSession, CodeGenerator};
use crate::utils::error::{CardLinkError, NegotiationError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Events delivered by the card/session layer, plus the orchestrator's own
/// delivery feedback, in arrival order.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    CardInsertionRequested,
    CardDetected {
        iccsns: Vec<Iccsn>,
    },
    CardRemoved,
    CanRequested,
    PhoneNumberRequested,
    SmsCodeRequested,
    AuthenticationCompleted {
        result: ActivationResult,
        capabilities: Vec<ProtocolCapability>,
    },
    InteractionComplete,
    NotificationFailed {
        reason: String,
    },
    Cancel,
}

impl InboundEvent {
    pub fn name(&self) -> &'static str {
        match self {
            InboundEvent::CardInsertionRequested => "card-insertion-requested",
            InboundEvent::CardDetected { .. } => "card-detected",
            InboundEvent::CardRemoved => "card-removed",
            InboundEvent::CanRequested => "can-requested",
            InboundEvent::PhoneNumberRequested => "phone-number-requested",
            InboundEvent::SmsCodeRequested => "sms-code-requested",
            InboundEvent::AuthenticationCompleted { .. } => "authentication-completed",
            InboundEvent::InteractionComplete => "interaction-complete",
            InboundEvent::NotificationFailed { .. } => "notification-failed",
            InboundEvent::Cancel => "cancel",
        }
    }
}

/// 非德國號碼的處理方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegionPolicy {
    /// Re-prompt for another number.
    Reject,
    /// Log a warning and send the code anyway.
    Warn,
}

#[derive(Debug, Clone)]
pub struct PairingSettings {
    pub default_region: String,
    pub sms_retry_limit: u32,
    pub region_policy: RegionPolicy,
    pub notify_retry: RetryPolicy,
    pub resource_timeout: Duration,
}

impl Default for PairingSettings {
    fn default() -> Self {
        Self {
            default_region: "DE".to_string(),
            sms_retry_limit: 3,
            region_policy: RegionPolicy::Reject,
            notify_retry: RetryPolicy::default(),
            resource_timeout: Duration::from_secs(30),
        }
    }
}

/// Numeric one-time codes of a fixed length.
#[derive(Debug, Clone)]
pub struct RandomCodeGenerator {
    length: usize,
}

impl RandomCodeGenerator {
    pub fn new(length: usize) -> Self {
        Self { length }
    }
}

impl Default for RandomCodeGenerator {
    fn default() -> Self {
        Self::new(6)
    }
}

impl CodeGenerator for RandomCodeGenerator {
    fn generate(&self) -> String {
        let mut rng = rand::thread_rng();
        (0..self.length)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

/// Drives the CardLink pairing handshake for any number of sessions.
///
/// Holds no per-session state: each operation gets the [`Session`] by `&mut`.
pub struct PairingOrchestrator {
    card: Arc<dyn CardSession>,
    notifier: Arc<Notifier>,
    codes: Arc<dyn CodeGenerator>,
    settings: PairingSettings,
}

impl PairingOrchestrator {
    pub fn new(
        card: Arc<dyn CardSession>,
        notifier: Arc<Notifier>,
        codes: Arc<dyn CodeGenerator>,
        settings: PairingSettings,
    ) -> Self {
        Self {
            card,
            notifier,
            codes,
            settings,
        }
    }

    pub fn settings(&self) -> &PairingSettings {
        &self.settings
    }

    /// Applies one inbound event. Returns the new step request, if the event created one.
    pub async fn handle_event(
        &self,
        session: &mut Session,
        event: InboundEvent,
    ) -> Result<Option<PendingStepRequest>> {
        let name = event.name();
        if session.is_terminal() {
            tracing::debug!(session = %session.token(), event = name, "Event after terminal state ignored");
            return Ok(None);
        }

        match event {
            InboundEvent::CardInsertionRequested => match session.state().clone() {
                ProtocolState::Started => {
                    session.transition(ProtocolState::AwaitingCardInsertion, name);
                    Ok(None)
                }
                ProtocolState::AwaitingCardInsertion => Ok(None),
                _ => Err(self.violation(session, name)),
            },

            InboundEvent::CardDetected { iccsns } => {
                if session.state() != &ProtocolState::AwaitingCardInsertion {
                    return Err(self.violation(session, name));
                }
                if !iccsns.is_empty() {
                    session.set_card_identifiers(iccsns);
                }
                session.transition(ProtocolState::CardRecognized, name);
                Ok(None)
            }

            InboundEvent::CardRemoved => {
                self.on_card_removed(session);
                Ok(None)
            }

            InboundEvent::CanRequested => {
                if session.pending().is_some() || session.state() != &ProtocolState::CardRecognized {
                    return Err(self.violation(session, name));
                }
                session.set_can_resolved(false);
                session.transition(ProtocolState::AwaitingCan, name);
                Ok(Some(session.issue_request(StepKind::Can, None)))
            }

            InboundEvent::PhoneNumberRequested => {
                let resolved = session.state() == &ProtocolState::AwaitingCan && session.can_resolved();
                if session.pending().is_some() || !resolved {
                    return Err(self.violation(session, name));
                }
                session.transition(ProtocolState::AwaitingPhoneNumber, name);
                Ok(Some(session.issue_request(StepKind::PhoneNumber, None)))
            }

            InboundEvent::SmsCodeRequested => {
                if session.pending().is_some() || session.state() != &ProtocolState::AwaitingSmsCode {
                    return Err(self.violation(session, name));
                }
                Ok(Some(session.issue_request(StepKind::SmsCode, None)))
            }

            InboundEvent::AuthenticationCompleted {
                result,
                capabilities,
            } => {
                session.invalidate_pending();
                if result.is_ok() {
                    let next = if capabilities.is_empty() {
                        ProtocolState::Completed
                    } else {
                        ProtocolState::Authenticated
                    };
                    session.set_capabilities(capabilities);
                    session.transition(next, name);
                } else {
                    tracing::warn!(
                        session = %session.token(),
                        code = result.code.as_str(),
                        message = ?result.error_message,
                        "CardLink establishment failed"
                    );
                    session.transition(
                        ProtocolState::Error(FailureReason::Activation {
                            code: result.code,
                            message: result.error_message,
                        }),
                        name,
                    );
                }
                Ok(None)
            }

            InboundEvent::InteractionComplete => {
                tracing::debug!(session = %session.token(), "Card interaction complete");
                Ok(None)
            }

            InboundEvent::NotificationFailed { reason } => {
                // 已經過了簡訊步驟就不再影響狀態
                if session.state() == &ProtocolState::AwaitingSmsCode {
                    session.invalidate_pending();
                    session.transition(
                        ProtocolState::Error(FailureReason::SmsDeliveryFailed(reason)),
                        name,
                    );
                } else {
                    tracing::debug!(session = %session.token(), %reason, "Late delivery failure ignored");
                }
                Ok(None)
            }

            InboundEvent::Cancel => {
                self.cancel(session);
                Ok(None)
            }
        }
    }

    /// Answers the pending request identified by `handle`.
    ///
    /// A handle that was already used, replaced or invalidated yields
    /// `StaleResumeHandle` and leaves the session untouched.
    pub async fn supply(
        &self,
        session: &mut Session,
        handle: ResumeHandle,
        value: &str,
    ) -> Result<Option<PendingStepRequest>> {
        let wants_phone = session
            .pending()
            .is_some_and(|p| p.handle == handle && p.kind == StepKind::PhoneNumber);
        let stream_open = session.event_sender().is_some_and(|events| !events.is_closed());
        if wants_phone && !stream_open {
            // 沒有事件流就無法回報送達失敗，session 會卡在 AwaitingSmsCode
            tracing::error!(session = %session.token(), "❌ Phone number supplied without an event stream");
            return Err(CardLinkError::EventStreamMissing {
                session: session.token().to_string(),
            });
        }

        let request = session.take_pending(handle)?;
        match request.kind {
            StepKind::Can => self.supply_can(session, value).await,
            StepKind::PhoneNumber => self.supply_phone_number(session, value).await,
            StepKind::SmsCode => self.supply_sms_code(session, value).await,
        }
    }

    async fn supply_can(&self, session: &mut Session, value: &str) -> Result<Option<PendingStepRequest>> {
        let can = value.trim();
        if can.is_empty() {
            return Ok(Some(session.issue_request(StepKind::Can, Some("The CAN must not be empty"))));
        }

        match self.resume(session, StepKind::Can, can).await? {
            StepOutcome::Accepted => {
                session.set_can_resolved(true);
                Ok(None)
            }
            StepOutcome::Rejected => {
                tracing::warn!(session = %session.token(), "CAN rejected by card");
                Ok(Some(session.issue_request(StepKind::Can, Some("The CAN was not accepted"))))
            }
        }
    }

    async fn supply_phone_number(
        &self,
        session: &mut Session,
        value: &str,
    ) -> Result<Option<PendingStepRequest>> {
        let number = match ValidatedPhoneNumber::parse(value, &self.settings.default_region) {
            Ok(number) => number,
            Err(e) => {
                tracing::warn!(session = %session.token(), error = %e, "Phone number rejected");
                return Ok(Some(session.issue_request(
                    StepKind::PhoneNumber,
                    Some("The phone number could not be recognised"),
                )));
            }
        };

        if !number.is_eligible() {
            match self.settings.region_policy {
                RegionPolicy::Reject => {
                    tracing::warn!(session = %session.token(), number = %number.masked(), "Phone number outside eligible region");
                    return Ok(Some(session.issue_request(
                        StepKind::PhoneNumber,
                        Some("Only German mobile numbers can receive the code"),
                    )));
                }
                RegionPolicy::Warn => {
                    tracing::warn!(session = %session.token(), number = %number.masked(), "Sending code to a number outside the eligible region");
                }
            }
        }

        if self.resume(session, StepKind::PhoneNumber, number.e164()).await? == StepOutcome::Rejected {
            return Ok(Some(session.issue_request(
                StepKind::PhoneNumber,
                Some("The phone number was not accepted"),
            )));
        }

        let code = self.codes.generate();
        self.spawn_delivery(session, number.e164().to_string(), code);

        tracing::info!(session = %session.token(), number = %number.masked(), "📱 Phone number accepted, SMS code on its way");
        session.set_phone_number(number);
        session.transition(ProtocolState::AwaitingSmsCode, "phone-number-supplied");
        Ok(None)
    }

    async fn supply_sms_code(&self, session: &mut Session, value: &str) -> Result<Option<PendingStepRequest>> {
        let code = value.trim();
        if code.is_empty() {
            return Ok(Some(session.issue_request(StepKind::SmsCode, Some("The code must not be empty"))));
        }

        match self.resume(session, StepKind::SmsCode, code).await? {
            StepOutcome::Accepted => {
                session.transition(ProtocolState::Authenticated, "sms-code-accepted");
                Ok(None)
            }
            StepOutcome::Rejected => {
                let rejections = session.record_sms_rejection();
                let limit = self.settings.sms_retry_limit;
                tracing::warn!(session = %session.token(), rejections, limit, "SMS code rejected");

                if rejections >= limit {
                    session.transition(
                        ProtocolState::Error(FailureReason::SmsRetriesExhausted),
                        "sms-code-rejected",
                    );
                    return Ok(None);
                }
                let hint = format!("Wrong code, {} attempt(s) left", limit - rejections);
                Ok(Some(session.issue_request(StepKind::SmsCode, Some(&hint))))
            }
        }
    }

    async fn resume(&self, session: &mut Session, kind: StepKind, value: &str) -> Result<StepOutcome> {
        let outcome = self.card.resume(session.token(), kind, value).await;
        match outcome {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                tracing::error!(session = %session.token(), step = %kind, error = %e, "Card session failed to resume");
                session.transition(
                    ProtocolState::Error(FailureReason::CardSession(e.to_string())),
                    kind.as_str(),
                );
                Err(e)
            }
        }
    }

    /// 背景送出簡訊，不阻塞狀態機；最終失敗時透過事件流回報
    fn spawn_delivery(&self, session: &mut Session, recipient: String, code: String) {
        let notifier = self.notifier.clone();
        let policy = self.settings.notify_retry.clone();
        let token = session.token().clone();
        let events = session.event_sender();

        let handle = tokio::spawn(async move {
            if let Err(e) = send_with_retry(&notifier, &policy, &token, &recipient, &code).await {
                tracing::error!(session = %token, error = %e, "❌ SMS code could not be delivered");
                match events {
                    Some(events) => {
                        if let Err(send_err) = events.send(InboundEvent::NotificationFailed {
                            reason: e.to_string(),
                        }) {
                            tracing::debug!(session = %token, error = %send_err, "Event stream closed, delivery failure not reported");
                        }
                    }
                    None => {
                        tracing::warn!(session = %token, "No event stream attached, delivery failure not reported");
                    }
                }
            }
        });
        session.set_delivery(handle);
    }

    fn on_card_removed(&self, session: &mut Session) {
        if session.state().is_authenticated() {
            tracing::info!(session = %session.token(), "Card removed after authentication");
            return;
        }

        session.invalidate_pending();
        session.set_can_resolved(false);
        session.transition(ProtocolState::CardRemoved, "card-removed");

        if session.is_expired() {
            session.transition(ProtocolState::Error(FailureReason::SessionExpired), "card-removed");
        } else {
            session.transition(ProtocolState::AwaitingCardInsertion, "card-removed");
        }
    }

    /// Cancels the session. Any outstanding resume handle becomes stale.
    pub fn cancel(&self, session: &mut Session) {
        if session.is_terminal() {
            return;
        }
        session.invalidate_pending();
        session.transition(ProtocolState::Cancelled, "cancel");
    }

    /// Ends the session because no answer for `step` arrived in time.
    pub fn expire(&self, session: &mut Session, step: StepKind) {
        if session.is_terminal() {
            return;
        }
        tracing::warn!(session = %session.token(), step = %step, "Step timed out");
        session.invalidate_pending();
        session.transition(ProtocolState::Error(FailureReason::StepTimeout(step)), "timeout");
    }

    /// Prescription exchange for an authenticated session.
    pub fn negotiator(&self, session: &Session) -> std::result::Result<ResourceNegotiator, NegotiationError> {
        ResourceNegotiator::from_session(session, self.settings.resource_timeout)
    }

    fn violation(&self, session: &mut Session, event: &str) -> CardLinkError {
        let state = session.state().to_string();
        let detail = format!("{} in {}", event, state);
        session.transition(ProtocolState::Error(FailureReason::ProtocolViolation(detail)), event);
        tracing::error!(
            session = %session.token(),
            event,
            state = %state,
            history = %session.history_summary(),
            "❌ Protocol violation"
        );
        CardLinkError::ProtocolViolation {
            state,
            event: event.to_string(),
        }
    }
}
