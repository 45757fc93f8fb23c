use crate::core::negotiator::ProtocolCapability;
use crate::core::orchestrator::InboundEvent;
use crate::core::phone::ValidatedPhoneNumber;
use crate::domain::model::{
    Confirmation, FailureReason, Iccsn, PendingStepRequest, PrescriptionList, ProtocolState,
    ResumeHandle, SessionToken, StepKind,
};
use crate::utils::error::{CardLinkError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use url::Url;

/// 一次狀態轉移紀錄
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub from: String,
    pub to: String,
    pub event: String,
}

/// One pairing attempt, from `Started` to a terminal state.
///
/// Exclusively owned by whoever drives it; every orchestrator operation takes
/// it by `&mut`, which serializes event handling for this session.
#[derive(Debug)]
pub struct Session {
    token: SessionToken,
    pairing_url: Url,
    state: ProtocolState,
    card_identifiers: Vec<Iccsn>,
    pending: Option<PendingStepRequest>,
    next_handle: u64,
    step_attempts: HashMap<StepKind, u32>,
    can_resolved: bool,
    phone_number: Option<ValidatedPhoneNumber>,
    sms_rejections: u32,
    capabilities: Vec<ProtocolCapability>,
    /// 已列出的處方清單，依 iccsn
    listed: HashMap<Iccsn, PrescriptionList>,
    /// 每份清單最多一次確認
    confirmed: HashMap<Iccsn, Confirmation>,
    history: Vec<Transition>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    events: Option<mpsc::WeakUnboundedSender<InboundEvent>>,
    delivery: Option<JoinHandle<()>>,
}

impl Session {
    /// Starts a session with a fresh token, embedded as `?token=` in the pairing URL.
    pub fn start(base_url: &str, ttl: Duration) -> Result<Self> {
        let token = SessionToken::generate();

        let mut pairing_url = Url::parse(base_url).map_err(|e| CardLinkError::InvalidConfigValueError {
            field: "pairing.base_url".to_string(),
            value: base_url.to_string(),
            reason: format!("Invalid URL format: {}", e),
        })?;
        pairing_url
            .query_pairs_mut()
            .append_pair("token", token.as_str());

        let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(1));
        let created_at = Utc::now();

        tracing::info!(session = %token, "🔗 CardLink session started");

        Ok(Self {
            token,
            pairing_url,
            state: ProtocolState::Started,
            card_identifiers: Vec::new(),
            pending: None,
            next_handle: 1,
            step_attempts: HashMap::new(),
            can_resolved: false,
            phone_number: None,
            sms_rejections: 0,
            capabilities: Vec::new(),
            listed: HashMap::new(),
            confirmed: HashMap::new(),
            history: Vec::new(),
            created_at,
            expires_at: created_at + ttl,
            events: None,
            delivery: None,
        })
    }

    pub fn token(&self) -> &SessionToken {
        &self.token
    }

    pub fn pairing_url(&self) -> &Url {
        &self.pairing_url
    }

    pub fn state(&self) -> &ProtocolState {
        &self.state
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn card_identifiers(&self) -> &[Iccsn] {
        &self.card_identifiers
    }

    pub fn pending(&self) -> Option<&PendingStepRequest> {
        self.pending.as_ref()
    }

    pub fn phone_number(&self) -> Option<&ValidatedPhoneNumber> {
        self.phone_number.as_ref()
    }

    pub fn sms_rejections(&self) -> u32 {
        self.sms_rejections
    }

    pub fn capabilities(&self) -> &[ProtocolCapability] {
        &self.capabilities
    }

    /// Confirmation of the selection submitted for `list_id`, if any.
    pub fn confirmation(&self, list_id: &Iccsn) -> Option<&Confirmation> {
        self.confirmed.get(list_id)
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn failure_reason(&self) -> Option<&FailureReason> {
        match &self.state {
            ProtocolState::Error(reason) => Some(reason),
            _ => None,
        }
    }

    /// Human-readable reason when the session ended in `Error`.
    pub fn failure_message(&self) -> Option<String> {
        self.failure_reason().map(FailureReason::describe)
    }

    /// Creates this session's inbound event stream.
    ///
    /// The session keeps a weak sender so background work (SMS delivery) can
    /// report back through the same ordered stream. The stream closes once
    /// every sender handed out here is dropped.
    pub fn event_channel(
        &mut self,
    ) -> (
        mpsc::UnboundedSender<InboundEvent>,
        mpsc::UnboundedReceiver<InboundEvent>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(tx.downgrade());
        (tx, rx)
    }

    /// Handle of the in-flight SMS delivery task, if any.
    pub fn take_delivery(&mut self) -> Option<JoinHandle<()>> {
        self.delivery.take()
    }

    pub fn history_summary(&self) -> String {
        self.history
            .iter()
            .map(|t| format!("[{}] {} -> {} ({})", t.at.format("%H:%M:%S%.3f"), t.from, t.to, t.event))
            .collect::<Vec<_>>()
            .join("; ")
    }

    pub(crate) fn transition(&mut self, to: ProtocolState, event: &str) {
        if self.state == to {
            return;
        }
        tracing::info!(session = %self.token, from = %self.state, to = %to, event, "State transition");
        self.history.push(Transition {
            at: Utc::now(),
            from: self.state.to_string(),
            to: to.to_string(),
            event: event.to_string(),
        });
        self.state = to;
        if self.state.is_terminal() {
            self.pending = None;
            // 結束後不再送簡訊
            self.abort_delivery();
        }
    }

    /// 建立新的待回覆請求；呼叫端保證目前沒有其他待回覆請求
    pub(crate) fn issue_request(&mut self, kind: StepKind, hint: Option<&str>) -> PendingStepRequest {
        let handle = ResumeHandle::new(self.next_handle);
        self.next_handle += 1;

        let attempt = self.step_attempts.entry(kind).or_insert(0);
        *attempt += 1;

        let prompt = match hint {
            Some(hint) => format!("{}. {}", hint, kind.prompt()),
            None => kind.prompt().to_string(),
        };
        let request = PendingStepRequest {
            kind,
            handle,
            prompt,
            attempt: *attempt,
        };
        self.pending = Some(request.clone());
        request
    }

    /// Consumes the pending request if `handle` matches it.
    pub(crate) fn take_pending(&mut self, handle: ResumeHandle) -> Result<PendingStepRequest> {
        match self.pending.take() {
            Some(pending) if pending.handle == handle => Ok(pending),
            other => {
                self.pending = other;
                Err(CardLinkError::StaleResumeHandle { handle: handle.id() })
            }
        }
    }

    pub(crate) fn invalidate_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            tracing::debug!(session = %self.token, handle = pending.handle.id(), "Resume handle invalidated");
        }
    }

    pub(crate) fn set_card_identifiers(&mut self, iccsns: Vec<Iccsn>) {
        self.card_identifiers = iccsns;
    }

    pub(crate) fn can_resolved(&self) -> bool {
        self.can_resolved
    }

    pub(crate) fn set_can_resolved(&mut self, resolved: bool) {
        self.can_resolved = resolved;
    }

    pub(crate) fn set_phone_number(&mut self, number: ValidatedPhoneNumber) {
        self.phone_number = Some(number);
    }

    pub(crate) fn record_sms_rejection(&mut self) -> u32 {
        self.sms_rejections += 1;
        self.sms_rejections
    }

    pub(crate) fn set_capabilities(&mut self, capabilities: Vec<ProtocolCapability>) {
        self.capabilities = capabilities;
    }

    pub(crate) fn listed(&self, list_id: &Iccsn) -> Option<&PrescriptionList> {
        self.listed.get(list_id)
    }

    pub(crate) fn record_listed(&mut self, list: PrescriptionList) {
        self.listed.insert(list.iccsn.clone(), list);
    }

    pub(crate) fn record_confirmation(&mut self, list_id: Iccsn, confirmation: Confirmation) {
        self.confirmed.insert(list_id, confirmation);
    }

    pub(crate) fn event_sender(&self) -> Option<mpsc::UnboundedSender<InboundEvent>> {
        self.events.as_ref().and_then(mpsc::WeakUnboundedSender::upgrade)
    }

    pub(crate) fn set_delivery(&mut self, handle: JoinHandle<()>) {
        if let Some(previous) = self.delivery.replace(handle) {
            previous.abort();
        }
    }

    pub(crate) fn abort_delivery(&mut self) {
        if let Some(handle) = self.delivery.take() {
            handle.abort();
        }
    }
}
