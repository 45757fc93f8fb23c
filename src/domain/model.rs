use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// 嵌在配對 URL 中的一次性 session token
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionToken(String);

impl SessionToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 需要使用者輸入的步驟
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepKind {
    Can,
    PhoneNumber,
    SmsCode,
}

impl StepKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepKind::Can => "can",
            StepKind::PhoneNumber => "phone-number",
            StepKind::SmsCode => "sms-code",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            StepKind::Can => "Enter the CAN printed on your health card",
            StepKind::PhoneNumber => "Enter your mobile phone number",
            StepKind::SmsCode => "Enter the code we sent you by SMS",
        }
    }
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single-use handle for answering one [`PendingStepRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResumeHandle(u64);

impl ResumeHandle {
    pub(crate) fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStepRequest {
    pub kind: StepKind,
    pub handle: ResumeHandle,
    pub prompt: String,
    /// 1 for the first request of this kind, incremented on every re-issue
    pub attempt: u32,
}

/// 卡片/session 層對一個已回填值的判定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Accepted,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputReply {
    Value(String),
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivationResultCode {
    Ok,
    Redirect,
    ClientError,
    Interrupted,
    InternalError,
    DependingHostUnreachable,
    BadRequest,
}

impl ActivationResultCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivationResultCode::Ok => "ok",
            ActivationResultCode::Redirect => "redirect",
            ActivationResultCode::ClientError => "client-error",
            ActivationResultCode::Interrupted => "interrupted",
            ActivationResultCode::InternalError => "internal-error",
            ActivationResultCode::DependingHostUnreachable => "depending-host-unreachable",
            ActivationResultCode::BadRequest => "bad-request",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivationResult {
    pub code: ActivationResultCode,
    pub error_message: Option<String>,
}

impl ActivationResult {
    pub fn ok() -> Self {
        Self {
            code: ActivationResultCode::Ok,
            error_message: None,
        }
    }

    pub fn failed(code: ActivationResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            error_message: Some(message.into()),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.code == ActivationResultCode::Ok
    }
}

/// 進入 Error 狀態的原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    SmsRetriesExhausted,
    SmsDeliveryFailed(String),
    ProtocolViolation(String),
    SessionExpired,
    StepTimeout(StepKind),
    Activation {
        code: ActivationResultCode,
        message: Option<String>,
    },
    CardSession(String),
}

impl FailureReason {
    /// Stable machine-readable reason code.
    pub fn code(&self) -> String {
        match self {
            FailureReason::SmsRetriesExhausted => "sms-retries-exhausted".to_string(),
            FailureReason::SmsDeliveryFailed(_) => "sms-delivery-failed".to_string(),
            FailureReason::ProtocolViolation(_) => "protocol-violation".to_string(),
            FailureReason::SessionExpired => "session-expired".to_string(),
            FailureReason::StepTimeout(kind) => format!("{}-timeout", kind),
            FailureReason::Activation { code, .. } => format!("activation-{}", code.as_str()),
            FailureReason::CardSession(_) => "card-session-failure".to_string(),
        }
    }

    /// Human-readable reason shown when the session ends in `Error`.
    pub fn describe(&self) -> String {
        match self {
            FailureReason::SmsRetriesExhausted => {
                "The SMS code was entered incorrectly too many times.".to_string()
            }
            FailureReason::SmsDeliveryFailed(detail) => {
                format!("The SMS code could not be delivered ({}).", detail)
            }
            FailureReason::ProtocolViolation(detail) => {
                format!("The card connection got out of sync ({}).", detail)
            }
            FailureReason::SessionExpired => "The pairing session has expired.".to_string(),
            FailureReason::StepTimeout(kind) => {
                format!("No {} was entered in time.", kind.as_str().replace('-', " "))
            }
            FailureReason::Activation { code, message } => match message {
                Some(message) => format!("Card authentication failed ({}): {}", code.as_str(), message),
                None => format!("Card authentication failed ({}).", code.as_str()),
            },
            FailureReason::CardSession(detail) => {
                format!("Communication with the card failed ({}).", detail)
            }
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolState {
    Started,
    AwaitingCardInsertion,
    CardRecognized,
    AwaitingCan,
    AwaitingPhoneNumber,
    AwaitingSmsCode,
    Authenticated,
    Completed,
    CardRemoved,
    Error(FailureReason),
    Cancelled,
}

impl ProtocolState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProtocolState::Completed | ProtocolState::Error(_) | ProtocolState::Cancelled
        )
    }

    /// Authenticated 之後狀態機不可再回到配對步驟
    pub fn is_authenticated(&self) -> bool {
        matches!(self, ProtocolState::Authenticated | ProtocolState::Completed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProtocolState::Started => "Started",
            ProtocolState::AwaitingCardInsertion => "AwaitingCardInsertion",
            ProtocolState::CardRecognized => "CardRecognized",
            ProtocolState::AwaitingCan => "AwaitingCAN",
            ProtocolState::AwaitingPhoneNumber => "AwaitingPhoneNumber",
            ProtocolState::AwaitingSmsCode => "AwaitingSmsCode",
            ProtocolState::Authenticated => "Authenticated",
            ProtocolState::Completed => "Completed",
            ProtocolState::CardRemoved => "CardRemoved",
            ProtocolState::Error(_) => "Error",
            ProtocolState::Cancelled => "Cancelled",
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolState::Error(reason) => write!(f, "Error({})", reason),
            other => f.write_str(other.name()),
        }
    }
}

/// Integrated circuit card serial number, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Iccsn(String);

impl Iccsn {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(hex::encode(bytes))
    }

    pub fn parse(hex_str: &str) -> std::result::Result<Self, hex::FromHexError> {
        let bytes = hex::decode(hex_str)?;
        Ok(Self::from_bytes(&bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        // 建構時已保證是合法 hex
        hex::decode(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for Iccsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionEntry {
    pub index: usize,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrescriptionList {
    pub iccsn: Iccsn,
    pub entries: Vec<PrescriptionEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionListRequest {
    pub iccsns: Vec<Iccsn>,
    pub message_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrescriptionListing {
    pub message_id: Uuid,
    pub available_prescription_lists: Vec<PrescriptionList>,
}

impl PrescriptionListing {
    pub fn list(&self, iccsn: &Iccsn) -> Option<&PrescriptionList> {
        self.available_prescription_lists
            .iter()
            .find(|list| &list.iccsn == iccsn)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntrySelection {
    All,
    Indices(Vec<usize>),
}

impl EntrySelection {
    /// 線上格式：`[""]` 代表整份清單
    pub fn to_wire(&self) -> Vec<String> {
        match self {
            EntrySelection::All => vec![String::new()],
            EntrySelection::Indices(indices) => indices.iter().map(|i| i.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SupplyOption {
    OnPremise,
    Shipment,
    Delivery,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mail: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub entries: EntrySelection,
    pub supply_option: SupplyOption,
    pub delivery: Option<DeliveryDetails>,
    pub version: Option<String>,
}

impl Selection {
    pub fn all(supply_option: SupplyOption) -> Self {
        Self {
            entries: EntrySelection::All,
            supply_option,
            delivery: None,
            version: None,
        }
    }

    pub fn indices(indices: Vec<usize>, supply_option: SupplyOption) -> Self {
        Self {
            entries: EntrySelection::Indices(indices),
            supply_option,
            delivery: None,
            version: None,
        }
    }

    pub fn with_delivery(mut self, delivery: DeliveryDetails) -> Self {
        self.delivery = Some(delivery);
        self
    }
}

/// Selection as submitted to the resource service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionRequest {
    pub iccsn: Iccsn,
    pub prescription_index_list: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    pub supply_options_type: SupplyOption,
    #[serde(flatten)]
    pub delivery: DeliveryDetails,
    pub message_id: Uuid,
}

impl SelectionRequest {
    pub fn new(list_id: &Iccsn, selection: &Selection, message_id: Uuid) -> Self {
        Self {
            iccsn: list_id.clone(),
            prescription_index_list: selection.entries.to_wire(),
            version: selection.version.clone(),
            supply_options_type: selection.supply_option,
            delivery: selection.delivery.clone().unwrap_or_default(),
            message_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Confirmation {
    pub message_id: Uuid,
    pub iccsn: Iccsn,
    pub accepted: bool,
}

/// Identifier assigned to a submitted SMS by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutboundMessage {
    /// E.164 recipient
    pub recipient: String,
    pub body: String,
    pub sender: String,
}
