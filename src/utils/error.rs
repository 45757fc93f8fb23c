use std::time::Duration;
use thiserror::Error;

/// 電話號碼解析錯誤：無法解析與「非德國號碼」是不同的結果
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PhoneNumberError {
    #[error("Invalid phone number: {reason}")]
    InvalidPhoneNumber { reason: String },
}

/// 簡訊閘道錯誤，Notifier 本身不重試
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NotifyError {
    #[error("Notification gateway rejected the message (HTTP {status}): {body}")]
    GatewayRejected { status: u16, body: String },

    #[error("Notification gateway unreachable: {reason}")]
    GatewayUnreachable { reason: String },

    #[error("SMS code must not be empty")]
    EmptyCode,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NegotiationError {
    #[error("Resource service did not answer within {0:?}")]
    Timeout(Duration),

    #[error("CardLink session expired")]
    SessionExpired,

    #[error("Selection for list {list_id} was already submitted")]
    DuplicateSelection { list_id: String },

    #[error("List {list_id} was not part of any listing for this session")]
    UnknownList { list_id: String },

    #[error("Invalid selection for list {list_id}: {reason}")]
    InvalidSelection { list_id: String, reason: String },

    #[error("Resource exchange requires an authenticated session (current state: {state})")]
    NotAuthenticated { state: String },

    #[error("Resource service error: {message}")]
    Service { message: String },
}

#[derive(Error, Debug)]
pub enum CardLinkError {
    #[error(transparent)]
    Phone(#[from] PhoneNumberError),

    #[error(transparent)]
    Notify(#[from] NotifyError),

    #[error(transparent)]
    Negotiation(#[from] NegotiationError),

    #[error("Resume handle {handle} is no longer valid")]
    StaleResumeHandle { handle: u64 },

    #[error("Protocol violation: event '{event}' is not valid in state '{state}'")]
    ProtocolViolation { state: String, event: String },

    #[error("Card session error: {message}")]
    CardSession { message: String },

    #[error("Session {session} has no event stream; open one before requesting an SMS code")]
    EventStreamMissing { session: String },

    #[error("HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    ConfigError { message: String },

    #[error("Configuration validation failed for '{field}': {message}")]
    ConfigValidationError { field: String, message: String },

    #[error("Invalid value '{value}' for '{field}': {reason}")]
    InvalidConfigValueError {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration field: {field}")]
    MissingConfigError { field: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Input,
    Protocol,
    Delivery,
    Negotiation,
    Configuration,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CardLinkError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            CardLinkError::Phone(_) => ErrorCategory::Input,
            CardLinkError::Notify(_) => ErrorCategory::Delivery,
            CardLinkError::Negotiation(_) => ErrorCategory::Negotiation,
            CardLinkError::StaleResumeHandle { .. }
            | CardLinkError::ProtocolViolation { .. }
            | CardLinkError::CardSession { .. }
            | CardLinkError::EventStreamMissing { .. } => ErrorCategory::Protocol,
            CardLinkError::ConfigError { .. }
            | CardLinkError::ConfigValidationError { .. }
            | CardLinkError::InvalidConfigValueError { .. }
            | CardLinkError::MissingConfigError { .. } => ErrorCategory::Configuration,
            CardLinkError::HttpError(_)
            | CardLinkError::IoError(_)
            | CardLinkError::SerializationError(_) => ErrorCategory::System,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            // 取消或逾時後才到的回答，直接忽略
            CardLinkError::StaleResumeHandle { .. } => ErrorSeverity::Low,
            CardLinkError::Phone(_) | CardLinkError::Notify(_) => ErrorSeverity::Medium,
            CardLinkError::Negotiation(_)
            | CardLinkError::ProtocolViolation { .. }
            | CardLinkError::CardSession { .. }
            | CardLinkError::EventStreamMissing { .. }
            | CardLinkError::ConfigError { .. }
            | CardLinkError::ConfigValidationError { .. }
            | CardLinkError::InvalidConfigValueError { .. }
            | CardLinkError::MissingConfigError { .. } => ErrorSeverity::High,
            CardLinkError::HttpError(_)
            | CardLinkError::IoError(_)
            | CardLinkError::SerializationError(_) => ErrorSeverity::Critical,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            CardLinkError::Phone(_) | CardLinkError::Notify(_) | CardLinkError::StaleResumeHandle { .. }
        )
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            CardLinkError::Phone(_) => {
                "The phone number could not be recognised. Please check the number and try again."
                    .to_string()
            }
            CardLinkError::Notify(_) => "The SMS code could not be sent.".to_string(),
            CardLinkError::Negotiation(NegotiationError::DuplicateSelection { .. }) => {
                "This prescription list has already been submitted.".to_string()
            }
            CardLinkError::Negotiation(NegotiationError::SessionExpired) => {
                "The CardLink session has expired. Please start again.".to_string()
            }
            CardLinkError::Negotiation(e) => format!("Prescription exchange failed: {}", e),
            CardLinkError::StaleResumeHandle { .. } => {
                "This step has already been answered.".to_string()
            }
            CardLinkError::ProtocolViolation { .. }
            | CardLinkError::CardSession { .. }
            | CardLinkError::EventStreamMissing { .. } => {
                "The connection to the card was interrupted.".to_string()
            }
            CardLinkError::ConfigError { .. }
            | CardLinkError::ConfigValidationError { .. }
            | CardLinkError::InvalidConfigValueError { .. }
            | CardLinkError::MissingConfigError { .. } => format!("Configuration problem: {}", self),
            CardLinkError::HttpError(_)
            | CardLinkError::IoError(_)
            | CardLinkError::SerializationError(_) => format!("Unexpected system error: {}", self),
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Input => "Enter the number in international format, e.g. +49 151 23456789",
            ErrorCategory::Delivery => "Check the gateway endpoint and API key, then retry",
            ErrorCategory::Negotiation => "Re-request the prescription list or restart pairing",
            ErrorCategory::Protocol => "Hold the card to the device and restart the pairing",
            ErrorCategory::Configuration => "Fix the configuration file and run again",
            ErrorCategory::System => "Check network connectivity and file permissions",
        }
    }
}

pub type Result<T> = std::result::Result<T, CardLinkError>;
