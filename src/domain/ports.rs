use crate::domain::model::{
    Confirmation, InputReply, MessageId, OutboundMessage, PendingStepRequest,
    PrescriptionListRequest, PrescriptionListing, SelectionRequest, SessionToken, StepKind,
    StepOutcome,
};
use crate::utils::error::{NegotiationError, NotifyError, Result};
use async_trait::async_trait;

/// 卡片/session 層：接收使用者回填的值，繼續底層交換
#[async_trait]
pub trait CardSession: Send + Sync {
    async fn resume(&self, token: &SessionToken, kind: StepKind, value: &str) -> Result<StepOutcome>;
}

/// Human-input provider. Answers may arrive at any time, or never.
#[async_trait]
pub trait InputProvider: Send + Sync {
    async fn request(&self, request: &PendingStepRequest) -> InputReply;
}

#[async_trait]
pub trait NotificationGateway: Send + Sync {
    async fn submit(&self, message: &OutboundMessage) -> std::result::Result<MessageId, NotifyError>;
}

#[async_trait]
pub trait ResourceService: Send + Sync {
    async fn request_prescriptions(
        &self,
        request: &PrescriptionListRequest,
    ) -> std::result::Result<PrescriptionListing, NegotiationError>;

    async fn select_prescriptions(
        &self,
        selection: &SelectionRequest,
    ) -> std::result::Result<Confirmation, NegotiationError>;
}

pub trait CodeGenerator: Send + Sync {
    fn generate(&self) -> String;
}
