pub mod driver;
pub mod negotiator;
pub mod notifier;
pub mod orchestrator;
pub mod phone;
pub mod session;

pub use crate::domain::model::{PendingStepRequest, ProtocolState};
pub use crate::domain::ports::{CardSession, InputProvider, NotificationGateway, ResourceService};
pub use crate::utils::error::Result;
