pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;

pub use config::CardLinkConfig;
pub use core::{
    driver::SessionDriver, negotiator::ResourceNegotiator, notifier::Notifier,
    orchestrator::PairingOrchestrator, session::Session,
};
pub use utils::error::{CardLinkError, Result};
