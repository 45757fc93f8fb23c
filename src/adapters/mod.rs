// Adapters layer: concrete implementations of the domain ports (SMS gateway, resource service, card layer, input)

pub mod console;
pub mod resource_client;
pub mod simulated_card;
pub mod sms_gateway;

pub use console::{ConsoleInputProvider, ScriptedInputProvider};
pub use resource_client::HttpResourceClient;
pub use simulated_card::{SimulatedCard, StaticPrescriptions};
pub use sms_gateway::{HttpSmsGateway, RecordingGateway};
