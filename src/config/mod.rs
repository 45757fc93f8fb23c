pub mod toml_config;

pub use toml_config::CardLinkConfig;

#[cfg(feature = "cli")]
use clap::Parser;

#[cfg(feature = "cli")]
#[derive(Debug, Clone, Parser)]
#[command(name = "cardlink")]
#[command(about = "Pair a health card with a verified phone number and select prescriptions")]
pub struct CliConfig {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "cardlink.toml")]
    pub config: String,

    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    #[arg(long, help = "Log as JSON lines")]
    pub json_logs: bool,

    /// Log SMS messages instead of sending them through the gateway
    #[arg(long)]
    pub dry_run: bool,

    /// Answer the CAN prompt without asking
    #[arg(long)]
    pub can: Option<String>,

    /// Answer the phone number prompt without asking
    #[arg(long)]
    pub phone: Option<String>,

    /// Answer the SMS code prompt without asking
    #[arg(long)]
    pub sms_code: Option<String>,
}
