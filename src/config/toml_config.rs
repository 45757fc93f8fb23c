use crate::core::notifier::{RetryPolicy, DEFAULT_SENDER};
use crate::core::orchestrator::{PairingSettings, RegionPolicy};
use crate::utils::error::{CardLinkError, Result};
use crate::utils::validation::{
    validate_non_empty_string, validate_positive_number, validate_range, validate_region_code,
    validate_url, Validate,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardLinkConfig {
    pub pairing: PairingConfig,
    pub gateway: GatewayConfig,
    pub resources: Option<ResourcesConfig>,
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairingConfig {
    pub base_url: String,
    pub default_region: Option<String>,
    pub session_ttl_seconds: Option<u64>,
    pub sms_retry_limit: Option<u32>,
    pub sms_code_timeout_seconds: Option<u64>,
    pub step_timeout_seconds: Option<u64>,
    pub region_policy: Option<RegionPolicy>,
    pub code_length: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub endpoint: String,
    pub api_key: String,
    pub sender: Option<String>,
    pub route: Option<String>,
    pub encoding: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry_attempts: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    pub max_retry_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourcesConfig {
    pub endpoint: Option<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub json: Option<bool>,
}

impl GatewayConfig {
    pub fn sender(&self) -> &str {
        self.sender.as_deref().unwrap_or(DEFAULT_SENDER)
    }

    pub fn route(&self) -> &str {
        self.route.as_deref().unwrap_or("business")
    }

    pub fn encoding(&self) -> &str {
        self.encoding.as_deref().unwrap_or("auto")
    }

    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds.unwrap_or(10)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_retries: self.retry_attempts.unwrap_or(defaults.max_retries),
            base_delay_ms: self.retry_delay_ms.unwrap_or(defaults.base_delay_ms),
            max_delay_ms: self.max_retry_delay_ms.unwrap_or(defaults.max_delay_ms),
        }
    }
}

impl CardLinkConfig {
    /// 從 TOML 檔案載入配置
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(CardLinkError::IoError)?;
        Self::from_toml_str(&content)
    }

    /// 從 TOML 字串解析配置
    pub fn from_toml_str(content: &str) -> Result<Self> {
        // API key 等機密從環境變數帶入
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| CardLinkError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// 替換環境變數 (例如 ${SMS_API_KEY})
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| CardLinkError::ConfigError {
            message: format!("invalid substitution pattern: {}", e),
        })?;

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    /// 驗證配置的合理性
    pub fn validate_config(&self) -> Result<()> {
        validate_url("pairing.base_url", &self.pairing.base_url)?;
        validate_region_code("pairing.default_region", &self.default_region())?;
        validate_positive_number("pairing.sms_retry_limit", self.sms_retry_limit() as u64, 1)?;
        validate_positive_number("pairing.session_ttl_seconds", self.session_ttl().as_secs(), 1)?;
        validate_positive_number(
            "pairing.sms_code_timeout_seconds",
            self.sms_code_timeout().as_secs(),
            1,
        )?;
        validate_range("pairing.code_length", self.code_length(), 4, 10)?;

        validate_url("gateway.endpoint", &self.gateway.endpoint)?;
        validate_non_empty_string("gateway.sender", self.gateway.sender())?;
        if self.gateway.api_key.contains("${") {
            return Err(CardLinkError::MissingConfigError {
                field: format!("gateway.api_key ({})", self.gateway.api_key),
            });
        }
        validate_non_empty_string("gateway.api_key", &self.gateway.api_key)?;

        if let Some(endpoint) = self.resources.as_ref().and_then(|r| r.endpoint.as_deref()) {
            validate_url("resources.endpoint", endpoint)?;
        }

        Ok(())
    }

    pub fn default_region(&self) -> String {
        self.pairing
            .default_region
            .clone()
            .unwrap_or_else(|| "DE".to_string())
    }

    pub fn sms_retry_limit(&self) -> u32 {
        self.pairing.sms_retry_limit.unwrap_or(3)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.pairing.session_ttl_seconds.unwrap_or(900))
    }

    pub fn sms_code_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing.sms_code_timeout_seconds.unwrap_or(300))
    }

    /// 其他步驟的等待上限，未設定則不限
    pub fn step_timeout(&self) -> Option<Duration> {
        self.pairing.step_timeout_seconds.map(Duration::from_secs)
    }

    pub fn code_length(&self) -> usize {
        self.pairing.code_length.unwrap_or(6)
    }

    pub fn resource_timeout(&self) -> Duration {
        Duration::from_secs(
            self.resources
                .as_ref()
                .and_then(|r| r.timeout_seconds)
                .unwrap_or(30),
        )
    }

    pub fn json_logs(&self) -> bool {
        self.logging.as_ref().and_then(|l| l.json).unwrap_or(false)
    }

    pub fn pairing_settings(&self) -> PairingSettings {
        PairingSettings {
            default_region: self.default_region(),
            sms_retry_limit: self.sms_retry_limit(),
            region_policy: self.pairing.region_policy.unwrap_or(RegionPolicy::Reject),
            notify_retry: self.gateway.retry_policy(),
            resource_timeout: self.resource_timeout(),
        }
    }
}

impl Validate for CardLinkConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
