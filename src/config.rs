use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;

use crate::error::ApiError;
use crate::utils::{get_env_with_prefix, parse_env_with_prefix};

/// Main configuration for the payments service
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub providers: ProvidersConfig,
    #[serde(default)]
    pub fulfillment: FulfillmentConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 1MB)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

/// Credentials and endpoints for each payment rail.
///
/// A rail is only registered when its credentials are present. Webhook secrets
/// are independent of API keys: a provider without a webhook secret has its
/// callbacks rejected.
#[derive(Clone, Deserialize, Serialize)]
pub struct ProvidersConfig {
    /// Timeout for outbound provider calls, in seconds.
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub xendit: XenditSettings,
    #[serde(default)]
    pub paymongo: PaymongoSettings,
    #[serde(default)]
    pub crypto: CryptoSettings,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct XenditSettings {
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub success_url: Option<String>,
    #[serde(default)]
    pub failure_url: Option<String>,
}

#[derive(Clone, Default, Deserialize, Serialize)]
pub struct PaymongoSettings {
    #[serde(default, skip_serializing)]
    pub secret_key: Option<String>,
    #[serde(default, skip_serializing)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub api_base: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CryptoSettings {
    #[serde(default)]
    pub rpc_url: Option<String>,
    #[serde(default)]
    pub from_address: Option<String>,
    #[serde(default = "default_settlement_timeout_secs")]
    pub settlement_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

#[derive(Clone, Deserialize, Serialize)]
pub struct FulfillmentConfig {
    #[serde(default, skip_serializing)]
    pub oceandrop_api_key: Option<String>,
    #[serde(default)]
    pub oceandrop_base_url: Option<String>,
    #[serde(default = "default_notice_timeout_secs")]
    pub notice_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_provider_timeout_secs(),
            xendit: XenditSettings::default(),
            paymongo: PaymongoSettings::default(),
            crypto: CryptoSettings::default(),
        }
    }
}

impl Default for CryptoSettings {
    fn default() -> Self {
        Self {
            rpc_url: None,
            from_address: None,
            settlement_timeout_secs: default_settlement_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl Default for FulfillmentConfig {
    fn default() -> Self {
        Self {
            oceandrop_api_key: None,
            oceandrop_base_url: None,
            notice_timeout_secs: default_notice_timeout_secs(),
        }
    }
}

fn redacted(secret: &Option<String>) -> Option<&'static str> {
    secret.as_ref().map(|_| "[REDACTED]")
}

impl std::fmt::Debug for ProvidersConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProvidersConfig")
            .field("timeout_secs", &self.timeout_secs)
            .field("xendit", &self.xendit)
            .field("paymongo", &self.paymongo)
            .field("crypto", &self.crypto)
            .finish()
    }
}

impl std::fmt::Debug for XenditSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("XenditSettings")
            .field("secret_key", &redacted(&self.secret_key))
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .field("api_base", &self.api_base)
            .field("success_url", &self.success_url)
            .field("failure_url", &self.failure_url)
            .finish()
    }
}

impl std::fmt::Debug for PaymongoSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PaymongoSettings")
            .field("secret_key", &redacted(&self.secret_key))
            .field("webhook_secret", &redacted(&self.webhook_secret))
            .field("api_base", &self.api_base)
            .finish()
    }
}

impl std::fmt::Debug for FulfillmentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FulfillmentConfig")
            .field("oceandrop_api_key", &redacted(&self.oceandrop_api_key))
            .field("oceandrop_base_url", &self.oceandrop_base_url)
            .field("notice_timeout_secs", &self.notice_timeout_secs)
            .finish()
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_body_size() -> usize {
    1024 * 1024
}

fn default_request_timeout_secs() -> u64 {
    180
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_settlement_timeout_secs() -> u64 {
    120
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_notice_timeout_secs() -> u64 {
    5
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl ProvidersConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl CryptoSettings {
    pub fn settlement_timeout(&self) -> Duration {
        Duration::from_secs(self.settlement_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl FulfillmentConfig {
    pub fn notice_timeout(&self) -> Duration {
        Duration::from_secs(self.notice_timeout_secs)
    }
}

/// Parse `value` as an absolute http(s) URL.
pub(crate) fn parse_http_url(name: &str, value: &str) -> crate::error::Result<url::Url> {
    let url = url::Url::parse(value)
        .map_err(|e| ApiError::bad_request(format!("Invalid {}: {} - {}", name, value, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ApiError::bad_request(format!(
            "Invalid {}: scheme must be http or https, got {}",
            name, other
        ))),
    }
}

/// Builder for Config with environment variable support
#[must_use = "builder does nothing until you call build()"]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.config.server.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.config.server.port = port;
        self
    }

    /// Set the maximum request body size in bytes
    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
        self
    }

    pub fn with_request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.server.request_timeout_secs = secs;
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn with_json_logging(mut self, enabled: bool) -> Self {
        self.config.logging.json = enabled;
        self
    }

    pub fn with_provider_timeout_secs(mut self, secs: u64) -> Self {
        self.config.providers.timeout_secs = secs;
        self
    }

    pub fn with_xendit(mut self, xendit: XenditSettings) -> Self {
        self.config.providers.xendit = xendit;
        self
    }

    pub fn with_paymongo(mut self, paymongo: PaymongoSettings) -> Self {
        self.config.providers.paymongo = paymongo;
        self
    }

    pub fn with_crypto(mut self, crypto: CryptoSettings) -> Self {
        self.config.providers.crypto = crypto;
        self
    }

    pub fn with_fulfillment(mut self, fulfillment: FulfillmentConfig) -> Self {
        self.config.fulfillment = fulfillment;
        self
    }

    /// Load configuration from environment variables with OSSY_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("HOST") {
            self.config.server.host = host;
        }
        // Checks OSSY_PORT first, then PORT
        if let Some(port) = parse_env_with_prefix("PORT") {
            self.config.server.port = port;
        }
        if let Some(size) = parse_env_with_prefix("MAX_BODY_SIZE") {
            self.config.server.max_body_size = size;
        }
        if let Some(secs) = parse_env_with_prefix("REQUEST_TIMEOUT_SECS") {
            self.config.server.request_timeout_secs = secs;
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        let providers = &mut self.config.providers;
        if let Some(secs) = parse_env_with_prefix("PROVIDER_TIMEOUT_SECS") {
            providers.timeout_secs = secs;
        }

        let xendit = &mut providers.xendit;
        xendit.secret_key = get_env_with_prefix("XENDIT_SECRET_KEY").or(xendit.secret_key.take());
        xendit.webhook_secret =
            get_env_with_prefix("XENDIT_WEBHOOK_SECRET").or(xendit.webhook_secret.take());
        xendit.api_base = get_env_with_prefix("XENDIT_API_BASE").or(xendit.api_base.take());
        xendit.success_url = get_env_with_prefix("SUCCESS_URL").or(xendit.success_url.take());
        xendit.failure_url = get_env_with_prefix("FAILURE_URL").or(xendit.failure_url.take());

        let paymongo = &mut providers.paymongo;
        paymongo.secret_key =
            get_env_with_prefix("PAYMONGO_SECRET_KEY").or(paymongo.secret_key.take());
        paymongo.webhook_secret =
            get_env_with_prefix("PAYMONGO_WEBHOOK_SECRET").or(paymongo.webhook_secret.take());
        paymongo.api_base = get_env_with_prefix("PAYMONGO_API_BASE").or(paymongo.api_base.take());

        let crypto = &mut providers.crypto;
        crypto.rpc_url = get_env_with_prefix("ETH_RPC_URL").or(crypto.rpc_url.take());
        crypto.from_address = get_env_with_prefix("ETH_FROM_ADDRESS").or(crypto.from_address.take());
        if let Some(secs) = parse_env_with_prefix("CRYPTO_SETTLEMENT_TIMEOUT_SECS") {
            crypto.settlement_timeout_secs = secs;
        }
        if let Some(ms) = parse_env_with_prefix("CRYPTO_POLL_INTERVAL_MS") {
            crypto.poll_interval_ms = ms;
        }

        let fulfillment = &mut self.config.fulfillment;
        fulfillment.oceandrop_api_key =
            get_env_with_prefix("OCEANDROP_API_KEY").or(fulfillment.oceandrop_api_key.take());
        fulfillment.oceandrop_base_url =
            get_env_with_prefix("OCEANDROP_BASE_URL").or(fulfillment.oceandrop_base_url.take());
        if let Some(secs) = parse_env_with_prefix("FULFILLMENT_NOTICE_TIMEOUT_SECS") {
            fulfillment.notice_timeout_secs = secs;
        }

        self
    }

    /// Build the configuration, validating all settings
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration is invalid:
    /// - Invalid server address (host:port)
    /// - Invalid log level
    /// - Zero sizes or timeouts
    /// - Base URLs that are not http(s)
    /// - Half-configured crypto or distributor settings
    pub fn build(self) -> crate::error::Result<Config> {
        let config = self.config;

        config.server.addr().map_err(|e| {
            ApiError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                config.server.host, config.server.port, e
            ))
        })?;

        if config.server.port == 0 {
            return Err(ApiError::bad_request("Server port must be greater than 0"));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ApiError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if config.server.max_body_size == 0 {
            return Err(ApiError::bad_request("Maximum body size must be greater than 0"));
        }

        let timeouts = [
            ("request timeout", config.server.request_timeout_secs),
            ("provider timeout", config.providers.timeout_secs),
            ("crypto settlement timeout", config.providers.crypto.settlement_timeout_secs),
            ("crypto poll interval", config.providers.crypto.poll_interval_ms),
            ("fulfillment notice timeout", config.fulfillment.notice_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ApiError::bad_request(format!("{} must be greater than 0", name)));
            }
        }

        let urls = [
            ("XENDIT_API_BASE", &config.providers.xendit.api_base),
            ("SUCCESS_URL", &config.providers.xendit.success_url),
            ("FAILURE_URL", &config.providers.xendit.failure_url),
            ("PAYMONGO_API_BASE", &config.providers.paymongo.api_base),
            ("ETH_RPC_URL", &config.providers.crypto.rpc_url),
            ("OCEANDROP_BASE_URL", &config.fulfillment.oceandrop_base_url),
        ];
        for (name, value) in urls {
            if let Some(value) = value {
                parse_http_url(name, value)?;
            }
        }

        let crypto = &config.providers.crypto;
        if crypto.rpc_url.is_some() != crypto.from_address.is_some() {
            return Err(ApiError::bad_request(
                "ETH_RPC_URL and ETH_FROM_ADDRESS must be set together",
            ));
        }

        // Crypto intents wait for settlement inside the request.
        if crypto.rpc_url.is_some()
            && config.server.request_timeout_secs <= crypto.settlement_timeout_secs
        {
            return Err(ApiError::bad_request(format!(
                "Request timeout ({}s) must exceed the crypto settlement timeout ({}s)",
                config.server.request_timeout_secs, crypto.settlement_timeout_secs
            )));
        }

        if config.fulfillment.oceandrop_api_key.is_some()
            && config.fulfillment.oceandrop_base_url.is_none()
        {
            return Err(ApiError::bad_request(
                "OCEANDROP_BASE_URL is required when OCEANDROP_API_KEY is set",
            ));
        }

        Ok(config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
