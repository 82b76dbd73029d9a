use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Main configuration for the PROD.AI backend
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub gateway: GatewayConfig,
    pub webhook: WebhookConfig,
    pub store: StoreConfig,
    pub subscription: SubscriptionConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum request body size in bytes (default: 64KB; every body this API
    /// accepts is a small JSON object)
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,
    /// Overall request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_json")]
    pub json: bool,
}

/// Bearer-token verification settings.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub jwt_secret: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

/// Payment gateway (Mercado Pago) client settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
    #[serde(default)]
    pub access_token: String,
    #[serde(default = "default_gateway_base_url")]
    pub base_url: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_seconds: u64,
}

/// Gateway webhook verification settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub secret: String,
    /// Maximum age of a signed notification timestamp, in seconds.
    #[serde(default = "default_webhook_tolerance")]
    pub tolerance_seconds: i64,
}

/// User record store (Firestore) settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default = "default_store_collection")]
    pub collection: String,
    #[serde(default = "default_store_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_store_timeout")]
    pub timeout_seconds: u64,
}

/// Subscription lifecycle settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SubscriptionConfig {
    /// Messages a free-tier user may send per day.
    #[serde(default = "default_free_quota")]
    pub free_daily_quota: u32,
    /// Interval between expiration sweeps.
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_body_size: default_max_body_size(),
            request_timeout_seconds: default_request_timeout(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: default_json(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            access_token: String::new(),
            base_url: default_gateway_base_url(),
            timeout_seconds: default_gateway_timeout(),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            tolerance_seconds: default_webhook_tolerance(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            project_id: String::new(),
            collection: default_store_collection(),
            base_url: default_store_base_url(),
            token: String::new(),
            timeout_seconds: default_store_timeout(),
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            free_daily_quota: default_free_quota(),
            sweep_interval_seconds: default_sweep_interval(),
        }
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

fn default_json() -> bool {
    false
}

fn default_max_body_size() -> usize {
    64 * 1024
}

fn default_request_timeout() -> u64 {
    30
}

fn default_gateway_base_url() -> String {
    "https://api.mercadopago.com".to_string()
}

fn default_gateway_timeout() -> u64 {
    10
}

fn default_webhook_tolerance() -> i64 {
    300
}

fn default_store_collection() -> String {
    "users".to_string()
}

fn default_store_base_url() -> String {
    "https://firestore.googleapis.com/v1".to_string()
}

fn default_store_timeout() -> u64 {
    10
}

fn default_free_quota() -> u32 {
    10
}

fn default_sweep_interval() -> u64 {
    6 * 60 * 60
}

impl ServerConfig {
    pub fn addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

/// Read `PRODAI_{key}`, falling back to the bare `{key}`.
pub(crate) fn get_env_with_prefix(key: &str) -> Option<String> {
    std::env::var(format!("PRODAI_{key}"))
        .or_else(|_| std::env::var(key))
        .ok()
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

    pub fn with_max_body_size(mut self, max_body_size: usize) -> Self {
        self.config.server.max_body_size = max_body_size;
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

    pub fn with_jwt_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.auth.jwt_secret = secret.into();
        self
    }

    pub fn with_gateway_access_token(mut self, token: impl Into<String>) -> Self {
        self.config.gateway.access_token = token.into();
        self
    }

    pub fn with_gateway_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.config.gateway.base_url = base_url.into();
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.config.webhook.secret = secret.into();
        self
    }

    pub fn with_store_project(mut self, project_id: impl Into<String>) -> Self {
        self.config.store.project_id = project_id.into();
        self
    }

    pub fn with_free_daily_quota(mut self, quota: u32) -> Self {
        self.config.subscription.free_daily_quota = quota;
        self
    }

    pub fn with_sweep_interval_seconds(mut self, seconds: u64) -> Self {
        self.config.subscription.sweep_interval_seconds = seconds;
        self
    }

    /// Load configuration from environment variables with PRODAI_ prefix
    pub fn from_env(mut self) -> Self {
        if let Some(host) = get_env_with_prefix("SERVER_HOST") {
            self.config.server.host = host;
        }
        // Check PRODAI_PORT first, fall back to PORT (for Railway/Heroku compatibility)
        if let Some(port) = get_env_with_prefix("PORT") {
            if let Ok(p) = port.parse() {
                self.config.server.port = p;
            }
        }
        if let Some(max_body_size) = get_env_with_prefix("MAX_BODY_SIZE") {
            if let Ok(size) = max_body_size.parse() {
                self.config.server.max_body_size = size;
            }
        }
        if let Some(timeout) = get_env_with_prefix("REQUEST_TIMEOUT_SECONDS") {
            if let Ok(t) = timeout.parse() {
                self.config.server.request_timeout_seconds = t;
            }
        }
        if let Some(level) = get_env_with_prefix("LOG_LEVEL") {
            self.config.logging.level = level;
        }
        if let Some(json) = get_env_with_prefix("LOG_JSON") {
            self.config.logging.json = json.parse().unwrap_or(false);
        }

        // Auth
        if let Some(secret) = get_env_with_prefix("JWT_SECRET") {
            self.config.auth.jwt_secret = secret;
        }
        if let Some(issuer) = get_env_with_prefix("JWT_ISSUER") {
            self.config.auth.issuer = Some(issuer);
        }
        if let Some(audience) = get_env_with_prefix("JWT_AUDIENCE") {
            self.config.auth.audience = Some(audience);
        }

        // Payment gateway
        if let Some(token) = get_env_with_prefix("MP_ACCESS_TOKEN") {
            self.config.gateway.access_token = token;
        }
        if let Some(base_url) = get_env_with_prefix("MP_BASE_URL") {
            self.config.gateway.base_url = base_url;
        }
        if let Some(timeout) = get_env_with_prefix("MP_TIMEOUT_SECONDS") {
            if let Ok(t) = timeout.parse() {
                self.config.gateway.timeout_seconds = t;
            }
        }

        // Webhook verification
        if let Some(secret) = get_env_with_prefix("WEBHOOK_SECRET") {
            self.config.webhook.secret = secret;
        }
        if let Some(tolerance) = get_env_with_prefix("WEBHOOK_TOLERANCE_SECONDS") {
            if let Ok(t) = tolerance.parse() {
                self.config.webhook.tolerance_seconds = t;
            }
        }

        // Record store
        if let Some(project_id) = get_env_with_prefix("FIRESTORE_PROJECT_ID") {
            self.config.store.project_id = project_id;
        }
        if let Some(collection) = get_env_with_prefix("FIRESTORE_COLLECTION") {
            self.config.store.collection = collection;
        }
        if let Some(base_url) = get_env_with_prefix("FIRESTORE_BASE_URL") {
            self.config.store.base_url = base_url;
        }
        if let Some(token) = get_env_with_prefix("FIRESTORE_TOKEN") {
            self.config.store.token = token;
        }
        if let Some(timeout) = get_env_with_prefix("FIRESTORE_TIMEOUT_SECONDS") {
            if let Ok(t) = timeout.parse() {
                self.config.store.timeout_seconds = t;
            }
        }

        // Subscription lifecycle
        if let Some(quota) = get_env_with_prefix("FREE_DAILY_QUOTA") {
            if let Ok(q) = quota.parse() {
                self.config.subscription.free_daily_quota = q;
            }
        }
        if let Some(interval) = get_env_with_prefix("SWEEP_INTERVAL_SECONDS") {
            if let Ok(i) = interval.parse() {
                self.config.subscription.sweep_interval_seconds = i;
            }
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
    /// - Zero timeouts, tolerance, quota, or sweep interval
    ///
    /// Credentials are deliberately not checked here; the live clients
    /// validate their own credentials at construction so tests can build a
    /// config without any.
    pub fn build(self) -> crate::error::Result<Config> {
        self.config.server.addr().map_err(|e| {
            crate::error::ApiError::bad_request(format!(
                "Invalid server address {}:{} - {}",
                self.config.server.host, self.config.server.port, e
            ))
        })?;

        if self.config.server.port == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Server port must be greater than 0",
            ));
        }

        if self.config.server.max_body_size == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Maximum body size must be greater than 0",
            ));
        }

        if self.config.server.request_timeout_seconds == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Request timeout must be greater than 0",
            ));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.config.logging.level.to_lowercase().as_str()) {
            return Err(crate::error::ApiError::bad_request(format!(
                "Invalid log level: {}. Must be one of: {}",
                self.config.logging.level,
                valid_log_levels.join(", ")
            )));
        }

        if self.config.gateway.timeout_seconds == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Gateway timeout must be greater than 0",
            ));
        }

        if self.config.store.timeout_seconds == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Store timeout must be greater than 0",
            ));
        }

        if self.config.webhook.tolerance_seconds <= 0 {
            return Err(crate::error::ApiError::bad_request(
                "Webhook tolerance must be greater than 0",
            ));
        }

        if self.config.subscription.free_daily_quota == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Free daily quota must be at least 1",
            ));
        }

        if self.config.subscription.sweep_interval_seconds == 0 {
            return Err(crate::error::ApiError::bad_request(
                "Sweep interval must be greater than 0",
            ));
        }

        Ok(self.config)
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
