//! Layered service configuration: defaults, then an optional YAML file, then
//! `MARKET__SECTION__KEY` environment variables.
use super::types::Currency;
use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the YAML file.
pub const CONFIG_PATH_VAR: &str = "MARKET_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/marketplace.yaml";
/// Ten years.
pub const MAX_TOKEN_TTL_HOURS: i64 = 87_600;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MarketConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub payments: PaymentsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub path: PathBuf,
    /// Throw-away database, removed when the process exits.
    #[serde(default)]
    pub temporary: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub token_ttl_hours: i64,
    pub bootstrap_admin_token: Option<String>,
    pub bootstrap_admin_email: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PaymentsConfig {
    pub gateway_url: String,
    #[serde(default)]
    pub gateway_api_key: String,
    pub timeout_ms: u64,
    pub sandbox: bool,
    #[serde(default)]
    pub webhook_secret: String,
    pub currency: Currency,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    pub filter: String, // EnvFilter directives, RUST_LOG wins when set
    #[serde(default)]
    pub json: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8090,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/marketplace.sled"),
            temporary: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_ttl_hours: 24 * 7,
            bootstrap_admin_token: None,
            bootstrap_admin_email: "admin@marketplace.local".to_string(),
        }
    }
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            gateway_url: "https://sandbox.gateway.invalid/v1".to_string(),
            gateway_api_key: String::new(),
            timeout_ms: 10_000,
            sandbox: true,
            webhook_secret: String::new(),
            currency: Currency::USD,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,project_marketplace=debug".to_string(),
            json: false,
        }
    }
}

impl PaymentsConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl AuthConfig {
    pub fn token_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.token_ttl_hours.clamp(1, MAX_TOKEN_TTL_HOURS))
    }
}

impl MarketConfig {
    /// Load configuration with layered loading: defaults → YAML file → environment variables.
    /// A missing file is not an error.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            Figment,
            providers::{Env, Format, Serialized, Yaml},
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(MarketConfig::default()))
            .merge(Yaml::file(config_path.as_ref()))
            // MARKET__PAYMENTS__TIMEOUT_MS=5000 maps to payments.timeout_ms
            .merge(Env::prefixed("MARKET__").split("__"));

        let config: MarketConfig = figment
            .extract()
            .with_context(|| "Failed to extract config from figment".to_string())?;
        config.validate()?;
        Ok(config)
    }

    /// Loads from `$MARKET_CONFIG`, falling back to the default path.
    pub fn from_env() -> Result<Self> {
        let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load_layered(&path).with_context(|| format!("loading configuration from {path}"))
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            bail!("server.port must be non-zero");
        }
        if !(1..=MAX_TOKEN_TTL_HOURS).contains(&self.auth.token_ttl_hours) {
            bail!("auth.token_ttl_hours must be between 1 and {MAX_TOKEN_TTL_HOURS}");
        }
        if self.payments.timeout_ms == 0 {
            bail!("payments.timeout_ms must be positive");
        }
        if !self.payments.sandbox && self.payments.webhook_secret.trim().is_empty() {
            bail!("payments.webhook_secret is required outside sandbox mode");
        }
        if let Some(token) = &self.auth.bootstrap_admin_token {
            if token.len() < 16 {
                bail!("auth.bootstrap_admin_token must be at least 16 characters");
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
