//! Service configuration, loaded from environment variables with
//! sensible defaults (layered env > defaults; a config file layer can be
//! added later without changing call sites, since everything flows
//! through the `config` crate's `Config` builder).

use std::path::PathBuf;

use config::{Config, Environment};
use serde::Deserialize;
use trust_core::constants::MIN_ADMIN_KEY_LEN;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("admin key must be at least {MIN_ADMIN_KEY_LEN} characters in production")]
    AdminKeyTooShort,
    #[error("facilitator address is required when publishing is enabled")]
    MissingFacilitatorAddress,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Root directory for persistent data (SQLite file, indexer checkpoints).
    pub data_dir: PathBuf,
    /// JSON-RPC endpoint of the L2 chain.
    pub rpc_url: String,
    /// Facilitator (paywall) base URL this service's HTTP layer proxies for.
    pub facilitator_url: Option<String>,
    /// Wallet address the reputation publisher signs transactions as.
    pub facilitator_address: Option<String>,
    /// Bearer token for the optional code-host enrichment client.
    pub code_host_token: Option<String>,
    /// Shared secret gating administrative endpoints; required length
    /// is enforced only outside development mode.
    pub admin_key: Option<String>,
    /// `true` in local/dev runs, relaxes the admin-key length check.
    pub development_mode: bool,
    /// Whether the reputation publisher job is enabled at all.
    pub publishing_enabled: bool,
    /// Whether the webhook delivery job is enabled at all.
    pub webhooks_enabled: bool,
    /// Log level filter string (e.g. "info", "trust_engine=debug").
    pub log_level: String,
    /// Emit structured JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("trustmesh");
        Self {
            data_dir,
            rpc_url: "http://127.0.0.1:8545".to_string(),
            facilitator_url: None,
            facilitator_address: None,
            code_host_token: None,
            admin_key: None,
            development_mode: true,
            publishing_enabled: false,
            webhooks_enabled: true,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl ServiceConfig {
    /// Path to the SQLite database file under `data_dir`.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("trust.sqlite3")
    }

    /// Load configuration from environment variables prefixed `TRUST_`,
    /// layered over [`ServiceConfig::default`], then validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ServiceConfig::default();
        let built = Config::builder()
            .set_default("data_dir", defaults.data_dir.to_string_lossy().to_string())?
            .set_default("rpc_url", defaults.rpc_url.clone())?
            .set_default("development_mode", defaults.development_mode)?
            .set_default("publishing_enabled", defaults.publishing_enabled)?
            .set_default("webhooks_enabled", defaults.webhooks_enabled)?
            .set_default("log_level", defaults.log_level.clone())?
            .set_default("log_json", defaults.log_json)?
            .add_source(Environment::with_prefix("TRUST").try_parsing(true))
            .build()?;

        let cfg: ServiceConfig = built.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !self.development_mode {
            match &self.admin_key {
                Some(key) if key.len() >= MIN_ADMIN_KEY_LEN => {}
                _ => return Err(ConfigError::AdminKeyTooShort),
            }
        }
        if self.publishing_enabled && self.facilitator_address.is_none() {
            return Err(ConfigError::MissingFacilitatorAddress);
        }
        Ok(())
    }
}
