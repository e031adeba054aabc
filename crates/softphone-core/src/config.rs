//! Configuration for softphone-core
//!
//! Configuration is read at startup and again only when the frontend sends an
//! explicit `ConfigChanged` command; nothing polls the store.
//!
//! ```toml
//! default_account = "alice"
//! layout_mode = "expanded"
//!
//! [engine]
//! config_path = "/data/softphonerc"
//!
//! [auto_answer]
//! enabled = true
//! delay_ms = 2000
//!
//! [push]
//! enabled = true
//! app_id = "org.example.softphone"
//!
//! [[accounts]]
//! id = "alice"
//! push_allowed = true
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SoftphoneError, SoftphoneResult};
use crate::navigation::LayoutMode;
use crate::registration::AccountId;

/// Longest accepted auto-answer delay
pub const MAX_AUTO_ANSWER_DELAY_MS: u64 = 60 * 60 * 1000;

/// Default period of the engine iterate ticker
pub const DEFAULT_TICKER_PERIOD_MS: u64 = 20;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftphoneConfig {
    pub engine: EngineConfig,
    pub auto_answer: AutoAnswerConfig,
    /// Accept remote video requests without asking the user
    pub auto_accept_video: bool,
    /// Keep ringing while an incoming call plays early media
    pub ring_during_early_media: bool,
    pub layout_mode: LayoutMode,
    pub push: PushConfig,
    pub accounts: Vec<AccountConfig>,
    /// Account whose registration drives the service status
    pub default_account: Option<AccountId>,
    pub ticker_period_ms: u64,
}

/// Native engine configuration files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// User configuration file, required to start the engine
    pub config_path: Option<PathBuf>,
    /// Read-only factory defaults
    pub factory_config_path: Option<PathBuf>,
}

/// Auto-answer configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoAnswerConfig {
    pub enabled: bool,
    pub delay_ms: u64,
}

/// Push notification configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PushConfig {
    pub enabled: bool,
    /// Application id registered with the push provider
    pub app_id: Option<String>,
    /// Push provider name sent as `pn-type`
    pub push_type: String,
}

/// One SIP account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: AccountId,
    /// Whether this account may be woken by push
    #[serde(default)]
    pub push_allowed: bool,
}

impl Default for SoftphoneConfig {
    fn default() -> Self {
        Self {
            engine: EngineConfig::default(),
            auto_answer: AutoAnswerConfig::default(),
            auto_accept_video: false,
            ring_during_early_media: false,
            layout_mode: LayoutMode::Compact,
            push: PushConfig::default(),
            accounts: Vec::new(),
            default_account: None,
            ticker_period_ms: DEFAULT_TICKER_PERIOD_MS,
        }
    }
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            app_id: None,
            push_type: "firebase".to_string(),
        }
    }
}

impl SoftphoneConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(input: &str) -> SoftphoneResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> SoftphoneResult<()> {
        let mut seen = std::collections::HashSet::new();
        for account in &self.accounts {
            if !seen.insert(account.id.as_str()) {
                return Err(SoftphoneError::config(format!("Duplicate account id: {}", account.id)));
            }
        }
        if let Some(default) = &self.default_account {
            if !seen.contains(default.as_str()) {
                return Err(SoftphoneError::config(format!("Unknown default account: {default}")));
            }
        }
        if self.ticker_period_ms == 0 {
            return Err(SoftphoneError::config("ticker_period_ms must be greater than zero"));
        }
        if self.auto_answer.delay_ms > MAX_AUTO_ANSWER_DELAY_MS {
            return Err(SoftphoneError::config(format!(
                "auto_answer.delay_ms {} exceeds {MAX_AUTO_ANSWER_DELAY_MS}",
                self.auto_answer.delay_ms
            )));
        }
        Ok(())
    }

    /// Auto-answer delay, `None` when disabled
    pub fn auto_answer_delay(&self) -> Option<Duration> {
        self.auto_answer
            .enabled
            .then(|| Duration::from_millis(self.auto_answer.delay_ms))
    }

    pub fn ticker_period(&self) -> Duration {
        Duration::from_millis(self.ticker_period_ms)
    }

    /// Explicit default account, or the first configured one
    pub fn default_account_id(&self) -> Option<&str> {
        self.default_account
            .as_deref()
            .or_else(|| self.accounts.first().map(|a| a.id.as_str()))
    }
}

/// Read-only source of [`SoftphoneConfig`]
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> SoftphoneResult<SoftphoneConfig>;
}

/// TOML file overlaid with `SOFTPHONE__*` environment variables
///
/// `SOFTPHONE__AUTO_ANSWER__DELAY_MS=500` overrides `auto_answer.delay_ms`.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
}

impl FileConfigSource {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> SoftphoneResult<SoftphoneConfig> {
        let settings = config::Config::builder()
            .add_source(config::File::from(self.path.as_path()).format(config::FileFormat::Toml))
            .add_source(
                config::Environment::with_prefix("SOFTPHONE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: SoftphoneConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }
}

/// In-memory configuration
#[derive(Debug, Clone, Default)]
pub struct StaticConfigSource {
    config: SoftphoneConfig,
}

impl StaticConfigSource {
    pub fn new(config: SoftphoneConfig) -> Self {
        Self { config }
    }
}

impl ConfigSource for StaticConfigSource {
    fn load(&self) -> SoftphoneResult<SoftphoneConfig> {
        self.config.validate()?;
        Ok(self.config.clone())
    }
}
