use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::platform;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

/// Where the station backend lives and how to authenticate against it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Session token handed over by the login flow.  Empty until set.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

/// Timing knobs for the sync engine.  All values are milliseconds unless the
/// name says otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Progress interpolation tick.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    /// Minimum time a control stays busy after its request settles.
    #[serde(default = "default_command_cooldown_ms")]
    pub command_cooldown_ms: u64,
    /// Quiet window before an equalizer change is sent.
    #[serde(default = "default_eq_debounce_ms")]
    pub eq_debounce_ms: u64,
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,
    #[serde(default = "default_bot_status_interval_secs")]
    pub bot_status_interval_secs: u64,
    /// Delay before re-pulling the snapshot after a successful `play`
    /// (resolving a search takes the backend a few seconds).
    #[serde(default = "default_play_resync_ms")]
    pub play_resync_ms: u64,
}

impl SyncConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(10))
    }

    pub fn command_cooldown(&self) -> Duration {
        Duration::from_millis(self.command_cooldown_ms)
    }

    pub fn eq_debounce(&self) -> Duration {
        Duration::from_millis(self.eq_debounce_ms)
    }

    pub fn reconnect_base(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_ms)
    }

    pub fn reconnect_max(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_ms)
    }

    pub fn bot_status_interval(&self) -> Duration {
        Duration::from_secs(self.bot_status_interval_secs.max(1))
    }

    pub fn play_resync(&self) -> Duration {
        Duration::from_millis(self.play_resync_ms)
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            token: String::new(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            command_cooldown_ms: default_command_cooldown_ms(),
            eq_debounce_ms: default_eq_debounce_ms(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            bot_status_interval_secs: default_bot_status_interval_secs(),
            play_resync_ms: default_play_resync_ms(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_tick_interval_ms() -> u64 {
    100
}

fn default_command_cooldown_ms() -> u64 {
    500
}

fn default_eq_debounce_ms() -> u64 {
    500
}

fn default_reconnect_base_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_bot_status_interval_secs() -> u64 {
    5
}

fn default_play_resync_ms() -> u64 {
    5_000
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let content = std::fs::read_to_string(&config_path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        Ok(config)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        platform::config_dir().join("config.toml")
    }
}
