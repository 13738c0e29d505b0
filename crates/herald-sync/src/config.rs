//! # Engine Configuration
//!
//! Configuration management for the push engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HERALD_APP_ID=app-123                                              │
//! │     HERALD_ENDPOINT=wss://push.example.com/sync                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/herald/herald.toml (Linux)                               │
//! │     ~/Library/Application Support/com.herald.herald/herald.toml (macOS)│
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! │     analytics on, alerts off while running, 1s → 5min backoff          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [app]
//! app_id = "0c3d9f2a-app"
//! access_token = "s3cr3t"
//! analytics = true
//!
//! [sync]
//! endpoint = "wss://push.example.com/sync"
//! initial_backoff_ms = 1000
//! max_backoff_secs = 300
//!
//! [notifications]
//! show_alert_while_running = false
//!
//! [storage]
//! database_path = "/var/lib/myapp/herald.db"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use herald_core::validation::validate_app_id;

use crate::error::{HeraldError, HeraldResult};

// =============================================================================
// Application Settings
// =============================================================================

/// Application credentials and feature flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    /// Application identifier issued by the push platform.
    #[serde(default)]
    pub app_id: String,

    /// Access token for the application. Sent with every sync.
    #[serde(default)]
    pub access_token: String,

    /// Record message and session analytics facts.
    #[serde(default = "default_true")]
    pub analytics: bool,

    /// Accepted for compatibility; location services are not provided.
    #[serde(default)]
    pub location: bool,

    /// Accepted for compatibility; cloud pages are not provided.
    #[serde(default)]
    pub cloud_pages: bool,
}

impl Default for AppSettings {
    fn default() -> Self {
        AppSettings {
            app_id: String::new(),
            access_token: String::new(),
            analytics: true,
            location: false,
            cloud_pages: false,
        }
    }
}

// =============================================================================
// Sync Settings
// =============================================================================

/// Sync transport and retry settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    /// WebSocket URL of the registration service.
    /// Optional when the host supplies its own transport.
    #[serde(default)]
    pub endpoint: Option<String>,

    /// Connection timeout (seconds).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Time allowed for the server to acknowledge a snapshot (seconds).
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,

    /// Delay before the first retry (milliseconds).
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Ceiling for the retry delay (seconds).
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,

    /// Growth factor between consecutive retries.
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Jitter as a fraction of the delay (0.0 disables jitter).
    #[serde(default = "default_randomization")]
    pub randomization_factor: f64,
}

fn default_true() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_ack_timeout() -> u64 {
    15
}
fn default_initial_backoff() -> u64 {
    1000
}
fn default_max_backoff() -> u64 {
    300
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_randomization() -> f64 {
    0.2
}

impl Default for SyncSettings {
    fn default() -> Self {
        SyncSettings {
            endpoint: None,
            connect_timeout_secs: default_connect_timeout(),
            ack_timeout_secs: default_ack_timeout(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_secs: default_max_backoff(),
            multiplier: default_multiplier(),
            randomization_factor: default_randomization(),
        }
    }
}

impl SyncSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_secs(self.max_backoff_secs)
    }
}

// =============================================================================
// Notification & Storage Settings
// =============================================================================

/// Notification presentation settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationSettings {
    /// Ask the host to show an alert when a push arrives in the foreground.
    #[serde(default)]
    pub show_alert_while_running: bool,
}

/// Where engine state is persisted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite database file. Defaults to the platform data directory.
    /// `:memory:` keeps state only for the life of the process.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
}

// =============================================================================
// Main Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub app: AppSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub storage: StorageSettings,
}

impl HeraldConfig {
    /// Creates a config with the given credentials and defaults elsewhere.
    pub fn new(app_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        let mut config = Self::default();
        config.app.app_id = app_id.into();
        config.app.access_token = access_token.into();
        config
    }

    /// Sets the sync endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.sync.endpoint = Some(endpoint.into());
        self
    }

    /// Sets the database path.
    pub fn with_database_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.storage.database_path = Some(path.into());
        self
    }

    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (herald.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> HeraldResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Saves configuration to file.
    pub fn save(&self, config_path: Option<PathBuf>) -> HeraldResult<()> {
        let path = config_path
            .or_else(Self::default_config_path)
            .ok_or_else(|| HeraldError::ConfigSaveFailed("No config path available".into()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| HeraldError::ConfigSaveFailed(e.to_string()))?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| HeraldError::ConfigSaveFailed(e.to_string()))?;

        info!(?path, "Config saved");
        Ok(())
    }

    /// Validates the configuration.
    pub fn validate(&self) -> HeraldResult<()> {
        validate_app_id(&self.app.app_id)
            .map_err(|e| HeraldError::InvalidConfig(e.to_string()))?;

        if self.app.access_token.trim().is_empty() {
            return Err(HeraldError::InvalidConfig("access_token is required".into()));
        }

        if let Some(ref endpoint) = self.sync.endpoint {
            let url = url::Url::parse(endpoint)?;
            if url.scheme() != "ws" && url.scheme() != "wss" {
                return Err(HeraldError::InvalidUrl(format!(
                    "Endpoint must start with ws:// or wss://, got: {}",
                    endpoint
                )));
            }
        }

        let sync = &self.sync;
        if sync.initial_backoff_ms == 0 {
            return Err(HeraldError::InvalidConfig(
                "initial_backoff_ms must be greater than 0".into(),
            ));
        }
        if sync.max_backoff() < sync.initial_backoff() {
            return Err(HeraldError::InvalidConfig(
                "max_backoff_secs must not be below initial_backoff_ms".into(),
            ));
        }
        if sync.multiplier.is_nan() || sync.multiplier < 1.0 {
            return Err(HeraldError::InvalidConfig(
                "multiplier must be at least 1.0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&sync.randomization_factor) {
            return Err(HeraldError::InvalidConfig(
                "randomization_factor must be between 0.0 and 1.0".into(),
            ));
        }
        if sync.connect_timeout_secs == 0 || sync.ack_timeout_secs == 0 {
            return Err(HeraldError::InvalidConfig(
                "timeouts must be greater than 0".into(),
            ));
        }

        if self.app.location || self.app.cloud_pages {
            warn!("location and cloud_pages are accepted but not supported");
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup("HERALD_APP_ID") {
            debug!(app_id = %id, "Overriding app ID from environment");
            self.app.app_id = id;
        }

        if let Some(token) = lookup("HERALD_ACCESS_TOKEN") {
            self.app.access_token = token;
        }

        if let Some(url) = lookup("HERALD_ENDPOINT") {
            debug!(url = %url, "Overriding endpoint from environment");
            self.sync.endpoint = Some(url);
        }

        if let Some(path) = lookup("HERALD_DB_PATH") {
            self.storage.database_path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("HERALD_SHOW_ALERT") {
            match parse_flag(&value) {
                Some(flag) => self.notifications.show_alert_while_running = flag,
                None => warn!(value = %value, "Ignoring unparseable HERALD_SHOW_ALERT"),
            }
        }

        if let Some(value) = lookup("HERALD_ANALYTICS") {
            match parse_flag(&value) {
                Some(flag) => self.app.analytics = flag,
                None => warn!(value = %value, "Ignoring unparseable HERALD_ANALYTICS"),
            }
        }
    }

    /// Returns the default config file path.
    pub fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "herald", "herald")
            .map(|dirs| dirs.config_dir().join("herald.toml"))
    }

    /// Resolves the database path: configured value or platform data dir.
    pub fn database_path(&self) -> HeraldResult<PathBuf> {
        if let Some(ref path) = self.storage.database_path {
            return Ok(path.clone());
        }

        directories::ProjectDirs::from("com", "herald", "herald")
            .map(|dirs| dirs.data_dir().join("herald.db"))
            .ok_or_else(|| HeraldError::InvalidConfig("No data directory available".into()))
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> HeraldConfig {
        HeraldConfig::new("app-1", "token-1").with_endpoint("wss://push.example.com/sync")
    }

    #[test]
    fn test_default_values() {
        let config = HeraldConfig::new("app", "tok");
        assert!(config.app.analytics);
        assert!(!config.notifications.show_alert_while_running);
        assert_eq!(config.sync.initial_backoff(), Duration::from_secs(1));
        assert_eq!(config.sync.max_backoff(), Duration::from_secs(300));
    }

    #[test]
    fn test_config_validation() {
        assert!(valid().validate().is_ok());

        let mut config = valid();
        config.app.app_id = String::new();
        assert!(config.validate().unwrap_err().is_config_error());

        let mut config = valid();
        config.app.access_token = "  ".into();
        assert!(config.validate().is_err());

        let config = valid().with_endpoint("https://push.example.com");
        assert!(matches!(config.validate(), Err(HeraldError::InvalidUrl(_))));

        let config = valid().with_endpoint("not a url");
        assert!(matches!(config.validate(), Err(HeraldError::InvalidUrl(_))));

        let mut config = valid();
        config.sync.multiplier = 0.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.randomization_factor = 1.5;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.sync.max_backoff_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_endpoint_is_optional() {
        let mut config = valid();
        config.sync.endpoint = None;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("HERALD_APP_ID", "from-env"),
            ("HERALD_ENDPOINT", "ws://localhost:9000/sync"),
            ("HERALD_SHOW_ALERT", "yes"),
            ("HERALD_ANALYTICS", "off"),
            ("HERALD_DB_PATH", ":memory:"),
        ]
        .into_iter()
        .collect();

        let mut config = valid();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.app.app_id, "from-env");
        assert_eq!(config.sync.endpoint.as_deref(), Some("ws://localhost:9000/sync"));
        assert!(config.notifications.show_alert_while_running);
        assert!(!config.app.analytics);
        assert_eq!(config.database_path().unwrap(), PathBuf::from(":memory:"));
    }

    #[test]
    fn test_unparseable_flag_is_ignored() {
        let mut config = valid();
        config.apply_overrides(|name| (name == "HERALD_ANALYTICS").then(|| "maybe".to_string()));
        assert!(config.app.analytics);
    }

    #[test]
    fn test_toml_round_trip() {
        let config = valid();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[app]"));
        assert!(toml_str.contains("[sync]"));

        let parsed: HeraldConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.app.app_id, "app-1");
        assert_eq!(parsed.sync.endpoint, config.sync.endpoint);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: HeraldConfig = toml::from_str(
            r#"
            [app]
            app_id = "a"
            access_token = "t"
            "#,
        )
        .unwrap();

        assert!(parsed.app.analytics);
        assert_eq!(parsed.sync.multiplier, 2.0);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join(format!("herald-config-{}", std::process::id()));
        let path = dir.join("herald.toml");

        valid().save(Some(path.clone())).unwrap();
        let loaded = HeraldConfig::load(Some(path)).unwrap();
        assert_eq!(loaded.app.access_token, "token-1");

        let _ = std::fs::remove_dir_all(dir);
    }
}
