use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::backend::fs::{atomic_write, set_owner_only};
use crate::daemon::DaemonSettings;
use crate::limits::record::{MAX_LIMIT_MINUTES, MIN_LIMIT_MINUTES};
use crate::limits::tracker::TrackerSettings;
use crate::site::{SiteMatcher, default_restricted_hosts};

const APP_NAME: &str = "yt-limiter";

/// Limiter configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LimiterConfig {
    pub account: AccountConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The local account whose usage is limited
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AccountConfig {
    pub user_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Where records and history are kept; platform data dir when unset
#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub records_path: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub history_path: Option<PathBuf>,
}

/// Timer periods and failure thresholds (seconds)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct MonitorConfig {
    /// How often the block status is re-evaluated
    #[serde(default = "default_status_poll")]
    pub status_poll_secs: u64,

    /// How often usage is accrued and saved while a session is open
    #[serde(default = "default_accrual_flush")]
    pub accrual_flush_secs: u64,

    /// How often an open site window is checked for closure
    #[serde(default = "default_liveness_poll")]
    pub liveness_poll_secs: u64,

    /// Failed saves in a row before the user is told
    #[serde(default = "default_max_flush_failures")]
    pub max_flush_failures: u32,

    /// Delay between attempts to load an unavailable usage record
    #[serde(default = "default_load_retry")]
    pub load_retry_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LimitsConfig {
    /// Limit for newly created records
    #[serde(default = "default_daily_limit_minutes")]
    pub default_daily_limit_minutes: i64,

    #[serde(default = "default_restricted_hosts")]
    pub restricted_hosts: Vec<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

// Default values
fn default_status_poll() -> u64 {
    1
}

fn default_accrual_flush() -> u64 {
    5
}

fn default_liveness_poll() -> u64 {
    1
}

fn default_max_flush_failures() -> u32 {
    3
}

fn default_load_retry() -> u64 {
    5
}

fn default_daily_limit_minutes() -> i64 {
    120
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            status_poll_secs: default_status_poll(),
            accrual_flush_secs: default_accrual_flush(),
            liveness_poll_secs: default_liveness_poll(),
            max_flush_failures: default_max_flush_failures(),
            load_retry_secs: default_load_retry(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            default_daily_limit_minutes: default_daily_limit_minutes(),
            restricted_hosts: default_restricted_hosts(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

impl LimiterConfig {
    /// Configuration for one account with every other setting at its default
    pub fn new(user_id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            account: AccountConfig {
                user_id: user_id.into(),
                email,
            },
            storage: StorageConfig::default(),
            monitor: MonitorConfig::default(),
            limits: LimitsConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: LimiterConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Save configuration to file, readable by its owner only
    pub fn save(&self, path: &Path) -> Result<()> {
        self.validate()?;

        let toml = toml::to_string_pretty(self).context("Failed to serialize config")?;

        atomic_write(path, toml.as_bytes())
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        set_owner_only(path)?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.account.user_id.trim().is_empty() {
            anyhow::bail!("account.user_id cannot be empty");
        }

        if let Some(email) = &self.account.email {
            if !email.contains('@') {
                anyhow::bail!("account.email is not an email address: {}", email);
            }
        }

        let periods = [
            ("monitor.status_poll_secs", self.monitor.status_poll_secs),
            ("monitor.accrual_flush_secs", self.monitor.accrual_flush_secs),
            ("monitor.liveness_poll_secs", self.monitor.liveness_poll_secs),
            ("monitor.load_retry_secs", self.monitor.load_retry_secs),
        ];
        for (name, secs) in periods {
            if secs == 0 {
                anyhow::bail!("{} must be at least 1 second", name);
            }
        }

        if self.monitor.max_flush_failures == 0 {
            anyhow::bail!("monitor.max_flush_failures must be at least 1");
        }

        let limit = self.limits.default_daily_limit_minutes;
        if !(MIN_LIMIT_MINUTES..=MAX_LIMIT_MINUTES).contains(&limit) {
            anyhow::bail!(
                "limits.default_daily_limit_minutes must be between {} and {} (got: {})",
                MIN_LIMIT_MINUTES,
                MAX_LIMIT_MINUTES,
                limit
            );
        }

        if self.site_matcher().hosts().is_empty() {
            anyhow::bail!("limits.restricted_hosts must name at least one host");
        }

        if !matches!(
            self.logging.level.to_lowercase().as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            anyhow::bail!("Invalid logging.level: {}", self.logging.level);
        }

        Ok(())
    }

    pub fn records_path(&self) -> Result<PathBuf> {
        match &self.storage.records_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("records.json")),
        }
    }

    pub fn history_path(&self) -> Result<PathBuf> {
        match &self.storage.history_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_data_dir()?.join("history.json")),
        }
    }

    pub fn default_limit_seconds(&self) -> u64 {
        self.limits.default_daily_limit_minutes.clamp(MIN_LIMIT_MINUTES, MAX_LIMIT_MINUTES) as u64 * 60
    }

    pub fn site_matcher(&self) -> SiteMatcher {
        SiteMatcher::new(&self.limits.restricted_hosts)
    }

    pub fn tracker_settings(&self) -> TrackerSettings {
        TrackerSettings {
            status_poll: Duration::from_secs(self.monitor.status_poll_secs),
            accrual_flush: Duration::from_secs(self.monitor.accrual_flush_secs),
            liveness_poll: Duration::from_secs(self.monitor.liveness_poll_secs),
        }
    }

    pub fn daemon_settings(&self) -> DaemonSettings {
        DaemonSettings {
            tracker: self.tracker_settings(),
            max_flush_failures: self.monitor.max_flush_failures,
            load_retry: Duration::from_secs(self.monitor.load_retry_secs),
            default_limit_seconds: self.default_limit_seconds(),
            matcher: self.site_matcher(),
        }
    }
}

/// Per-user config file location
pub fn get_config_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)
        .context("Could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

/// Per-user data directory for records and history
pub fn get_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_NAME)
        .context("Could not determine data directory")?;
    Ok(dirs.data_local_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn minimal_config_uses_defaults() {
        let config: LimiterConfig = toml::from_str(
            r#"
            [account]
            user_id = "kid"
            "#,
        )
        .unwrap();

        assert_eq!(config.account.user_id, "kid");
        assert_eq!(config.account.email, None);
        assert_eq!(config.monitor, MonitorConfig::default());
        assert_eq!(config.limits.default_daily_limit_minutes, 120);
        assert_eq!(config.limits.restricted_hosts, vec!["youtube.com", "youtu.be"]);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn monitor_defaults() {
        let settings = LimiterConfig::new("kid", None).tracker_settings();
        assert_eq!(settings, TrackerSettings::default());

        let monitor = MonitorConfig::default();
        assert_eq!(monitor.max_flush_failures, 3);
        assert_eq!(monitor.load_retry_secs, 5);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("yt-limiter").join("config.toml");

        let mut config = LimiterConfig::new("kid", Some("kid@example.com".to_string()));
        config.limits.default_daily_limit_minutes = 45;
        config.storage.records_path = Some(dir.path().join("records.json"));
        config.save(&path).unwrap();

        let loaded = LimiterConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.default_limit_seconds(), 2700);
        assert_eq!(loaded.records_path().unwrap(), dir.path().join("records.json"));
    }

    #[test]
    fn rejects_out_of_range_default_limit() {
        let mut config = LimiterConfig::new("kid", None);
        config.limits.default_daily_limit_minutes = 0;
        assert!(config.validate().is_err());

        config.limits.default_daily_limit_minutes = 1441;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_periods() {
        let mut config = LimiterConfig::new("kid", None);
        config.monitor.accrual_flush_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("accrual_flush_secs"));
    }

    #[test]
    fn rejects_bad_account_and_logging() {
        assert!(LimiterConfig::new(" ", None).validate().is_err());
        assert!(LimiterConfig::new("kid", Some("nope".to_string())).validate().is_err());

        let mut config = LimiterConfig::new("kid", None);
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::new("kid", None);
        config.limits.restricted_hosts = vec![" ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn load_reports_parse_errors_with_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not = [valid").unwrap();

        let err = LimiterConfig::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn daemon_settings_follow_config() {
        let mut config = LimiterConfig::new("kid", None);
        config.monitor.load_retry_secs = 30;
        config.limits.restricted_hosts = vec!["example.com".to_string()];

        let settings = config.daemon_settings();
        assert_eq!(settings.load_retry, Duration::from_secs(30));
        assert_eq!(settings.default_limit_seconds, 7200);
        assert!(settings.matcher.is_restricted("https://www.example.com/"));
        assert!(!settings.matcher.is_restricted("https://youtube.com/"));
    }
}
