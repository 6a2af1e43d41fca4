//! Configuration management for the Warden daemon.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/warden/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("base_path must not be empty")]
    EmptyBasePath,

    #[error("listen_addr must be a socket address like 127.0.0.1:7878, got {0}")]
    InvalidListenAddr(String),

    #[error("max_connections must be between 1 and 10000, got {0}")]
    InvalidMaxConnections(usize),

    #[error("max_size must be greater than 0, got {0}")]
    InvalidMaxSize(u64),

    #[error("session_ttl must be between 60 and 2592000 seconds, got {0}")]
    InvalidSessionTtl(u64),

    #[error("admin_username must not be empty")]
    EmptyAdminUsername,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Main configuration structure for the Warden daemon.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// General daemon configuration.
    pub daemon: DaemonConfig,

    /// Listener configuration.
    pub server: ServerConfig,

    /// Base directory and transfer limits.
    pub file: FileConfig,

    /// Accounts and sessions.
    pub auth: AuthConfig,
}

/// General daemon configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Directory for daemon state (the user store).
    pub data_dir: PathBuf,

    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Also write logs to this file when set.
    pub log_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP address to accept clients on.
    pub listen_addr: String,

    /// Connections served at once; further clients wait in the backlog.
    pub max_connections: usize,

    /// Close a connection after this many idle seconds (0 = never).
    pub idle_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FileConfig {
    /// Directory all file operations are confined to. Must exist at startup.
    pub base_path: PathBuf,

    /// Maximum upload size in bytes (default: 100MB).
    pub max_size: u64,

    /// List entries whose name starts with '.'.
    pub include_hidden: bool,

    /// Sort listings directories first, then by name.
    pub sort_entries: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AuthConfig {
    /// Administrator account created on first start.
    pub admin_username: String,

    /// Initial administrator password. A random one is generated and logged
    /// when unset.
    pub admin_password: Option<String>,

    /// Session lifetime in seconds.
    pub session_ttl: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: "info".to_string(),
            log_file: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:7878".to_string(),
            max_connections: 64,
            idle_timeout: 300,
        }
    }
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            base_path: PathBuf::from("/srv/data"),
            max_size: 100 * 1024 * 1024, // 100MB
            include_hidden: true,
            sort_entries: true,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            admin_username: "admin".to_string(),
            admin_password: None,
            session_ttl: 24 * 60 * 60,
        }
    }
}

impl ServerConfig {
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout > 0).then(|| Duration::from_secs(self.idle_timeout))
    }
}

impl AuthConfig {
    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
        .join("config.toml")
}

/// Returns the default data directory path.
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("warden")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values; empty
    /// values are ignored. Supported variables:
    /// - WARDEN_BASE_PATH: Override the base directory
    /// - WARDEN_LISTEN_ADDR: Override the listen address
    /// - WARDEN_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    /// - WARDEN_ADMIN_PASSWORD: Initial administrator password
    pub fn apply_env_overrides(&mut self) {
        if let Some(path) = env_override("WARDEN_BASE_PATH") {
            tracing::info!("Overriding base_path from environment: {}", path);
            self.file.base_path = PathBuf::from(path);
        }

        if let Some(addr) = env_override("WARDEN_LISTEN_ADDR") {
            tracing::info!("Overriding listen_addr from environment: {}", addr);
            self.server.listen_addr = addr;
        }

        if let Some(level) = env_override("WARDEN_LOG_LEVEL") {
            tracing::info!("Overriding log_level from environment: {}", level);
            self.daemon.log_level = level;
        }

        if let Some(password) = env_override("WARDEN_ADMIN_PASSWORD") {
            tracing::info!("Using admin_password from environment");
            self.auth.admin_password = Some(password);
        }
    }

    /// Validate the configuration values.
    ///
    /// Existence of `base_path` is checked when the daemon starts, not here.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.file.base_path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyBasePath);
        }

        if self.listen_addr().is_err() {
            return Err(ConfigError::InvalidListenAddr(
                self.server.listen_addr.clone(),
            ));
        }

        if self.server.max_connections < 1 || self.server.max_connections > 10_000 {
            return Err(ConfigError::InvalidMaxConnections(
                self.server.max_connections,
            ));
        }

        if self.file.max_size == 0 {
            return Err(ConfigError::InvalidMaxSize(self.file.max_size));
        }

        if !(60..=30 * 24 * 60 * 60).contains(&self.auth.session_ttl) {
            return Err(ConfigError::InvalidSessionTtl(self.auth.session_ttl));
        }

        if self.auth.admin_username.trim().is_empty() {
            return Err(ConfigError::EmptyAdminUsername);
        }

        let level = self.daemon.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.daemon.log_level.clone()));
        }

        Ok(())
    }

    /// Parsed `server.listen_addr`.
    pub fn listen_addr(&self) -> Result<SocketAddr, std::net::AddrParseError> {
        self.server.listen_addr.parse()
    }

    /// Location of the JSON user store.
    pub fn users_path(&self) -> PathBuf {
        self.daemon.data_dir.join("users.json")
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

fn env_override(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    const ENV_VARS: &[&str] = &[
        "WARDEN_BASE_PATH",
        "WARDEN_LISTEN_ADDR",
        "WARDEN_LOG_LEVEL",
        "WARDEN_ADMIN_PASSWORD",
    ];

    fn clear_env() {
        for var in ENV_VARS {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.daemon.log_level, "info");
        assert!(config.daemon.log_file.is_none());
        assert_eq!(config.server.listen_addr, "127.0.0.1:7878");
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.file.base_path, PathBuf::from("/srv/data"));
        assert_eq!(config.file.max_size, 100 * 1024 * 1024);
        assert!(config.file.include_hidden);
        assert!(config.file.sort_entries);
        assert_eq!(config.auth.admin_username, "admin");
        assert!(config.auth.admin_password.is_none());
        assert_eq!(config.auth.session_ttl(), Duration::from_secs(86_400));
    }

    #[test]
    fn test_default_paths() {
        let config = Config::default();
        assert!(config.daemon.data_dir.to_string_lossy().contains("warden"));
        assert!(config.users_path().ends_with("warden/users.json"));

        let path = default_config_path();
        assert!(path.ends_with("warden/config.toml"));
    }

    #[test]
    fn test_from_toml_empty() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[file]
base_path = "/srv/share"

[auth]
session_ttl = 600
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.file.base_path, PathBuf::from("/srv/share"));
        assert_eq!(config.auth.session_ttl, 600);
        assert_eq!(config.server, ServerConfig::default());
        assert_eq!(config.file.max_size, FileConfig::default().max_size);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[daemon]
data_dir = "/var/lib/warden"
log_level = "debug"
log_file = "/var/log/warden.log"

[server]
listen_addr = "0.0.0.0:9000"
max_connections = 8
idle_timeout = 0

[file]
base_path = "/srv/data"
max_size = 1048576
include_hidden = false
sort_entries = false

[auth]
admin_username = "root"
admin_password = "hunter2"
session_ttl = 3600
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.daemon.data_dir, PathBuf::from("/var/lib/warden"));
        assert_eq!(
            config.daemon.log_file,
            Some(PathBuf::from("/var/log/warden.log"))
        );
        assert_eq!(config.listen_addr().unwrap().port(), 9000);
        assert_eq!(config.server.max_connections, 8);
        assert_eq!(config.server.idle_timeout(), None);
        assert_eq!(config.file.max_size, 1_048_576);
        assert!(!config.file.include_hidden);
        assert!(!config.file.sort_entries);
        assert_eq!(config.auth.admin_username, "root");
        assert_eq!(config.auth.admin_password.as_deref(), Some("hunter2"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let result = Config::from_toml("[daemon\nlog_level = \"debug\"\n");
        let err = result.unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
max_connections = "many"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip_custom() {
        let mut original = Config::default();
        original.daemon.log_file = Some(PathBuf::from("/tmp/w.log"));
        original.file.include_hidden = false;
        original.auth.admin_password = Some("secret".to_string());

        let loaded = Config::from_toml(&original.to_toml().unwrap()).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_to_toml_sections() {
        let toml = Config::default().to_toml().unwrap();
        for section in ["[daemon]", "[server]", "[file]", "[auth]"] {
            assert!(toml.contains(section), "missing {section}");
        }
    }

    #[test]
    fn test_load_missing_file() {
        let config = Config::load("/nonexistent/path/config.toml").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nested").join("config.toml");

        let mut original = Config::default();
        original.file.base_path = temp_dir.path().to_path_buf();
        original.server.max_connections = 3;

        original.save(&config_path).unwrap();
        let loaded = Config::load(&config_path).unwrap();

        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");
        fs::write(&config_path, "invalid [ toml").unwrap();

        let err = Config::load(&config_path).unwrap_err().to_string();
        assert!(err.contains("Failed to parse config file"));
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        std::env::set_var("WARDEN_BASE_PATH", "/mnt/share");
        std::env::set_var("WARDEN_LISTEN_ADDR", "0.0.0.0:1234");
        std::env::set_var("WARDEN_LOG_LEVEL", "debug");
        std::env::set_var("WARDEN_ADMIN_PASSWORD", "from-env");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.file.base_path, PathBuf::from("/mnt/share"));
        assert_eq!(config.server.listen_addr, "0.0.0.0:1234");
        assert_eq!(config.daemon.log_level, "debug");
        assert_eq!(config.auth.admin_password.as_deref(), Some("from-env"));

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        for var in ENV_VARS {
            std::env::set_var(var, "");
        }

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_unset_does_not_override() {
        clear_env();

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_base_path() {
        let mut config = Config::default();
        config.file.base_path = PathBuf::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyBasePath));
    }

    #[test]
    fn test_validate_listen_addr() {
        let mut config = Config::default();
        config.server.listen_addr = "localhost".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr("localhost".to_string()))
        );

        config.server.listen_addr = "[::1]:0".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_connections() {
        let mut config = Config::default();
        config.server.max_connections = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidMaxConnections(0))
        );

        config.server.max_connections = 1;
        assert!(config.validate().is_ok());
        config.server.max_connections = 10_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_max_size_zero() {
        let mut config = Config::default();
        config.file.max_size = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxSize(0)));
    }

    #[test]
    fn test_validate_session_ttl_bounds() {
        let mut config = Config::default();

        config.auth.session_ttl = 59;
        assert_eq!(config.validate(), Err(ConfigError::InvalidSessionTtl(59)));

        config.auth.session_ttl = 60;
        assert!(config.validate().is_ok());

        config.auth.session_ttl = 30 * 24 * 60 * 60 + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_admin_username() {
        let mut config = Config::default();
        config.auth.admin_username = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyAdminUsername));
    }

    #[test]
    fn test_validate_log_level() {
        let mut config = Config::default();

        for level in ["trace", "DEBUG", "Info", "warn", "error"] {
            config.daemon.log_level = level.to_string();
            assert!(config.validate().is_ok(), "level {level}");
        }

        config.daemon.log_level = "warning".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("warning".to_string()))
        );
    }
}
