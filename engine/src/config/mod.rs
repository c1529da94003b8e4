//! Configuration management
//!
//! This module handles loading, validation, and management of the Switchboard
//! configuration. Configuration is stored in TOML format at
//! ~/.switchboard/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, data directory
//! - **server**: Listen address and shared token
//! - **workspaces**: Default dispatch targets
//! - **context**: Persisted attribute allow-list and fallback reply
//! - **session**: Session cache backend and TTL
//! - **store**: Durable store location
//! - **backend**: Dialogue backend defaults
//! - **action**: Action capability base URL
//! - **arbiter**: Arbitration bias constants
//! - **channel**: Channel adaptor credentials
//!
//! # Examples
//!
//! ```no_run
//! use switchboard_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//!
//! println!("Listening on {}", config.server.bind);
//! println!("Workspaces: {}", config.workspaces.len());
//! # Ok(())
//! # }
//! ```

use regex::Regex;
use sdk::errors::RouterError;
use sdk::types::WorkspaceDescriptor;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Core settings
    pub core: CoreConfig,

    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Default dispatch targets
    #[serde(default)]
    pub workspaces: Vec<WorkspaceConfig>,

    /// Context persistence settings
    #[serde(default)]
    pub context: ContextConfig,

    /// Session cache settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Durable store settings
    #[serde(default)]
    pub store: StoreConfig,

    /// Dialogue backend settings
    #[serde(default)]
    pub backend: BackendConfig,

    /// Action capability settings
    #[serde(default)]
    pub action: ActionConfig,

    /// Arbitration constants
    #[serde(default)]
    pub arbiter: ArbiterConfig,

    /// Channel adaptor settings (optional)
    #[serde(default)]
    pub channel: ChannelConfig,
}

/// Core configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Data directory path (supports ~ expansion)
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// Inline shared token. Prefer `token_ref`.
    #[serde(default)]
    pub token: Option<String>,

    /// Credential key holding the shared token
    #[serde(default = "default_token_ref")]
    pub token_ref: String,
}

/// A configured dialogue workspace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    /// Unique name, part of the per-user session key
    pub name: String,

    /// Backend workspace identifier
    pub workspace_id: String,

    /// Credential key used to reach the backend
    pub credential_ref: String,

    /// Replies may spawn tracked sub-conversations
    #[serde(default)]
    pub recursive: bool,
}

impl WorkspaceConfig {
    pub fn descriptor(&self) -> WorkspaceDescriptor {
        WorkspaceDescriptor {
            name: self.name.clone(),
            workspace_id: self.workspace_id.clone(),
            credential_ref: self.credential_ref.clone(),
            recursive: self.recursive,
        }
    }
}

/// Context persistence configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Attributes persisted in the durable user record
    #[serde(default)]
    pub persisted_attributes: Vec<String>,

    /// Reply lines used when no backend produced an output
    #[serde(default)]
    pub fallback_reply: Vec<String>,
}

/// Session cache backend kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionBackend {
    #[default]
    Memory,
    Redis,
}

/// Session cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub backend: SessionBackend,

    /// Redis connection URL (redis backend only)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Entry lifetime in seconds
    #[serde(default = "default_session_ttl")]
    pub ttl_secs: u64,
}

/// Durable store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite file, relative to the data directory unless absolute
    #[serde(default = "default_db_file")]
    pub db_file: PathBuf,
}

/// Dialogue backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL for credentials that do not carry their own
    #[serde(default = "default_backend_base_url")]
    pub base_url: String,

    /// Per-call timeout
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
}

/// Action capability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    /// Prefix the action directive is appended to. Actions are skipped when unset.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default = "default_action_timeout")]
    pub timeout_secs: u64,
}

/// Arbitration constants
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbiterConfig {
    /// Bonus for the output coming from the last used target
    #[serde(default = "default_stickiness_bias")]
    pub stickiness_bias: f64,

    /// Penalty for the last output in dispatch order
    #[serde(default = "default_last_dispatched_penalty")]
    pub last_dispatched_penalty: f64,
}

/// Channel adaptor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Platform service URL replies are posted under; enables the channel route
    #[serde(default)]
    pub service_url: Option<String>,

    /// Credential key holding the secret inbound events must present
    #[serde(default = "default_verification_secret_ref")]
    pub verification_secret_ref: String,

    /// OAuth token endpoint for reply credentials
    #[serde(default)]
    pub token_url: Option<String>,

    #[serde(default)]
    pub client_id: Option<String>,

    /// Credential key holding the client secret
    #[serde(default = "default_client_secret_ref")]
    pub client_secret_ref: String,

    #[serde(default)]
    pub scope: Option<String>,

    /// Bearer credential lifetime in seconds; 0 disables caching
    #[serde(default)]
    pub credential_cache_secs: u64,

    /// Context attribute holding the channel user id
    #[serde(default = "default_lookup_attribute")]
    pub lookup_attribute: String,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("~/.switchboard")
}

fn default_bind() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_token_ref() -> String {
    "converse_token".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1/".to_string()
}

fn default_session_ttl() -> u64 {
    crate::session::DEFAULT_SESSION_TTL.as_secs()
}

fn default_db_file() -> PathBuf {
    PathBuf::from("switchboard.db")
}

fn default_backend_base_url() -> String {
    "http://localhost:9443/api".to_string()
}

fn default_backend_timeout() -> u64 {
    30
}

fn default_action_timeout() -> u64 {
    15
}

fn default_stickiness_bias() -> f64 {
    0.11
}

fn default_last_dispatched_penalty() -> f64 {
    0.03
}

fn default_client_secret_ref() -> String {
    "channel_client_secret".to_string()
}

fn default_verification_secret_ref() -> String {
    "channel_verification_secret".to_string()
}

fn default_lookup_attribute() -> String {
    "channel_user_id".to_string()
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            token: None,
            token_ref: default_token_ref(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            backend: SessionBackend::Memory,
            redis_url: default_redis_url(),
            ttl_secs: default_session_ttl(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_file: default_db_file(),
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_base_url(),
            timeout_secs: default_backend_timeout(),
        }
    }
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_action_timeout(),
        }
    }
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self {
            stickiness_bias: default_stickiness_bias(),
            last_dispatched_penalty: default_last_dispatched_penalty(),
        }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            service_url: None,
            verification_secret_ref: default_verification_secret_ref(),
            token_url: None,
            client_id: None,
            client_secret_ref: default_client_secret_ref(),
            scope: None,
            credential_cache_secs: 0,
            lookup_attribute: default_lookup_attribute(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.switchboard/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails
    pub fn load_or_create() -> Result<Self, RouterError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, RouterError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| RouterError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&contents)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(contents: &str) -> Result<Self, RouterError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| RouterError::Config(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    /// Create default configuration and save to path
    fn create_default(path: &Path) -> Result<Self, RouterError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                RouterError::Config(format!("Failed to create config directory: {}", e))
            })?;
        }

        let mut config = Self::default_config();
        config.validate_and_process()?;

        let toml_string = toml::to_string_pretty(&config)
            .map_err(|e| RouterError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| RouterError::Config(format!("Failed to write config file: {}", e)))?;

        Ok(config)
    }

    /// Get the default configuration file path (~/.switchboard/config.toml)
    fn default_config_path() -> Result<PathBuf, RouterError> {
        let home = dirs::home_dir()
            .ok_or_else(|| RouterError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(".switchboard").join("config.toml"))
    }

    /// Create a default configuration
    pub fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            server: ServerConfig::default(),
            workspaces: Vec::new(),
            context: ContextConfig::default(),
            session: SessionConfig::default(),
            store: StoreConfig::default(),
            backend: BackendConfig::default(),
            action: ActionConfig::default(),
            arbiter: ArbiterConfig::default(),
            channel: ChannelConfig::default(),
        }
    }

    /// Descriptors of every configured workspace, in configuration order
    pub fn workspace_descriptors(&self) -> Vec<WorkspaceDescriptor> {
        self.workspaces.iter().map(WorkspaceConfig::descriptor).collect()
    }

    /// Absolute path of the durable store file
    pub fn db_path(&self) -> PathBuf {
        if self.store.db_file.is_absolute() {
            self.store.db_file.clone()
        } else {
            self.core.data_dir.join(&self.store.db_file)
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates log level, TTL and arbiter constants
    /// - Checks workspace names are present and unique
    /// - Checks persisted attribute names can be used as lookup views
    /// - Expands ~ in the data directory and creates it
    fn validate_and_process(&mut self) -> Result<(), RouterError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(RouterError::Config(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.session.ttl_secs == 0 {
            return Err(RouterError::Config(
                "session.ttl_secs must be greater than 0".to_string(),
            ));
        }

        if !self.arbiter.stickiness_bias.is_finite()
            || !self.arbiter.last_dispatched_penalty.is_finite()
        {
            return Err(RouterError::Config(
                "arbiter constants must be finite numbers".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for ws in &self.workspaces {
            if ws.name.trim().is_empty() || ws.workspace_id.trim().is_empty() {
                return Err(RouterError::Config(
                    "workspaces need a non-empty name and workspace_id".to_string(),
                ));
            }
            if !seen.insert(ws.name.as_str()) {
                return Err(RouterError::Config(format!(
                    "Duplicate workspace name '{}'",
                    ws.name
                )));
            }
        }

        for (name, url) in [
            ("channel.service_url", &self.channel.service_url),
            ("channel.token_url", &self.channel.token_url),
        ] {
            if let Some(url) = url {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    return Err(RouterError::Config(format!(
                        "{} must be an http(s) URL, got '{}'",
                        name, url
                    )));
                }
            }
        }

        let attribute = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid attribute pattern");
        for attr in self
            .context
            .persisted_attributes
            .iter()
            .chain(std::iter::once(&self.channel.lookup_attribute))
        {
            if !attribute.is_match(attr) {
                return Err(RouterError::Config(format!(
                    "Invalid context attribute name '{}'",
                    attr
                )));
            }
        }

        self.core.data_dir = expand_path(&self.core.data_dir)?;
        if !self.core.data_dir.exists() {
            fs::create_dir_all(&self.core.data_dir).map_err(|e| {
                RouterError::Config(format!("Failed to create data directory: {}", e))
            })?;
        }

        Ok(())
    }
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, RouterError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| RouterError::Config("Invalid UTF-8 in path".to_string()))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| RouterError::Config("Could not determine home directory".to_string()))?;

        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir()
            .ok_or_else(|| RouterError::Config("Could not determine home directory".to_string()))
    } else {
        Ok(path.to_path_buf())
    }
}
