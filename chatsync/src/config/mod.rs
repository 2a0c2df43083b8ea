//! Configuration system for the `ChatSync` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::chat::SyncConfig;
use crate::transport::ReconnectPolicy;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// A setting needed to go online is not set anywhere.
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    server: ServerFileConfig,
    session: SessionFileConfig,
    transport: TransportFileConfig,
    chat: ChatFileConfig,
}

/// `[server]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    api_url: Option<String>,
    socket_url: Option<String>,
    request_timeout_secs: Option<u64>,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    other_user: Option<String>,
}

/// `[transport]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TransportFileConfig {
    reconnect_attempts: Option<u32>,
    reconnect_delay_ms: Option<u64>,
}

/// `[chat]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ChatFileConfig {
    send_timeout_secs: Option<u64>,
    failure_grace_ms: Option<u64>,
    retry_settle_ms: Option<u64>,
    echo_window_secs: Option<u64>,
    event_buffer: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Server --
    /// Base URL of the REST API.
    pub api_url: Option<String>,
    /// WebSocket URL.
    pub socket_url: Option<String>,
    /// Timeout applied to every REST request.
    pub request_timeout: Duration,

    // -- Session --
    /// Bearer token (CLI/env only, never read from the file).
    pub token: Option<String>,
    /// The logged-in user.
    pub user_id: Option<String>,
    /// The conversation partner to open.
    pub other_user: Option<String>,

    // -- Transport --
    /// Socket reconnection policy.
    pub reconnect: ReconnectPolicy,

    // -- Chat --
    /// Send pipeline and retry timings.
    pub sync: SyncConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_url: None,
            socket_url: None,
            request_timeout: Duration::from_secs(10),
            token: None,
            user_id: None,
            other_user: None,
            reconnect: ReconnectPolicy::default(),
            sync: SyncConfig::default(),
        }
    }
}

/// Everything needed to log in and open a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    /// Base URL of the REST API.
    pub api_url: String,
    /// WebSocket URL.
    pub socket_url: String,
    /// Bearer token.
    pub token: String,
    /// The logged-in user.
    pub user_id: String,
    /// The conversation partner.
    pub other_user: String,
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// If `--config` is given and the file does not exist, returns an error.
    /// If no `--config` is given, the default path
    /// (`~/.config/chatsync/config.toml`) is tried and silently ignored if
    /// missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the config file cannot be read or parsed.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Ok(Self::resolve(cli, &file))
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default. Separated from `load()` so it can be
    /// tested without CLI parsing.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();

        Self {
            api_url: cli.api_url.clone().or_else(|| file.server.api_url.clone()),
            socket_url: cli
                .socket_url
                .clone()
                .or_else(|| file.server.socket_url.clone()),
            request_timeout: file
                .server
                .request_timeout_secs
                .map_or(defaults.request_timeout, Duration::from_secs),
            token: cli.token.clone(),
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            other_user: cli
                .other_user
                .clone()
                .or_else(|| file.session.other_user.clone()),
            reconnect: ReconnectPolicy {
                max_attempts: file
                    .transport
                    .reconnect_attempts
                    .unwrap_or(defaults.reconnect.max_attempts),
                delay: file
                    .transport
                    .reconnect_delay_ms
                    .map_or(defaults.reconnect.delay, Duration::from_millis),
            },
            sync: SyncConfig {
                send_timeout: file
                    .chat
                    .send_timeout_secs
                    .map_or(defaults.sync.send_timeout, Duration::from_secs),
                failure_grace: file
                    .chat
                    .failure_grace_ms
                    .map_or(defaults.sync.failure_grace, Duration::from_millis),
                retry_settle: file
                    .chat
                    .retry_settle_ms
                    .map_or(defaults.sync.retry_settle, Duration::from_millis),
                echo_window: file
                    .chat
                    .echo_window_secs
                    .map_or(defaults.sync.echo_window, Duration::from_secs),
                event_buffer: file
                    .chat
                    .event_buffer
                    .unwrap_or(defaults.sync.event_buffer),
            },
        }
    }

    /// Collect the settings needed to go online.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] naming the first unset setting.
    pub fn session_settings(&self) -> Result<SessionSettings, ConfigError> {
        fn required(value: Option<&String>, name: &'static str) -> Result<String, ConfigError> {
            value
                .filter(|v| !v.is_empty())
                .cloned()
                .ok_or(ConfigError::Missing(name))
        }

        Ok(SessionSettings {
            api_url: required(self.api_url.as_ref(), "api_url")?,
            socket_url: required(self.socket_url.as_ref(), "socket_url")?,
            token: required(self.token.as_ref(), "token")?,
            user_id: required(self.user_id.as_ref(), "user_id")?,
            other_user: required(self.other_user.as_ref(), "other_user")?,
        })
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Real-time chat client for the marketplace backend")]
pub struct CliArgs {
    /// Base URL of the REST API.
    #[arg(long, env = "CHATSYNC_API_URL")]
    pub api_url: Option<String>,

    /// WebSocket URL of the backend.
    #[arg(long, env = "CHATSYNC_SOCKET_URL")]
    pub socket_url: Option<String>,

    /// Bearer token.
    #[arg(long, env = "CHATSYNC_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Your user id.
    #[arg(long, env = "CHATSYNC_USER_ID")]
    pub user_id: Option<String>,

    /// User id of the person to chat with.
    #[arg(long)]
    pub other_user: Option<String>,

    /// Path to config file (default: `~/.config/chatsync/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/chatsync.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(ConfigFile::default());
        };
        config_dir.join("chatsync").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
