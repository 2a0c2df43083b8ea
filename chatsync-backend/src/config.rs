//! Configuration for the `ChatSync` backend.
//!
//! Layered with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/chatsync-backend/config.toml`)
//! 4. Compiled defaults
//!
//! Users from the CLI and the file are merged; a CLI entry wins when both
//! register the same token.

use std::path::PathBuf;

/// Errors that can occur when loading backend configuration.
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

    /// A `--user` value was not of the form `token=userId`.
    #[error("invalid user entry {0:?}, expected token=userId")]
    InvalidUser(String),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct BackendConfigFile {
    server: ServerFileConfig,
    users: Vec<UserFileEntry>,
}

/// `[server]` section.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ServerFileConfig {
    bind_addr: Option<String>,
}

/// One `[[users]]` entry.
#[derive(Debug, serde::Deserialize)]
struct UserFileEntry {
    token: String,
    user_id: String,
}

// ---------------------------------------------------------------------------
// CLI arguments
// ---------------------------------------------------------------------------

/// CLI arguments for the backend.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "ChatSync development backend")]
pub struct BackendCliArgs {
    /// Address to bind to.
    #[arg(short, long, env = "CHATSYNC_BACKEND_ADDR")]
    pub bind: Option<String>,

    /// Path to config file (default: `~/.config/chatsync-backend/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Register a user, as `token=userId`. Repeatable.
    #[arg(long = "user", value_name = "TOKEN=USER_ID")]
    pub users: Vec<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "CHATSYNC_BACKEND_LOG")]
    pub log_level: String,
}

// ---------------------------------------------------------------------------
// Resolved configuration
// ---------------------------------------------------------------------------

/// Fully resolved backend configuration.
#[derive(Debug, Clone)]
pub struct BackendConfig {
    /// Address to bind the server to (e.g., `127.0.0.1:3000`).
    pub bind_addr: String,
    /// `(token, user id)` pairs accepted as bearer credentials.
    pub users: Vec<(String, String)>,
    /// Log level filter string.
    pub log_level: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3000".to_string(),
            users: Vec::new(),
            log_level: "info".to_string(),
        }
    }
}

impl BackendConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read or
    /// parsed, or a `--user` value is malformed.
    pub fn load(cli: &BackendCliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        Self::resolve(cli, &file)
    }

    fn resolve(cli: &BackendCliArgs, file: &BackendConfigFile) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let mut users: Vec<(String, String)> = file
            .users
            .iter()
            .map(|u| (u.token.clone(), u.user_id.clone()))
            .collect();
        for entry in &cli.users {
            let (token, user) = parse_user(entry)?;
            users.retain(|(t, _)| *t != token);
            users.push((token, user));
        }

        Ok(Self {
            bind_addr: cli
                .bind
                .clone()
                .or_else(|| file.server.bind_addr.clone())
                .unwrap_or(defaults.bind_addr),
            users,
            log_level: cli.log_level.clone(),
        })
    }
}

/// Split `token=userId`.
fn parse_user(entry: &str) -> Result<(String, String), ConfigError> {
    match entry.split_once('=') {
        Some((token, user)) if !token.trim().is_empty() && !user.trim().is_empty() => {
            Ok((token.trim().to_string(), user.trim().to_string()))
        }
        _ => Err(ConfigError::InvalidUser(entry.to_string())),
    }
}

fn load_config_file(
    explicit_path: Option<&std::path::Path>,
) -> Result<BackendConfigFile, ConfigError> {
    let path = if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    } else {
        let Some(config_dir) = dirs::config_dir() else {
            return Ok(BackendConfigFile::default());
        };
        config_dir.join("chatsync-backend").join("config.toml")
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BackendConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
