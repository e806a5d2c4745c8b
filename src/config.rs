//! Configuration module for calc-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use clap::Parser;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "calc-server")]
#[command(author = "calc-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A key/value protocol server that evaluates arithmetic", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (e.g., 0.0.0.0:6789)
    #[arg(short = 'l', long)]
    pub listen: Option<String>,

    /// Maximum number of live connections
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Path of the append-only activity log
    #[arg(short = 'a', long)]
    pub activity_log: Option<PathBuf>,

    /// Reject math requests from connections that have not said hello
    #[arg(long)]
    pub require_hello: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    #[serde(default = "default_listen")]
    pub listen: String,
    /// Maximum number of live connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Readiness events drained per poll
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// Bytes requested per read call
    #[serde(default = "default_read_buffer_size")]
    pub read_buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            max_connections: default_max_connections(),
            event_capacity: default_event_capacity(),
            read_buffer_size: default_read_buffer_size(),
        }
    }
}

/// Session-related configuration
#[derive(Debug, Deserialize, Default)]
pub struct SessionConfig {
    /// Require a hello before math is answered
    #[serde(default)]
    pub require_hello: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Activity log path
    #[serde(default = "default_activity_log")]
    pub activity_log: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            activity_log: default_activity_log(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:6789".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_event_capacity() -> usize {
    256
}

fn default_read_buffer_size() -> usize {
    4096
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_activity_log() -> PathBuf {
    PathBuf::from("server.log")
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub max_connections: usize,
    pub event_capacity: usize,
    pub read_buffer_size: usize,
    pub activity_log: PathBuf,
    pub require_hello: bool,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args with TOML config (CLI takes precedence)
    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let listen = cli.listen.unwrap_or(toml_config.server.listen);
        let listen: SocketAddr = listen
            .parse()
            .map_err(|e| ConfigError::InvalidListen(listen.clone(), e))?;

        Ok(Config {
            listen,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            event_capacity: toml_config.server.event_capacity.max(1),
            read_buffer_size: toml_config.server.read_buffer_size.max(1),
            activity_log: cli
                .activity_log
                .unwrap_or(toml_config.logging.activity_log),
            require_hello: cli.require_hello || toml_config.session.require_hello,
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        let server = ServerConfig::default();
        let logging = LoggingConfig::default();
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 6789)),
            max_connections: server.max_connections,
            event_capacity: server.event_capacity,
            read_buffer_size: server.read_buffer_size,
            activity_log: logging.activity_log,
            require_hello: false,
            log_level: logging.level,
        }
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {}", .0.display(), .1)]
    FileRead(PathBuf, #[source] std::io::Error),
    #[error("Failed to parse config file '{}': {}", .0.display(), .1)]
    TomlParse(PathBuf, #[source] toml::de::Error),
    #[error("Invalid listen address '{0}': {1}")]
    InvalidListen(String, #[source] std::net::AddrParseError),
}
