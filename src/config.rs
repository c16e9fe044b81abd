//! Configuration module for the echo benchmark.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values, and every value
//! falls back to the benchmark's built-in defaults.

use clap::Parser;
use serde::Deserialize;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug, Default)]
#[command(name = "echo-server")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo server for round-trip latency benchmarks", long_about = None)]
pub struct ServerArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// Command-line arguments for the benchmark client
#[derive(Parser, Debug, Default)]
#[command(name = "echo-client")]
#[command(version = "0.1.0")]
#[command(about = "TCP echo round-trip latency benchmark client", long_about = None)]
pub struct ClientArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Server host to connect to
    #[arg(long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Number of messages to send
    #[arg(short = 'n', long)]
    pub messages: Option<usize>,

    /// Absolute deadline for the whole run, in milliseconds
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub client: ClientSection,
    #[serde(default)]
    pub socket: SocketSection,
    #[serde(default)]
    pub report: ReportSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerSection {
    #[serde(default = "default_server_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: default_server_host(),
            port: default_port(),
        }
    }
}

/// Client-related configuration
#[derive(Debug, Deserialize)]
pub struct ClientSection {
    #[serde(default = "default_client_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_messages")]
    pub messages: usize,
    /// Expected line length, only used to size the line buffer
    #[serde(default = "default_message_size")]
    pub message_size: usize,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            host: default_client_host(),
            port: default_port(),
            messages: default_messages(),
            message_size: default_message_size(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

/// Socket tuning applied to every connection
#[derive(Debug, Deserialize)]
pub struct SocketSection {
    /// SO_RCVBUF / SO_SNDBUF in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Keep-alive probe period for server connections
    #[serde(default = "default_keepalive_secs")]
    pub keepalive_secs: u64,
}

impl Default for SocketSection {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            keepalive_secs: default_keepalive_secs(),
        }
    }
}

/// Progress reporting
#[derive(Debug, Deserialize)]
pub struct ReportSection {
    /// Print a progress line every `interval` messages
    #[serde(default = "default_report_interval")]
    pub interval: NonZeroUsize,
}

impl Default for ReportSection {
    fn default() -> Self {
        Self {
            interval: default_report_interval(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_server_host() -> String {
    "0.0.0.0".to_string()
}

fn default_client_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8888
}

fn default_messages() -> usize {
    1000
}

fn default_message_size() -> usize {
    100
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_buffer_size() -> usize {
    32 * 1024
}

fn default_keepalive_secs() -> u64 {
    30
}

fn default_report_interval() -> NonZeroUsize {
    NonZeroUsize::MIN.saturating_add(99)
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration, shared by both executables.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub message_count: usize,
    pub message_size: usize,
    pub buffer_size: usize,
    /// Absolute client deadline, set once when the connection is made.
    pub timeout: Duration,
    /// Server keep-alive probe period.
    pub keepalive: Duration,
    pub report_interval: NonZeroUsize,
    pub log_level: String,
}

impl Config {
    /// Built-in server configuration: all interfaces, port 8888.
    pub fn server_defaults() -> Self {
        Self::from_toml_server(TomlConfig::default())
    }

    /// Built-in client configuration: loopback, port 8888, 1000 messages.
    pub fn client_defaults() -> Self {
        Self::from_toml_client(TomlConfig::default())
    }

    /// Address string suitable for bind or connect.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Resolve the server configuration from CLI args and optional TOML file.
    pub fn load_server(args: ServerArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml(args.config.as_ref())?;
        let mut config = Self::from_toml_server(toml_config);

        if let Some(host) = args.host {
            config.host = host;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(level) = args.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    /// Resolve the client configuration from CLI args and optional TOML file.
    pub fn load_client(args: ClientArgs) -> Result<Self, ConfigError> {
        let toml_config = read_toml(args.config.as_ref())?;
        let mut config = Self::from_toml_client(toml_config);

        if let Some(host) = args.host {
            config.host = host;
        }
        if let Some(port) = args.port {
            config.port = port;
        }
        if let Some(messages) = args.messages {
            config.message_count = messages;
        }
        if let Some(ms) = args.timeout_ms {
            config.timeout = Duration::from_millis(ms);
        }
        if let Some(level) = args.log_level {
            config.log_level = level;
        }

        config.validate()?;
        Ok(config)
    }

    fn from_toml_server(toml: TomlConfig) -> Self {
        let host = toml.server.host.clone();
        let port = toml.server.port;
        Self::resolve(host, port, toml)
    }

    fn from_toml_client(toml: TomlConfig) -> Self {
        let host = toml.client.host.clone();
        let port = toml.client.port;
        Self::resolve(host, port, toml)
    }

    fn resolve(host: String, port: u16, toml: TomlConfig) -> Self {
        Config {
            host,
            port,
            message_count: toml.client.messages,
            message_size: toml.client.message_size,
            buffer_size: toml.socket.buffer_size,
            timeout: Duration::from_millis(toml.client.timeout_ms),
            keepalive: Duration::from_secs(toml.socket.keepalive_secs),
            report_interval: toml.report.interval,
            log_level: toml.logging.level,
        }
    }

    /// Reject values the server and client cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid("buffer_size must be non-zero".into()));
        }
        Ok(())
    }
}

fn read_toml(path: Option<&PathBuf>) -> Result<TomlConfig, ConfigError> {
    match path {
        Some(path) => {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::FileRead(path.clone(), e))?;
            toml::from_str(&contents).map_err(|e| ConfigError::TomlParse(path.clone(), e))
        }
        None => Ok(TomlConfig::default()),
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}
