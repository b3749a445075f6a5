//! Server configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Anonymous FTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address the control-channel listener binds to.
    pub bind_address: String,

    /// Control port (RFC 959 default 21).
    pub port: u16,

    /// Root directory for all FTP file operations. Canonicalized by
    /// `validate()` before use.
    pub root_dir: PathBuf,

    /// Hard cap on a single command line, in bytes (§4.1).
    pub max_command_line_bytes: usize,

    /// Idle timeout on the control socket, recommended 5 minutes (§5).
    pub control_idle_timeout_secs: u64,

    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            root_dir: default_root_dir(),
            max_command_line_bytes: default_max_command_line_bytes(),
            control_idle_timeout_secs: default_idle_timeout(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level passed to `tracing_subscriber::EnvFilter`.
    pub level: String,
    /// Text or JSON output.
    pub format: LogFormat,
    /// Optional log file; logs to stderr when unset.
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
            file: None,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Plain text, human-readable.
    Text,
    /// Structured JSON, one event per line.
    Json,
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn from_file(path: &str) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::Error::SyntaxError(format!("invalid config: {e}")))?;
        Ok(config)
    }

    /// Validates and canonicalizes the configuration in place.
    ///
    /// Canonicalizing `root_dir` once at startup means every jailed path
    /// comparison downstream is a plain prefix check against an already
    /// absolute, symlink-free root.
    pub fn validate(&mut self) -> crate::Result<()> {
        if !self.root_dir.is_dir() {
            return Err(crate::Error::SyntaxError(format!(
                "root directory does not exist or is not a directory: {:?}",
                self.root_dir
            )));
        }
        self.root_dir = self.root_dir.canonicalize()?;

        if self.max_command_line_bytes == 0 {
            return Err(crate::Error::SyntaxError(
                "max_command_line_bytes must be nonzero".to_string(),
            ));
        }

        Ok(())
    }
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    21
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("/tmp")
}

fn default_max_command_line_bytes() -> usize {
    1024
}

fn default_idle_timeout() -> u64 {
    300
}
