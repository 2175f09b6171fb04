//! Daemon settings.
//!
//! Settings come from command-line flags, optionally layered over a TOML
//! file. A flag always wins over the file.

use clap::Args;
use serde::Deserialize;
use slotd_protocol::MAX_PACKET_SIZE;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_INTERPRETER: &str = "sh";

#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid settings file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("max_packet_bytes must be at least 1")]
    ZeroPacketSize,
}

/// Command-line flags.
#[derive(Debug, Clone, Default, Args)]
pub struct SettingsOverrides {
    /// Path to a TOML settings file
    #[arg(long, short)]
    pub config: Option<PathBuf>,

    /// Interpreter that runs ref source (resolved on PATH)
    #[arg(long)]
    pub interpreter: Option<String>,

    /// Argument passed to the interpreter before the script path (repeatable)
    #[arg(long = "interpreter-arg", allow_hyphen_values = true)]
    pub interpreter_args: Vec<String>,

    /// Drain deadline in milliseconds for shutdowns that carry no ttl
    #[arg(long)]
    pub shutdown_ttl_ms: Option<u64>,

    /// Maximum length in bytes of one inbound line
    #[arg(long)]
    pub max_packet_bytes: Option<usize>,
}

/// Contents of a settings file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsFile {
    pub interpreter: Option<String>,
    pub interpreter_args: Vec<String>,
    pub shutdown_ttl_ms: Option<u64>,
    pub max_packet_bytes: Option<usize>,
}

impl SettingsFile {
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Effective settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub interpreter: String,
    pub interpreter_args: Vec<String>,
    pub shutdown_ttl: Option<Duration>,
    pub max_packet_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self::merge(SettingsOverrides::default(), SettingsFile::default())
    }
}

impl Settings {
    /// Reads the settings file named by `overrides`, if any, and applies
    /// the overrides on top of it.
    pub fn resolve(overrides: SettingsOverrides) -> Result<Self, SettingsError> {
        let file = match &overrides.config {
            Some(path) => SettingsFile::load(path)?,
            None => SettingsFile::default(),
        };
        let settings = Self::merge(overrides, file);
        if settings.max_packet_bytes == 0 {
            return Err(SettingsError::ZeroPacketSize);
        }
        Ok(settings)
    }

    pub fn merge(overrides: SettingsOverrides, file: SettingsFile) -> Self {
        let interpreter_args = if overrides.interpreter_args.is_empty() {
            file.interpreter_args
        } else {
            overrides.interpreter_args
        };

        Self {
            interpreter: overrides
                .interpreter
                .or(file.interpreter)
                .unwrap_or_else(|| DEFAULT_INTERPRETER.to_string()),
            interpreter_args,
            shutdown_ttl: overrides
                .shutdown_ttl_ms
                .or(file.shutdown_ttl_ms)
                .map(Duration::from_millis),
            max_packet_bytes: overrides
                .max_packet_bytes
                .or(file.max_packet_bytes)
                .unwrap_or(MAX_PACKET_SIZE),
        }
    }
}
