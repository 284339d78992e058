//! # Configuration
//!
//! Centralizes engine settings with a clear override hierarchy:
//! defaults → config file → env vars → CLI flags.
//!
//! Config lives at `~/.statecore/config.toml`. Every field is optional, so a
//! missing file simply means "use the defaults".

use clap::ValueEnum;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use crate::core::action::ExecuteMode;

// ============================================================================
// Config Structs (all fields Option<T> for sparse TOML)
// ============================================================================

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct FileConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub demo: DemoSection,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct EngineSection {
    pub default_mode: Option<ExecuteMode>,
    pub trace_actions: Option<bool>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct DemoSection {
    pub latency_ms: Option<u64>,
    pub username: Option<String>,
    pub password: Option<String>,
}

// ============================================================================
// Defaults
// ============================================================================

pub const DEFAULT_DEMO_LATENCY_MS: u64 = 300;

// ============================================================================
// Resolved Config (concrete values, no Options)
// ============================================================================

/// Settings the engine itself consumes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineConfig {
    /// Lane used when the view-model doesn't pick one for an action.
    pub default_mode: ExecuteMode,
    /// Log every routed action at info level.
    pub trace_actions: bool,
}

/// Settings for the bundled login demo.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoConfig {
    pub latency_ms: u64,
    pub username: String,
    pub password: String,
}

// ============================================================================
// Error Type
// ============================================================================

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "config I/O error: {e}"),
            ConfigError::Parse(e) => write!(f, "config parse error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

// ============================================================================
// Loading
// ============================================================================

/// Returns the path to `~/.statecore/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".statecore").join("config.toml"))
}

/// Load config from `~/.statecore/config.toml`.
///
/// A missing file or home directory yields `FileConfig::default()`.
pub fn load_config() -> Result<FileConfig, ConfigError> {
    match config_path() {
        Some(path) => load_config_from(&path),
        None => {
            warn!("Could not determine home directory, using default config");
            Ok(FileConfig::default())
        }
    }
}

/// Load config from an explicit path.
pub fn load_config_from(path: &Path) -> Result<FileConfig, ConfigError> {
    if !path.exists() {
        debug!("No config file at {}, using defaults", path.display());
        return Ok(FileConfig::default());
    }

    let contents = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: FileConfig = toml::from_str(&contents).map_err(ConfigError::Parse)?;
    info!("Loaded config from {}", path.display());
    debug!("Config: {:?}", config);
    Ok(config)
}

// ============================================================================
// Resolution
// ============================================================================

/// Resolve the engine config: defaults → config file → env vars → CLI.
pub fn resolve_engine(config: &FileConfig, cli_mode: Option<ExecuteMode>) -> EngineConfig {
    let env_mode = std::env::var("STATECORE_DEFAULT_MODE")
        .ok()
        .and_then(|raw| match ExecuteMode::from_str(&raw, true) {
            Ok(mode) => Some(mode),
            Err(e) => {
                warn!("Ignoring STATECORE_DEFAULT_MODE={}: {}", raw, e);
                None
            }
        });

    let default_mode = cli_mode
        .or(env_mode)
        .or(config.engine.default_mode)
        .unwrap_or_default();

    let trace_actions = std::env::var("STATECORE_TRACE_ACTIONS")
        .ok()
        .map(|raw| matches!(raw.as_str(), "1" | "true" | "yes"))
        .or(config.engine.trace_actions)
        .unwrap_or(false);

    EngineConfig {
        default_mode,
        trace_actions,
    }
}

/// Resolve the demo config: defaults → config file → CLI.
pub fn resolve_demo(
    config: &FileConfig,
    cli_username: Option<&str>,
    cli_password: Option<&str>,
) -> DemoConfig {
    DemoConfig {
        latency_ms: config.demo.latency_ms.unwrap_or(DEFAULT_DEMO_LATENCY_MS),
        username: cli_username
            .map(str::to_string)
            .or_else(|| config.demo.username.clone())
            .unwrap_or_else(|| "admin".to_string()),
        password: cli_password
            .map(str::to_string)
            .or_else(|| config.demo.password.clone())
            .unwrap_or_else(|| "admin".to_string()),
    }
}
