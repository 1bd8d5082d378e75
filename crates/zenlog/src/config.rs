//! Configuration: optional `~/.zenlog.toml` plus environment overrides.
//!
//! Precedence is environment, then file, then built-in defaults. The
//! resolved [`Config`] is computed once per process and never changes.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENV_LOG_DIR: &str = "ZENLOG_DIR";
pub const ENV_TEMP_DIR: &str = "ZENLOG_TEMP_DIR";
pub const ENV_START_COMMAND: &str = "ZENLOG_START_COMMAND";

/// Top-level config file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub zenlog: ZenlogSection,
}

/// `[zenlog]` section of the config TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ZenlogSection {
    /// Root of the RAW/SAN/ENV trees.
    #[serde(default)]
    pub log_dir: Option<String>,

    /// Where per-session pipes and the diagnostics log live.
    #[serde(default)]
    pub temp_dir: Option<String>,

    /// Shell command line to run under the pty.
    #[serde(default)]
    pub start_command: Option<String>,
}

impl ConfigFile {
    /// Load a config file, returning defaults if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let config: ConfigFile = toml::from_str(&content)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;

        debug!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// Resolved configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub log_dir: PathBuf,
    pub temp_dir: PathBuf,
    pub start_command: String,
}

impl Config {
    /// Resolve from a config file and an environment snapshot.
    pub fn resolve(file: &ConfigFile, env: &HashMap<String, String>) -> Self {
        let pick = |key: &str, from_file: &Option<String>| {
            env.get(key)
                .filter(|v| !v.is_empty())
                .cloned()
                .or_else(|| from_file.clone())
        };

        let log_dir = pick(ENV_LOG_DIR, &file.zenlog.log_dir)
            .map(|s| expand_tilde_str(&s))
            .unwrap_or_else(default_log_dir);
        let temp_dir = pick(ENV_TEMP_DIR, &file.zenlog.temp_dir)
            .map(|s| expand_tilde_str(&s))
            .unwrap_or_else(|| default_temp_dir(env));
        let start_command = pick(ENV_START_COMMAND, &file.zenlog.start_command)
            .unwrap_or_else(|| default_start_command(env));

        Self {
            log_dir,
            temp_dir,
            start_command,
        }
    }

    /// Load `path` (or `~/.zenlog.toml`) and resolve against the process environment.
    pub fn load(path: Option<&str>) -> Result<Self> {
        let path = match path {
            Some(p) => expand_tilde_str(p),
            None => default_config_path(),
        };
        let file = ConfigFile::load(&path)?;
        let env: HashMap<String, String> = std::env::vars().collect();
        Ok(Self::resolve(&file, &env))
    }

    /// Directory holding one session's pipes and diagnostics.
    pub fn session_dir(&self, session_id: u32) -> PathBuf {
        self.temp_dir.join(session_id.to_string())
    }
}

fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_default()
        .join(".zenlog.toml")
}

fn default_log_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("zenlog")
}

fn default_temp_dir(env: &HashMap<String, String>) -> PathBuf {
    let base = env
        .get("TMPDIR")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/tmp"));
    let user = env
        .get("USER")
        .cloned()
        .unwrap_or_else(|| "unknown".into());
    base.join(format!("zenlog-{user}"))
}

fn default_start_command(env: &HashMap<String, String>) -> String {
    match env.get("SHELL").filter(|s| !s.is_empty()) {
        Some(shell) => format!("{shell} -l"),
        None => "/bin/sh".to_string(),
    }
}

/// Expand `~` to the user's home directory.
pub fn expand_tilde_str(s: &str) -> PathBuf {
    if let Some(rest) = s.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(s)
}
