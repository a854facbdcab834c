//! Configuration for the agent bridge.
//!
//! Loads configuration from ${ABX_HOME}/config.toml with sensible defaults.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

pub mod paths {
    //! Path resolution for abx configuration and data directories.
    //!
    //! ABX_HOME resolution order:
    //! 1. ABX_HOME environment variable (if set)
    //! 2. ~/.config/abx (default)

    use std::path::PathBuf;

    /// Returns the abx home directory.
    ///
    /// Checks ABX_HOME env var first, falls back to ~/.config/abx
    pub fn abx_home() -> PathBuf {
        if let Ok(home) = std::env::var("ABX_HOME") {
            return PathBuf::from(home);
        }

        dirs::home_dir()
            .map(|h| h.join(".config").join("abx"))
            .expect("Could not determine home directory")
    }

    /// Returns the path to the config.toml file.
    pub fn config_path() -> PathBuf {
        abx_home().join("config.toml")
    }
}

/// Wire protocol spoken with the agent process over stdio.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolMode {
    /// Simple newline-delimited JSON chunk/done/error protocol.
    #[default]
    Line,
    /// JSON-RPC 2.0 with method-id correlation (tool invocation).
    Rpc,
}

/// Agent process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Agent identity used for session display.
    pub name: String,

    /// Explicit path to the agent executable. When set, discovery is skipped.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executable: Option<String>,

    /// Candidate path relative to the session work directory.
    /// Falls back to the same file name under the abx home directory.
    pub relative_path: String,

    /// Extra arguments passed to the agent executable.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,

    /// Extra environment variables for the agent process.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,

    /// Protocol spoken over the agent's stdio.
    pub protocol: ProtocolMode,

    /// Tool invoked for `execute_task` when the protocol is `rpc`.
    pub task_tool: String,

    /// Delay after spawn before the first request is written (ms).
    pub launch_settle_ms: u64,

    /// Grace period between SIGTERM and SIGKILL on stop (ms).
    pub stop_grace_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            executable: None,
            relative_path: "bin/agent".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            protocol: ProtocolMode::Line,
            task_tool: "execute_task".to_string(),
            launch_settle_ms: 2000,
            stop_grace_ms: 5000,
        }
    }
}

impl AgentConfig {
    /// Settle delay applied between spawn and first use.
    pub fn launch_settle(&self) -> Duration {
        Duration::from_millis(self.launch_settle_ms)
    }

    /// Grace period before force-kill on stop.
    pub fn stop_grace(&self) -> Duration {
        Duration::from_millis(self.stop_grace_ms)
    }
}

/// Remote agent endpoint configuration (HTTP SSE chat).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL of a remote agent server, e.g. `http://localhost:8080`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Agent process settings.
    pub agent: AgentConfig,

    /// Remote endpoint settings.
    pub remote: RemoteConfig,
}

impl Config {
    /// Loads configuration from the default path, or defaults if absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load() -> Result<Self> {
        Self::load_from(&paths::config_path())
    }

    /// Loads configuration from a specific path, or defaults if absent.
    ///
    /// # Errors
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config from {}", path.display()))
        } else {
            Ok(Config::default())
        }
    }

    /// Writes a default config file at the default path.
    ///
    /// # Errors
    /// Fails when the file already exists or cannot be written.
    pub fn init() -> Result<std::path::PathBuf> {
        let path = paths::config_path();
        if path.exists() {
            anyhow::bail!("Config already exists at {}", path.display());
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let contents = toml::to_string_pretty(&Config::default())
            .context("Failed to serialize default config")?;
        fs::write(&path, contents)
            .with_context(|| format!("Failed to write config to {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.agent.protocol, ProtocolMode::Line);
        assert_eq!(config.agent.launch_settle_ms, 2000);
        assert!(config.remote.base_url.is_none());
    }

    #[test]
    fn parses_partial_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[agent]
protocol = "rpc"
relative_path = "tools/agent"

[remote]
base_url = "http://localhost:8080"
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent.protocol, ProtocolMode::Rpc);
        assert_eq!(config.agent.relative_path, "tools/agent");
        // Unspecified fields keep their defaults.
        assert_eq!(config.agent.stop_grace_ms, 5000);
        assert_eq!(config.remote.base_url.as_deref(), Some("http://localhost:8080"));
    }

    #[test]
    fn invalid_toml_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "agent = not valid").unwrap();
        assert!(Config::load_from(&path).is_err());
    }
}
