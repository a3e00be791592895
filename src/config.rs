//! Client configuration parsing and validation.
//!
//! Configuration is supplied programmatically or parsed from TOML. API
//! credentials are never stored in the config file; the caller injects the
//! key at runtime via [`ConduitConfig::api_key`] or lets the spawned CLI
//! fall back to its own credential chain.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{ConduitError, Result};

/// Definition of one MCP server made available to the agent process.
///
/// Written to a JSON side-config file consumed by the CLI at spawn time;
/// entries with `enabled = false` are omitted from the file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct McpServerConfig {
    /// Launch command for the server binary.
    pub command: String,
    /// Arguments passed to the server binary.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment variables for the server process. Open-ended pass-through
    /// by design; values are not interpreted by this crate.
    #[serde(default)]
    pub env: HashMap<String, String>,
    /// Whether the server is included in the side-config file.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Configurable timeout values (seconds) for transport operations.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutConfig {
    /// Maximum time to wait for the process to emit its first stdout line;
    /// 0 disables the check.
    #[serde(default = "default_startup_seconds")]
    pub startup_seconds: u64,
    /// Deadline for one full streaming exchange; 0 means no deadline.
    #[serde(default)]
    pub stream_seconds: u64,
    /// Grace period between cooperative interrupt and forced kill.
    #[serde(default = "default_grace_seconds")]
    pub grace_seconds: u64,
}

fn default_startup_seconds() -> u64 {
    30
}

fn default_grace_seconds() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

fn default_executable() -> String {
    "claude".into()
}

fn default_max_parallel() -> usize {
    4
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_seconds: default_startup_seconds(),
            stream_seconds: 0,
            grace_seconds: default_grace_seconds(),
        }
    }
}

impl TimeoutConfig {
    /// Grace period as a [`Duration`].
    #[must_use]
    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_seconds)
    }

    /// Stream deadline as a [`Duration`], `None` when disabled.
    #[must_use]
    pub fn stream_deadline(&self) -> Option<Duration> {
        (self.stream_seconds > 0).then(|| Duration::from_secs(self.stream_seconds))
    }

    /// Startup deadline as a [`Duration`], `None` when disabled.
    #[must_use]
    pub fn startup_deadline(&self) -> Option<Duration> {
        (self.startup_seconds > 0).then(|| Duration::from_secs(self.startup_seconds))
    }
}

/// Global client configuration.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ConduitConfig {
    /// Name (or path) of the external CLI executable.
    #[serde(default = "default_executable")]
    pub executable: String,
    /// Default model identifier passed to the CLI; `None` lets the CLI pick.
    #[serde(default)]
    pub model: Option<String>,
    /// Working directory for spawned processes; must exist at spawn time.
    pub working_dir: PathBuf,
    /// API key injected into the child environment (key-based auth).
    /// Populated at runtime, never from the config file.
    #[serde(skip)]
    pub api_key: Option<String>,
    /// Extra environment variables applied to every spawned process.
    #[serde(default)]
    pub env_overrides: HashMap<String, String>,
    /// MCP servers exposed to the agent.
    #[serde(default)]
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Ceiling on batch parallelism; caps whatever bound a command list
    /// declares for itself.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
}

impl ConduitConfig {
    /// Build a configuration with defaults for the given working directory.
    #[must_use]
    pub fn new(working_dir: PathBuf) -> Self {
        Self {
            executable: default_executable(),
            model: None,
            working_dir,
            api_key: None,
            env_overrides: HashMap::new(),
            mcp_servers: HashMap::new(),
            timeouts: TimeoutConfig::default(),
            max_parallel: default_max_parallel(),
        }
    }

    /// Parse a configuration from a TOML document and validate it.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Config`] when the document does not parse or
    /// fails validation.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field constraints that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConduitError::Config`] when the executable name is empty,
    /// the parallelism bound is zero, or an enabled MCP server has an empty
    /// command.
    pub fn validate(&self) -> Result<()> {
        if self.executable.trim().is_empty() {
            return Err(ConduitError::Config("executable must not be empty".into()));
        }
        if self.max_parallel == 0 {
            return Err(ConduitError::Config(
                "max_parallel must be at least 1".into(),
            ));
        }
        for (name, server) in &self.mcp_servers {
            if server.enabled && server.command.trim().is_empty() {
                return Err(ConduitError::Config(format!(
                    "mcp server `{name}` has an empty command"
                )));
            }
        }
        Ok(())
    }
}
