//! Launch specification: everything needed to spawn one agent process.
//!
//! Builds the argument vector one-to-one from request options, assembles the
//! child environment (parent env + SDK marker + optional API key + caller
//! overrides), validates the working directory, resolves the executable on
//! PATH, and materializes the MCP server side-config file the CLI consumes.

use std::collections::HashMap;
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde_json::json;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::{ConduitConfig, McpServerConfig};
use crate::models::request::{PermissionMode, Request};
use crate::{ConduitError, Result};

/// Environment variable marking the process as SDK-launched.
pub const ENTRYPOINT_VAR: &str = "CLAUDE_CODE_ENTRYPOINT";

/// Entrypoint marker value for this crate.
pub const ENTRYPOINT_VALUE: &str = "sdk-rust";

/// API key variable consumed by the CLI for key-based auth.
pub const API_KEY_VAR: &str = "ANTHROPIC_API_KEY";

/// Fully resolved spawn parameters for one agent process.
#[derive(Debug)]
pub struct LaunchSpec {
    /// Absolute path of the resolved executable.
    pub program: PathBuf,
    /// Argument vector, in the order passed to the process.
    pub args: Vec<String>,
    /// Environment variables set on top of the inherited parent environment.
    pub env: HashMap<String, String>,
    /// Validated working directory.
    pub working_dir: PathBuf,
    /// MCP side-config file; deleted when the spec is dropped, so the spec
    /// must outlive the process it launched.
    mcp_config: Option<NamedTempFile>,
}

impl LaunchSpec {
    /// Build the launch spec for `request` under `config`, bound to a
    /// canonical session id.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::NotFound`] — executable cannot be resolved on PATH.
    /// - [`ConduitError::Config`] — working directory does not exist.
    /// - [`ConduitError::Io`] — MCP side-config file cannot be written.
    pub fn build(config: &ConduitConfig, request: &Request, session_id: &str) -> Result<Self> {
        let program = resolve_executable(&config.executable)?;

        if !config.working_dir.is_dir() {
            return Err(ConduitError::Config(format!(
                "working directory does not exist: {}",
                config.working_dir.display()
            )));
        }

        let mcp_config = write_mcp_config(&config.mcp_servers)?;

        let mut args = vec!["--print".to_owned()];
        if request.stream {
            args.push("--output-format".to_owned());
            args.push("stream-json".to_owned());
            args.push("--verbose".to_owned());
        }
        args.push("--session-id".to_owned());
        args.push(session_id.to_owned());

        if let Some(model) = request.model.as_deref().or(config.model.as_deref()) {
            args.push("--model".to_owned());
            args.push(model.to_owned());
        }
        if let Some(ref system) = request.system {
            args.push("--append-system-prompt".to_owned());
            args.push(system.clone());
        }
        match request.permission_mode {
            PermissionMode::Default => {}
            PermissionMode::AcceptEdits => {
                args.push("--permission-mode".to_owned());
                args.push("acceptEdits".to_owned());
            }
            PermissionMode::Plan => {
                args.push("--permission-mode".to_owned());
                args.push("plan".to_owned());
            }
            PermissionMode::BypassPermissions => {
                args.push("--permission-mode".to_owned());
                args.push("bypassPermissions".to_owned());
            }
        }
        if !request.allowed_tools.is_empty() {
            args.push("--allowed-tools".to_owned());
            args.push(request.allowed_tools.join(","));
        }
        if !request.disallowed_tools.is_empty() {
            args.push("--disallowed-tools".to_owned());
            args.push(request.disallowed_tools.join(","));
        }
        // Tuning hints are best-effort: some CLI versions accept and ignore
        // them, so acceptance must not be read as effect.
        if let Some(max_tokens) = request.max_tokens {
            args.push("--max-tokens".to_owned());
            args.push(max_tokens.to_string());
        }
        if let Some(temperature) = request.temperature {
            args.push("--temperature".to_owned());
            args.push(temperature.to_string());
        }
        if let Some(ref file) = mcp_config {
            args.push("--mcp-config".to_owned());
            args.push(file.path().to_string_lossy().into_owned());
        }

        let mut env = HashMap::new();
        env.insert(ENTRYPOINT_VAR.to_owned(), ENTRYPOINT_VALUE.to_owned());
        if let Some(ref key) = config.api_key {
            env.insert(API_KEY_VAR.to_owned(), key.clone());
        }
        for (k, v) in &config.env_overrides {
            env.insert(k.clone(), v.clone());
        }

        debug!(
            program = %program.display(),
            arg_count = args.len(),
            session_id,
            "launch spec built"
        );

        Ok(Self {
            program,
            args,
            env,
            working_dir: config.working_dir.clone(),
            mcp_config,
        })
    }

    /// Build a spec for an explicit program invocation, bypassing request
    /// mapping. Used for auxiliary processes and exercised heavily by the
    /// transport tests.
    ///
    /// # Errors
    ///
    /// - [`ConduitError::NotFound`] — program cannot be resolved on PATH.
    /// - [`ConduitError::Config`] — working directory does not exist.
    pub fn direct(program: &str, args: Vec<String>, working_dir: PathBuf) -> Result<Self> {
        let program = resolve_executable(program)?;
        if !working_dir.is_dir() {
            return Err(ConduitError::Config(format!(
                "working directory does not exist: {}",
                working_dir.display()
            )));
        }
        Ok(Self {
            program,
            args,
            env: HashMap::new(),
            working_dir,
            mcp_config: None,
        })
    }

    /// Path of the MCP side-config file, when one was written.
    #[must_use]
    pub fn mcp_config_path(&self) -> Option<&Path> {
        self.mcp_config.as_ref().map(NamedTempFile::path)
    }
}

/// Resolve an executable name against PATH, or validate an explicit path.
///
/// # Errors
///
/// Returns [`ConduitError::NotFound`] when no matching file exists. This is
/// fail-fast and non-retryable: a missing executable never reaches spawn.
pub fn resolve_executable(name: &str) -> Result<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        if candidate.is_file() {
            return Ok(candidate.to_path_buf());
        }
        return Err(ConduitError::NotFound(name.to_owned()));
    }

    let path_var = std::env::var_os("PATH").unwrap_or_else(OsString::new);
    for dir in std::env::split_paths(&path_var) {
        let full = dir.join(name);
        if full.is_file() {
            return Ok(full);
        }
    }
    Err(ConduitError::NotFound(name.to_owned()))
}

/// Write enabled MCP server definitions to a JSON side-config file.
///
/// Returns `Ok(None)` when no server is enabled, so no file (and no
/// `--mcp-config` flag) is produced.
fn write_mcp_config(servers: &HashMap<String, McpServerConfig>) -> Result<Option<NamedTempFile>> {
    let enabled: HashMap<&String, serde_json::Value> = servers
        .iter()
        .filter(|(_, s)| s.enabled)
        .map(|(name, s)| {
            (
                name,
                json!({
                    "command": s.command,
                    "args": s.args,
                    "env": s.env,
                }),
            )
        })
        .collect();

    if enabled.is_empty() {
        return Ok(None);
    }

    let doc = json!({ "mcpServers": enabled });
    let mut file = NamedTempFile::new().map_err(|e| ConduitError::Io(e.to_string()))?;
    let bytes = serde_json::to_vec_pretty(&doc)
        .map_err(|e| ConduitError::Io(format!("mcp config serialization failed: {e}")))?;
    file.write_all(&bytes)
        .map_err(|e| ConduitError::Io(e.to_string()))?;
    file.flush().map_err(|e| ConduitError::Io(e.to_string()))?;

    debug!(path = %file.path().display(), servers = enabled.len(), "mcp side-config written");
    Ok(Some(file))
}
