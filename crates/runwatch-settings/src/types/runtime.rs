//! Runtime process and logging settings.

use std::collections::BTreeMap;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

/// How the agent runtime process is launched and talked to.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RuntimeSettings {
    /// Executable speaking JSON-RPC on stdio.
    pub command: String,
    pub args: Vec<String>,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// How long `stop` waits for the process to exit before killing it.
    pub stop_grace_ms: u64,
    /// Passed to the runtime as `GITHUB_TOKEN`. Env-only, never serialized.
    #[serde(skip)]
    pub github_token: Option<SecretString>,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            command: "copilot".to_string(),
            args: vec!["--server".to_string(), "--stdio".to_string()],
            request_timeout_ms: 30_000,
            stop_grace_ms: 5_000,
            github_token: None,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level; `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
    /// Per-target level overrides, e.g. `{"runwatch_runtime": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}
