//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`
//! so a settings file only needs the keys it changes.

mod agent;
mod runtime;

pub use agent::*;
pub use runtime::*;

use serde::{Deserialize, Serialize};

/// Root settings type.
///
/// ```json
/// {
///   "agent": { "deadlineSecs": 900 },
///   "monitor": { "repositories": ["acme/api", "acme/web"] }
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunwatchSettings {
    /// Settings schema version.
    pub version: String,
    /// Agent session behavior.
    pub agent: AgentSettings,
    /// What the agent is asked to inspect.
    pub monitor: MonitorSettings,
    /// Notification tool settings.
    pub notification: NotificationSettings,
    /// How the agent runtime process is launched.
    pub runtime: RuntimeSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for RunwatchSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            agent: AgentSettings::default(),
            monitor: MonitorSettings::default(),
            notification: NotificationSettings::default(),
            runtime: RuntimeSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}
