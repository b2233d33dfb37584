use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Target for delivery records emitted by notification tools.
pub const AUDIT_TARGET: &str = "runwatch::audit";

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by RUST_LOG env var.
    pub log_level: Level,
    /// Per-module level overrides (e.g. "runwatch_runtime" => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl TelemetryConfig {
    /// Build from the textual level used in settings files.
    pub fn from_level_str(level: &str, json: bool) -> Result<Self, TelemetryError> {
        let log_level = level
            .parse::<Level>()
            .map_err(|_| TelemetryError::InvalidLevel(level.to_string()))?;
        Ok(Self {
            log_level,
            json,
            ..Self::default()
        })
    }

    /// Add a per-module override from its textual level.
    pub fn with_module_level(mut self, module: &str, level: &str) -> Result<Self, TelemetryError> {
        let level = level
            .parse::<Level>()
            .map_err(|_| TelemetryError::InvalidLevel(format!("{module}={level}")))?;
        self.module_levels.push((module.to_string(), level));
        Ok(self)
    }

    /// Filter directive built from the configured levels.
    pub fn filter_directive(&self) -> String {
        let mut filter_str = self.log_level.to_string().to_lowercase();
        for (module, level) in &self.module_levels {
            filter_str.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
        }
        filter_str
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("invalid log level: {0}")]
    InvalidLevel(String),
    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Initialize the global tracing subscriber. Call once at startup.
///
/// Logs go to stderr; stdout is left for the agent transcript and the run
/// summary.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter_directive()));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_writer(std::io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()
        .map_err(|e| TelemetryError::Init(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_is_info() {
        assert_eq!(TelemetryConfig::default().filter_directive(), "info");
    }

    #[test]
    fn module_levels_are_appended() {
        let config = TelemetryConfig {
            log_level: Level::WARN,
            module_levels: vec![
                ("runwatch_runtime".into(), Level::DEBUG),
                ("runwatch::audit".into(), Level::INFO),
            ],
            json: false,
        };
        assert_eq!(
            config.filter_directive(),
            "warn,runwatch_runtime=debug,runwatch::audit=info"
        );
    }

    #[test]
    fn level_parsing() {
        let config = TelemetryConfig::from_level_str("debug", true).unwrap();
        assert_eq!(config.log_level, Level::DEBUG);
        assert!(config.json);

        let err = TelemetryConfig::from_level_str("loud", false).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidLevel(ref l) if l == "loud"));
    }

    #[test]
    fn module_levels_from_settings_text() {
        let config = TelemetryConfig::from_level_str("info", false)
            .and_then(|c| c.with_module_level("runwatch_runtime", "debug"))
            .and_then(|c| c.with_module_level("runwatch::audit", "WARN"))
            .unwrap();
        assert_eq!(
            config.filter_directive(),
            "info,runwatch_runtime=debug,runwatch::audit=warn"
        );

        let err = TelemetryConfig::default()
            .with_module_level("runwatch_engine", "chatty")
            .unwrap_err();
        assert_eq!(err.to_string(), "invalid log level: runwatch_engine=chatty");
    }
}
