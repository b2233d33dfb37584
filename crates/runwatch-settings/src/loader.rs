//! Settings loading with deep merge and environment variable overrides.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RunwatchSettings;

/// Resolve the path to the settings file (`~/.runwatch/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".runwatch").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RunwatchSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// If the file does not exist, returns defaults. If the file contains
/// invalid JSON, returns an error.
pub fn load_settings_from_path(path: &Path) -> Result<RunwatchSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults with the file at `path` deep-merged over them. No env overrides.
pub fn load_file_layer(path: &Path) -> Result<RunwatchSettings> {
    let defaults = serde_json::to_value(RunwatchSettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RunwatchSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Empty values are treated as unset. Values that fail to parse are
/// ignored with a warning, falling back to the file/default value.
pub fn apply_overrides_from<F>(settings: &mut RunwatchSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    // ── Agent ───────────────────────────────────────────────────────
    if let Some(v) = read("RUNWATCH_MODEL") {
        settings.agent.model = Some(v);
    }
    if let Some(v) = read("RUNWATCH_AGENT_MODE") {
        if let Some(b) = checked("RUNWATCH_AGENT_MODE", &v, parse_bool(&v)) {
            settings.agent.agent_mode = b;
        }
    }
    if let Some(v) = read("RUNWATCH_DEADLINE_SECS") {
        if let Some(n) = checked("RUNWATCH_DEADLINE_SECS", &v, parse_u64_range(&v, 1, 86_400)) {
            settings.agent.deadline_secs = n;
        }
    }
    if let Some(v) = read("RUNWATCH_ECHO_TRANSCRIPT") {
        if let Some(b) = checked("RUNWATCH_ECHO_TRANSCRIPT", &v, parse_bool(&v)) {
            settings.agent.echo_transcript = b;
        }
    }

    // ── Monitor ─────────────────────────────────────────────────────
    if let Some(v) = read("RUNWATCH_REPOSITORIES") {
        settings.monitor.repositories = parse_list(&v);
    }
    if let Some(v) = read("RUNWATCH_LOOKBACK_HOURS") {
        if let Some(n) = checked("RUNWATCH_LOOKBACK_HOURS", &v, parse_u64_range(&v, 1, 720)) {
            settings.monitor.lookback_hours = n as u32;
        }
    }
    if let Some(v) = read("RUNWATCH_FALLBACK_RECIPIENTS") {
        settings.monitor.fallback_recipients = parse_list(&v);
    }

    // ── Runtime ─────────────────────────────────────────────────────
    if let Some(v) = read("RUNWATCH_RUNTIME_COMMAND") {
        settings.runtime.command = v;
    }
    if let Some(v) = read("GITHUB_TOKEN") {
        settings.runtime.github_token = Some(SecretString::from(v));
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("RUNWATCH_LOG_JSON") {
        if let Some(b) = checked("RUNWATCH_LOG_JSON", &v, parse_bool(&v)) {
            settings.logging.json = b;
        }
    }
}

fn checked<T>(key: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        tracing::warn!(key = key, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Split a comma-separated list, trimming entries and dropping blanks.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"agent": {"deadlineSecs": 600, "agentMode": true}});
        let source = serde_json::json!({"agent": {"deadlineSecs": 60}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["agent"]["deadlineSecs"], 60);
        assert_eq!(merged["agent"]["agentMode"], true);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"repositories": ["a/b", "c/d"]});
        let source = serde_json::json!({"repositories": ["e/f"]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["repositories"], serde_json::json!(["e/f"]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_new_keys_added() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"b": 2}));
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_returns_defaults() {
        let settings = load_file_layer(Path::new("/nonexistent/settings.json")).unwrap();
        assert_eq!(settings.agent.deadline_secs, 600);
        assert_eq!(settings.monitor.lookback_hours, 24);
    }

    #[test]
    fn partial_file_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"agent": {"model": "gpt-4.1", "deadlineSecs": 120},
                "monitor": {"repositories": ["acme/api"], "fallbackRecipients": ["ops@acme.dev"]}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.agent.model.as_deref(), Some("gpt-4.1"));
        assert_eq!(settings.agent.deadline_secs, 120);
        assert!(settings.agent.agent_mode);
        assert_eq!(settings.monitor.repositories, vec!["acme/api"]);
        assert_eq!(settings.monitor.fallback_recipients, vec!["ops@acme.dev"]);
        assert_eq!(settings.runtime.command, "copilot");
    }

    #[test]
    fn module_levels_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"logging": {"level": "warn", "moduleLevels": {"runwatch_runtime": "debug"}}}"#,
        )
        .unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.logging.level, "warn");
        assert_eq!(
            settings.logging.module_levels.get("runwatch_runtime").map(String::as_str),
            Some("debug")
        );
        assert!(!settings.logging.json);
    }

    #[test]
    fn null_model_keeps_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"agent": {"model": null}}"#).unwrap();

        let settings = load_file_layer(&path).unwrap();
        assert_eq!(settings.agent.model.as_deref(), Some("gpt-5"));
    }

    #[test]
    fn invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();

        let result = load_file_layer(&path);
        assert!(matches!(result.unwrap_err(), SettingsError::Parse { .. }));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut settings = RunwatchSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("RUNWATCH_MODEL", "claude-sonnet-4"),
                ("RUNWATCH_AGENT_MODE", "off"),
                ("RUNWATCH_DEADLINE_SECS", "90"),
                ("RUNWATCH_REPOSITORIES", "acme/api, acme/web ,"),
                ("RUNWATCH_FALLBACK_RECIPIENTS", "ops@acme.dev"),
                ("RUNWATCH_LOOKBACK_HOURS", "48"),
                ("RUNWATCH_LOG_JSON", "yes"),
                ("GITHUB_TOKEN", "ghp_abc"),
            ]),
        );

        assert_eq!(settings.agent.model.as_deref(), Some("claude-sonnet-4"));
        assert!(!settings.agent.agent_mode);
        assert_eq!(settings.agent.deadline_secs, 90);
        assert_eq!(settings.monitor.repositories, vec!["acme/api", "acme/web"]);
        assert_eq!(settings.monitor.fallback_recipients, vec!["ops@acme.dev"]);
        assert_eq!(settings.monitor.lookback_hours, 48);
        assert!(settings.logging.json);
        assert_eq!(
            settings.runtime.github_token.as_ref().map(|t| t.expose_secret().to_string()),
            Some("ghp_abc".to_string())
        );
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = RunwatchSettings::default();
        apply_overrides_from(
            &mut settings,
            env(&[
                ("RUNWATCH_DEADLINE_SECS", "0"),
                ("RUNWATCH_AGENT_MODE", "maybe"),
                ("RUNWATCH_MODEL", "   "),
            ]),
        );
        assert_eq!(settings.agent.deadline_secs, 600);
        assert!(settings.agent.agent_mode);
        assert_eq!(settings.agent.model.as_deref(), Some("gpt-5"));
    }

    // ── parsing ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for v in ["true", "1", "YES", "On"] {
            assert_eq!(parse_bool(v), Some(true), "{v}");
        }
        for v in ["false", "0", "no", "OFF"] {
            assert_eq!(parse_bool(v), Some(false), "{v}");
        }
        assert_eq!(parse_bool("2"), None);
    }

    #[test]
    fn parse_u64_range_bounds() {
        assert_eq!(parse_u64_range("1", 1, 10), Some(1));
        assert_eq!(parse_u64_range("10", 1, 10), Some(10));
        assert_eq!(parse_u64_range("11", 1, 10), None);
        assert_eq!(parse_u64_range("-1", 1, 10), None);
    }

    #[test]
    fn parse_list_trims() {
        assert_eq!(parse_list(" a/b ,, c/d "), vec!["a/b", "c/d"]);
        assert!(parse_list(" , ").is_empty());
    }
}
