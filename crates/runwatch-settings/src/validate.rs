//! Settings validation and shared value checks.

use std::sync::OnceLock;

use regex::Regex;

use crate::errors::{Result, SettingsError};
use crate::types::RunwatchSettings;

const MAX_DEADLINE_SECS: u64 = 86_400;

/// `local@domain.tld` with no whitespace. Deliberately loose.
pub fn is_email_like(address: &str) -> bool {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL
        .get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s.]+$").expect("email pattern is valid"))
        .is_match(address)
}

/// Reject settings a run cannot start with.
pub fn validate(settings: &RunwatchSettings) -> Result<()> {
    if settings.monitor.repositories.iter().all(|r| r.trim().is_empty()) {
        return Err(SettingsError::invalid(
            "monitor.repositories",
            "must name at least one repository",
        ));
    }
    if let Some(bad) = settings
        .monitor
        .repositories
        .iter()
        .find(|r| !r.trim().is_empty() && !r.contains('/'))
    {
        return Err(SettingsError::invalid(
            "monitor.repositories",
            format!("'{bad}' is not an owner/name slug"),
        ));
    }
    if settings.agent.deadline_secs == 0 || settings.agent.deadline_secs > MAX_DEADLINE_SECS {
        return Err(SettingsError::invalid(
            "agent.deadlineSecs",
            format!("must be between 1 and {MAX_DEADLINE_SECS}"),
        ));
    }
    if settings.notification.tool_name.trim().is_empty() {
        return Err(SettingsError::invalid("notification.toolName", "must not be empty"));
    }
    if settings.monitor.fallback_recipients.is_empty() {
        return Err(SettingsError::invalid(
            "monitor.fallbackRecipients",
            "must name at least one address",
        ));
    }
    if let Some(bad) = settings
        .monitor
        .fallback_recipients
        .iter()
        .find(|r| !is_email_like(r.trim()))
    {
        return Err(SettingsError::invalid(
            "monitor.fallbackRecipients",
            format!("'{bad}' is not an email address"),
        ));
    }
    if settings.runtime.command.trim().is_empty() {
        return Err(SettingsError::invalid("runtime.command", "must not be empty"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_like_addresses() {
        assert!(is_email_like("dev@example.com"));
        assert!(is_email_like("first.last+ci@mail.example.co"));
        assert!(!is_email_like("dev@example"));
        assert!(!is_email_like("dev example@example.com"));
        assert!(!is_email_like("@example.com"));
        assert!(!is_email_like(""));
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&RunwatchSettings::default()).is_ok());
    }

    #[test]
    fn rejects_empty_repositories() {
        let mut settings = RunwatchSettings::default();
        settings.monitor.repositories = vec![" ".into()];
        assert!(matches!(validate(&settings), Err(SettingsError::Invalid { field: "monitor.repositories", .. })));
    }

    #[test]
    fn rejects_bare_repository_name() {
        let mut settings = RunwatchSettings::default();
        settings.monitor.repositories = vec!["api".into()];
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("'api'"));
    }

    #[test]
    fn rejects_zero_deadline() {
        let mut settings = RunwatchSettings::default();
        settings.agent.deadline_secs = 0;
        let err = validate(&settings).unwrap_err();
        assert_eq!(err.field(), Some("agent.deadlineSecs"));
    }

    #[test]
    fn rejects_bad_fallback_recipient() {
        let mut settings = RunwatchSettings::default();
        settings.monitor.fallback_recipients = vec!["ops@example.com".into(), "ops-team".into()];
        let err = validate(&settings).unwrap_err();
        assert!(err.to_string().contains("ops-team"));
    }

    #[test]
    fn rejects_empty_fallback_audience() {
        let mut settings = RunwatchSettings::default();
        settings.monitor.fallback_recipients.clear();
        let err = validate(&settings).unwrap_err();
        assert_eq!(err.field(), Some("monitor.fallbackRecipients"));
    }

    #[test]
    fn rejects_blank_tool_name() {
        let mut settings = RunwatchSettings::default();
        settings.notification.tool_name = String::new();
        assert!(validate(&settings).is_err());
    }
}
