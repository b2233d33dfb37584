//! # runwatch-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`RunwatchSettings::default()`]
//! 2. **User file**: `~/.runwatch/settings.json` (deep-merged over defaults)
//! 3. **Environment variables**: `RUNWATCH_*` overrides (highest priority)
//!
//! Command-line flags are applied on top by the binary.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;
pub mod validate;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
pub use validate::{is_email_like, validate};
