//! # logtail-settings
//!
//! Configuration with layered sources. In priority order:
//!
//! 1. **Compiled defaults**: [`LogtailSettings::default()`]
//! 2. **Settings file**: `~/.logtail/settings.json`, deep-merged over defaults
//! 3. **Environment variables**: `LOGTAIL_*` overrides
//!
//! The binary applies CLI flags on top of the loaded value. Settings are
//! loaded once at startup and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{apply_env_overrides, deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
