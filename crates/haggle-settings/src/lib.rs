//! # haggle-settings
//!
//! Layered configuration for the chat server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** ([`HaggleSettings::default()`])
//! 2. **User file** `~/.haggle/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** `HAGGLE_*` (highest priority)
//!
//! Command-line flags in the binary are applied on top of the result.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, default_db_path, haggle_home, load_settings,
    load_settings_from_path, settings_path, validate,
};
pub use types::*;
