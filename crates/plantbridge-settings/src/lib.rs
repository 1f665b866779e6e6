//! # plantbridge-settings
//!
//! Layered configuration for the plantbridge server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`PlantSettings::default()`]
//! 2. **User file**: `~/.plantbridge/settings.json` or `--config` (deep-merged)
//! 3. **Environment variables**: `PLANTBRIDGE_*` overrides (highest priority)

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{
    apply_env_overrides, deep_merge, load_settings, load_settings_from_path, plantbridge_dir,
    settings_path,
};
pub use types::*;
