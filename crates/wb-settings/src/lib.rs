//! # wb-settings
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults**: [`WorkbenchSettings::default()`]
//! 2. **Settings file**: `~/.workbench/settings.json`, or the file named by
//!    `WB_SETTINGS_PATH` (deep-merged over defaults)
//! 3. **Environment variables**: `WB_*` overrides (highest priority)
//!
//! Settings are loaded once by the binary and passed down explicitly.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
