//! # agency-settings
//!
//! Configuration for an `Agency` instance, loaded from three layers (in
//! priority order):
//!
//! 1. **Compiled defaults** ([`AgencySettings::default()`])
//! 2. **Settings file** (`~/.agency/settings.json` or an explicit path),
//!    deep-merged over the defaults
//! 3. **Environment**: `AGENCY_*` overrides
//!
//! There is no process-wide settings singleton; each `Agency` owns the value
//! it was built with.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::{
    AgencySettings, EventSettings, JobSettings, LoggingSettings, MemorySettings, PlannerSettings,
};
