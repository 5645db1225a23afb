//! Settings type definitions.
//!
//! Every section is `#[serde(rename_all = "camelCase", default)]` so a
//! settings file may name only the fields it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for one orchestrator instance.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgencySettings {
    /// Subscriber configuration used by embedding binaries.
    pub logging: LoggingSettings,
    /// Memory scope behaviour.
    pub memory: MemorySettings,
    /// Job registry behaviour.
    pub jobs: JobSettings,
    /// Planner behaviour.
    pub planner: PlannerSettings,
    /// Event bus behaviour.
    pub events: EventSettings,
}

impl AgencySettings {
    /// Reject values that parse but make no sense.
    pub fn validate(&self) -> Result<()> {
        if self.memory.max_history == 0 {
            return Err(SettingsError::InvalidValue {
                field: "memory.maxHistory",
                reason: "must be at least 1",
            });
        }
        if self.planner.max_tasks == 0 {
            return Err(SettingsError::InvalidValue {
                field: "planner.maxTasks",
                reason: "must be at least 1",
            });
        }
        Ok(())
    }
}

/// Logging configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Memory scope configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemorySettings {
    /// History entries kept per scope; the oldest are evicted first.
    pub max_history: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self { max_history: 1000 }
    }
}

/// Job registry configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct JobSettings {
    /// Retry bound used when a caller does not pass one.
    pub default_max_retries: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            default_max_retries: 3,
        }
    }
}

/// Planner configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlannerSettings {
    /// Tasks beyond this count are dropped from a plan.
    pub max_tasks: usize,
    /// Include the few-shot examples in planning prompts.
    pub include_examples: bool,
}

impl Default for PlannerSettings {
    fn default() -> Self {
        Self {
            max_tasks: 20,
            include_examples: true,
        }
    }
}

/// Event bus configuration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EventSettings {
    /// Log failing or panicking listeners at `warn`.
    pub log_listener_errors: bool,
}

impl Default for EventSettings {
    fn default() -> Self {
        Self {
            log_listener_errors: true,
        }
    }
}
