//! Settings loading: defaults, then the settings file, then the environment.
//!
//! Merge rules for the file layer:
//! - objects merge recursively, the file winning per key
//! - arrays and primitives are replaced wholesale
//! - `null` in the file keeps the default

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::AgencySettings;

/// `~/.agency/settings.json`.
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".agency").join("settings.json")
}

/// Load from [`settings_path`] and the process environment.
pub fn load_settings() -> Result<AgencySettings> {
    load_settings_from_path(&settings_path())
}

/// Load from `path` and the process environment.
///
/// A missing file yields defaults; unreadable or malformed files are errors.
pub fn load_settings_from_path(path: &Path) -> Result<AgencySettings> {
    load_with_env(path, |name| std::env::var(name).ok())
}

/// Load from `path`, resolving overrides through `lookup` instead of the
/// process environment.
pub fn load_with_env<F>(path: &Path, lookup: F) -> Result<AgencySettings>
where
    F: Fn(&str) -> Option<String>,
{
    let defaults = serde_json::to_value(AgencySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    let mut settings: AgencySettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings, lookup);
    settings.validate()?;
    Ok(settings)
}

/// Recursive JSON merge; see the module docs for the rules.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `AGENCY_*` overrides. Unparseable or out-of-range values are logged
/// and ignored.
///
/// | Variable | Field |
/// |----------|-------|
/// | `AGENCY_LOG_LEVEL` | `logging.level` |
/// | `AGENCY_LOG_JSON` | `logging.json` |
/// | `AGENCY_MEMORY_MAX_HISTORY` | `memory.maxHistory` (1..=1000000) |
/// | `AGENCY_MAX_RETRIES` | `jobs.defaultMaxRetries` (0..=100) |
/// | `AGENCY_PLANNER_MAX_TASKS` | `planner.maxTasks` (1..=500) |
/// | `AGENCY_PLANNER_EXAMPLES` | `planner.includeExamples` |
/// | `AGENCY_LOG_LISTENER_ERRORS` | `events.logListenerErrors` |
pub fn apply_env_overrides<F>(settings: &mut AgencySettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let env = EnvReader { lookup };

    if let Some(v) = env.string("AGENCY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.boolean("AGENCY_LOG_JSON") {
        settings.logging.json = v;
    }
    if let Some(v) = env.usize_in("AGENCY_MEMORY_MAX_HISTORY", 1, 1_000_000) {
        settings.memory.max_history = v;
    }
    if let Some(v) = env.u32_in("AGENCY_MAX_RETRIES", 0, 100) {
        settings.jobs.default_max_retries = v;
    }
    if let Some(v) = env.usize_in("AGENCY_PLANNER_MAX_TASKS", 1, 500) {
        settings.planner.max_tasks = v;
    }
    if let Some(v) = env.boolean("AGENCY_PLANNER_EXAMPLES") {
        settings.planner.include_examples = v;
    }
    if let Some(v) = env.boolean("AGENCY_LOG_LISTENER_ERRORS") {
        settings.events.log_listener_errors = v;
    }
}

// ── Pure parsing functions ──────────────────────────────────────────────────

/// Case-insensitive `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a `u32` within `min..=max`.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

/// Parse a `usize` within `min..=max`.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.trim().parse().ok()?;
    (min..=max).contains(&n).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let val = (self.lookup)(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, kind, "invalid env override, ignoring");
        }
        result
    }

    fn boolean(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u32_in(&self, name: &str, min: u32, max: u32) -> Option<u32> {
        self.parsed(name, "u32", |v| parse_u32_range(v, min, max))
    }

    fn usize_in(&self, name: &str, min: usize, max: usize) -> Option<usize> {
        self.parsed(name, "usize", |v| parse_usize_range(v, min, max))
    }
}
