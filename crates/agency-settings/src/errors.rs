//! Settings error types.

use std::path::PathBuf;

use thiserror::Error;

/// Why an `AgencySettings` value could not be produced.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but reading it failed.
    #[error("cannot read {}: {source}", path.display())]
    Io {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O failure.
        source: std::io::Error,
    },
    /// The merged document does not deserialize into `AgencySettings`.
    #[error("malformed settings: {0}")]
    Json(#[from] serde_json::Error),
    /// A field deserialized but is outside its allowed range.
    #[error("settings field {field} {reason}")]
    InvalidValue {
        /// camelCase path of the field, e.g. `memory.maxHistory`.
        field: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
