use std::path::PathBuf;

use crate::http::request::ParseError as HttpParseError;

/// Crate-wide error type. Replaces this crate's predecessor's `CleanError(Box<dyn Error>)`
/// wrapper (`src/error.rs`) with a `thiserror` enum-of-causes — the pack's
/// usual shape for a fallible boundary (e.g. `DataDog-libdatadog/datadog-profiling`).
#[derive(Debug, thiserror::Error)]
pub enum AdpError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error in {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: config_lang::ConfigError,
    },

    #[error("config validation failed: {0}")]
    ConfigValidation(String),

    #[error("malformed request: {0}")]
    Request(#[from] HttpParseError),

    #[error("adp error in {file}:{chunk}: {message}")]
    Adp {
        file: String,
        chunk: usize,
        message: String,
    },

    #[error("cache timeout waiting for update to key '{0}'")]
    CacheTimeout(String),

    #[error("cache update for key '{0}' failed")]
    CacheUpdateFailed(String),

    #[error("cache value for key '{0}' is not a valid integer")]
    CacheTypeMismatch(String),

    #[error("admission rejected: {0}")]
    Admission(String),

    #[error("driver '{name}' failed to start: {message}")]
    DriverStart { name: String, message: String },

    #[error("pid file error: {0}")]
    PidFile(String),
}

pub type Result<T> = std::result::Result<T, AdpError>;
