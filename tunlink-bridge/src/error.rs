//! Error types for the control bridge

use thiserror::Error;

/// Result type alias for bridge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur during bridge operations
///
/// None of these cross the facade boundary raw — every operation converts
/// its error into a response envelope with a non-zero code.
#[derive(Debug, Error)]
pub enum Error {
    /// Failed to create or persist the tunnel profile
    #[error("failed to create tunnel profile: {0}")]
    ProfileCreation(String),

    /// Failed to remove the tunnel profile
    #[error("failed to remove tunnel profile: {0}")]
    ProfileRemoval(String),

    /// The extension process is not running or did not answer in time.
    /// Internal-only: the status resolver absorbs this into the fallback
    /// path and stop treats it as already-stopped.
    #[error("tunnel extension unreachable: {0}")]
    ExtensionUnreachable(String),

    /// The extension rejected or failed a start instruction
    #[error("failed to start tunnel: {0}")]
    ExtensionStart(String),

    /// The extension rejected or failed a stop instruction
    #[error("failed to stop tunnel: {0}")]
    ExtensionStop(String),

    /// The supplied tunnel configuration is not valid
    #[error("invalid tunnel configuration: {0}")]
    ConfigInvalid(String),

    /// Bridge configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Failed to parse a configuration file
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encode/decode error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The control worker thread has exited
    #[error("control worker is not running")]
    WorkerGone,
}

impl Error {
    /// Envelope code for this error. Always non-zero.
    pub fn code(&self) -> i32 {
        match self {
            Error::ProfileCreation(_) => -2,
            Error::ProfileRemoval(_) => -3,
            Error::ExtensionStart(_) => -4,
            Error::ExtensionStop(_) => -5,
            Error::ConfigInvalid(_) => -6,
            Error::ExtensionUnreachable(_) => -7,
            _ => -1,
        }
    }
}
