//! CLI-specific error types and exit code mapping

use sifter_core::error::{PluginError, SifterError};
use sifter_dispatch::DispatchError;

/// CLI-specific error type.
///
/// The `exit_code()` method maps errors to process exit codes.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Configuration loading or validation failure.
    #[error("configuration error: {0}")]
    Config(String),

    /// Plugin registration or lookup failure.
    #[error("plugin error: {0}")]
    Plugin(#[from] PluginError),

    /// Fatal engine failure (rule load, error queue, source).
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// JSON serialisation failed during output rendering.
    #[error("json output error: {0}")]
    JsonSerialize(#[from] serde_json::Error),

    /// IO error (file read, stdout write, etc.).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CliError {
    /// Map the error to a process exit code.
    ///
    /// Code 4 is not an error: the binary returns it when the run completed
    /// but some payloads were unmatched, queued, or undeliverable.
    ///
    /// | Code | Meaning                     |
    /// |------|-----------------------------|
    /// | 0    | Success                     |
    /// | 1    | General / dispatch error    |
    /// | 2    | Configuration error         |
    /// | 3    | Plugin not found / rejected |
    /// | 4    | Run had final failures      |
    /// | 10   | IO error                    |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Plugin(_) => 3,
            Self::Io(_) => 10,
            Self::Dispatch(_) | Self::JsonSerialize(_) => 1,
        }
    }
}

impl From<SifterError> for CliError {
    fn from(e: SifterError) -> Self {
        match e {
            SifterError::Config(e) => Self::Config(e.to_string()),
            SifterError::Plugin(e) => Self::Plugin(e),
            SifterError::Io(e) => Self::Io(e),
            SifterError::Dispatch(reason) => Self::Dispatch(reason),
        }
    }
}

impl From<DispatchError> for CliError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::Config { .. }
            | DispatchError::InvalidMetadataFormat(_)
            | DispatchError::InvalidRateLimit(_) => Self::Config(e.to_string()),
            DispatchError::Plugin(e) => Self::Plugin(e),
            other => Self::Dispatch(other.to_string()),
        }
    }
}
