//! Error types for canopy-vis.

use canopy_layout::LayoutError;
use canopy_transfer::TransferError;
use thiserror::Error;

/// Result type for the engine and server.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// An environment variable or argument could not be used.
    #[error("invalid {key}={value:?}: {reason}")]
    Config {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The engine task is gone.
    #[error("engine stopped")]
    EngineStopped,
}
