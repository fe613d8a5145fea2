//! Error types for canopy-transfer.

use std::time::Duration;

use canopy_protocol::rpc::RpcError;
use canopy_protocol::ProtocolError;
use thiserror::Error;

/// Result type for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;

/// Errors surfaced by transports, the connection manager and the RPC client.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Socket-level failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The channel closed before the operation completed.
    #[error("channel closed")]
    Closed,

    /// The owning manager or client has been disposed.
    #[error("disposed")]
    Disposed,

    /// The peer answered a call with an error object.
    #[error("rpc error {}: {}", .0.code, .0.message)]
    Rpc(RpcError),

    /// No response arrived in time.
    #[error("{method} timed out after {after:?}")]
    Timeout { method: String, after: Duration },

    /// Encoding or decoding a message failed.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
