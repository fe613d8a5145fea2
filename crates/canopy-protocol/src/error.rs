//! Error types for canopy-protocol.

use thiserror::Error;

/// Result type for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can occur while decoding or encoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The frame has no string `type` discriminator.
    #[error("frame has no type discriminator")]
    MissingType,

    /// A known discriminator carried a payload of the wrong shape.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },

    /// Encoding an outbound message failed.
    #[error("encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// A JSON-RPC response with neither `result` nor `error`.
    #[error("response {0:?} carries neither result nor error")]
    EmptyResponse(Option<serde_json::Value>),
}
