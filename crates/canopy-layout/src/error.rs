//! Error types for canopy-layout.

use thiserror::Error;

/// Result type for layout operations.
pub type Result<T> = std::result::Result<T, LayoutError>;

/// Errors that can occur when configuring a layout.
#[derive(Debug, Error, PartialEq)]
pub enum LayoutError {
    /// A simulation constant is non-finite or out of range.
    #[error("invalid simulation parameter {name}: {value}")]
    InvalidConfig { name: &'static str, value: f64 },

    /// A viewport zoom factor that cannot be inverted.
    #[error("invalid zoom factor: {0}")]
    InvalidZoom(f64),

    /// A position too large for the spatial index.
    #[error("position ({x}, {y}) is out of bounds")]
    OutOfBounds { x: f64, y: f64 },
}
