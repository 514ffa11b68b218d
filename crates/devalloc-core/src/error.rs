//! Common error types for devalloc.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core errors that can occur throughout the devalloc system.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A device type string did not name a known type.
    #[error("unsupported device type: {0}")]
    UnsupportedDeviceType(String),

    /// An identifier was empty.
    #[error("empty identifier for {0}")]
    EmptyId(&'static str),
}
