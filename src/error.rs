//! Errors surfaced while resolving or building a network.

/// Main library error type.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The requested topology is not part of the supported family.
    #[error("unsupported configuration: {reason}")]
    UnsupportedConfiguration { reason: String },

    /// The requested operation is intentionally not provided by this crate.
    #[error("not supported: {reason}")]
    NotSupported { reason: String },

    /// Error propagated from the tensor runtime.
    #[error(transparent)]
    Candle(#[from] candle::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
