use std::io;

/// Errors produced by the event relay.
#[derive(Debug, thiserror::Error)]
pub enum FabricError {
    /// I/O error during journal operations.
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A journal or router lock was poisoned by a panicking holder.
    #[error("{0} lock poisoned")]
    LockPoisoned(&'static str),
}

/// Convenience alias used throughout the fabric crate.
pub type Result<T> = std::result::Result<T, FabricError>;
