//! Error types for the index crate.

/// Errors that can occur during index operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IndexError {
    /// A reader or writer panicked while holding the index lock.
    #[error("commitment index lock poisoned")]
    LockPoisoned,
}

/// Convenience alias for index results.
pub type IndexResult<T> = Result<T, IndexError>;
