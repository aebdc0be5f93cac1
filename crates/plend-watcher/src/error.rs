/// Errors produced by the deadline watcher itself.
///
/// Failures of individual default triggers are not errors here; they are
/// classified into a [`crate::FireReport`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatcherError {
    #[error("deadline schedule lock poisoned")]
    LockPoisoned,
}
