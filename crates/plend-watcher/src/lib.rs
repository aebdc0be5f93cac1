//! Deadline watcher for PrivLend.
//!
//! Every approved application has a repayment deadline. The watcher keeps
//! one scheduled entry per such application in a deadline-ordered heap,
//! cancels it when the loan is repaid, and fires `trigger_default` once the
//! deadline has passed. Races with manual triggers or last-moment repayments
//! are settled by the ledger: a `StateConflict` answer means the application
//! was already resolved.
//!
//! After a restart the schedule is empty; [`DeadlineWatcher::reconcile`]
//! re-derives it from the approved-unpaid set and fires everything already
//! overdue in the same pass.

pub mod config;
pub mod error;
pub mod executor;
pub mod schedule;
pub mod watcher;

pub use config::WatcherConfig;
pub use error::WatcherError;
pub use executor::{DefaultExecutor, LedgerExecutor, TriggerIdentity};
pub use schedule::DeadlineSchedule;
pub use watcher::{DeadlineWatcher, FireReport};
