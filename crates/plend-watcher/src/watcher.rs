use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::{watch, Notify};
use tracing::{debug, info, warn};

use plend_ledger::ErrorKind;
use plend_types::{ApplicationKey, Clock, Timestamp};

use crate::config::WatcherConfig;
use crate::error::WatcherError;
use crate::executor::DefaultExecutor;
use crate::schedule::DeadlineSchedule;

/// What one firing pass did with each due application.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct FireReport {
    /// Defaults this pass committed.
    pub defaulted: Vec<ApplicationKey>,
    /// Already repaid or defaulted by someone else; dropped.
    pub already_resolved: Vec<ApplicationKey>,
    /// Rescheduled: the ledger's clock had not yet passed the deadline, or
    /// the trigger failed transiently.
    pub rescheduled: Vec<ApplicationKey>,
    /// Rejected permanently (unknown application, wrong trigger identity);
    /// dropped.
    pub abandoned: Vec<ApplicationKey>,
}

impl FireReport {
    pub fn is_empty(&self) -> bool {
        self.defaulted.is_empty()
            && self.already_resolved.is_empty()
            && self.rescheduled.is_empty()
            && self.abandoned.is_empty()
    }

    fn absorb(&mut self, other: FireReport) {
        self.defaulted.extend(other.defaulted);
        self.already_resolved.extend(other.already_resolved);
        self.rescheduled.extend(other.rescheduled);
        self.abandoned.extend(other.abandoned);
    }
}

/// Fires `trigger_default` for approved applications whose deadline has
/// passed.
///
/// Constructed once per process and shared behind an `Arc`. The schedule
/// lock is never held across an executor call, so triggers never block
/// scheduling.
pub struct DeadlineWatcher {
    schedule: Mutex<DeadlineSchedule>,
    executor: Arc<dyn DefaultExecutor>,
    clock: Arc<dyn Clock>,
    config: WatcherConfig,
    wake: Notify,
}

impl DeadlineWatcher {
    pub fn new(
        executor: Arc<dyn DefaultExecutor>,
        clock: Arc<dyn Clock>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            schedule: Mutex::new(DeadlineSchedule::new()),
            executor,
            clock,
            config,
            wake: Notify::new(),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, DeadlineSchedule>, WatcherError> {
        self.schedule.lock().map_err(|_| WatcherError::LockPoisoned)
    }

    /// Track an approved application whose repayment is due by `deadline`.
    pub fn schedule(&self, key: ApplicationKey, deadline: Timestamp) -> Result<(), WatcherError> {
        let fire_at = deadline.saturating_add_secs(self.config.effective_grace());
        if self.lock()?.schedule(key.clone(), fire_at) {
            debug!(application = %key, fire_at = fire_at.as_secs(), "default scheduled");
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Stop tracking `key`, typically because it was repaid.
    pub fn cancel(&self, key: &ApplicationKey) -> Result<bool, WatcherError> {
        let cancelled = self.lock()?.cancel(key);
        if cancelled {
            debug!(application = %key, "default timer cancelled");
        }
        Ok(cancelled)
    }

    pub fn is_scheduled(&self, key: &ApplicationKey) -> bool {
        self.lock().map(|s| s.contains(key)).unwrap_or(false)
    }

    pub fn pending(&self) -> usize {
        self.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn next_due(&self) -> Option<Timestamp> {
        self.lock().ok().and_then(|mut s| s.next_due())
    }

    /// Nudge the run loop to re-check the schedule now.
    pub fn wake(&self) {
        self.wake.notify_one();
    }

    /// Restart recovery: schedule every approved-unpaid application and fire
    /// the ones already overdue.
    pub fn reconcile(
        &self,
        awaiting: impl IntoIterator<Item = (ApplicationKey, Timestamp)>,
    ) -> Result<FireReport, WatcherError> {
        let mut tracked = 0usize;
        for (key, deadline) in awaiting {
            self.schedule(key, deadline)?;
            tracked += 1;
        }
        let report = self.fire_due()?;
        info!(
            tracked,
            defaulted = report.defaulted.len(),
            already_resolved = report.already_resolved.len(),
            "deadline reconciliation complete"
        );
        Ok(report)
    }

    /// Fire every entry that is due now. Entries rescheduled into the past
    /// during the pass fire in the same call.
    pub fn fire_due(&self) -> Result<FireReport, WatcherError> {
        let mut report = FireReport::default();
        loop {
            let now = self.clock.now();
            let due = self.lock()?.pop_due(now);
            if due.is_empty() {
                return Ok(report);
            }
            let pass = self.fire(due, now)?;
            let settled = pass.rescheduled.is_empty();
            report.absorb(pass);
            if !settled {
                return Ok(report);
            }
        }
    }

    fn fire(
        &self,
        due: Vec<(ApplicationKey, Timestamp)>,
        now: Timestamp,
    ) -> Result<FireReport, WatcherError> {
        let mut report = FireReport::default();
        for (key, fire_at) in due {
            match self.executor.trigger_default(&key) {
                Ok(()) => {
                    info!(application = %key, fire_at = fire_at.as_secs(), "default fired");
                    report.defaulted.push(key);
                }
                Err(err) => match err.kind() {
                    ErrorKind::StateConflict => {
                        debug!(application = %key, error = %err, "application already resolved");
                        report.already_resolved.push(key);
                    }
                    ErrorKind::Deadline => {
                        let retry_at = now.saturating_add_secs(1);
                        debug!(application = %key, retry_at = retry_at.as_secs(), "deadline not yet passed");
                        self.lock()?.schedule(key.clone(), retry_at);
                        report.rescheduled.push(key);
                    }
                    ErrorKind::Transfer | ErrorKind::Internal => {
                        let retry_at = now.saturating_add_secs(self.config.effective_retry_delay());
                        warn!(application = %key, error = %err, retry_at = retry_at.as_secs(), "default trigger failed; will retry");
                        self.lock()?.schedule(key.clone(), retry_at);
                        report.rescheduled.push(key);
                    }
                    ErrorKind::Validation
                    | ErrorKind::Authorization
                    | ErrorKind::Proof
                    | ErrorKind::NotFound => {
                        warn!(application = %key, error = %err, "default trigger rejected; dropping");
                        report.abandoned.push(key);
                    }
                },
            }
        }
        Ok(report)
    }

    /// Drive the schedule until `shutdown` flips to `true` or its sender is
    /// dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> Result<(), WatcherError> {
        info!(
            max_sleep = self.config.max_sleep,
            grace = self.config.effective_grace(),
            "deadline watcher starting"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.fire_due()?;
            if !report.is_empty() {
                debug!(?report, "watcher pass");
            }

            let now = self.clock.now();
            let sleep = self
                .next_due()
                .map(|due| now.until(due))
                .unwrap_or(self.config.max_sleep())
                .min(self.config.max_sleep());

            tokio::select! {
                _ = tokio::time::sleep(sleep) => {}
                _ = self.wake.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("deadline watcher stopped");
        Ok(())
    }
}
