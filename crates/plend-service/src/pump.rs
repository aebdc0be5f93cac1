use std::sync::{Arc, Mutex};

use tracing::debug;

use plend_fabric::EventRelay;
use plend_index::{CommitmentIndex, IndexUpdate};
use plend_ledger::{EventPayload, LedgerEvent, LoanLedger};
use plend_types::ApplicationKey;
use plend_watcher::DeadlineWatcher;

use crate::error::{ServiceError, ServiceResult};

/// Outcome of one [`EventPump::sync`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PumpReport {
    /// Ledger events consumed this pass.
    pub consumed: usize,
    /// How many of them changed the commitment index.
    pub index_changes: usize,
    /// Cursor after the pass.
    pub cursor: u64,
}

/// Tails the ledger's event log in `seq` order and feeds each event to the
/// relay, the index and the watcher.
///
/// One pass at a time: the cursor lock serializes consumers, so two events
/// for the same application are never applied concurrently. The cursor only
/// moves past an event once every consumer accepted it.
pub struct EventPump {
    ledger: Arc<dyn LoanLedger>,
    relay: Arc<EventRelay>,
    index: Arc<CommitmentIndex>,
    watcher: Arc<DeadlineWatcher>,
    cursor: Mutex<u64>,
}

impl EventPump {
    pub fn new(
        ledger: Arc<dyn LoanLedger>,
        relay: Arc<EventRelay>,
        index: Arc<CommitmentIndex>,
        watcher: Arc<DeadlineWatcher>,
        start_after: u64,
    ) -> Self {
        Self {
            ledger,
            relay,
            index,
            watcher,
            cursor: Mutex::new(start_after),
        }
    }

    /// `seq` of the last event fully consumed.
    pub fn cursor(&self) -> u64 {
        self.cursor.lock().map(|c| *c).unwrap_or(0)
    }

    /// Consume every ledger event past the cursor.
    pub fn sync(&self) -> ServiceResult<PumpReport> {
        let mut cursor = self
            .cursor
            .lock()
            .map_err(|_| ServiceError::Internal("pump cursor lock poisoned".into()))?;

        let events = self.ledger.events_since(*cursor, None)?;
        let mut report = PumpReport {
            cursor: *cursor,
            ..PumpReport::default()
        };

        for event in &events {
            self.relay.publish(event)?;
            if matches!(
                self.index.apply(event)?,
                IndexUpdate::Inserted(_) | IndexUpdate::Advanced { .. }
            ) {
                report.index_changes += 1;
            }
            self.track(event)?;

            *cursor = event.seq;
            report.cursor = event.seq;
            report.consumed += 1;
        }

        if report.consumed > 0 {
            debug!(
                consumed = report.consumed,
                index_changes = report.index_changes,
                cursor = report.cursor,
                "event pump pass"
            );
        }
        Ok(report)
    }

    fn track(&self, event: &LedgerEvent) -> ServiceResult<()> {
        match &event.payload {
            EventPayload::BorrowerApproved {
                commitment,
                repayment_deadline,
                ..
            } => {
                let key = ApplicationKey::new(event.loan_id, commitment.clone());
                self.watcher.schedule(key, *repayment_deadline)?;
            }
            EventPayload::LoanRepaid { commitment, .. } | EventPayload::LoanDefaulted { commitment } => {
                let key = ApplicationKey::new(event.loan_id, commitment.clone());
                self.watcher.cancel(&key)?;
            }
            _ => {}
        }
        Ok(())
    }
}
