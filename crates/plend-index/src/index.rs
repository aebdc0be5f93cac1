//! The commitment index: a concurrent materialized view over ledger events.
//!
//! Entries are keyed strictly on `(loan_id, commitment)`. A secondary
//! inverted map `commitment -> loans` answers discovery queries, and a
//! per-loan map answers "which commitments applied to loan X". All writes go
//! through one lock, so closely spaced events for the same key never lose
//! updates.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use plend_ledger::LedgerEvent;
use plend_types::{ApplicationKey, ApplicationStatus, Commitment, LoanId};

use crate::entry::{IndexEntry, IndexUpdate, Observation};
use crate::error::{IndexError, IndexResult};

#[derive(Default)]
struct IndexState {
    entries: HashMap<ApplicationKey, IndexEntry>,
    by_commitment: HashMap<Commitment, BTreeSet<LoanId>>,
    by_loan: HashMap<LoanId, BTreeSet<Commitment>>,
    /// Highest `seq` applied so far.
    high_water: u64,
}

impl IndexState {
    fn apply(&mut self, event: &LedgerEvent) -> IndexUpdate {
        self.high_water = self.high_water.max(event.seq);

        let Some(obs) = Observation::from_event(event) else {
            return IndexUpdate::Ignored;
        };

        let update = match self.entries.get_mut(&obs.key) {
            Some(entry) => entry.merge(&obs),
            None => {
                let key = obs.key.clone();
                self.by_commitment
                    .entry(key.commitment.clone())
                    .or_default()
                    .insert(key.loan_id);
                self.by_loan
                    .entry(key.loan_id)
                    .or_default()
                    .insert(key.commitment.clone());
                self.entries
                    .insert(key.clone(), IndexEntry::from_observation(key, &obs));
                IndexUpdate::Inserted(obs.status)
            }
        };

        debug!(application = %obs.key, seq = event.seq, ?update, "index upsert");
        update
    }
}

/// Off-chain discovery view of every application the ledger has reported.
///
/// Applying the same event twice, or a complete set of events in any order,
/// converges to the same view.
#[derive(Default)]
pub struct CommitmentIndex {
    inner: RwLock<IndexState>,
}

impl std::fmt::Debug for CommitmentIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommitmentIndex")
            .field("entries", &self.len())
            .field("high_water", &self.high_water())
            .finish()
    }
}

impl CommitmentIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_state(&self) -> IndexResult<RwLockReadGuard<'_, IndexState>> {
        self.inner.read().map_err(|_| IndexError::LockPoisoned)
    }

    fn write_state(&self) -> IndexResult<RwLockWriteGuard<'_, IndexState>> {
        self.inner.write().map_err(|_| IndexError::LockPoisoned)
    }

    // ---------------------------------------------------------------
    // Upserts
    // ---------------------------------------------------------------

    /// Upsert from one ledger event.
    pub fn apply(&self, event: &LedgerEvent) -> IndexResult<IndexUpdate> {
        Ok(self.write_state()?.apply(event))
    }

    /// Apply a batch of events, returning how many changed the view.
    pub fn apply_all<'a>(
        &self,
        events: impl IntoIterator<Item = &'a LedgerEvent>,
    ) -> IndexResult<usize> {
        let mut changed = 0;
        for event in events {
            if matches!(
                self.apply(event)?,
                IndexUpdate::Inserted(_) | IndexUpdate::Advanced { .. }
            ) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Replace the view with one built from `events`. Readers see either the
    /// old view or the complete new one.
    pub fn rebuild<'a>(&self, events: impl IntoIterator<Item = &'a LedgerEvent>) -> IndexResult<()> {
        let mut fresh = IndexState::default();
        for event in events {
            fresh.apply(event);
        }
        let (entries, high_water) = (fresh.entries.len(), fresh.high_water);
        *self.write_state()? = fresh;
        debug!(entries, high_water, "index rebuilt");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------

    pub fn get(&self, key: &ApplicationKey) -> IndexResult<Option<IndexEntry>> {
        Ok(self.read_state()?.entries.get(key).cloned())
    }

    /// Every application made under `commitment`, ordered by loan id.
    pub fn applications_for_commitment(&self, commitment: &Commitment) -> IndexResult<Vec<IndexEntry>> {
        let state = self.read_state()?;
        let Some(loans) = state.by_commitment.get(commitment) else {
            return Ok(Vec::new());
        };
        Ok(loans
            .iter()
            .filter_map(|loan_id| {
                state
                    .entries
                    .get(&ApplicationKey::new(*loan_id, commitment.clone()))
                    .cloned()
            })
            .collect())
    }

    /// Commitments that applied to `loan_id`, in lexical order.
    pub fn commitments_for_loan(&self, loan_id: LoanId) -> IndexResult<Vec<Commitment>> {
        let state = self.read_state()?;
        Ok(state
            .by_loan
            .get(&loan_id)
            .map(|commitments| commitments.iter().cloned().collect())
            .unwrap_or_default())
    }

    /// Whether any application under `commitment` has been seen.
    pub fn is_known(&self, commitment: &Commitment) -> IndexResult<bool> {
        Ok(self.read_state()?.by_commitment.contains_key(commitment))
    }

    /// Approved applications not yet repaid or defaulted, earliest deadline
    /// first.
    pub fn awaiting_repayment(&self) -> IndexResult<Vec<IndexEntry>> {
        let state = self.read_state()?;
        let mut pending: Vec<IndexEntry> = state
            .entries
            .values()
            .filter(|entry| entry.awaiting_repayment())
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            a.repayment_deadline
                .cmp(&b.repayment_deadline)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(pending)
    }

    /// `(loan, commitment) -> status` for every indexed application.
    pub fn status_view(&self) -> IndexResult<BTreeMap<ApplicationKey, ApplicationStatus>> {
        let state = self.read_state()?;
        Ok(state
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.status))
            .collect())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|state| state.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest ledger `seq` the index has consumed.
    pub fn high_water(&self) -> u64 {
        self.inner.read().map(|state| state.high_water).unwrap_or(0)
    }
}
