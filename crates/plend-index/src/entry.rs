//! Index entries and the merge rule that makes event replay idempotent.

use serde::{Deserialize, Serialize};

use plend_ledger::{EventPayload, LedgerEvent};
use plend_types::{ApplicationKey, ApplicationStatus, Commitment, LoanId, Timestamp};

/// What the index knows about one application.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub loan_id: LoanId,
    pub commitment: Commitment,
    pub status: ApplicationStatus,
    /// Lowest `seq` among the events that reported `status`.
    pub status_seq: u64,
    /// Highest `seq` merged into this entry.
    pub last_seq: u64,
    pub applied_at: Option<Timestamp>,
    pub approved_at: Option<Timestamp>,
    pub repayment_deadline: Option<Timestamp>,
    pub repayment_amount: Option<u128>,
    /// When the application reached `Repaid` or `Defaulted`.
    pub resolved_at: Option<Timestamp>,
}

impl IndexEntry {
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(self.loan_id, self.commitment.clone())
    }

    /// Approved, not yet repaid or defaulted, with a known deadline.
    pub fn awaiting_repayment(&self) -> bool {
        self.status == ApplicationStatus::Approved && self.repayment_deadline.is_some()
    }

    pub(crate) fn from_observation(key: ApplicationKey, obs: &Observation) -> Self {
        let mut entry = Self {
            loan_id: key.loan_id,
            commitment: key.commitment,
            status: obs.status,
            status_seq: obs.seq,
            last_seq: obs.seq,
            applied_at: None,
            approved_at: None,
            repayment_deadline: None,
            repayment_amount: None,
            resolved_at: None,
        };
        entry.fill(obs);
        entry
    }

    /// Fold one observation in.
    ///
    /// Status only moves up the lifecycle rank. If two different terminal
    /// states are ever reported, the one with the lower `seq` wins. Fields
    /// keep the minimum value reported and are never cleared, so the result
    /// does not depend on delivery order.
    pub(crate) fn merge(&mut self, obs: &Observation) -> IndexUpdate {
        self.fill(obs);
        self.last_seq = self.last_seq.max(obs.seq);

        let from = self.status;
        if obs.status == from {
            self.status_seq = self.status_seq.min(obs.seq);
            return IndexUpdate::Unchanged;
        }

        let advances = obs.status.rank() > from.rank()
            || (obs.status.rank() == from.rank() && obs.seq < self.status_seq);
        if !advances {
            return IndexUpdate::Unchanged;
        }

        self.status = obs.status;
        self.status_seq = obs.seq;
        IndexUpdate::Advanced {
            from,
            to: obs.status,
        }
    }

    fn fill(&mut self, obs: &Observation) {
        let slot = match obs.status {
            ApplicationStatus::Pending => &mut self.applied_at,
            ApplicationStatus::Approved => &mut self.approved_at,
            ApplicationStatus::Repaid | ApplicationStatus::Defaulted => &mut self.resolved_at,
        };
        keep_min(slot, obs.at);
        if let Some(deadline) = obs.repayment_deadline {
            keep_min(&mut self.repayment_deadline, deadline);
        }
        if let Some(amount) = obs.repayment_amount {
            keep_min(&mut self.repayment_amount, amount);
        }
    }
}

fn keep_min<T: Ord + Copy>(slot: &mut Option<T>, value: T) {
    *slot = Some(slot.map_or(value, |current| current.min(value)));
}

/// Effect of applying one event to the index.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IndexUpdate {
    /// First event seen for this application.
    Inserted(ApplicationStatus),
    /// The application's status moved forward.
    Advanced {
        from: ApplicationStatus,
        to: ApplicationStatus,
    },
    /// A replayed, stale or same-status event; nothing visible changed.
    Unchanged,
    /// Not an application lifecycle event.
    Ignored,
}

/// The application-relevant content of one ledger event.
pub(crate) struct Observation {
    pub key: ApplicationKey,
    pub status: ApplicationStatus,
    pub seq: u64,
    pub at: Timestamp,
    pub repayment_deadline: Option<Timestamp>,
    pub repayment_amount: Option<u128>,
}

impl Observation {
    /// `None` for offer-level events and for the lender-private reveal.
    pub fn from_event(event: &LedgerEvent) -> Option<Self> {
        let (commitment, status, repayment_deadline, repayment_amount) = match &event.payload {
            EventPayload::ApplicationSubmitted { commitment, .. } => {
                (commitment, ApplicationStatus::Pending, None, None)
            }
            EventPayload::BorrowerApproved {
                commitment,
                repayment_deadline,
                repayment_amount,
                ..
            } => (
                commitment,
                ApplicationStatus::Approved,
                Some(*repayment_deadline),
                Some(*repayment_amount),
            ),
            EventPayload::LoanRepaid { commitment, .. } => {
                (commitment, ApplicationStatus::Repaid, None, None)
            }
            EventPayload::LoanDefaulted { commitment } => {
                (commitment, ApplicationStatus::Defaulted, None, None)
            }
            EventPayload::IdentityRevealed { .. }
            | EventPayload::LoanOfferCreated { .. }
            | EventPayload::LoanOfferCancelled { .. } => return None,
        };
        Some(Self {
            key: ApplicationKey::new(event.loan_id, commitment.clone()),
            status,
            seq: event.seq,
            at: event.at,
            repayment_deadline,
            repayment_amount,
        })
    }
}
