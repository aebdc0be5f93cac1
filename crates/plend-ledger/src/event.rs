use std::fmt;

use serde::{Deserialize, Serialize};

use plend_types::{Address, ApplicationKey, Commitment, LoanId, ProofHash, Timestamp};

/// Classification of ledger events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    LoanOfferCreated,
    LoanOfferCancelled,
    ApplicationSubmitted,
    BorrowerApproved,
    LoanRepaid,
    LoanDefaulted,
    IdentityRevealed,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LoanOfferCreated => "LoanOfferCreated",
            Self::LoanOfferCancelled => "LoanOfferCancelled",
            Self::ApplicationSubmitted => "ApplicationSubmitted",
            Self::BorrowerApproved => "BorrowerApproved",
            Self::LoanRepaid => "LoanRepaid",
            Self::LoanDefaulted => "LoanDefaulted",
            Self::IdentityRevealed => "IdentityRevealed",
        };
        f.write_str(s)
    }
}

/// Event-specific data.
///
/// No public payload carries a borrower address. `IdentityRevealed` is the
/// one private payload and is filtered out for every viewer but its lender.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventPayload {
    LoanOfferCreated {
        lender: Address,
        amount_per_slot: u128,
        total_slots: u32,
        interest_bps: u32,
        repayment_period: u64,
        min_score: u64,
    },
    LoanOfferCancelled {
        lender: Address,
    },
    ApplicationSubmitted {
        commitment: Commitment,
        proof_hash: ProofHash,
    },
    BorrowerApproved {
        commitment: Commitment,
        repayment_deadline: Timestamp,
        repayment_amount: u128,
        filled_slots: u32,
        offer_filled: bool,
    },
    LoanRepaid {
        commitment: Commitment,
        amount: u128,
    },
    LoanDefaulted {
        commitment: Commitment,
    },
    IdentityRevealed {
        commitment: Commitment,
        lender: Address,
        borrower: Address,
    },
}

/// One entry of the ledger's ordered event log.
///
/// `seq` is assigned by the ledger, starts at 1 and has no gaps in the full
/// log. Consumers filtered to a viewer may observe gaps where private events
/// were withheld.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEvent {
    pub seq: u64,
    pub at: Timestamp,
    pub loan_id: LoanId,
    pub payload: EventPayload,
}

impl LedgerEvent {
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::LoanOfferCreated { .. } => EventKind::LoanOfferCreated,
            EventPayload::LoanOfferCancelled { .. } => EventKind::LoanOfferCancelled,
            EventPayload::ApplicationSubmitted { .. } => EventKind::ApplicationSubmitted,
            EventPayload::BorrowerApproved { .. } => EventKind::BorrowerApproved,
            EventPayload::LoanRepaid { .. } => EventKind::LoanRepaid,
            EventPayload::LoanDefaulted { .. } => EventKind::LoanDefaulted,
            EventPayload::IdentityRevealed { .. } => EventKind::IdentityRevealed,
        }
    }

    /// The commitment this event concerns, if it is application-scoped.
    pub fn commitment(&self) -> Option<&Commitment> {
        match &self.payload {
            EventPayload::ApplicationSubmitted { commitment, .. }
            | EventPayload::BorrowerApproved { commitment, .. }
            | EventPayload::LoanRepaid { commitment, .. }
            | EventPayload::LoanDefaulted { commitment }
            | EventPayload::IdentityRevealed { commitment, .. } => Some(commitment),
            EventPayload::LoanOfferCreated { .. } | EventPayload::LoanOfferCancelled { .. } => {
                None
            }
        }
    }

    pub fn application_key(&self) -> Option<ApplicationKey> {
        self.commitment()
            .map(|commitment| ApplicationKey::new(self.loan_id, commitment.clone()))
    }

    /// Whether `viewer` may observe this event. `None` is an anonymous reader.
    pub fn is_visible_to(&self, viewer: Option<&Address>) -> bool {
        match &self.payload {
            EventPayload::IdentityRevealed { lender, .. } => viewer == Some(lender),
            _ => true,
        }
    }
}

impl fmt::Display for LedgerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.commitment() {
            Some(c) => write!(f, "#{} {} {}/{}", self.seq, self.kind(), self.loan_id, c.short()),
            None => write!(f, "#{} {} {}", self.seq, self.kind(), self.loan_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: EventPayload) -> LedgerEvent {
        LedgerEvent {
            seq: 3,
            at: Timestamp::from_secs(100),
            loan_id: LoanId::new(1),
            payload,
        }
    }

    #[test]
    fn identity_reveal_is_lender_only() {
        let lender = Address::derive("lender");
        let reveal = event(EventPayload::IdentityRevealed {
            commitment: Commitment::new("c").unwrap(),
            lender,
            borrower: Address::derive("borrower"),
        });
        assert!(reveal.is_visible_to(Some(&lender)));
        assert!(!reveal.is_visible_to(Some(&Address::derive("other"))));
        assert!(!reveal.is_visible_to(None));

        let defaulted = event(EventPayload::LoanDefaulted {
            commitment: Commitment::new("c").unwrap(),
        });
        assert!(defaulted.is_visible_to(None));
    }

    #[test]
    fn offer_events_have_no_application_key() {
        let created = event(EventPayload::LoanOfferCancelled {
            lender: Address::derive("lender"),
        });
        assert_eq!(created.application_key(), None);
        assert_eq!(created.kind(), EventKind::LoanOfferCancelled);
    }

    #[test]
    fn display_includes_seq_and_kind() {
        let submitted = event(EventPayload::ApplicationSubmitted {
            commitment: Commitment::new("abc").unwrap(),
            proof_hash: ProofHash::derive(b"p"),
        });
        assert_eq!(format!("{submitted}"), "#3 ApplicationSubmitted loan#1/abc");
    }

    #[test]
    fn bincode_preserves_events() {
        let approved = event(EventPayload::BorrowerApproved {
            commitment: Commitment::new("c").unwrap(),
            repayment_deadline: Timestamp::from_secs(700),
            repayment_amount: 105,
            filled_slots: 1,
            offer_filled: false,
        });
        let bytes = bincode::serialize(&approved).unwrap();
        let decoded: LedgerEvent = bincode::deserialize(&bytes).unwrap();
        assert_eq!(decoded, approved);
    }
}
