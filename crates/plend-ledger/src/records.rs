use serde::{Deserialize, Serialize};

use plend_types::{
    Address, ApplicationKey, ApplicationStatus, Commitment, LoanId, OfferStatus, ProofHash,
    Timestamp,
};

/// Basis-point denominator for interest rates.
pub const BPS_DENOMINATOR: u128 = 10_000;

/// Amount a borrower owes on repayment:
/// `amount_per_slot + floor(amount_per_slot * interest_bps / 10000)`.
///
/// Integer-only, so repeated evaluation never drifts. Returns `None` on
/// overflow.
pub fn repayment_amount(amount_per_slot: u128, interest_bps: u32) -> Option<u128> {
    let interest = amount_per_slot.checked_mul(u128::from(interest_bps))? / BPS_DENOMINATOR;
    amount_per_slot.checked_add(interest)
}

/// Lender-chosen terms for a new offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfferTerms {
    pub amount_per_slot: u128,
    pub total_slots: u32,
    pub interest_bps: u32,
    /// Seconds between approval and the repayment deadline.
    pub repayment_period: u64,
    pub min_score: u64,
}

/// A multi-slot loan offer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoanOffer {
    pub loan_id: LoanId,
    pub lender: Address,
    pub amount_per_slot: u128,
    pub total_slots: u32,
    pub filled_slots: u32,
    pub interest_bps: u32,
    pub repayment_period: u64,
    pub min_score: u64,
    pub status: OfferStatus,
    pub created_at: Timestamp,
}

impl LoanOffer {
    pub fn open_slots(&self) -> u32 {
        self.total_slots.saturating_sub(self.filled_slots)
    }

    /// Open and with at least one unfilled slot.
    pub fn is_available(&self) -> bool {
        self.status == OfferStatus::Open && self.open_slots() > 0
    }

    pub fn repayment_amount(&self) -> Option<u128> {
        repayment_amount(self.amount_per_slot, self.interest_bps)
    }
}

/// A borrower's application against one offer. Keyed by (loan, commitment).
///
/// `borrower_address` is ledger-internal; everything handed to callers goes
/// through [`Application::view_for`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub loan_id: LoanId,
    pub commitment: Commitment,
    pub borrower_address: Address,
    pub proof_hash: ProofHash,
    pub status: ApplicationStatus,
    pub applied_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub repayment_deadline: Option<Timestamp>,
    pub repayment_amount: Option<u128>,
    pub repaid_at: Option<Timestamp>,
    pub defaulted_at: Option<Timestamp>,
}

impl Application {
    pub fn key(&self) -> ApplicationKey {
        ApplicationKey::new(self.loan_id, self.commitment.clone())
    }

    /// Project this application for `caller`.
    ///
    /// The borrower address is disclosed only once the application is
    /// `Defaulted`, and only to the offer's lender.
    pub fn view_for(&self, caller: Option<&Address>, lender: &Address) -> ApplicationView {
        let revealed = self.status == ApplicationStatus::Defaulted && caller == Some(lender);
        ApplicationView {
            loan_id: self.loan_id,
            commitment: self.commitment.clone(),
            borrower_address: revealed.then_some(self.borrower_address),
            proof_hash: self.proof_hash,
            status: self.status,
            applied_at: self.applied_at,
            approved_at: self.approved_at,
            repayment_deadline: self.repayment_deadline,
            repayment_amount: self.repayment_amount,
            repaid_at: self.repaid_at,
            defaulted_at: self.defaulted_at,
        }
    }
}

/// Caller-facing projection of an [`Application`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationView {
    pub loan_id: LoanId,
    pub commitment: Commitment,
    /// `None` unless the application defaulted and the caller is the lender.
    pub borrower_address: Option<Address>,
    pub proof_hash: ProofHash,
    pub status: ApplicationStatus,
    pub applied_at: Timestamp,
    pub approved_at: Option<Timestamp>,
    pub repayment_deadline: Option<Timestamp>,
    pub repayment_amount: Option<u128>,
    pub repaid_at: Option<Timestamp>,
    pub defaulted_at: Option<Timestamp>,
}
