use plend_types::{Address, Commitment, LoanId, ProofHash};

use crate::error::LedgerError;
use crate::event::LedgerEvent;
use crate::records::{ApplicationView, LoanOffer, OfferTerms};

/// Write boundary: every protocol transition.
///
/// Each call commits fully or not at all. `caller` is the authenticated
/// account issuing the call.
pub trait LoanWriter: Send + Sync {
    fn create_loan_offer(&self, lender: &Address, terms: &OfferTerms) -> Result<LoanId, LedgerError>;

    fn cancel_loan_offer(&self, caller: &Address, loan_id: LoanId) -> Result<LoanOffer, LedgerError>;

    fn apply_for_loan(
        &self,
        borrower: &Address,
        loan_id: LoanId,
        proof_hash: ProofHash,
        commitment: Commitment,
    ) -> Result<ApplicationView, LedgerError>;

    fn approve_borrower(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError>;

    fn repay_loan(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError>;

    fn trigger_default(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError>;
}

/// Read boundary: projections and the ordered event log.
pub trait LoanReader: Send + Sync {
    fn get_loan_details(&self, loan_id: LoanId) -> Result<LoanOffer, LedgerError>;

    /// Application as seen by `caller` (`None` for anonymous reads).
    fn get_application(
        &self,
        caller: Option<&Address>,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError>;

    /// The borrower address of a defaulted application, for its lender only.
    fn get_revealed_identity(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<Address, LedgerError>;

    /// Number of offers ever created; loan ids run `1..=loan_count`.
    fn loan_count(&self) -> Result<u64, LedgerError>;

    /// Events with `seq > after_seq`, in ledger order, visible to `viewer`.
    fn events_since(
        &self,
        after_seq: u64,
        viewer: Option<&Address>,
    ) -> Result<Vec<LedgerEvent>, LedgerError>;

    /// Sequence number of the latest event, 0 when the log is empty.
    fn head_seq(&self) -> Result<u64, LedgerError>;
}

/// Full ledger boundary, usable as a trait object.
pub trait LoanLedger: LoanWriter + LoanReader {}

impl<T: LoanWriter + LoanReader + ?Sized> LoanLedger for T {}
