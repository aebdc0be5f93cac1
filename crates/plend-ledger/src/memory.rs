use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, error, info};

use plend_proofs::ProofRegistry;
use plend_types::{
    Address, ApplicationKey, ApplicationStatus, Clock, Commitment, LoanId, OfferStatus, ProofHash,
    Timestamp,
};

use crate::error::LedgerError;
use crate::event::{EventPayload, LedgerEvent};
use crate::funds::FundsTransfer;
use crate::policy::DefaultTriggerPolicy;
use crate::records::{Application, ApplicationView, LoanOffer, OfferTerms};
use crate::traits::{LoanReader, LoanWriter};

/// In-memory loan ledger for tests, the demo, and embedding.
///
/// A single write lock is held for the whole of every transition, so each
/// operation observes and commits a consistent state. Token calls happen
/// under that lock before any record is touched; a failed call returns
/// early and leaves the ledger unchanged.
pub struct InMemoryLoanLedger {
    clock: Arc<dyn Clock>,
    proofs: Arc<dyn ProofRegistry>,
    funds: Arc<dyn FundsTransfer>,
    default_policy: DefaultTriggerPolicy,
    inner: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    offers: BTreeMap<LoanId, LoanOffer>,
    applications: HashMap<ApplicationKey, Application>,
    events: Vec<LedgerEvent>,
}

impl LedgerState {
    fn next_loan_id(&self) -> LoanId {
        LoanId::new(self.offers.len() as u64 + 1)
    }

    fn record(&mut self, at: Timestamp, loan_id: LoanId, payload: EventPayload) -> u64 {
        let seq = self.events.len() as u64 + 1;
        let event = LedgerEvent {
            seq,
            at,
            loan_id,
            payload,
        };
        debug!(%event, "ledger event");
        self.events.push(event);
        seq
    }
}

impl InMemoryLoanLedger {
    pub fn new(
        clock: Arc<dyn Clock>,
        proofs: Arc<dyn ProofRegistry>,
        funds: Arc<dyn FundsTransfer>,
    ) -> Self {
        Self {
            clock,
            proofs,
            funds,
            default_policy: DefaultTriggerPolicy::default(),
            inner: RwLock::new(LedgerState::default()),
        }
    }

    pub fn with_default_policy(mut self, policy: DefaultTriggerPolicy) -> Self {
        self.default_policy = policy;
        self
    }

    pub fn default_policy(&self) -> &DefaultTriggerPolicy {
        &self.default_policy
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, LedgerState>, LedgerError> {
        self.inner.read().map_err(|_| LedgerError::LockPoisoned)
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, LedgerState>, LedgerError> {
        self.inner.write().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Escrow `amount` from the lender, then pay it out to the borrower.
    ///
    /// A failed payout refunds the escrowed pull so the token balances end
    /// where they started.
    fn disburse(&self, lender: &Address, borrower: &Address, amount: u128) -> Result<(), LedgerError> {
        let escrow = self.funds.custodian();
        self.funds.transfer_from(lender, &escrow, amount)?;

        if let Err(payout) = self.funds.transfer(borrower, amount) {
            if let Err(refund) = self.funds.transfer(lender, amount) {
                error!(
                    lender = %lender.short_id(),
                    amount,
                    error = %refund,
                    "escrow refund failed after payout failure"
                );
            }
            return Err(payout.into());
        }
        Ok(())
    }
}

fn validate_terms(terms: &OfferTerms) -> Result<u128, LedgerError> {
    if terms.amount_per_slot == 0 {
        return Err(LedgerError::Validation("amount_per_slot must be > 0".into()));
    }
    if terms.total_slots == 0 {
        return Err(LedgerError::Validation("total_slots must be > 0".into()));
    }
    if terms.repayment_period == 0 {
        return Err(LedgerError::Validation("repayment_period must be > 0".into()));
    }
    crate::records::repayment_amount(terms.amount_per_slot, terms.interest_bps).ok_or_else(|| {
        LedgerError::Arithmetic(format!(
            "repayment amount for {} at {} bps",
            terms.amount_per_slot, terms.interest_bps
        ))
    })
}

impl LoanWriter for InMemoryLoanLedger {
    fn create_loan_offer(&self, lender: &Address, terms: &OfferTerms) -> Result<LoanId, LedgerError> {
        validate_terms(terms)?;

        let mut state = self.write_state()?;
        let now = self.clock.now();
        let loan_id = state.next_loan_id();

        state.offers.insert(
            loan_id,
            LoanOffer {
                loan_id,
                lender: *lender,
                amount_per_slot: terms.amount_per_slot,
                total_slots: terms.total_slots,
                filled_slots: 0,
                interest_bps: terms.interest_bps,
                repayment_period: terms.repayment_period,
                min_score: terms.min_score,
                status: OfferStatus::Open,
                created_at: now,
            },
        );
        state.record(
            now,
            loan_id,
            EventPayload::LoanOfferCreated {
                lender: *lender,
                amount_per_slot: terms.amount_per_slot,
                total_slots: terms.total_slots,
                interest_bps: terms.interest_bps,
                repayment_period: terms.repayment_period,
                min_score: terms.min_score,
            },
        );

        info!(
            %loan_id,
            lender = %lender.short_id(),
            amount_per_slot = terms.amount_per_slot,
            total_slots = terms.total_slots,
            "loan offer created"
        );
        Ok(loan_id)
    }

    fn cancel_loan_offer(&self, caller: &Address, loan_id: LoanId) -> Result<LoanOffer, LedgerError> {
        let mut state = self.write_state()?;
        let now = self.clock.now();

        let offer = state
            .offers
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        if offer.lender != *caller {
            return Err(LedgerError::unauthorized(caller, "cancel this offer"));
        }
        if offer.status != OfferStatus::Open {
            return Err(LedgerError::StateConflict(format!(
                "{loan_id} is {}, expected Open",
                offer.status
            )));
        }
        if offer.filled_slots > 0 {
            return Err(LedgerError::StateConflict(format!(
                "{loan_id} already has {} filled slot(s)",
                offer.filled_slots
            )));
        }

        offer.status = OfferStatus::Cancelled;
        let cancelled = offer.clone();
        state.record(now, loan_id, EventPayload::LoanOfferCancelled { lender: *caller });

        info!(%loan_id, "loan offer cancelled");
        Ok(cancelled)
    }

    fn apply_for_loan(
        &self,
        borrower: &Address,
        loan_id: LoanId,
        proof_hash: ProofHash,
        commitment: Commitment,
    ) -> Result<ApplicationView, LedgerError> {
        let mut state = self.write_state()?;
        let now = self.clock.now();

        let offer = state
            .offers
            .get(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        if offer.status != OfferStatus::Open {
            return Err(LedgerError::StateConflict(format!(
                "{loan_id} is {}, expected Open",
                offer.status
            )));
        }
        if offer.open_slots() == 0 {
            return Err(LedgerError::StateConflict(format!("{loan_id} has no open slots")));
        }
        self.proofs
            .check_proof(&proof_hash, &commitment, offer.min_score)?;
        let lender = offer.lender;

        let key = ApplicationKey::new(loan_id, commitment.clone());
        if state.applications.contains_key(&key) {
            return Err(LedgerError::StateConflict(format!(
                "application {key} already exists"
            )));
        }

        let application = Application {
            loan_id,
            commitment: commitment.clone(),
            borrower_address: *borrower,
            proof_hash,
            status: ApplicationStatus::Pending,
            applied_at: now,
            approved_at: None,
            repayment_deadline: None,
            repayment_amount: None,
            repaid_at: None,
            defaulted_at: None,
        };
        let view = application.view_for(Some(borrower), &lender);
        state.applications.insert(key.clone(), application);
        state.record(
            now,
            loan_id,
            EventPayload::ApplicationSubmitted {
                commitment,
                proof_hash,
            },
        );

        info!(application = %key, proof = %proof_hash.short_hex(), "application submitted");
        Ok(view)
    }

    fn approve_borrower(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;
        let now = self.clock.now();
        let key = ApplicationKey::new(loan_id, commitment.clone());

        let offer = state
            .offers
            .get_mut(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        if offer.lender != *caller {
            return Err(LedgerError::unauthorized(caller, "approve borrowers for this offer"));
        }
        let application = state
            .applications
            .get_mut(&key)
            .ok_or_else(|| LedgerError::ApplicationNotFound(key.clone()))?;
        if application.status != ApplicationStatus::Pending {
            return Err(LedgerError::StateConflict(format!(
                "application {key} is {}, expected Pending",
                application.status
            )));
        }
        if !offer.is_available() {
            return Err(LedgerError::StateConflict(format!(
                "{loan_id} is {} with {} of {} slots filled",
                offer.status, offer.filled_slots, offer.total_slots
            )));
        }

        // Proofs are immutable, but the threshold is re-checked at the edge
        // that moves funds.
        self.proofs
            .check_proof(&application.proof_hash, commitment, offer.min_score)?;

        let owed = offer.repayment_amount().ok_or_else(|| {
            LedgerError::Arithmetic(format!("repayment amount for {loan_id}"))
        })?;
        let deadline = now.checked_add_secs(offer.repayment_period).ok_or_else(|| {
            LedgerError::Arithmetic(format!("repayment deadline for {loan_id}"))
        })?;

        self.disburse(&offer.lender, &application.borrower_address, offer.amount_per_slot)?;

        offer.filled_slots += 1;
        if offer.filled_slots == offer.total_slots {
            offer.status = OfferStatus::Filled;
        }
        let filled_slots = offer.filled_slots;
        let offer_filled = offer.status == OfferStatus::Filled;

        application.status = ApplicationStatus::Approved;
        application.approved_at = Some(now);
        application.repayment_deadline = Some(deadline);
        application.repayment_amount = Some(owed);
        let view = application.view_for(Some(caller), caller);

        state.record(
            now,
            loan_id,
            EventPayload::BorrowerApproved {
                commitment: commitment.clone(),
                repayment_deadline: deadline,
                repayment_amount: owed,
                filled_slots,
                offer_filled,
            },
        );

        info!(
            application = %key,
            deadline = deadline.as_secs(),
            repayment_amount = owed,
            filled_slots,
            "borrower approved"
        );
        Ok(view)
    }

    fn repay_loan(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;
        let now = self.clock.now();
        let key = ApplicationKey::new(loan_id, commitment.clone());

        let offer = state
            .offers
            .get(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        let application = state
            .applications
            .get_mut(&key)
            .ok_or_else(|| LedgerError::ApplicationNotFound(key.clone()))?;
        if application.borrower_address != *caller {
            return Err(LedgerError::unauthorized(caller, "repay this loan"));
        }
        if application.status != ApplicationStatus::Approved {
            return Err(LedgerError::StateConflict(format!(
                "application {key} is {}, expected Approved",
                application.status
            )));
        }
        let (Some(deadline), Some(owed)) =
            (application.repayment_deadline, application.repayment_amount)
        else {
            return Err(LedgerError::StateConflict(format!(
                "application {key} has no repayment terms"
            )));
        };
        if now.is_after(&deadline) {
            return Err(LedgerError::Deadline(format!(
                "repayment deadline {deadline} has passed (now {now})"
            )));
        }

        self.funds.transfer_from(caller, &offer.lender, owed)?;

        application.status = ApplicationStatus::Repaid;
        application.repaid_at = Some(now);
        let view = application.view_for(Some(caller), &offer.lender);

        state.record(
            now,
            loan_id,
            EventPayload::LoanRepaid {
                commitment: commitment.clone(),
                amount: owed,
            },
        );

        info!(application = %key, amount = owed, "loan repaid");
        Ok(view)
    }

    fn trigger_default(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError> {
        let mut guard = self.write_state()?;
        let state = &mut *guard;
        let now = self.clock.now();
        let key = ApplicationKey::new(loan_id, commitment.clone());

        let lender = state
            .offers
            .get(&loan_id)
            .map(|offer| offer.lender)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        let application = state
            .applications
            .get_mut(&key)
            .ok_or_else(|| LedgerError::ApplicationNotFound(key.clone()))?;
        if application.status != ApplicationStatus::Approved {
            return Err(LedgerError::StateConflict(format!(
                "application {key} is {}, expected Approved",
                application.status
            )));
        }
        if !self.default_policy.permits(caller, &lender) {
            return Err(LedgerError::unauthorized(caller, "trigger a default on this loan"));
        }
        let Some(deadline) = application.repayment_deadline else {
            return Err(LedgerError::StateConflict(format!(
                "application {key} has no repayment deadline"
            )));
        };
        if !now.is_after(&deadline) {
            return Err(LedgerError::Deadline(format!(
                "repayment deadline {deadline} has not passed (now {now})"
            )));
        }

        application.status = ApplicationStatus::Defaulted;
        application.defaulted_at = Some(now);
        let borrower = application.borrower_address;
        let view = application.view_for(Some(caller), &lender);

        state.record(
            now,
            loan_id,
            EventPayload::LoanDefaulted {
                commitment: commitment.clone(),
            },
        );
        state.record(
            now,
            loan_id,
            EventPayload::IdentityRevealed {
                commitment: commitment.clone(),
                lender,
                borrower,
            },
        );

        info!(
            application = %key,
            triggered_by = %caller.short_id(),
            borrower = %borrower.short_id(),
            "loan defaulted, identity revealed to lender"
        );
        Ok(view)
    }
}

impl LoanReader for InMemoryLoanLedger {
    fn get_loan_details(&self, loan_id: LoanId) -> Result<LoanOffer, LedgerError> {
        let state = self.read_state()?;
        state
            .offers
            .get(&loan_id)
            .cloned()
            .ok_or(LedgerError::LoanNotFound(loan_id))
    }

    fn get_application(
        &self,
        caller: Option<&Address>,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<ApplicationView, LedgerError> {
        let state = self.read_state()?;
        let offer = state
            .offers
            .get(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        let key = ApplicationKey::new(loan_id, commitment.clone());
        state
            .applications
            .get(&key)
            .map(|application| application.view_for(caller, &offer.lender))
            .ok_or(LedgerError::ApplicationNotFound(key))
    }

    fn get_revealed_identity(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> Result<Address, LedgerError> {
        let state = self.read_state()?;
        let offer = state
            .offers
            .get(&loan_id)
            .ok_or(LedgerError::LoanNotFound(loan_id))?;
        let key = ApplicationKey::new(loan_id, commitment.clone());
        let application = state
            .applications
            .get(&key)
            .ok_or_else(|| LedgerError::ApplicationNotFound(key.clone()))?;
        if offer.lender != *caller {
            return Err(LedgerError::unauthorized(caller, "read this borrower's identity"));
        }
        if application.status != ApplicationStatus::Defaulted {
            return Err(LedgerError::StateConflict(format!(
                "application {key} is {}, identity is revealed only on default",
                application.status
            )));
        }
        Ok(application.borrower_address)
    }

    fn loan_count(&self) -> Result<u64, LedgerError> {
        let state = self.read_state()?;
        Ok(state.offers.len() as u64)
    }

    fn events_since(
        &self,
        after_seq: u64,
        viewer: Option<&Address>,
    ) -> Result<Vec<LedgerEvent>, LedgerError> {
        let state = self.read_state()?;
        let start = usize::try_from(after_seq)
            .unwrap_or(usize::MAX)
            .min(state.events.len());
        Ok(state.events[start..]
            .iter()
            .filter(|event| event.is_visible_to(viewer))
            .cloned()
            .collect())
    }

    fn head_seq(&self) -> Result<u64, LedgerError> {
        let state = self.read_state()?;
        Ok(state.events.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use plend_proofs::{InMemoryProofRegistry, ProofError};
    use plend_types::ManualClock;
    use proptest::prelude::*;

    use super::*;
    use crate::error::ErrorKind;
    use crate::event::EventKind;
    use crate::funds::InMemoryToken;

    const START: u64 = 1_700_000_000;

    struct Fixture {
        clock: ManualClock,
        registry: Arc<InMemoryProofRegistry>,
        token: Arc<InMemoryToken>,
        ledger: InMemoryLoanLedger,
        lender: Address,
        borrower: Address,
    }

    impl Fixture {
        fn new(policy: DefaultTriggerPolicy) -> Self {
            let clock = ManualClock::new(Timestamp::from_secs(START));
            let registry = Arc::new(InMemoryProofRegistry::new(Arc::new(clock.clone())));
            let token = Arc::new(InMemoryToken::new(Address::derive("escrow")));
            let ledger = InMemoryLoanLedger::new(
                Arc::new(clock.clone()),
                registry.clone(),
                token.clone(),
            )
            .with_default_policy(policy);

            let lender = Address::derive("lender");
            let borrower = Address::derive("borrower");
            token.mint(&lender, 1_000).unwrap();
            token.mint(&borrower, 50).unwrap();

            Self {
                clock,
                registry,
                token,
                ledger,
                lender,
                borrower,
            }
        }

        /// Scenario terms: 2 slots of 100 at 500 bps over 600s, min score 100.
        fn offer(&self) -> LoanId {
            self.ledger
                .create_loan_offer(&self.lender, &scenario_terms(2))
                .unwrap()
        }

        fn register(&self, label: &str, score: u64) -> (ProofHash, Commitment) {
            let hash = ProofHash::derive(label.as_bytes());
            let commitment = Commitment::new(format!("commit-{label}")).unwrap();
            self.registry
                .register_proof(hash, commitment.clone(), score)
                .unwrap();
            (hash, commitment)
        }

        fn apply(&self, loan_id: LoanId, label: &str, score: u64) -> Commitment {
            let (hash, commitment) = self.register(label, score);
            self.ledger
                .apply_for_loan(&self.borrower, loan_id, hash, commitment.clone())
                .unwrap();
            commitment
        }

        fn kinds(&self) -> Vec<EventKind> {
            self.ledger
                .events_since(0, Some(&self.lender))
                .unwrap()
                .iter()
                .map(LedgerEvent::kind)
                .collect()
        }
    }

    fn scenario_terms(total_slots: u32) -> OfferTerms {
        OfferTerms {
            amount_per_slot: 100,
            total_slots,
            interest_bps: 500,
            repayment_period: 600,
            min_score: 100,
        }
    }

    #[test]
    fn scenario_a_repay_before_deadline() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "a", 120);

        let pending = fx.ledger.get_application(None, loan, &commitment).unwrap();
        assert_eq!(pending.status, ApplicationStatus::Pending);

        fx.clock.advance(10);
        let approved = fx
            .ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);
        assert_eq!(approved.approved_at, Some(Timestamp::from_secs(START + 10)));
        assert_eq!(
            approved.repayment_deadline,
            Some(Timestamp::from_secs(START + 610))
        );
        assert_eq!(approved.repayment_amount, Some(105));
        assert_eq!(fx.token.balance_of(&fx.borrower), 150);
        assert_eq!(fx.token.balance_of(&fx.lender), 900);
        assert_eq!(fx.ledger.get_loan_details(loan).unwrap().filled_slots, 1);

        fx.clock.advance(300);
        let repaid = fx
            .ledger
            .repay_loan(&fx.borrower, loan, &commitment)
            .unwrap();
        assert_eq!(repaid.status, ApplicationStatus::Repaid);
        assert_eq!(fx.token.balance_of(&fx.borrower), 45);
        assert_eq!(fx.token.balance_of(&fx.lender), 1_005);

        fx.clock.advance(1_000);
        let err = fx
            .ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        assert_eq!(
            fx.kinds(),
            vec![
                EventKind::LoanOfferCreated,
                EventKind::ApplicationSubmitted,
                EventKind::BorrowerApproved,
                EventKind::LoanRepaid,
            ]
        );
    }

    #[test]
    fn scenario_b_default_after_deadline() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "b", 120);
        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();

        let lender_view = fx
            .ledger
            .get_application(Some(&fx.lender), loan, &commitment)
            .unwrap();
        assert_eq!(lender_view.borrower_address, None);

        fx.clock.advance(601);
        let keeper = Address::derive("keeper");
        let defaulted = fx
            .ledger
            .trigger_default(&keeper, loan, &commitment)
            .unwrap();
        assert_eq!(defaulted.status, ApplicationStatus::Defaulted);
        assert_eq!(defaulted.borrower_address, None);

        let lender_view = fx
            .ledger
            .get_application(Some(&fx.lender), loan, &commitment)
            .unwrap();
        assert_eq!(lender_view.borrower_address, Some(fx.borrower));
        assert_eq!(
            fx.ledger
                .get_revealed_identity(&fx.lender, loan, &commitment)
                .unwrap(),
            fx.borrower
        );

        let err = fx
            .ledger
            .repay_loan(&fx.borrower, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn apply_rejects_unverifiable_proofs_without_creating_application() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();

        let (low_hash, low_commitment) = fx.register("low", 99);
        let err = fx
            .ledger
            .apply_for_loan(&fx.borrower, loan, low_hash, low_commitment.clone())
            .unwrap_err();
        assert_eq!(
            err,
            LedgerError::Proof(ProofError::ScoreBelowThreshold {
                score: 99,
                threshold: 100
            })
        );

        let (hash, _) = fx.register("good", 150);
        let other = Commitment::new("someone-else").unwrap();
        let err = fx
            .ledger
            .apply_for_loan(&fx.borrower, loan, hash, other.clone())
            .unwrap_err();
        assert_eq!(err, LedgerError::Proof(ProofError::CommitmentMismatch(hash)));

        let missing = ProofHash::derive(b"never-registered");
        let err = fx
            .ledger
            .apply_for_loan(&fx.borrower, loan, missing, other.clone())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Proof);

        for commitment in [&low_commitment, &other] {
            assert_eq!(
                fx.ledger
                    .get_application(None, loan, commitment)
                    .unwrap_err()
                    .kind(),
                ErrorKind::NotFound
            );
        }
        assert_eq!(fx.kinds(), vec![EventKind::LoanOfferCreated]);
    }

    #[test]
    fn duplicate_application_is_a_conflict() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "dup", 120);

        let err = fx
            .ledger
            .apply_for_loan(
                &Address::derive("someone"),
                loan,
                ProofHash::derive(b"dup"),
                commitment,
            )
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn create_validates_terms() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let mut terms = scenario_terms(0);
        assert_eq!(
            fx.ledger
                .create_loan_offer(&fx.lender, &terms)
                .unwrap_err()
                .kind(),
            ErrorKind::Validation
        );
        terms.total_slots = 1;
        terms.amount_per_slot = 0;
        assert_eq!(
            fx.ledger
                .create_loan_offer(&fx.lender, &terms)
                .unwrap_err()
                .kind(),
            ErrorKind::Validation
        );
        terms.amount_per_slot = u128::MAX;
        assert!(matches!(
            fx.ledger.create_loan_offer(&fx.lender, &terms),
            Err(LedgerError::Arithmetic(_))
        ));
        assert_eq!(fx.ledger.loan_count().unwrap(), 0);
        assert_eq!(fx.ledger.head_seq().unwrap(), 0);
    }

    #[test]
    fn loan_ids_are_sequential() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        assert_eq!(fx.offer(), LoanId::new(1));
        assert_eq!(fx.offer(), LoanId::new(2));
        assert_eq!(fx.ledger.loan_count().unwrap(), 2);
    }

    #[test]
    fn only_the_lender_approves() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "auth", 120);

        let err = fx
            .ledger
            .approve_borrower(&fx.borrower, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);
        assert_eq!(
            fx.ledger
                .get_application(None, loan, &commitment)
                .unwrap()
                .status,
            ApplicationStatus::Pending
        );
    }

    #[test]
    fn approving_into_a_full_offer_conflicts() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx
            .ledger
            .create_loan_offer(&fx.lender, &scenario_terms(1))
            .unwrap();
        let first = fx.apply(loan, "first", 120);
        let second = fx.apply(loan, "second", 120);

        let approved = fx.ledger.approve_borrower(&fx.lender, loan, &first).unwrap();
        assert_eq!(approved.status, ApplicationStatus::Approved);
        let offer = fx.ledger.get_loan_details(loan).unwrap();
        assert_eq!(offer.status, OfferStatus::Filled);
        assert!(!offer.is_available());

        let err = fx
            .ledger
            .approve_borrower(&fx.lender, loan, &second)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let err = fx
            .ledger
            .approve_borrower(&fx.lender, loan, &first)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let (hash, late) = fx.register("late", 120);
        let err = fx
            .ledger
            .apply_for_loan(&fx.borrower, loan, hash, late)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn failed_payout_aborts_approval() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "payout", 120);
        let head = fx.ledger.head_seq().unwrap();

        // Escrow pull succeeds, payout fails.
        fx.token.fail_transfer_after(1);
        let err = fx
            .ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);

        assert_eq!(fx.token.balance_of(&fx.lender), 1_000);
        assert_eq!(fx.token.balance_of(&Address::derive("escrow")), 0);
        assert_eq!(fx.token.balance_of(&fx.borrower), 50);
        assert_eq!(fx.ledger.get_loan_details(loan).unwrap().filled_slots, 0);
        let view = fx.ledger.get_application(None, loan, &commitment).unwrap();
        assert_eq!(view.status, ApplicationStatus::Pending);
        assert_eq!(view.repayment_deadline, None);
        assert_eq!(fx.ledger.head_seq().unwrap(), head);

        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();
    }

    #[test]
    fn underfunded_lender_cannot_approve() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let poor = Address::derive("poor-lender");
        let loan = fx
            .ledger
            .create_loan_offer(&poor, &scenario_terms(1))
            .unwrap();
        let commitment = fx.apply(loan, "poor", 120);

        let err = fx
            .ledger
            .approve_borrower(&poor, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transfer);
        assert_eq!(fx.ledger.get_loan_details(loan).unwrap().status, OfferStatus::Open);
    }

    #[test]
    fn repay_requires_borrower_and_deadline() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "late", 120);

        let err = fx
            .ledger
            .repay_loan(&fx.borrower, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();

        let err = fx
            .ledger
            .repay_loan(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.clock.advance(601);
        let err = fx
            .ledger
            .repay_loan(&fx.borrower, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadline);
        assert_eq!(fx.token.balance_of(&fx.borrower), 150);
    }

    #[test]
    fn repay_is_allowed_at_the_deadline_itself() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "edge", 120);
        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();

        fx.clock.advance(600);
        let err = fx
            .ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Deadline);

        let repaid = fx
            .ledger
            .repay_loan(&fx.borrower, loan, &commitment)
            .unwrap();
        assert_eq!(repaid.status, ApplicationStatus::Repaid);
    }

    #[test]
    fn default_requires_approved_status() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "pending", 120);
        fx.clock.advance(10_000);

        let err = fx
            .ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn trigger_default_is_idempotent() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "twice", 120);
        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();
        fx.clock.advance(700);

        fx.ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap();
        let err = fx
            .ledger
            .trigger_default(&Address::derive("keeper"), loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let kinds = fx.kinds();
        let count = |kind| kinds.iter().filter(|k| **k == kind).count();
        assert_eq!(count(EventKind::LoanDefaulted), 1);
        assert_eq!(count(EventKind::IdentityRevealed), 1);
    }

    #[test]
    fn lender_only_policy_rejects_keepers() {
        let fx = Fixture::new(DefaultTriggerPolicy::LenderOnly);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "policy", 120);
        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();
        fx.clock.advance(601);

        let err = fx
            .ledger
            .trigger_default(&Address::derive("keeper"), loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        fx.ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap();
    }

    #[test]
    fn identity_reveal_is_private_to_the_lender() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "private", 120);
        fx.ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap();

        assert_eq!(
            fx.ledger
                .get_revealed_identity(&fx.lender, loan, &commitment)
                .unwrap_err()
                .kind(),
            ErrorKind::StateConflict
        );

        fx.clock.advance(601);
        fx.ledger
            .trigger_default(&fx.lender, loan, &commitment)
            .unwrap();

        let public = fx.ledger.events_since(0, None).unwrap();
        assert!(public.iter().all(|e| e.kind() != EventKind::IdentityRevealed));
        let borrower_view = fx.ledger.events_since(0, Some(&fx.borrower)).unwrap();
        assert!(borrower_view
            .iter()
            .all(|e| e.kind() != EventKind::IdentityRevealed));

        let lender_view = fx.ledger.events_since(0, Some(&fx.lender)).unwrap();
        let reveal = lender_view.last().unwrap();
        assert_eq!(
            reveal.payload,
            EventPayload::IdentityRevealed {
                commitment: commitment.clone(),
                lender: fx.lender,
                borrower: fx.borrower,
            }
        );
        assert_eq!(reveal.seq, fx.ledger.head_seq().unwrap());

        let stranger = Address::derive("stranger");
        assert_eq!(
            fx.ledger
                .get_revealed_identity(&stranger, loan, &commitment)
                .unwrap_err()
                .kind(),
            ErrorKind::Authorization
        );
        assert_eq!(
            fx.ledger
                .get_application(Some(&stranger), loan, &commitment)
                .unwrap()
                .borrower_address,
            None
        );
    }

    #[test]
    fn events_since_resumes_after_cursor() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        fx.apply(loan, "cursor", 120);

        let all = fx.ledger.events_since(0, None).unwrap();
        assert_eq!(all.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![1, 2]);
        let tail = fx.ledger.events_since(1, None).unwrap();
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].seq, 2);
        assert!(fx.ledger.events_since(99, None).unwrap().is_empty());
    }

    #[test]
    fn cancel_only_while_unfilled() {
        let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
        let loan = fx.offer();
        let commitment = fx.apply(loan, "cancel", 120);

        let err = fx.ledger.cancel_loan_offer(&fx.borrower, loan).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Authorization);

        let cancelled = fx.ledger.cancel_loan_offer(&fx.lender, loan).unwrap();
        assert_eq!(cancelled.status, OfferStatus::Cancelled);

        let err = fx
            .ledger
            .approve_borrower(&fx.lender, loan, &commitment)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);

        let second = fx.offer();
        let c2 = fx.apply(second, "cancel-2", 120);
        fx.ledger.approve_borrower(&fx.lender, second, &c2).unwrap();
        let err = fx.ledger.cancel_loan_offer(&fx.lender, second).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[derive(Clone, Debug)]
    enum Op {
        Apply(usize),
        Approve(usize),
        Repay(usize),
        Default(usize),
        Advance(u64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..5).prop_map(Op::Apply),
            (0usize..5).prop_map(Op::Approve),
            (0usize..5).prop_map(Op::Repay),
            (0usize..5).prop_map(Op::Default),
            (0u64..400).prop_map(Op::Advance),
        ]
    }

    proptest! {
        #[test]
        fn slot_accounting_and_status_edges_hold(
            total_slots in 1u32..4,
            ops in proptest::collection::vec(op(), 1..40),
        ) {
            let fx = Fixture::new(DefaultTriggerPolicy::AnyCaller);
            fx.token.mint(&fx.lender, 1_000_000).unwrap();
            let loan = fx
                .ledger
                .create_loan_offer(&fx.lender, &scenario_terms(total_slots))
                .unwrap();

            let borrowers: Vec<(Address, ProofHash, Commitment)> = (0..5)
                .map(|i| {
                    let address = Address::derive(&format!("borrower-{i}"));
                    fx.token.mint(&address, 1_000).unwrap();
                    let (hash, commitment) = fx.register(&format!("b{i}"), 120);
                    (address, hash, commitment)
                })
                .collect();
            let mut seen: HashMap<usize, ApplicationStatus> = HashMap::new();

            for op in ops {
                let _ = match op {
                    Op::Apply(i) => {
                        let (address, hash, commitment) = &borrowers[i];
                        fx.ledger
                            .apply_for_loan(address, loan, *hash, commitment.clone())
                            .map(|_| ())
                    }
                    Op::Approve(i) => fx
                        .ledger
                        .approve_borrower(&fx.lender, loan, &borrowers[i].2)
                        .map(|_| ()),
                    Op::Repay(i) => fx
                        .ledger
                        .repay_loan(&borrowers[i].0, loan, &borrowers[i].2)
                        .map(|_| ()),
                    Op::Default(i) => fx
                        .ledger
                        .trigger_default(&fx.lender, loan, &borrowers[i].2)
                        .map(|_| ()),
                    Op::Advance(secs) => {
                        fx.clock.advance(secs);
                        Ok(())
                    }
                };

                let offer = fx.ledger.get_loan_details(loan).unwrap();
                prop_assert!(offer.filled_slots <= offer.total_slots);
                prop_assert_eq!(
                    offer.status == OfferStatus::Filled,
                    offer.filled_slots == offer.total_slots
                );

                let mut occupying = 0u32;
                for (i, (_, _, commitment)) in borrowers.iter().enumerate() {
                    let Ok(view) = fx.ledger.get_application(None, loan, commitment) else {
                        continue;
                    };
                    if view.status != ApplicationStatus::Pending {
                        occupying += 1;
                    }
                    if let Some(previous) = seen.insert(i, view.status) {
                        prop_assert!(
                            previous == view.status || previous.can_transition_to(view.status),
                            "illegal edge {previous} -> {}",
                            view.status
                        );
                    }
                }
                prop_assert_eq!(occupying, offer.filled_slots);
            }
        }
    }
}
