use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

use plend_fabric::{EventFilter, EventJournal, EventRelay, EventStream, RelayConfig};
use plend_index::{CommitmentIndex, IndexEntry};
use plend_ledger::{
    ApplicationView, InMemoryLoanLedger, InMemoryToken, LedgerError, LoanLedger, LoanOffer,
    OfferTerms,
};
use plend_proofs::{ActivityProof, InMemoryProofRegistry, ProofRegistry};
use plend_types::{Address, ApplicationKey, Clock, Commitment, LoanId, ProofHash};
use plend_watcher::{DeadlineWatcher, FireReport, LedgerExecutor};

use crate::config::ServiceConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::pump::{EventPump, PumpReport};

/// Snapshot for health reporting.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ServiceStatus {
    pub node_id: String,
    pub ledger_head: u64,
    pub consumed_seq: u64,
    pub indexed_applications: usize,
    pub pending_defaults: usize,
}

/// Orchestrates the ledger and the off-chain components derived from it.
///
/// Every write goes to the ledger first. Once it commits, the event pump
/// brings the index and the watcher up to date. A pump failure is logged and
/// left for the next pass; it never fails the write that triggered it.
pub struct LoanLifecycleService {
    config: ServiceConfig,
    proofs: Arc<dyn ProofRegistry>,
    ledger: Arc<dyn LoanLedger>,
    index: Arc<CommitmentIndex>,
    relay: Arc<EventRelay>,
    watcher: Arc<DeadlineWatcher>,
    pump: EventPump,
}

impl LoanLifecycleService {
    /// Bring up the off-chain side against an existing ledger.
    ///
    /// Replays the journal into the index, tails the ledger from where the
    /// journal ends, then reconciles the watcher: every approved-unpaid
    /// application is scheduled and those already overdue are defaulted
    /// before this returns.
    pub fn start(
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
        proofs: Arc<dyn ProofRegistry>,
        ledger: Arc<dyn LoanLedger>,
    ) -> ServiceResult<Self> {
        let relay = match &config.journal {
            Some(journal) => {
                EventRelay::with_journal(EventJournal::from_config(journal)?, RelayConfig::default())
            }
            None => EventRelay::in_memory(RelayConfig::default()),
        };
        let relay = Arc::new(relay);
        let recovered = relay.recover()?;

        let head = ledger.head_seq()?;
        if relay.last_seq() > head {
            return Err(ServiceError::JournalAhead {
                journal: relay.last_seq(),
                ledger: head,
            });
        }

        let index = Arc::new(CommitmentIndex::new());
        index.rebuild(&recovered)?;

        let executor = LedgerExecutor::new(Arc::clone(&ledger), config.trigger_identity());
        let watcher = Arc::new(DeadlineWatcher::new(
            Arc::new(executor),
            clock,
            config.watcher.clone(),
        ));

        let pump = EventPump::new(
            Arc::clone(&ledger),
            Arc::clone(&relay),
            Arc::clone(&index),
            Arc::clone(&watcher),
            relay.last_seq(),
        );

        let service = Self {
            config,
            proofs,
            ledger,
            index,
            relay,
            watcher,
            pump,
        };
        let caught_up = service.pump.sync()?;
        let reconciled = service.reconcile()?;
        info!(
            node = %service.config.node_id,
            recovered = recovered.len(),
            caught_up = caught_up.consumed,
            defaulted_on_start = reconciled.defaulted.len(),
            "loan lifecycle service started"
        );
        Ok(service)
    }

    /// A self-contained deployment: in-memory proof registry, token and
    /// ledger, with the configured genesis balances minted.
    pub fn in_memory(
        config: ServiceConfig,
        clock: Arc<dyn Clock>,
    ) -> ServiceResult<(Self, Arc<InMemoryToken>)> {
        let proofs = Arc::new(InMemoryProofRegistry::new(Arc::clone(&clock)));
        let token = Arc::new(InMemoryToken::new(Address::derive("plend-escrow")));
        for balance in &config.genesis {
            token
                .mint(&balance.account, u128::from(balance.amount))
                .map_err(LedgerError::from)?;
        }
        let ledger = Arc::new(
            InMemoryLoanLedger::new(Arc::clone(&clock), proofs.clone(), token.clone())
                .with_default_policy(config.default_trigger.clone()),
        );
        let service = Self::start(config, clock, proofs, ledger)?;
        Ok((service, token))
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<CommitmentIndex> {
        &self.index
    }

    pub fn watcher(&self) -> &Arc<DeadlineWatcher> {
        &self.watcher
    }

    pub fn ledger(&self) -> &Arc<dyn LoanLedger> {
        &self.ledger
    }

    // ---------------------------------------------------------------
    // Synchronization
    // ---------------------------------------------------------------

    /// Pull new ledger events into the relay, index and watcher.
    pub fn sync(&self) -> ServiceResult<PumpReport> {
        self.pump.sync()
    }

    /// Schedule every approved-unpaid application the index knows of and
    /// fire those already overdue.
    pub fn reconcile(&self) -> ServiceResult<FireReport> {
        let awaiting = self
            .index
            .awaiting_repayment()?
            .into_iter()
            .filter_map(|entry| entry.repayment_deadline.map(|deadline| (entry.key(), deadline)));
        let report = self.watcher.reconcile(awaiting)?;
        if !report.defaulted.is_empty() {
            self.sync_after_write();
        }
        Ok(report)
    }

    fn sync_after_write(&self) {
        if let Err(err) = self.pump.sync() {
            warn!(error = %err, cursor = self.pump.cursor(), "event pump behind ledger; will retry");
        }
    }

    /// Subscribe to relayed ledger events.
    pub fn subscribe(&self, filter: EventFilter) -> ServiceResult<EventStream> {
        Ok(self.relay.subscribe(filter)?)
    }

    pub fn status(&self) -> ServiceResult<ServiceStatus> {
        Ok(ServiceStatus {
            node_id: self.config.node_id.clone(),
            ledger_head: self.ledger.head_seq()?,
            consumed_seq: self.pump.cursor(),
            indexed_applications: self.index.len(),
            pending_defaults: self.watcher.pending(),
        })
    }

    /// Run the watcher and the pump until `shutdown` flips to `true`.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> ServiceResult<()> {
        let watcher = tokio::spawn(Arc::clone(&self.watcher).run(shutdown.clone()));

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(node = %self.config.node_id, "event pump running");

        loop {
            tokio::select! {
                _ = ticker.tick() => self.sync_after_write(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        match watcher.await {
            Ok(result) => result?,
            Err(join) => return Err(ServiceError::Internal(join.to_string())),
        }
        info!("event pump stopped");
        Ok(())
    }

    // ---------------------------------------------------------------
    // Protocol operations
    // ---------------------------------------------------------------

    pub fn register_proof(
        &self,
        proof_hash: ProofHash,
        commitment: Commitment,
        score: u64,
    ) -> ServiceResult<ActivityProof> {
        Ok(self.proofs.register_proof(proof_hash, commitment, score)?)
    }

    pub fn create_loan_offer(&self, lender: &Address, terms: &OfferTerms) -> ServiceResult<LoanId> {
        let loan_id = self.ledger.create_loan_offer(lender, terms)?;
        self.sync_after_write();
        Ok(loan_id)
    }

    pub fn cancel_loan_offer(&self, caller: &Address, loan_id: LoanId) -> ServiceResult<LoanOffer> {
        let offer = self.ledger.cancel_loan_offer(caller, loan_id)?;
        self.sync_after_write();
        Ok(offer)
    }

    pub fn apply_for_loan(
        &self,
        borrower: &Address,
        loan_id: LoanId,
        proof_hash: ProofHash,
        commitment: Commitment,
    ) -> ServiceResult<ApplicationView> {
        let view = self
            .ledger
            .apply_for_loan(borrower, loan_id, proof_hash, commitment)?;
        self.sync_after_write();
        Ok(view)
    }

    pub fn approve_borrower(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> ServiceResult<ApplicationView> {
        let view = self.ledger.approve_borrower(caller, loan_id, commitment)?;
        self.sync_after_write();
        Ok(view)
    }

    pub fn repay_loan(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> ServiceResult<ApplicationView> {
        let view = self.ledger.repay_loan(caller, loan_id, commitment)?;
        self.sync_after_write();
        Ok(view)
    }

    pub fn trigger_default(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> ServiceResult<ApplicationView> {
        let view = self.ledger.trigger_default(caller, loan_id, commitment)?;
        self.sync_after_write();
        Ok(view)
    }

    // ---------------------------------------------------------------
    // Query surface
    // ---------------------------------------------------------------

    /// Open offers with at least one free slot, by loan id.
    pub fn get_available_loans(&self) -> ServiceResult<Vec<LoanOffer>> {
        self.offers_where(LoanOffer::is_available)
    }

    pub fn get_loans_by_lender(&self, lender: &Address) -> ServiceResult<Vec<LoanOffer>> {
        self.offers_where(|offer| offer.lender == *lender)
    }

    fn offers_where(&self, keep: impl Fn(&LoanOffer) -> bool) -> ServiceResult<Vec<LoanOffer>> {
        let mut offers = Vec::new();
        for raw in 1..=self.ledger.loan_count()? {
            let offer = self.ledger.get_loan_details(LoanId::new(raw))?;
            if keep(&offer) {
                offers.push(offer);
            }
        }
        Ok(offers)
    }

    pub fn get_loan_details(&self, loan_id: LoanId) -> ServiceResult<LoanOffer> {
        Ok(self.ledger.get_loan_details(loan_id)?)
    }

    /// Every application made under `commitment`, as last seen by the index.
    pub fn get_applications_for_commitment(
        &self,
        commitment: &Commitment,
    ) -> ServiceResult<Vec<IndexEntry>> {
        Ok(self.index.applications_for_commitment(commitment)?)
    }

    /// Every application against `loan_id`, as last seen by the index.
    pub fn get_applications_for_loan(&self, loan_id: LoanId) -> ServiceResult<Vec<IndexEntry>> {
        let mut entries = Vec::new();
        for commitment in self.index.commitments_for_loan(loan_id)? {
            let key = ApplicationKey::new(loan_id, commitment);
            if let Some(entry) = self.index.get(&key)? {
                entries.push(entry);
            }
        }
        Ok(entries)
    }

    /// Authoritative application record, redacted for `caller`.
    pub fn get_application(
        &self,
        caller: Option<&Address>,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> ServiceResult<ApplicationView> {
        Ok(self.ledger.get_application(caller, loan_id, commitment)?)
    }

    pub fn get_revealed_identity(
        &self,
        caller: &Address,
        loan_id: LoanId,
        commitment: &Commitment,
    ) -> ServiceResult<Address> {
        Ok(self.ledger.get_revealed_identity(caller, loan_id, commitment)?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use plend_fabric::JournalConfig;
    use plend_ledger::{ErrorKind, EventKind};
    use plend_types::{ApplicationStatus, ManualClock, Timestamp};

    use super::*;
    use crate::config::GenesisBalance;

    const START: u64 = 1_700_000_000;

    fn lender() -> Address {
        Address::derive("lender")
    }

    fn borrower() -> Address {
        Address::derive("borrower")
    }

    fn commitment(n: u32) -> Commitment {
        Commitment::new(format!("commit-{n}")).unwrap()
    }

    fn proof(n: u32) -> ProofHash {
        ProofHash::derive(format!("proof-{n}").as_bytes())
    }

    fn terms() -> OfferTerms {
        OfferTerms {
            amount_per_slot: 100,
            total_slots: 2,
            interest_bps: 500,
            repayment_period: 600,
            min_score: 100,
        }
    }

    fn config() -> ServiceConfig {
        ServiceConfig {
            genesis: vec![
                GenesisBalance {
                    account: lender(),
                    amount: 1_000,
                },
                GenesisBalance {
                    account: borrower(),
                    amount: 50,
                },
            ],
            ..ServiceConfig::default()
        }
    }

    fn service() -> (ManualClock, LoanLifecycleService, Arc<InMemoryToken>) {
        let clock = ManualClock::new(Timestamp::from_secs(START));
        let (service, token) =
            LoanLifecycleService::in_memory(config(), Arc::new(clock.clone())).unwrap();
        (clock, service, token)
    }

    /// Offer, register, apply and approve application `n`.
    fn approved(service: &LoanLifecycleService, loan: LoanId, n: u32) -> ApplicationKey {
        service.register_proof(proof(n), commitment(n), 120).unwrap();
        service
            .apply_for_loan(&borrower(), loan, proof(n), commitment(n))
            .unwrap();
        service
            .approve_borrower(&lender(), loan, &commitment(n))
            .unwrap();
        ApplicationKey::new(loan, commitment(n))
    }

    fn indexed_status(service: &LoanLifecycleService, key: &ApplicationKey) -> ApplicationStatus {
        service.index().get(key).unwrap().unwrap().status
    }

    #[test]
    fn repayment_cancels_the_watcher_and_updates_the_index() {
        let (clock, service, token) = service();
        let loan = service.create_loan_offer(&lender(), &terms()).unwrap();

        service.register_proof(proof(0), commitment(0), 120).unwrap();
        service
            .apply_for_loan(&borrower(), loan, proof(0), commitment(0))
            .unwrap();
        let key = ApplicationKey::new(loan, commitment(0));
        assert_eq!(indexed_status(&service, &key), ApplicationStatus::Pending);

        service.approve_borrower(&lender(), loan, &commitment(0)).unwrap();
        assert_eq!(indexed_status(&service, &key), ApplicationStatus::Approved);
        assert!(service.watcher().is_scheduled(&key));
        assert_eq!(token.balance_of(&borrower()), 150);

        clock.advance(300);
        service.repay_loan(&borrower(), loan, &commitment(0)).unwrap();
        assert_eq!(indexed_status(&service, &key), ApplicationStatus::Repaid);
        assert!(!service.watcher().is_scheduled(&key));
        assert_eq!(token.balance_of(&lender()), 1_005);

        let err = service
            .trigger_default(&lender(), loan, &commitment(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn overdue_loan_defaults_through_the_watcher() {
        let (clock, service, _) = service();
        let loan = service.create_loan_offer(&lender(), &terms()).unwrap();
        let key = approved(&service, loan, 0);

        clock.advance(601);
        let report = service.watcher().fire_due().unwrap();
        assert_eq!(report.defaulted, vec![key.clone()]);

        service.sync().unwrap();
        assert_eq!(indexed_status(&service, &key), ApplicationStatus::Defaulted);
        assert_eq!(
            service
                .get_revealed_identity(&lender(), loan, &commitment(0))
                .unwrap(),
            borrower()
        );
        let anonymous = service.get_application(None, loan, &commitment(0)).unwrap();
        assert_eq!(anonymous.borrower_address, None);

        let err = service.repay_loan(&borrower(), loan, &commitment(0)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StateConflict);
    }

    #[test]
    fn discovery_queries() {
        let (_, service, _) = service();
        let first = service.create_loan_offer(&lender(), &terms()).unwrap();
        let other = Address::derive("other-lender");
        let second = service
            .create_loan_offer(
                &other,
                &OfferTerms {
                    total_slots: 1,
                    ..terms()
                },
            )
            .unwrap();
        let third = service.create_loan_offer(&lender(), &terms()).unwrap();
        service.cancel_loan_offer(&lender(), third).unwrap();

        // Same commitment applies to two offers.
        service.register_proof(proof(0), commitment(0), 120).unwrap();
        service
            .apply_for_loan(&borrower(), first, proof(0), commitment(0))
            .unwrap();
        service
            .apply_for_loan(&borrower(), second, proof(0), commitment(0))
            .unwrap();

        let available: Vec<LoanId> = service
            .get_available_loans()
            .unwrap()
            .into_iter()
            .map(|offer| offer.loan_id)
            .collect();
        assert_eq!(available, vec![first, second]);

        let mine: Vec<LoanId> = service
            .get_loans_by_lender(&lender())
            .unwrap()
            .into_iter()
            .map(|offer| offer.loan_id)
            .collect();
        assert_eq!(mine, vec![first, third]);

        let applied: Vec<LoanId> = service
            .get_applications_for_commitment(&commitment(0))
            .unwrap()
            .into_iter()
            .map(|entry| entry.loan_id)
            .collect();
        assert_eq!(applied, vec![first, second]);
        assert!(service
            .get_applications_for_commitment(&commitment(9))
            .unwrap()
            .is_empty());
        assert_eq!(service.get_applications_for_loan(first).unwrap().len(), 1);
    }

    #[test]
    fn failed_writes_leave_the_index_untouched() {
        let (_, service, _) = service();
        let loan = service.create_loan_offer(&lender(), &terms()).unwrap();
        service.register_proof(proof(0), commitment(0), 50).unwrap();

        let err = service
            .apply_for_loan(&borrower(), loan, proof(0), commitment(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Proof);
        assert!(service.index().is_empty());
        assert!(!service.index().is_known(&commitment(0)).unwrap());
    }

    #[test]
    fn restart_recovers_from_journal_and_defaults_overdue_loans() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Timestamp::from_secs(START));
        let proofs = Arc::new(InMemoryProofRegistry::new(Arc::new(clock.clone())));
        let token = Arc::new(InMemoryToken::new(Address::derive("escrow")));
        token.mint(&lender(), 1_000).unwrap();
        token.mint(&borrower(), 1_000).unwrap();
        let ledger: Arc<dyn LoanLedger> = Arc::new(InMemoryLoanLedger::new(
            Arc::new(clock.clone()),
            proofs.clone(),
            token,
        ));
        let config = ServiceConfig {
            journal: Some(JournalConfig {
                path: dir.path().join("events.journal"),
                sync_every_write: true,
            }),
            ..ServiceConfig::default()
        };

        let (early, late) = {
            let first = LoanLifecycleService::start(
                config.clone(),
                Arc::new(clock.clone()),
                proofs.clone(),
                Arc::clone(&ledger),
            )
            .unwrap();
            let loan = first.create_loan_offer(&lender(), &terms()).unwrap();
            let early = approved(&first, loan, 0);
            clock.advance(400);
            let late = approved(&first, loan, 1);
            (early, late)
        };

        // Down long enough for the first deadline to pass, not the second.
        clock.advance(300);
        // Events the crashed process never consumed.
        let extra = ledger.create_loan_offer(&lender(), &terms()).unwrap();

        let second = LoanLifecycleService::start(
            config,
            Arc::new(clock.clone()),
            proofs,
            Arc::clone(&ledger),
        )
        .unwrap();

        assert_eq!(indexed_status(&second, &early), ApplicationStatus::Defaulted);
        assert_eq!(indexed_status(&second, &late), ApplicationStatus::Approved);
        assert!(second.watcher().is_scheduled(&late));
        assert_eq!(second.get_loan_details(extra).unwrap().loan_id, extra);
        assert_eq!(second.sync().unwrap().consumed, 0);
        assert_eq!(second.status().unwrap().pending_defaults, 1);
    }

    #[test]
    fn journal_from_another_ledger_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            journal: Some(JournalConfig {
                path: dir.path().join("events.journal"),
                sync_every_write: false,
            }),
            ..config()
        };
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(Timestamp::from_secs(START)));

        {
            let (service, _) = LoanLifecycleService::in_memory(config.clone(), clock.clone()).unwrap();
            service.create_loan_offer(&lender(), &terms()).unwrap();
        }

        // A fresh in-memory ledger starts at seq 0.
        let err = LoanLifecycleService::in_memory(config, clock)
            .err()
            .unwrap();
        assert!(matches!(err, ServiceError::JournalAhead { journal: 1, ledger: 0 }));
    }

    #[tokio::test]
    async fn subscribers_see_relayed_events() {
        let (_, service, _) = service();
        let mut stream = service
            .subscribe(EventFilter::kinds([EventKind::LoanOfferCreated]))
            .unwrap();
        let loan = service.create_loan_offer(&lender(), &terms()).unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.loan_id, loan);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let (_, service, _) = service();
        let service = Arc::new(service);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(Arc::clone(&service).run(shutdown_rx));

        // A write made behind the service's back is picked up by the pump.
        service.ledger().create_loan_offer(&lender(), &terms()).unwrap();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while service.status().unwrap().consumed_seq < 1 {
            assert!(tokio::time::Instant::now() < deadline, "pump never caught up");
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
