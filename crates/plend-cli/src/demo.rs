use std::sync::Arc;

use anyhow::bail;
use serde::Serialize;

use plend_ledger::{ErrorKind, OfferTerms};
use plend_service::{GenesisBalance, LoanLifecycleService, ServiceConfig, ServiceError};
use plend_types::{
    Address, ApplicationStatus, Clock, Commitment, ManualClock, ProofHash, Timestamp,
};

use crate::cli::Scenario;

const GENESIS: u64 = 1_700_000_000;

#[derive(Debug, Serialize)]
pub struct DemoStep {
    /// Seconds since the demo started.
    pub at: u64,
    pub action: String,
    pub outcome: String,
    pub accepted: bool,
}

#[derive(Debug, Serialize)]
pub struct DemoReport {
    pub scenario: String,
    pub steps: Vec<DemoStep>,
    pub final_status: ApplicationStatus,
    pub lender_balance: u128,
    pub borrower_balance: u128,
    pub revealed_to_lender: Option<Address>,
}

struct Transcript {
    clock: ManualClock,
    steps: Vec<DemoStep>,
}

impl Transcript {
    fn elapsed(&self) -> u64 {
        self.clock.now().as_secs().saturating_sub(GENESIS)
    }

    fn accepted(&mut self, action: impl Into<String>, outcome: impl Into<String>) {
        self.steps.push(DemoStep {
            at: self.elapsed(),
            action: action.into(),
            outcome: outcome.into(),
            accepted: true,
        });
    }

    /// Record a call that must fail with `expected`.
    fn rejected<T>(
        &mut self,
        action: impl Into<String>,
        result: Result<T, ServiceError>,
        expected: ErrorKind,
    ) -> anyhow::Result<()> {
        let action = action.into();
        match result {
            Err(err) if err.kind() == expected => {
                self.steps.push(DemoStep {
                    at: self.elapsed(),
                    action,
                    outcome: err.to_string(),
                    accepted: false,
                });
                Ok(())
            }
            Err(err) => bail!("{action}: expected {expected}, got {err}"),
            Ok(_) => bail!("{action}: expected {expected}, but it succeeded"),
        }
    }
}

/// Run one lifecycle scenario in-process against an in-memory ledger.
pub fn run_scenario(scenario: Scenario) -> anyhow::Result<DemoReport> {
    let lender = Address::derive("demo-lender");
    let borrower = Address::derive("demo-borrower");
    let keeper = Address::derive("demo-keeper");
    let clock = ManualClock::new(Timestamp::from_secs(GENESIS));

    let config = ServiceConfig {
        node_id: "plend-demo".into(),
        keeper,
        genesis: vec![
            GenesisBalance {
                account: lender,
                amount: 1_000,
            },
            GenesisBalance {
                account: borrower,
                amount: 50,
            },
        ],
        ..ServiceConfig::default()
    };
    let (service, token) = LoanLifecycleService::in_memory(config, Arc::new(clock.clone()))?;
    let mut log = Transcript {
        clock: clock.clone(),
        steps: Vec::new(),
    };

    let commitment = Commitment::new("demo-commitment-7f3a")?;
    let proof = ProofHash::derive(b"demo-activity-proof");

    service.register_proof(proof, commitment.clone(), 120)?;
    log.accepted("register proof", "score 120 bound to commitment");

    let loan = service.create_loan_offer(
        &lender,
        &OfferTerms {
            amount_per_slot: 100,
            total_slots: 2,
            interest_bps: 500,
            repayment_period: 600,
            min_score: 100,
        },
    )?;
    log.accepted("create offer", format!("{loan}: 2 slots x 100 at 500 bps, 600s"));

    let view = service.apply_for_loan(&borrower, loan, proof, commitment.clone())?;
    log.accepted("apply", format!("status {}", view.status));

    let view = service.approve_borrower(&lender, loan, &commitment)?;
    let deadline = view
        .repayment_deadline
        .map(|d| d.as_secs().saturating_sub(GENESIS))
        .unwrap_or_default();
    log.accepted(
        "approve",
        format!(
            "status {}, owes {} by t+{deadline}s",
            view.status,
            view.repayment_amount.unwrap_or_default()
        ),
    );

    match scenario {
        Scenario::A => {
            clock.advance(300);
            let view = service.repay_loan(&borrower, loan, &commitment)?;
            log.accepted("repay", format!("status {}", view.status));
            log.rejected(
                "trigger default",
                service.trigger_default(&keeper, loan, &commitment),
                ErrorKind::StateConflict,
            )?;
        }
        Scenario::B => {
            clock.advance(600);
            log.rejected(
                "trigger default at the deadline",
                service.trigger_default(&keeper, loan, &commitment),
                ErrorKind::Deadline,
            )?;

            clock.advance(1);
            let fired = service.watcher().fire_due()?;
            service.sync()?;
            log.accepted(
                "deadline watcher",
                format!("{} default(s) fired", fired.defaulted.len()),
            );
            log.rejected(
                "repay after default",
                service.repay_loan(&borrower, loan, &commitment),
                ErrorKind::StateConflict,
            )?;
        }
    }

    let final_status = service.get_application(None, loan, &commitment)?.status;
    let revealed_to_lender = service
        .get_revealed_identity(&lender, loan, &commitment)
        .ok();
    if let Some(address) = revealed_to_lender {
        log.accepted("lender reads identity", address.to_hex());
    }

    Ok(DemoReport {
        scenario: format!("{scenario:?}"),
        steps: log.steps,
        final_status,
        lender_balance: token.balance_of(&lender),
        borrower_balance: token.balance_of(&borrower),
        revealed_to_lender,
    })
}
