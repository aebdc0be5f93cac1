use std::sync::Arc;

use plend_ledger::{LedgerError, LoanReader, LoanWriter};
use plend_types::{Address, ApplicationKey};

/// Issues the default transition for one application.
pub trait DefaultExecutor: Send + Sync {
    fn trigger_default(&self, key: &ApplicationKey) -> Result<(), LedgerError>;
}

/// Which account the watcher signs default triggers as.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TriggerIdentity {
    /// A fixed keeper account.
    Keeper(Address),
    /// The offer's own lender, for deployments where only lenders may
    /// trigger defaults.
    Lender,
}

/// Executor that calls straight into a ledger.
pub struct LedgerExecutor<L: ?Sized> {
    ledger: Arc<L>,
    identity: TriggerIdentity,
}

impl<L> LedgerExecutor<L>
where
    L: LoanWriter + LoanReader + ?Sized,
{
    pub fn new(ledger: Arc<L>, identity: TriggerIdentity) -> Self {
        Self { ledger, identity }
    }

    fn caller_for(&self, key: &ApplicationKey) -> Result<Address, LedgerError> {
        match &self.identity {
            TriggerIdentity::Keeper(keeper) => Ok(*keeper),
            TriggerIdentity::Lender => Ok(self.ledger.get_loan_details(key.loan_id)?.lender),
        }
    }
}

impl<L> DefaultExecutor for LedgerExecutor<L>
where
    L: LoanWriter + LoanReader + ?Sized,
{
    fn trigger_default(&self, key: &ApplicationKey) -> Result<(), LedgerError> {
        let caller = self.caller_for(key)?;
        self.ledger
            .trigger_default(&caller, key.loan_id, &key.commitment)
            .map(|_| ())
    }
}
