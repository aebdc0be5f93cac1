use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tracing::debug;

use plend_types::Address;

/// Errors from the external token interface.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransferError {
    #[error("insufficient balance in {account}: needed {needed}, available {available}")]
    InsufficientBalance {
        account: Address,
        needed: u128,
        available: u128,
    },

    #[error("transfer rejected: {0}")]
    Rejected(String),

    #[error("token lock poisoned")]
    LockPoisoned,
}

/// Boundary to the external token contract.
///
/// A failed call must leave balances untouched; the ledger aborts the
/// enclosing transition when any call here fails.
pub trait FundsTransfer: Send + Sync {
    /// The account the ledger holds escrowed funds in.
    fn custodian(&self) -> Address;

    /// Move `amount` out of the custodian account to `recipient`.
    fn transfer(&self, recipient: &Address, amount: u128) -> Result<(), TransferError>;

    /// Move `amount` from `sender` to `recipient` on the ledger's authority.
    fn transfer_from(
        &self,
        sender: &Address,
        recipient: &Address,
        amount: u128,
    ) -> Result<(), TransferError>;
}

/// In-memory token with balances and fault injection.
pub struct InMemoryToken {
    custodian: Address,
    balances: Mutex<HashMap<Address, u128>>,
    /// Countdown to an injected failure; 0 disables injection.
    fail_countdown: AtomicUsize,
}

impl InMemoryToken {
    pub fn new(custodian: Address) -> Self {
        Self {
            custodian,
            balances: Mutex::new(HashMap::new()),
            fail_countdown: AtomicUsize::new(0),
        }
    }

    /// Credit `amount` to `account` out of thin air.
    pub fn mint(&self, account: &Address, amount: u128) -> Result<(), TransferError> {
        let mut balances = self.balances.lock().map_err(|_| TransferError::LockPoisoned)?;
        let balance = balances.entry(*account).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("balance overflow".into()))?;
        Ok(())
    }

    pub fn balance_of(&self, account: &Address) -> u128 {
        self.balances
            .lock()
            .map(|balances| balances.get(account).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    /// Make the next transfer call fail with [`TransferError::Rejected`].
    pub fn fail_next_transfer(&self) {
        self.fail_transfer_after(0);
    }

    /// Let `successes` transfer calls through, then fail the one after.
    pub fn fail_transfer_after(&self, successes: usize) {
        self.fail_countdown.store(successes + 1, Ordering::SeqCst);
    }

    fn injected_failure(&self) -> bool {
        let previous = self
            .fail_countdown
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .unwrap_or(0);
        previous == 1
    }

    fn move_funds(&self, from: &Address, to: &Address, amount: u128) -> Result<(), TransferError> {
        if self.injected_failure() {
            return Err(TransferError::Rejected("injected failure".into()));
        }

        let mut balances = self.balances.lock().map_err(|_| TransferError::LockPoisoned)?;
        let available = balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(TransferError::InsufficientBalance {
                account: *from,
                needed: amount,
                available,
            });
        }
        let credited = balances
            .get(to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| TransferError::Rejected("balance overflow".into()))?;

        balances.insert(*from, available - amount);
        balances.insert(*to, credited);

        debug!(from = %from.short_id(), to = %to.short_id(), amount, "token transfer");
        Ok(())
    }
}

impl FundsTransfer for InMemoryToken {
    fn custodian(&self) -> Address {
        self.custodian
    }

    fn transfer(&self, recipient: &Address, amount: u128) -> Result<(), TransferError> {
        let custodian = self.custodian;
        self.move_funds(&custodian, recipient, amount)
    }

    fn transfer_from(
        &self,
        sender: &Address,
        recipient: &Address,
        amount: u128,
    ) -> Result<(), TransferError> {
        self.move_funds(sender, recipient, amount)
    }
}
