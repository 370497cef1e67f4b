use std::fmt;

use thiserror::Error;

use crate::{
    account::{Account, AccountId, AccountNumber, NewAccount, UserId},
    transaction::{Transaction, TransactionId},
};

pub mod in_memory_store;
pub mod sqlite_store;

pub use in_memory_store::InMemoryStore;
pub use sqlite_store::SqliteStore;

/// Unique constraint a write ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Constraint {
    AccountOwner,
    AccountNumber,
    TransactionId,
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Constraint::AccountOwner => "accounts.user_id",
            Constraint::AccountNumber => "accounts.account_number",
            Constraint::TransactionId => "transactions.transaction_id",
        })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Unique constraint violated: {0}")]
    Conflict(Constraint),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
    #[error("Stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("Account {0} is not locked by this unit of work")]
    NotLocked(AccountId),
    #[error(transparent)]
    Sqlite(rusqlite::Error),
}

/// Persistent accounts plus the append-only transaction ledger.
///
/// Reads outside a unit of work see committed state only. Every balance change
/// goes through [`LedgerStore::begin`], which grants exclusive access to the
/// listed accounts until the unit is committed or dropped.
pub trait LedgerStore: Send + Sync {
    type Unit<'a>: UnitOfWork
    where
        Self: 'a;

    fn account_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError>;

    fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError>;

    fn account_number_exists(&self, number: &AccountNumber) -> Result<bool, StoreError>;

    fn all_accounts(&self) -> Result<Vec<Account>, StoreError>;

    /// Atomic check-and-insert: fails with [`StoreError::Conflict`] naming the
    /// violated constraint if the owner or the number is already taken.
    fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError>;

    fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError>;

    /// Newest first.
    fn transactions_by_owner(&self, owner: UserId) -> Result<Vec<Transaction>, StoreError>;

    /// Appends an entry that affects no balance.
    fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError>;

    fn begin(&self, accounts: &[AccountId]) -> Result<Self::Unit<'_>, StoreError>;
}

/// Atomic group of balance writes and ledger appends. Dropping a unit without
/// calling [`UnitOfWork::commit`] discards everything it wrote.
pub trait UnitOfWork {
    /// Current state of a locked account, including writes made by this unit.
    fn account(&self, id: AccountId) -> Result<Account, StoreError>;

    fn save(&mut self, account: &Account) -> Result<(), StoreError>;

    fn transaction_exists(&self, id: &TransactionId) -> Result<bool, StoreError>;

    fn append(&mut self, transaction: &Transaction) -> Result<(), StoreError>;

    fn commit(self) -> Result<(), StoreError>;
}

/// Sorted, de-duplicated lock set so that every unit asks for the same
/// accounts in the same order.
pub(crate) fn lock_order(accounts: &[AccountId]) -> Vec<AccountId> {
    let mut ids = accounts.to_vec();
    ids.sort_unstable();
    ids.dedup();
    ids
}
