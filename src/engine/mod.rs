use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

use crate::{
    account::{Account, NewAccount, UserId},
    command::LedgerCommand,
    config::LedgerConfig,
    error::LedgerError,
    id::IdGenerator,
    store::{Constraint, LedgerStore, StoreError},
    transaction::{Transaction, TransactionId},
};

pub mod deposit;
pub mod transfer;

/// Account ledger over a [`LedgerStore`].
///
/// Safe to share between threads: every mutation runs inside one unit of work
/// of the store, so the engine itself keeps no mutable state besides the id
/// generator.
pub struct Ledger<S> {
    store: S,
    ids: IdGenerator,
    config: LedgerConfig,
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: S, config: LedgerConfig) -> Self {
        Self::with_id_generator(store, config, IdGenerator::new())
    }

    pub fn with_id_generator(store: S, config: LedgerConfig, ids: IdGenerator) -> Self {
        Self { store, ids, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Opens an account of the configured default type.
    pub fn create_account(&self, user: UserId) -> Result<Account, LedgerError> {
        self.create_account_of_type(user, &self.config.default_account_type)
    }

    pub fn create_account_of_type(
        &self,
        user: UserId,
        account_type: &str,
    ) -> Result<Account, LedgerError> {
        if self.store.account_by_owner(user)?.is_some() {
            return Err(LedgerError::AlreadyExists { user });
        }
        for attempt in 0..self.config.ids.max_attempts {
            let number = self.ids.next_account_number(&self.store, &self.config.ids)?;
            let new = NewAccount {
                number,
                owner: user,
                account_type: account_type.to_string(),
                created_at: Utc::now(),
            };
            match self.store.insert_account(new) {
                Ok(account) => {
                    info!(
                        user,
                        account_id = account.id(),
                        account_number = %account.number(),
                        "Account created"
                    );
                    return Ok(account);
                }
                Err(StoreError::Conflict(Constraint::AccountOwner)) => {
                    return Err(LedgerError::AlreadyExists { user });
                }
                // lost the race for this number
                Err(StoreError::Conflict(Constraint::AccountNumber)) => {
                    debug!(user, attempt, "Account number claimed concurrently");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::TransientStoreFailure {
            reason: format!(
                "account number still contended after {} inserts",
                self.config.ids.max_attempts
            ),
        })
    }

    pub fn account(&self, user: UserId) -> Result<Account, LedgerError> {
        self.store
            .account_by_owner(user)?
            .ok_or(LedgerError::AccountNotFound { user })
    }

    pub fn balance(&self, user: UserId) -> Result<Decimal, LedgerError> {
        Ok(self.account(user)?.balance())
    }

    /// Every account, ordered by id.
    pub fn accounts(&self) -> Result<Vec<Account>, LedgerError> {
        Ok(self.store.all_accounts()?)
    }

    pub fn transaction(&self, id: &TransactionId) -> Result<Transaction, LedgerError> {
        self.store
            .transaction(id)?
            .ok_or_else(|| LedgerError::TransactionNotFound { id: id.clone() })
    }

    /// Transactions owned by `user`, newest first.
    pub fn transactions(&self, user: UserId) -> Result<Vec<Transaction>, LedgerError> {
        Ok(self.store.transactions_by_owner(user)?)
    }

    /// Runs one replayed command. Opening an account yields no transaction.
    pub fn execute(&self, command: LedgerCommand) -> Result<Option<Transaction>, LedgerError> {
        match command {
            LedgerCommand::Open { user } => self.create_account(user).map(|_| None),
            LedgerCommand::Deposit { user, request } => self
                .deposit(user, request.amount, request.description)
                .map(Some),
            LedgerCommand::Transfer { from, to, amount } => self
                .transfer_to(from, transfer::Recipient::Owner(to), amount)
                .map(Some),
            LedgerCommand::Payment { user, request } => {
                self.record_payment(user, &request).map(Some)
            }
        }
    }

    /// Draws transaction ids until `exists` reports one unused.
    fn fresh_transaction_id(
        &self,
        exists: impl Fn(&TransactionId) -> Result<bool, StoreError>,
    ) -> Result<TransactionId, LedgerError> {
        for attempt in 0..self.config.ids.max_attempts {
            let id = self.ids.next_transaction_id()?;
            if !exists(&id)? {
                return Ok(id);
            }
            warn!(attempt, transaction_id = %id, "Transaction id already recorded, drawing again");
        }
        Err(LedgerError::TransientStoreFailure {
            reason: format!(
                "no unused transaction id after {} draws",
                self.config.ids.max_attempts
            ),
        })
    }
}
