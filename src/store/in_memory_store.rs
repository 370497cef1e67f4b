use std::{
    collections::{HashMap, HashSet},
    sync::{Condvar, Mutex, PoisonError, RwLock},
    time::{Duration, Instant},
};

use rust_decimal::Decimal;

use crate::{
    account::{Account, AccountId, AccountNumber, NewAccount, UserId},
    transaction::{Transaction, TransactionId},
};

use super::{Constraint, LedgerStore, StoreError, UnitOfWork, lock_order};

pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("in-memory store lock poisoned".to_string())
}

#[derive(Default)]
struct AccountTable {
    rows: HashMap<AccountId, Account>,
    by_owner: HashMap<UserId, AccountId>,
    by_number: HashMap<AccountNumber, AccountId>,
    last_id: AccountId,
}

/// Exclusive per-account claims. A unit takes all of its accounts at once or
/// waits, so two units can never each hold half of what the other needs.
#[derive(Default)]
struct LockTable {
    held: Mutex<HashSet<AccountId>>,
    released: Condvar,
}

impl LockTable {
    fn acquire(&self, ids: &[AccountId], timeout: Duration) -> Result<(), StoreError> {
        let deadline = Instant::now() + timeout;
        let mut held = self.held.lock().map_err(poisoned)?;
        while ids.iter().any(|id| held.contains(id)) {
            let now = Instant::now();
            if now >= deadline {
                return Err(StoreError::Unavailable(format!(
                    "timed out after {timeout:?} waiting for accounts {ids:?}"
                )));
            }
            let (guard, _) = self
                .released
                .wait_timeout(held, deadline - now)
                .map_err(poisoned)?;
            held = guard;
        }
        held.extend(ids.iter().copied());
        Ok(())
    }

    fn release(&self, ids: &[AccountId]) {
        let mut held = self.held.lock().unwrap_or_else(PoisonError::into_inner);
        for id in ids {
            held.remove(id);
        }
        self.released.notify_all();
    }
}

/// Process-local store. Units touching disjoint accounts run in parallel;
/// table-wide locks are only held for the duration of a single read or commit.
pub struct InMemoryStore {
    accounts: RwLock<AccountTable>,
    transactions: RwLock<HashMap<TransactionId, Transaction>>,
    locks: LockTable,
    lock_timeout: Duration,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}

impl InMemoryStore {
    pub fn new(lock_timeout: Duration) -> Self {
        Self {
            accounts: RwLock::default(),
            transactions: RwLock::default(),
            locks: LockTable::default(),
            lock_timeout,
        }
    }
}

impl LedgerStore for InMemoryStore {
    type Unit<'a> = InMemoryUnit<'a>;

    fn account_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        let table = self.accounts.read().map_err(poisoned)?;
        Ok(table
            .by_owner
            .get(&owner)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        let table = self.accounts.read().map_err(poisoned)?;
        Ok(table
            .by_number
            .get(number)
            .and_then(|id| table.rows.get(id))
            .cloned())
    }

    fn account_number_exists(&self, number: &AccountNumber) -> Result<bool, StoreError> {
        let table = self.accounts.read().map_err(poisoned)?;
        Ok(table.by_number.contains_key(number))
    }

    fn all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let table = self.accounts.read().map_err(poisoned)?;
        let mut accounts: Vec<Account> = table.rows.values().cloned().collect();
        accounts.sort_by_key(Account::id);
        Ok(accounts)
    }

    fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let mut table = self.accounts.write().map_err(poisoned)?;
        if table.by_owner.contains_key(&account.owner) {
            return Err(StoreError::Conflict(Constraint::AccountOwner));
        }
        if table.by_number.contains_key(&account.number) {
            return Err(StoreError::Conflict(Constraint::AccountNumber));
        }
        table.last_id += 1;
        let account = Account::open(table.last_id, account);
        table.by_owner.insert(account.owner(), account.id());
        table.by_number.insert(account.number().clone(), account.id());
        table.rows.insert(account.id(), account.clone());
        Ok(account)
    }

    fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        let ledger = self.transactions.read().map_err(poisoned)?;
        Ok(ledger.get(id).cloned())
    }

    fn transactions_by_owner(&self, owner: UserId) -> Result<Vec<Transaction>, StoreError> {
        let ledger = self.transactions.read().map_err(poisoned)?;
        let mut list: Vec<Transaction> = ledger
            .values()
            .filter(|tx| tx.owner() == owner)
            .cloned()
            .collect();
        list.sort_by(|a, b| {
            b.created_at()
                .cmp(&a.created_at())
                .then_with(|| b.id().cmp(a.id()))
        });
        Ok(list)
    }

    fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        let mut ledger = self.transactions.write().map_err(poisoned)?;
        if ledger.contains_key(transaction.id()) {
            return Err(StoreError::Conflict(Constraint::TransactionId));
        }
        ledger.insert(transaction.id().clone(), transaction.clone());
        Ok(())
    }

    fn begin(&self, accounts: &[AccountId]) -> Result<InMemoryUnit<'_>, StoreError> {
        let locked = lock_order(accounts);
        self.locks.acquire(&locked, self.lock_timeout)?;
        Ok(InMemoryUnit {
            store: self,
            locked,
            saved: HashMap::new(),
            appended: Vec::new(),
        })
    }
}

pub struct InMemoryUnit<'a> {
    store: &'a InMemoryStore,
    locked: Vec<AccountId>,
    saved: HashMap<AccountId, Account>,
    appended: Vec<Transaction>,
}

impl InMemoryUnit<'_> {
    fn ensure_locked(&self, id: AccountId) -> Result<(), StoreError> {
        if self.locked.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(id))
        }
    }
}

impl UnitOfWork for InMemoryUnit<'_> {
    fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.ensure_locked(id)?;
        if let Some(account) = self.saved.get(&id) {
            return Ok(account.clone());
        }
        let table = self.store.accounts.read().map_err(poisoned)?;
        table
            .rows
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("locked account {id} does not exist")))
    }

    fn save(&mut self, account: &Account) -> Result<(), StoreError> {
        self.ensure_locked(account.id())?;
        if account.balance() < Decimal::ZERO {
            return Err(StoreError::Corrupt(format!(
                "refusing to save negative balance {} for account {}",
                account.balance(),
                account.id()
            )));
        }
        self.saved.insert(account.id(), account.clone());
        Ok(())
    }

    fn transaction_exists(&self, id: &TransactionId) -> Result<bool, StoreError> {
        if self.appended.iter().any(|tx| tx.id() == id) {
            return Ok(true);
        }
        let ledger = self.store.transactions.read().map_err(poisoned)?;
        Ok(ledger.contains_key(id))
    }

    fn append(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        if self.transaction_exists(transaction.id())? {
            return Err(StoreError::Conflict(Constraint::TransactionId));
        }
        self.appended.push(transaction.clone());
        Ok(())
    }

    fn commit(mut self) -> Result<(), StoreError> {
        let store = self.store;
        // ledger before accounts, the only place both are held
        let mut ledger = store.transactions.write().map_err(poisoned)?;
        if self.appended.iter().any(|tx| ledger.contains_key(tx.id())) {
            return Err(StoreError::Conflict(Constraint::TransactionId));
        }
        let mut table = store.accounts.write().map_err(poisoned)?;
        for (id, account) in self.saved.drain() {
            table.rows.insert(id, account);
        }
        for tx in self.appended.drain(..) {
            ledger.insert(tx.id().clone(), tx);
        }
        Ok(())
    }
}

impl Drop for InMemoryUnit<'_> {
    fn drop(&mut self) {
        self.store.locks.release(&self.locked);
    }
}
