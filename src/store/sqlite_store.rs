use std::{
    path::Path,
    str::FromStr,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, params};
use rust_decimal::Decimal;

use crate::{
    account::{Account, AccountId, AccountNumber, NewAccount, UserId},
    transaction::{PaymentMethod, Transaction, TransactionId, TransactionStatus},
};

use super::{Constraint, LedgerStore, StoreError, UnitOfWork, lock_order};

pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS accounts (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    account_number TEXT    NOT NULL UNIQUE,
    user_id        INTEGER NOT NULL UNIQUE,
    balance        TEXT    NOT NULL,
    account_type   TEXT    NOT NULL,
    created_at     TEXT    NOT NULL,
    updated_at     TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS transactions (
    transaction_id TEXT    PRIMARY KEY NOT NULL,
    user_id        INTEGER NOT NULL,
    amount         TEXT    NOT NULL,
    status         TEXT    NOT NULL,
    payment_method TEXT    NOT NULL,
    description    TEXT,
    created_at     TEXT    NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_by_user
    ON transactions (user_id, created_at);

CREATE TRIGGER IF NOT EXISTS transactions_no_update
    BEFORE UPDATE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;

CREATE TRIGGER IF NOT EXISTS transactions_no_delete
    BEFORE DELETE ON transactions
BEGIN
    SELECT RAISE(ABORT, 'transactions are append-only');
END;
"#;

const ACCOUNT_COLUMNS: &str =
    "id, account_number, user_id, balance, account_type, created_at, updated_at";
const TRANSACTION_COLUMNS: &str =
    "transaction_id, user_id, amount, status, payment_method, description, created_at";

fn poisoned<T>(_: PoisonError<T>) -> StoreError {
    StoreError::Unavailable("sqlite connection lock poisoned".to_string())
}

fn constraint_from_message(message: &str) -> Option<Constraint> {
    if message.contains("accounts.user_id") {
        Some(Constraint::AccountOwner)
    } else if message.contains("accounts.account_number") {
        Some(Constraint::AccountNumber)
    } else if message.contains("transactions.transaction_id") {
        Some(Constraint::TransactionId)
    } else {
        None
    }
}

fn classify(err: &rusqlite::Error) -> Option<StoreError> {
    match err {
        rusqlite::Error::SqliteFailure(failure, message) => match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                Some(StoreError::Unavailable(err.to_string()))
            }
            ErrorCode::ConstraintViolation => message
                .as_deref()
                .and_then(constraint_from_message)
                .map(StoreError::Conflict),
            _ => None,
        },
        rusqlite::Error::FromSqlConversionFailure(..) | rusqlite::Error::InvalidColumnType(..) => {
            Some(StoreError::Corrupt(err.to_string()))
        }
        _ => None,
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        match classify(&err) {
            Some(classified) => classified,
            None => StoreError::Sqlite(err),
        }
    }
}

struct AccountRow {
    id: i64,
    account_number: String,
    user_id: i64,
    balance: String,
    account_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get("id")?,
            account_number: row.get("account_number")?,
            user_id: row.get("user_id")?,
            balance: row.get("balance")?,
            account_type: row.get("account_type")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = StoreError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        let number = AccountNumber::from_str(&row.account_number)
            .map_err(|err| StoreError::Corrupt(format!("account {}: {err}", row.id)))?;
        let balance = Decimal::from_str(&row.balance).map_err(|err| {
            StoreError::Corrupt(format!("account {}: balance `{}`: {err}", row.id, row.balance))
        })?;
        if balance < Decimal::ZERO {
            return Err(StoreError::Corrupt(format!(
                "account {} has negative balance {balance}",
                row.id
            )));
        }
        Ok(Account::restore(
            row.id,
            number,
            row.user_id,
            balance,
            row.account_type,
            row.created_at,
            row.updated_at,
        ))
    }
}

struct TransactionRow {
    transaction_id: String,
    user_id: i64,
    amount: String,
    status: String,
    payment_method: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            transaction_id: row.get("transaction_id")?,
            user_id: row.get("user_id")?,
            amount: row.get("amount")?,
            status: row.get("status")?,
            payment_method: row.get("payment_method")?,
            description: row.get("description")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = StoreError;

    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let amount = Decimal::from_str(&row.amount).map_err(|err| {
            StoreError::Corrupt(format!(
                "transaction {}: amount `{}`: {err}",
                row.transaction_id, row.amount
            ))
        })?;
        let status = TransactionStatus::from_str(&row.status).map_err(|err| {
            StoreError::Corrupt(format!("transaction {}: {err}", row.transaction_id))
        })?;
        Ok(Transaction::new(
            TransactionId::new(row.transaction_id),
            row.user_id,
            amount,
            status,
            PaymentMethod::from(row.payment_method),
            row.description,
            row.created_at,
        ))
    }
}

fn query_account(
    conn: &Connection,
    filter: &str,
    value: &dyn rusqlite::ToSql,
) -> Result<Option<Account>, StoreError> {
    let sql = format!("SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE {filter} = ?1");
    conn.query_row(&sql, [value], AccountRow::from_row)
        .optional()?
        .map(Account::try_from)
        .transpose()
}

fn insert_transaction(conn: &Connection, tx: &Transaction) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO transactions
            (transaction_id, user_id, amount, status, payment_method, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            tx.id().as_str(),
            tx.owner(),
            tx.amount().to_string(),
            tx.status().as_str(),
            tx.payment_method().as_str(),
            tx.description(),
            tx.created_at(),
        ],
    )?;
    Ok(())
}

fn transaction_exists(conn: &Connection, id: &TransactionId) -> Result<bool, StoreError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM transactions WHERE transaction_id = ?1)",
        [id.as_str()],
        |row| row.get(0),
    )?)
}

/// SQLite-backed store. All access goes through one connection, and every
/// unit of work is a `BEGIN IMMEDIATE` transaction on it, so units are
/// serialized by the database itself.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>, busy_timeout: Duration) -> Result<Self, StoreError> {
        Self::with_connection(Connection::open(path)?, busy_timeout)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::with_connection(Connection::open_in_memory()?, DEFAULT_BUSY_TIMEOUT)
    }

    fn with_connection(conn: Connection, busy_timeout: Duration) -> Result<Self, StoreError> {
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(poisoned)
    }
}

impl LedgerStore for SqliteStore {
    type Unit<'a> = SqliteUnit<'a>;

    fn account_by_owner(&self, owner: UserId) -> Result<Option<Account>, StoreError> {
        query_account(&*self.conn()?, "user_id", &owner)
    }

    fn account_by_number(&self, number: &AccountNumber) -> Result<Option<Account>, StoreError> {
        query_account(&*self.conn()?, "account_number", &number.as_str())
    }

    fn account_number_exists(&self, number: &AccountNumber) -> Result<bool, StoreError> {
        Ok(self.conn()?.query_row(
            "SELECT EXISTS(SELECT 1 FROM accounts WHERE account_number = ?1)",
            [number.as_str()],
            |row| row.get(0),
        )?)
    }

    fn all_accounts(&self) -> Result<Vec<Account>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts ORDER BY id"
        ))?;
        let rows = stmt
            .query_map([], AccountRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Account::try_from).collect()
    }

    fn insert_account(&self, account: NewAccount) -> Result<Account, StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO accounts
                (account_number, user_id, balance, account_type, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![
                account.number.as_str(),
                account.owner,
                Decimal::ZERO.to_string(),
                account.account_type,
                account.created_at,
            ],
        )?;
        Ok(Account::open(conn.last_insert_rowid(), account))
    }

    fn transaction(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        self.conn()?
            .query_row(
                &format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions WHERE transaction_id = ?1"
                ),
                [id.as_str()],
                TransactionRow::from_row,
            )
            .optional()?
            .map(Transaction::try_from)
            .transpose()
    }

    fn transactions_by_owner(&self, owner: UserId) -> Result<Vec<Transaction>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions
             WHERE user_id = ?1
             ORDER BY created_at DESC, transaction_id DESC"
        ))?;
        let rows = stmt
            .query_map([owner], TransactionRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(Transaction::try_from).collect()
    }

    fn append_transaction(&self, transaction: &Transaction) -> Result<(), StoreError> {
        insert_transaction(&*self.conn()?, transaction)
    }

    fn begin(&self, accounts: &[AccountId]) -> Result<SqliteUnit<'_>, StoreError> {
        let conn = self.conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(SqliteUnit {
            conn,
            locked: lock_order(accounts),
            open: true,
        })
    }
}

pub struct SqliteUnit<'a> {
    conn: MutexGuard<'a, Connection>,
    locked: Vec<AccountId>,
    open: bool,
}

impl SqliteUnit<'_> {
    fn ensure_locked(&self, id: AccountId) -> Result<(), StoreError> {
        if self.locked.contains(&id) {
            Ok(())
        } else {
            Err(StoreError::NotLocked(id))
        }
    }
}

impl UnitOfWork for SqliteUnit<'_> {
    fn account(&self, id: AccountId) -> Result<Account, StoreError> {
        self.ensure_locked(id)?;
        query_account(&*self.conn, "id", &id)?
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
        let updated = self.conn.execute(
            "UPDATE accounts SET balance = ?1, updated_at = ?2 WHERE id = ?3",
            params![
                account.balance().to_string(),
                account.updated_at(),
                account.id()
            ],
        )?;
        if updated == 0 {
            return Err(StoreError::Corrupt(format!(
                "account {} vanished during update",
                account.id()
            )));
        }
        Ok(())
    }

    fn transaction_exists(&self, id: &TransactionId) -> Result<bool, StoreError> {
        transaction_exists(&*self.conn, id)
    }

    fn append(&mut self, transaction: &Transaction) -> Result<(), StoreError> {
        insert_transaction(&*self.conn, transaction)
    }

    fn commit(mut self) -> Result<(), StoreError> {
        self.conn.execute_batch("COMMIT")?;
        self.open = false;
        Ok(())
    }
}

impl Drop for SqliteUnit<'_> {
    fn drop(&mut self) {
        if self.open {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                tracing::warn!(error = %err, "Failed to roll back unit of work");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn new_account(owner: UserId, draw: u64) -> NewAccount {
        NewAccount {
            number: AccountNumber::from_draw(draw),
            owner,
            account_type: "SAVINGS".to_string(),
            created_at: Utc::now(),
        }
    }

    fn entry(id: &str, owner: UserId, method: PaymentMethod) -> Transaction {
        Transaction::new(
            TransactionId::new(id),
            owner,
            dec!(12.34),
            TransactionStatus::Pending,
            method,
            Some("card top-up".to_string()),
            Utc::now(),
        )
    }

    #[test]
    fn constraint_violations_are_classified() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = store.insert_account(new_account(1, 55)).unwrap();
        assert_eq!(account.number().as_str(), "0000000055");

        let err = store.insert_account(new_account(1, 56)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Constraint::AccountOwner)));
        let err = store.insert_account(new_account(2, 55)).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Constraint::AccountNumber)));

        let tx = entry("TXN1", 1, PaymentMethod::Deposit);
        store.append_transaction(&tx).unwrap();
        let err = store.append_transaction(&tx).unwrap_err();
        assert!(matches!(err, StoreError::Conflict(Constraint::TransactionId)));
    }

    #[test]
    fn lookups_by_owner_and_number() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = store.insert_account(new_account(4, 77)).unwrap();
        let by_owner = store.account_by_owner(4).unwrap().unwrap();
        assert_eq!(by_owner.id(), account.id());
        let by_number = store
            .account_by_number(&AccountNumber::from_draw(77))
            .unwrap()
            .unwrap();
        assert_eq!(by_number.owner(), 4);
        assert!(store.account_by_owner(5).unwrap().is_none());
        assert!(
            store
                .account_by_number(&AccountNumber::from_draw(78))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn transaction_round_trips_through_columns() {
        let store = SqliteStore::open_in_memory().unwrap();
        let tx = entry("TXN1", 4, PaymentMethod::External("CARD".to_string()));
        store.append_transaction(&tx).unwrap();

        let loaded = store
            .transaction(&TransactionId::new("TXN1"))
            .unwrap()
            .unwrap();
        assert_eq!(loaded, tx);
        assert!(
            store
                .transaction(&TransactionId::new("missing"))
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn ledger_rows_cannot_be_rewritten() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .append_transaction(&entry("TXN1", 1, PaymentMethod::Deposit))
            .unwrap();
        let conn = store.conn().unwrap();
        assert!(
            conn.execute("UPDATE transactions SET amount = '0'", [])
                .is_err()
        );
        assert!(conn.execute("DELETE FROM transactions", []).is_err());
    }

    #[test]
    fn dropped_unit_rolls_back() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = store.insert_account(new_account(1, 1)).unwrap();
        {
            let mut unit = store.begin(&[account.id()]).unwrap();
            let mut acc = unit.account(account.id()).unwrap();
            let credit = acc.handle_credit(dec!(3)).unwrap();
            acc.apply(&credit, Utc::now());
            unit.save(&acc).unwrap();
            unit.append(&entry("TXN1", 1, PaymentMethod::Deposit))
                .unwrap();
            assert!(unit.transaction_exists(&TransactionId::new("TXN1")).unwrap());
        }
        assert_eq!(
            store.account_by_owner(1).unwrap().unwrap().balance(),
            Decimal::ZERO
        );
        assert!(store.transactions_by_owner(1).unwrap().is_empty());
    }

    #[test]
    fn committed_unit_is_visible() {
        let store = SqliteStore::open_in_memory().unwrap();
        let account = store.insert_account(new_account(1, 1)).unwrap();
        let mut unit = store.begin(&[account.id()]).unwrap();
        let mut acc = unit.account(account.id()).unwrap();
        let credit = acc.handle_credit(dec!(3.25)).unwrap();
        acc.apply(&credit, Utc::now());
        unit.save(&acc).unwrap();
        unit.commit().unwrap();

        let stored = store.account_by_owner(1).unwrap().unwrap();
        assert_eq!(stored.balance(), dec!(3.25));
        assert!(stored.updated_at() >= stored.created_at());
    }

    #[test]
    fn corrupt_balance_is_reported() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.insert_account(new_account(1, 1)).unwrap();
        store
            .conn()
            .unwrap()
            .execute("UPDATE accounts SET balance = '-5' WHERE user_id = 1", [])
            .unwrap();
        assert!(matches!(
            store.account_by_owner(1),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn reopened_file_keeps_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.db");
        {
            let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
            store.insert_account(new_account(8, 800)).unwrap();
        }
        let store = SqliteStore::open(&path, DEFAULT_BUSY_TIMEOUT).unwrap();
        let account = store.account_by_owner(8).unwrap().unwrap();
        assert_eq!(account.number().as_str(), "0000000800");
        assert_eq!(store.all_accounts().unwrap().len(), 1);
    }
}
