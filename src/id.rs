use std::{
    sync::{Mutex, PoisonError},
    thread,
};

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, warn};

use crate::{
    account::{ACCOUNT_NUMBER_SPACE, AccountNumber},
    config::IdConfig,
    error::LedgerError,
    store::{LedgerStore, StoreError},
    transaction::TransactionId,
};

pub const TRANSACTION_ID_PREFIX: &str = "TXN";

type NumberSource = Box<dyn FnMut() -> u64 + Send>;

fn poisoned<T>(_: PoisonError<T>) -> LedgerError {
    LedgerError::TransientStoreFailure {
        reason: "id generator lock poisoned".to_string(),
    }
}

/// Issues account numbers and transaction ids.
///
/// Transaction ids are `TXN` followed by a ULID from a single monotonic
/// generator, so ids issued by one process are strictly increasing and never
/// repeat. Account numbers are random draws checked against the store; the
/// store's unique constraint remains the final word on a race.
pub struct IdGenerator {
    numbers: Mutex<NumberSource>,
    transactions: Mutex<ulid::Generator>,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    pub fn new() -> Self {
        let mut rng = StdRng::from_entropy();
        Self::with_number_source(move || rng.gen_range(0..ACCOUNT_NUMBER_SPACE))
    }

    /// Uses `source` for account number draws instead of the OS seeded RNG.
    pub fn with_number_source(source: impl FnMut() -> u64 + Send + 'static) -> Self {
        Self {
            numbers: Mutex::new(Box::new(source)),
            transactions: Mutex::new(ulid::Generator::new()),
        }
    }

    fn draw_account_number(&self) -> Result<AccountNumber, LedgerError> {
        let mut source = self.numbers.lock().map_err(poisoned)?;
        Ok(AccountNumber::from_draw(source()))
    }

    /// Draws until the store reports a number as unused, at most
    /// `ids.max_attempts` times.
    pub fn next_account_number<S: LedgerStore>(
        &self,
        store: &S,
        ids: &IdConfig,
    ) -> Result<AccountNumber, LedgerError> {
        for attempt in 0..ids.max_attempts {
            let candidate = self.draw_account_number()?;
            match store.account_number_exists(&candidate) {
                Ok(false) => return Ok(candidate),
                Ok(true) => {
                    debug!(attempt, account_number = %candidate, "Account number taken, drawing again");
                }
                Err(StoreError::Unavailable(reason)) => {
                    warn!(attempt, %reason, "Store unavailable while checking account number");
                    thread::sleep(ids.backoff(attempt));
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::TransientStoreFailure {
            reason: format!(
                "no unused account number after {} draws",
                ids.max_attempts
            ),
        })
    }

    pub fn next_transaction_id(&self) -> Result<TransactionId, LedgerError> {
        let mut generator = self.transactions.lock().map_err(poisoned)?;
        let ulid = generator
            .generate()
            .map_err(|err| LedgerError::TransientStoreFailure {
                reason: format!("transaction id generator: {err}"),
            })?;
        Ok(TransactionId::new(format!("{TRANSACTION_ID_PREFIX}{ulid}")))
    }
}
