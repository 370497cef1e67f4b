use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{info, warn};

use crate::{
    account::UserId,
    command::PaymentRequest,
    error::LedgerError,
    store::{Constraint, LedgerStore, StoreError, UnitOfWork},
    transaction::{PaymentMethod, Transaction, TransactionStatus},
};

use super::Ledger;

impl<S: LedgerStore> Ledger<S> {
    /// Credits the account of `user`. There is no upper bound on the balance.
    pub fn deposit(
        &self,
        user: UserId,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<Transaction, LedgerError> {
        let account = self
            .store
            .account_by_owner(user)?
            .ok_or(LedgerError::AccountNotFound { user })?;
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount });
        }

        let mut unit = self.store.begin(&[account.id()])?;
        let mut account = unit.account(account.id())?;
        let credit = account.handle_credit(amount)?;
        let now = Utc::now();
        account.apply(&credit, now);
        unit.save(&account)?;

        let id = self.fresh_transaction_id(|id| unit.transaction_exists(id))?;
        let transaction = Transaction::new(
            id,
            account.owner(),
            amount,
            TransactionStatus::Completed,
            PaymentMethod::Deposit,
            description,
            now,
        );
        unit.append(&transaction)?;
        unit.commit()?;

        info!(
            transaction_id = %transaction.id(),
            user,
            %amount,
            balance = %account.balance(),
            "Deposit completed"
        );
        Ok(transaction)
    }

    /// Records a payment processed outside the ledger, such as a card
    /// payment. The entry is stored as `PENDING` with the caller's payment
    /// method. No account is read or modified, so `user` need not hold one.
    pub fn record_payment(
        &self,
        user: UserId,
        request: &PaymentRequest,
    ) -> Result<Transaction, LedgerError> {
        if request.amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount {
                amount: request.amount,
            });
        }
        let method = PaymentMethod::from(request.payment_method.clone());
        for attempt in 0..self.config.ids.max_attempts {
            let transaction = Transaction::new(
                self.ids.next_transaction_id()?,
                user,
                request.amount,
                TransactionStatus::Pending,
                method.clone(),
                request.description.clone(),
                Utc::now(),
            );
            match self.store.append_transaction(&transaction) {
                Ok(()) => {
                    info!(
                        transaction_id = %transaction.id(),
                        user,
                        payment_method = %transaction.payment_method(),
                        amount = %transaction.amount(),
                        "Payment recorded"
                    );
                    return Ok(transaction);
                }
                Err(StoreError::Conflict(Constraint::TransactionId)) => {
                    warn!(attempt, transaction_id = %transaction.id(), "Transaction id already recorded, drawing again");
                }
                Err(err) => return Err(err.into()),
            }
        }
        Err(LedgerError::TransientStoreFailure {
            reason: format!(
                "no unused transaction id after {} draws",
                self.config.ids.max_attempts
            ),
        })
    }
}
