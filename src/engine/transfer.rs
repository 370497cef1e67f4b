use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};

use crate::{
    account::{AccountNumber, UserId},
    command::TransferRequest,
    config::TransferEntries,
    error::LedgerError,
    store::{LedgerStore, UnitOfWork},
    transaction::{PaymentMethod, Transaction, TransactionStatus},
};

use super::Ledger;

/// How the receiving account is addressed.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Recipient<'a> {
    Number(&'a AccountNumber),
    Owner(UserId),
}

impl<S: LedgerStore> Ledger<S> {
    /// Moves `request.amount` from the account of `from` to the account
    /// numbered `request.to_account_number`.
    ///
    /// Checks run in a fixed order: amount, sender, receiver, self transfer,
    /// and finally the sender's balance, which is read again after both
    /// accounts are locked. On success the debit, the credit and the ledger
    /// entry commit together; on any failure nothing is written.
    pub fn transfer(
        &self,
        from: UserId,
        request: &TransferRequest,
    ) -> Result<Transaction, LedgerError> {
        self.transfer_to(
            from,
            Recipient::Number(&request.to_account_number),
            request.amount,
        )
    }

    pub(crate) fn transfer_to(
        &self,
        from: UserId,
        recipient: Recipient<'_>,
        amount: Decimal,
    ) -> Result<Transaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount { amount });
        }
        let sender = self
            .store
            .account_by_owner(from)?
            .ok_or(LedgerError::SenderAccountNotFound { user: from })?;
        let receiver = match recipient {
            Recipient::Number(number) => self.store.account_by_number(number)?,
            Recipient::Owner(owner) => self.store.account_by_owner(owner)?,
        }
        .ok_or(LedgerError::ReceiverAccountNotFound)?;
        if sender.id() == receiver.id() {
            return Err(LedgerError::SelfTransferNotAllowed {
                number: sender.number().clone(),
            });
        }

        let mut unit = self.store.begin(&[sender.id(), receiver.id()])?;
        let mut sender = unit.account(sender.id())?;
        let mut receiver = unit.account(receiver.id())?;
        let (sender_before, receiver_before) = (sender.balance(), receiver.balance());

        let debit = sender.handle_debit(amount)?;
        let credit = receiver.handle_credit(amount)?;
        let now = Utc::now();
        sender.apply(&debit, now);
        receiver.apply(&credit, now);

        // compare the two legs instead of summing balances, which may not fit
        let debited = sender_before.checked_sub(sender.balance());
        let credited = receiver.balance().checked_sub(receiver_before);
        if debited != Some(amount)
            || credited != Some(amount)
            || sender.balance() < Decimal::ZERO
            || receiver.balance() < Decimal::ZERO
        {
            error!(
                sender = sender.id(),
                receiver = receiver.id(),
                %amount,
                ?debited,
                ?credited,
                "Transfer would break balance invariants, aborting"
            );
            return Err(LedgerError::DataCorruption {
                reason: format!(
                    "transfer of {amount} between accounts {} and {} debited {debited:?} and credited {credited:?}",
                    sender.id(),
                    receiver.id()
                ),
            });
        }
        unit.save(&sender)?;
        unit.save(&receiver)?;

        let id = self.fresh_transaction_id(|id| unit.transaction_exists(id))?;
        let transaction = Transaction::new(
            id,
            sender.owner(),
            amount,
            TransactionStatus::Completed,
            PaymentMethod::Transfer,
            None,
            now,
        );
        unit.append(&transaction)?;

        if self.config.transfer_entries == TransferEntries::SenderAndReceiver {
            let id = self.fresh_transaction_id(|id| unit.transaction_exists(id))?;
            unit.append(&Transaction::new(
                id,
                receiver.owner(),
                amount,
                TransactionStatus::Completed,
                PaymentMethod::TransferCredit,
                None,
                now,
            ))?;
        }
        unit.commit()?;

        info!(
            transaction_id = %transaction.id(),
            from = sender.owner(),
            to = receiver.owner(),
            %amount,
            "Transfer completed"
        );
        Ok(transaction)
    }
}
