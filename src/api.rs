use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;

use crate::{
    account::{Account, AccountId, AccountNumber, UserId},
    command::{DepositRequest, PaymentRequest, TransferRequest},
    directory::UserDirectory,
    engine::Ledger,
    error::LedgerError,
    store::LedgerStore,
    transaction::{Transaction, TransactionId},
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub id: AccountId,
    pub account_number: AccountNumber,
    pub balance: Decimal,
    pub account_type: String,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id(),
            account_number: account.number().clone(),
            balance: account.balance(),
            account_type: account.account_type().to_string(),
            user_id: account.owner(),
            created_at: account.created_at(),
            updated_at: account.updated_at(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionView {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub status: String,
    pub payment_method: String,
    pub created_at: DateTime<Utc>,
    /// Empty when the directory has no address for the owner.
    pub user_email: String,
    pub description: Option<String>,
}

impl TransactionView {
    fn new(transaction: &Transaction, user_email: String) -> Self {
        Self {
            transaction_id: transaction.id().clone(),
            amount: transaction.amount(),
            status: transaction.status().to_string(),
            payment_method: transaction.payment_method().to_string(),
            created_at: transaction.created_at(),
            user_email,
            description: transaction.description().map(str::to_owned),
        }
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unknown identity `{0}`")]
    UnknownIdentity(String),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApiError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownIdentity(_) => "UNKNOWN_IDENTITY",
            Self::Ledger(err) => err.code(),
        }
    }
}

/// Operations as seen by the request handlers: callers are identified by the
/// opaque identity the authentication layer established, results are wire
/// views.
pub struct LedgerApi<S, D> {
    ledger: Ledger<S>,
    directory: D,
}

impl<S: LedgerStore, D: UserDirectory> LedgerApi<S, D> {
    pub fn new(ledger: Ledger<S>, directory: D) -> Self {
        Self { ledger, directory }
    }

    pub fn ledger(&self) -> &Ledger<S> {
        &self.ledger
    }

    fn user(&self, identity: &str) -> Result<UserId, ApiError> {
        self.directory
            .resolve(identity)
            .ok_or_else(|| ApiError::UnknownIdentity(identity.to_string()))
    }

    fn view(&self, transaction: &Transaction) -> TransactionView {
        let email = self
            .directory
            .email(transaction.owner())
            .unwrap_or_default();
        TransactionView::new(transaction, email)
    }

    pub fn create_account(&self, identity: &str) -> Result<AccountView, ApiError> {
        let account = self.ledger.create_account(self.user(identity)?)?;
        Ok(AccountView::from(&account))
    }

    pub fn get_account(&self, identity: &str) -> Result<AccountView, ApiError> {
        let account = self.ledger.account(self.user(identity)?)?;
        Ok(AccountView::from(&account))
    }

    pub fn get_balance(&self, identity: &str) -> Result<Decimal, ApiError> {
        Ok(self.ledger.balance(self.user(identity)?)?)
    }

    pub fn transfer(
        &self,
        identity: &str,
        request: &TransferRequest,
    ) -> Result<TransactionView, ApiError> {
        let transaction = self.ledger.transfer(self.user(identity)?, request)?;
        Ok(self.view(&transaction))
    }

    pub fn deposit(
        &self,
        identity: &str,
        request: &DepositRequest,
    ) -> Result<TransactionView, ApiError> {
        let transaction = self.ledger.deposit(
            self.user(identity)?,
            request.amount,
            request.description.clone(),
        )?;
        Ok(self.view(&transaction))
    }

    /// See [`Ledger::record_payment`]; balances are not affected.
    pub fn record_payment(
        &self,
        identity: &str,
        request: &PaymentRequest,
    ) -> Result<TransactionView, ApiError> {
        let transaction = self.ledger.record_payment(self.user(identity)?, request)?;
        Ok(self.view(&transaction))
    }

    pub fn get_transaction(&self, id: &str) -> Result<TransactionView, ApiError> {
        let transaction = self.ledger.transaction(&TransactionId::new(id))?;
        Ok(self.view(&transaction))
    }

    pub fn list_transactions(&self, identity: &str) -> Result<Vec<TransactionView>, ApiError> {
        let transactions = self.ledger.transactions(self.user(identity)?)?;
        Ok(transactions.iter().map(|tx| self.view(tx)).collect())
    }
}
