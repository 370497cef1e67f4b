use rust_decimal::Decimal;
use thiserror::Error;

use crate::{
    account::{AccountError, AccountNumber, UserId},
    store::StoreError,
    transaction::TransactionId,
};

/// Every failure a ledger operation can report. The first six are business
/// rule rejections; retrying them changes nothing.
///
/// Messages carry the amounts and ids involved and vary from call to call.
/// Callers that map failures onto responses match on [`LedgerError::code`].
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Amount must be greater than zero, got {amount}")]
    InvalidAmount { amount: Decimal },
    #[error("Sender account not found for user {user}")]
    SenderAccountNotFound { user: UserId },
    #[error("Receiver account not found")]
    ReceiverAccountNotFound,
    #[error("Cannot transfer to the same account {number}")]
    SelfTransferNotAllowed { number: AccountNumber },
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Crediting {amount} to balance {balance} exceeds the representable range")]
    BalanceOverflow { balance: Decimal, amount: Decimal },
    #[error("User {user} already has an account")]
    AlreadyExists { user: UserId },
    #[error("Account not found for user {user}")]
    AccountNotFound { user: UserId },
    #[error("Transaction not found: {id}")]
    TransactionNotFound { id: TransactionId },
    #[error("Transient store failure, safe to retry: {reason}")]
    TransientStoreFailure { reason: String },
    #[error("Data corruption detected: {reason}")]
    DataCorruption { reason: String },
    #[error("Storage failure: {0}")]
    Storage(#[source] StoreError),
}

impl LedgerError {
    /// Stable identifier for the API layer to map onto a response status.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::SenderAccountNotFound { .. } => "SENDER_ACCOUNT_NOT_FOUND",
            Self::ReceiverAccountNotFound => "RECEIVER_ACCOUNT_NOT_FOUND",
            Self::SelfTransferNotAllowed { .. } => "SELF_TRANSFER_NOT_ALLOWED",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            Self::AlreadyExists { .. } => "ALREADY_EXISTS",
            Self::AccountNotFound { .. } => "ACCOUNT_NOT_FOUND",
            Self::TransactionNotFound { .. } => "TRANSACTION_NOT_FOUND",
            Self::TransientStoreFailure { .. } => "TRANSIENT_STORE_FAILURE",
            Self::DataCorruption { .. } => "DATA_CORRUPTION",
            Self::Storage(_) => "STORAGE_FAILURE",
        }
    }

    pub fn is_business_rule(&self) -> bool {
        matches!(
            self,
            Self::InvalidAmount { .. }
                | Self::SenderAccountNotFound { .. }
                | Self::ReceiverAccountNotFound
                | Self::SelfTransferNotAllowed { .. }
                | Self::InsufficientBalance { .. }
                | Self::BalanceOverflow { .. }
        )
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientStoreFailure { .. })
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict(constraint) => Self::TransientStoreFailure {
                reason: format!("unique constraint {constraint} raced with another writer"),
            },
            StoreError::Unavailable(reason) => Self::TransientStoreFailure { reason },
            StoreError::Corrupt(reason) => {
                tracing::error!(%reason, "Ledger store returned corrupt data");
                Self::DataCorruption { reason }
            }
            other => Self::Storage(other),
        }
    }
}

impl From<AccountError> for LedgerError {
    fn from(err: AccountError) -> Self {
        match err {
            AccountError::NonPositiveAmount { amount } => Self::InvalidAmount { amount },
            AccountError::InsufficientBalance {
                available,
                requested,
            } => Self::InsufficientBalance {
                available,
                requested,
            },
            AccountError::BalanceOverflow { balance, amount } => {
                Self::BalanceOverflow { balance, amount }
            }
        }
    }
}
