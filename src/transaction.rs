use std::{convert::Infallible, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::account::UserId;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Unknown transaction status `{0}`")]
pub struct UnknownStatus(pub String);

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLETED" => Ok(Self::Completed),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of money movement a transaction records. Methods the ledger does
/// not know about (card payments and the like) are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PaymentMethod {
    Transfer,
    /// Receiver side of a transfer, only written when receiver entries are enabled.
    TransferCredit,
    Deposit,
    External(String),
}

impl PaymentMethod {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Transfer => "TRANSFER",
            Self::TransferCredit => "TRANSFER_CREDIT",
            Self::Deposit => "DEPOSIT",
            Self::External(method) => method,
        }
    }
}

impl FromStr for PaymentMethod {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "TRANSFER" => Self::Transfer,
            "TRANSFER_CREDIT" => Self::TransferCredit,
            "DEPOSIT" => Self::Deposit,
            other => Self::External(other.to_owned()),
        })
    }
}

impl From<String> for PaymentMethod {
    fn from(value: String) -> Self {
        match value.parse() {
            Ok(method) => method,
            Err(never) => match never {},
        }
    }
}

impl From<PaymentMethod> for String {
    fn from(value: PaymentMethod) -> Self {
        match value {
            PaymentMethod::External(method) => method,
            known => known.as_str().to_owned(),
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger entry. Once appended it is never updated or removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    id: TransactionId,
    owner: UserId,
    amount: Decimal,
    status: TransactionStatus,
    payment_method: PaymentMethod,
    description: Option<String>,
    created_at: DateTime<Utc>,
}

impl Transaction {
    pub(crate) fn new(
        id: TransactionId,
        owner: UserId,
        amount: Decimal,
        status: TransactionStatus,
        payment_method: PaymentMethod,
        description: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            owner,
            amount,
            status,
            payment_method,
            description,
            created_at,
        }
    }

    pub fn id(&self) -> &TransactionId {
        &self.id
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn status(&self) -> TransactionStatus {
        self.status
    }

    pub fn payment_method(&self) -> &PaymentMethod {
        &self.payment_method
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
