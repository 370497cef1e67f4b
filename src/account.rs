use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub type AccountId = i64;
pub type UserId = i64;

pub const ACCOUNT_NUMBER_DIGITS: usize = 10;
pub const ACCOUNT_NUMBER_SPACE: u64 = 10_000_000_000;

/// Ten digit, zero padded account number.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccountNumber(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Account number must be exactly {ACCOUNT_NUMBER_DIGITS} digits, got `{0}`")]
pub struct InvalidAccountNumber(pub String);

impl AccountNumber {
    /// Builds a number from a raw draw, wrapping it into the ten digit space.
    pub fn from_draw(draw: u64) -> Self {
        Self(format!(
            "{:0width$}",
            draw % ACCOUNT_NUMBER_SPACE,
            width = ACCOUNT_NUMBER_DIGITS
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for AccountNumber {
    type Err = InvalidAccountNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() == ACCOUNT_NUMBER_DIGITS && s.bytes().all(|b| b.is_ascii_digit()) {
            Ok(Self(s.to_owned()))
        } else {
            Err(InvalidAccountNumber(s.to_owned()))
        }
    }
}

impl TryFrom<String> for AccountNumber {
    type Error = InvalidAccountNumber;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<AccountNumber> for String {
    fn from(value: AccountNumber) -> Self {
        value.0
    }
}

impl fmt::Display for AccountNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementKind {
    Credited,
    Debited,
}

/// Validated balance change, produced by [`Account::handle_credit`] or
/// [`Account::handle_debit`] and applied with [`Account::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceMovement {
    amount: Decimal,
    kind: MovementKind,
}

impl BalanceMovement {
    pub fn amount(&self) -> Decimal {
        self.amount
    }

    pub fn kind(&self) -> MovementKind {
        self.kind
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccountError {
    #[error("Amount must be greater than zero, got {amount}")]
    NonPositiveAmount { amount: Decimal },
    #[error("Insufficient balance: requested {requested}, available {available}")]
    InsufficientBalance {
        available: Decimal,
        requested: Decimal,
    },
    #[error("Crediting {amount} to balance {balance} exceeds the representable range")]
    BalanceOverflow { balance: Decimal, amount: Decimal },
}

/// Fields of an account that does not exist yet; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub number: AccountNumber,
    pub owner: UserId,
    pub account_type: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    id: AccountId,
    number: AccountNumber,
    owner: UserId,
    balance: Decimal,
    account_type: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Account {
    /// Rebuilds an account from stored state. Stores are expected to reject
    /// negative balances before calling this.
    pub(crate) fn restore(
        id: AccountId,
        number: AccountNumber,
        owner: UserId,
        balance: Decimal,
        account_type: String,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            number,
            owner,
            balance,
            account_type,
            created_at,
            updated_at,
        }
    }

    pub(crate) fn open(id: AccountId, new: NewAccount) -> Self {
        Self {
            id,
            number: new.number,
            owner: new.owner,
            balance: Decimal::ZERO,
            account_type: new.account_type,
            created_at: new.created_at,
            updated_at: new.created_at,
        }
    }

    pub fn id(&self) -> AccountId {
        self.id
    }

    pub fn number(&self) -> &AccountNumber {
        &self.number
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn balance(&self) -> Decimal {
        self.balance
    }

    pub fn account_type(&self) -> &str {
        &self.account_type
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Applies a movement produced by this account's own `handle_*` call.
    /// Range and funds were checked there, so the arithmetic only saturates.
    pub fn apply(&mut self, movement: &BalanceMovement, at: DateTime<Utc>) {
        self.balance = match movement.kind {
            MovementKind::Credited => self.balance.saturating_add(movement.amount),
            MovementKind::Debited => self.balance.saturating_sub(movement.amount),
        };
        self.updated_at = at;
    }

    pub fn handle_credit(&self, amount: Decimal) -> Result<BalanceMovement, AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::NonPositiveAmount { amount });
        }
        if self.balance.checked_add(amount).is_none() {
            return Err(AccountError::BalanceOverflow {
                balance: self.balance,
                amount,
            });
        }
        Ok(BalanceMovement {
            amount,
            kind: MovementKind::Credited,
        })
    }

    pub fn handle_debit(&self, amount: Decimal) -> Result<BalanceMovement, AccountError> {
        if amount <= Decimal::ZERO {
            return Err(AccountError::NonPositiveAmount { amount });
        }
        if self.balance < amount {
            return Err(AccountError::InsufficientBalance {
                available: self.balance,
                requested: amount,
            });
        }
        Ok(BalanceMovement {
            amount,
            kind: MovementKind::Debited,
        })
    }
}
