use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

use crate::account::{AccountNumber, UserId};

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub to_account_number: AccountNumber,
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DepositRequest {
    pub amount: Decimal,
    #[serde(default)]
    pub description: Option<String>,
}

/// A payment the ledger only records. Balances are never touched.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequest {
    pub amount: Decimal,
    pub payment_method: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    Open,
    Deposit,
    Transfer,
    Payment,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("Amount is required for {kind:?}")]
    AmountRequired { kind: CommandKind },
    #[error("Counterparty is required for {kind:?}")]
    CounterpartyRequired { kind: CommandKind },
    #[error("Payment method is required for {kind:?}")]
    MethodRequired { kind: CommandKind },
}

/// One line of a replay file, addressed by user ids rather than account
/// numbers since numbers are only known once accounts exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerCommand {
    Open {
        user: UserId,
    },
    Deposit {
        user: UserId,
        request: DepositRequest,
    },
    Transfer {
        from: UserId,
        to: UserId,
        amount: Decimal,
    },
    Payment {
        user: UserId,
        request: PaymentRequest,
    },
}

impl LedgerCommand {
    pub fn parse_command(
        kind: CommandKind,
        user: UserId,
        counterparty: Option<UserId>,
        amount: Option<Decimal>,
        method: Option<String>,
        description: Option<String>,
    ) -> Result<Self, CommandError> {
        let amount_for = |kind| amount.ok_or(CommandError::AmountRequired { kind });
        match kind {
            CommandKind::Open => Ok(Self::Open { user }),
            CommandKind::Deposit => Ok(Self::Deposit {
                user,
                request: DepositRequest {
                    amount: amount_for(kind)?,
                    description,
                },
            }),
            CommandKind::Transfer => Ok(Self::Transfer {
                from: user,
                to: counterparty.ok_or(CommandError::CounterpartyRequired { kind })?,
                amount: amount_for(kind)?,
            }),
            CommandKind::Payment => {
                let method = method
                    .filter(|method| !method.trim().is_empty())
                    .ok_or(CommandError::MethodRequired { kind })?;
                Ok(Self::Payment {
                    user,
                    request: PaymentRequest {
                        amount: amount_for(kind)?,
                        payment_method: method,
                        description,
                    },
                })
            }
        }
    }
}
