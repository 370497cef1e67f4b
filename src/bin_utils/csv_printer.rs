use std::io::Write;

use csv::Writer;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::account::{Account, AccountNumber, UserId};

#[derive(Debug, Serialize)]
pub struct AccountRow<'a> {
    pub user: UserId,
    pub account_number: &'a AccountNumber,
    pub account_type: &'a str,
    pub balance: Decimal,
}

impl<'a> From<&'a Account> for AccountRow<'a> {
    fn from(account: &'a Account) -> Self {
        Self {
            user: account.owner(),
            account_number: account.number(),
            account_type: account.account_type(),
            balance: account.balance(),
        }
    }
}

pub fn print_accounts<'a, W>(
    output: &mut W,
    accounts: impl Iterator<Item = AccountRow<'a>>,
) -> anyhow::Result<()>
where
    W: Write,
{
    let mut writer = Writer::from_writer(output);
    for acc in accounts {
        if let Err(err) = writer.serialize(acc) {
            anyhow::bail!("Failed to write to CSV: {err}")
        }
    }
    if let Err(err) = writer.flush() {
        anyhow::bail!("Failed to flush CSV writer: {err}")
    }
    Ok(())
}
