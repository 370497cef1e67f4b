//! Bootstraps [`crate::engine::Ledger`] for the replay binary: parse commands,
//! execute them in order, print the final accounts.

use std::io::{Read, Write};

use anyhow::Result;
use csv_parser::CsvCommandParser;
use csv_printer::{AccountRow, print_accounts};
use thiserror::Error;
use tracing::debug;

use crate::{command::CommandError, engine::Ledger, error::LedgerError, store::LedgerStore};

pub mod csv_parser;
pub mod csv_printer;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("Malformed row: {0}")]
    Row(#[from] csv::Error),
    #[error(transparent)]
    Command(#[from] CommandError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ReplayError {
    /// Rejections the ledger is expected to produce for some inputs, as
    /// opposed to broken input or a failing store.
    pub fn is_business_rule(&self) -> bool {
        match self {
            Self::Ledger(
                LedgerError::AlreadyExists { .. } | LedgerError::AccountNotFound { .. },
            ) => true,
            Self::Ledger(err) => err.is_business_rule(),
            _ => false,
        }
    }
}

pub struct Service<'w, S, R, W: 'w> {
    pub ledger: Ledger<S>,
    pub input: R,
    pub output: &'w mut W,
    pub error_printer: Box<dyn FnMut(u64, ReplayError)>,
}

impl<'w, S, R, W> Service<'w, S, R, W>
where
    S: LedgerStore,
    R: Read,
    W: Write + 'w,
{
    pub fn run(mut self) -> Result<()> {
        let parser = CsvCommandParser::new(self.input);

        for (line, row) in parser {
            let outcome = row
                .map_err(ReplayError::from)
                .and_then(|row| row.into_command().map_err(ReplayError::from))
                .and_then(|command| self.ledger.execute(command).map_err(ReplayError::from));
            match outcome {
                Ok(Some(transaction)) => {
                    debug!(line, transaction_id = %transaction.id(), "Command applied");
                }
                Ok(None) => {}
                Err(err) => (self.error_printer)(line, err),
            }
        }

        let accounts = self.ledger.accounts()?;
        print_accounts(self.output, accounts.iter().map(AccountRow::from))
    }
}
