use std::io::Read;

use csv::{DeserializeRecordsIntoIter, Trim};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::{
    account::UserId,
    command::{CommandError, CommandKind, LedgerCommand},
};

#[derive(Debug, Deserialize)]
pub struct CommandRow {
    #[serde(rename = "type")]
    pub kind: CommandKind,
    pub user: UserId,
    pub counterparty: Option<UserId>,
    pub amount: Option<Decimal>,
    pub method: Option<String>,
    pub description: Option<String>,
}

impl CommandRow {
    pub fn into_command(self) -> Result<LedgerCommand, CommandError> {
        LedgerCommand::parse_command(
            self.kind,
            self.user,
            self.counterparty,
            self.amount,
            self.method,
            self.description.filter(|text| !text.is_empty()),
        )
    }
}

/// Parses a command list in CSV format, yielding each row with its line
/// number. Rows that cannot be deserialized are yielded as errors.
pub struct CsvCommandParser<R> {
    iter: DeserializeRecordsIntoIter<R, CommandRow>,
}

impl<R> CsvCommandParser<R>
where
    R: Read,
{
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(Trim::All)
            .flexible(true)
            .from_reader(source);

        Self {
            iter: reader.into_deserialize(),
        }
    }
}

impl<R> Iterator for CsvCommandParser<R>
where
    R: Read,
{
    type Item = (u64, Result<CommandRow, csv::Error>);

    fn next(&mut self) -> Option<Self::Item> {
        let curr_line = self.iter.reader().position().line();
        self.iter.next().map(|row| (curr_line, row))
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    #[test]
    fn parse_rows_with_optional_columns() {
        let input = "type,user,counterparty,amount,method,description
open, 1,,,,
deposit,1,,100.50,,paycheck
transfer,1,2,30,,
payment,1,,9.99,CARD,
";
        let rows: Vec<_> = CsvCommandParser::new(input.as_bytes())
            .map(|(_, row)| row.unwrap())
            .collect();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0].kind, CommandKind::Open);
        assert_eq!(rows[0].user, 1);
        assert_eq!(rows[1].amount, Some(dec!(100.50)));
        assert_eq!(rows[1].description.as_deref(), Some("paycheck"));
        assert_eq!(rows[2].counterparty, Some(2));
        assert_eq!(rows[3].method.as_deref(), Some("CARD"));
    }

    #[test]
    fn short_rows_are_accepted() {
        let input = "type,user,counterparty,amount,method,description\nopen,7\n";
        let (_, row) = CsvCommandParser::new(input.as_bytes()).next().unwrap();
        let command = row.unwrap().into_command().unwrap();
        assert_eq!(command, LedgerCommand::Open { user: 7 });
    }

    #[test]
    fn bad_rows_are_reported_with_line() {
        let input = "type,user,counterparty,amount,method,description
withdraw,1,,5,,
deposit,1,,5,,
";
        let rows: Vec<_> = CsvCommandParser::new(input.as_bytes()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 2);
        assert!(rows[0].1.is_err());
        assert_eq!(rows[1].0, 3);
        assert!(rows[1].1.is_ok());
    }
}
