/// Account state and balance rules.
/// Balances change through movements, which are created by handling a credit
/// or a debit and then applied.
pub mod account;

/// Immutable ledger entries.
pub mod transaction;

/// Request types, plus the commands replayed by [`bin_utils`].
pub mod command;

/// Public error taxonomy with stable codes.
pub mod error;

/// Account numbers and transaction ids.
pub mod id;

pub mod config;

/// Storage interface with per-account units of work, plus "in memory" and
/// SQLite implementations.
pub mod store;

/// Transfers, deposits, payments and reads, each running in one unit of work.
pub mod engine;

pub mod directory;

/// Identity resolution and wire views on top of [`engine::Ledger`].
pub mod api;

pub mod logging;

/// Replays a CSV command file and prints the resulting accounts. Kept in the
/// library so integration tests can drive it.
pub mod bin_utils;
