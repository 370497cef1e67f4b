use std::fs::File;

use account_ledger::{
    bin_utils::{ReplayError, Service},
    config::LedgerConfig,
    engine::Ledger,
    logging::init_logging,
    store::{InMemoryStore, LedgerStore, SqliteStore},
};
use anyhow::{Context, Result};
use tracing::info;

fn replay<S: LedgerStore>(store: S, config: LedgerConfig, input: File) -> Result<()> {
    let service = Service {
        ledger: Ledger::new(store, config),
        input,
        output: &mut std::io::stdout(),
        error_printer: Box::new(|line: u64, err: ReplayError| {
            if err.is_business_rule() {
                // expected rejections, not input problems
                info!(line, error = %err, "Command rejected");
            } else {
                eprintln!("Error at line {line}: {err}")
            }
        }),
    };
    service.run()
}

fn main() -> Result<()> {
    let mut args = std::env::args().skip(1);
    let filename = args
        .next()
        .context("Expected a file name as the first argument")?;
    let config = match args.next() {
        Some(path) => LedgerConfig::load(&path)
            .with_context(|| format!("Failed to load config `{path}`"))?,
        None => LedgerConfig::default(),
    };
    if let Err(err) = init_logging(&config.logging) {
        eprintln!("Logging disabled: {err}");
    }

    let file = File::open(&filename).with_context(|| format!("Failed to open `{filename}`"))?;

    match config.store.database.clone() {
        Some(path) => {
            let store = SqliteStore::open(&path, config.store.busy_timeout())
                .with_context(|| format!("Failed to open database `{}`", path.display()))?;
            replay(store, config, file)
        }
        None => {
            info!("No database configured, ledger state is kept in memory only");
            replay(InMemoryStore::new(config.store.lock_timeout()), config, file)
        }
    }
}
