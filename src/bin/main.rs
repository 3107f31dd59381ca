// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2025 Daniel Negri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use clap::Parser;
use csv::{ReaderBuilder, Trim, Writer};
use point_ledger_rs::{
    AccountBalance, AccountId, BalanceError, Engine, EngineConfig, MemoryBalanceStore,
    MemoryHistoryLog, Points, TransactionKind,
};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Point Ledger - Apply charge/use command CSV files
///
/// Reads commands from a CSV file, applies them to in-memory point balances
/// and writes the resulting balances to stdout.
#[derive(Parser, Debug)]
#[command(name = "point-ledger")]
#[command(about = "Applies point charge/use commands and reports balances", long_about = None)]
struct Args {
    /// Path to CSV file with commands
    ///
    /// Expected format: type,account,amount
    /// Example: cargo run -- commands.csv > balances.csv
    #[arg(value_name = "FILE")]
    input: PathBuf,

    /// Number of worker threads applying commands
    #[arg(short, long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..))]
    workers: u16,

    /// Maximum time a command waits for its account, in milliseconds
    #[arg(long, default_value_t = EngineConfig::DEFAULT_LOCK_TIMEOUT.as_millis() as u64)]
    lock_timeout_ms: u64,

    /// Also write every history entry after the balances
    #[arg(long)]
    history: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let file = match File::open(&args.input) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("Error opening file '{}': {}", args.input.display(), e);
            process::exit(1);
        }
    };

    let engine = Engine::with_config(
        MemoryBalanceStore::new(),
        MemoryHistoryLog::new(),
        EngineConfig {
            lock_timeout: Duration::from_millis(args.lock_timeout_ms),
        },
    );

    let summary = match process_commands(BufReader::new(file), &engine, args.workers.into()) {
        Ok(summary) => summary,
        Err(e) => {
            eprintln!("Error processing commands: {}", e);
            process::exit(1);
        }
    };
    info!(
        applied = summary.applied,
        rejected = summary.rejected,
        skipped = summary.skipped,
        "processing finished"
    );

    if let Err(e) = write_report(&engine, std::io::stdout(), args.history) {
        eprintln!("Error writing output: {}", e);
        process::exit(1);
    }
}

/// Raw CSV record matching the input format.
///
/// Fields: `type, account, amount`
#[derive(Debug, Deserialize)]
struct CsvRecord {
    #[serde(rename = "type")]
    kind: String,
    account: i64,
    amount: Points,
}

/// One parsed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Command {
    kind: TransactionKind,
    account_id: AccountId,
    amount: Points,
}

impl CsvRecord {
    /// Returns `None` for unknown command types.
    fn into_command(self) -> Option<Command> {
        let kind = match self.kind.to_lowercase().as_str() {
            "charge" => TransactionKind::Charge,
            "use" => TransactionKind::Use,
            _ => return None,
        };
        Some(Command {
            kind,
            account_id: AccountId(self.account),
            amount: self.amount,
        })
    }
}

impl Command {
    fn apply(self, engine: &Engine) -> Result<AccountBalance, BalanceError> {
        match self.kind {
            TransactionKind::Charge => engine.charge(self.account_id, self.amount),
            TransactionKind::Use => engine.use_points(self.account_id, self.amount),
        }
    }
}

/// Counts of what happened to each input row.
#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    applied: usize,
    rejected: usize,
    skipped: usize,
}

/// Applies commands from a CSV reader.
///
/// Rows are parsed on the calling thread and handed to `workers` threads over
/// a bounded channel. Commands for the same account are serialized by the
/// engine, so with a single worker the result is the file order and with more
/// workers it is some interleaving of it. Malformed rows and rejected commands
/// are logged and skipped.
///
/// # CSV Format
///
/// Expected columns: `type, account, amount`
/// - `type`: `charge` or `use`
/// - `account`: Account id (positive integer)
/// - `amount`: Points (positive integer)
///
/// ```csv
/// type,account,amount
/// charge,7,1000
/// use,7,300
/// ```
///
/// # Errors
///
/// Returns a CSV error only if a worker thread panicked; row level problems
/// never stop processing.
fn process_commands<R: Read>(
    reader: R,
    engine: &Engine,
    workers: usize,
) -> Result<Summary, csv::Error> {
    let applied = AtomicUsize::new(0);
    let rejected = AtomicUsize::new(0);
    let mut skipped = 0;

    let mut rdr = ReaderBuilder::new()
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(reader);

    let (sender, receiver) = crossbeam::channel::bounded::<Command>(1024);

    let scope = crossbeam::scope(|s| {
        for _ in 0..workers.max(1) {
            let receiver = receiver.clone();
            let (applied, rejected) = (&applied, &rejected);
            s.spawn(move |_| {
                for command in receiver {
                    match command.apply(engine) {
                        Ok(_) => applied.fetch_add(1, Ordering::Relaxed),
                        Err(e) => {
                            warn!(?command, "rejected: {e}");
                            rejected.fetch_add(1, Ordering::Relaxed)
                        }
                    };
                }
            });
        }
        drop(receiver);

        for result in rdr.deserialize::<CsvRecord>() {
            let command = match result.map(CsvRecord::into_command) {
                Ok(Some(command)) => command,
                Ok(None) => {
                    warn!("skipping row with unknown command type");
                    skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!("skipping malformed row: {e}");
                    skipped += 1;
                    continue;
                }
            };
            // Receivers only go away when a worker panics, which the scope reports.
            if sender.send(command).is_err() {
                break;
            }
        }
        drop(sender);
    });

    if scope.is_err() {
        return Err(csv::Error::from(std::io::Error::other(
            "worker thread panicked",
        )));
    }

    Ok(Summary {
        applied: applied.into_inner(),
        rejected: rejected.into_inner(),
        skipped,
    })
}

/// Writes balances, and optionally the full history, as CSV.
///
/// # CSV Format
///
/// Balances: `account_id, balance, updated_at`, ordered by account.
/// History (after a blank line): `history_id, account_id, amount, kind, timestamp`,
/// ordered by history id.
///
/// # Errors
///
/// Returns a CSV error if writing fails.
fn write_report<W: Write>(
    engine: &Engine,
    mut writer: W,
    include_history: bool,
) -> Result<(), csv::Error> {
    {
        let mut wtr = Writer::from_writer(&mut writer);
        for balance in engine.balances().snapshot() {
            wtr.serialize(balance)?;
        }
        wtr.flush()?;
    }

    if include_history {
        writer.write_all(b"\n")?;
        let mut wtr = Writer::from_writer(&mut writer);
        for entry in engine.history_log().snapshot() {
            wtr.serialize(entry)?;
        }
        wtr.flush()?;
    }

    Ok(())
}
