//! Command-line surface of the `ranged-gate` binary

mod accountant;
mod dump;
mod init;
mod logger;
mod reader;
mod writer;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ranged_gate::RecordRange;
use ranged_gate::config::default_region_path;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "ranged-gate",
    version,
    about = "Range-based reader/writer coordination over a shared record file"
)]
pub struct Cli {
    /// Coordination region path
    #[arg(
        short = 's',
        long,
        global = true,
        env = "RANGED_GATE_REGION",
        default_value_os_t = default_region_path()
    )]
    region: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a whole session: accountant, random workers, summary
    Init(init::InitArgs),
    /// Read a range of records under the coordinator
    Reader(reader::ReaderArgs),
    /// Update one record's balance under the coordinator
    Writer(writer::WriterArgs),
    /// Log every coordinator event until shutdown
    Accountant(accountant::AccountantArgs),
    /// Print a snapshot of the coordinator
    Logger,
    /// Print every record of a record file
    Dump(dump::DumpArgs),
}

impl Cli {
    pub fn run(self) -> Result<()> {
        match self.command {
            Command::Init(args) => init::run(args, self.region),
            Command::Reader(args) => reader::run(args, &self.region),
            Command::Writer(args) => writer::run(args, &self.region),
            Command::Accountant(args) => accountant::run(args, &self.region),
            Command::Logger => logger::run(&self.region),
            Command::Dump(args) => dump::run(args),
        }
    }
}

/// Diagnostics go to stderr; stdout carries the workers' record output
pub fn init_logging() {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_env("RANGED_GATE_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// 1-based `a` or `a,b` to a 0-based range
fn parse_range(text: &str) -> Result<RecordRange, String> {
    let (first, last) = match text.split_once(',') {
        Some((first, last)) => (parse_record_id(first.trim())?, parse_record_id(last.trim())?),
        None => {
            let id = parse_record_id(text.trim())?;
            (id, id)
        }
    };
    RecordRange::new(first, last).map_err(|err| err.to_string())
}

/// 1-based record id to a 0-based index
fn parse_record_id(text: &str) -> Result<u64, String> {
    match text.parse::<u64>() {
        Ok(0) => Err("record ids start at 1".to_owned()),
        Ok(id) => Ok(id - 1),
        Err(err) => Err(format!("invalid record id {text:?}: {err}")),
    }
}

/// 0-based range back to its 1-based command-line form
fn format_range(range: RecordRange) -> String {
    let (first, last) = range.ids();
    if first == last {
        first.to_string()
    } else {
        format!("{first},{last}")
    }
}
