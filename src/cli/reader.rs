//! `ranged-gate reader` - read a range of records under the coordinator

use anyhow::{Context, Result};
use clap::Args;
use rand::Rng;
use ranged_gate::record::RecordFile;
use ranged_gate::{Coordinator, Outcome, RecordRange, Request};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Args)]
pub struct ReaderArgs {
    /// Record file
    #[arg(short = 'f', long, env = "RANGED_GATE_RECORDS")]
    file: PathBuf,

    /// Records to read, 1-based: `a` or `a,b`
    #[arg(short = 'l', long = "records", value_parser = super::parse_range)]
    range: RecordRange,

    /// Upper bound in seconds of the simulated work
    #[arg(short = 'd', long, default_value_t = 0)]
    max_sleep: u64,
}

pub fn run(args: ReaderArgs, region: &Path) -> Result<()> {
    let started = Instant::now();

    let file = RecordFile::open(&args.file)
        .with_context(|| format!("opening record file {}", args.file.display()))?;
    args.range.check_bounds(file.len())?;

    let coordinator = Coordinator::attach(region)
        .with_context(|| format!("attaching to region {}", region.display()))?;
    let lease = coordinator.acquire(Request::read(args.range).started_at(started))?;

    let records = file.read(&lease)?;
    let pid = std::process::id();
    {
        let mut out = io::stdout().lock();
        let mut sum = 0i64;
        for record in &records {
            writeln!(out, "[{pid}] | READER | {record}")?;
            sum += i64::from(record.balance);
        }
        writeln!(
            out,
            "[{pid}] | READER | Average of balances of records read: {:.4}",
            sum as f64 / records.len() as f64
        )?;
    }

    thread::sleep(Duration::from_secs(rand::thread_rng().gen_range(0..=args.max_sleep)));

    lease.release(Outcome::Read {
        records: records.len() as u64,
    })?;
    tracing::debug!(range = %args.range, waited = ?started.elapsed(), "reader finished");
    Ok(())
}
