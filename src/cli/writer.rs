//! `ranged-gate writer` - update one record's balance under the coordinator

use anyhow::{Context, Result};
use clap::Args;
use rand::Rng;
use ranged_gate::record::RecordFile;
use ranged_gate::{Coordinator, RecordRange, Request};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

#[derive(Args)]
pub struct WriterArgs {
    /// Record file
    #[arg(short = 'f', long, env = "RANGED_GATE_RECORDS")]
    file: PathBuf,

    /// Record to update, 1-based
    #[arg(short = 'l', long = "record", value_parser = super::parse_record_id)]
    index: u64,

    /// Amount added to the balance
    #[arg(short = 'v', long, allow_negative_numbers = true)]
    delta: i32,

    /// Upper bound in seconds of the simulated work
    #[arg(short = 'd', long, default_value_t = 0)]
    max_sleep: u64,
}

pub fn run(args: WriterArgs, region: &Path) -> Result<()> {
    let started = Instant::now();

    let file = RecordFile::open(&args.file)
        .with_context(|| format!("opening record file {}", args.file.display()))?;
    RecordRange::single(args.index).check_bounds(file.len())?;

    let coordinator = Coordinator::attach(region)
        .with_context(|| format!("attaching to region {}", region.display()))?;
    let lease = coordinator.acquire(
        Request::update(args.index, args.delta).started_at(started),
    )?;

    let update = file.update_balance(&lease, args.index, args.delta)?;
    file.flush()?;
    println!("[{}] | WRITER | {}", std::process::id(), update.record);

    thread::sleep(Duration::from_secs(rand::thread_rng().gen_range(0..=args.max_sleep)));

    lease.release(update.into())?;
    tracing::debug!(
        record = args.index + 1,
        old_balance = update.old_balance,
        new_balance = update.new_balance,
        "writer finished"
    );
    Ok(())
}
