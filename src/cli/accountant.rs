//! `ranged-gate accountant` - log every coordinator event until shutdown

use anyhow::{Context, Result};
use clap::Args;
use ranged_gate::config::default_log_path;
use ranged_gate::{Accountant, SharedRegion};
use std::fs::{self, OpenOptions};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

#[derive(Args)]
pub struct AccountantArgs {
    /// Event log, appended to
    #[arg(
        short = 'f',
        long,
        env = "RANGED_GATE_LOG_FILE",
        default_value_os_t = default_log_path()
    )]
    log_file: PathBuf,
}

pub fn run(args: AccountantArgs, region: &Path) -> Result<()> {
    if let Some(parent) = args.log_file.parent() {
        fs::create_dir_all(parent)?;
    }
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log_file)
        .with_context(|| format!("opening event log {}", args.log_file.display()))?;

    let region = SharedRegion::attach(region)
        .with_context(|| format!("attaching to region {}", region.display()))?;
    let logged = Accountant::new(region, BufWriter::new(log)).run()?;

    tracing::info!(events = logged, log = %args.log_file.display(), "accountant finished");
    Ok(())
}
