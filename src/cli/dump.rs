//! `ranged-gate dump` - print every record of a record file

use anyhow::{Context, Result};
use clap::Args;
use ranged_gate::record::RecordFile;
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Args)]
pub struct DumpArgs {
    /// Record file
    #[arg(env = "RANGED_GATE_RECORDS")]
    file: PathBuf,
}

pub fn run(args: DumpArgs) -> Result<()> {
    let records = RecordFile::read_all(&args.file)
        .with_context(|| format!("reading record file {}", args.file.display()))?;

    let mut out = io::stdout().lock();
    writeln!(out, "Records found in file {}", records.len())?;
    for record in &records {
        writeln!(out, "{record}")?;
    }
    Ok(())
}
