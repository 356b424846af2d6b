//! `ranged-gate logger` - print a snapshot of the coordinator

use anyhow::{Context, Result};
use ranged_gate::Coordinator;
use std::path::Path;

pub fn run(region: &Path) -> Result<()> {
    let coordinator = Coordinator::attach(region)
        .with_context(|| format!("attaching to region {}", region.display()))?;
    print!("{}", coordinator.snapshot()?);
    Ok(())
}
