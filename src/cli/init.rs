//! `ranged-gate init` - run a whole session of random readers and writers

use anyhow::{Context, Result};
use clap::Args;
use ranged_gate::config::{RunConfig, WorkerPlan, default_log_path};
use ranged_gate::record::RecordFile;
use ranged_gate::{Coordinator, Error, MAX_SLOTS, RegionConfig, SharedRegion};
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::process::{Child, Command};

#[derive(Args)]
pub struct InitArgs {
    /// Record file shared by every worker
    #[arg(short = 'f', long, env = "RANGED_GATE_RECORDS")]
    file: PathBuf,

    /// Number of workers to spawn
    #[arg(short = 'n', long, env = "RANGED_GATE_WORKERS")]
    workers: usize,

    /// Accountant's event log
    #[arg(long, env = "RANGED_GATE_LOG_FILE", default_value_os_t = default_log_path())]
    log_file: PathBuf,

    /// Participants allowed inside the coordinator at once
    #[arg(long, env = "RANGED_GATE_CAPACITY", default_value_t = MAX_SLOTS)]
    capacity: usize,

    /// Longest simulated work of a reader, in seconds
    #[arg(long, env = "RANGED_GATE_READER_SLEEP", default_value_t = 8)]
    reader_sleep: u64,

    /// Longest simulated work of a writer, in seconds
    #[arg(long, env = "RANGED_GATE_WRITER_SLEEP", default_value_t = 4)]
    writer_sleep: u64,

    /// Largest balance change a writer applies, either way
    #[arg(long, env = "RANGED_GATE_MAX_DELTA", default_value_t = 1000)]
    max_delta: i32,
}

impl InitArgs {
    fn into_config(self, region: PathBuf) -> RunConfig {
        let mut config = RunConfig::new(self.file, self.workers);
        config.region_path = region;
        config.log_path = self.log_file;
        config.capacity = self.capacity;
        config.reader_sleep = sleep_bounds(self.reader_sleep);
        config.writer_sleep = sleep_bounds(self.writer_sleep);
        let max_delta = self.max_delta.saturating_abs();
        config.delta = -max_delta..=max_delta;
        config
    }
}

fn sleep_bounds(max: u64) -> RangeInclusive<u64> {
    max.min(1)..=max
}

pub fn run(args: InitArgs, region: PathBuf) -> Result<()> {
    let config = args.into_config(region);
    config.validate()?;

    let records = RecordFile::count_records(&config.records_path)
        .with_context(|| format!("counting records in {}", config.records_path.display()))?;
    if let Some(parent) = config.log_path.parent() {
        fs::create_dir_all(parent)?;
    }

    let region = SharedRegion::create(
        &config.region_path,
        RegionConfig::default()
            .with_capacity(config.capacity)
            .with_participants(config.workers as u64)
            .with_accountant(true),
    )
    .with_context(|| format!("creating region {}", config.region_path.display()))?;
    tracing::info!(
        records,
        workers = config.workers,
        capacity = config.capacity,
        region = %config.region_path.display(),
        "session started"
    );

    let (region, outcome) = session(region, &config, records);
    match region.destroy() {
        Ok(()) => {}
        Err(in_use) => {
            tracing::warn!(
                attached = in_use.attached,
                region = %config.region_path.display(),
                "region left behind, remove it before the next run"
            );
            if outcome.is_ok() {
                return Err(Error::from(in_use).into());
            }
        }
    }
    outcome
}

/// Spawn, wait, summarize; always hands the region back for teardown
fn session(region: SharedRegion, config: &RunConfig, records: u64) -> (SharedRegion, Result<()>) {
    let coordinator = Coordinator::new(region);
    let outcome = drive(&coordinator, config, records);
    (coordinator.into_region(), outcome)
}

fn drive(coordinator: &Coordinator, config: &RunConfig, records: u64) -> Result<()> {
    let exe = std::env::current_exe()?;

    let mut accountant = base_command(&exe, config)
        .arg("accountant")
        .arg("--log-file")
        .arg(&config.log_path)
        .spawn()
        .context("spawning accountant")?;

    let mut rng = rand::thread_rng();
    let commands = (0..config.workers).map(|_| {
        let plan = config.draw_worker(&mut rng, records);
        tracing::trace!(?plan, "spawning worker");
        worker_command(&exe, config, plan)
    });
    let (workers, spawned) = spawn_all(commands);

    // Workers report through the accountant, so it must outlive every one of them
    let waited = wait_all(workers);
    let checked = check_tickets(coordinator);
    let stopped = stop_accountant(coordinator, &mut accountant);

    spawned.context("spawning worker")?;
    let failed = waited?;
    if failed > 0 {
        tracing::warn!(failed, "workers exited with failure");
    }
    checked?;
    stopped?;

    println!("\n\nWorkers finished execution! Printing last stats...\n");
    print!("{}", coordinator.snapshot()?.stats);
    Ok(())
}

/// Spawn until the first failure, handing back every child started so far
fn spawn_all(commands: impl IntoIterator<Item = Command>) -> (Vec<Child>, std::io::Result<()>) {
    let mut children = Vec::new();
    for mut command in commands {
        match command.spawn() {
            Ok(child) => children.push(child),
            Err(err) => return (children, Err(err)),
        }
    }
    (children, Ok(()))
}

/// Wait for every child, even after one wait fails; returns how many failed
fn wait_all(children: Vec<Child>) -> Result<usize> {
    let mut failed = 0;
    let mut first_error = None;
    for mut child in children {
        match child.wait() {
            Ok(status) if status.success() => {}
            Ok(_) => failed += 1,
            Err(err) => {
                tracing::error!(error = %err, pid = child.id(), "failed to wait for worker");
                first_error.get_or_insert(err);
            }
        }
    }
    match first_error {
        Some(err) => Err(err.into()),
        None => Ok(failed),
    }
}

fn check_tickets(coordinator: &Coordinator) -> Result<()> {
    let snapshot = coordinator.snapshot()?;
    if snapshot.next_priority != 0 {
        tracing::warn!(
            next_priority = snapshot.next_priority,
            "not every priority ticket was used"
        );
    }
    Ok(())
}

/// Ask the accountant to finish and reap it; killed if it cannot be asked
fn stop_accountant(coordinator: &Coordinator, accountant: &mut Child) -> Result<()> {
    if let Err(err) = coordinator.region().request_shutdown() {
        tracing::error!(error = %err, "failed to request shutdown, killing accountant");
        let _ = accountant.kill();
        accountant.wait()?;
        return Err(err.into());
    }
    let status = accountant.wait()?;
    if !status.success() {
        tracing::warn!(%status, "accountant exited with failure");
    }
    Ok(())
}

fn base_command(exe: &Path, config: &RunConfig) -> Command {
    let mut command = Command::new(exe);
    command.arg("--region").arg(&config.region_path);
    command
}

fn worker_command(exe: &Path, config: &RunConfig, plan: WorkerPlan) -> Command {
    let mut command = base_command(exe, config);
    match plan {
        WorkerPlan::Reader { range, max_sleep } => {
            command
                .arg("reader")
                .arg("-f")
                .arg(&config.records_path)
                .arg("-l")
                .arg(super::format_range(range))
                .arg("-d")
                .arg(max_sleep.to_string());
        }
        WorkerPlan::Writer {
            index,
            delta,
            max_sleep,
        } => {
            command
                .arg("writer")
                .arg("-f")
                .arg(&config.records_path)
                .arg("-l")
                .arg((index + 1).to_string())
                .arg(format!("--delta={delta}"))
                .arg("-d")
                .arg(max_sleep.to_string());
        }
    }
    command
}

#[cfg(test)]
mod tests {
    use super::*;
    use ranged_gate::RecordRange;

    #[test]
    fn test_sleep_bounds() {
        assert_eq!(sleep_bounds(8), 1..=8);
        assert_eq!(sleep_bounds(0), 0..=0);
    }

    fn shell(script: &str) -> Command {
        let mut command = Command::new("sh");
        command.arg("-c").arg(script);
        command
    }

    #[test]
    fn test_spawn_failure_keeps_started_children() {
        let commands = vec![
            shell("sleep 0.2"),
            Command::new("/nonexistent/ranged-gate-worker"),
            shell("exit 0"),
        ];
        let (children, spawned) = spawn_all(commands);
        assert!(spawned.is_err());
        // 失败之前已启动的子进程交还给调用者等待
        assert_eq!(children.len(), 1);
        assert_eq!(wait_all(children).unwrap(), 0);
    }

    #[test]
    fn test_wait_all_counts_failures_after_waiting_everyone() {
        let (children, spawned) = spawn_all(vec![shell("exit 3"), shell("sleep 0.1"), shell("exit 0")]);
        spawned.unwrap();
        assert_eq!(children.len(), 3);
        assert_eq!(wait_all(children).unwrap(), 1);
    }

    #[test]
    fn test_worker_arguments_are_one_based() {
        let config = RunConfig::new("accounts.bin", 2);
        let exe = Path::new("ranged-gate");

        let reader = worker_command(
            exe,
            &config,
            WorkerPlan::Reader {
                range: RecordRange::new(0, 4).unwrap(),
                max_sleep: 3,
            },
        );
        let args: Vec<_> = reader.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["--region", "/dev/shm/ranged-gate", "reader", "-f", "accounts.bin", "-l", "1,5", "-d", "3"]
        );

        let writer = worker_command(
            exe,
            &config,
            WorkerPlan::Writer {
                index: 2,
                delta: -40,
                max_sleep: 1,
            },
        );
        let args: Vec<_> = writer.get_args().map(|a| a.to_string_lossy().into_owned()).collect();
        assert_eq!(
            args,
            ["--region", "/dev/shm/ranged-gate", "writer", "-f", "accounts.bin", "-l", "3", "--delta=-40", "-d", "1"]
        );
    }
}
