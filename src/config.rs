//! Run configuration for a full reader/writer session
//!
//! 完整读写会话的运行配置

use crate::gate::{MAX_SLOTS, RecordRange};
use rand::Rng;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Maximum number of workers one run may spawn
///
/// 单次运行可派生的最大工作进程数
pub const MAX_WORKERS: usize = 20_000;

/// Default location of the coordination region
///
/// 协调区域的默认位置
pub fn default_region_path() -> PathBuf {
    PathBuf::from("/dev/shm/ranged-gate")
}

/// Default location of the accountant's event log
///
/// 记账进程事件日志的默认位置
pub fn default_log_path() -> PathBuf {
    PathBuf::from("log").join("events.log")
}

/// Rejected configuration values
///
/// 被拒绝的配置值
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count {requested} is outside 1..={max}")]
    Workers { requested: usize, max: usize },

    #[error("capacity {requested} is outside 1..={max}")]
    Capacity { requested: usize, max: usize },

    #[error("{what} range is empty")]
    EmptyRange { what: &'static str },
}

/// Everything the initializer needs for one run
///
/// 初始化进程单次运行所需的全部配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunConfig {
    /// Record file shared by every worker
    pub records_path: PathBuf,
    /// Number of workers to spawn
    pub workers: usize,
    /// Coordination region path
    pub region_path: PathBuf,
    /// Accountant's event log
    pub log_path: PathBuf,
    /// Participants allowed inside the coordinator at once
    pub capacity: usize,
    /// Seconds a reader may sleep while holding its range
    pub reader_sleep: RangeInclusive<u64>,
    /// Seconds a writer may sleep while holding its record
    pub writer_sleep: RangeInclusive<u64>,
    /// Balance change a writer may apply
    pub delta: RangeInclusive<i32>,
}

impl RunConfig {
    /// Defaults for everything except the record file and worker count
    ///
    /// 除记录文件与工作进程数外均使用默认值
    pub fn new(records_path: impl Into<PathBuf>, workers: usize) -> Self {
        Self {
            records_path: records_path.into(),
            workers,
            region_path: default_region_path(),
            log_path: default_log_path(),
            capacity: MAX_SLOTS,
            reader_sleep: 1..=8,
            writer_sleep: 1..=4,
            delta: -1000..=1000,
        }
    }

    /// Check every bound before any shared state is touched
    ///
    /// 在接触任何共享状态之前检查所有边界
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > MAX_WORKERS {
            return Err(ConfigError::Workers {
                requested: self.workers,
                max: MAX_WORKERS,
            });
        }
        if self.capacity == 0 || self.capacity > MAX_SLOTS {
            return Err(ConfigError::Capacity {
                requested: self.capacity,
                max: MAX_SLOTS,
            });
        }
        if self.reader_sleep.is_empty() {
            return Err(ConfigError::EmptyRange { what: "reader sleep" });
        }
        if self.writer_sleep.is_empty() {
            return Err(ConfigError::EmptyRange { what: "writer sleep" });
        }
        if self.delta.is_empty() {
            return Err(ConfigError::EmptyRange { what: "writer delta" });
        }
        Ok(())
    }

    /// Draw one worker: reader or writer with equal odds, then its parameters
    ///
    /// 抽取一个工作进程：读者或写者各占一半概率，再抽取其参数
    ///
    /// `records` must be non-zero; record files never are.
    ///
    /// `records` 必须非零；记录文件总是满足这一点。
    pub fn draw_worker(&self, rng: &mut impl Rng, records: u64) -> WorkerPlan {
        let last = records.saturating_sub(1);
        if rng.gen_bool(0.5) {
            WorkerPlan::Writer {
                index: rng.gen_range(0..=last),
                delta: rng.gen_range(self.delta.clone()),
                max_sleep: rng.gen_range(self.writer_sleep.clone()),
            }
        } else {
            let start = rng.gen_range(0..=last);
            let finish = rng.gen_range(start..=last);
            WorkerPlan::Reader {
                range: RecordRange::new(start, finish).unwrap_or(RecordRange::single(start)),
                max_sleep: rng.gen_range(self.reader_sleep.clone()),
            }
        }
    }
}

/// Parameters of one spawned worker
///
/// 一个派生工作进程的参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPlan {
    Reader {
        range: RecordRange,
        /// Upper bound in seconds of the simulated work
        max_sleep: u64,
    },
    Writer {
        index: u64,
        delta: i32,
        max_sleep: u64,
    },
}

impl WorkerPlan {
    /// Upper bound of the simulated work
    ///
    /// 模拟工作时长的上界
    pub fn max_sleep(&self) -> Duration {
        match *self {
            WorkerPlan::Reader { max_sleep, .. } | WorkerPlan::Writer { max_sleep, .. } => {
                Duration::from_secs(max_sleep)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_defaults_validate() {
        let config = RunConfig::new("accounts.bin", 100);
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.capacity, MAX_SLOTS);
        assert_eq!(config.log_path, PathBuf::from("log/events.log"));
    }

    #[test]
    fn test_worker_bounds() {
        let mut config = RunConfig::new("accounts.bin", 0);
        assert!(matches!(config.validate(), Err(ConfigError::Workers { requested: 0, .. })));
        config.workers = MAX_WORKERS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Workers { .. })));
        config.workers = MAX_WORKERS;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn test_capacity_and_ranges() {
        let mut config = RunConfig::new("accounts.bin", 1);
        config.capacity = MAX_SLOTS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Capacity { .. })));

        let mut config = RunConfig::new("accounts.bin", 1);
        config.delta = RangeInclusive::new(5, -5);
        assert_eq!(
            config.validate(),
            Err(ConfigError::EmptyRange { what: "writer delta" })
        );
    }

    #[test]
    fn test_drawn_workers_stay_in_bounds() {
        let config = RunConfig::new("accounts.bin", 1);
        let mut rng = StdRng::seed_from_u64(7);
        let (mut readers, mut writers) = (0, 0);

        for _ in 0..500 {
            match config.draw_worker(&mut rng, 10) {
                WorkerPlan::Reader { range, max_sleep } => {
                    readers += 1;
                    assert!(range.finish() < 10);
                    assert!(config.reader_sleep.contains(&max_sleep));
                }
                WorkerPlan::Writer { index, delta, max_sleep } => {
                    writers += 1;
                    assert!(index < 10);
                    assert!(config.delta.contains(&delta));
                    assert!(config.writer_sleep.contains(&max_sleep));
                }
            }
        }
        assert!(readers > 0 && writers > 0);
    }

    #[test]
    fn test_single_record_file() {
        let config = RunConfig::new("accounts.bin", 1);
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..50 {
            match config.draw_worker(&mut rng, 1) {
                WorkerPlan::Reader { range, .. } => assert_eq!(range, RecordRange::single(0)),
                WorkerPlan::Writer { index, .. } => assert_eq!(index, 0),
            }
        }
    }
}
