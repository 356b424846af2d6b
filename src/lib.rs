//! Priority-fair range reader/writer admission control across processes
//!
//! 跨进程的优先级公平范围读写准入控制
//!
//! Many independent processes read or update slices of one shared record file. This
//! library lets them do so concurrently whenever their record ranges do not conflict,
//! and serializes conflicting ones in strict arrival order, using a shared-memory region
//! and process-shared semaphores.
//!
//! 许多独立进程读取或更新同一共享记录文件的不同片段。本库基于共享内存区域与进程间共享信号量，
//! 在记录范围互不冲突时允许它们并发执行，冲突时严格按到达顺序串行化。
//!
//! # Features
//!
//! - **Range granularity**: a reader of `[1, 5]` and a writer of `[7, 7]` never wait on each other
//! - **Shared reads**: overlapping readers run together
//! - **No overtaking**: a conflicting request is never admitted ahead of an older one
//! - **Bounded occupancy**: at most `capacity` participants are inside at once
//! - **Exact logging**: an optional accountant observes every event exactly once
//!
//! # 特性
//!
//! - **范围粒度**：读取 `[1, 5]` 的读者与写入 `[7, 7]` 的写者互不等待
//! - **共享读取**：重叠的读者可以同时运行
//! - **不可超越**：冲突的请求永远不会先于更早的请求被准入
//! - **占用上限**：同时位于协调器内的参与者不超过 `capacity`
//! - **精确日志**：可选的记账进程恰好观察每个事件一次
//!
//! # Quick Start
//!
//! ```
//! use ranged_gate::record::{Record, RecordFile};
//! use ranged_gate::{Coordinator, Outcome, RecordRange, RegionConfig, Request, Result};
//! # use tempfile::tempdir;
//! # fn main() -> Result<()> {
//! # let dir = tempdir()?;
//! # let region_path = dir.path().join("gate.region");
//! # let records_path = dir.path().join("accounts.bin");
//!
//! let records: Vec<_> = (1..=10).map(|id| Record::new(id, "Doe", "Jane", 100)).collect();
//! let file = RecordFile::create(&records_path, &records)?;
//! let coordinator = Coordinator::create(&region_path, RegionConfig::default().with_capacity(4))?;
//!
//! std::thread::scope(|s| {
//!     s.spawn(|| -> Result<()> {
//!         let lease = coordinator.acquire(Request::read(RecordRange::new(0, 4)?))?;
//!         let read = file.read(&lease)?;
//!         lease.release(Outcome::Read { records: read.len() as u64 })
//!     });
//!     s.spawn(|| -> Result<()> {
//!         let lease = coordinator.acquire(Request::update(2, -30))?;
//!         let update = file.update_balance(&lease, 2, -30)?;
//!         lease.release(update.into())
//!     });
//! });
//!
//! let stats = coordinator.snapshot()?.stats;
//! assert_eq!(stats.records_processed(), 6);
//! # Ok(())
//! # }
//! ```
//!
//! # Main Types
//!
//! - [`Coordinator`]: acquire/release protocol over a shared region
//! - [`Lease`]: proof of access to a range; released explicitly or on drop
//! - [`SharedRegion`]: the mapped coordination state with attachment counting
//! - [`Accountant`]: consumer of the logging rendezvous
//! - [`record::RecordFile`]: lease-checked access to the shared record file
//! - [`config::RunConfig`]: parameters of a full run
//!
//! # 主要类型
//!
//! - [`Coordinator`][]: 基于共享区域的获取/释放协议
//! - [`Lease`][]: 范围访问凭据；显式释放或在丢弃时释放
//! - [`SharedRegion`][]: 带挂载计数的映射协调状态
//! - [`Accountant`][]: 日志会合握手的消费端
//! - [`record::RecordFile`][]: 经租约校验的共享记录文件访问
//! - [`config::RunConfig`][]: 完整运行的参数

pub mod config;
mod gate;
pub mod record;

pub use gate::*;
