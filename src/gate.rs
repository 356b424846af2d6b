//! Range-based reader/writer admission control over a shared region
//!
//! 基于共享区域的范围读写准入控制
//!
//! Participants (threads or processes) ask to read or write an inclusive range of
//! records. The coordinator lets them proceed concurrently whenever their ranges do not
//! conflict, and serializes conflicting ones strictly in arrival order.
//!
//! 参与者（线程或进程）请求读取或写入一个闭区间的记录。只要范围互不冲突，协调器就允许它们并发执行；
//! 冲突的请求严格按照到达顺序串行化。
//!
//! # Components
//!
//! - [`SharedRegion`]: the file-backed shared mapping all participants attach to
//! - [`Coordinator`]: acquire/release protocol; hands out [`Lease`]s
//! - [`Accountant`]: consumes every event through the logging rendezvous
//! - [`Snapshot`]: consistent view of the slot table and the aggregate [`Stats`]
//!
//! # 组件
//!
//! - [`SharedRegion`][]: 所有参与者挂载的基于文件的共享映射
//! - [`Coordinator`][]: 获取/释放协议；发放 [`Lease`]
//! - [`Accountant`][]: 通过日志会合握手消费每个事件
//! - [`Snapshot`][]: 槽位表与汇总 [`Stats`] 的一致视图
//!
//! # Conflict Rule
//!
//! Two claims conflict when their ranges overlap and at least one of them writes.
//!
//! | first \ second | reader | writer |
//! |----------------|--------|--------|
//! | reader         | shared | wait   |
//! | writer         | wait   | wait   |
//!
//! # 冲突规则
//!
//! 两个请求的范围重叠且至少一方为写者时即冲突。
//!
//! ```
//! # use ranged_gate::{Coordinator, Outcome, RecordRange, RegionConfig, Request, Result};
//! # use tempfile::tempdir;
//! # fn main() -> Result<()> {
//! # let dir = tempdir()?;
//! # let path = dir.path().join("module.region");
//! let coordinator = Coordinator::create(&path, RegionConfig::default())?;
//!
//! // Writers on disjoint records run side by side
//! // 不相交记录上的写者可以并行
//! let a = coordinator.acquire(Request::update(0, 10))?;
//! let b = coordinator.acquire(Request::update(1, -10))?;
//! assert_eq!(a.blocked_on() + b.blocked_on(), 0);
//!
//! a.release(Outcome::Wrote { old_balance: 0, new_balance: 10 })?;
//! b.release(Outcome::Wrote { old_balance: 0, new_balance: -10 })?;
//! # Ok(())
//! # }
//! ```

mod admission;
mod coordinator;
mod error;
mod range;
mod region;
mod registry;
mod rendezvous;
mod resolver;
mod slots;
mod sync;


// Re-export public API
// 重新导出公共 API
pub use coordinator::{Coordinator, Lease, Request};
pub use error::{Error, Result};
pub use range::{Claim, RecordRange, Role};
pub use region::{InUse, LAYOUT_VERSION, REGION_SIZE, RegionConfig, SharedRegion};
pub use registry::{MESSAGE_LEN, Outcome, SlotView, Snapshot, Stats};
pub use rendezvous::Accountant;
pub use slots::MAX_SLOTS;
