//! Coordinator: the acquire/release protocol over a shared region
//!
//! 协调器：基于共享区域的获取/释放协议

use super::admission::AdmissionGate;
use super::error::{Error, Result};
use super::range::{Claim, RecordRange, Role};
use super::region::{RegionConfig, SharedRegion};
use super::registry::{Event, Outcome, Snapshot, now_micros};
use super::rendezvous;
use super::resolver;
use super::slots::{Registration, TableState};
use std::path::Path;
use std::time::{Duration, Instant};

/// A participant's request to enter the coordinator
///
/// 参与者进入协调器的请求
///
/// # Examples
///
/// ```
/// use ranged_gate::{RecordRange, Request, Role};
///
/// let read = Request::read(RecordRange::new(0, 4).unwrap()).with_owner(7);
/// assert_eq!(read.claim().role, Role::Reader);
/// assert_eq!(read.owner(), 7);
///
/// let update = Request::update(3, -250);
/// assert_eq!(update.claim().range, RecordRange::single(3));
/// assert_eq!(update.delta(), Some(-250));
/// ```
#[derive(Debug, Clone, Copy)]
pub struct Request {
    owner: u32,
    claim: Claim,
    delta: Option<i32>,
    started: Instant,
}

impl Request {
    fn new(role: Role, range: RecordRange) -> Self {
        Self {
            owner: std::process::id(),
            claim: Claim::new(role, range),
            delta: None,
            started: Instant::now(),
        }
    }

    /// Shared access to `range`
    ///
    /// 对 `range` 的共享访问
    pub fn read(range: RecordRange) -> Self {
        Self::new(Role::Reader, range)
    }

    /// Exclusive access to `range`
    ///
    /// 对 `range` 的独占访问
    pub fn write(range: RecordRange) -> Self {
        Self::new(Role::Writer, range)
    }

    /// Exclusive access to the single record `index`, announcing the balance change
    ///
    /// 对单条记录 `index` 的独占访问，并声明余额变化
    pub fn update(index: u64, delta: i32) -> Self {
        Self::write(RecordRange::single(index)).with_delta(delta)
    }

    /// Owner id shown in events and snapshots; defaults to the process id
    ///
    /// 事件与快照中显示的所有者 id；默认为进程 id
    pub fn with_owner(mut self, owner: u32) -> Self {
        self.owner = owner;
        self
    }

    pub fn with_delta(mut self, delta: i32) -> Self {
        self.delta = Some(delta);
        self
    }

    /// When the participant started; active and waiting time are measured from here
    ///
    /// 参与者的开始时间；活跃时间和等待时间都从此刻起计算
    pub fn started_at(mut self, started: Instant) -> Self {
        self.started = started;
        self
    }

    #[inline]
    pub fn owner(&self) -> u32 {
        self.owner
    }

    #[inline]
    pub fn claim(&self) -> Claim {
        self.claim
    }

    #[inline]
    pub fn delta(&self) -> Option<i32> {
        self.delta
    }
}

/// Range-based reader/writer admission controller
///
/// 基于范围的读写准入控制器
///
/// # Protocol
///
/// [`acquire`](Self::acquire):
/// 1. take an admission permit (blocks while the table is at capacity)
/// 2. under the table lock: register a slot, count older conflicting occupants, report `ENTERED`
/// 3. if the count is non-zero, sleep on the slot's wake semaphore
///
/// [`Lease::release`]:
/// 1. under the table lock: decrement every younger conflicting occupant and wake those
///    reaching zero, free the slot, update the statistics, report `EXITED`
/// 2. return the admission permit
///
/// # 协议
///
/// [`acquire`](Self::acquire)：
/// 1. 获取准入许可（槽位表已满时阻塞）
/// 2. 在表锁下：注册槽位，统计更早的冲突占用者，报告 `ENTERED`
/// 3. 若计数非零，则在槽位的唤醒信号量上休眠
///
/// [`Lease::release`]：
/// 1. 在表锁下：将每个更晚的冲突占用者计数减一并唤醒归零者，释放槽位，更新统计，报告 `EXITED`
/// 2. 归还准入许可
///
/// # Examples
///
/// ```
/// use ranged_gate::{Coordinator, Outcome, RecordRange, RegionConfig, Request};
/// # use tempfile::tempdir;
/// # fn main() -> ranged_gate::Result<()> {
/// # let dir = tempdir()?;
/// # let path = dir.path().join("doc.region");
/// let coordinator = Coordinator::create(&path, RegionConfig::default().with_capacity(4))?;
///
/// let a = coordinator.acquire(Request::read(RecordRange::new(0, 4)?))?;
/// let b = coordinator.acquire(Request::read(RecordRange::new(2, 8)?))?;
/// // overlapping readers are admitted together
/// assert_eq!(coordinator.snapshot()?.occupancy(), 2);
///
/// a.release(Outcome::Read { records: 5 })?;
/// b.release(Outcome::Read { records: 7 })?;
/// assert_eq!(coordinator.snapshot()?.stats.records_processed(), 12);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Coordinator {
    region: SharedRegion,
}

impl Coordinator {
    pub fn new(region: SharedRegion) -> Self {
        Self { region }
    }

    /// Create a fresh region at `path` and coordinate through it
    ///
    /// 在 `path` 创建新区域并通过它进行协调
    pub fn create(path: impl AsRef<Path>, config: RegionConfig) -> Result<Self> {
        SharedRegion::create(path, config).map(Self::new)
    }

    /// Attach to the region at `path`
    ///
    /// 挂载 `path` 上的区域
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        SharedRegion::attach(path).map(Self::new)
    }

    #[inline]
    pub fn region(&self) -> &SharedRegion {
        &self.region
    }

    #[inline]
    pub fn into_region(self) -> SharedRegion {
        self.region
    }

    /// Block until `request` may run, returning the lease that holds its access
    ///
    /// 阻塞直到 `request` 可以运行，返回持有其访问权的租约
    ///
    /// Non-conflicting requests never wait on each other; a conflicting request waits
    /// for every older participant it conflicts with and is never overtaken by a
    /// younger one.
    ///
    /// 互不冲突的请求不会互相等待；冲突的请求会等待所有与其冲突的更早参与者，
    /// 且永远不会被更晚的参与者超越。
    pub fn acquire(&self, request: Request) -> Result<Lease<'_>> {
        let layout = self.region.layout();
        let gate = AdmissionGate::new(layout);
        gate.enter()?;

        let (registration, pending) = match self.register(&request) {
            Ok(entered) => entered,
            Err(err) => {
                gate.leave()?;
                return Err(err);
            }
        };

        tracing::debug!(
            owner = request.owner,
            claim = %request.claim,
            slot = registration.index,
            priority = registration.priority,
            pending,
            "entered coordinator"
        );

        if pending > 0 {
            if let Err(err) = layout.wake[registration.index].wait() {
                self.abort(registration.index);
                return Err(err.into());
            }
            tracing::debug!(owner = request.owner, slot = registration.index, "woken");
        }
        let waited = request.started.elapsed();

        Ok(Lease {
            coordinator: self,
            request,
            slot: registration.index,
            priority: registration.priority,
            blocked_on: pending,
            waited,
            released: false,
        })
    }

    /// Register, count older conflicts and report; a failure after registration
    /// withdraws the slot before the lock is given up
    fn register(&self, request: &Request) -> Result<(Registration, u32)> {
        let mut table = self.region.layout().table.lock()?;
        let registration = table.register(request.owner, request.claim, now_micros())?;

        let announced = resolver::admit(&mut table, registration.index).and_then(|pending| {
            let event = Event::Entered {
                owner: request.owner,
                claim: request.claim,
                delta: request.delta,
            };
            rendezvous::report(&self.region, &mut table, &event)?;
            Ok(pending)
        });
        match announced {
            Ok(pending) => Ok((registration, pending)),
            Err(err) => {
                if let Err(rollback) = self.withdraw(&mut table, registration.index) {
                    tracing::error!(error = %rollback, slot = registration.index, "failed to withdraw slot");
                }
                Err(err)
            }
        }
    }

    /// Give up a registered slot that never got a lease, returning its permit
    fn abort(&self, slot: usize) {
        let layout = self.region.layout();
        let withdrawn = layout
            .table
            .lock()
            .map_err(Error::from)
            .and_then(|mut table| self.withdraw(&mut table, slot));
        if let Err(err) = withdrawn {
            tracing::error!(error = %err, slot, "failed to withdraw slot");
        }
        if let Err(err) = AdmissionGate::new(layout).leave() {
            tracing::error!(error = %err, slot, "failed to return admission permit");
        }
    }

    /// Undo a registration under the table lock
    ///
    /// Younger conflicting occupants counted this slot on entry and are released as if
    /// it had run. A wake already posted to the slot is taken back so the next occupant
    /// of the slot does not inherit it.
    fn withdraw(&self, table: &mut TableState, slot: usize) -> Result<()> {
        let layout = self.region.layout();
        let woken = resolver::withdraw(table, slot)?;
        for index in woken.iter() {
            layout.wake[index].post()?;
        }
        let freed = table.unregister(slot)?;
        if freed.pending == 0 {
            layout.wake[slot].try_wait()?;
        }
        tracing::warn!(owner = freed.owner, slot, "withdrew registration");
        Ok(())
    }

    fn release(&self, slot: usize, request: &Request, waited: Duration, outcome: Outcome) -> Result<()> {
        let layout = self.region.layout();
        {
            let mut table = layout.table.lock()?;
            let woken = resolver::depart(&mut table, slot)?;
            for index in woken.iter() {
                layout.wake[index].post()?;
                tracing::trace!(slot = index, "posted wake");
            }
            table.unregister(slot)?;

            table.registry.record_exit(
                request.claim.role,
                outcome.records(),
                request.started.elapsed(),
                waited,
            );
            let event = Event::Exited {
                owner: request.owner,
                claim: request.claim,
                outcome,
            };
            rendezvous::report(&self.region, &mut table, &event)?;
        }
        AdmissionGate::new(layout).leave()?;

        tracing::debug!(
            owner = request.owner,
            claim = %request.claim,
            slot,
            ?outcome,
            "left coordinator"
        );
        Ok(())
    }

    /// Consistent copy of the table and registry, taken under the table lock
    ///
    /// 在表锁下获取的槽位表与登记簿一致副本
    pub fn snapshot(&self) -> Result<Snapshot> {
        let table = self.region.layout().table.lock()?;
        Ok(Snapshot::capture(&table))
    }

    /// Admission permits free at this instant
    ///
    /// 此刻空闲的准入许可数
    pub fn admission_available(&self) -> Result<usize> {
        AdmissionGate::new(self.region.layout()).available()
    }
}

/// Access granted by [`Coordinator::acquire`]
///
/// 由 [`Coordinator::acquire`] 授予的访问权
///
/// Released explicitly with [`release`](Self::release); a lease that is dropped instead
/// is released with [`Outcome::Abandoned`] so waiters behind it still make progress.
///
/// 通过 [`release`](Self::release) 显式释放；若租约被直接丢弃，则以 [`Outcome::Abandoned`]
/// 释放，排在其后的等待者仍能继续。
#[must_use = "dropping a lease releases it immediately"]
#[derive(Debug)]
pub struct Lease<'a> {
    coordinator: &'a Coordinator,
    request: Request,
    slot: usize,
    priority: i64,
    blocked_on: u32,
    waited: Duration,
    released: bool,
}

impl Lease<'_> {
    #[inline]
    pub fn claim(&self) -> Claim {
        self.request.claim
    }

    #[inline]
    pub fn range(&self) -> RecordRange {
        self.request.claim.range
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.request.claim.role
    }

    #[inline]
    pub fn owner(&self) -> u32 {
        self.request.owner
    }

    /// Ticket drawn at registration; larger is older
    ///
    /// 注册时分配的票号；越大越早
    #[inline]
    pub fn priority(&self) -> i64 {
        self.priority
    }

    #[inline]
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Older conflicting participants this lease had to wait for
    ///
    /// 此租约需要等待的更早冲突参与者数
    #[inline]
    pub fn blocked_on(&self) -> u32 {
        self.blocked_on
    }

    /// Time from the request's start until access was granted
    ///
    /// 从请求开始到获得访问权的时间
    #[inline]
    pub fn waited(&self) -> Duration {
        self.waited
    }

    /// Leave the critical section, recording how it went
    ///
    /// 离开临界区，并记录结果
    ///
    /// `outcome` must fit the lease: `Read` from a reader for at most the records of its
    /// range, `Wrote` from a writer. A lease released with anything else still leaves,
    /// as [`Outcome::Abandoned`], and the mismatch is returned.
    ///
    /// `outcome` 必须与租约相符：`Read` 来自读者且记录数不超过其范围，`Wrote` 来自写者。
    /// 不相符的租约仍会以 [`Outcome::Abandoned`] 离开，并返回不匹配错误。
    pub fn release(mut self, outcome: Outcome) -> Result<()> {
        self.released = true;
        let fits = match outcome {
            Outcome::Read { records } => self.role() == Role::Reader && records <= self.range().len(),
            Outcome::Wrote { .. } => self.role() == Role::Writer,
            Outcome::Abandoned => true,
        };
        if !fits {
            self.coordinator
                .release(self.slot, &self.request, self.waited, Outcome::Abandoned)?;
            return Err(Error::LeaseMismatch {
                held: self.claim().to_string(),
                wanted: format!("{outcome:?}"),
            });
        }
        self.coordinator
            .release(self.slot, &self.request, self.waited, outcome)
    }
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        tracing::warn!(owner = self.request.owner, slot = self.slot, "lease dropped without release");
        if let Err(err) =
            self.coordinator
                .release(self.slot, &self.request, self.waited, Outcome::Abandoned)
        {
            tracing::error!(error = %err, slot = self.slot, "failed to release abandoned lease");
        }
    }
}
