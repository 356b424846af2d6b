//! Memory-mapped record file with lease-checked access
//!
//! 基于内存映射、经租约校验访问的记录文件

use super::layout::{RECORD_SIZE, Record};
use crate::gate::{Error, Lease, Outcome, RecordRange, Result, Role};
use memmap2::MmapMut;
use std::cell::UnsafeCell;
use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Arc;

/// Shared record file
///
/// 共享记录文件
///
/// Every access takes the [`Lease`] that grants it. A lease proves that no conflicting
/// participant of the same coordinator is inside its critical section, so reads never
/// observe a half-written record and writes never overlap. Each process maps the file
/// `MAP_SHARED`, so updates are visible to every other participant.
///
/// 每次访问都需要传入授予它的 [`Lease`]。租约证明同一协调器中不存在处于临界区的冲突参与者，
/// 因此读取不会看到写了一半的记录，写入也不会重叠。每个进程以 `MAP_SHARED` 映射文件，
/// 更新对所有其他参与者可见。
///
/// # Limitations
///
/// - The file length is fixed when it is opened
/// - Leases from a coordinator that does not guard this file prove nothing
///
/// # 限制
///
/// - 文件长度在打开时即固定
/// - 来自不保护此文件的协调器的租约不提供任何保证
///
/// # Examples
///
/// ```
/// use ranged_gate::record::{Record, RecordFile};
/// use ranged_gate::{Coordinator, RegionConfig, Request};
/// # use tempfile::tempdir;
/// # fn main() -> ranged_gate::Result<()> {
/// # let dir = tempdir()?;
/// let records: Vec<_> = (1..=4).map(|id| Record::new(id, "Doe", "Jane", 100)).collect();
/// let file = RecordFile::create(dir.path().join("accounts.bin"), &records)?;
/// let coordinator = Coordinator::create(dir.path().join("gate.region"), RegionConfig::default())?;
///
/// let lease = coordinator.acquire(Request::update(2, 50))?;
/// let update = file.update_balance(&lease, 2, 50)?;
/// assert_eq!(update.record.balance, 150);
/// lease.release(update.into())?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RecordFile {
    /// # Safety
    /// Byte ranges are only touched under a lease that excludes conflicting access
    ///
    /// # Safety
    /// 字节范围仅在排除冲突访问的租约下被访问
    mmap: Arc<UnsafeCell<MmapMut>>,

    records: u64,
}

/// Result of a balance update
///
/// 余额更新的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceUpdate {
    /// The record as written back
    ///
    /// 写回后的记录
    pub record: Record,
    pub old_balance: i32,
    pub new_balance: i32,
}

impl From<BalanceUpdate> for Outcome {
    fn from(update: BalanceUpdate) -> Self {
        Outcome::Wrote {
            old_balance: update.old_balance,
            new_balance: update.new_balance,
        }
    }
}

impl RecordFile {
    /// Create (or truncate) a record file holding `records`
    ///
    /// 创建（或截断）包含 `records` 的记录文件
    pub fn create(path: impl AsRef<Path>, records: &[Record]) -> Result<Self> {
        if records.is_empty() {
            return Err(Error::MalformedRecordFile {
                len: 0,
                record_size: RECORD_SIZE,
            });
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())?;
        file.set_len((records.len() * RECORD_SIZE) as u64)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        for (chunk, record) in mmap.chunks_exact_mut(RECORD_SIZE).zip(records) {
            chunk.copy_from_slice(&record.encode());
        }
        mmap.flush()?;

        Ok(Self {
            #[allow(clippy::arc_with_non_send_sync)]
            mmap: Arc::new(UnsafeCell::new(mmap)),
            records: records.len() as u64,
        })
    }

    /// Map an existing record file
    ///
    /// 映射已存在的记录文件
    ///
    /// # Errors
    /// Returns [`Error::MalformedRecordFile`] for an empty file or one that does not
    /// hold a whole number of records.
    ///
    /// # Errors
    /// 文件为空或不包含整数条记录时返回 [`Error::MalformedRecordFile`]。
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path.as_ref())?;
        let len = file.metadata()?.len();
        let records = whole_records(len)?;

        let mmap = unsafe { MmapMut::map_mut(&file)? };

        Ok(Self {
            #[allow(clippy::arc_with_non_send_sync)]
            mmap: Arc::new(UnsafeCell::new(mmap)),
            records,
        })
    }

    /// Number of records in the file at `path`, without mapping it
    ///
    /// 不映射文件，直接统计 `path` 上文件的记录数
    pub fn count_records(path: impl AsRef<Path>) -> Result<u64> {
        whole_records(fs::metadata(path.as_ref())?.len())
    }

    /// Read every record of the file at `path` with plain I/O
    ///
    /// 使用普通 I/O 读取 `path` 上文件的全部记录
    ///
    /// Takes no lease; meant for inspecting a file while no run is in progress.
    ///
    /// 不需要租约；用于在没有运行进行时检查文件。
    pub fn read_all(path: impl AsRef<Path>) -> Result<Vec<Record>> {
        let bytes = fs::read(path.as_ref())?;
        whole_records(bytes.len() as u64)?;
        Ok(bytes
            .chunks_exact(RECORD_SIZE)
            .map(|chunk| {
                let mut buf = [0u8; RECORD_SIZE];
                buf.copy_from_slice(chunk);
                Record::decode(&buf)
            })
            .collect())
    }

    /// Number of records
    ///
    /// 记录数
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        self.records
    }

    /// Read every record of the lease's range
    ///
    /// 读取租约范围内的全部记录
    pub fn read(&self, lease: &Lease<'_>) -> Result<Vec<Record>> {
        self.read_range(lease, lease.range())
    }

    /// Read `range`, which must lie inside the lease's range
    ///
    /// 读取 `range`，其必须位于租约范围之内
    ///
    /// Readers and writers may both read what their lease covers.
    ///
    /// 读者和写者都可以读取其租约覆盖的内容。
    pub fn read_range(&self, lease: &Lease<'_>, range: RecordRange) -> Result<Vec<Record>> {
        if !lease.range().covers(&range) {
            return Err(Error::LeaseMismatch {
                held: lease.claim().to_string(),
                wanted: format!("{} {}", Role::Reader, range),
            });
        }
        range.check_bounds(self.records)?;

        // Safety: the lease excludes writers on `range`, and the range is in bounds
        // Safety: 租约排除了 `range` 上的写者，且范围未越界
        Ok(range
            .as_range()
            .map(|index| unsafe { self.load(index) })
            .collect())
    }

    /// Add `delta` to the balance of record `index` and write it back
    ///
    /// 将 `delta` 加到记录 `index` 的余额上并写回
    ///
    /// The lease must be a writer's and cover `index`. The balance saturates at the
    /// bounds of `i32`.
    ///
    /// 租约必须属于写者且覆盖 `index`。余额在 `i32` 边界处饱和。
    pub fn update_balance(&self, lease: &Lease<'_>, index: u64, delta: i32) -> Result<BalanceUpdate> {
        if lease.role() != Role::Writer || !lease.range().contains(index) {
            return Err(Error::LeaseMismatch {
                held: lease.claim().to_string(),
                wanted: format!("{} {}", Role::Writer, RecordRange::single(index)),
            });
        }
        RecordRange::single(index).check_bounds(self.records)?;

        // Safety: a writer lease excludes every other participant on `index`
        // Safety: 写者租约排除了 `index` 上的所有其他参与者
        let mut record = unsafe { self.load(index) };
        let old_balance = record.balance;
        record.balance = old_balance.saturating_add(delta);
        unsafe { self.store(index, &record) };

        Ok(BalanceUpdate {
            record,
            old_balance,
            new_balance: record.balance,
        })
    }

    /// Asynchronously flush changes to disk
    ///
    /// 异步刷新更改到磁盘
    pub fn flush(&self) -> Result<()> {
        // Safety: msync does not touch the mapped bytes
        // Safety: msync 不会修改映射的字节
        unsafe { (*self.mmap.get()).flush_async()? };
        Ok(())
    }

    /// Synchronously flush changes to disk
    ///
    /// 同步刷新更改到磁盘
    pub fn sync_all(&self) -> Result<()> {
        unsafe { (*self.mmap.get()).flush()? };
        Ok(())
    }

    #[inline]
    fn as_mut_ptr(&self) -> *mut u8 {
        unsafe { (*self.mmap.get()).as_mut_ptr() }
    }

    /// # Safety
    /// `index < self.records` and no one writes the record concurrently.
    unsafe fn load(&self, index: u64) -> Record {
        let mut buf = [0u8; RECORD_SIZE];
        unsafe {
            let src = self.as_mut_ptr().add(index as usize * RECORD_SIZE);
            std::ptr::copy_nonoverlapping(src, buf.as_mut_ptr(), RECORD_SIZE);
        }
        Record::decode(&buf)
    }

    /// # Safety
    /// `index < self.records` and no one else touches the record concurrently.
    unsafe fn store(&self, index: u64, record: &Record) {
        let bytes = record.encode();
        unsafe {
            let dst = self.as_mut_ptr().add(index as usize * RECORD_SIZE);
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), dst, RECORD_SIZE);
        }
    }
}

fn whole_records(len: u64) -> Result<u64> {
    if len == 0 || len % RECORD_SIZE as u64 != 0 {
        return Err(Error::MalformedRecordFile {
            len,
            record_size: RECORD_SIZE,
        });
    }
    Ok(len / RECORD_SIZE as u64)
}

impl std::fmt::Debug for RecordFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordFile")
            .field("records", &self.records)
            .field("mmap", &"MmapMut")
            .finish()
    }
}

// Safety: concurrent access is partitioned by leases
// Safety: 并发访问由租约划分
unsafe impl Send for RecordFile {}
unsafe impl Sync for RecordFile {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{Coordinator, RegionConfig, Request};
    use tempfile::{TempDir, tempdir};

    fn setup(count: i32) -> (TempDir, RecordFile, Coordinator) {
        let dir = tempdir().unwrap();
        let records: Vec<_> = (1..=count)
            .map(|id| Record::new(id, "Surname", "Name", id * 100))
            .collect();
        let file = RecordFile::create(dir.path().join("records.bin"), &records).unwrap();
        let coordinator =
            Coordinator::create(dir.path().join("gate.region"), RegionConfig::default()).unwrap();
        (dir, file, coordinator)
    }

    fn range(start: u64, finish: u64) -> RecordRange {
        RecordRange::new(start, finish).unwrap()
    }

    #[test]
    fn test_create_and_reopen() {
        let (dir, file, _coordinator) = setup(5);
        assert_eq!(file.len(), 5);
        drop(file);

        let path = dir.path().join("records.bin");
        assert_eq!(RecordFile::count_records(&path).unwrap(), 5);
        assert_eq!(RecordFile::open(&path).unwrap().len(), 5);

        let all = RecordFile::read_all(&path).unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[4].id, 5);
        assert_eq!(all[4].balance, 500);
    }

    #[test]
    fn test_malformed_files() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.bin");
        let ragged = dir.path().join("ragged.bin");
        fs::write(&empty, b"").unwrap();
        fs::write(&ragged, vec![0u8; RECORD_SIZE + 1]).unwrap();

        assert!(matches!(
            RecordFile::open(&empty),
            Err(Error::MalformedRecordFile { len: 0, .. })
        ));
        assert!(matches!(
            RecordFile::count_records(&ragged),
            Err(Error::MalformedRecordFile { len: 49, .. })
        ));
        assert!(matches!(
            RecordFile::create(dir.path().join("none.bin"), &[]),
            Err(Error::MalformedRecordFile { .. })
        ));
    }

    #[test]
    fn test_read_lease_range() {
        let (_dir, file, coordinator) = setup(10);
        let lease = coordinator.acquire(Request::read(range(2, 4))).unwrap();

        let records = file.read(&lease).unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(file.read_range(&lease, range(3, 3)).unwrap()[0].id, 4);

        assert!(matches!(
            file.read_range(&lease, range(4, 5)),
            Err(Error::LeaseMismatch { .. })
        ));
    }

    #[test]
    fn test_update_requires_writer_lease() {
        let (_dir, file, coordinator) = setup(4);

        let reader = coordinator.acquire(Request::read(range(0, 3))).unwrap();
        assert!(matches!(
            file.update_balance(&reader, 1, 10),
            Err(Error::LeaseMismatch { .. })
        ));
        reader.release(Outcome::Read { records: 0 }).unwrap();

        let writer = coordinator.acquire(Request::update(1, 10)).unwrap();
        assert!(matches!(
            file.update_balance(&writer, 2, 10),
            Err(Error::LeaseMismatch { .. })
        ));

        let update = file.update_balance(&writer, 1, -250).unwrap();
        assert_eq!(update.old_balance, 200);
        assert_eq!(update.new_balance, -50);
        assert_eq!(file.read(&writer).unwrap()[0].balance, -50);
        writer.release(update.into()).unwrap();
    }

    #[test]
    fn test_out_of_bounds_range() {
        let (_dir, file, coordinator) = setup(3);
        let lease = coordinator.acquire(Request::read(range(1, 3))).unwrap();
        assert!(matches!(
            file.read(&lease),
            Err(Error::RangeOutOfBounds { finish: 3, records: 3 })
        ));
    }

    #[test]
    fn test_balance_saturates() {
        let dir = tempdir().unwrap();
        let file =
            RecordFile::create(dir.path().join("max.bin"), &[Record::new(1, "A", "B", i32::MAX - 1)])
                .unwrap();
        let coordinator =
            Coordinator::create(dir.path().join("gate.region"), RegionConfig::default()).unwrap();

        let lease = coordinator.acquire(Request::update(0, 1000)).unwrap();
        assert_eq!(file.update_balance(&lease, 0, 1000).unwrap().new_balance, i32::MAX);
    }

    #[test]
    fn test_updates_visible_through_second_mapping() {
        let (dir, file, coordinator) = setup(2);
        let other = RecordFile::open(dir.path().join("records.bin")).unwrap();

        let lease = coordinator.acquire(Request::update(0, 5)).unwrap();
        file.update_balance(&lease, 0, 5).unwrap();
        assert_eq!(other.read(&lease).unwrap()[0].balance, 105);
        file.sync_all().unwrap();
    }

    #[test]
    fn test_concurrent_writers_lose_no_updates() {
        let (_dir, file, coordinator) = setup(2);

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..25 {
                        let lease = coordinator.acquire(Request::update(1, 1)).unwrap();
                        let update = file.update_balance(&lease, 1, 1).unwrap();
                        lease.release(update.into()).unwrap();
                    }
                });
            }
        });

        let lease = coordinator.acquire(Request::read(range(0, 1))).unwrap();
        let records = file.read(&lease).unwrap();
        assert_eq!(records[0].balance, 100);
        assert_eq!(records[1].balance, 400);
    }
}
