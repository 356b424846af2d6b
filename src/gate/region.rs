//! Shared coordination region based on memmap2
//!
//! 基于 memmap2 的共享协调区域

use super::error::{Error, Result};
use super::slots::{MAX_SLOTS, TableState};
use super::sync::{SemMutex, Semaphore};
use memmap2::MmapMut;
use std::fmt;
use std::fs::{self, OpenOptions};
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

const MAGIC: u64 = u64::from_le_bytes(*b"RNGGATE\0");

/// Layout version stamped into every region
///
/// 写入每个区域的布局版本号
pub const LAYOUT_VERSION: u32 = 1;

/// Size of the mapped region in bytes
///
/// 映射区域的字节大小
pub const REGION_SIZE: usize = mem::size_of::<RegionLayout>();

#[repr(C)]
struct Header {
    /// Stored last during creation; attachers treat anything else as not-a-region
    magic: AtomicU64,
    version: u32,
    capacity: u32,
    layout_size: u64,
    attached: AtomicU32,
    shutdown: AtomicBool,
    accountant: AtomicBool,
}

/// Everything every participant maps
///
/// 每个参与者映射的全部内容
#[repr(C)]
pub(crate) struct RegionLayout {
    header: Header,
    pub(crate) admission: Semaphore,
    pub(crate) logger_wakeup: Semaphore,
    pub(crate) logger_done: Semaphore,
    pub(crate) table: SemMutex<TableState>,
    pub(crate) wake: [Semaphore; MAX_SLOTS],
}

/// Parameters fixed at region creation
///
/// 区域创建时确定的参数
///
/// # Examples
///
/// ```
/// use ranged_gate::RegionConfig;
///
/// let config = RegionConfig::default()
///     .with_capacity(4)
///     .with_participants(10)
///     .with_accountant(false);
/// assert_eq!(config.capacity(), 4);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegionConfig {
    capacity: usize,
    participants: i64,
    accountant: bool,
}

impl Default for RegionConfig {
    fn default() -> Self {
        Self {
            capacity: MAX_SLOTS,
            participants: 0,
            accountant: false,
        }
    }
}

impl RegionConfig {
    /// Maximum number of participants inside the coordinator at once (`1..=MAX_SLOTS`)
    ///
    /// 同时位于协调器内的最大参与者数（`1..=MAX_SLOTS`）
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Declared number of participants that will ever enter; seeds the priority tickets
    ///
    /// 声明的总参与者数；作为优先级票号的初始值
    pub fn with_participants(mut self, participants: u64) -> Self {
        self.participants = i64::try_from(participants).unwrap_or(i64::MAX);
        self
    }

    /// Whether an accountant process will consume every event through the rendezvous
    ///
    /// 是否有记账进程通过会合握手消费每个事件
    pub fn with_accountant(mut self, accountant: bool) -> Self {
        self.accountant = accountant;
        self
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[inline]
    pub fn participants(&self) -> i64 {
        self.participants
    }

    #[inline]
    pub fn accountant(&self) -> bool {
        self.accountant
    }

    fn validate(&self) -> Result<()> {
        if self.capacity == 0 || self.capacity > MAX_SLOTS {
            return Err(Error::InvalidCapacity {
                requested: self.capacity,
                max: MAX_SLOTS,
            });
        }
        Ok(())
    }
}

/// One process-level attachment to the region
///
/// 进程级的一次区域挂载
struct Mapping {
    /// Keeps the mapping alive; all access goes through `layout`
    ///
    /// 保持映射存活；所有访问都经由 `layout`
    _mmap: MmapMut,
    layout: NonNull<RegionLayout>,
    path: PathBuf,
    torn_down: bool,
}

// Safety: every byte of the layout is either an atomic, a process-shared semaphore,
// or data guarded by the table lock
// Safety: 布局中的每个字节要么是原子量、进程共享信号量，要么是受表锁保护的数据
unsafe impl Send for Mapping {}
unsafe impl Sync for Mapping {}

impl Mapping {
    #[inline]
    fn layout(&self) -> &RegionLayout {
        // Safety: the mapping is REGION_SIZE bytes, page aligned, and outlives `self`
        // Safety: 映射大小为 REGION_SIZE 字节、页对齐，且生命周期长于 `self`
        unsafe { self.layout.as_ref() }
    }
}

impl Drop for Mapping {
    fn drop(&mut self) {
        if !self.torn_down {
            let left = self.layout().header.attached.fetch_sub(1, Ordering::AcqRel) - 1;
            tracing::trace!(path = %self.path.display(), attached = left, "detached from region");
        }
    }
}

/// Handle to the shared coordination region
///
/// 共享协调区域的句柄
///
/// The region is a file-backed shared mapping holding the admission permits, the table
/// lock, the slot table with its registry, the per-slot wake semaphores and the two
/// logging rendezvous semaphores. Every process (or thread) that maps the same path
/// coordinates with every other one.
///
/// 区域是一个基于文件的共享映射，包含准入许可、表锁、槽位表及登记簿、
/// 每个槽位的唤醒信号量以及两个日志会合信号量。映射同一路径的所有进程（或线程）彼此协调。
///
/// # Attachment counting
///
/// The creator holds the first attachment. [`attach`](Self::attach) adds one,
/// dropping the last clone of a handle removes it. [`destroy`](Self::destroy) only
/// succeeds for the sole remaining attachment, so teardown can never pull the region
/// out from under a live participant.
///
/// # 挂载计数
///
/// 创建者持有第一个挂载。[`attach`](Self::attach) 增加一个，句柄最后一个克隆被丢弃时移除。
/// [`destroy`](Self::destroy) 仅在只剩唯一挂载时成功，因此销毁永远不会影响存活的参与者。
///
/// # Limitations
///
/// - Linux only: relies on process-shared unnamed POSIX semaphores
/// - A process that dies while attached leaves its attachment counted
///
/// # 限制
///
/// - 仅支持 Linux：依赖进程共享的匿名 POSIX 信号量
/// - 挂载期间崩溃的进程其挂载计数不会被回收
///
/// # Examples
///
/// ```
/// use ranged_gate::{RegionConfig, SharedRegion};
/// # use tempfile::tempdir;
/// # fn main() -> ranged_gate::Result<()> {
/// # let dir = tempdir()?;
/// # let path = dir.path().join("gate.region");
/// let region = SharedRegion::create(&path, RegionConfig::default().with_capacity(8))?;
/// let other = SharedRegion::attach(&path)?;
/// assert_eq!(region.attachments(), 2);
///
/// drop(other);
/// region.destroy().map_err(ranged_gate::Error::from)?;
/// assert!(!path.exists());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SharedRegion {
    inner: Arc<Mapping>,
}

impl SharedRegion {
    /// Create and initialize a new region at `path`
    ///
    /// 在 `path` 创建并初始化新区域
    ///
    /// Fails with [`Error::RegionExists`] if anything already exists at `path`.
    ///
    /// 若 `path` 上已存在文件则返回 [`Error::RegionExists`]。
    pub fn create(path: impl AsRef<Path>, config: RegionConfig) -> Result<Self> {
        config.validate()?;
        let path = path.as_ref();

        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(Error::RegionExists { path: path.to_path_buf() });
            }
            Err(err) => return Err(err.into()),
        };

        let mapped = (|| -> Result<(MmapMut, NonNull<RegionLayout>)> {
            // A freshly extended file reads as zeros, which is a valid uninitialized layout
            // 新扩展的文件内容全为零，这是合法的未初始化布局
            file.set_len(REGION_SIZE as u64)?;
            let mut mmap = unsafe { MmapMut::map_mut(&file)? };
            let layout = NonNull::new(mmap.as_mut_ptr().cast::<RegionLayout>())
                .ok_or_else(|| io::Error::other("null mapping"))?;
            unsafe { initialize(layout, &config)? };
            Ok((mmap, layout))
        })();

        let (mmap, layout) = match mapped {
            Ok(mapped) => mapped,
            Err(err) => {
                let _ = fs::remove_file(path);
                return Err(err);
            }
        };

        tracing::debug!(
            path = %path.display(),
            capacity = config.capacity,
            participants = config.participants,
            accountant = config.accountant,
            "created coordination region"
        );

        Ok(Self {
            inner: Arc::new(Mapping {
                _mmap: mmap,
                layout,
                path: path.to_path_buf(),
                torn_down: false,
            }),
        })
    }

    /// Map an existing region read/write
    ///
    /// 以读写方式映射已存在的区域
    ///
    /// # Errors
    /// - [`Error::RegionMissing`] if nothing exists at `path`
    /// - [`Error::IncompatibleRegion`] if the file is not a region of this layout version
    ///   (including one whose creation has not finished yet)
    /// - [`Error::RegionDestroyed`] if teardown has already started
    ///
    /// # Errors
    /// - 路径上不存在文件时返回 [`Error::RegionMissing`]
    /// - 文件不是当前布局版本的区域（包括尚未完成创建的区域）时返回 [`Error::IncompatibleRegion`]
    /// - 销毁已经开始时返回 [`Error::RegionDestroyed`]
    pub fn attach(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let file = match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(Error::RegionMissing { path: path.to_path_buf() });
            }
            Err(err) => return Err(err.into()),
        };

        let len = file.metadata()?.len();
        if len != REGION_SIZE as u64 {
            return Err(Error::IncompatibleRegion {
                reason: format!("expected {REGION_SIZE} bytes, found {len}"),
            });
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        let layout = NonNull::new(mmap.as_mut_ptr().cast::<RegionLayout>())
            .ok_or_else(|| io::Error::other("null mapping"))?;
        let header = unsafe { &layout.as_ref().header };

        if header.magic.load(Ordering::Acquire) != MAGIC {
            return Err(Error::IncompatibleRegion {
                reason: "missing region magic".to_owned(),
            });
        }
        if header.version != LAYOUT_VERSION || header.layout_size != REGION_SIZE as u64 {
            return Err(Error::IncompatibleRegion {
                reason: format!("layout version {} (expected {LAYOUT_VERSION})", header.version),
            });
        }

        // Never resurrect a region whose count already reached zero
        // 计数已归零的区域不可再挂载
        let mut current = header.attached.load(Ordering::Acquire);
        loop {
            if current == 0 {
                return Err(Error::RegionDestroyed);
            }
            match header.attached.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        tracing::trace!(path = %path.display(), attached = current + 1, "attached to region");

        Ok(Self {
            inner: Arc::new(Mapping {
                _mmap: mmap,
                layout,
                path: path.to_path_buf(),
                torn_down: false,
            }),
        })
    }

    /// Tear the region down: destroy every semaphore, unmap and remove the file
    ///
    /// 销毁区域：销毁所有信号量、解除映射并删除文件
    ///
    /// Only succeeds when this handle (with no other clones) is the sole attachment.
    /// Otherwise the handle comes back inside [`InUse`] untouched, so the caller can
    /// retry once the others have detached.
    ///
    /// 仅当此句柄（且没有其他克隆）是唯一挂载时才会成功。否则句柄会原样装在
    /// [`InUse`] 中返回，调用者可以在其他参与者分离后重试。
    pub fn destroy(self) -> std::result::Result<(), InUse> {
        let mut mapping = match Arc::try_unwrap(self.inner) {
            Ok(mapping) => mapping,
            Err(inner) => {
                let attached = inner.layout().header.attached.load(Ordering::Acquire);
                return Err(InUse {
                    region: SharedRegion { inner },
                    attached,
                });
            }
        };

        let header = &mapping.layout().header;
        if let Err(attached) = header
            .attached
            .compare_exchange(1, 0, Ordering::AcqRel, Ordering::Acquire)
        {
            return Err(InUse {
                region: SharedRegion {
                    inner: Arc::new(mapping),
                },
                attached,
            });
        }
        mapping.torn_down = true;

        let layout = mapping.layout();
        // Safety: the attachment count is zero and can never grow again
        // Safety: 挂载计数为零且不会再增长
        let destroyed = unsafe {
            layout
                .admission
                .destroy()
                .and_then(|_| layout.logger_wakeup.destroy())
                .and_then(|_| layout.logger_done.destroy())
                .and_then(|_| layout.table.destroy())
                .and_then(|_| layout.wake.iter().try_for_each(|sem| sem.destroy()))
        };
        if let Err(err) = destroyed {
            tracing::warn!(error = %err, "failed to destroy a region semaphore");
        }
        if let Err(err) = fs::remove_file(&mapping.path) {
            tracing::warn!(path = %mapping.path.display(), error = %err, "failed to remove region file");
        }

        tracing::debug!(path = %mapping.path.display(), "destroyed coordination region");
        Ok(())
    }

    #[inline]
    pub(crate) fn layout(&self) -> &RegionLayout {
        self.inner.layout()
    }

    /// Path of the backing file
    ///
    /// 底层文件路径
    #[inline]
    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    /// Slot capacity chosen at creation
    ///
    /// 创建时选定的槽位容量
    #[inline]
    pub fn capacity(&self) -> usize {
        self.layout().header.capacity as usize
    }

    /// Current number of process-level attachments
    ///
    /// 当前进程级挂载数
    #[inline]
    pub fn attachments(&self) -> u32 {
        self.layout().header.attached.load(Ordering::Acquire)
    }

    /// Whether events are handed to an accountant through the rendezvous
    ///
    /// 事件是否通过会合握手交给记账进程
    #[inline]
    pub fn expects_accountant(&self) -> bool {
        self.layout().header.accountant.load(Ordering::Acquire)
    }

    /// Ask the accountant to stop after its current event
    ///
    /// 请求记账进程在处理完当前事件后停止
    ///
    /// Must only be called once no participant will report again.
    ///
    /// 只能在不会再有参与者报告事件时调用。
    pub fn request_shutdown(&self) -> Result<()> {
        let layout = self.layout();
        layout.header.shutdown.store(true, Ordering::Release);
        layout.logger_wakeup.post()?;
        tracing::debug!(path = %self.path().display(), "shutdown requested");
        Ok(())
    }

    #[inline]
    pub fn shutdown_requested(&self) -> bool {
        self.layout().header.shutdown.load(Ordering::Acquire)
    }
}

impl fmt::Debug for SharedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedRegion")
            .field("path", &self.inner.path)
            .field("capacity", &self.capacity())
            .field("attached", &self.attachments())
            .finish()
    }
}

/// Returned by [`SharedRegion::destroy`] while other attachments remain
///
/// 仍有其他挂载时由 [`SharedRegion::destroy`] 返回
pub struct InUse {
    /// The handle, still attached
    ///
    /// 仍处于挂载状态的句柄
    pub region: SharedRegion,

    /// Attachment count observed
    ///
    /// 观察到的挂载数
    pub attached: u32,
}

impl fmt::Debug for InUse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InUse").field("attached", &self.attached).finish()
    }
}

impl From<InUse> for Error {
    fn from(err: InUse) -> Self {
        Error::RegionInUse { attached: err.attached }
    }
}

/// Fill in a zeroed layout
///
/// 填充全零布局
///
/// # Safety
/// `layout` must point at `REGION_SIZE` zeroed, shared, writable bytes that no other
/// party can reach until `magic` is published.
unsafe fn initialize(layout: NonNull<RegionLayout>, config: &RegionConfig) -> io::Result<()> {
    let ptr = layout.as_ptr();
    unsafe {
        (&raw mut (*ptr).header.version).write(LAYOUT_VERSION);
        (&raw mut (*ptr).header.capacity).write(config.capacity as u32);
        (&raw mut (*ptr).header.layout_size).write(REGION_SIZE as u64);
    }

    let layout = unsafe { layout.as_ref() };
    unsafe {
        *layout.table.data_uninit() = TableState::new(config.capacity, config.participants);
        layout.table.init()?;
        layout.admission.init(config.capacity as u32)?;
        layout.logger_wakeup.init(0)?;
        layout.logger_done.init(0)?;
        for sem in &layout.wake {
            sem.init(0)?;
        }
    }

    layout.header.shutdown.store(false, Ordering::Relaxed);
    layout.header.accountant.store(config.accountant, Ordering::Relaxed);
    layout.header.attached.store(1, Ordering::Relaxed);
    layout.header.magic.store(MAGIC, Ordering::Release);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn config(capacity: usize) -> RegionConfig {
        RegionConfig::default().with_capacity(capacity).with_participants(8)
    }

    #[test]
    fn test_create_initializes_permits() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("init.region");

        let region = SharedRegion::create(&path, config(4)).unwrap();
        let layout = region.layout();
        assert_eq!(region.capacity(), 4);
        assert_eq!(region.attachments(), 1);
        assert!(!region.shutdown_requested());
        assert!(!region.expects_accountant());

        assert_eq!(layout.admission.value().unwrap(), 4);
        assert_eq!(layout.logger_wakeup.value().unwrap(), 0);
        assert_eq!(layout.logger_done.value().unwrap(), 0);
        assert!(layout.wake.iter().all(|s| s.value().unwrap() == 0));

        let table = layout.table.lock().unwrap();
        assert_eq!(table.capacity(), 4);
        assert_eq!(table.next_priority(), 8);
        assert_eq!(table.occupancy(), 0);
    }

    #[test]
    fn test_create_refuses_existing_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("twice.region");

        let _region = SharedRegion::create(&path, config(2)).unwrap();
        assert!(matches!(
            SharedRegion::create(&path, config(2)),
            Err(Error::RegionExists { .. })
        ));
    }

    #[test]
    fn test_invalid_capacity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cap.region");

        assert!(matches!(
            SharedRegion::create(&path, config(0)),
            Err(Error::InvalidCapacity { requested: 0, .. })
        ));
        assert!(matches!(
            SharedRegion::create(&path, config(MAX_SLOTS + 1)),
            Err(Error::InvalidCapacity { .. })
        ));
        // 校验失败时不应留下文件
        assert!(!path.exists());
    }

    #[test]
    fn test_attach_missing_region() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            SharedRegion::attach(dir.path().join("nothing.region")),
            Err(Error::RegionMissing { .. })
        ));
    }

    #[test]
    fn test_attach_rejects_foreign_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("foreign.region");

        fs::write(&path, b"not a region").unwrap();
        assert!(matches!(
            SharedRegion::attach(&path),
            Err(Error::IncompatibleRegion { .. })
        ));

        fs::write(&path, vec![0u8; REGION_SIZE]).unwrap();
        assert!(matches!(
            SharedRegion::attach(&path),
            Err(Error::IncompatibleRegion { .. })
        ));
    }

    #[test]
    fn test_attachment_counting() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("count.region");

        let region = SharedRegion::create(&path, config(2)).unwrap();
        let a = SharedRegion::attach(&path).unwrap();
        let b = SharedRegion::attach(&path).unwrap();
        assert_eq!(region.attachments(), 3);

        // 克隆共享同一个挂载
        let a2 = a.clone();
        assert_eq!(region.attachments(), 3);
        drop(a);
        assert_eq!(region.attachments(), 3);
        drop(a2);
        assert_eq!(region.attachments(), 2);
        drop(b);
        assert_eq!(region.attachments(), 1);
    }

    #[test]
    fn test_destroy_refused_while_attached() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("busy.region");

        let region = SharedRegion::create(&path, config(2)).unwrap();
        let other = SharedRegion::attach(&path).unwrap();

        let err = region.destroy().unwrap_err();
        assert_eq!(err.attached, 2);
        assert!(path.exists());

        // 句柄原样返回，可在对方分离后重试
        let region = err.region;
        drop(other);
        region.destroy().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn test_destroy_refused_with_live_clone() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("clone.region");

        let region = SharedRegion::create(&path, config(2)).unwrap();
        let clone = region.clone();
        let err = region.destroy().unwrap_err();
        assert!(matches!(Error::from(err), Error::RegionInUse { attached: 1 }));

        clone.destroy().unwrap();
    }

    #[test]
    fn test_attach_after_destroy() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("gone.region");

        let region = SharedRegion::create(&path, config(2)).unwrap();
        region.destroy().unwrap();
        assert!(matches!(
            SharedRegion::attach(&path),
            Err(Error::RegionMissing { .. })
        ));
    }

    #[test]
    fn test_shutdown_flag_wakes_logger() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("shutdown.region");

        let region = SharedRegion::create(&path, config(2).with_accountant(true)).unwrap();
        let logger = SharedRegion::attach(&path).unwrap();
        assert!(logger.expects_accountant());

        region.request_shutdown().unwrap();
        assert!(logger.shutdown_requested());
        assert_eq!(logger.layout().logger_wakeup.value().unwrap(), 1);
    }
}
