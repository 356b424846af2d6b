//! Process-shared semaphores living inside the coordination region
//!
//! 位于协调区域内的进程间共享信号量
//!
//! Every primitive here is a POSIX unnamed semaphore initialized with `pshared = 1`,
//! so the same bytes synchronize threads of one process and separate processes that
//! map the region with `MAP_SHARED`.
//!
//! 这里的所有原语都是以 `pshared = 1` 初始化的 POSIX 匿名信号量，
//! 因此同一段内存既可以同步同一进程内的线程，也可以同步以 `MAP_SHARED` 映射区域的不同进程。

use std::cell::UnsafeCell;
use std::io;
use std::ops::{Deref, DerefMut};

/// Counting semaphore stored in shared memory
///
/// 存放于共享内存中的计数信号量
///
/// All-zero bytes are a valid *uninitialized* value, so a freshly truncated region file
/// can be viewed as a layout of semaphores before [`Semaphore::init`] runs on each one.
///
/// 全零字节是合法的*未初始化*值，因此新截断的区域文件在对每个信号量调用
/// [`Semaphore::init`] 之前即可被视为信号量布局。
#[repr(C)]
pub(crate) struct Semaphore {
    raw: UnsafeCell<libc::sem_t>,
}

// Safety: sem_t is designed to be operated on concurrently through a shared address
// Safety: sem_t 本身就是为通过共享地址并发操作而设计的
unsafe impl Send for Semaphore {}
unsafe impl Sync for Semaphore {}

impl Semaphore {
    /// Initialize in place as process-shared with `value` permits
    ///
    /// 就地初始化为进程间共享信号量，初始许可数为 `value`
    ///
    /// # Safety
    /// Must be called exactly once, before any other thread or process can reach this
    /// semaphore, and never on a semaphore that is currently initialized.
    ///
    /// # Safety
    /// 必须在任何其他线程或进程能访问此信号量之前恰好调用一次，且不能对已初始化的信号量调用。
    pub(crate) unsafe fn init(&self, value: u32) -> io::Result<()> {
        let rc = unsafe { libc::sem_init(self.raw.get(), 1, value as libc::c_uint) };
        if rc == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Block until a permit is available and take it
    ///
    /// 阻塞直到有可用许可并获取它
    ///
    /// Interrupted waits are retried, so signals delivered to the process do not
    /// surface as errors.
    ///
    /// 被信号中断的等待会自动重试，投递给进程的信号不会表现为错误。
    pub(crate) fn wait(&self) -> io::Result<()> {
        loop {
            if unsafe { libc::sem_wait(self.raw.get()) } == 0 {
                return Ok(());
            }
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(err);
            }
        }
    }

    /// Take a permit if one is available right now
    ///
    /// 若当前有可用许可则获取
    pub(crate) fn try_wait(&self) -> io::Result<bool> {
        loop {
            if unsafe { libc::sem_trywait(self.raw.get()) } == 0 {
                return Ok(true);
            }
            let err = io::Error::last_os_error();
            match err.raw_os_error() {
                Some(libc::EAGAIN) => return Ok(false),
                Some(libc::EINTR) => continue,
                _ => return Err(err),
            }
        }
    }

    /// Release one permit
    ///
    /// 释放一个许可
    pub(crate) fn post(&self) -> io::Result<()> {
        if unsafe { libc::sem_post(self.raw.get()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Current permit count (diagnostics only, stale as soon as it returns)
    ///
    /// 当前许可数（仅用于诊断，返回时即可能过期）
    pub(crate) fn value(&self) -> io::Result<i32> {
        let mut value: libc::c_int = 0;
        if unsafe { libc::sem_getvalue(self.raw.get(), &mut value) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(value)
    }

    /// Destroy the semaphore
    ///
    /// 销毁信号量
    ///
    /// # Safety
    /// No thread or process may be blocked on, or later use, this semaphore.
    ///
    /// # Safety
    /// 不能有任何线程或进程阻塞在此信号量上，之后也不能再使用它。
    pub(crate) unsafe fn destroy(&self) -> io::Result<()> {
        if unsafe { libc::sem_destroy(self.raw.get()) } == -1 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

/// Mutual exclusion over shared-memory data, built on a binary semaphore
///
/// 基于二值信号量、保护共享内存数据的互斥锁
///
/// `T` must be plain data: it is viewed in place by every process mapping the region.
///
/// `T` 必须是纯数据：每个映射区域的进程都会就地查看它。
#[repr(C)]
pub(crate) struct SemMutex<T> {
    sem: Semaphore,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Send for SemMutex<T> {}
unsafe impl<T: Send> Sync for SemMutex<T> {}

impl<T> SemMutex<T> {
    /// Initialize the lock as unlocked
    ///
    /// 初始化为未加锁状态
    ///
    /// # Safety
    /// Same contract as [`Semaphore::init`].
    pub(crate) unsafe fn init(&self) -> io::Result<()> {
        unsafe { self.sem.init(1) }
    }

    /// Acquire the lock, blocking as long as another holder exists
    ///
    /// 获取锁，若已被持有则阻塞
    pub(crate) fn lock(&self) -> io::Result<SemMutexGuard<'_, T>> {
        self.sem.wait()?;
        Ok(SemMutexGuard { lock: self })
    }

    /// Mutable access during initialization
    ///
    /// 初始化期间的可变访问
    ///
    /// # Safety
    /// No other thread or process may reach the region yet.
    pub(crate) unsafe fn data_uninit(&self) -> &mut T {
        unsafe { &mut *self.data.get() }
    }

    /// Read access on behalf of the current lock holder
    ///
    /// 代表当前持锁者进行读访问
    ///
    /// # Safety
    /// The caller must know that some other party holds the lock and has parked itself
    /// until the caller signals back (the logging rendezvous), so nothing mutates `T`
    /// while the returned reference lives.
    ///
    /// # Safety
    /// 调用者必须确认另一方持有锁并已挂起等待调用者回复（日志会合握手），
    /// 因此返回的引用存活期间不会有人修改 `T`。
    pub(crate) unsafe fn data_on_behalf(&self) -> &T {
        unsafe { &*self.data.get() }
    }

    /// Destroy the underlying semaphore
    ///
    /// 销毁底层信号量
    ///
    /// # Safety
    /// Same contract as [`Semaphore::destroy`].
    pub(crate) unsafe fn destroy(&self) -> io::Result<()> {
        unsafe { self.sem.destroy() }
    }
}

/// RAII guard for [`SemMutex`]; unlocks on drop
///
/// [`SemMutex`] 的 RAII 守卫；析构时解锁
pub(crate) struct SemMutexGuard<'a, T> {
    lock: &'a SemMutex<T>,
}

impl<T> Deref for SemMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // Safety: the guard owns the only permit of the lock
        // Safety: 守卫持有锁的唯一许可
        unsafe { &*self.lock.data.get() }
    }
}

impl<T> DerefMut for SemMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T> Drop for SemMutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.sem.post() {
            tracing::error!(error = %err, "failed to unlock table lock");
        }
    }
}
