//! Error types for ranged-gate
//!
//! ranged-gate 的错误类型

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Error type for coordination and record file operations
///
/// 协调与记录文件操作的错误类型
///
/// Errors fall into three groups:
/// - setup failures (region creation/attachment, exhausted slot table)
/// - malformed requests (bad capacity, inverted or out-of-bounds ranges)
/// - protocol violations, which indicate a coordinator bug rather than a runtime condition
///
/// 错误分为三类：
/// - 初始化失败（区域创建/挂载、槽位表耗尽）
/// - 非法请求（容量错误、范围颠倒或越界）
/// - 协议违规，表示协调器存在缺陷而非运行时状况
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error
    ///
    /// I/O 错误
    #[error(transparent)]
    Io(#[from] io::Error),

    /// A region already exists at the requested path
    ///
    /// 请求路径上已存在区域
    #[error("coordination region already exists at {}", path.display())]
    RegionExists { path: PathBuf },

    /// No region exists at the requested path
    ///
    /// 请求路径上不存在区域
    #[error("no coordination region at {}", path.display())]
    RegionMissing { path: PathBuf },

    /// The region has already been torn down
    ///
    /// 区域已被销毁
    #[error("coordination region has been destroyed")]
    RegionDestroyed,

    /// Teardown requested while other participants are still attached
    ///
    /// 仍有其他参与者挂载时请求销毁
    #[error("coordination region still has {attached} attachment(s)")]
    RegionInUse { attached: u32 },

    /// The mapped file is not a region this build understands
    ///
    /// 映射的文件不是当前版本可识别的区域
    #[error("incompatible coordination region: {reason}")]
    IncompatibleRegion { reason: String },

    /// Capacity outside `1..=MAX_SLOTS`
    ///
    /// 容量超出 `1..=MAX_SLOTS`
    #[error("capacity {requested} is outside 1..={max}")]
    InvalidCapacity { requested: usize, max: usize },

    /// Range with `start > finish`
    ///
    /// `start > finish` 的范围
    #[error("invalid range [{start}, {finish}]")]
    InvalidRange { start: u64, finish: u64 },

    /// Range reaching past the end of the record file
    ///
    /// 范围超出记录文件末尾
    #[error("record {finish} is out of bounds for a file of {records} record(s)")]
    RangeOutOfBounds { finish: u64, records: u64 },

    /// A lease does not cover the requested access
    ///
    /// 租约不覆盖请求的访问
    #[error("lease for {held} does not permit {wanted}")]
    LeaseMismatch { held: String, wanted: String },

    /// No free slot although the admission gate let the caller in
    ///
    /// 准入门已放行但没有空闲槽位
    #[error("slot table is full")]
    TableFull,

    /// Record file size is not a multiple of the record size, or is empty
    ///
    /// 记录文件大小不是记录大小的整数倍，或为空
    #[error("record file of {len} bytes does not hold whole records of {record_size} bytes")]
    MalformedRecordFile { len: u64, record_size: usize },

    /// Coordinator invariant breached
    ///
    /// 协调器不变量被破坏
    #[error("protocol violation: {0}")]
    ProtocolViolation(&'static str),
}

/// Convert from Error to io::Error for compatibility
///
/// 从 Error 转换到 io::Error 以保持兼容性
impl From<Error> for io::Error {
    fn from(err: Error) -> Self {
        match err {
            Error::Io(io_err) => io_err,
            Error::RegionExists { .. } => io::Error::new(io::ErrorKind::AlreadyExists, err.to_string()),
            Error::RegionMissing { .. } => io::Error::new(io::ErrorKind::NotFound, err.to_string()),
            Error::InvalidCapacity { .. }
            | Error::InvalidRange { .. }
            | Error::RangeOutOfBounds { .. }
            | Error::LeaseMismatch { .. } => io::Error::new(io::ErrorKind::InvalidInput, err.to_string()),
            _ => io::Error::other(err.to_string()),
        }
    }
}

/// Result type alias using our custom Error type
///
/// 使用自定义 Error 类型的 Result 类型别名
pub type Result<T> = std::result::Result<T, Error>;
