//! Record ranges, participant roles and the conflict rule
//!
//! 记录范围、参与者角色与冲突规则

use super::error::{Error, Result};
use std::fmt;
use std::ops::RangeInclusive;

/// Inclusive range of record indices
///
/// 记录索引的闭区间
///
/// Represents `[start, finish]` over 0-based record indices. Unlike a byte range this is
/// inclusive on both ends: `RecordRange::new(3, 3)` addresses exactly one record.
///
/// 表示 0 起始的记录索引区间 `[start, finish]`。与字节范围不同，两端都包含：
/// `RecordRange::new(3, 3)` 恰好表示一条记录。
///
/// # Guarantees
///
/// - `start` is always ≤ `finish`
/// - Immutable once built, so a registered range never changes under other participants
///
/// # 保证
///
/// - `start` 总是小于等于 `finish`
/// - 构造后不可变，已注册的范围不会在其他参与者眼前改变
///
/// # Examples
///
/// ```
/// use ranged_gate::RecordRange;
///
/// let a = RecordRange::new(1, 5).unwrap();
/// let b = RecordRange::single(5);
/// assert!(a.overlaps(&b));
/// assert_eq!(a.len(), 5);
/// assert!(RecordRange::new(4, 2).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RecordRange {
    /// First record index (inclusive)
    ///
    /// 第一条记录索引（包含）
    start: u64,

    /// Last record index (inclusive)
    ///
    /// 最后一条记录索引（包含）
    finish: u64,
}

impl RecordRange {
    /// Create a range, rejecting `start > finish`
    ///
    /// 创建范围，拒绝 `start > finish`
    #[inline]
    pub fn new(start: u64, finish: u64) -> Result<Self> {
        if start > finish {
            return Err(Error::InvalidRange { start, finish });
        }
        Ok(Self { start, finish })
    }

    /// Range covering exactly one record
    ///
    /// 仅包含一条记录的范围
    #[inline]
    pub fn single(index: u64) -> Self {
        Self {
            start: index,
            finish: index,
        }
    }

    /// Internal constructor for values read back from the slot table
    ///
    /// 从槽位表读回时使用的内部构造函数（不校验）
    #[inline]
    pub(crate) fn from_parts_unchecked(start: u64, finish: u64) -> Self {
        Self { start, finish }
    }

    /// First record index
    ///
    /// 第一条记录索引
    #[inline]
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last record index
    ///
    /// 最后一条记录索引
    #[inline]
    pub fn finish(&self) -> u64 {
        self.finish
    }

    /// Number of records covered, never zero
    ///
    /// 覆盖的记录数，永不为零
    ///
    /// `[0, u64::MAX]` holds one more record than `u64` can count and saturates.
    ///
    /// `[0, u64::MAX]` 包含的记录数超出 `u64` 表示范围，结果饱和。
    #[inline]
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> u64 {
        (self.finish - self.start).saturating_add(1)
    }

    /// 1-based record ids of the first and last record, as printed to users
    ///
    /// 面向用户输出的首尾记录编号（从 1 开始）
    #[inline]
    pub fn ids(&self) -> (u128, u128) {
        (u128::from(self.start) + 1, u128::from(self.finish) + 1)
    }

    /// Whether `index` lies inside the range
    ///
    /// `index` 是否位于范围内
    #[inline]
    pub fn contains(&self, index: u64) -> bool {
        self.start <= index && index <= self.finish
    }

    /// Whether `other` lies entirely inside this range
    ///
    /// `other` 是否完全位于本范围内
    #[inline]
    pub fn covers(&self, other: &RecordRange) -> bool {
        self.start <= other.start && other.finish <= self.finish
    }

    /// Two inclusive ranges overlap iff `a.start ≤ b.finish ∧ a.finish ≥ b.start`
    ///
    /// 两个闭区间重叠当且仅当 `a.start ≤ b.finish ∧ a.finish ≥ b.start`
    #[inline]
    pub fn overlaps(&self, other: &RecordRange) -> bool {
        self.start <= other.finish && self.finish >= other.start
    }

    /// Check that the range fits a file of `records` records
    ///
    /// 检查范围是否位于含 `records` 条记录的文件内
    pub fn check_bounds(&self, records: u64) -> Result<()> {
        if self.finish >= records {
            return Err(Error::RangeOutOfBounds {
                finish: self.finish,
                records,
            });
        }
        Ok(())
    }

    /// Convert to a standard inclusive range
    ///
    /// 转换为标准闭区间
    #[inline]
    pub fn as_range(&self) -> RangeInclusive<u64> {
        self.start..=self.finish
    }
}

impl From<RecordRange> for RangeInclusive<u64> {
    #[inline]
    fn from(range: RecordRange) -> Self {
        range.as_range()
    }
}

impl fmt::Display for RecordRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.finish)
    }
}

/// Participant role
///
/// 参与者角色
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u32)]
pub enum Role {
    Reader = 0,
    Writer = 1,
}

impl Role {
    /// Whether two roles must exclude each other on overlapping ranges.
    /// Reads never block reads; a writer on either side does.
    ///
    /// 两个角色在重叠范围上是否必须互斥。读不阻塞读；任一方为写者则互斥。
    #[inline]
    pub fn excludes(self, other: Role) -> bool {
        self == Role::Writer || other == Role::Writer
    }

    /// Index into per-role counters
    ///
    /// 按角色计数器的下标
    #[inline]
    pub(crate) fn index(self) -> usize {
        self as usize
    }

    #[inline]
    pub(crate) fn from_raw(raw: u32) -> Option<Role> {
        match raw {
            0 => Some(Role::Reader),
            1 => Some(Role::Writer),
            _ => None,
        }
    }

    /// Upper-case label used in event messages
    ///
    /// 事件消息中使用的大写标签
    pub fn label(self) -> &'static str {
        match self {
            Role::Reader => "READER",
            Role::Writer => "WRITER",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Role::Reader => "reader",
            Role::Writer => "writer",
        })
    }
}

/// A role together with the range it wants
///
/// 角色及其请求的范围
///
/// # Examples
///
/// ```
/// use ranged_gate::{Claim, RecordRange, Role};
///
/// let read = Claim::new(Role::Reader, RecordRange::new(1, 5).unwrap());
/// let other_read = Claim::new(Role::Reader, RecordRange::new(3, 9).unwrap());
/// let write = Claim::new(Role::Writer, RecordRange::single(3));
///
/// assert!(!read.conflicts_with(&other_read));
/// assert!(read.conflicts_with(&write));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Claim {
    pub role: Role,
    pub range: RecordRange,
}

impl Claim {
    #[inline]
    pub fn new(role: Role, range: RecordRange) -> Self {
        Self { role, range }
    }

    /// Overlapping ranges where at least one side writes
    ///
    /// 范围重叠且至少一方为写者
    #[inline]
    pub fn conflicts_with(&self, other: &Claim) -> bool {
        self.role.excludes(other.role) && self.range.overlaps(&other.range)
    }
}

impl fmt::Display for Claim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.role, self.range)
    }
}
