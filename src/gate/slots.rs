//! Slot table: fixed arena of participant slots with an occupancy bitmap
//!
//! 槽位表：带占用位图的固定参与者槽位数组
//!
//! The table lives inside the shared region and is only touched while holding the
//! table lock. Slot identity is the array index; occupancy is tracked by [`SlotSet`]
//! rather than by a sentinel stored in the slot.
//!
//! 槽位表位于共享区域内，仅在持有表锁时访问。槽位身份即数组下标；
//! 占用状态由 [`SlotSet`] 记录，而不是在槽位中存放哨兵值。

use super::error::{Error, Result};
use super::range::{Claim, RecordRange, Role};
use super::registry::Registry;

/// Maximum number of slots a region can hold
///
/// 单个区域可容纳的最大槽位数
pub const MAX_SLOTS: usize = 256;

const WORDS: usize = MAX_SLOTS / 64;

const _: () = assert!(MAX_SLOTS % 64 == 0, "MAX_SLOTS must fill whole bitmap words");

/// Fixed-size set of slot indices
///
/// 固定大小的槽位下标集合
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct SlotSet {
    words: [u64; WORDS],
}

impl SlotSet {
    pub(crate) const EMPTY: SlotSet = SlotSet { words: [0; WORDS] };

    #[inline]
    pub(crate) fn contains(&self, index: usize) -> bool {
        index < MAX_SLOTS && self.words[index / 64] & (1u64 << (index % 64)) != 0
    }

    /// Insert `index`, returning whether it was absent
    ///
    /// 插入 `index`，返回插入前是否不存在
    #[inline]
    pub(crate) fn insert(&mut self, index: usize) -> bool {
        let absent = !self.contains(index);
        self.words[index / 64] |= 1u64 << (index % 64);
        absent
    }

    /// Remove `index`, returning whether it was present
    ///
    /// 移除 `index`，返回移除前是否存在
    #[inline]
    pub(crate) fn remove(&mut self, index: usize) -> bool {
        if !self.contains(index) {
            return false;
        }
        self.words[index / 64] &= !(1u64 << (index % 64));
        true
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// Lowest index below `limit` that is not in the set
    ///
    /// 小于 `limit` 且不在集合中的最小下标
    pub(crate) fn first_absent(&self, limit: usize) -> Option<usize> {
        let limit = limit.min(MAX_SLOTS);
        for (w, word) in self.words.iter().enumerate() {
            let free = !word;
            if free == 0 {
                continue;
            }
            let index = w * 64 + free.trailing_zeros() as usize;
            return (index < limit).then_some(index);
        }
        None
    }

    /// Ascending iterator over members
    ///
    /// 按升序遍历成员
    pub(crate) fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(w, &word)| {
            let mut bits = word;
            std::iter::from_fn(move || {
                if bits == 0 {
                    return None;
                }
                let bit = bits.trailing_zeros() as usize;
                bits &= bits - 1;
                Some(w * 64 + bit)
            })
        })
    }
}

/// One registered participant
///
/// 一个已注册的参与者
///
/// Everything but `pending` is immutable for the occupancy lifetime.
///
/// 除 `pending` 外，所有字段在占用期间不可变。
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParticipantSlot {
    pub(crate) owner: u32,
    role: u32,
    start: u64,
    finish: u64,
    pub(crate) priority: i64,
    /// Still-unresolved conflicts with older occupants; 0 means runnable
    ///
    /// 与更早参与者之间尚未解除的冲突数；0 表示可运行
    pub(crate) pending: u32,
    pub(crate) admitted_at_micros: u64,
}

impl ParticipantSlot {
    const EMPTY: ParticipantSlot = ParticipantSlot {
        owner: 0,
        role: 0,
        start: 0,
        finish: 0,
        priority: 0,
        pending: 0,
        admitted_at_micros: 0,
    };

    #[inline]
    pub(crate) fn role(&self) -> Role {
        // Only written through `register`, which stores a valid discriminant
        Role::from_raw(self.role).unwrap_or(Role::Writer)
    }

    #[inline]
    pub(crate) fn range(&self) -> RecordRange {
        RecordRange::from_parts_unchecked(self.start, self.finish)
    }

    #[inline]
    pub(crate) fn claim(&self) -> Claim {
        Claim::new(self.role(), self.range())
    }
}

/// Result of a successful registration
///
/// 注册成功的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Registration {
    pub(crate) index: usize,
    pub(crate) priority: i64,
}

/// Lock-guarded table state stored in the region
///
/// 存放在区域中、受表锁保护的表状态
#[repr(C)]
pub(crate) struct TableState {
    capacity: u32,
    next_priority: i64,
    occupied: SlotSet,
    slots: [ParticipantSlot; MAX_SLOTS],
    pub(crate) registry: Registry,
}

impl TableState {
    /// Fresh table; `participants` seeds the priority ticket counter
    ///
    /// 新表；`participants` 作为优先级票号计数器的初始值
    pub(crate) fn new(capacity: usize, participants: i64) -> Self {
        Self {
            capacity: capacity.min(MAX_SLOTS) as u32,
            next_priority: participants,
            occupied: SlotSet::EMPTY,
            slots: [ParticipantSlot::EMPTY; MAX_SLOTS],
            registry: Registry::EMPTY,
        }
    }

    #[inline]
    pub(crate) fn capacity(&self) -> usize {
        self.capacity as usize
    }

    #[inline]
    pub(crate) fn next_priority(&self) -> i64 {
        self.next_priority
    }

    #[cfg(test)]
    pub(crate) fn occupancy(&self) -> usize {
        self.occupied.len()
    }

    /// Take the first free slot and stamp it with the caller's claim and a fresh ticket
    ///
    /// 占用第一个空闲槽位，写入调用者的请求并分配新的票号
    pub(crate) fn register(&mut self, owner: u32, claim: Claim, now_micros: u64) -> Result<Registration> {
        let index = self
            .occupied
            .first_absent(self.capacity())
            .ok_or(Error::TableFull)?;

        let priority = self.next_priority;
        self.next_priority -= 1;

        self.slots[index] = ParticipantSlot {
            owner,
            role: claim.role as u32,
            start: claim.range.start(),
            finish: claim.range.finish(),
            priority,
            pending: 0,
            admitted_at_micros: now_micros,
        };
        self.occupied.insert(index);

        Ok(Registration { index, priority })
    }

    /// Mark a slot free, returning what it held
    ///
    /// 将槽位标记为空闲，返回其原有内容
    pub(crate) fn unregister(&mut self, index: usize) -> Result<ParticipantSlot> {
        if !self.occupied.remove(index) {
            return Err(Error::ProtocolViolation("released a slot that is not occupied"));
        }
        Ok(self.slots[index])
    }

    #[inline]
    pub(crate) fn slot(&self, index: usize) -> Option<&ParticipantSlot> {
        self.occupied.contains(index).then(|| &self.slots[index])
    }

    #[inline]
    pub(crate) fn slot_mut(&mut self, index: usize) -> Option<&mut ParticipantSlot> {
        if self.occupied.contains(index) {
            Some(&mut self.slots[index])
        } else {
            None
        }
    }

    /// Occupied slots in index order
    ///
    /// 按下标顺序遍历已占用槽位
    pub(crate) fn occupied(&self) -> impl Iterator<Item = (usize, &ParticipantSlot)> + '_ {
        self.occupied.iter().map(move |i| (i, &self.slots[i]))
    }
}
