//! Aggregate statistics, event messages and table snapshots
//!
//! 汇总统计、事件消息与表快照

use super::range::{Claim, Role};
use super::slots::TableState;
use std::fmt::{self, Write as _};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Capacity of the shared event message buffer in bytes
///
/// 共享事件消息缓冲区的字节容量
pub const MESSAGE_LEN: usize = 256;

/// Owner ids printed per line in a snapshot
///
/// 快照中每行打印的所有者 id 数
const OWNERS_PER_LINE: usize = 7;

/// Registry stored in the region, guarded by the table lock
///
/// 存放在区域中、受表锁保护的登记簿
#[repr(C)]
#[derive(Clone, Copy)]
pub(crate) struct Registry {
    message: [u8; MESSAGE_LEN],
    message_len: u32,
    finished: [u64; 2],
    records: [u64; 2],
    active_micros: [u64; 2],
    max_wait_micros: u64,
    events: u64,
}

impl Registry {
    pub(crate) const EMPTY: Registry = Registry {
        message: [0; MESSAGE_LEN],
        message_len: 0,
        finished: [0; 2],
        records: [0; 2],
        active_micros: [0; 2],
        max_wait_micros: 0,
        events: 0,
    };

    /// Replace the pending message, truncating on a character boundary
    ///
    /// 替换待记录消息，按字符边界截断
    pub(crate) fn set_message(&mut self, text: &str) {
        let mut end = text.len().min(MESSAGE_LEN);
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        self.message[..end].copy_from_slice(&text.as_bytes()[..end]);
        self.message_len = end as u32;
        self.events += 1;
    }

    pub(crate) fn message(&self) -> &str {
        let len = (self.message_len as usize).min(MESSAGE_LEN);
        std::str::from_utf8(&self.message[..len]).unwrap_or_default()
    }

    /// Fold one finished participant into the aggregates
    ///
    /// 将一个已完成的参与者计入汇总
    pub(crate) fn record_exit(&mut self, role: Role, records: u64, active: Duration, waited: Duration) {
        let r = role.index();
        self.finished[r] += 1;
        self.records[r] += records;
        self.active_micros[r] = self.active_micros[r].saturating_add(duration_micros(active));
        self.max_wait_micros = self.max_wait_micros.max(duration_micros(waited));
    }

    pub(crate) fn stats(&self) -> Stats {
        Stats {
            finished: self.finished,
            records: self.records,
            active: self.active_micros.map(Duration::from_micros),
            max_wait: Duration::from_micros(self.max_wait_micros),
            events: self.events,
        }
    }
}

#[inline]
fn duration_micros(d: Duration) -> u64 {
    u64::try_from(d.as_micros()).unwrap_or(u64::MAX)
}

/// Microseconds since the Unix epoch, the clock shared by all processes
///
/// 自 Unix 纪元起的微秒数，所有进程共享的时钟
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_micros)
        .unwrap_or(0)
}

/// Copy of the aggregate statistics
///
/// 汇总统计的副本
///
/// # Examples
///
/// ```
/// use ranged_gate::{Stats, Role};
///
/// let stats = Stats::default();
/// assert_eq!(stats.records_processed(), 0);
/// assert_eq!(stats.average_active(Role::Reader), std::time::Duration::ZERO);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Stats {
    finished: [u64; 2],
    records: [u64; 2],
    active: [Duration; 2],
    max_wait: Duration,
    events: u64,
}

impl Stats {
    /// Participants of `role` that have released
    ///
    /// 已释放的 `role` 角色参与者数
    #[inline]
    pub fn finished(&self, role: Role) -> u64 {
        self.finished[role.index()]
    }

    /// Records processed by participants of `role`
    ///
    /// `role` 角色参与者处理的记录数
    #[inline]
    pub fn records(&self, role: Role) -> u64 {
        self.records[role.index()]
    }

    /// Records processed by everyone
    ///
    /// 所有参与者处理的记录总数
    #[inline]
    pub fn records_processed(&self) -> u64 {
        self.records.iter().sum()
    }

    /// Cumulative active time (start to release) of `role`
    ///
    /// `role` 角色的累计活跃时间（从开始到释放）
    #[inline]
    pub fn active_time(&self, role: Role) -> Duration {
        self.active[role.index()]
    }

    /// Mean active time of `role`, zero when none finished
    ///
    /// `role` 角色的平均活跃时间，无人完成时为零
    pub fn average_active(&self, role: Role) -> Duration {
        match self.finished(role) {
            0 => Duration::ZERO,
            n => self.active_time(role).div_f64(n as f64),
        }
    }

    /// Longest time any participant waited to enter its critical section
    ///
    /// 任一参与者进入临界区前的最长等待时间
    #[inline]
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Number of events reported so far
    ///
    /// 目前已报告的事件数
    #[inline]
    pub fn events(&self) -> u64 {
        self.events
    }
}

/// End-of-run summary
impl fmt::Display for Stats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "- Readers finished: {}", self.finished(Role::Reader))?;
        writeln!(
            f,
            "- Average reader time: {:.4} (sec)",
            self.average_active(Role::Reader).as_secs_f64()
        )?;
        writeln!(f, "- Writers finished: {}", self.finished(Role::Writer))?;
        writeln!(
            f,
            "- Average writer time: {:.4} (sec)",
            self.average_active(Role::Writer).as_secs_f64()
        )?;
        writeln!(f, "- Maximum waiting time: {:.4} (sec)", self.max_wait.as_secs_f64())?;
        writeln!(f, "- Records processed: {}", self.records_processed())
    }
}

/// How a participant left its critical section
///
/// 参与者离开临界区的方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Outcome {
    /// A reader finished reading `records` records
    ///
    /// 读者读完 `records` 条记录
    Read { records: u64 },

    /// A writer updated one record's balance
    ///
    /// 写者更新了一条记录的余额
    Wrote { old_balance: i32, new_balance: i32 },

    /// The lease was dropped without an explicit release
    ///
    /// 租约未显式释放即被丢弃
    Abandoned,
}

impl Outcome {
    pub(crate) fn records(&self) -> u64 {
        match self {
            Outcome::Read { records } => *records,
            Outcome::Wrote { .. } => 1,
            Outcome::Abandoned => 0,
        }
    }
}

/// Event handed to the accountant through the rendezvous
///
/// 通过会合握手交给记账进程的事件
#[derive(Debug, Clone, Copy)]
pub(crate) enum Event {
    Entered {
        owner: u32,
        claim: Claim,
        delta: Option<i32>,
    },
    Exited {
        owner: u32,
        claim: Claim,
        outcome: Outcome,
    },
}

// Record ids are printed 1-based
impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Event::Entered { owner, claim, delta } => {
                let (first, last) = claim.range.ids();
                write!(f, "{} [{}] ENTERED", claim.role.label(), owner)?;
                match (claim.role, first == last) {
                    (Role::Reader, true) => write!(f, " and wants to read record {first}")?,
                    (Role::Reader, false) => {
                        write!(f, " and wants to read records {first} to {last}")?
                    }
                    (Role::Writer, true) => write!(f, " and wants to update record {first}")?,
                    (Role::Writer, false) => {
                        write!(f, " and wants to update records {first} to {last}")?
                    }
                }
                match delta {
                    Some(delta) => writeln!(f, " by {delta}."),
                    None => writeln!(f, "."),
                }
            }
            Event::Exited { owner, claim, outcome } => {
                write!(f, "{} [{}] EXITED", claim.role.label(), owner)?;
                match outcome {
                    Outcome::Read { records } => writeln!(f, " after reading {records} record(s)."),
                    Outcome::Wrote { old_balance, new_balance } => writeln!(
                        f,
                        "; record {} balance is now {} (was {}).",
                        claim.range.ids().0,
                        new_balance,
                        old_balance
                    ),
                    Outcome::Abandoned => writeln!(f, " without finishing its work on {}.", claim.range),
                }
            }
        }
    }
}

/// One occupied slot as seen in a snapshot
///
/// 快照中看到的一个已占用槽位
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SlotView {
    pub index: usize,
    pub owner: u32,
    pub claim: Claim,
    pub priority: i64,
    pub pending: u32,
    pub admitted_at: SystemTime,
}

impl SlotView {
    /// Still waiting on older conflicting participants
    ///
    /// 仍在等待更早的冲突参与者
    #[inline]
    pub fn is_blocked(&self) -> bool {
        self.pending > 0
    }
}

/// Point-in-time copy of the slot table and registry
///
/// 槽位表与登记簿的时间点副本
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Snapshot {
    pub capacity: usize,
    pub next_priority: i64,
    pub message: String,
    pub stats: Stats,
    pub slots: Vec<SlotView>,
}

impl Snapshot {
    pub(crate) fn capture(table: &TableState) -> Self {
        let slots = table
            .occupied()
            .map(|(index, slot)| SlotView {
                index,
                owner: slot.owner,
                claim: slot.claim(),
                priority: slot.priority,
                pending: slot.pending,
                admitted_at: UNIX_EPOCH + Duration::from_micros(slot.admitted_at_micros),
            })
            .collect();

        Self {
            capacity: table.capacity(),
            next_priority: table.next_priority(),
            message: table.registry.message().to_owned(),
            stats: table.registry.stats(),
            slots,
        }
    }

    /// Number of occupied slots
    ///
    /// 已占用槽位数
    #[inline]
    pub fn occupancy(&self) -> usize {
        self.slots.len()
    }

    /// First slot held by `owner`
    ///
    /// `owner` 持有的第一个槽位
    pub fn slot_of(&self, owner: u32) -> Option<&SlotView> {
        self.slots.iter().find(|s| s.owner == owner)
    }

    /// Log entry written by the accountant for one event
    ///
    /// 记账进程为一个事件写入的日志条目
    pub fn accountant_entry(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\t<{:=^90}>\n", " ACCOUNTANT ");
        let _ = writeln!(out, "- Message:\n{}", self.message);
        let _ = self.write_body(&mut out);
        out
    }

    fn write_owners(&self, out: &mut impl fmt::Write, role: Role) -> fmt::Result {
        let mut on_line = 0;
        for slot in self.slots.iter().filter(|s| s.claim.role == role) {
            let state = if slot.is_blocked() { 'B' } else { 'A' };
            write!(out, "| [{}/{}] ", slot.owner, state)?;
            on_line += 1;
            if on_line == OWNERS_PER_LINE {
                on_line = 0;
                writeln!(out, "|")?;
            }
        }
        if on_line != 0 {
            writeln!(out, "|")?;
        }
        Ok(())
    }

    fn write_body(&self, out: &mut impl fmt::Write) -> fmt::Result {
        writeln!(out, "- Readers (owner/state):")?;
        self.write_owners(out, Role::Reader)?;
        writeln!(out, "\n- Writers (owner/state):")?;
        self.write_owners(out, Role::Writer)?;
        writeln!(out)?;
        writeln!(out, "- Readers finished: {}", self.stats.finished(Role::Reader))?;
        writeln!(out, "- Writers finished: {}", self.stats.finished(Role::Writer))?;
        writeln!(out, "- Records read: {}", self.stats.records(Role::Reader))?;
        writeln!(out, "- Records written: {}", self.stats.records(Role::Writer))?;
        writeln!(out, "- Records processed: {}", self.stats.records_processed())?;
        writeln!(out, "\t<{}>\n", "=".repeat(90))
    }
}

/// On-demand logger dump
impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "\n\t<{:=^90}>\n", " LOGGER ")?;
        self.write_body(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::range::RecordRange;

    fn claim(role: Role, start: u64, finish: u64) -> Claim {
        Claim::new(role, RecordRange::new(start, finish).unwrap())
    }

    #[test]
    fn test_message_truncates_on_char_boundary() {
        let mut registry = Registry::EMPTY;
        // 每个汉字占 3 字节，256 不是 3 的倍数
        let text = "记".repeat(100);
        registry.set_message(&text);

        let message = registry.message();
        assert!(message.len() <= MESSAGE_LEN);
        assert_eq!(message.len(), 255);
        assert!(message.chars().all(|c| c == '记'));
        assert_eq!(registry.stats().events(), 1);
    }

    #[test]
    fn test_message_replaced_by_next_event() {
        let mut registry = Registry::EMPTY;
        registry.set_message("first, and rather long");
        registry.set_message("second");
        assert_eq!(registry.message(), "second");
        assert_eq!(registry.stats().events(), 2);
    }

    #[test]
    fn test_record_exit_accounting() {
        let mut registry = Registry::EMPTY;
        registry.record_exit(Role::Reader, 5, Duration::from_millis(300), Duration::from_millis(10));
        registry.record_exit(Role::Reader, 2, Duration::from_millis(100), Duration::from_millis(40));
        registry.record_exit(Role::Writer, 1, Duration::from_millis(50), Duration::from_millis(20));

        let stats = registry.stats();
        assert_eq!(stats.finished(Role::Reader), 2);
        assert_eq!(stats.finished(Role::Writer), 1);
        assert_eq!(stats.records(Role::Reader), 7);
        assert_eq!(stats.records(Role::Writer), 1);
        assert_eq!(stats.records_processed(), 8);
        assert_eq!(stats.active_time(Role::Reader), Duration::from_millis(400));
        assert_eq!(stats.average_active(Role::Reader), Duration::from_millis(200));
        assert_eq!(stats.max_wait(), Duration::from_millis(40));
    }

    #[test]
    fn test_outcome_records() {
        assert_eq!(Outcome::Read { records: 4 }.records(), 4);
        assert_eq!(Outcome::Wrote { old_balance: 1, new_balance: 2 }.records(), 1);
        assert_eq!(Outcome::Abandoned.records(), 0);
    }

    #[test]
    fn test_event_messages_are_one_based() {
        let entered = Event::Entered {
            owner: 7,
            claim: claim(Role::Reader, 0, 4),
            delta: None,
        };
        assert_eq!(entered.to_string(), "READER [7] ENTERED and wants to read records 1 to 5.\n");

        let entered = Event::Entered {
            owner: 8,
            claim: claim(Role::Writer, 2, 2),
            delta: Some(-30),
        };
        assert_eq!(entered.to_string(), "WRITER [8] ENTERED and wants to update record 3 by -30.\n");

        let exited = Event::Exited {
            owner: 8,
            claim: claim(Role::Writer, 2, 2),
            outcome: Outcome::Wrote { old_balance: 100, new_balance: 70 },
        };
        assert_eq!(exited.to_string(), "WRITER [8] EXITED; record 3 balance is now 70 (was 100).\n");
    }

    #[test]
    fn test_event_message_at_last_index() {
        // 最大索引 +1 不能溢出
        let entered = Event::Entered {
            owner: 9,
            claim: Claim::new(Role::Reader, RecordRange::single(u64::MAX)),
            delta: None,
        };
        assert_eq!(
            entered.to_string(),
            "READER [9] ENTERED and wants to read record 18446744073709551616.\n"
        );

        let exited = Event::Exited {
            owner: 9,
            claim: Claim::new(Role::Writer, RecordRange::single(u64::MAX)),
            outcome: Outcome::Wrote { old_balance: 1, new_balance: 2 },
        };
        assert!(exited.to_string().contains("record 18446744073709551616 balance"));
    }

    #[test]
    fn test_snapshot_marks_blocked_and_wraps_lines() {
        let mut table = Box::new(TableState::new(16, 20));
        for owner in 0..9 {
            table.register(100 + owner, claim(Role::Reader, 0, 0), 0).unwrap();
        }
        let writer = table.register(500, claim(Role::Writer, 0, 0), 0).unwrap();
        table.slot_mut(writer.index).unwrap().pending = 9;

        let snapshot = Snapshot::capture(&table);
        assert_eq!(snapshot.occupancy(), 10);
        assert!(snapshot.slot_of(500).unwrap().is_blocked());
        assert!(!snapshot.slot_of(100).unwrap().is_blocked());

        let dump = snapshot.to_string();
        assert!(dump.contains("LOGGER"));
        assert!(dump.contains("| [500/B] |"));
        // 7 个读者一行，剩余 2 个在第二行
        assert!(dump.contains("| [106/A] |\n| [107/A] | [108/A] |\n"));
    }

    #[test]
    fn test_accountant_entry_includes_message() {
        let mut table = Box::new(TableState::new(4, 1));
        table.registry.set_message("READER [1] ENTERED and wants to read record 1.\n");
        let entry = Snapshot::capture(&table).accountant_entry();
        assert!(entry.contains("ACCOUNTANT"));
        assert!(entry.contains("- Message:\nREADER [1] ENTERED"));
    }
}
