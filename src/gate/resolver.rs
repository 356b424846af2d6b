//! Range conflict resolution by priority ticket
//!
//! 基于优先级票号的范围冲突解决
//!
//! Every participant receives a ticket when it registers; tickets strictly decrease, so a
//! larger ticket means an older participant. On entry a participant counts the older
//! occupants it conflicts with and waits until that count reaches zero. On exit it
//! decrements the count of every younger conflicting occupant and wakes those whose
//! count drops to zero.
//!
//! 每个参与者注册时获得一个票号；票号严格递减，因此票号越大表示越早到达。进入时参与者统计
//! 与其冲突的更早占用者数量，并等待该计数归零。退出时，将每个与其冲突的更晚占用者的计数减一，
//! 并唤醒计数归零者。
//!
//! Both scans run under the table lock. Counting only older occupants means a
//! participant can never be overtaken by a later arrival that conflicts with it, and the
//! exit scan is the exact inverse of the entry scans of everyone younger.
//!
//! 两次扫描都在表锁下进行。只统计更早的占用者意味着参与者永远不会被后到且冲突的参与者超越，
//! 且退出扫描恰好是所有更晚参与者进入扫描的逆操作。

use super::error::{Error, Result};
use super::slots::{SlotSet, TableState};

/// Entry scan: store and return how many older occupants conflict with slot `me`
///
/// 进入扫描：记录并返回与槽位 `me` 冲突的更早占用者数量
pub(crate) fn admit(table: &mut TableState, me: usize) -> Result<u32> {
    let mine = *table
        .slot(me)
        .ok_or(Error::ProtocolViolation("admitting a slot that is not registered"))?;
    let claim = mine.claim();

    let pending = table
        .occupied()
        .filter(|(index, other)| {
            *index != me && other.priority >= mine.priority && claim.conflicts_with(&other.claim())
        })
        .count() as u32;

    if let Some(slot) = table.slot_mut(me) {
        slot.pending = pending;
    }
    Ok(pending)
}

/// Exit scan: release slot `me`'s hold on every younger conflicting occupant
///
/// 退出扫描：解除槽位 `me` 对每个与其冲突的更晚占用者的阻塞
///
/// Returns the slots whose pending count reached zero; the caller posts their wake
/// semaphores. Nothing is mutated unless every target still has a positive count.
///
/// 返回计数归零的槽位；由调用者投递它们的唤醒信号量。只有在所有目标的计数都为正时才会修改状态。
pub(crate) fn depart(table: &mut TableState, me: usize) -> Result<SlotSet> {
    let mine = *table
        .slot(me)
        .ok_or(Error::ProtocolViolation("releasing a slot that is not registered"))?;
    if mine.pending != 0 {
        return Err(Error::ProtocolViolation("releasing a participant that was never admitted"));
    }
    release_younger(table, me)
}

/// Exit scan for a participant that gives up before it was admitted
///
/// 尚未被准入即放弃的参与者的退出扫描
///
/// Same as [`depart`] but `me` may still be waiting. Younger conflicting occupants
/// counted `me` on entry whether or not it ever ran, so they are released all the same.
///
/// 与 [`depart`] 相同，但 `me` 可能仍在等待。更晚的冲突占用者在进入时已将 `me` 计入，
/// 无论它是否运行过，都需要同样解除。
pub(crate) fn withdraw(table: &mut TableState, me: usize) -> Result<SlotSet> {
    release_younger(table, me)
}

fn release_younger(table: &mut TableState, me: usize) -> Result<SlotSet> {
    let Some(mine) = table.slot(me).copied() else {
        return Err(Error::ProtocolViolation("releasing a slot that is not registered"));
    };
    let claim = mine.claim();

    let mut targets = SlotSet::EMPTY;
    for (index, other) in table.occupied() {
        if index == me || other.priority > mine.priority || !claim.conflicts_with(&other.claim()) {
            continue;
        }
        if other.pending == 0 {
            return Err(Error::ProtocolViolation("conflict count would drop below zero"));
        }
        targets.insert(index);
    }

    let mut woken = SlotSet::EMPTY;
    for index in targets.iter() {
        if let Some(slot) = table.slot_mut(index) {
            slot.pending -= 1;
            if slot.pending == 0 {
                woken.insert(index);
            }
        }
    }
    Ok(woken)
}
