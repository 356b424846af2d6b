//! Admission gate: bounds how many participants are inside the coordinator at once
//!
//! 准入门：限制同时位于协调器内的参与者数量

use super::error::Result;
use super::region::RegionLayout;
use super::sync::Semaphore;

/// Counting gate in front of the slot table
///
/// 位于槽位表之前的计数门
///
/// Its permit count equals the table capacity, so a participant that got past
/// [`enter`](Self::enter) is guaranteed a free slot.
///
/// 许可数等于槽位表容量，因此通过 [`enter`](Self::enter) 的参与者必定能获得空闲槽位。
pub(crate) struct AdmissionGate<'a> {
    permits: &'a Semaphore,
}

impl<'a> AdmissionGate<'a> {
    #[inline]
    pub(crate) fn new(layout: &'a RegionLayout) -> Self {
        Self {
            permits: &layout.admission,
        }
    }

    /// Block until a permit is free, then take it
    ///
    /// 阻塞直到有空闲许可，然后获取
    pub(crate) fn enter(&self) -> Result<()> {
        self.permits.wait()?;
        Ok(())
    }

    /// Take a permit only if one is free right now
    ///
    /// 仅在当前有空闲许可时获取
    #[cfg(test)]
    pub(crate) fn try_enter(&self) -> Result<bool> {
        Ok(self.permits.try_wait()?)
    }

    /// Return a permit
    ///
    /// 归还许可
    pub(crate) fn leave(&self) -> Result<()> {
        self.permits.post()?;
        Ok(())
    }

    /// Free permits at this instant
    ///
    /// 此刻的空闲许可数
    pub(crate) fn available(&self) -> Result<usize> {
        Ok(self.permits.value()?.max(0) as usize)
    }
}
