//! Stats & logging rendezvous between reporters and the accountant
//!
//! 报告者与记账进程之间的统计与日志会合握手
//!
//! A reporter writes its message into the registry while holding the table lock, posts
//! `logger_wakeup` and parks on `logger_done`. The accountant wakes, copies the registry
//! and the table (the reporter is parked, so nothing changes underneath it), posts
//! `logger_done` and then writes the entry out. Every event is therefore logged exactly
//! once, in the order the table lock was taken.
//!
//! 报告者在持有表锁时将消息写入登记簿，投递 `logger_wakeup` 并阻塞在 `logger_done` 上。
//! 记账进程被唤醒后复制登记簿与表（报告者已挂起，数据不会变化），投递 `logger_done`，
//! 然后写出条目。因此每个事件按照获取表锁的顺序恰好被记录一次。

use super::error::Result;
use super::region::SharedRegion;
use super::registry::{Event, Snapshot};
use super::slots::TableState;
use super::sync::SemMutexGuard;
use std::io::Write;

/// Publish `event` and, when an accountant is expected, wait until it has been consumed
///
/// 发布 `event`；若有记账进程，则等待其消费完成
pub(crate) fn report(
    region: &SharedRegion,
    table: &mut SemMutexGuard<'_, TableState>,
    event: &Event,
) -> Result<()> {
    table.registry.set_message(&event.to_string());
    if !region.expects_accountant() {
        return Ok(());
    }

    let layout = region.layout();
    layout.logger_wakeup.post()?;
    layout.logger_done.wait()?;
    Ok(())
}

/// Consumer side of the rendezvous
///
/// 会合握手的消费端
///
/// # Examples
///
/// ```no_run
/// use ranged_gate::{Accountant, SharedRegion};
/// use std::fs::File;
///
/// # fn main() -> ranged_gate::Result<()> {
/// let region = SharedRegion::attach("/dev/shm/ranged-gate")?;
/// let logged = Accountant::new(region, File::create("log/events.log")?).run()?;
/// println!("{logged} events logged");
/// # Ok(())
/// # }
/// ```
pub struct Accountant<W> {
    region: SharedRegion,
    sink: W,
    logged: u64,
}

impl<W: Write> Accountant<W> {
    pub fn new(region: SharedRegion, sink: W) -> Self {
        Self {
            region,
            sink,
            logged: 0,
        }
    }

    /// Serve events until shutdown is requested, returning how many were logged
    ///
    /// 持续处理事件直到收到关闭请求，返回记录的事件数
    pub fn run(mut self) -> Result<u64> {
        tracing::debug!(path = %self.region.path().display(), "accountant started");
        let layout = self.region.layout();

        loop {
            layout.logger_wakeup.wait()?;
            if self.region.shutdown_requested() {
                break;
            }

            // Safety: the reporter holds the table lock and stays parked on logger_done
            // until the post below
            // Safety: 报告者持有表锁，并在下方投递之前一直阻塞在 logger_done 上
            let snapshot = Snapshot::capture(unsafe { layout.table.data_on_behalf() });
            layout.logger_done.post()?;

            self.sink.write_all(snapshot.accountant_entry().as_bytes())?;
            self.logged += 1;
            tracing::trace!(events = self.logged, "logged event");
        }

        self.sink.flush()?;
        tracing::debug!(events = self.logged, "accountant stopped");
        Ok(self.logged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::range::{Claim, RecordRange, Role};
    use crate::gate::region::RegionConfig;
    use tempfile::tempdir;

    fn event(owner: u32) -> Event {
        Event::Entered {
            owner,
            claim: Claim::new(Role::Reader, RecordRange::single(0)),
            delta: None,
        }
    }

    #[test]
    fn test_report_without_accountant_only_updates_registry() {
        let dir = tempdir().unwrap();
        let region = SharedRegion::create(dir.path().join("quiet.region"), RegionConfig::default()).unwrap();

        let mut table = region.layout().table.lock().unwrap();
        report(&region, &mut table, &event(5)).unwrap();
        assert_eq!(table.registry.message(), "READER [5] ENTERED and wants to read record 1.\n");
        assert_eq!(region.layout().logger_wakeup.value().unwrap(), 0);
    }

    #[test]
    fn test_accountant_logs_each_report_once() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("loud.region");
        let region = SharedRegion::create(&path, RegionConfig::default().with_accountant(true)).unwrap();

        let accountant = {
            let region = SharedRegion::attach(&path).unwrap();
            std::thread::spawn(move || {
                let mut sink = Vec::new();
                let logged = Accountant::new(region, &mut sink).run().unwrap();
                (logged, String::from_utf8(sink).unwrap())
            })
        };

        for owner in 1..=3 {
            let mut table = region.layout().table.lock().unwrap();
            report(&region, &mut table, &event(owner)).unwrap();
        }
        region.request_shutdown().unwrap();

        let (logged, out) = accountant.join().unwrap();
        assert_eq!(logged, 3);
        assert_eq!(out.matches("ACCOUNTANT").count(), 3);
        let first = out.find("READER [1]").unwrap();
        let second = out.find("READER [2]").unwrap();
        let third = out.find("READER [3]").unwrap();
        assert!(first < second && second < third);
    }
}
