//! Fixed-size customer records and the shared record file
//!
//! 定长客户记录与共享记录文件
//!
//! Records are addressed by 0-based index; record `i` starts at byte `i * RECORD_SIZE`.
//! User-facing ids (command line, event messages) are 1-based.
//!
//! 记录按 0 起始的下标寻址；第 `i` 条记录从字节 `i * RECORD_SIZE` 开始。
//! 面向用户的编号（命令行、事件消息）从 1 开始。

mod file;
mod layout;

pub use file::{BalanceUpdate, RecordFile};
pub use layout::{NAME_LEN, RECORD_SIZE, Record};
