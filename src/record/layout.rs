//! Fixed-size binary record layout
//!
//! 定长二进制记录布局

use std::borrow::Cow;
use std::fmt;

/// Width of each NUL-padded name field in bytes
///
/// 每个以 NUL 填充的姓名字段的字节宽度
pub const NAME_LEN: usize = 20;

/// Size of one encoded record in bytes
///
/// 单条编码记录的字节大小
pub const RECORD_SIZE: usize = 4 + NAME_LEN + NAME_LEN + 4;

const SURNAME_AT: usize = 4;
const NAME_AT: usize = SURNAME_AT + NAME_LEN;
const BALANCE_AT: usize = NAME_AT + NAME_LEN;

const _: () = assert!(RECORD_SIZE == 48);

/// One customer record
///
/// 一条客户记录
///
/// Encoded little-endian as `id: i32`, `surname: [u8; 20]`, `name: [u8; 20]`,
/// `balance: i32`. Names are NUL-padded and always keep at least one trailing NUL.
///
/// 以小端编码为 `id: i32`、`surname: [u8; 20]`、`name: [u8; 20]`、`balance: i32`。
/// 姓名以 NUL 填充，且末尾至少保留一个 NUL。
///
/// # Examples
///
/// ```
/// use ranged_gate::record::{RECORD_SIZE, Record};
///
/// let record = Record::new(7, "Lovelace", "Ada", 1200);
/// let bytes = record.encode();
/// assert_eq!(bytes.len(), RECORD_SIZE);
/// assert_eq!(Record::decode(&bytes), record);
/// assert_eq!(record.surname(), "Lovelace");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Record {
    pub id: i32,
    surname: [u8; NAME_LEN],
    name: [u8; NAME_LEN],
    pub balance: i32,
}

impl Record {
    /// Build a record, truncating names to fit their fields
    ///
    /// 构造记录，姓名过长时截断
    pub fn new(id: i32, surname: &str, name: &str, balance: i32) -> Self {
        Self {
            id,
            surname: pad(surname),
            name: pad(name),
            balance,
        }
    }

    pub fn surname(&self) -> Cow<'_, str> {
        unpad(&self.surname)
    }

    pub fn name(&self) -> Cow<'_, str> {
        unpad(&self.name)
    }

    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[..SURNAME_AT].copy_from_slice(&self.id.to_le_bytes());
        out[SURNAME_AT..NAME_AT].copy_from_slice(&self.surname);
        out[NAME_AT..BALANCE_AT].copy_from_slice(&self.name);
        out[BALANCE_AT..].copy_from_slice(&self.balance.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8; RECORD_SIZE]) -> Self {
        let mut id = [0u8; 4];
        let mut balance = [0u8; 4];
        let mut surname = [0u8; NAME_LEN];
        let mut name = [0u8; NAME_LEN];
        id.copy_from_slice(&bytes[..SURNAME_AT]);
        surname.copy_from_slice(&bytes[SURNAME_AT..NAME_AT]);
        name.copy_from_slice(&bytes[NAME_AT..BALANCE_AT]);
        balance.copy_from_slice(&bytes[BALANCE_AT..]);

        Self {
            id: i32::from_le_bytes(id),
            surname,
            name,
            balance: i32::from_le_bytes(balance),
        }
    }
}

/// Column layout used by the workers' output
impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<12} {:<12} {:<6} {:<6}",
            self.surname(),
            self.name(),
            self.id,
            self.balance
        )
    }
}

fn pad(text: &str) -> [u8; NAME_LEN] {
    let mut end = text.len().min(NAME_LEN - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut field = [0u8; NAME_LEN];
    field[..end].copy_from_slice(&text.as_bytes()[..end]);
    field
}

fn unpad(field: &[u8; NAME_LEN]) -> Cow<'_, str> {
    let end = field.iter().position(|b| *b == 0).unwrap_or(NAME_LEN);
    String::from_utf8_lossy(&field[..end])
}
