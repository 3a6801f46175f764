//! Log Record Codec
//!
//! Each record is one self-contained JSON object terminated by `\n`:
//!
//! ```text
//! {"op":1,"item":{"id":"…","type":"text","content":"hello","create_time":"…"},"ts":1714557600}
//! {"op":2,"item":{"id":"…"},"ts":1714557601}
//! ```
//!
//! | op | meaning |
//! |----|---------|
//! | 1  | Add: `item` is the full item snapshot |
//! | 2  | Remove: only `item.id` is read |
//!
//! Because records are newline-delimited, a torn write only damages the line
//! it was writing. Decoding works line by line, so the reader can skip the
//! damaged line and keep everything before it.

use crate::item::Item;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while encoding or decoding a single log line.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The line holds no data
    #[error("empty record")]
    Empty,

    /// The line is not valid JSON for a record (often a torn tail)
    #[error("malformed record: {0}")]
    Json(#[from] serde_json::Error),

    /// The `op` tag is not one we know
    #[error("unknown operation tag: {0}")]
    UnknownOp(u8),

    /// An Add record whose item snapshot is incomplete
    #[error("add record for {id:?} carries no complete item")]
    MissingItem { id: String },
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Operation tag of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Remove,
}

impl Op {
    /// Numeric tag written to the log.
    pub fn code(self) -> u8 {
        match self {
            Op::Add => 1,
            Op::Remove => 2,
        }
    }

    /// Parses a numeric tag.
    pub fn from_code(code: u8) -> CodecResult<Self> {
        match code {
            1 => Ok(Op::Add),
            2 => Ok(Op::Remove),
            other => Err(CodecError::UnknownOp(other)),
        }
    }
}

/// A persisted mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    /// Insert or overwrite an item
    Add { item: Item, ts: i64 },
    /// Delete an item by id
    Remove { id: String, ts: i64 },
}

impl Record {
    /// An Add record stamped with the current time.
    pub fn add(item: Item) -> Self {
        Record::Add {
            item,
            ts: Utc::now().timestamp(),
        }
    }

    /// A Remove record stamped with the current time.
    pub fn remove(id: impl Into<String>) -> Self {
        Record::Remove {
            id: id.into(),
            ts: Utc::now().timestamp(),
        }
    }

    pub fn op(&self) -> Op {
        match self {
            Record::Add { .. } => Op::Add,
            Record::Remove { .. } => Op::Remove,
        }
    }

    /// The id of the item this record touches.
    pub fn id(&self) -> &str {
        match self {
            Record::Add { item, .. } => &item.id,
            Record::Remove { id, .. } => id,
        }
    }

    /// Encodes the record as one line, including the trailing `\n`.
    pub fn encode(&self) -> CodecResult<String> {
        let line = match self {
            Record::Add { item, ts } => serde_json::to_string(&RecordLine {
                op: Op::Add.code(),
                item: ItemField::Full(item.clone()),
                ts: *ts,
            })?,
            Record::Remove { id, ts } => serde_json::to_string(&RecordLine {
                op: Op::Remove.code(),
                item: ItemField::IdOnly { id: id.clone() },
                ts: *ts,
            })?,
        };

        let mut line = line;
        line.push('\n');
        Ok(line)
    }

    /// Decodes one line. Surrounding whitespace (including the `\n`) is ignored.
    pub fn decode(line: &[u8]) -> CodecResult<Self> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return Err(CodecError::Empty);
        }

        let raw: RecordLine = serde_json::from_slice(line)?;
        match (Op::from_code(raw.op)?, raw.item) {
            (Op::Add, ItemField::Full(item)) => Ok(Record::Add { item, ts: raw.ts }),
            (Op::Add, ItemField::IdOnly { id }) => Err(CodecError::MissingItem { id }),
            (Op::Remove, field) => Ok(Record::Remove {
                id: field.into_id(),
                ts: raw.ts,
            }),
        }
    }
}

/// Serde shape of one line.
#[derive(Serialize, Deserialize)]
struct RecordLine {
    op: u8,
    item: ItemField,
    #[serde(default)]
    ts: i64,
}

/// The `item` field: a full snapshot, or just an id for removals.
///
/// `Full` is tried first; anything carrying at least an `id` falls back to
/// `IdOnly`.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ItemField {
    Full(Item),
    IdOnly { id: String },
}

impl ItemField {
    fn into_id(self) -> String {
        match self {
            ItemField::Full(item) => item.id,
            ItemField::IdOnly { id } => id,
        }
    }
}
