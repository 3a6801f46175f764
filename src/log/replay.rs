//! Log Replay
//!
//! Rebuilds the live item set by applying every record in log order:
//! Add upserts, Remove deletes. Replay only reads.
//!
//! A line that fails to decode (most often the torn tail of a crash during
//! append) is logged and skipped, and replay carries on with the next line.
//! Lines are read as raw bytes, so even a tail cut in the middle of a
//! multi-byte character only costs that one line.

use super::codec::{CodecError, Record};
use crate::item::Item;
use std::collections::HashMap;
use std::io::{self, BufRead};
use tracing::{debug, warn};

/// Outcome of a replay.
#[derive(Debug, Default)]
pub struct Replay {
    /// The live set, keyed by item id
    pub items: HashMap<String, Item>,

    /// Records applied
    pub applied: u64,

    /// Lines skipped because they did not decode
    pub skipped: u64,
}

impl Replay {
    /// Applies one record to the working set.
    pub fn apply(&mut self, record: Record) {
        match record {
            Record::Add { item, .. } => {
                self.items.insert(item.id.clone(), item);
            }
            Record::Remove { id, .. } => {
                self.items.remove(&id);
            }
        }
        self.applied += 1;
    }

    /// Summary without the item map.
    pub fn stats(&self) -> ReplayStats {
        ReplayStats {
            applied: self.applied,
            skipped: self.skipped,
            live: self.items.len(),
        }
    }
}

/// Counters reported by `load`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    pub applied: u64,
    pub skipped: u64,
    pub live: usize,
}

/// Reads `reader` to EOF and replays every decodable record.
///
/// Only genuine read errors are returned.
pub fn replay<R: BufRead>(mut reader: R) -> io::Result<Replay> {
    let mut replayed = Replay::default();
    let mut line = Vec::new();
    let mut line_no = 0u64;

    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;

        match Record::decode(&line) {
            Ok(record) => replayed.apply(record),
            Err(CodecError::Empty) => continue,
            Err(e) => {
                let torn = !line.ends_with(b"\n");
                warn!(line = line_no, torn, error = %e, "Skipping undecodable log record");
                replayed.skipped += 1;
            }
        }
    }

    debug!(
        applied = replayed.applied,
        skipped = replayed.skipped,
        live = replayed.items.len(),
        "Log replay finished"
    );

    Ok(replayed)
}
