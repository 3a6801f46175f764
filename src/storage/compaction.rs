//! Log Compaction
//!
//! Every add and remove grows the log, even when the live set stays
//! small. Compaction rewrites the log as one Add record per live item,
//! which drops Remove records, overwritten Adds and the Adds they cancel.
//!
//! The live set comes from the index rather than from a fresh replay. The
//! index is never older than the log, so this also re-persists mutations
//! whose durability notification was dropped on a full queue.
//!
//! The index write lock is held from snapshot to rename, so no foreground
//! writer can slip a mutation between "what we wrote" and "what is live".

use crate::error::Result;
use crate::item::Item;
use crate::log::LogFile;
use crate::storage::index::ItemIndex;
use tracing::{debug, info};

/// What a compaction run did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactionOutcome {
    /// The log was below the size threshold and was left alone
    Skipped { log_bytes: u64 },

    /// The log was atomically replaced
    Rewritten {
        before_bytes: u64,
        after_bytes: u64,
        items: usize,
    },
}

impl CompactionOutcome {
    pub fn is_rewritten(&self) -> bool {
        matches!(self, CompactionOutcome::Rewritten { .. })
    }
}

/// Compacts `log` down to the current contents of `index`.
///
/// Logs smaller than `min_bytes` are skipped. On error the original log is
/// left as it was.
pub fn compact(index: &ItemIndex, log: &mut LogFile, min_bytes: u64) -> Result<CompactionOutcome> {
    let items = index.lock_exclusive();

    let before_bytes = log.len()?;
    if before_bytes < min_bytes {
        debug!(
            log_bytes = before_bytes,
            min_bytes, "Log below compaction threshold, skipping"
        );
        return Ok(CompactionOutcome::Skipped {
            log_bytes: before_bytes,
        });
    }

    // Oldest first, so a replay inserts in creation order
    let mut live: Vec<&Item> = items.values().collect();
    live.sort_by(|a, b| a.create_time.cmp(&b.create_time).then_with(|| a.id.cmp(&b.id)));

    let after_bytes = log.rewrite(live.iter().copied())?;
    let count = live.len();
    drop(items);

    info!(
        before_bytes,
        after_bytes,
        items = count,
        "Log compacted"
    );

    Ok(CompactionOutcome::Rewritten {
        before_bytes,
        after_bytes,
        items: count,
    })
}
