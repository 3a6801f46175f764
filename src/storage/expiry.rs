//! Expiry Sweeper
//!
//! Items are not meant to live forever: a shared snippet or upload is
//! removed once it is older than the configured maximum age. Removing the
//! metadata is not enough, because file items point at payload bytes that a
//! collaborator wrote next to the log, and those have to go too.
//!
//! ## Design
//!
//! A sweep runs inside the persistence worker (on its expiry timer, or on
//! demand) and:
//! 1. Takes the index write lock and collects items with
//!    `now - create_time > max_age`
//! 2. Deletes the backing file of every expired file item (best effort)
//! 3. Computes the retained set
//! 4. Truncates the log if nothing is retained, otherwise atomically
//!    rewrites it with the retained items
//! 5. Drops the expired items from the index
//!
//! If step 4 fails the index keeps the expired items and the next sweep
//! tries again; files already deleted are then reported as missing.

use crate::error::Result;
use crate::item::Item;
use crate::log::LogFile;
use crate::storage::index::ItemIndex;
use chrono::{DateTime, Utc};
use std::fs;
use std::io;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What a sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Ids of the items that were expired
    pub expired: Vec<String>,

    /// Backing files deleted
    pub files_deleted: usize,

    /// Backing files that could not be deleted (missing or otherwise)
    pub file_errors: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty()
    }
}

/// Removes every item older than `max_age` at `now`.
pub fn sweep(
    index: &ItemIndex,
    log: &mut LogFile,
    max_age: Duration,
    now: DateTime<Utc>,
) -> Result<SweepReport> {
    let mut items = index.lock_exclusive();

    let expired: Vec<&Item> = items
        .values()
        .filter(|item| item.is_expired(max_age, now))
        .collect();

    if expired.is_empty() {
        debug!(max_age_secs = max_age.as_secs(), "No expired items");
        return Ok(SweepReport::default());
    }

    let mut report = SweepReport::default();
    for item in &expired {
        match remove_backing_file(item) {
            Ok(true) => report.files_deleted += 1,
            Ok(false) => {}
            Err(_) => report.file_errors += 1,
        }
        report.expired.push(item.id.clone());
    }

    let mut retained: Vec<&Item> = items
        .values()
        .filter(|item| !item.is_expired(max_age, now))
        .collect();
    retained.sort_by(|a, b| a.create_time.cmp(&b.create_time).then_with(|| a.id.cmp(&b.id)));

    if retained.is_empty() {
        log.truncate()?;
    } else {
        log.rewrite(retained.iter().copied())?;
    }

    for id in &report.expired {
        items.remove(id);
    }
    drop(items);

    info!(
        expired = report.expired.len(),
        files_deleted = report.files_deleted,
        file_errors = report.file_errors,
        max_age_secs = max_age.as_secs(),
        "Cleaned up expired items"
    );

    Ok(report)
}

/// Deletes the item's backing file, if it has one.
///
/// # Returns
///
/// - `Ok(true)` if a file was deleted
/// - `Ok(false)` if the item has no backing file
/// - `Err(e)` if deletion failed; the failure is already logged
pub fn remove_backing_file(item: &Item) -> io::Result<bool> {
    let Some(path) = item.backing_file() else {
        return Ok(false);
    };

    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(id = %item.id, path = %path.display(), "Deleted backing file");
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!(id = %item.id, path = %path.display(), "Backing file already gone");
            Err(e)
        }
        Err(e) => {
            warn!(id = %item.id, path = %path.display(), error = %e, "Failed to delete backing file");
            Err(e)
        }
    }
}
