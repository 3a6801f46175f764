//! In-Memory Item Index
//!
//! The authoritative view of the live item set: a `HashMap` keyed by item id
//! behind a single reader/writer lock.
//!
//! ## Concurrency Model
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ItemIndex                            │
//! │                                                             │
//! │   get / list / len ──> read lock   (many at once)           │
//! │   insert / remove  ──> write lock  (one at a time)          │
//! │   compaction/expiry ─> write lock held for the whole        │
//! │                        read-rebuild-replace sequence        │
//! │                                                             │
//! │              RwLock<HashMap<String, Item>>                  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! `parking_lot` locks are used so a panicking writer cannot poison the
//! index for every later caller.

use crate::item::Item;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;

/// Map from item id to item.
pub type ItemMap = HashMap<String, Item>;

/// Thread-safe live item set.
#[derive(Debug, Default)]
pub struct ItemIndex {
    items: RwLock<ItemMap>,
}

impl ItemIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites an item.
    ///
    /// # Returns
    ///
    /// Returns `true` if the id was not present before.
    pub fn insert(&self, item: Item) -> bool {
        let mut items = self.items.write();
        items.insert(item.id.clone(), item).is_none()
    }

    /// Removes an item, returning it if it was present.
    pub fn remove(&self, id: &str) -> Option<Item> {
        self.items.write().remove(id)
    }

    /// Looks up an item by id.
    pub fn get(&self, id: &str) -> Option<Item> {
        self.items.read().get(id).cloned()
    }

    /// All live items, newest first.
    ///
    /// Items created at the same instant are ordered by id, so the result is
    /// deterministic for a given snapshot.
    pub fn list(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.items.read().values().cloned().collect();
        sort_newest_first(&mut items);
        items
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Replaces the whole live set (used after replay).
    pub fn replace(&self, items: ItemMap) {
        *self.items.write() = items;
    }

    /// Takes the write lock for a multi-step maintenance operation.
    ///
    /// Must not be held across an `.await`.
    pub(crate) fn lock_exclusive(&self) -> RwLockWriteGuard<'_, ItemMap> {
        self.items.write()
    }
}

/// Sorts by `create_time` descending, then id ascending.
pub fn sort_newest_first(items: &mut [Item]) {
    items.sort_by(|a, b| {
        b.create_time
            .cmp(&a.create_time)
            .then_with(|| a.id.cmp(&b.id))
    });
}
