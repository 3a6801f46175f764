//! Store Facade
//!
//! [`Store`] is what collaborators hold. It owns the in-memory index, the
//! sending ends of the worker's channels and the worker's join handle.
//!
//! ## Request Flow
//!
//! ```text
//!   add / remove ──> ItemIndex (write lock) ──> records queue ──> worker ──> log
//!   get / list / len ──> ItemIndex (read lock)
//!   load / compact / cleanup_expired / sync ──> control queue ──> worker
//!   close ──> shutdown signal ──> worker drains, syncs, exits
//! ```
//!
//! The item API never fails. If the records queue stays full for longer
//! than `enqueue_timeout`, the notification is dropped with a warning: the
//! mutation is live in memory and reaches disk with the next compaction.

use crate::config::StoreConfig;
use crate::error::{Result, StoreError};
use crate::item::Item;
use crate::log::{LogFile, Record, ReplayStats};
use crate::storage::compaction::CompactionOutcome;
use crate::storage::expiry::{remove_backing_file, SweepReport};
use crate::storage::index::ItemIndex;
use crate::storage::worker::{Control, PersistenceWorker};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Capacity of the control queue; requests are rare and awaited.
const CONTROL_QUEUE_CAPACITY: usize = 16;

/// The storage contract used by HTTP and CLI collaborators.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Inserts or overwrites an item. Never fails.
    async fn add(&self, item: Item);

    /// Removes an item if present. Never fails.
    async fn remove(&self, id: &str);

    fn get(&self, id: &str) -> Option<Item>;

    /// All live items, newest first.
    fn list(&self) -> Vec<Item>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rebuilds the index from the log. Call once, before serving traffic.
    async fn load(&self) -> Result<ReplayStats>;

    async fn compact(&self) -> Result<CompactionOutcome>;

    async fn cleanup_expired(&self, max_age: Duration) -> Result<SweepReport>;

    /// Flushes pending records and releases the log.
    async fn close(&self) -> Result<()>;
}

/// Operation counters.
#[derive(Debug, Default)]
pub struct StoreStats {
    adds: AtomicU64,
    removes: AtomicU64,
    dropped_notifications: AtomicU64,
    expired: AtomicU64,
    compactions: AtomicU64,
}

impl StoreStats {
    pub(crate) fn record_expired(&self, count: usize) {
        self.expired.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_compaction(&self) {
        self.compactions.fetch_add(1, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters.
    pub fn snapshot(&self, items: usize) -> StatsSnapshot {
        StatsSnapshot {
            items: items as u64,
            adds: self.adds.load(Ordering::Relaxed),
            removes: self.removes.load(Ordering::Relaxed),
            dropped_notifications: self.dropped_notifications.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            compactions: self.compactions.load(Ordering::Relaxed),
        }
    }
}

/// Copy of [`StoreStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub items: u64,
    pub adds: u64,
    pub removes: u64,
    pub dropped_notifications: u64,
    pub expired: u64,
    pub compactions: u64,
}

/// An open item store.
///
/// # Example
///
/// ```no_run
/// use stashlog::{Item, Store, StoreConfig};
///
/// # async fn run() -> stashlog::Result<()> {
/// let store = Store::open(StoreConfig::builder().data_dir("./download").build())?;
/// store.load().await?;
///
/// let note = Item::text("hello");
/// store.add(note.clone()).await;
/// assert_eq!(store.get(&note.id), Some(note));
///
/// store.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Store {
    index: Arc<ItemIndex>,
    stats: Arc<StoreStats>,
    records: mpsc::Sender<Record>,
    control: mpsc::Sender<Control>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<Result<()>>>>,
    enqueue_timeout: Duration,
    log_path: PathBuf,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("log_path", &self.log_path)
            .field("items", &self.index.len())
            .finish()
    }
}

impl Store {
    /// Opens the log and starts the persistence worker.
    ///
    /// Creates the data directory if needed. Must be called from within a
    /// Tokio runtime. The index starts empty; call [`Store::load`] next.
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let log_path = config.log_path();
        let log = LogFile::open(&log_path)?;
        info!(path = %log_path.display(), "Opened item log");

        let index = Arc::new(ItemIndex::new());
        let stats = Arc::new(StoreStats::default());
        let (records_tx, records_rx) = mpsc::channel(config.queue_capacity);
        let (control_tx, control_rx) = mpsc::channel(CONTROL_QUEUE_CAPACITY);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let enqueue_timeout = config.enqueue_timeout;

        let worker = PersistenceWorker::new(
            log,
            Arc::clone(&index),
            Arc::clone(&stats),
            records_rx,
            control_rx,
            shutdown_rx,
            config,
        );
        let handle = tokio::spawn(worker.run());

        Ok(Self {
            index,
            stats,
            records: records_tx,
            control: control_tx,
            shutdown: shutdown_tx,
            worker: Mutex::new(Some(handle)),
            enqueue_timeout,
            log_path,
        })
    }

    /// Path of the log file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Inserts or overwrites an item, then queues its durability record.
    pub async fn add(&self, item: Item) {
        let record = Record::add(item.clone());
        self.index.insert(item);
        self.stats.adds.fetch_add(1, Ordering::Relaxed);
        self.notify(record).await;
    }

    /// Removes an item (absent ids are fine), then queues a Remove record.
    pub async fn remove(&self, id: &str) {
        self.remove_entry(id).await;
    }

    /// Removes an item and best-effort deletes its backing file.
    ///
    /// Returns the removed item. A failed file deletion is logged and does
    /// not undo the removal.
    pub async fn purge(&self, id: &str) -> Option<Item> {
        let item = self.remove_entry(id).await?;
        // Deletion failures are logged inside and never undo the removal
        if remove_backing_file(&item).is_err() {
            debug!(id, "Backing file left in place after purge");
        }
        Some(item)
    }

    async fn remove_entry(&self, id: &str) -> Option<Item> {
        let removed = self.index.remove(id);
        self.stats.removes.fetch_add(1, Ordering::Relaxed);
        self.notify(Record::remove(id)).await;
        removed
    }

    /// Looks up an item by id.
    pub fn get(&self, id: &str) -> Option<Item> {
        self.index.get(id)
    }

    /// All live items, newest first.
    pub fn list(&self) -> Vec<Item> {
        self.index.list()
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.index.len())
    }

    /// Replays the log into the index.
    pub async fn load(&self) -> Result<ReplayStats> {
        self.request(Control::Load).await
    }

    /// Compacts the log now.
    pub async fn compact(&self) -> Result<CompactionOutcome> {
        self.request(Control::Compact).await
    }

    /// Sweeps items older than `max_age` now.
    pub async fn cleanup_expired(&self, max_age: Duration) -> Result<SweepReport> {
        self.request(|reply| Control::Expire(max_age, reply)).await
    }

    /// Appends everything queued so far and fsyncs the log.
    pub async fn sync(&self) -> Result<()> {
        self.request(Control::Sync).await
    }

    /// Stops the worker after it has drained the queue and synced the log.
    ///
    /// Closing twice is a no-op. Item calls made after close still update
    /// memory, but their records are dropped.
    pub async fn close(&self) -> Result<()> {
        let handle = self.worker.lock().take();
        let Some(handle) = handle else {
            return Ok(());
        };

        let _ = self.shutdown.send(true);
        match handle.await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "Persistence worker task failed");
                Err(StoreError::WorkerUnavailable)
            }
        }
    }

    /// Queues a durability record, waiting at most `enqueue_timeout`.
    async fn notify(&self, record: Record) {
        match self.records.send_timeout(record, self.enqueue_timeout).await {
            Ok(()) => {}
            Err(SendTimeoutError::Timeout(record)) => {
                self.stats.dropped_notifications.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = record.id(),
                    op = ?record.op(),
                    timeout_ms = self.enqueue_timeout.as_millis() as u64,
                    "Persistence queue full, dropping notification"
                );
            }
            Err(SendTimeoutError::Closed(record)) => {
                self.stats.dropped_notifications.fetch_add(1, Ordering::Relaxed);
                warn!(
                    id = record.id(),
                    op = ?record.op(),
                    "Persistence worker stopped, dropping notification"
                );
            }
        }
    }

    /// Sends a control request and waits for the worker's answer.
    async fn request<T, F>(&self, make: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Control,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.control
            .send(make(reply_tx))
            .await
            .map_err(|_| StoreError::WorkerUnavailable)?;

        reply_rx.await.map_err(|_| StoreError::WorkerUnavailable)?
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // The worker still drains and syncs on its own; nobody awaits it
        if self.worker.get_mut().is_some() {
            debug!("Store dropped without close, signalling worker");
            let _ = self.shutdown.send(true);
        }
    }
}

#[async_trait]
impl Storage for Store {
    async fn add(&self, item: Item) {
        Store::add(self, item).await
    }

    async fn remove(&self, id: &str) {
        Store::remove(self, id).await
    }

    fn get(&self, id: &str) -> Option<Item> {
        Store::get(self, id)
    }

    fn list(&self) -> Vec<Item> {
        Store::list(self)
    }

    fn len(&self) -> usize {
        Store::len(self)
    }

    async fn load(&self) -> Result<ReplayStats> {
        Store::load(self).await
    }

    async fn compact(&self) -> Result<CompactionOutcome> {
        Store::compact(self).await
    }

    async fn cleanup_expired(&self, max_age: Duration) -> Result<SweepReport> {
        Store::cleanup_expired(self, max_age).await
    }

    async fn close(&self) -> Result<()> {
        Store::close(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SyncPolicy;
    use crate::item::{FileKind, FileMeta};
    use crate::storage::compaction::compact;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::fs;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig::builder()
            .data_dir(dir.path())
            .max_age(None)
            .compact_min_bytes(0)
            .build()
    }

    async fn open(dir: &TempDir) -> Store {
        let store = Store::open(config(dir)).unwrap();
        store.load().await.unwrap();
        store
    }

    fn image(dir: &TempDir, name: &str) -> Item {
        fs::write(dir.path().join(name), b"\x89PNG").unwrap();
        Item::file(
            FileKind::Image,
            FileMeta {
                save_name: name.to_string(),
                path: dir.path().to_string_lossy().into_owned(),
                original_name: name.to_string(),
                size: 4,
                content_type: "image/png".to_string(),
            },
        )
    }

    #[tokio::test]
    async fn test_add_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        assert!(store.is_empty());

        let item = Item::text("hello");
        store.add(item.clone()).await;
        assert_eq!(store.get(&item.id), Some(item.clone()));
        assert_eq!(store.len(), 1);

        store.remove(&item.id).await;
        assert_eq!(store.get(&item.id), None);
        assert!(store.is_empty());

        // Removing an absent id is fine
        store.remove("missing").await;
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_reopen_restores_live_set() {
        let dir = TempDir::new().unwrap();

        let text = Item::text("hello");
        let picture = image(&dir, "a.png");
        {
            let store = open(&dir).await;
            store.add(text.clone()).await;
            assert_eq!(store.len(), 1);
            store.add(picture.clone()).await;
            assert_eq!(store.len(), 2);
            store.remove(&text.id).await;
            assert_eq!(store.len(), 1);
            assert_eq!(store.get(&text.id), None);
            store.close().await.unwrap();
        }

        let store = open(&dir).await;
        assert_eq!(store.len(), 1);
        assert_eq!(store.list()[0].id, picture.id);
        assert_eq!(store.get(&picture.id), Some(picture));
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_load_reports_replay_stats() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            let item = Item::text("x");
            store.add(item.clone()).await;
            store.remove(&item.id).await;
            store.add(Item::text("y")).await;
            store.close().await.unwrap();
        }

        let store = Store::open(config(&dir)).unwrap();
        let stats = store.load().await.unwrap();
        assert_eq!(stats.applied, 3);
        assert_eq!(stats.skipped, 0);
        assert_eq!(stats.live, 1);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_cleanup_expired_deletes_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let picture = image(&dir, "old.png");
        let file_path = picture.backing_file().unwrap();
        store.add(picture.clone()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let report = store.cleanup_expired(Duration::ZERO).await.unwrap();
        assert_eq!(report.expired, vec![picture.id.clone()]);
        assert_eq!(report.files_deleted, 1);
        assert!(!file_path.exists());
        assert!(store.is_empty());
        assert_eq!(store.stats().expired, 1);

        store.close().await.unwrap();
        let store = open(&dir).await;
        assert!(store.is_empty());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_deletes_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let picture = image(&dir, "gone.png");
        let file_path = picture.backing_file().unwrap();
        store.add(picture.clone()).await;

        assert_eq!(store.purge(&picture.id).await, Some(picture));
        assert!(!file_path.exists());
        assert_eq!(store.purge("missing").await, None);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_keeps_backing_file() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let picture = image(&dir, "kept.png");
        store.add(picture.clone()).await;
        store.remove(&picture.id).await;

        assert!(picture.backing_file().unwrap().exists());
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_compact_through_store() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let mut kept = Vec::new();
        for i in 0..20 {
            let item = Item::text(format!("{}", i));
            store.add(item.clone()).await;
            if i % 4 == 0 {
                kept.push(item);
            } else {
                store.remove(&item.id).await;
            }
        }

        let outcome = store.compact().await.unwrap();
        assert!(outcome.is_rewritten());
        let again = store.compact().await.unwrap();
        match (outcome, again) {
            (
                CompactionOutcome::Rewritten { after_bytes: a, items: n, .. },
                CompactionOutcome::Rewritten { after_bytes: b, items: m, .. },
            ) => {
                assert_eq!(n, kept.len());
                assert_eq!(m, kept.len());
                assert_eq!(a, b);
            }
            other => panic!("expected two rewrites, got {:?}", other),
        }
        assert_eq!(store.stats().compactions, 2);
        store.close().await.unwrap();

        let store = open(&dir).await;
        assert_eq!(store.len(), kept.len());
        for item in &kept {
            assert_eq!(store.get(&item.id).as_ref(), Some(item));
        }
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_torn_tail_loses_only_last_record() {
        let dir = TempDir::new().unwrap();
        let first = Item::text("first");
        let second = Item::text("second");
        {
            let store = open(&dir).await;
            store.add(first.clone()).await;
            store.add(second.clone()).await;
            store.close().await.unwrap();
        }

        // Chop the last record in half, as a crash mid-write would
        let path = config(&dir).log_path();
        let bytes = fs::read(&path).unwrap();
        let last_start = bytes[..bytes.len() - 1]
            .iter()
            .rposition(|b| *b == b'\n')
            .unwrap()
            + 1;
        let cut = last_start + (bytes.len() - last_start) / 2;
        fs::write(&path, &bytes[..cut]).unwrap();

        let store = Store::open(config(&dir)).unwrap();
        let stats = store.load().await.unwrap();
        assert_eq!(stats.skipped, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&first.id), Some(first));

        // New appends land on their own line after the damaged one
        let third = Item::text("third");
        store.add(third.clone()).await;
        store.close().await.unwrap();

        let store = open(&dir).await;
        assert_eq!(store.len(), 2);
        assert!(store.get(&third.id).is_some());
        store.close().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(open(&dir).await);

        let mut handles = Vec::new();
        for t in 0..4 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let item = Item::text(format!("{}-{}", t, i));
                    let id = item.id.clone();
                    store.add(item).await;
                    if i % 2 == 1 {
                        store.remove(&id).await;
                    }
                    assert_eq!(store.get(&id).is_some(), i % 2 == 0);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(store.len(), 4 * 25);
        assert_eq!(store.list().len(), store.len());
        store.close().await.unwrap();

        let store = open(&dir).await;
        assert_eq!(store.len(), 4 * 25);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_calls_after_close() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;
        store.close().await.unwrap();
        store.close().await.unwrap();

        let item = Item::text("late");
        store.add(item.clone()).await;
        assert_eq!(store.get(&item.id), Some(item));
        assert_eq!(store.stats().dropped_notifications, 1);

        assert!(matches!(store.compact().await, Err(StoreError::WorkerUnavailable)));
    }

    #[tokio::test]
    async fn test_drop_without_close_flushes() {
        let dir = TempDir::new().unwrap();
        let item = Item::text("dropped store");
        {
            let store = open(&dir).await;
            store.add(item.clone()).await;
        }

        // The worker finishes on its own; wait until the record is on disk
        let path = config(&dir).log_path();
        for _ in 0..100 {
            if fs::metadata(&path).map(|m| m.len() > 0).unwrap_or(false) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let mut log = LogFile::open(&path).unwrap();
        let replayed = log.replay().unwrap();
        assert_eq!(replayed.items.get(&item.id), Some(&item));
    }

    #[tokio::test]
    async fn test_open_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .queue_capacity(0)
            .build();
        assert!(matches!(Store::open(config), Err(StoreError::Config(_))));
    }

    #[tokio::test]
    async fn test_storage_trait_object() {
        let dir = TempDir::new().unwrap();
        let store: Box<dyn Storage> = Box::new(open(&dir).await);

        let item = Item::text("via trait");
        store.add(item.clone()).await;
        assert_eq!(store.list(), vec![item]);
        assert!(!store.is_empty());
        store.close().await.unwrap();
    }

    /// A store with no worker behind its records queue.
    fn detached(capacity: usize, enqueue_timeout: Duration) -> (Store, mpsc::Receiver<Record>) {
        let (records, records_rx) = mpsc::channel(capacity);
        let (control, _) = mpsc::channel(1);
        let (shutdown, _) = watch::channel(false);
        let store = Store {
            index: Arc::new(ItemIndex::new()),
            stats: Arc::default(),
            records,
            control,
            shutdown,
            worker: Mutex::new(None),
            enqueue_timeout,
            log_path: PathBuf::new(),
        };
        (store, records_rx)
    }

    fn replay_log(dir: &TempDir) -> crate::log::Replay {
        LogFile::open(config(dir).log_path())
            .unwrap()
            .replay()
            .unwrap()
    }

    #[tokio::test]
    async fn test_maintenance_before_load_is_refused() {
        let dir = TempDir::new().unwrap();
        let item = Item::text("durable");
        {
            let store = open(&dir).await;
            store.add(item.clone()).await;
            store.close().await.unwrap();
        }

        let path = config(&dir).log_path();
        let before = fs::read(&path).unwrap();

        let store = Store::open(config(&dir)).unwrap();
        assert!(matches!(store.compact().await, Err(StoreError::NotLoaded)));
        assert!(matches!(
            store.cleanup_expired(Duration::ZERO).await,
            Err(StoreError::NotLoaded)
        ));
        assert_eq!(fs::read(&path).unwrap(), before);

        store.load().await.unwrap();
        assert!(store.compact().await.unwrap().is_rewritten());
        assert_eq!(store.get(&item.id), Some(item));
        store.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_compaction_timer_waits_for_load() {
        let dir = TempDir::new().unwrap();
        {
            let store = open(&dir).await;
            store.add(Item::text("durable")).await;
            store.close().await.unwrap();
        }
        let path = config(&dir).log_path();
        let before = fs::read(&path).unwrap();

        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .max_age(Some(Duration::ZERO))
            .compact_min_bytes(0)
            .compact_interval(Duration::from_secs(1))
            .expiry_interval(Duration::from_secs(1))
            .build();
        let store = Store::open(config).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(store.stats().compactions, 0);
        store.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_compaction_timer_rewrites_log() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .max_age(None)
            .compact_min_bytes(0)
            .compact_interval(Duration::from_secs(1))
            .build();
        let store = Store::open(config).unwrap();
        store.load().await.unwrap();

        let keep = Item::text("keep");
        for i in 0..9 {
            let item = Item::text(format!("churn {}", i));
            store.add(item.clone()).await;
            store.remove(&item.id).await;
        }
        store.add(keep.clone()).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.stats().compactions, 1);

        let replayed = replay_log(&dir);
        assert_eq!(replayed.applied, 1);
        assert_eq!(replayed.items.get(&keep.id), Some(&keep));
        store.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry_timer_sweeps_old_items() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .max_age(Some(Duration::from_secs(24 * 60 * 60)))
            .expiry_interval(Duration::from_secs(1))
            .build();
        let store = Store::open(config).unwrap();
        store.load().await.unwrap();

        let old = image(&dir, "old.png").with_create_time(Utc::now() - ChronoDuration::days(2));
        let fresh = Item::text("fresh");
        store.add(old.clone()).await;
        store.add(fresh.clone()).await;

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(store.get(&old.id), None);
        assert!(!old.backing_file().unwrap().exists());
        assert_eq!(store.stats().expired, 1);

        let replayed = replay_log(&dir);
        assert_eq!(replayed.items.len(), 1);
        assert!(replayed.items.contains_key(&fresh.id));
        store.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sync_policy() {
        let dir = TempDir::new().unwrap();
        let config = StoreConfig::builder()
            .data_dir(dir.path())
            .max_age(None)
            .sync_policy(SyncPolicy::Periodic)
            .sync_interval(Duration::from_secs(1))
            .build();
        let store = Store::open(config).unwrap();
        store.load().await.unwrap();

        let item = Item::text("synced later");
        store.add(item.clone()).await;
        tokio::time::sleep(Duration::from_millis(1500)).await;

        assert_eq!(replay_log(&dir).items.get(&item.id), Some(&item));
        store.sync().await.unwrap();
        store.close().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_queue_drops_notification_but_keeps_item() {
        let (store, mut queued) = detached(1, Duration::from_millis(50));

        let first = Item::text("first");
        let second = Item::text("second");
        store.add(first.clone()).await;
        store.add(second.clone()).await;

        assert_eq!(store.stats().dropped_notifications, 1);
        assert_eq!(store.len(), 2);
        assert_eq!(queued.try_recv().unwrap().id(), first.id);
        assert!(queued.try_recv().is_err());

        // The next compaction writes what the queue could not take
        let dir = TempDir::new().unwrap();
        let mut log = LogFile::open(config(&dir).log_path()).unwrap();
        log.append(&Record::add(first.clone())).unwrap();
        compact(&store.index, &mut log, 0).unwrap();

        let replayed = log.replay().unwrap();
        assert_eq!(replayed.items.get(&first.id), Some(&first));
        assert_eq!(replayed.items.get(&second.id), Some(&second));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_maintenance_on_multi_thread_runtime() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let old = Item::text("old").with_create_time(Utc::now() - ChronoDuration::hours(1));
        let fresh = Item::text("fresh");
        store.add(old.clone()).await;
        store.add(fresh.clone()).await;

        let report = store.cleanup_expired(Duration::from_secs(60)).await.unwrap();
        assert_eq!(report.expired, vec![old.id.clone()]);
        assert!(store.compact().await.unwrap().is_rewritten());
        store.close().await.unwrap();

        let store = open(&dir).await;
        assert_eq!(store.list(), vec![fresh]);
        store.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_purge_with_missing_file_still_removes() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir).await;

        let picture = image(&dir, "vanished.png");
        fs::remove_file(picture.backing_file().unwrap()).unwrap();
        store.add(picture.clone()).await;

        assert_eq!(store.purge(&picture.id).await, Some(picture.clone()));
        assert_eq!(store.get(&picture.id), None);
        store.close().await.unwrap();
    }
}
