//! Background Persistence Worker
//!
//! A single Tokio task that exclusively owns the [`LogFile`]. Nothing else
//! writes the log; the rest of the store talks to the worker through
//! channels.
//!
//! ## Event Loop
//!
//! ```text
//!            ┌──────────────── records (bounded mpsc) ───── add / remove
//!            │┌─────────────── control (mpsc + oneshot) ─── load / compact / expire / sync
//!            ││┌────────────── sync timer
//!            │││┌───────────── compaction timer
//!            ││││┌──────────── expiry timer
//!            │││││┌─────────── shutdown (watch)
//!            ▼▼▼▼▼▼
//!   ┌───────────────────┐
//!   │  tokio::select!   │──> LogFile (append / sync / rewrite / truncate)
//!   └───────────────────┘
//! ```
//!
//! Compaction and expiry are plain synchronous calls inside the loop, so they
//! never run concurrently with each other or with an append, and a shutdown
//! signal cannot interrupt them halfway through a rename. Both rebuild the log
//! from the index, so they are refused until a load has succeeded.
//!
//! ## Blocking I/O
//!
//! Appends, fsyncs and rewrites are blocking file calls. On a multi-thread
//! runtime the replay and rewrite passes run under `block_in_place` so other
//! tasks move to another worker thread; on a current-thread runtime they run
//! inline. Hosts that care about latency under `SyncPolicy::EveryAppend`
//! should use the multi-thread runtime.
//!
//! ## Shutdown
//!
//! On shutdown, or once every sender is gone, the worker drains whatever is
//! still queued, syncs, and drops the file. Only a hard crash can lose a
//! queued record.

use crate::config::{StoreConfig, SyncPolicy};
use crate::error::{Result, StoreError};
use crate::log::{LogFile, Record, ReplayStats};
use crate::storage::compaction::{compact, CompactionOutcome};
use crate::storage::expiry::{sweep, SweepReport};
use crate::storage::index::ItemIndex;
use crate::storage::store::StoreStats;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info, trace, warn};

/// On-demand requests answered by the worker.
#[derive(Debug)]
pub(crate) enum Control {
    /// Replay the log into the index
    Load(oneshot::Sender<Result<ReplayStats>>),
    /// Compact now
    Compact(oneshot::Sender<Result<CompactionOutcome>>),
    /// Sweep items older than the given age now
    Expire(Duration, oneshot::Sender<Result<SweepReport>>),
    /// Force an fsync
    Sync(oneshot::Sender<Result<()>>),
}

/// Channel ends and shared state handed to the worker task.
pub(crate) struct PersistenceWorker {
    log: LogFile,
    index: Arc<ItemIndex>,
    stats: Arc<StoreStats>,
    records: mpsc::Receiver<Record>,
    control: mpsc::Receiver<Control>,
    shutdown: watch::Receiver<bool>,
    config: StoreConfig,
    /// Appends since the last fsync
    unsynced: u64,
    /// Set once a load has installed the log's contents in the index
    loaded: bool,
}

impl PersistenceWorker {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        log: LogFile,
        index: Arc<ItemIndex>,
        stats: Arc<StoreStats>,
        records: mpsc::Receiver<Record>,
        control: mpsc::Receiver<Control>,
        shutdown: watch::Receiver<bool>,
        config: StoreConfig,
    ) -> Self {
        Self {
            log,
            index,
            stats,
            records,
            control,
            shutdown,
            config,
            unsynced: 0,
            loaded: false,
        }
    }

    /// Runs the event loop until shutdown, then drains and closes the log.
    pub(crate) async fn run(mut self) -> Result<()> {
        let mut sync_tick = ticker(self.config.sync_interval);
        let mut compact_tick = ticker(self.config.compact_interval);
        let mut expiry_tick = ticker(self.config.expiry_interval);
        let max_age = self.config.max_age;

        info!(path = %self.log.path().display(), "Persistence worker started");

        loop {
            tokio::select! {
                biased;

                result = self.shutdown.changed() => {
                    if result.is_err() || *self.shutdown.borrow() {
                        debug!("Persistence worker received shutdown signal");
                        break;
                    }
                }

                record = self.records.recv() => match record {
                    Some(record) => self.persist(record),
                    None => {
                        debug!("All record senders dropped");
                        break;
                    }
                },

                Some(request) = self.control.recv() => self.handle(request),

                _ = sync_tick.tick() => self.sync(),

                _ = compact_tick.tick() => match self.compact() {
                    Ok(_) => {}
                    Err(StoreError::NotLoaded) => {
                        warn!("Skipping scheduled compaction, store not loaded");
                    }
                    Err(e) => error!(error = %e, "Scheduled compaction failed"),
                },

                _ = expiry_tick.tick(), if max_age.is_some() => {
                    if let Some(max_age) = max_age {
                        match self.expire(max_age) {
                            Ok(_) => {}
                            Err(StoreError::NotLoaded) => {
                                warn!("Skipping scheduled expiry sweep, store not loaded");
                            }
                            Err(e) => error!(error = %e, "Scheduled expiry sweep failed"),
                        }
                    }
                }
            }
        }

        self.finish()
    }

    /// Appends one record, syncing according to the policy.
    fn persist(&mut self, record: Record) {
        match self.log.append(&record) {
            Ok(()) => {
                self.unsynced += 1;
                trace!(id = record.id(), op = ?record.op(), "Record appended");
                if self.config.sync_policy == SyncPolicy::EveryAppend {
                    self.sync();
                }
            }
            Err(e) => {
                // The index still has the mutation; the next compaction
                // persists it
                error!(id = record.id(), op = ?record.op(), error = %e, "Failed to append record");
            }
        }
    }

    fn sync(&mut self) {
        if self.unsynced == 0 {
            return;
        }
        match self.log.sync() {
            Ok(()) => self.unsynced = 0,
            Err(e) => error!(error = %e, "Log fsync failed"),
        }
    }

    /// Appends everything already queued without waiting for more.
    fn drain_records(&mut self) -> usize {
        let mut drained = 0;
        while let Ok(record) = self.records.try_recv() {
            self.persist(record);
            drained += 1;
        }
        drained
    }

    fn handle(&mut self, request: Control) {
        match request {
            Control::Load(reply) => {
                let _ = reply.send(self.load());
            }
            Control::Compact(reply) => {
                let _ = reply.send(self.compact());
            }
            Control::Expire(max_age, reply) => {
                let _ = reply.send(self.expire(max_age));
            }
            Control::Sync(reply) => {
                self.drain_records();
                let result: Result<()> = self.log.sync().map_err(Into::into);
                if result.is_ok() {
                    self.unsynced = 0;
                }
                let _ = reply.send(result);
            }
        }
    }

    /// Replays the log and installs the result as the index.
    fn load(&mut self) -> Result<ReplayStats> {
        let log = &mut self.log;
        let replayed = blocking(|| log.replay())?;
        let stats = replayed.stats();
        self.index.replace(replayed.items);
        self.loaded = true;

        info!(
            applied = stats.applied,
            skipped = stats.skipped,
            live = stats.live,
            "Loaded items from log"
        );
        Ok(stats)
    }

    /// Rewrites the log from the index. Needs a completed load.
    fn compact(&mut self) -> Result<CompactionOutcome> {
        if !self.loaded {
            return Err(StoreError::NotLoaded);
        }
        self.drain_records();

        let (index, log) = (&self.index, &mut self.log);
        let min_bytes = self.config.compact_min_bytes;
        let outcome = blocking(|| compact(index, log, min_bytes))?;
        if outcome.is_rewritten() {
            self.stats.record_compaction();
        }
        Ok(outcome)
    }

    /// Sweeps expired items. Needs a completed load.
    fn expire(&mut self, max_age: Duration) -> Result<SweepReport> {
        if !self.loaded {
            return Err(StoreError::NotLoaded);
        }
        self.drain_records();

        let (index, log) = (&self.index, &mut self.log);
        let report = blocking(|| sweep(index, log, max_age, Utc::now()))?;
        self.stats.record_expired(report.expired.len());
        Ok(report)
    }

    /// Drains the queue, fails pending control requests and syncs.
    fn finish(mut self) -> Result<()> {
        self.records.close();
        let drained = self.drain_records();

        // Dropping the reply senders tells waiting callers the worker is gone
        self.control.close();
        while let Ok(request) = self.control.try_recv() {
            drop(request);
        }

        let result = self.log.sync();
        if let Err(e) = &result {
            warn!(error = %e, "Final log fsync failed");
        }

        info!(drained, "Persistence worker stopped");
        result.map_err(Into::into)
    }
}

/// Runs a blocking pass, moving other tasks off this thread when the
/// runtime allows it.
fn blocking<R>(f: impl FnOnce() -> R) -> R {
    match Handle::try_current().map(|handle| handle.runtime_flavor()) {
        Ok(RuntimeFlavor::MultiThread) => tokio::task::block_in_place(f),
        _ => f(),
    }
}

/// An interval whose first tick is one full period away.
fn ticker(period: Duration) -> Interval {
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}
