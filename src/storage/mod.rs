//! Storage Module
//!
//! Everything between the item API and the log file: the in-memory index,
//! the background persistence worker and the two maintenance passes it runs.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          Store                              │
//! │   add / remove / get / list / len                           │
//! │        │                                                    │
//! │        ▼                                                    │
//! │  ┌─────────────────────┐        records / control           │
//! │  │     ItemIndex       │ ─────────────────────────┐         │
//! │  │ RwLock<HashMap<..>> │                          ▼         │
//! │  └─────────────────────┘           ┌──────────────────────┐ │
//! │            ▲                       │  PersistenceWorker   │ │
//! │            │  write lock           │ (Background Tokio    │ │
//! │            └───────────────────────│        Task)         │ │
//! │                                    │  compaction, expiry  │ │
//! │                                    └──────────┬───────────┘ │
//! └───────────────────────────────────────────────┼─────────────┘
//!                                                 ▼
//!                                          metadata.jsonl
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use stashlog::storage::Store;
//! use stashlog::{Item, StoreConfig};
//! use std::time::Duration;
//!
//! # async fn run() -> stashlog::Result<()> {
//! let store = Store::open(StoreConfig::default())?;
//! store.load().await?;
//!
//! store.add(Item::text("shared snippet")).await;
//! for item in store.list() {
//!     println!("{} {}", item.id, item.content);
//! }
//!
//! // Maintenance normally runs on the worker's timers
//! store.compact().await?;
//! store.cleanup_expired(Duration::from_secs(30 * 24 * 60 * 60)).await?;
//! store.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod compaction;
pub mod expiry;
pub mod index;
pub mod store;
mod worker;

pub use compaction::{compact, CompactionOutcome};
pub use expiry::{remove_backing_file, sweep, SweepReport};
pub use index::{ItemIndex, ItemMap};
pub use store::{StatsSnapshot, Storage, Store, StoreStats};
