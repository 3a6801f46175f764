//! # stashlog - An Embedded Log-Structured Metadata Store
//!
//! stashlog keeps a small set of items (text snippets and references to
//! uploaded files) in memory and makes them durable with an append-only JSON
//! log. It is meant to sit inside a file-sharing service: the HTTP layer
//! writes payload files to disk and hands stashlog the metadata.
//!
//! ## Features
//!
//! - **Fast reads**: Lookups and listings never touch the disk
//! - **Non-blocking writes**: Mutations apply in memory, the log is written by a background task
//! - **Crash recovery**: The log is replayed at startup, skipping damaged lines
//! - **Compaction**: The log is periodically rewritten down to the live set
//! - **Expiry**: Items older than a maximum age are swept, together with their files
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                              stashlog                                   │
//! │                                                                         │
//! │  ┌─────────────┐    ┌──────────────────────────────────────────────┐   │
//! │  │   Caller    │───>│                  Store                       │   │
//! │  │ (HTTP, CLI) │    │   ItemIndex: RwLock<HashMap<String, Item>>   │   │
//! │  └─────────────┘    └──────────────────────┬───────────────────────┘   │
//! │                                            │ bounded queue              │
//! │                                            ▼                            │
//! │                     ┌──────────────────────────────────────────────┐   │
//! │                     │            PersistenceWorker                 │   │
//! │                     │   append · sync · compaction · expiry        │   │
//! │                     └──────────────────────┬───────────────────────┘   │
//! │                                            ▼                            │
//! │                     ┌──────────────────────────────────────────────┐   │
//! │                     │   LogFile (metadata.jsonl, one JSON / line)  │   │
//! │                     └──────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```no_run
//! use stashlog::{Item, Store, StoreConfig};
//!
//! #[tokio::main]
//! async fn main() -> stashlog::Result<()> {
//!     let config = StoreConfig::builder().data_dir("./download").build();
//!     let store = Store::open(config)?;
//!     store.load().await?;
//!
//!     let note = Item::text("hello");
//!     store.add(note.clone()).await;
//!     assert_eq!(store.len(), 1);
//!
//!     store.remove(&note.id).await;
//!     store.close().await
//! }
//! ```
//!
//! ## Module Overview
//!
//! - [`item`]: The item data model
//! - [`log`]: Record codec, log file handle and replay
//! - [`storage`]: Index, persistence worker, compaction and expiry
//! - [`config`]: Store configuration (builder and `LC_*` environment)
//! - [`error`]: Error types
//!
//! ## Durability
//!
//! A mutation is visible to readers as soon as `add`/`remove` returns, but it
//! is only durable once the worker has appended and synced its record. If
//! the queue stays full for longer than the enqueue timeout the record is
//! dropped with a warning; the next compaction writes it anyway, because
//! compaction snapshots the index rather than the log.

pub mod config;
pub mod error;
pub mod item;
pub mod log;
pub mod storage;

// Re-export commonly used types for convenience
pub use config::{StoreConfig, StoreConfigBuilder, SyncPolicy};
pub use error::{Result, StoreError};
pub use item::{FileKind, FileMeta, Item, ItemKind};
pub use log::{Record, ReplayStats};
pub use storage::{CompactionOutcome, StatsSnapshot, Storage, Store, SweepReport};

/// Default name of the log file inside the data directory
pub const DEFAULT_LOG_FILE: &str = "metadata.jsonl";

/// Version of stashlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
