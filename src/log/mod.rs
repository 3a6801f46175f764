//! Persistence Log Module
//!
//! The durable half of the store: a line-oriented, append-only file of
//! [`Record`]s.
//!
//! ## Layout
//!
//! ```text
//! <data_dir>/
//!   ├── metadata.jsonl        live log, one JSON record per line
//!   └── metadata.jsonl.tmp    only exists during a compaction/expiry rewrite
//! ```
//!
//! ## Pieces
//!
//! - [`codec`]: encode/decode one record to/from one line
//! - [`replay`]: rebuild the live set from a reader
//! - [`file`]: the open log handle (append, sync, atomic rewrite, truncate)

pub mod codec;
pub mod file;
pub mod replay;

pub use codec::{CodecError, CodecResult, Op, Record};
pub use file::LogFile;
pub use replay::{replay, Replay, ReplayStats};
