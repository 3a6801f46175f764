//! Item Data Model
//!
//! An [`Item`] is a small metadata record: either a text snippet or a
//! reference to a file that a collaborator has already written to disk.
//!
//! ## Wire Shape
//!
//! Items are stored in the log as JSON objects:
//!
//! ```text
//! {"id":"…","type":"text","content":"hello","create_time":"2024-05-01T10:00:00Z"}
//! {"id":"…","type":"image","content":"cat.png","create_time":"…",
//!  "meta":{"saveName":"9f2c….png","path":"./download","originalName":"cat.png",
//!          "size":1024,"contentType":"image/png"}}
//! ```
//!
//! In Rust the loose `meta` map becomes a typed [`FileMeta`] that only
//! file-like kinds carry, so a text item can never point at a file.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Location and description of an item's backing file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    /// Name of the stored file inside `path`
    pub save_name: String,

    /// Directory holding the stored file
    pub path: String,

    /// Filename as uploaded by the user
    #[serde(default)]
    pub original_name: String,

    /// Payload size in bytes
    #[serde(default)]
    pub size: u64,

    /// MIME type reported by the uploader
    #[serde(default)]
    pub content_type: String,
}

impl FileMeta {
    /// Full path of the backing file (`path/save_name`).
    pub fn file_path(&self) -> PathBuf {
        PathBuf::from(&self.path).join(&self.save_name)
    }
}

/// Kind of file an item refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Image,
    Other,
}

impl FileKind {
    /// Classifies a MIME type: `image/*` is an image, everything else is other.
    pub fn from_content_type(content_type: &str) -> Self {
        if content_type
            .trim()
            .to_ascii_lowercase()
            .starts_with("image/")
        {
            FileKind::Image
        } else {
            FileKind::Other
        }
    }
}

/// What an item holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemKind {
    /// Plain text; the payload is [`Item::content`]
    Text,
    /// An image file stored outside the log
    Image(FileMeta),
    /// Any other file stored outside the log
    Other(FileMeta),
}

impl ItemKind {
    /// The lowercase tag used on the wire.
    pub fn tag(&self) -> &'static str {
        match self {
            ItemKind::Text => "text",
            ItemKind::Image(_) => "image",
            ItemKind::Other(_) => "other",
        }
    }

    /// File metadata, if this kind refers to a file.
    pub fn file_meta(&self) -> Option<&FileMeta> {
        match self {
            ItemKind::Text => None,
            ItemKind::Image(meta) | ItemKind::Other(meta) => Some(meta),
        }
    }
}

/// A stored record.
///
/// Items are immutable once created. A change is modelled by the caller as a
/// remove followed by an add of a fresh item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ItemRepr", into = "ItemRepr")]
pub struct Item {
    /// Unique identifier, assigned at creation
    pub id: String,

    /// Payload classification (and file location for file kinds)
    pub kind: ItemKind,

    /// Text payload, or the original filename for file items
    pub content: String,

    /// Creation instant; the sole ordering and expiry key
    pub create_time: DateTime<Utc>,
}

impl Item {
    /// Creates a text item with a fresh id, stamped with the current time.
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: ItemKind::Text,
            content: content.into(),
            create_time: Utc::now(),
        }
    }

    /// Creates a file item. The content is the file's original name.
    pub fn file(kind: FileKind, meta: FileMeta) -> Self {
        let content = meta.original_name.clone();
        let kind = match kind {
            FileKind::Image => ItemKind::Image(meta),
            FileKind::Other => ItemKind::Other(meta),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            content,
            create_time: Utc::now(),
        }
    }

    /// Returns the same item with a different creation time.
    ///
    /// Intended for importing records that were created elsewhere.
    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.create_time = create_time;
        self
    }

    /// Returns true for text items.
    pub fn is_text(&self) -> bool {
        matches!(self.kind, ItemKind::Text)
    }

    /// Path of the backing file, if this item has one.
    pub fn backing_file(&self) -> Option<PathBuf> {
        self.kind.file_meta().map(FileMeta::file_path)
    }

    /// Age of the item at `now`. Items stamped in the future have age zero.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.create_time).to_std().unwrap_or(Duration::ZERO)
    }

    /// Returns true if the item is strictly older than `max_age` at `now`.
    pub fn is_expired(&self, max_age: Duration, now: DateTime<Utc>) -> bool {
        self.age(now) > max_age
    }
}

/// Flat serde representation matching the on-disk JSON.
#[derive(Serialize, Deserialize)]
struct ItemRepr {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    meta: Option<FileMeta>,
    create_time: DateTime<Utc>,
}

impl From<Item> for ItemRepr {
    fn from(item: Item) -> Self {
        let kind = item.kind.tag().to_string();
        let meta = match item.kind {
            ItemKind::Text => None,
            ItemKind::Image(meta) | ItemKind::Other(meta) => Some(meta),
        };

        Self {
            id: item.id,
            kind,
            content: item.content,
            meta,
            create_time: item.create_time,
        }
    }
}

impl TryFrom<ItemRepr> for Item {
    type Error = String;

    fn try_from(repr: ItemRepr) -> Result<Self, Self::Error> {
        if repr.id.is_empty() {
            return Err("item id is empty".to_string());
        }

        let kind = match (repr.kind.as_str(), repr.meta) {
            ("text", _) => ItemKind::Text,
            ("image", Some(meta)) => ItemKind::Image(meta),
            ("other", Some(meta)) => ItemKind::Other(meta),
            ("image" | "other", None) => {
                return Err(format!("{} item {} has no file meta", repr.kind, repr.id));
            }
            (other, _) => return Err(format!("unknown item type: {:?}", other)),
        };

        Ok(Self {
            id: repr.id,
            kind,
            content: repr.content,
            create_time: repr.create_time,
        })
    }
}
