//! Log File Handle
//!
//! [`LogFile`] owns the open append handle of the on-disk log. Exactly one
//! instance exists per store, and it lives inside the persistence worker.
//!
//! ## Atomic Rewrite
//!
//! Compaction and expiry replace the whole log:
//!
//! ```text
//! 1. write records  ──>  metadata.jsonl.tmp      (same directory)
//! 2. fsync + close       metadata.jsonl.tmp
//! 3. rename              metadata.jsonl.tmp ──> metadata.jsonl
//! 4. fsync directory     (best effort)
//! 5. reopen              metadata.jsonl (append)
//! ```
//!
//! Until step 3 the original log is untouched. After step 3 the new log is
//! complete. A failure before the rename deletes the temp file and leaves the
//! original log in place. If step 5 fails the handle is dropped, so nothing
//! is appended to the replaced file; the next operation reopens the log or
//! fails with the open error.

use super::codec::Record;
use super::replay::{replay, Replay};
use crate::error::Result;
use crate::item::Item;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

/// Suffix appended to the log filename for rewrite temp files.
const TMP_SUFFIX: &str = ".tmp";

/// The append-only log file.
#[derive(Debug)]
pub struct LogFile {
    /// Path of the live log
    path: PathBuf,

    /// Handle opened with read + append; `None` after a failed reopen
    file: Option<File>,

    /// The file ends in a torn line; the next append starts with `\n`
    torn_tail: bool,
}

impl LogFile {
    /// Opens (creating if needed) the log at `path`, creating its directory.
    pub fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();

        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let file = Self::open_handle(&path)?;
        let torn_tail = ends_without_newline(&file)?;
        if torn_tail {
            warn!(path = %path.display(), "Log ends with a partial record");
        }

        Ok(Self {
            path,
            file: Some(file),
            torn_tail,
        })
    }

    fn open_handle(path: &Path) -> io::Result<File> {
        OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
    }

    /// The append handle, reopened if a rewrite could not reopen it.
    fn handle(&mut self) -> io::Result<&mut File> {
        if self.file.is_none() {
            let file = Self::open_handle(&self.path)?;
            self.torn_tail = ends_without_newline(&file)?;
            debug!(path = %self.path.display(), "Reopened log handle");
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| io::Error::other("log handle unavailable"))
    }

    /// Path of the live log.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path used for rewrite temp files.
    pub fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(TMP_SUFFIX);
        self.path.with_file_name(name)
    }

    /// Current size of the log in bytes.
    pub fn len(&self) -> io::Result<u64> {
        Ok(fs::metadata(&self.path)?.len())
    }

    pub fn is_empty(&self) -> io::Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Appends one record. Does not sync; see [`LogFile::sync`].
    pub fn append(&mut self, record: &Record) -> Result<()> {
        let line = record.encode()?;
        // Reopening refreshes `torn_tail`, so read it afterwards
        self.handle()?;
        let torn_tail = self.torn_tail;
        let file = self.handle()?;

        match write_line(file, torn_tail, line.as_bytes()) {
            Ok(()) => {
                self.torn_tail = false;
                Ok(())
            }
            Err(e) => {
                self.note_failed_write();
                Err(e.into())
            }
        }
    }

    /// Re-checks the tail after a failed write, which may have left part of
    /// a line behind.
    fn note_failed_write(&mut self) {
        self.torn_tail = match &self.file {
            Some(file) => ends_without_newline(file).unwrap_or(true),
            None => true,
        };
    }

    /// Flushes file data to stable storage.
    pub fn sync(&mut self) -> io::Result<()> {
        self.handle()?.sync_data()
    }

    /// Replays the log from the beginning.
    ///
    /// Reads through a cloned handle; appends are unaffected because the
    /// handle is in append mode.
    pub fn replay(&mut self) -> io::Result<Replay> {
        let mut reader = self.handle()?.try_clone()?;
        reader.seek(SeekFrom::Start(0))?;
        let replayed = replay(BufReader::new(reader))?;

        let file = self.handle()?;
        self.torn_tail = ends_without_newline(file)?;
        Ok(replayed)
    }

    /// Atomically replaces the log with one Add record per item.
    ///
    /// Returns the size of the new log.
    pub fn rewrite<'a, I>(&mut self, items: I) -> Result<u64>
    where
        I: IntoIterator<Item = &'a Item>,
    {
        let tmp_path = self.tmp_path();

        if let Err(e) = write_snapshot(&tmp_path, items) {
            if let Err(cleanup) = fs::remove_file(&tmp_path) {
                debug!(path = %tmp_path.display(), error = %cleanup, "Could not remove temp log");
            }
            return Err(e);
        }

        if let Err(e) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }
        // The old handle now points at the replaced file
        self.file = None;
        self.torn_tail = false;
        sync_parent_dir(&self.path);

        match Self::open_handle(&self.path) {
            Ok(file) => self.file = Some(file),
            Err(e) => {
                error!(path = %self.path.display(), error = %e, "Failed to reopen log after rewrite");
                return Err(e.into());
            }
        }

        Ok(self.len()?)
    }

    /// Truncates the log to zero length.
    pub fn truncate(&mut self) -> io::Result<()> {
        let file = self.handle()?;
        file.set_len(0)?;
        file.sync_all()?;
        self.torn_tail = false;
        Ok(())
    }
}

/// Writes one encoded line, first closing off a torn tail if there is one.
fn write_line(file: &mut File, torn_tail: bool, line: &[u8]) -> io::Result<()> {
    if torn_tail {
        file.write_all(b"\n")?;
    }
    file.write_all(line)
}

/// Writes and fsyncs a fresh log at `path`.
fn write_snapshot<'a, I>(path: &Path, items: I) -> Result<()>
where
    I: IntoIterator<Item = &'a Item>,
{
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;

    let mut writer = BufWriter::new(file);
    for item in items {
        // Stamped with the creation time so rewriting the same set is byte-stable
        let record = Record::Add {
            item: item.clone(),
            ts: item.create_time.timestamp(),
        };
        let line = record.encode()?;
        writer.write_all(line.as_bytes())?;
    }

    let file = writer.into_inner().map_err(|e| e.into_error())?;
    file.sync_all()?;
    Ok(())
}

/// Makes a rename durable. Failures are logged.
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
            debug!(dir = %dir.display(), error = %e, "Directory fsync failed");
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Returns true if the file is non-empty and its last byte is not `\n`.
fn ends_without_newline(file: &File) -> io::Result<bool> {
    let len = file.metadata()?.len();
    if len == 0 {
        return Ok(false);
    }

    let mut last = [0u8; 1];
    let mut reader = file.try_clone()?;
    reader.seek(SeekFrom::Start(len - 1))?;
    reader.read_exact(&mut last)?;
    Ok(last[0] != b'\n')
}
