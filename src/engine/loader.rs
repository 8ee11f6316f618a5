//! Replays WAL segments into a freshly constructed [`Cache`] on startup,
//! tolerating a torn trailing record the way the original loader does: log
//! it, truncate the file to the last good offset, and move on to the next
//! segment.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::engine::cache::Cache;
use crate::engine::wal::{SegmentReader, WalRecord, WalSegmentReader};
use crate::error::CacheError;

/// Loads a sequence of WAL segment files into a [`Cache`] in order.
pub struct CacheLoader {
    files: Vec<PathBuf>,
}

impl CacheLoader {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    /// Replays every segment into `cache`. A torn trailing record in a
    /// segment truncates that file to its last valid record and moves on;
    /// any other I/O error aborts the whole load.
    pub fn load(&self, cache: &Cache) -> Result<(), CacheError> {
        for path in &self.files {
            self.load_file(path, cache)?;
        }
        Ok(())
    }

    fn load_file(&self, path: &Path, cache: &Cache) -> Result<(), CacheError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(CacheError::Io)?;

        if file.metadata().map_err(CacheError::Io)?.len() == 0 {
            return Ok(());
        }

        let mut reader = WalSegmentReader::new(file);
        while reader.next() {
            match reader.read() {
                Ok(record) => apply_record(cache, record)?,
                Err(CacheError::TornRecord { offset }) => {
                    warn!(
                        path = %path.display(),
                        offset,
                        "WAL segment ends in a torn record, truncating"
                    );
                    let f = File::options()
                        .write(true)
                        .open(path)
                        .map_err(CacheError::Io)?;
                    f.set_len(reader.count().max(0) as u64)
                        .map_err(CacheError::Io)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

fn apply_record(cache: &Cache, record: WalRecord) -> Result<(), CacheError> {
    match record {
        WalRecord::Write(entries) => {
            cache.write_multi(entries)?;
        }
        WalRecord::DeleteRange { keys, min, max } => {
            for key in &keys {
                cache.delete_range(key, min, max);
            }
        }
        WalRecord::Delete { keys } => {
            for key in &keys {
                cache.delete(key);
            }
        }
    }
    Ok(())
}
