//! Append-only persistent log of consolidated records.
//!
//! The log is a flat file on a mounted flash volume whose length is always a
//! whole number of records: records are appended, never rewritten. A
//! trailing partial record (possible after an unclean reset) is treated as
//! end-of-valid-data on reads, not as an error.

pub mod sd_volume;

#[cfg(test)]
pub(crate) mod ram_volume;

use core::fmt::Debug;

use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::config::LOG_FILE_NAME;
use crate::consolidate::{ConsolidatedRecord, RECORD_BYTES};

/// Seam to the backing filesystem. Implemented over embedded-sdmmc for
/// hardware ([`sd_volume::SdVolume`]) and in memory for tests.
pub trait LogVolume {
    type Error: Debug;

    /// Mounts the volume; must succeed before any file operation.
    fn mount(&mut self) -> Result<(), Self::Error>;

    /// Restores the volume to a usable empty state after a failed mount.
    fn format(&mut self) -> Result<(), Self::Error>;

    /// Size of `path` in bytes; a missing file is `Ok(0)`.
    fn size_of(&mut self, path: &str) -> Result<u64, Self::Error>;

    /// Appends `data` to `path`, creating it if needed. Returns the number
    /// of bytes actually written.
    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, Self::Error>;

    /// Reads up to `buf.len()` bytes at `offset`. Returns the bytes read;
    /// reads at or past end-of-file return `Ok(0)`.
    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error>;

    /// Removes `path`. Returns whether the file existed.
    fn remove(&mut self, path: &str) -> Result<bool, Self::Error>;
}

/// Mount failures are fatal to everything that depends on the log; the
/// caller is responsible for halting those subsystems.
#[derive(Error, Debug)]
pub enum MountError<E: Debug> {
    #[error("volume mount failed: {0:?}")]
    MountFailed(E),
    #[error("volume reformat failed: {0:?}")]
    FormatFailed(E),
}

#[derive(Error, Debug)]
pub enum StoreError<E: Debug> {
    #[error("volume not mounted")]
    NotMounted,
    /// The record is not persisted; no partial-record recovery is attempted.
    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },
    #[error("volume i/o failed: {0:?}")]
    Io(E),
}

impl<E: Debug> From<E> for StoreError<E> {
    fn from(e: E) -> Self {
        StoreError::Io(e)
    }
}

/// The append-only record store. Single writer (consolidation) and single
/// reader (streaming) share the consumer context, so no locking is needed
/// beyond ordinary handle discipline.
pub struct PersistentLog<V: LogVolume> {
    volume: V,
    mounted: bool,
}

impl<V: LogVolume> PersistentLog<V> {
    pub fn new(volume: V) -> Self {
        Self {
            volume,
            mounted: false,
        }
    }

    /// Mounts the backing volume. On failure with `format_on_fail` set, the
    /// volume is reformatted once and the mount retried; a second failure is
    /// returned as fatal.
    pub fn mount(&mut self, format_on_fail: bool) -> Result<(), MountError<V::Error>> {
        match self.volume.mount() {
            Ok(()) => {
                info!("log volume mounted");
                self.mounted = true;
                Ok(())
            }
            Err(first) if format_on_fail => {
                warn!("log volume mount failed ({:?}), reformatting", first);
                self.volume.format().map_err(MountError::FormatFailed)?;
                self.volume.mount().map_err(MountError::MountFailed)?;
                info!("log volume reformatted and mounted");
                self.mounted = true;
                Ok(())
            }
            Err(e) => Err(MountError::MountFailed(e)),
        }
    }

    fn ensure_mounted(&self) -> Result<(), StoreError<V::Error>> {
        if self.mounted {
            Ok(())
        } else {
            Err(StoreError::NotMounted)
        }
    }

    /// Appends one record. A short write leaves the record unpersisted and
    /// is reported as an error.
    pub fn append(&mut self, record: &ConsolidatedRecord) -> Result<(), StoreError<V::Error>> {
        self.ensure_mounted()?;

        let bytes = record.to_bytes();
        let written = self.volume.append(LOG_FILE_NAME, &bytes)?;
        if written != RECORD_BYTES {
            error!("short append: {} of {} bytes", written, RECORD_BYTES);
            return Err(StoreError::ShortWrite {
                written,
                expected: RECORD_BYTES,
            });
        }
        Ok(())
    }

    /// Total bytes stored, including any trailing partial record.
    pub fn size(&mut self) -> Result<u64, StoreError<V::Error>> {
        self.ensure_mounted()?;
        Ok(self.volume.size_of(LOG_FILE_NAME)?)
    }

    /// Number of whole records stored.
    pub fn record_count(&mut self) -> Result<u32, StoreError<V::Error>> {
        Ok((self.size()? / RECORD_BYTES as u64) as u32)
    }

    /// Reads the record at `index`, or `None` past the last whole record.
    pub fn read_record(
        &mut self,
        index: u32,
    ) -> Result<Option<ConsolidatedRecord>, StoreError<V::Error>> {
        self.ensure_mounted()?;

        let offset = index as u64 * RECORD_BYTES as u64;
        let mut buf = [0u8; RECORD_BYTES];
        let read = self.volume.read_at(LOG_FILE_NAME, offset, &mut buf)?;
        if read < RECORD_BYTES {
            // End of valid data; a trailing fragment is tolerated silently.
            return Ok(None);
        }
        Ok(Some(ConsolidatedRecord::from_bytes(&buf)))
    }

    /// Streams records front-to-back, stopping at the first short read.
    /// Returns the number of records visited.
    pub fn for_each_record<F>(&mut self, mut visitor: F) -> Result<u32, StoreError<V::Error>>
    where
        F: FnMut(&ConsolidatedRecord),
    {
        let mut index = 0u32;
        while let Some(record) = self.read_record(index)? {
            visitor(&record);
            index += 1;
        }
        Ok(index)
    }

    /// Removes the backing file. Erasing a log that was never created is
    /// success.
    pub fn erase(&mut self) -> Result<(), StoreError<V::Error>> {
        self.ensure_mounted()?;

        let existed = self.volume.remove(LOG_FILE_NAME)?;
        info!(
            "log erased ({})",
            if existed { "file removed" } else { "no file" }
        );
        Ok(())
    }
}
