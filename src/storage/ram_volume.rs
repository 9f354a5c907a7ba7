//! In-memory log volume used by unit tests, with injectable mount failures,
//! write limits, and file truncation.

use std::collections::BTreeMap;
use std::string::{String, ToString};
use std::vec::Vec;

use super::LogVolume;

pub struct RamVolume {
    files: BTreeMap<String, Vec<u8>>,
    mounted: bool,
    fail_mounts: u8,
    write_limit: Option<usize>,
    formats: u32,
}

impl RamVolume {
    pub fn new() -> Self {
        Self {
            files: BTreeMap::new(),
            mounted: false,
            fail_mounts: 0,
            write_limit: None,
            formats: 0,
        }
    }

    /// The next `n` mount attempts fail.
    pub fn fail_next_mounts(&mut self, n: u8) {
        self.fail_mounts = n;
    }

    /// The next append writes at most `limit` bytes.
    pub fn limit_next_write(&mut self, limit: usize) {
        self.write_limit = Some(limit);
    }

    /// Cuts `path` down to `len` bytes, as an unclean shutdown would.
    pub fn corrupt_truncate(&mut self, path: &str, len: usize) {
        if let Some(data) = self.files.get_mut(path) {
            data.truncate(len);
        }
    }

    pub fn format_count(&self) -> u32 {
        self.formats
    }
}

impl LogVolume for RamVolume {
    type Error = &'static str;

    fn mount(&mut self) -> Result<(), Self::Error> {
        if self.fail_mounts > 0 {
            self.fail_mounts -= 1;
            return Err("mount failure");
        }
        self.mounted = true;
        Ok(())
    }

    fn format(&mut self) -> Result<(), Self::Error> {
        self.files.clear();
        self.formats += 1;
        Ok(())
    }

    fn size_of(&mut self, path: &str) -> Result<u64, Self::Error> {
        Ok(self.files.get(path).map_or(0, |data| data.len() as u64))
    }

    fn append(&mut self, path: &str, data: &[u8]) -> Result<usize, Self::Error> {
        let take = self.write_limit.take().unwrap_or(data.len()).min(data.len());
        self.files
            .entry(path.to_string())
            .or_default()
            .extend_from_slice(&data[..take]);
        Ok(take)
    }

    fn read_at(&mut self, path: &str, offset: u64, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let Some(data) = self.files.get(path) else {
            return Ok(0);
        };
        let start = (offset as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        Ok(n)
    }

    fn remove(&mut self, path: &str) -> Result<bool, Self::Error> {
        Ok(self.files.remove(path).is_some())
    }
}
