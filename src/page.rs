//! 256-byte page framing: the transfer unit into the ring buffer.
//!
//! A page is a 16-byte header followed by twelve densely packed raw samples,
//! filling the 256 bytes exactly.
//!
//! Header layout (little-endian):
//! - magic: 4 bytes (`b"VPG1"`)
//! - version: 1 byte
//! - count: 1 byte (filled samples, 0..=12)
//! - seq: 4 bytes (monotonically increasing page sequence number)
//! - reserved: 6 bytes (zero)

use crate::config::{PAGE_BYTES, PAGE_HEADER_BYTES, SAMPLES_PER_PAGE};
use crate::sample::{RAW_SAMPLE_BYTES, RawSample};
use thiserror_no_std::Error;

/// Magic tag at the start of every page.
pub const PAGE_MAGIC: u32 = u32::from_le_bytes(*b"VPG1");
/// Current page layout version.
pub const PAGE_VERSION: u8 = 1;

/// A fixed-size container of raw samples, possibly partially filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    seq: u32,
    count: u8,
    samples: [RawSample; SAMPLES_PER_PAGE],
}

/// Rejection reasons when decoding a page.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageError {
    #[error("bad page magic {found:#010x}")]
    BadMagic { found: u32 },
    #[error("unsupported page version {0}")]
    UnsupportedVersion(u8),
    #[error("sample count {0} exceeds page capacity")]
    CountOutOfRange(u8),
}

impl Page {
    pub(crate) fn empty(seq: u32) -> Self {
        Self {
            seq,
            count: 0,
            samples: [RawSample::default(); SAMPLES_PER_PAGE],
        }
    }

    /// Page sequence number assigned by the producer.
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Number of filled samples.
    pub fn count(&self) -> usize {
        self.count as usize
    }

    pub fn is_full(&self) -> bool {
        self.count() == SAMPLES_PER_PAGE
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// The filled samples, in acquisition order.
    pub fn samples(&self) -> &[RawSample] {
        &self.samples[..self.count()]
    }

    fn push(&mut self, sample: RawSample) {
        debug_assert!(!self.is_full());
        self.samples[self.count()] = sample;
        self.count += 1;
    }

    /// Converts the page to its 256-byte storage form. Unfilled sample slots
    /// are zero.
    pub fn to_bytes(&self) -> [u8; PAGE_BYTES] {
        let mut bytes = [0u8; PAGE_BYTES];

        bytes[0..4].copy_from_slice(&PAGE_MAGIC.to_le_bytes());
        bytes[4] = PAGE_VERSION;
        bytes[5] = self.count;
        bytes[6..10].copy_from_slice(&self.seq.to_le_bytes());
        // bytes 10..16 reserved, zero

        for (i, sample) in self.samples().iter().enumerate() {
            let offset = PAGE_HEADER_BYTES + i * RAW_SAMPLE_BYTES;
            bytes[offset..offset + RAW_SAMPLE_BYTES].copy_from_slice(&sample.to_bytes());
        }

        bytes
    }

    /// Creates a page from its 256-byte storage form, validating the header.
    pub fn from_bytes(bytes: &[u8; PAGE_BYTES]) -> Result<Self, PageError> {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[0..4]);
        let magic = u32::from_le_bytes(magic);
        if magic != PAGE_MAGIC {
            return Err(PageError::BadMagic { found: magic });
        }

        if bytes[4] != PAGE_VERSION {
            return Err(PageError::UnsupportedVersion(bytes[4]));
        }

        let count = bytes[5];
        if count as usize > SAMPLES_PER_PAGE {
            return Err(PageError::CountOutOfRange(count));
        }

        let mut seq = [0u8; 4];
        seq.copy_from_slice(&bytes[6..10]);

        let mut samples = [RawSample::default(); SAMPLES_PER_PAGE];
        for (i, slot) in samples.iter_mut().enumerate().take(count as usize) {
            let offset = PAGE_HEADER_BYTES + i * RAW_SAMPLE_BYTES;
            let mut raw = [0u8; RAW_SAMPLE_BYTES];
            raw.copy_from_slice(&bytes[offset..offset + RAW_SAMPLE_BYTES]);
            *slot = RawSample::from_bytes(&raw);
        }

        Ok(Self {
            seq: u32::from_le_bytes(seq),
            count,
            samples,
        })
    }
}

/// Producer-side packer: fills the current page and hands it off when full.
///
/// Owned by the acquisition context; sequence numbers restart at zero on
/// boot.
pub struct PageBuilder {
    current: Page,
    next_seq: u32,
}

impl PageBuilder {
    pub fn new() -> Self {
        Self {
            current: Page::empty(0),
            next_seq: 1,
        }
    }

    /// Adds one sample. Returns the completed page once the twelfth sample
    /// lands; the builder then starts a fresh page.
    pub fn push(&mut self, sample: RawSample) -> Option<Page> {
        self.current.push(sample);
        if self.current.is_full() {
            Some(self.take_current())
        } else {
            None
        }
    }

    /// Force-flushes a partially filled page, or `None` when nothing is
    /// pending.
    pub fn flush(&mut self) -> Option<Page> {
        if self.current.is_empty() {
            return None;
        }
        Some(self.take_current())
    }

    /// Samples sitting in the unfinished page.
    pub fn pending(&self) -> usize {
        self.current.count()
    }

    fn take_current(&mut self) -> Page {
        let page = self.current;
        self.current = Page::empty(self.next_seq);
        self.next_seq = self.next_seq.wrapping_add(1);
        page
    }
}

impl Default for PageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
