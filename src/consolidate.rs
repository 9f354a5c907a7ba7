//! Window consolidation: reduces a full window of raw samples into one
//! compact summary record.
//!
//! Averages are rounded to nearest and clamped to their encodings. Steps are
//! counted with a two-threshold Schmitt trigger on the horizontal
//! acceleration magnitude, so one noisy footfall cannot register twice.
//!
//! Record binary format (little-endian, 10 bytes):
//! - avg_hr_x10: u16 (BPM × 10)
//! - avg_temp_x100: i16 (°C × 100)
//! - step_count: u16
//! - ts_ms: u32 (timestamp of the last sample in the window)

use core::fmt::Display;

use heapless::Vec;
use log::debug;
use thiserror_no_std::Error;

use crate::config::{SAMPLES_PER_WINDOW, STEP_OFF_THRESHOLD_MG, STEP_ON_THRESHOLD_MG};
use crate::page::Page;
use crate::sample::RawSample;

/// Encoded size of one consolidated record.
pub const RECORD_BYTES: usize = 10;

const STEP_ON_SQ: i32 = STEP_ON_THRESHOLD_MG * STEP_ON_THRESHOLD_MG;
const STEP_OFF_SQ: i32 = STEP_OFF_THRESHOLD_MG * STEP_OFF_THRESHOLD_MG;

/// The durable unit appended to the persistent log, immutable once written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsolidatedRecord {
    pub avg_hr_x10: u16,
    pub avg_temp_x100: i16,
    pub step_count: u16,
    pub ts_ms: u32,
}

impl ConsolidatedRecord {
    /// Returns the encoded size of this structure in bytes (10).
    pub const fn size() -> usize {
        RECORD_BYTES
    }

    /// Converts the record to its 10-byte storage form.
    pub fn to_bytes(&self) -> [u8; RECORD_BYTES] {
        let mut bytes = [0u8; RECORD_BYTES];
        bytes[0..2].copy_from_slice(&self.avg_hr_x10.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.avg_temp_x100.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.step_count.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.ts_ms.to_le_bytes());
        bytes
    }

    /// Creates a record from its 10-byte storage form.
    pub fn from_bytes(bytes: &[u8; RECORD_BYTES]) -> Self {
        let mut hr = [0u8; 2];
        hr.copy_from_slice(&bytes[0..2]);
        let mut temp = [0u8; 2];
        temp.copy_from_slice(&bytes[2..4]);
        let mut steps = [0u8; 2];
        steps.copy_from_slice(&bytes[4..6]);
        let mut ts = [0u8; 4];
        ts.copy_from_slice(&bytes[6..10]);

        Self {
            avg_hr_x10: u16::from_le_bytes(hr),
            avg_temp_x100: i16::from_le_bytes(temp),
            step_count: u16::from_le_bytes(steps),
            ts_ms: u32::from_le_bytes(ts),
        }
    }
}

impl Display for ConsolidatedRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "[Record] hr: {}.{} bpm, temp: {}.{:02} C, steps: {}, ts: {} ms",
            self.avg_hr_x10 / 10,
            self.avg_hr_x10 % 10,
            self.avg_temp_x100 / 100,
            (self.avg_temp_x100 % 100).unsigned_abs(),
            self.step_count,
            self.ts_ms,
        )
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsolidateError {
    /// The window is not fully populated; retry once more samples arrive.
    #[error("window holds {got} samples, {need} required")]
    InsufficientData { got: usize, need: usize },
}

/// Two-threshold step detector over the horizontal acceleration magnitude.
///
/// A step registers on the rising edge past the arm threshold; the detector
/// re-arms only once the signal falls below the lower release threshold.
pub struct StepDetector {
    above: bool,
}

impl StepDetector {
    pub const fn new() -> Self {
        Self { above: false }
    }

    /// Feeds one sample's horizontal acceleration; returns `true` when a
    /// step registers on this sample.
    pub fn feed(&mut self, ax: i16, ay: i16) -> bool {
        let ax = ax as i32;
        let ay = ay as i32;
        // Each square fits in 2^30; the sum can exceed i32::MAX by one ulp
        // at full scale, so saturate.
        let horizontal_mag_sq = (ax * ax).saturating_add(ay * ay);

        if !self.above && horizontal_mag_sq >= STEP_ON_SQ {
            self.above = true;
            return true;
        }
        if self.above && horizontal_mag_sq <= STEP_OFF_SQ {
            self.above = false;
        }
        false
    }

    pub fn reset(&mut self) {
        self.above = false;
    }
}

impl Default for StepDetector {
    fn default() -> Self {
        Self::new()
    }
}

fn rounded_avg_u(sum: u64, n: u64) -> u32 {
    ((sum + n / 2) / n) as u32
}

fn rounded_avg_i(sum: i64, n: i64) -> i32 {
    if sum >= 0 {
        ((sum + n / 2) / n) as i32
    } else {
        ((sum - n / 2) / n) as i32
    }
}

fn clamp_u16(value: u32) -> u16 {
    value.min(u16::MAX as u32) as u16
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Reduces one full window of samples into a record.
///
/// Refuses a partial window: callers must retry once `SAMPLES_PER_WINDOW`
/// samples are available. Extra samples past the window are ignored.
pub fn consolidate(samples: &[RawSample]) -> Result<ConsolidatedRecord, ConsolidateError> {
    if samples.len() < SAMPLES_PER_WINDOW {
        return Err(ConsolidateError::InsufficientData {
            got: samples.len(),
            need: SAMPLES_PER_WINDOW,
        });
    }
    let window = &samples[..SAMPLES_PER_WINDOW];

    let mut hr_sum: u64 = 0;
    let mut temp_sum: i64 = 0;
    let mut steps: u16 = 0;
    let mut detector = StepDetector::new();

    for sample in window {
        hr_sum += sample.hr_x10 as u64;
        temp_sum += sample.temp_x100 as i64;
        if detector.feed(sample.ax, sample.ay) {
            steps = steps.saturating_add(1);
        }
    }

    let record = ConsolidatedRecord {
        avg_hr_x10: clamp_u16(rounded_avg_u(hr_sum, window.len() as u64)),
        avg_temp_x100: clamp_i16(rounded_avg_i(temp_sum, window.len() as i64)),
        step_count: steps,
        ts_ms: window[window.len() - 1].ts_ms,
    };

    debug!("consolidated window: {}", record);

    Ok(record)
}

/// Accumulates samples from decoded pages and emits a record each time a
/// window fills. Window boundaries are independent of page boundaries.
pub struct Consolidator {
    window: Vec<RawSample, SAMPLES_PER_WINDOW>,
}

impl Consolidator {
    pub fn new() -> Self {
        Self { window: Vec::new() }
    }

    /// Feeds one page's samples. Returns the records completed by this page
    /// (at most one with the current page and window sizes).
    pub fn ingest_page(&mut self, page: &Page) -> Vec<ConsolidatedRecord, 2> {
        let mut completed = Vec::new();

        for sample in page.samples() {
            // The window vec is sized to exactly one window, so this push
            // cannot fail.
            let _ = self.window.push(*sample);

            if self.window.is_full() {
                if let Ok(record) = consolidate(&self.window) {
                    let _ = completed.push(record);
                }
                self.window.clear();
            }
        }

        completed
    }

    /// Samples waiting for the current window to fill.
    pub fn pending(&self) -> usize {
        self.window.len()
    }
}

impl Default for Consolidator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::PageBuilder;

    fn window_of(hr_x10: u16, temp_x100: i16) -> std::vec::Vec<RawSample> {
        (0..SAMPLES_PER_WINDOW as u32)
            .map(|i| RawSample {
                hr_x10,
                temp_x100,
                ts_ms: 1000 + i,
                ..RawSample::default()
            })
            .collect()
    }

    #[test]
    fn test_record_size() {
        assert_eq!(ConsolidatedRecord::size(), 10, "record must encode to 10 bytes");
    }

    #[test]
    fn test_record_serialization() {
        let record = ConsolidatedRecord {
            avg_hr_x10: 725,
            avg_temp_x100: -210,
            step_count: 42,
            ts_ms: 0xDEAD_BEEF,
        };

        let bytes = record.to_bytes();
        assert_eq!(ConsolidatedRecord::from_bytes(&bytes), record);
    }

    #[test]
    fn test_refuses_partial_window() {
        let samples = window_of(700, 3650);
        let result = consolidate(&samples[..SAMPLES_PER_WINDOW - 1]);

        assert_eq!(
            result,
            Err(ConsolidateError::InsufficientData {
                got: SAMPLES_PER_WINDOW - 1,
                need: SAMPLES_PER_WINDOW,
            })
        );
    }

    #[test]
    fn test_exact_averages_and_timestamp() {
        let mut samples = window_of(700, 3650);
        // Two outliers shift the mean by a known amount: the sums become
        // 700 * W + 125 and 3650 * W - 250.
        samples[3].hr_x10 = 750;
        samples[7].hr_x10 = 775;
        samples[3].temp_x100 = 3500;
        samples[7].temp_x100 = 3550;

        let record = consolidate(&samples).unwrap();

        // 125 / 125 == 1 extra tenth-BPM; -250 / 125 == -2 centidegrees.
        assert_eq!(record.avg_hr_x10, 701);
        assert_eq!(record.avg_temp_x100, 3648);
        assert_eq!(record.ts_ms, samples[SAMPLES_PER_WINDOW - 1].ts_ms);
        assert_eq!(record.step_count, 0);
    }

    #[test]
    fn test_average_rounds_to_nearest() {
        let mut samples = window_of(700, 0);
        // Sum = 700 * W + 63; 63/125 rounds up.
        samples[0].hr_x10 = 763;

        let record = consolidate(&samples).unwrap();
        assert_eq!(record.avg_hr_x10, 701);
    }

    #[test]
    fn test_clamps_to_encoding_bounds() {
        assert_eq!(clamp_u16(70_000), u16::MAX);
        assert_eq!(clamp_u16(65_535), 65_535);
        assert_eq!(clamp_i16(40_000), i16::MAX);
        assert_eq!(clamp_i16(-40_000), i16::MIN);
        assert_eq!(clamp_i16(-32_768), i16::MIN);
    }

    #[test]
    fn test_step_hysteresis_counts_one_step() {
        let mut detector = StepDetector::new();

        // First crossing past the arm threshold registers.
        assert!(detector.feed(STEP_ON_THRESHOLD_MG as i16, 0));

        // Oscillating between the two thresholds must not re-trigger: the
        // signal never falls below the release threshold.
        for _ in 0..50 {
            assert!(!detector.feed(450, 0));
            assert!(!detector.feed(550, 0));
        }

        // Release, then a second genuine crossing.
        assert!(!detector.feed(100, 0));
        assert!(detector.feed(0, STEP_ON_THRESHOLD_MG as i16));
    }

    #[test]
    fn test_consolidator_spans_page_boundaries() {
        let mut builder = PageBuilder::new();
        let mut consolidator = Consolidator::new();
        let mut records = std::vec::Vec::new();

        // Two full windows' worth of samples, fed through pages.
        let total = 2 * SAMPLES_PER_WINDOW;
        for i in 0..total as u32 {
            let sample = RawSample {
                hr_x10: 650,
                temp_x100: 3700,
                ts_ms: i,
                ..RawSample::default()
            };
            if let Some(page) = builder.push(sample) {
                records.extend(consolidator.ingest_page(&page));
            }
        }
        if let Some(page) = builder.flush() {
            records.extend(consolidator.ingest_page(&page));
        }

        assert_eq!(records.len(), 2);
        assert_eq!(records[0].ts_ms, SAMPLES_PER_WINDOW as u32 - 1);
        assert_eq!(records[1].ts_ms, 2 * SAMPLES_PER_WINDOW as u32 - 1);
        assert_eq!(consolidator.pending(), 0);
        assert!(records.iter().all(|r| r.avg_hr_x10 == 650));
    }
}
