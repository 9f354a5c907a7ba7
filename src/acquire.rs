//! Acquisition-side seam: the sensor source trait and the producer helper.
//!
//! Concrete sensor drivers (PPG, IMU, temperature) live outside this crate;
//! they are reached through [`SampleSource`]. The [`Sampler`] runs in the
//! timer-driven producer context and must never block or propagate errors:
//! a failed read is dropped and the cadence continues.

use log::debug;
use thiserror_no_std::Error;

use crate::page::PageBuilder;
use crate::ring::SharedPageRing;
use crate::sample::RawSample;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireError {
    #[error("sensor {sensor} failed to initialize")]
    InitializationFailed { sensor: &'static str },
    #[error("sensor {sensor} read failed")]
    ReadFailed { sensor: &'static str },
}

/// A source of raw readings, polled on the acquisition cadence.
///
/// Implementations fill every field except `ts_ms`, which the sampler stamps.
pub trait SampleSource {
    async fn read(&mut self) -> Result<RawSample, AcquireError>;
}

/// Producer helper: polls the source, stamps timestamps, packs pages, and
/// pushes completed pages into the shared ring.
pub struct Sampler<S: SampleSource> {
    source: S,
    builder: PageBuilder,
}

impl<S: SampleSource> Sampler<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            builder: PageBuilder::new(),
        }
    }

    /// Runs one acquisition tick. `now_ms` is the monotonic time supplied by
    /// the caller's clock.
    pub async fn service<const N: usize>(&mut self, now_ms: u32, ring: &SharedPageRing<N>) {
        match self.source.read().await {
            Ok(mut sample) => {
                sample.ts_ms = now_ms;
                if let Some(page) = self.builder.push(sample) {
                    ring.push(page);
                }
            }
            Err(e) => {
                // Dropped, not propagated: the producer context stays
                // time-critical and lossy.
                debug!("sample dropped: {:?}", e);
            }
        }
    }

    /// Force-flushes a partially filled page into the ring, e.g. before a
    /// planned shutdown.
    pub fn flush<const N: usize>(&mut self, ring: &SharedPageRing<N>) {
        if let Some(page) = self.builder.flush() {
            ring.push(page);
        }
    }
}
