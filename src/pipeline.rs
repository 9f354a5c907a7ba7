//! The cooperative consumer: drains the page ring, consolidates windows,
//! appends records, and dispatches control writes to the session.
//!
//! Everything here runs on one task, so the log's writer (consolidation) and
//! reader (streaming) never race. The producer side only ever touches the
//! shared ring.

use embedded_hal_async::delay::DelayNs;
use log::error;

use crate::consolidate::Consolidator;
use crate::link::ControlQueue;
use crate::link::session::{FrameSink, Session};
use crate::ring::SharedPageRing;
use crate::storage::{LogVolume, MountError, PersistentLog};

pub struct TelemetryPipeline<V: LogVolume> {
    consolidator: Consolidator,
    log: PersistentLog<V>,
}

impl<V: LogVolume> TelemetryPipeline<V> {
    pub fn new(volume: V) -> Self {
        Self {
            consolidator: Consolidator::new(),
            log: PersistentLog::new(volume),
        }
    }

    /// Mounts the log volume. A returned error is fatal: the caller must
    /// halt the subsystems that depend on storage.
    pub fn mount(&mut self, format_on_fail: bool) -> Result<(), MountError<V::Error>> {
        self.log.mount(format_on_fail)
    }

    pub fn log_mut(&mut self) -> &mut PersistentLog<V> {
        &mut self.log
    }

    /// Drains the ring and appends every completed record. An append failure
    /// drops that record and keeps the pipeline running. Returns the number
    /// of records persisted.
    pub fn drain<const N: usize>(&mut self, ring: &SharedPageRing<N>) -> u32 {
        let mut appended = 0;

        while let Some(page) = ring.pop() {
            for record in self.consolidator.ingest_page(&page) {
                match self.log.append(&record) {
                    Ok(()) => appended += 1,
                    Err(e) => error!("record dropped: {:?}", e),
                }
            }
        }

        appended
    }

    /// Dispatches all queued control writes. Session errors are surfaced as
    /// replies/log lines by the session itself; the loop keeps running.
    pub async fn service_control<D, T>(
        &mut self,
        queue: &ControlQueue,
        session: &mut Session<D>,
        sink: &mut T,
    ) where
        D: DelayNs,
        T: FrameSink,
    {
        while let Ok(write) = queue.try_receive() {
            if let Err(e) = session.handle_write(&write, &mut self.log, sink).await {
                error!("control write failed: {:?}", e);
            }
        }
    }
}
