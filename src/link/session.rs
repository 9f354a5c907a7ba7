//! Command-driven streaming session: serves the persistent log over the
//! notify characteristic, one frame per notification.
//!
//! The session is transient per-connection state. Delivery is at most once:
//! a transfer interrupted by a disconnect is abandoned, and the next `SEND`
//! restarts from record zero. The record count is captured once when a
//! transfer begins, so records appended while a stream is in flight are not
//! part of that session.

use core::fmt::Write as _;

use embedded_hal_async::delay::DelayNs;
use heapless::String;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::config::{DeviceConfig, INTER_FRAME_PACING};
use crate::link::protocol::{self, Command, reply};
use crate::storage::{LogVolume, PersistentLog};

/// Transport seam: the notify-capable data characteristic of the active
/// connection. A second concurrent connection is rejected below this seam.
pub trait FrameSink {
    type Error: core::fmt::Debug;

    /// Whether the peer is still connected. Checked between frames so a
    /// disconnect is observed within one iteration.
    fn is_connected(&self) -> bool;

    /// Sends one payload as a single notification.
    async fn notify(&mut self, payload: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transfer in progress.
    Idle,
    /// Mid-transfer; `sent` of `total` DATA frames delivered.
    Streaming { sent: u32, total: u32 },
}

/// Errors the consumer loop surfaces as log lines, not crashes.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("log read failed during session")]
    Storage,
}

pub struct Session<D: DelayNs> {
    state: SessionState,
    delay: D,
    pacing_us: u32,
    /// Last wall-clock reference received via `TIME:`, unix seconds.
    wall_clock: Option<u32>,
}

impl<D: DelayNs> Session<D> {
    pub fn new(delay: D) -> Self {
        Self {
            state: SessionState::Idle,
            delay,
            pacing_us: INTER_FRAME_PACING.as_micros() as u32,
            wall_clock: None,
        }
    }

    /// Applies per-unit overrides (pacing) from the provisioning config.
    pub fn with_config(delay: D, config: &DeviceConfig<'_>) -> Self {
        let mut session = Self::new(delay);
        session.pacing_us = config.pacing_ms.saturating_mul(1_000);
        session
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn wall_clock(&self) -> Option<u32> {
        self.wall_clock
    }

    /// Transport disconnect: unconditionally abandons any in-flight
    /// transfer. There is no resume; a reconnecting client starts over.
    pub fn on_disconnect(&mut self) {
        if let SessionState::Streaming { sent, total } = self.state {
            warn!("client disconnected mid-stream ({} of {} frames)", sent, total);
        }
        self.state = SessionState::Idle;
    }

    /// Handles one raw control write against the log, replying over `sink`.
    pub async fn handle_write<V, T>(
        &mut self,
        raw: &[u8],
        log: &mut PersistentLog<V>,
        sink: &mut T,
    ) -> Result<(), SessionError>
    where
        V: LogVolume,
        T: FrameSink,
    {
        let Some(command) = Command::parse(raw) else {
            self.reply(sink, reply::UNKNOWN).await;
            return Ok(());
        };

        match command {
            Command::List => self.list(log, sink).await,
            Command::Send => self.stream(log, sink).await,
            Command::Erase => self.erase(log, sink).await,
            Command::TimeSync(seconds) => {
                info!("wall clock synced to {}", seconds);
                self.wall_clock = Some(seconds);
                self.reply(sink, reply::DONE).await;
                Ok(())
            }
        }
    }

    async fn list<V, T>(
        &mut self,
        log: &mut PersistentLog<V>,
        sink: &mut T,
    ) -> Result<(), SessionError>
    where
        V: LogVolume,
        T: FrameSink,
    {
        let count = log.record_count().map_err(|e| {
            error!("LIST failed: {:?}", e);
            SessionError::Storage
        })?;

        let mut text: String<12> = String::new();
        // u32 always fits in 12 characters.
        let _ = write!(text, "{}", count);
        self.reply(sink, text.as_bytes()).await;
        Ok(())
    }

    async fn erase<V, T>(
        &mut self,
        log: &mut PersistentLog<V>,
        sink: &mut T,
    ) -> Result<(), SessionError>
    where
        V: LogVolume,
        T: FrameSink,
    {
        log.erase().map_err(|e| {
            error!("ERASE failed: {:?}", e);
            SessionError::Storage
        })?;
        self.reply(sink, reply::ERASED).await;
        Ok(())
    }

    /// Streams the whole log as START/DATA/END. The count is captured here,
    /// once; appends made after this point wait for the next `SEND`.
    async fn stream<V, T>(
        &mut self,
        log: &mut PersistentLog<V>,
        sink: &mut T,
    ) -> Result<(), SessionError>
    where
        V: LogVolume,
        T: FrameSink,
    {
        let total = log.record_count().map_err(|e| {
            error!("SEND failed reading record count: {:?}", e);
            SessionError::Storage
        })?;

        if total == 0 {
            self.reply(sink, reply::EMPTY).await;
            return Ok(());
        }

        self.state = SessionState::Streaming { sent: 0, total };
        info!("streaming {} records", total);

        if !self.notify_or_abandon(sink, &protocol::encode_start(total)).await {
            return Ok(());
        }

        for index in 0..total {
            if index > 0 {
                // Backpressure between DATA frames; the await also yields to
                // the rest of the cooperative loop.
                self.delay.delay_us(self.pacing_us).await;
            }

            if !sink.is_connected() {
                self.on_disconnect();
                return Ok(());
            }

            let record = match log.read_record(index) {
                Ok(Some(record)) => record,
                // The log shrank underneath the stream (concurrent erase);
                // close out what the peer already has.
                Ok(None) => break,
                Err(e) => {
                    error!("SEND failed reading record {}: {:?}", index, e);
                    self.state = SessionState::Idle;
                    return Err(SessionError::Storage);
                }
            };

            if !self
                .notify_or_abandon(sink, &protocol::encode_data(&record))
                .await
            {
                return Ok(());
            }

            self.state = SessionState::Streaming {
                sent: index + 1,
                total,
            };
        }

        let _ = self.notify_or_abandon(sink, &protocol::encode_end()).await;
        self.state = SessionState::Idle;
        Ok(())
    }

    /// Sends one frame; on transport failure the transfer is abandoned and
    /// the session returns to idle. Returns whether to keep streaming.
    async fn notify_or_abandon<T: FrameSink>(&mut self, sink: &mut T, frame: &[u8]) -> bool {
        match sink.notify(frame).await {
            Ok(()) => true,
            Err(e) => {
                warn!("notify failed, abandoning transfer: {:?}", e);
                self.state = SessionState::Idle;
                false
            }
        }
    }

    /// Best-effort text reply; a lost reply is the peer's problem to retry.
    async fn reply<T: FrameSink>(&mut self, sink: &mut T, token: &[u8]) {
        if let Err(e) = sink.notify(token).await {
            warn!("reply dropped: {:?}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::consolidate::ConsolidatedRecord;
    use crate::link::protocol::{Frame, decode_frame};
    use crate::storage::ram_volume::RamVolume;
    use embassy_futures::block_on;
    use std::vec::Vec;

    struct NoopDelay;

    impl DelayNs for NoopDelay {
        async fn delay_ns(&mut self, _ns: u32) {}
    }

    /// Records every notification; optionally drops the connection after a
    /// fixed number of them.
    struct MockSink {
        frames: Vec<Vec<u8>>,
        drop_after: Option<usize>,
    }

    impl MockSink {
        fn new() -> Self {
            Self {
                frames: Vec::new(),
                drop_after: None,
            }
        }

        fn dropping_after(n: usize) -> Self {
            Self {
                frames: Vec::new(),
                drop_after: Some(n),
            }
        }
    }

    impl FrameSink for MockSink {
        type Error = &'static str;

        fn is_connected(&self) -> bool {
            self.drop_after.is_none_or(|n| self.frames.len() < n)
        }

        async fn notify(&mut self, payload: &[u8]) -> Result<(), Self::Error> {
            if !self.is_connected() {
                return Err("peer gone");
            }
            self.frames.push(payload.to_vec());
            Ok(())
        }
    }

    fn record(ts_ms: u32) -> ConsolidatedRecord {
        ConsolidatedRecord {
            avg_hr_x10: 700,
            avg_temp_x100: 3650,
            step_count: 1,
            ts_ms,
        }
    }

    fn log_with(records: u32) -> PersistentLog<RamVolume> {
        let mut log = PersistentLog::new(RamVolume::new());
        log.mount(true).unwrap();
        for i in 0..records {
            log.append(&record(i)).unwrap();
        }
        log
    }

    #[test]
    fn test_list_replies_with_count() {
        let mut log = log_with(7);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"LIST", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames, [b"7".to_vec()]);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_send_streams_all_records_framed() {
        let mut log = log_with(3);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames.len(), 5);
        assert_eq!(decode_frame(&sink.frames[0]), Ok(Frame::Start { count: 3 }));
        for i in 0..3u32 {
            assert_eq!(
                decode_frame(&sink.frames[1 + i as usize]),
                Ok(Frame::Data(record(i)))
            );
        }
        assert_eq!(decode_frame(&sink.frames[4]), Ok(Frame::End));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_send_empty_log_replies_empty() {
        let mut log = log_with(0);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();

        // The documented asymmetry: no zero-count START/END pair.
        assert_eq!(sink.frames, [reply::EMPTY.to_vec()]);
    }

    #[test]
    fn test_disconnect_mid_stream_restarts_from_zero() {
        let mut log = log_with(6);
        let mut session = Session::new(NoopDelay);

        // Connection drops after START + 2 DATA frames.
        let mut sink = MockSink::dropping_after(3);
        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames.len(), 3);
        assert_eq!(session.state(), SessionState::Idle);
        assert!(
            sink.frames.iter().all(|f| f[0] != protocol::END_MARKER),
            "an abandoned transfer must not be closed out"
        );

        // A fresh connection issues SEND again: the full transfer restarts
        // at record zero.
        let mut sink = MockSink::new();
        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames.len(), 8);
        assert_eq!(decode_frame(&sink.frames[0]), Ok(Frame::Start { count: 6 }));
        assert_eq!(decode_frame(&sink.frames[1]), Ok(Frame::Data(record(0))));
        assert_eq!(decode_frame(&sink.frames[7]), Ok(Frame::End));
    }

    #[test]
    fn test_send_count_is_captured_at_start() {
        let mut log = log_with(2);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();

        // Records appended after the stream closed belong to the next SEND.
        log.append(&record(99)).unwrap();
        assert_eq!(decode_frame(&sink.frames[0]), Ok(Frame::Start { count: 2 }));
        assert_eq!(sink.frames.len(), 4);

        let mut sink = MockSink::new();
        block_on(session.handle_write(b"SEND", &mut log, &mut sink)).unwrap();
        assert_eq!(decode_frame(&sink.frames[0]), Ok(Frame::Start { count: 3 }));
    }

    #[test]
    fn test_erase_acknowledges() {
        let mut log = log_with(4);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"ERASE", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames, [reply::ERASED.to_vec()]);
        assert_eq!(log.record_count().unwrap(), 0);
    }

    #[test]
    fn test_unknown_command_replies_unknown_and_stays_idle() {
        let mut log = log_with(1);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"REWIND", &mut log, &mut sink)).unwrap();

        assert_eq!(sink.frames, [reply::UNKNOWN.to_vec()]);
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_time_sync_stores_reference() {
        let mut log = log_with(0);
        let mut sink = MockSink::new();
        let mut session = Session::new(NoopDelay);

        block_on(session.handle_write(b"TIME:1732000000", &mut log, &mut sink)).unwrap();

        assert_eq!(session.wall_clock(), Some(1_732_000_000));
        assert_eq!(sink.frames, [reply::DONE.to_vec()]);
    }

    #[test]
    fn test_explicit_disconnect_resets_state() {
        let mut session: Session<NoopDelay> = Session::new(NoopDelay);
        session.state = SessionState::Streaming { sent: 2, total: 9 };

        session.on_disconnect();
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[test]
    fn test_config_overrides_pacing() {
        let config = DeviceConfig {
            pacing_ms: 9,
            ..DeviceConfig::default()
        };
        let session = Session::with_config(NoopDelay, &config);
        assert_eq!(session.pacing_us, 9_000);
    }
}
