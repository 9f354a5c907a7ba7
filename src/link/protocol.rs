//! Wire protocol: ASCII control commands in, START/DATA/END frames and text
//! replies out.
//!
//! The framing must round-trip byte-exactly with the companion client:
//! - START: marker `b'C'` + u32 LE record count (5 bytes), once per transfer
//! - DATA:  marker `b'D'` + one 10-byte record (11 bytes), in log order
//! - END:   marker `b'E'` (1 byte), after the last record
//!
//! Non-streaming responses are plain-text tokens ([`reply`]) or a decimal
//! record count, carried on the same notify characteristic.

use thiserror_no_std::Error;

use crate::consolidate::{ConsolidatedRecord, RECORD_BYTES};

pub const START_MARKER: u8 = b'C';
pub const DATA_MARKER: u8 = b'D';
pub const END_MARKER: u8 = b'E';

pub const START_FRAME_BYTES: usize = 5;
pub const DATA_FRAME_BYTES: usize = 1 + RECORD_BYTES;

/// Plain-text reply tokens.
pub mod reply {
    /// Command carried out (time sync).
    pub const DONE: &[u8] = b"DONE";
    /// `SEND` against an empty log; no START/END pair is produced.
    pub const EMPTY: &[u8] = b"EMPTY";
    /// Log erased.
    pub const ERASED: &[u8] = b"ERASED";
    /// Command not recognized.
    pub const UNKNOWN: &[u8] = b"UNKNOWN";
}

/// A control write, decoded once at the protocol boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Report the number of stored records.
    List,
    /// Stream the whole log as START/DATA/END frames.
    Send,
    /// Remove the stored log.
    Erase,
    /// Wall-clock sync: unix seconds supplied by the client.
    TimeSync(u32),
}

impl Command {
    /// Parses one control write. `None` is an unknown command and must be
    /// answered with [`reply::UNKNOWN`].
    pub fn parse(raw: &[u8]) -> Option<Self> {
        let text = core::str::from_utf8(raw).ok()?;
        let text = text.trim_matches(|c: char| c == '\0' || c.is_ascii_whitespace());

        match text {
            "LIST" => Some(Self::List),
            "SEND" => Some(Self::Send),
            "ERASE" => Some(Self::Erase),
            _ => {
                let seconds = text.strip_prefix("TIME:")?;
                seconds.parse::<u32>().ok().map(Self::TimeSync)
            }
        }
    }
}

pub fn encode_start(count: u32) -> [u8; START_FRAME_BYTES] {
    let mut frame = [0u8; START_FRAME_BYTES];
    frame[0] = START_MARKER;
    frame[1..5].copy_from_slice(&count.to_le_bytes());
    frame
}

pub fn encode_data(record: &ConsolidatedRecord) -> [u8; DATA_FRAME_BYTES] {
    let mut frame = [0u8; DATA_FRAME_BYTES];
    frame[0] = DATA_MARKER;
    frame[1..].copy_from_slice(&record.to_bytes());
    frame
}

pub const fn encode_end() -> [u8; 1] {
    [END_MARKER]
}

/// A decoded frame, as the client-side parser sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    Start { count: u32 },
    Data(ConsolidatedRecord),
    End,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("empty frame")]
    Empty,
    #[error("unknown frame marker {0:#04x}")]
    UnknownMarker(u8),
    #[error("frame length {got} invalid for marker {marker:#04x}")]
    Length { marker: u8, got: usize },
}

/// Decodes one notification payload. Kept independent of the encoders so the
/// round-trip can be verified against the documented layout.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame, FrameError> {
    let (&marker, payload) = bytes.split_first().ok_or(FrameError::Empty)?;

    match marker {
        START_MARKER => {
            let count: [u8; 4] = payload.try_into().map_err(|_| FrameError::Length {
                marker,
                got: bytes.len(),
            })?;
            Ok(Frame::Start {
                count: u32::from_le_bytes(count),
            })
        }
        DATA_MARKER => {
            let record: [u8; RECORD_BYTES] =
                payload.try_into().map_err(|_| FrameError::Length {
                    marker,
                    got: bytes.len(),
                })?;
            Ok(Frame::Data(ConsolidatedRecord::from_bytes(&record)))
        }
        END_MARKER => {
            if payload.is_empty() {
                Ok(Frame::End)
            } else {
                Err(FrameError::Length {
                    marker,
                    got: bytes.len(),
                })
            }
        }
        other => Err(FrameError::UnknownMarker(other)),
    }
}
