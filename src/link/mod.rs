//! Wireless link surface: the control command protocol and the streaming
//! session that serves the persistent log to a paired client.

pub mod protocol;
pub mod session;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;

use crate::config::{CONTROL_QUEUE_DEPTH, MAX_CONTROL_WRITE};

/// One raw write received on the control characteristic.
pub type ControlWrite = heapless::Vec<u8, MAX_CONTROL_WRITE>;

/// Hands control writes from the transport callback context to the consumer
/// loop. Suitable for a `static`.
pub type ControlQueue = Channel<CriticalSectionRawMutex, ControlWrite, CONTROL_QUEUE_DEPTH>;
