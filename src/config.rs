//! Pipeline configuration: compile-time constants plus the small set of
//! values a deployed unit may override at provisioning time.

use embassy_time::Duration;
use serde::{Deserialize, Serialize};

/// Advertised device name.
pub const DEVICE_NAME: &str = "vitals-node";

/// Primary telemetry service UUID.
pub const SERVICE_UUID: &str = "12345678-1234-5678-1234-56789abc0000";
/// Notify-capable data characteristic carrying frames and text replies.
pub const DATA_CHAR_UUID: &str = "12345678-1234-5678-1234-56789abc1001";
/// Write-capable control characteristic accepting ASCII commands.
pub const CONTROL_CHAR_UUID: &str = "12345678-1234-5678-1234-56789abc1002";

/// Transfer unit between the acquisition and consumer contexts.
pub const PAGE_BYTES: usize = 256;
/// Fixed page header size; the remainder is an exact multiple of the sample size.
pub const PAGE_HEADER_BYTES: usize = 16;
/// Samples packed per page: (256 - 16) / 20.
pub const SAMPLES_PER_PAGE: usize =
    (PAGE_BYTES - PAGE_HEADER_BYTES) / crate::sample::RAW_SAMPLE_BYTES;

/// Page slots in the producer/consumer ring (8 KiB of buffering).
pub const RING_CAPACITY: usize = 32;

/// Samples consolidated into one record: 2.5 s at the 50 Hz acquisition rate.
pub const SAMPLES_PER_WINDOW: usize = 125;

/// Step detector arm threshold on horizontal acceleration, in mg.
pub const STEP_ON_THRESHOLD_MG: i32 = 600;
/// Step detector re-arm threshold, in mg. Must be below the arm threshold.
pub const STEP_OFF_THRESHOLD_MG: i32 = 400;

/// Consolidated record file on the mounted volume (8.3-safe).
pub const LOG_FILE_NAME: &str = "vitals.bin";

/// Pause inserted between streamed DATA frames so notification bursts do not
/// overrun the peer's receive buffer. Tunable; does not affect framing.
pub const INTER_FRAME_PACING: Duration = Duration::from_millis(4);

/// Pending control writes buffered between the transport callback context and
/// the consumer loop.
pub const CONTROL_QUEUE_DEPTH: usize = 4;
/// Longest accepted control write ("TIME:" plus a u32 in decimal, padded).
pub const MAX_CONTROL_WRITE: usize = 20;

/// Per-unit overrides, stored postcard-encoded in the provisioning partition.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct DeviceConfig<'a> {
    pub device_name: &'a str,
    /// Inter-frame pacing in milliseconds.
    pub pacing_ms: u32,
    /// Reformat the log volume once if the first mount fails.
    pub format_on_mount_failure: bool,
}

impl Default for DeviceConfig<'_> {
    fn default() -> Self {
        Self {
            device_name: DEVICE_NAME,
            pacing_ms: INTER_FRAME_PACING.as_millis() as u32,
            format_on_mount_failure: true,
        }
    }
}

impl<'a> DeviceConfig<'a> {
    /// Encode into `buf`, returning the used prefix.
    pub fn encode<'b>(&self, buf: &'b mut [u8]) -> Result<&'b mut [u8], postcard::Error> {
        postcard::to_slice(self, buf)
    }

    /// Decode a postcard-encoded config, borrowing strings from `bytes`.
    pub fn decode(bytes: &'a [u8]) -> Result<Self, postcard::Error> {
        postcard::from_bytes(bytes)
    }
}
