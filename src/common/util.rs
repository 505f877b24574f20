use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

/// Microsoft USB vendor id.
pub const XBOX_VID: u16 = 0x045e;

/// Controllers that expose impulse-trigger rumble over Bluetooth HID.
pub const XBOX_TRIGGER_RUMBLE_PIDS: &[u16] = &[
    0x02e0, // Xbox One S (first BT firmware)
    0x02fd, // Xbox One S
    0x0b05, // Elite Series 2
    0x0b13, // Xbox Series X|S
    0x0b20, // Xbox One S (BLE firmware)
    0x0b22, // Elite Series 2 (BLE firmware)
];

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("failed to bind telemetry socket on {addr}: {source}")]
    BindFailure {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("telemetry packet too short: expected {expected} bytes, got {actual}")]
    ShortPacket { expected: usize, actual: usize },

    #[error("malformed telemetry packet: {0}")]
    MalformedPacket(String),

    #[error("telemetry receive failed: {0}")]
    ReceiveError(#[source] io::Error),

    #[error("could not spawn telemetry thread: {0}")]
    ThreadSpawn(#[source] io::Error),

    #[error("could not locate a config directory")]
    ConfigDirUnavailable,

    #[error("failed to read settings from {path:?}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse settings from {path:?}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to write settings to {path:?}: {message}")]
    ConfigWrite { path: PathBuf, message: String },

    #[error("controller HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("no supported controller found")]
    DeviceNotFound,
}

pub type BridgeResult<T = ()> = Result<T, BridgeError>;

/// Map a normalized intensity onto the `0..=100` percent scale used by
/// controller rumble reports.
pub fn intensity_to_percent(value: f32) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    (value.clamp(0.0, 1.0) * 100.0).round() as u8
}
