use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;

use crate::common::telemetry::VehicleState;

/// Latest decoded vehicle state, shared between the receive thread and
/// whoever polls for feedback.
///
/// Publishing replaces the whole value under the lock, so a reader always
/// sees one complete packet. The sequence number lets readers tell a fresh
/// snapshot from one they have already consumed.
#[derive(Debug, Default)]
pub struct SnapshotCell {
    state: Mutex<(u64, VehicleState)>,
    packets: AtomicU64,
    short_packets: AtomicU64,
    rejected_packets: AtomicU64,
    receive_errors: AtomicU64,
}

/// Receive-loop counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TelemetryStats {
    pub packets: u64,
    pub short_packets: u64,
    /// Datagrams of valid length the parser still refused.
    pub rejected_packets: u64,
    pub receive_errors: u64,
}

impl SnapshotCell {
    pub fn new() -> Self {
        SnapshotCell {
            ..Default::default()
        }
    }

    pub fn publish(&self, state: VehicleState) {
        {
            let mut slot = self.state.lock();
            slot.0 += 1;
            slot.1 = state;
        }
        self.packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn latest(&self) -> VehicleState {
        self.state.lock().1
    }

    /// Latest state together with its sequence number. Sequence 0 means
    /// nothing has been published yet.
    pub fn latest_with_sequence(&self) -> (u64, VehicleState) {
        *self.state.lock()
    }

    pub fn record_short_packet(&self) {
        self.short_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected_packet(&self) {
        self.rejected_packets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> TelemetryStats {
        TelemetryStats {
            packets: self.packets.load(Ordering::Relaxed),
            short_packets: self.short_packets.load(Ordering::Relaxed),
            rejected_packets: self.rejected_packets.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
        }
    }
}
