// Background telemetry receiver
//
// Owns the UDP socket, decodes every datagram on a dedicated thread and
// publishes the result to a SnapshotCell. Lifecycle is a one-way state
// machine: Idle -> Starting -> Running -> Stopped.

use std::io;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, Shutdown, SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use tracing::{debug, info, trace, warn};

use crate::common::snapshot::{SnapshotCell, TelemetryStats};
use crate::common::telemetry::{ForzaDashParser, TelemetryParser, VehicleState, TELEMETRY_PORT};
use crate::common::util::{BridgeError, BridgeResult};

const RECV_BUFFER_SIZE: usize = 1024;
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopped,
}

struct ReceiverThread {
    /// Second handle on the receive socket, used to unblock `recv` on stop.
    control: UdpSocket,
    local_addr: SocketAddr,
    handle: JoinHandle<()>,
}

struct WorkerInner {
    state: WorkerState,
    receiver: Option<ReceiverThread>,
}

pub struct TelemetryWorker {
    bind_addr: SocketAddr,
    parser: Arc<dyn TelemetryParser>,
    snapshot: Arc<SnapshotCell>,
    shutdown: Arc<AtomicBool>,
    inner: Mutex<WorkerInner>,
}

impl Default for TelemetryWorker {
    fn default() -> Self {
        Self::new(SocketAddr::from((Ipv4Addr::UNSPECIFIED, TELEMETRY_PORT)))
    }
}

impl TelemetryWorker {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self::with_parser(bind_addr, Arc::new(ForzaDashParser))
    }

    /// Worker that decodes datagrams with `parser` instead of the Forza
    /// dash layout.
    pub fn with_parser(bind_addr: SocketAddr, parser: Arc<dyn TelemetryParser>) -> Self {
        TelemetryWorker {
            bind_addr,
            parser,
            snapshot: Arc::new(SnapshotCell::new()),
            shutdown: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(WorkerInner {
                state: WorkerState::Idle,
                receiver: None,
            }),
        }
    }

    /// Bind the socket and spawn the receive thread.
    ///
    /// Only the first call from `Idle` does anything. A bind failure leaves
    /// the worker `Stopped` for good and the snapshot zeroed.
    pub fn start(&self) -> BridgeResult {
        let mut inner = self.inner.lock();
        if inner.state != WorkerState::Idle {
            trace!(state = ?inner.state, "telemetry worker start ignored");
            return Ok(());
        }
        inner.state = WorkerState::Starting;

        let socket = match bind_socket(self.bind_addr) {
            Ok(socket) => socket,
            Err(source) => {
                inner.state = WorkerState::Stopped;
                return Err(BridgeError::BindFailure {
                    addr: self.bind_addr,
                    source,
                });
            }
        };
        let local_addr = socket.local_addr().unwrap_or(self.bind_addr);
        let control = match socket.try_clone() {
            Ok(control) => control,
            Err(source) => {
                inner.state = WorkerState::Stopped;
                return Err(BridgeError::BindFailure {
                    addr: self.bind_addr,
                    source,
                });
            }
        };

        let parser = Arc::clone(&self.parser);
        info!(
            address = %local_addr,
            game = parser.game_name(),
            packet_size = parser.expected_packet_size(),
            "listening for telemetry"
        );

        let snapshot = Arc::clone(&self.snapshot);
        let shutdown = Arc::clone(&self.shutdown);
        let spawned = thread::Builder::new()
            .name("telemetry-rx".to_string())
            .spawn(move || receive_loop(socket, parser, snapshot, shutdown));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(err) => {
                inner.state = WorkerState::Stopped;
                return Err(BridgeError::ThreadSpawn(err));
            }
        };

        inner.receiver = Some(ReceiverThread {
            control,
            local_addr,
            handle,
        });
        inner.state = WorkerState::Running;
        Ok(())
    }

    /// Stop the receive thread and wait for it to exit.
    ///
    /// The blocked `recv` is released by shutting the socket down and
    /// sending an empty datagram to it, so this never waits on game traffic.
    pub fn stop(&self) {
        let receiver = {
            let mut inner = self.inner.lock();
            if inner.state == WorkerState::Stopped {
                return;
            }
            inner.state = WorkerState::Stopped;
            inner.receiver.take()
        };
        self.shutdown.store(true, Ordering::Release);

        let Some(receiver) = receiver else {
            return;
        };

        if let Err(err) = SockRef::from(&receiver.control).shutdown(Shutdown::Both) {
            debug!(%err, "telemetry socket shutdown");
        }
        if let Err(err) = wake(receiver.local_addr) {
            debug!(%err, "telemetry wake-up datagram");
        }

        if receiver.handle.join().is_err() {
            warn!("telemetry thread panicked");
        }
        info!("telemetry worker stopped");
    }

    pub fn state(&self) -> WorkerState {
        self.inner.lock().state
    }

    /// Address the socket is bound to while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.inner
            .lock()
            .receiver
            .as_ref()
            .map(|receiver| receiver.local_addr)
    }

    pub fn bind_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Most recent snapshot; zeroed until the first packet arrives.
    pub fn latest(&self) -> VehicleState {
        self.snapshot.latest()
    }

    pub fn latest_with_sequence(&self) -> (u64, VehicleState) {
        self.snapshot.latest_with_sequence()
    }

    pub fn stats(&self) -> TelemetryStats {
        self.snapshot.stats()
    }
}

impl Drop for TelemetryWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn bind_socket(addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    socket.bind(&addr.into())?;
    Ok(socket.into())
}

fn wake(target: SocketAddr) -> io::Result<()> {
    let (local, loopback): (IpAddr, IpAddr) = match target {
        SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED.into(), Ipv4Addr::LOCALHOST.into()),
        SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED.into(), Ipv6Addr::LOCALHOST.into()),
    };
    let mut target = target;
    if target.ip().is_unspecified() {
        target.set_ip(loopback);
    }
    let socket = UdpSocket::bind(SocketAddr::new(local, 0))?;
    socket.send_to(&[], target)?;
    Ok(())
}

fn receive_loop(
    socket: UdpSocket,
    parser: Arc<dyn TelemetryParser>,
    snapshot: Arc<SnapshotCell>,
    shutdown: Arc<AtomicBool>,
) {
    let mut data = vec![0u8; RECV_BUFFER_SIZE.max(parser.expected_packet_size())];
    debug!("waiting for telemetry data");

    loop {
        let received = socket.recv(&mut data);
        if shutdown.load(Ordering::Acquire) {
            break;
        }

        match received {
            Ok(size) => match parser.parse(&data[..size]) {
                Ok(state) => {
                    trace!(
                        rpm = state.current_engine_rpm,
                        slip = state.slip,
                        gear = state.gear,
                        "telemetry packet"
                    );
                    snapshot.publish(state);
                }
                Err(BridgeError::ShortPacket { expected, actual }) => {
                    snapshot.record_short_packet();
                    debug!(expected, actual, "telemetry packet too small");
                }
                Err(err) => {
                    snapshot.record_rejected_packet();
                    debug!(%err, "telemetry packet rejected");
                }
            },
            Err(err) => {
                snapshot.record_receive_error();
                debug!(error = %BridgeError::ReceiveError(err), "retrying");
                thread::sleep(RECEIVE_RETRY_DELAY);
            }
        }
    }
}
