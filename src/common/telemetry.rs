// Telemetry parsing for Forza "Data Out" packets
//
// Decodes the fixed-offset Horizon dash layout into a VehicleState and
// derives the three metrics the feedback engine shapes against:
// - combined tire slip
// - normalized engine RPM
// - collision magnitude

use crate::common::util::{BridgeError, BridgeResult};

/// Port Forza sends "Data Out" packets to by default.
pub const TELEMETRY_PORT: u16 = 9999;

/// Highest offset used (gear at 319) plus its width.
pub const MIN_PACKET_SIZE: usize = 320;

/// Keeps normalized RPM off zero when the engine sits exactly at idle.
pub const RPM_EPSILON: f32 = 0.001;

const OFF_ENGINE_MAX_RPM: usize = 8;
const OFF_ENGINE_IDLE_RPM: usize = 12;
const OFF_CURRENT_ENGINE_RPM: usize = 16;
const OFF_ACCEL_X: usize = 20; // lateral
const OFF_ACCEL_Y: usize = 24; // vertical
const OFF_ACCEL_Z: usize = 28; // longitudinal
const OFF_TIRE_SLIP_RATIO_FL: usize = 84;
const OFF_TIRE_SLIP_RATIO_FR: usize = 88;
const OFF_TIRE_SLIP_RATIO_RL: usize = 92;
const OFF_TIRE_SLIP_RATIO_RR: usize = 96;
const OFF_SPEED: usize = 256;
const OFF_GEAR: usize = 319;

const TIRE_SLIP_OFFSETS: [usize; 4] = [
    OFF_TIRE_SLIP_RATIO_FL,
    OFF_TIRE_SLIP_RATIO_FR,
    OFF_TIRE_SLIP_RATIO_RL,
    OFF_TIRE_SLIP_RATIO_RR,
];

/// Decoded vehicle snapshot.
///
/// `current_engine_rpm == 0.0` means the game is paused or telemetry is not
/// flowing; the zero value doubles as "no data yet".
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VehicleState {
    pub speed: f32,
    pub engine_idle_rpm: f32,
    pub current_engine_rpm: f32,
    pub engine_max_rpm: f32,
    /// Front-left, front-right, rear-left, rear-right.
    pub tire_slip_ratios: [f32; 4],
    pub accel_x: f32,
    pub accel_y: f32,
    pub accel_z: f32,
    /// 0 is reverse.
    pub gear: u8,

    /// Euclidean norm of the four slip ratios. Above 1 the tires are sliding.
    pub slip: f32,
    /// 0 at idle, 1 at redline.
    pub normalized_rpm: f32,
    /// Vertical/longitudinal acceleration magnitude. Lateral is left out.
    pub collision_magnitude: f32,
}

impl VehicleState {
    /// Recompute `slip`, `normalized_rpm` and `collision_magnitude` from the
    /// raw fields.
    pub fn with_derived_metrics(mut self) -> Self {
        self.slip = self
            .tire_slip_ratios
            .iter()
            .map(|ratio| ratio * ratio)
            .sum::<f32>()
            .sqrt();
        self.normalized_rpm = normalized_rpm(
            self.current_engine_rpm,
            self.engine_idle_rpm,
            self.engine_max_rpm,
        );
        self.collision_magnitude =
            (self.accel_z * self.accel_z + self.accel_y * self.accel_y).sqrt();
        self
    }

    pub fn is_paused(&self) -> bool {
        self.current_engine_rpm == 0.0
    }

    pub fn is_reverse(&self) -> bool {
        self.gear == 0
    }
}

fn normalized_rpm(current: f32, idle: f32, max: f32) -> f32 {
    let range = max - idle;
    if range.is_nan() || range <= 0.0 {
        return 0.0;
    }
    let value = (current - idle + RPM_EPSILON) / range;
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn read_f32_le(data: &[u8], offset: usize) -> f32 {
    data.get(offset..offset + 4)
        .and_then(|bytes| <[u8; 4]>::try_from(bytes).ok())
        .map(f32::from_le_bytes)
        .unwrap_or(0.0)
}

fn write_f32_le(buf: &mut [u8], offset: usize, value: f32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

/// Decode one datagram. Anything at or beyond `MIN_PACKET_SIZE` bytes is
/// accepted; trailing bytes are ignored.
pub fn decode(data: &[u8]) -> BridgeResult<VehicleState> {
    if data.len() < MIN_PACKET_SIZE {
        return Err(BridgeError::ShortPacket {
            expected: MIN_PACKET_SIZE,
            actual: data.len(),
        });
    }

    let mut tire_slip_ratios = [0.0; 4];
    for (ratio, offset) in tire_slip_ratios.iter_mut().zip(TIRE_SLIP_OFFSETS) {
        *ratio = read_f32_le(data, offset);
    }

    let state = VehicleState {
        speed: read_f32_le(data, OFF_SPEED),
        engine_idle_rpm: read_f32_le(data, OFF_ENGINE_IDLE_RPM),
        current_engine_rpm: read_f32_le(data, OFF_CURRENT_ENGINE_RPM),
        engine_max_rpm: read_f32_le(data, OFF_ENGINE_MAX_RPM),
        tire_slip_ratios,
        accel_x: read_f32_le(data, OFF_ACCEL_X),
        accel_y: read_f32_le(data, OFF_ACCEL_Y),
        accel_z: read_f32_le(data, OFF_ACCEL_Z),
        gear: data.get(OFF_GEAR).copied().unwrap_or(0),
        ..VehicleState::default()
    };

    Ok(state.with_derived_metrics())
}

/// Write the raw fields of `state` at their wire offsets. Bytes not covered
/// by the layout are left zeroed. Used to replay or synthesize packets.
pub fn encode(state: &VehicleState) -> [u8; MIN_PACKET_SIZE] {
    let mut buf = [0u8; MIN_PACKET_SIZE];
    write_f32_le(&mut buf, OFF_ENGINE_MAX_RPM, state.engine_max_rpm);
    write_f32_le(&mut buf, OFF_ENGINE_IDLE_RPM, state.engine_idle_rpm);
    write_f32_le(&mut buf, OFF_CURRENT_ENGINE_RPM, state.current_engine_rpm);
    write_f32_le(&mut buf, OFF_ACCEL_X, state.accel_x);
    write_f32_le(&mut buf, OFF_ACCEL_Y, state.accel_y);
    write_f32_le(&mut buf, OFF_ACCEL_Z, state.accel_z);
    for (ratio, offset) in state.tire_slip_ratios.iter().zip(TIRE_SLIP_OFFSETS) {
        write_f32_le(&mut buf, offset, *ratio);
    }
    write_f32_le(&mut buf, OFF_SPEED, state.speed);
    buf[OFF_GEAR] = state.gear;
    buf
}

/// Trait for turning raw datagrams into vehicle snapshots
pub trait TelemetryParser: Send + Sync {
    fn parse(&self, data: &[u8]) -> BridgeResult<VehicleState>;

    /// Smallest datagram the parser can decode
    fn expected_packet_size(&self) -> usize;

    /// Game name for logging
    fn game_name(&self) -> &'static str;
}

/// Forza Horizon "Dash" format parser
#[derive(Debug, Default, Clone, Copy)]
pub struct ForzaDashParser;

impl TelemetryParser for ForzaDashParser {
    fn parse(&self, data: &[u8]) -> BridgeResult<VehicleState> {
        decode(data)
    }

    fn expected_packet_size(&self) -> usize {
        MIN_PACKET_SIZE
    }

    fn game_name(&self) -> &'static str {
        "Forza Horizon"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_state() -> VehicleState {
        VehicleState {
            speed: 30.0,
            engine_idle_rpm: 1000.0,
            current_engine_rpm: 4000.0,
            engine_max_rpm: 7000.0,
            tire_slip_ratios: [0.1, -0.2, 0.3, 1.5],
            accel_x: -3.25,
            accel_y: 9.5,
            accel_z: 12.0,
            gear: 3,
            ..VehicleState::default()
        }
        .with_derived_metrics()
    }

    #[test]
    fn equal_slip_ratios_double_the_ratio() {
        let state = VehicleState {
            tire_slip_ratios: [0.5; 4],
            ..VehicleState::default()
        }
        .with_derived_metrics();
        assert!((state.slip - 1.0).abs() < 1e-6);
    }

    #[test]
    fn normalized_rpm_at_idle_is_tiny_but_positive() {
        let state = VehicleState {
            engine_idle_rpm: 1000.0,
            current_engine_rpm: 1000.0,
            engine_max_rpm: 7000.0,
            ..VehicleState::default()
        }
        .with_derived_metrics();
        assert!(state.normalized_rpm > 0.0);
        assert!((state.normalized_rpm - RPM_EPSILON / 6000.0).abs() < 1e-9);
    }

    #[test]
    fn normalized_rpm_is_zero_without_an_rpm_range() {
        let state = VehicleState {
            current_engine_rpm: 800.0,
            ..VehicleState::default()
        }
        .with_derived_metrics();
        assert_eq!(state.normalized_rpm, 0.0);
    }

    #[test]
    fn collision_magnitude_ignores_lateral_axis() {
        let state = VehicleState {
            accel_x: 100.0,
            accel_y: 3.0,
            accel_z: 4.0,
            ..VehicleState::default()
        }
        .with_derived_metrics();
        assert!((state.collision_magnitude - 5.0).abs() < 1e-6);
    }

    #[test]
    fn decode_reads_documented_offsets() {
        let mut buf = [0u8; MIN_PACKET_SIZE];
        buf[8..12].copy_from_slice(&7000.0f32.to_le_bytes());
        buf[12..16].copy_from_slice(&1000.0f32.to_le_bytes());
        buf[16..20].copy_from_slice(&4000.0f32.to_le_bytes());
        buf[256..260].copy_from_slice(&30.0f32.to_le_bytes());
        buf[319] = 3;

        let state = decode(&buf).unwrap();
        assert_eq!(state.engine_max_rpm, 7000.0);
        assert_eq!(state.engine_idle_rpm, 1000.0);
        assert_eq!(state.current_engine_rpm, 4000.0);
        assert_eq!(state.speed, 30.0);
        assert_eq!(state.gear, 3);
        assert_eq!(state.slip, 0.0);
        assert!((state.normalized_rpm - 0.5).abs() < 1e-4);
    }

    #[test]
    fn decode_rejects_short_packets() {
        let buf = [0u8; MIN_PACKET_SIZE - 1];
        match decode(&buf) {
            Err(BridgeError::ShortPacket { expected, actual }) => {
                assert_eq!(expected, MIN_PACKET_SIZE);
                assert_eq!(actual, MIN_PACKET_SIZE - 1);
            }
            other => panic!("expected ShortPacket, got {other:?}"),
        }
    }

    #[test]
    fn decode_accepts_longer_packets() {
        let mut buf = vec![0u8; 331];
        buf[..MIN_PACKET_SIZE].copy_from_slice(&encode(&sample_state()));
        assert_eq!(decode(&buf).unwrap(), sample_state());
    }

    #[test]
    fn encode_then_decode_is_bit_exact() {
        let expected = sample_state();
        let decoded = decode(&encode(&expected)).unwrap();
        assert_eq!(decoded.speed.to_bits(), expected.speed.to_bits());
        assert_eq!(decoded.accel_x.to_bits(), expected.accel_x.to_bits());
        assert_eq!(decoded, expected);
    }

    #[test]
    fn zero_state_reads_as_paused() {
        let state = VehicleState::default();
        assert!(state.is_paused());
        assert!(state.is_reverse());
    }

    #[test]
    fn dash_parser_reports_layout() {
        let parser = ForzaDashParser;
        assert_eq!(parser.expected_packet_size(), MIN_PACKET_SIZE);
        assert!(parser.parse(&[0u8; 16]).is_err());
    }
}
