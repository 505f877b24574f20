// Feedback synthesis
//
// Turns a rumble request from the game plus the latest vehicle state into
// motor and impulse-trigger intensities. Shaping runs in a fixed order where
// each layer only adds to what came before, except the reverse-braking
// override which replaces everything.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::common::settings::FeedbackConfig;
use crate::common::telemetry::VehicleState;

/// Left-motor request above which telemetry shaping engages.
pub const ENGAGE_THRESHOLD: f32 = 0.1;

pub const MOTOR_CEILING: f32 = 0.85;
pub const TRIGGER_CEILING: f32 = 0.7;

const COLLISION_THRESHOLD: f32 = 10.0;
const COLLISION_MEDIUM: (f32, f32) = (15.0, 30.0);
const COLLISION_HEAVY: f32 = 30.0;
const BUMP_LIGHT: f32 = 0.3;
const BUMP_MEDIUM: f32 = 0.5;
const BUMP_HEAVY: f32 = 0.7;

const SLIP_THRESHOLD: f32 = 1.0;
const SLIP_MOTOR_BOOST: f32 = 0.3;
const SLIP_TRIGGER_BASE: f32 = 0.3;

const ENGINE_LOAD_LIMIT: f32 = 0.5;
const ENGINE_LOAD_BUMPED: f32 = 0.7;

const REVERSE_BRAKE_THRESHOLD: f32 = 0.3;
const REVERSE_MOTOR_BASE: f32 = 0.5;
const REVERSE_TRIGGER: f32 = 0.4;

/// Rumble request from the game, each side in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct VibrationRequest {
    pub left_motor: f32,
    pub right_motor: f32,
}

impl VibrationRequest {
    pub fn new(left_motor: f32, right_motor: f32) -> Self {
        VibrationRequest {
            left_motor,
            right_motor,
        }
    }

    /// From XInput-style 16-bit motor speeds.
    pub fn from_raw(left_motor: u16, right_motor: u16) -> Self {
        VibrationRequest {
            left_motor: f32::from(left_motor) / 65535.0,
            right_motor: f32::from(right_motor) / 65535.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedbackOutput {
    pub left_motor: f32,
    pub right_motor: f32,
    pub left_trigger: f32,
    pub right_trigger: f32,
}

impl FeedbackOutput {
    pub const OFF: FeedbackOutput = FeedbackOutput {
        left_motor: 0.0,
        right_motor: 0.0,
        left_trigger: 0.0,
        right_trigger: 0.0,
    };

    /// Cap motors and triggers at their operational ceilings.
    pub fn clamped(self) -> Self {
        FeedbackOutput {
            left_motor: self.left_motor.min(MOTOR_CEILING),
            right_motor: self.right_motor.min(MOTOR_CEILING),
            left_trigger: self.left_trigger.min(TRIGGER_CEILING),
            right_trigger: self.right_trigger.min(TRIGGER_CEILING),
        }
    }
}

/// One-way switch: once telemetry shaping has engaged it stays engaged for
/// the rest of the session.
#[derive(Debug, Default)]
pub struct ActivationLatch(AtomicBool);

impl ActivationLatch {
    pub fn new() -> Self {
        ActivationLatch(AtomicBool::new(false))
    }

    pub fn is_engaged(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn engage(&self) {
        self.0.store(true, Ordering::Release);
    }
}

/// Result of one synthesis step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Synthesis {
    pub output: FeedbackOutput,
    /// Latch value after this step.
    pub engaged: bool,
}

/// Pulse added to both motors and the trigger curves when the car takes a
/// hit. Zero when the game is already rumbling hard enough to mask it.
pub fn collision_pulse(request: VibrationRequest, state: &VehicleState) -> f32 {
    let magnitude = state.collision_magnitude;
    if !(magnitude > COLLISION_THRESHOLD && request.left_motor < ENGAGE_THRESHOLD) {
        return 0.0;
    }
    if magnitude > COLLISION_HEAVY {
        BUMP_HEAVY
    } else if magnitude > COLLISION_MEDIUM.0 && magnitude < COLLISION_MEDIUM.1 {
        BUMP_MEDIUM
    } else {
        BUMP_LIGHT
    }
}

/// Exponential resistance curve rising toward redline.
pub fn engine_load_level(normalized_rpm: f32) -> f32 {
    0.5 * ((4.0 * normalized_rpm + 0.01).exp() / 60.0)
}

/// Shaped intensities before clamping, strength scaling of the triggers and
/// side swaps.
pub fn shape(
    request: VibrationRequest,
    state: &VehicleState,
    config: &FeedbackConfig,
    engaged: bool,
) -> Synthesis {
    let passthrough = FeedbackOutput {
        left_motor: request.left_motor * config.motors.left_strength,
        right_motor: request.right_motor * config.motors.right_strength,
        left_trigger: 0.0,
        right_trigger: 0.0,
    };

    if !(engaged || request.left_motor > ENGAGE_THRESHOLD) || state.is_paused() {
        return Synthesis {
            output: passthrough,
            engaged,
        };
    }

    let mut out = passthrough;

    let bump = collision_pulse(request, state);
    out.left_motor += bump;
    out.right_motor += bump;

    if request.left_motor > ENGAGE_THRESHOLD && state.slip > SLIP_THRESHOLD {
        out.left_trigger = 0.1 * request.left_motor + bump + SLIP_TRIGGER_BASE;
        out.left_motor += SLIP_MOTOR_BOOST;
        out.right_motor += SLIP_MOTOR_BOOST;
    }

    let level = engine_load_level(state.normalized_rpm) + bump;
    out.right_trigger = if level > ENGINE_LOAD_LIMIT {
        if bump > BUMP_LIGHT {
            ENGINE_LOAD_BUMPED
        } else {
            ENGINE_LOAD_LIMIT
        }
    } else {
        0.1 * request.right_motor + level
    };

    if state.is_reverse() && request.right_motor > REVERSE_BRAKE_THRESHOLD {
        out = FeedbackOutput {
            left_motor: REVERSE_MOTOR_BASE + request.left_motor * config.motors.left_strength,
            right_motor: REVERSE_MOTOR_BASE + request.right_motor * config.motors.right_strength,
            left_trigger: REVERSE_TRIGGER,
            right_trigger: REVERSE_TRIGGER,
        };
    }

    Synthesis {
        output: out,
        engaged: true,
    }
}

/// Clamp, scale triggers by their strengths, then apply side swaps.
/// Motors are only scaled inside `shape`.
pub fn finish(shaped: FeedbackOutput, config: &FeedbackConfig) -> FeedbackOutput {
    let clamped = shaped.clamped();
    let mut out = FeedbackOutput {
        left_trigger: clamped.left_trigger * config.triggers.left_strength,
        right_trigger: clamped.right_trigger * config.triggers.right_strength,
        ..clamped
    };
    if config.motors.swap_sides {
        std::mem::swap(&mut out.left_motor, &mut out.right_motor);
    }
    if config.triggers.swap_sides {
        std::mem::swap(&mut out.left_trigger, &mut out.right_trigger);
    }
    out
}

pub fn synthesize(
    request: VibrationRequest,
    state: &VehicleState,
    config: &FeedbackConfig,
    engaged: bool,
) -> Synthesis {
    let shaped = shape(request, state, config, engaged);
    Synthesis {
        output: finish(shaped.output, config),
        engaged: shaped.engaged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::settings::{MotorSettings, TriggerSettings};

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    fn driving() -> VehicleState {
        VehicleState {
            speed: 30.0,
            engine_idle_rpm: 1000.0,
            current_engine_rpm: 4000.0,
            engine_max_rpm: 7000.0,
            gear: 3,
            ..VehicleState::default()
        }
        .with_derived_metrics()
    }

    fn unit_config() -> FeedbackConfig {
        FeedbackConfig {
            triggers: TriggerSettings {
                left_strength: 1.0,
                right_strength: 1.0,
                swap_sides: false,
            },
            motors: MotorSettings::default(),
        }
    }

    #[test]
    fn passes_through_until_engaged() {
        let config = FeedbackConfig {
            motors: MotorSettings {
                left_strength: 0.5,
                right_strength: 0.8,
                swap_sides: false,
            },
            ..FeedbackConfig::default()
        };
        let state = VehicleState {
            tire_slip_ratios: [2.0; 4],
            accel_z: 50.0,
            ..driving()
        }
        .with_derived_metrics();

        let result = synthesize(VibrationRequest::new(0.05, 0.5), &state, &config, false);
        assert!(!result.engaged);
        assert!(approx(result.output.left_motor, 0.025));
        assert!(approx(result.output.right_motor, 0.4));
        assert_eq!(result.output.left_trigger, 0.0);
        assert_eq!(result.output.right_trigger, 0.0);
    }

    #[test]
    fn strong_left_request_engages_the_latch() {
        let result = synthesize(
            VibrationRequest::new(0.2, 0.2),
            &driving(),
            &FeedbackConfig::default(),
            false,
        );
        assert!(result.engaged);
        assert!(result.output.right_trigger > 0.0);
    }

    #[test]
    fn latch_keeps_shaping_after_request_drops() {
        let result = synthesize(
            VibrationRequest::new(0.0, 0.0),
            &driving(),
            &FeedbackConfig::default(),
            true,
        );
        assert!(result.engaged);
        assert!(result.output.right_trigger > 0.0);
    }

    #[test]
    fn paused_telemetry_zeroes_triggers_and_keeps_latch() {
        let state = VehicleState {
            current_engine_rpm: 0.0,
            tire_slip_ratios: [3.0; 4],
            accel_y: 40.0,
            gear: 0,
            ..driving()
        }
        .with_derived_metrics();

        for engaged in [false, true] {
            for request in [
                VibrationRequest::new(0.0, 0.0),
                VibrationRequest::new(0.05, 0.9),
                VibrationRequest::new(0.9, 0.9),
            ] {
                let result = synthesize(request, &state, &unit_config(), engaged);
                assert_eq!(result.output.left_trigger, 0.0);
                assert_eq!(result.output.right_trigger, 0.0);
                assert_eq!(result.engaged, engaged);
                assert!(approx(result.output.left_motor, request.left_motor.min(MOTOR_CEILING)));
            }
        }
    }

    #[test]
    fn collision_pulse_steps_up_with_magnitude() {
        let request = VibrationRequest::new(0.05, 0.0);
        let pulse = |magnitude: f32| {
            let state = VehicleState {
                collision_magnitude: magnitude,
                ..driving()
            };
            collision_pulse(request, &state)
        };

        assert_eq!(pulse(10.0), 0.0);
        assert_eq!(pulse(12.0), 0.3);
        assert_eq!(pulse(15.0), 0.3);
        assert_eq!(pulse(20.0), 0.5);
        assert_eq!(pulse(30.0), 0.3);
        assert_eq!(pulse(45.0), 0.7);
    }

    #[test]
    fn collision_pulse_is_masked_by_strong_rumble() {
        let state = VehicleState {
            collision_magnitude: 45.0,
            ..driving()
        };
        assert_eq!(collision_pulse(VibrationRequest::new(0.1, 0.0), &state), 0.0);
        assert_eq!(collision_pulse(VibrationRequest::new(0.6, 0.0), &state), 0.0);
    }

    #[test]
    fn harder_hits_rumble_harder() {
        let request = VibrationRequest::new(0.05, 0.05);
        let motors = |accel_z: f32| {
            let state = VehicleState { accel_z, ..driving() }.with_derived_metrics();
            let shaped = shape(request, &state, &unit_config(), true).output;
            (shaped.left_motor, shaped.right_motor)
        };

        let light = motors(12.0);
        let medium = motors(20.0);
        let heavy = motors(40.0);
        assert!(light.0 < medium.0 && medium.0 < heavy.0);
        assert!(light.1 < medium.1 && medium.1 < heavy.1);
        assert!(approx(light.0, 0.35));
        assert!(approx(medium.0, 0.55));
        assert!(approx(heavy.0, 0.75));
    }

    #[test]
    fn slip_warning_loads_left_trigger_and_motors() {
        let state = VehicleState {
            tire_slip_ratios: [0.6; 4],
            ..driving()
        }
        .with_derived_metrics();
        assert!(state.slip > 1.0);

        let shaped = shape(VibrationRequest::new(0.4, 0.1), &state, &unit_config(), false).output;
        assert!(approx(shaped.left_trigger, 0.04 + 0.3));
        assert!(approx(shaped.left_motor, 0.4 + 0.3));
        assert!(approx(shaped.right_motor, 0.1 + 0.3));
    }

    #[test]
    fn slip_of_exactly_one_does_not_warn() {
        let state = VehicleState {
            tire_slip_ratios: [0.5; 4],
            ..driving()
        }
        .with_derived_metrics();
        assert_eq!(state.slip, 1.0);

        let shaped = shape(VibrationRequest::new(0.5, 0.5), &state, &unit_config(), true).output;
        assert_eq!(shaped.left_trigger, 0.0);
        assert_eq!(shaped.left_motor, 0.5);
        assert_eq!(shaped.right_motor, 0.5);
    }

    #[test]
    fn engine_load_saturates_near_redline() {
        let state = VehicleState {
            current_engine_rpm: 7500.0,
            ..driving()
        }
        .with_derived_metrics();
        let shaped = shape(VibrationRequest::new(0.2, 0.2), &state, &unit_config(), false).output;
        assert_eq!(shaped.right_trigger, 0.5);

        let hit = VehicleState {
            accel_z: 40.0,
            ..state
        }
        .with_derived_metrics();
        let shaped = shape(VibrationRequest::new(0.0, 0.2), &hit, &unit_config(), true).output;
        assert_eq!(shaped.right_trigger, 0.7);
    }

    #[test]
    fn reverse_braking_overrides_everything() {
        let config = FeedbackConfig {
            motors: MotorSettings {
                left_strength: 0.5,
                right_strength: 0.5,
                swap_sides: false,
            },
            ..unit_config()
        };
        let state = VehicleState {
            gear: 0,
            current_engine_rpm: 6900.0,
            tire_slip_ratios: [2.0; 4],
            accel_y: 50.0,
            ..driving()
        }
        .with_derived_metrics();

        let result = synthesize(VibrationRequest::new(0.2, 0.4), &state, &config, true);
        assert!(approx(result.output.left_motor, 0.6));
        assert!(approx(result.output.right_motor, 0.7));
        assert_eq!(result.output.left_trigger, 0.4);
        assert_eq!(result.output.right_trigger, 0.4);
    }

    #[test]
    fn reverse_without_brake_keeps_shaping() {
        let state = VehicleState { gear: 0, ..driving() };
        let shaped = shape(VibrationRequest::new(0.2, 0.3), &state, &unit_config(), true).output;
        assert_ne!(shaped.left_trigger, 0.4);
    }

    #[test]
    fn cruising_scenario_only_uses_the_rpm_ramp() {
        let state = driving();
        assert_eq!(state.slip, 0.0);
        assert!(approx(state.normalized_rpm, 0.5));

        let config = FeedbackConfig::default();
        let request = VibrationRequest::new(0.2, 0.2);
        assert_eq!(collision_pulse(request, &state), 0.0);

        let result = synthesize(request, &state, &config, false);
        let expected_right = (0.1 * 0.2 + engine_load_level(state.normalized_rpm)) * 0.25;
        assert!(result.engaged);
        assert!(approx(result.output.left_motor, 0.2));
        assert!(approx(result.output.right_motor, 0.2));
        assert_eq!(result.output.left_trigger, 0.0);
        assert!(approx(result.output.right_trigger, expected_right));
    }

    #[test]
    fn finish_scales_triggers_but_not_motors() {
        let config = FeedbackConfig {
            triggers: TriggerSettings {
                left_strength: 0.5,
                right_strength: 0.25,
                swap_sides: false,
            },
            motors: MotorSettings {
                left_strength: 0.1,
                right_strength: 0.1,
                swap_sides: false,
            },
        };
        let out = finish(
            FeedbackOutput {
                left_motor: 2.0,
                right_motor: 0.5,
                left_trigger: 0.6,
                right_trigger: 0.9,
            },
            &config,
        );
        assert_eq!(out.left_motor, MOTOR_CEILING);
        assert_eq!(out.right_motor, 0.5);
        assert!(approx(out.left_trigger, 0.3));
        assert!(approx(out.right_trigger, 0.7 * 0.25));
    }

    #[test]
    fn swaps_apply_per_pair() {
        let mut config = unit_config();
        config.motors.swap_sides = true;
        let shaped = FeedbackOutput {
            left_motor: 0.1,
            right_motor: 0.2,
            left_trigger: 0.3,
            right_trigger: 0.4,
        };

        let out = finish(shaped, &config);
        assert_eq!((out.left_motor, out.right_motor), (0.2, 0.1));
        assert_eq!((out.left_trigger, out.right_trigger), (0.3, 0.4));

        config.triggers.swap_sides = true;
        let out = finish(shaped, &config);
        assert_eq!((out.left_trigger, out.right_trigger), (0.4, 0.3));
    }

    #[test]
    fn raw_request_normalizes_full_scale() {
        let request = VibrationRequest::from_raw(65535, 0);
        assert_eq!(request.left_motor, 1.0);
        assert_eq!(request.right_motor, 0.0);
    }

    #[test]
    fn latch_never_resets() {
        let latch = ActivationLatch::new();
        assert!(!latch.is_engaged());
        latch.engage();
        latch.engage();
        assert!(latch.is_engaged());
    }
}
