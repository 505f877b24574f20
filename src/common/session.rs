// Haptics session
//
// Owns everything one bridge instance needs: the telemetry worker, the
// current feedback config, the activation latch and the actuator sink.
// All methods take &self so the session can be shared between the thread
// submitting rumble requests and the one polling buttons.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::common::feedback::{
    synthesize, ActivationLatch, FeedbackOutput, VibrationRequest, ENGAGE_THRESHOLD,
};
use crate::common::settings::{AppSettings, FeedbackConfig, SettingsWatcher};
use crate::common::sink::ActuatorSink;
use crate::common::worker::{TelemetryWorker, WorkerState};

/// Button state relevant to the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GamepadButtons {
    pub left_shoulder: bool,
    pub right_shoulder: bool,
    pub menu: bool,
}

impl GamepadButtons {
    /// Both shoulders plus menu reloads the settings file.
    pub fn is_reload_chord(&self) -> bool {
        self.left_shoulder && self.right_shoulder && self.menu
    }
}

pub struct HapticsSession<S: ActuatorSink> {
    worker: TelemetryWorker,
    config: RwLock<FeedbackConfig>,
    latch: ActivationLatch,
    settings_path: Option<PathBuf>,
    watcher: Mutex<Option<SettingsWatcher>>,
    sink: Mutex<S>,
    chord_held: AtomicBool,
    sink_failed: AtomicBool,
}

impl<S: ActuatorSink> HapticsSession<S> {
    /// Create a session. No socket is opened until the first request that
    /// engages telemetry shaping.
    pub fn new(settings: &AppSettings, settings_path: Option<PathBuf>, sink: S) -> Self {
        Self::with_worker(
            TelemetryWorker::new(settings.telemetry.socket_addr()),
            settings.feedback,
            settings_path,
            sink,
        )
    }

    pub fn with_worker(
        worker: TelemetryWorker,
        config: FeedbackConfig,
        settings_path: Option<PathBuf>,
        sink: S,
    ) -> Self {
        let watcher = settings_path.as_deref().map(SettingsWatcher::new);
        HapticsSession {
            worker,
            config: RwLock::new(config),
            latch: ActivationLatch::new(),
            settings_path,
            watcher: Mutex::new(watcher),
            sink: Mutex::new(sink),
            chord_held: AtomicBool::new(false),
            sink_failed: AtomicBool::new(false),
        }
    }

    /// Shape one rumble request against the latest telemetry and forward the
    /// result to the sink. Never fails; without telemetry the request passes
    /// through scaled by the motor strengths.
    pub fn set_vibration(&self, request: VibrationRequest) -> FeedbackOutput {
        let engaged = self.latch.is_engaged();
        if engaged || request.left_motor > ENGAGE_THRESHOLD {
            self.ensure_telemetry();
        }

        let state = self.worker.latest();
        let config = *self.config.read();
        let synthesis = synthesize(request, &state, &config, engaged);

        if synthesis.engaged && !engaged {
            self.latch.engage();
            info!("telemetry feedback engaged");
        }

        self.forward(&synthesis.output);
        synthesis.output
    }

    fn ensure_telemetry(&self) {
        if self.worker.state() != WorkerState::Idle {
            return;
        }
        match self.worker.start() {
            Ok(()) => debug!("telemetry worker started"),
            Err(err) => warn!(%err, "telemetry unavailable, rumble passes through unchanged"),
        }
    }

    fn forward(&self, output: &FeedbackOutput) {
        if let Err(err) = self.sink.lock().apply(output) {
            if self.sink_failed.swap(true, Ordering::Relaxed) {
                debug!(%err, "actuator write failed");
            } else {
                warn!(%err, "actuator write failed");
            }
        }
    }

    /// Feed the current button state. Reloads settings once per press of
    /// the reload chord; returns whether a reload happened and succeeded.
    pub fn handle_buttons(&self, buttons: GamepadButtons) -> bool {
        let chord = buttons.is_reload_chord();
        let was_held = self.chord_held.swap(chord, Ordering::AcqRel);
        chord && !was_held && self.reload_config()
    }

    /// Re-read the settings file and swap in its feedback section. On any
    /// failure the previous config stays in effect.
    pub fn reload_config(&self) -> bool {
        let Some(path) = self.settings_path.as_deref() else {
            warn!("no settings file to reload");
            return false;
        };
        match AppSettings::load_from(path) {
            Ok(settings) => {
                *self.config.write() = settings.feedback;
                info!(path = ?path, "settings reloaded");
                true
            }
            Err(err) => {
                warn!(%err, "keeping previous settings");
                false
            }
        }
    }

    /// Reload when the settings file was edited since the last call.
    pub fn reload_if_modified(&self) -> bool {
        let modified = self
            .watcher
            .lock()
            .as_mut()
            .is_some_and(|watcher| watcher.poll());
        modified && self.reload_config()
    }

    pub fn config(&self) -> FeedbackConfig {
        *self.config.read()
    }

    pub fn settings_path(&self) -> Option<&Path> {
        self.settings_path.as_deref()
    }

    pub fn is_engaged(&self) -> bool {
        self.latch.is_engaged()
    }

    pub fn worker(&self) -> &TelemetryWorker {
        &self.worker
    }

    /// Stop telemetry and silence the actuators.
    pub fn shutdown(&self) {
        self.worker.stop();
        self.forward(&FeedbackOutput::OFF);
    }
}
