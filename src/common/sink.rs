use hidapi::{HidApi, HidDevice};
use tracing::{debug, info};

use crate::common::feedback::FeedbackOutput;
use crate::common::util::{
    intensity_to_percent, BridgeError, BridgeResult, XBOX_TRIGGER_RUMBLE_PIDS, XBOX_VID,
};

/// Receives the final actuator intensities.
pub trait ActuatorSink {
    fn apply(&mut self, output: &FeedbackOutput) -> BridgeResult;
}

const RUMBLE_REPORT_ID: u8 = 0x03;
/// Enable bits for right motor, left motor, right trigger, left trigger.
const RUMBLE_ENABLE_ALL: u8 = 0x0f;
const RUMBLE_ON_TIME: u8 = 0xff;
const RUMBLE_OFF_TIME: u8 = 0x00;
const RUMBLE_REPEAT: u8 = 0xeb;

/// Build the Bluetooth HID rumble output report.
pub fn rumble_report(output: &FeedbackOutput) -> [u8; 9] {
    [
        RUMBLE_REPORT_ID,
        RUMBLE_ENABLE_ALL,
        intensity_to_percent(output.left_trigger),
        intensity_to_percent(output.right_trigger),
        intensity_to_percent(output.left_motor),
        intensity_to_percent(output.right_motor),
        RUMBLE_ON_TIME,
        RUMBLE_OFF_TIME,
        RUMBLE_REPEAT,
    ]
}

/// Xbox-family controller with impulse triggers, driven over HID.
pub struct XboxHidSink {
    device: HidDevice,
    last_report: Option<[u8; 9]>,
}

impl XboxHidSink {
    /// Open the first supported controller.
    pub fn open() -> BridgeResult<Self> {
        let hid = HidApi::new()?;
        Self::open_with(&hid)
    }

    pub fn open_with(hid: &HidApi) -> BridgeResult<Self> {
        let info = hid
            .device_list()
            .find(|device| {
                device.vendor_id() == XBOX_VID
                    && XBOX_TRIGGER_RUMBLE_PIDS.contains(&device.product_id())
            })
            .ok_or(BridgeError::DeviceNotFound)?;
        info!(
            product_id = format_args!("{:04x}", info.product_id()),
            product = info.product_string().unwrap_or("unknown"),
            "controller connected"
        );
        let device = info.open_device(hid)?;
        Ok(XboxHidSink {
            device,
            last_report: None,
        })
    }
}

impl ActuatorSink for XboxHidSink {
    fn apply(&mut self, output: &FeedbackOutput) -> BridgeResult {
        let report = rumble_report(output);
        // Each write restarts the rumble envelope; skip repeats.
        if self.last_report == Some(report) {
            return Ok(());
        }
        self.device.write(&report)?;
        self.last_report = Some(report);
        Ok(())
    }
}

impl Drop for XboxHidSink {
    fn drop(&mut self) {
        if let Err(err) = self.device.write(&rumble_report(&FeedbackOutput::OFF)) {
            debug!(%err, "could not silence controller");
        }
    }
}

/// Logs every output instead of driving hardware.
#[derive(Debug, Default)]
pub struct TracingSink {
    last: Option<FeedbackOutput>,
}

impl TracingSink {
    pub fn new() -> Self {
        TracingSink {
            ..Default::default()
        }
    }
}

impl ActuatorSink for TracingSink {
    fn apply(&mut self, output: &FeedbackOutput) -> BridgeResult {
        if self.last.as_ref() != Some(output) {
            debug!(
                left_motor = output.left_motor,
                right_motor = output.right_motor,
                left_trigger = output.left_trigger,
                right_trigger = output.right_trigger,
                "feedback"
            );
            self.last = Some(*output);
        }
        Ok(())
    }
}

impl<S: ActuatorSink + ?Sized> ActuatorSink for Box<S> {
    fn apply(&mut self, output: &FeedbackOutput) -> BridgeResult {
        (**self).apply(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_layout_orders_triggers_before_motors() {
        let report = rumble_report(&FeedbackOutput {
            left_motor: 0.85,
            right_motor: 0.5,
            left_trigger: 0.1,
            right_trigger: 0.18,
        });
        assert_eq!(report, [0x03, 0x0f, 10, 18, 85, 50, 0xff, 0x00, 0xeb]);
    }

    #[test]
    fn off_report_is_silent() {
        let report = rumble_report(&FeedbackOutput::OFF);
        assert_eq!(&report[2..6], &[0, 0, 0, 0]);
    }

    #[test]
    fn tracing_sink_accepts_everything() {
        let mut sink = TracingSink::new();
        sink.apply(&FeedbackOutput::OFF).unwrap();
        sink.apply(&FeedbackOutput::OFF).unwrap();
        assert_eq!(sink.last, Some(FeedbackOutput::OFF));
    }
}
