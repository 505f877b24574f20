// Settings persistence for the haptics bridge
//
// Handles loading/saving of user preferences including:
// - Telemetry bind address and UDP port
// - Per-side trigger and motor strengths
// - Left/right swap flags
// - Persistent storage to <config dir>/Forza-Haptics-Bridge/settings.toml
// - CLI argument override support

use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::common::telemetry::TELEMETRY_PORT;
use crate::common::util::{BridgeError, BridgeResult};

const CONFIG_DIR_NAME: &str = "Forza-Haptics-Bridge";
const CONFIG_FILE_NAME: &str = "settings.toml";

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TelemetrySettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: TELEMETRY_PORT,
        }
    }
}

impl TelemetrySettings {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct TriggerSettings {
    pub left_strength: f32,
    pub right_strength: f32,
    pub swap_sides: bool,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            left_strength: 0.25,
            right_strength: 0.25,
            swap_sides: false,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct MotorSettings {
    pub left_strength: f32,
    pub right_strength: f32,
    pub swap_sides: bool,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            left_strength: 1.0,
            right_strength: 1.0,
            swap_sides: false,
        }
    }
}

/// The part of the settings the feedback engine reads on every request.
/// Replaced as a whole on reload.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct FeedbackConfig {
    pub triggers: TriggerSettings,
    pub motors: MotorSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct AppSettings {
    pub telemetry: TelemetrySettings,
    #[serde(flatten)]
    pub feedback: FeedbackConfig,
}

impl AppSettings {
    /// Get the config file path in the user's config directory
    pub fn config_path() -> BridgeResult<PathBuf> {
        let mut path = dirs::config_dir().ok_or(BridgeError::ConfigDirUnavailable)?;
        path.push(CONFIG_DIR_NAME);
        path.push(CONFIG_FILE_NAME);
        Ok(path)
    }

    /// Read and parse a settings file. Missing keys take their defaults.
    pub fn load_from(path: &Path) -> BridgeResult<Self> {
        let contents = fs::read_to_string(path).map_err(|source| BridgeError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| BridgeError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load settings from `path`, or return defaults if it can't be read.
    pub fn load_or_default(path: &Path) -> Self {
        if path.exists() {
            match Self::load_from(path) {
                Ok(settings) => {
                    info!(path = ?path, "loaded settings");
                    return settings;
                }
                Err(err) => warn!(%err, "falling back to default settings"),
            }
        } else {
            info!(path = ?path, "no settings file, using defaults");
        }
        Self::default()
    }

    /// Save settings, creating the parent directory if needed
    pub fn save_to(&self, path: &Path) -> BridgeResult {
        let write_error = |message: String| BridgeError::ConfigWrite {
            path: path.to_path_buf(),
            message,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| write_error(e.to_string()))?;
            }
        }
        let contents = toml::to_string_pretty(self).map_err(|e| write_error(e.to_string()))?;
        fs::write(path, contents).map_err(|e| write_error(e.to_string()))?;
        info!(path = ?path, "settings saved");
        Ok(())
    }

    /// Get the effective port (command line override or saved setting)
    pub fn effective_port(&self, cli_port: Option<u16>) -> u16 {
        cli_port.unwrap_or(self.telemetry.port)
    }
}

/// Notices edits to the settings file through its modification time.
#[derive(Debug)]
pub struct SettingsWatcher {
    path: PathBuf,
    last_modified: Option<SystemTime>,
}

impl SettingsWatcher {
    pub fn new(path: &Path) -> Self {
        SettingsWatcher {
            path: path.to_path_buf(),
            last_modified: modified_time(path),
        }
    }

    /// True once for each new modification time. A deleted file is not a
    /// change worth reloading.
    pub fn poll(&mut self) -> bool {
        let current = modified_time(&self.path);
        if current == self.last_modified {
            return false;
        }
        self.last_modified = current;
        current.is_some()
    }
}

fn modified_time(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}
