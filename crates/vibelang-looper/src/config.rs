//! Configuration file support for vibe-looper
//!
//! Configuration is stored in TOML format at:
//! - Linux: `~/.config/vibe-looper/config.toml`
//! - macOS: `~/Library/Application Support/vibe-looper/config.toml`
//! - Windows: `%APPDATA%\vibe-looper\config.toml`

use crate::buffer::DEFAULT_WINDOW_SECONDS;
use crate::error::{Error, Result};
use crate::generator::FallbackPolicy;
use crate::history::DEFAULT_HISTORY_CAPACITY;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Capture and generation settings
    pub looper: LooperSettings,
    /// MIDI host settings
    pub midi: MidiSettings,
}

impl Config {
    /// Load configuration from the default config file location
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        if path.exists() {
            Self::load_from(&path)
        } else {
            Err(Error::Config(format!("Config file not found at {:?}", path)))
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration or return default if not found
    pub fn load_or_default() -> Self {
        match Self::load() {
            Ok(config) => config,
            Err(Error::Config(_)) => Self::default(),
            Err(e) => {
                log::warn!("Ignoring unreadable config file: {}", e);
                Self::default()
            }
        }
    }

    /// Save configuration to the default config file location
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to an explicit path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the default configuration file path
    pub fn config_path() -> Result<PathBuf> {
        if let Some(proj_dirs) = ProjectDirs::from("", "", "vibe-looper") {
            Ok(proj_dirs.config_dir().join("config.toml"))
        } else {
            Err(Error::Config("Could not determine config directory".to_string()))
        }
    }

    /// Check value ranges that the type system does not
    pub fn validate(&self) -> Result<()> {
        if self.looper.window_seconds.is_nan() || self.looper.window_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "window_seconds must be positive, got {}",
                self.looper.window_seconds
            )));
        }
        if self.looper.history_capacity == 0 {
            return Err(Error::Config("history_capacity must be at least 1".to_string()));
        }
        for (name, cc) in [("capture_cc", self.midi.capture_cc), ("undo_cc", self.midi.undo_cc)] {
            if cc.is_some_and(|cc| cc > 127) {
                return Err(Error::Config(format!("{} must be 0-127", name)));
            }
        }
        if self.midi.control_channel.is_some_and(|ch| ch > 15) {
            return Err(Error::Config("control_channel must be 0-15".to_string()));
        }
        Ok(())
    }

    /// Create a default config file with comments
    pub fn create_default_config_file() -> Result<PathBuf> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, DEFAULT_CONFIG_FILE)?;
        Ok(path)
    }
}

const DEFAULT_CONFIG_FILE: &str = r#"# vibe-looper configuration file
# https://github.com/trusch/vibelang

[looper]
# How many seconds of playing are remembered for capture
window_seconds = 10.0

# How many captured loops are kept for undo
history_capacity = 10

# Fixed random seed for reproducible variations (optional)
# seed = 1234

# What to play when a note was never followed by anything in the loop:
# "repeat", "seed-position" or "random-observed"
fallback = "repeat"

[midi]
# JACK client name
client_name = "vibe-looper"

# MIDI port names
input_port = "midi_in"
output_port = "midi_out"

# Auto-connect these JACK MIDI sources to our input (optional)
# auto_connect_inputs = ["a2j:Midi Through [14] (capture): Midi Through Port-0"]

# Auto-connect our output to these JACK MIDI sinks (optional)
# auto_connect_outputs = ["fluidsynth:midi_00"]

# Control Change numbers that trigger capture and undo (value > 63)
capture_cc = 20
undo_cc = 21

# Only accept control changes on this channel (0-15, optional)
# control_channel = 0
"#;

/// Capture and generation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperSettings {
    /// Length of the retrospective window in seconds
    pub window_seconds: f64,
    /// Number of loops kept for undo
    pub history_capacity: usize,
    /// Random seed; `None` seeds from the OS
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Behaviour for pitches without recorded successors
    pub fallback: FallbackPolicy,
}

impl Default for LooperSettings {
    fn default() -> Self {
        Self {
            window_seconds: DEFAULT_WINDOW_SECONDS,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            seed: None,
            fallback: FallbackPolicy::default(),
        }
    }
}

/// MIDI settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MidiSettings {
    /// JACK client name
    pub client_name: String,
    /// MIDI input port name
    pub input_port: String,
    /// MIDI output port name
    pub output_port: String,
    /// Auto-connect these JACK MIDI outputs to our input
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_connect_inputs: Option<Vec<String>>,
    /// Auto-connect our output to these JACK MIDI inputs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_connect_outputs: Option<Vec<String>>,
    /// CC number mapped to capture
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_cc: Option<u8>,
    /// CC number mapped to undo
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_cc: Option<u8>,
    /// Restrict control changes to one channel
    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_channel: Option<u8>,
}

impl Default for MidiSettings {
    fn default() -> Self {
        Self {
            client_name: "vibe-looper".to_string(),
            input_port: "midi_in".to_string(),
            output_port: "midi_out".to_string(),
            auto_connect_inputs: None,
            auto_connect_outputs: None,
            capture_cc: Some(20),
            undo_cc: Some(21),
            control_channel: None,
        }
    }
}

impl MidiSettings {
    /// Parameter index bound to a control change, if any.
    ///
    /// Returns 0 for capture and 1 for undo.
    pub fn parameter_for_cc(&self, channel: u8, controller: u8) -> Option<u32> {
        if self.control_channel.is_some_and(|ch| ch != channel) {
            return None;
        }
        if self.capture_cc == Some(controller) {
            Some(crate::looper::PARAM_CAPTURE)
        } else if self.undo_cc == Some(controller) {
            Some(crate::looper::PARAM_UNDO)
        } else {
            None
        }
    }
}
