use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::error::CaptureError;

/// Configuration for an audio handler, fixed at construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfiguration {
    /// Directory where recording files are written.
    pub output_directory: PathBuf,

    /// Prefix of every recording file name (default: `recording-`).
    pub file_prefix: String,

    /// Extend the active recording when the hotword repeats (default: false).
    pub continue_recording: bool,

    /// Delete the file of a recording that gets interrupted (default: false).
    pub delete_active_recording: bool,

    /// Detector sensitivity per hotword. A single value applies to every
    /// hotword; an empty list keeps the model defaults.
    pub sensitivity: Vec<f32>,

    /// Input volume multiplier handed to the detector (default: 1.0).
    pub audio_gain: f32,

    /// Frames per audio period requested from the input (default: 2048).
    pub frames_per_buffer: u32,

    /// Seconds of audio the detection buffer holds (default: 5).
    pub detection_buffer_secs: f64,

    /// Added to the post-roll length when scheduling the stop timer (default: 2).
    pub stop_grace_secs: f64,

    /// Pause after handling a hotword before the next detection cycle (default: 1).
    pub settle_secs: f64,

    /// How often a recorder drains its post-roll buffer to disk (default: 3).
    pub write_poll_secs: f64,

    /// Stop listening after this many consecutive detector errors.
    /// `None` keeps listening forever.
    pub max_consecutive_detector_errors: Option<u32>,
}

impl CaptureConfiguration {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.audio_gain.is_finite() && self.audio_gain > 0.0) {
            return Err(format!("audio gain must be positive: {}", self.audio_gain));
        }
        if self.frames_per_buffer == 0 {
            return Err("frames per buffer must be positive".into());
        }
        positive("detection buffer length", self.detection_buffer_secs)?;
        positive("write poll interval", self.write_poll_secs)?;
        non_negative("stop grace", self.stop_grace_secs)?;
        non_negative("settle interval", self.settle_secs)?;
        if let Some(&bad) = self.sensitivity.iter().find(|s| !s.is_finite()) {
            return Err(format!("invalid sensitivity: {}", bad));
        }
        if self.max_consecutive_detector_errors == Some(0) {
            return Err("max consecutive detector errors must be at least 1".into());
        }
        Ok(())
    }

    /// Expand the sensitivity list to one entry per hotword.
    ///
    /// A single value is repeated for every hotword. Any other non-empty
    /// list must match `num_hotwords` exactly.
    pub fn sensitivity_for(&self, num_hotwords: usize) -> Result<Vec<f32>, CaptureError> {
        match self.sensitivity.len() {
            0 => Ok(Vec::new()),
            1 => Ok(vec![self.sensitivity[0]; num_hotwords]),
            n if n == num_hotwords => Ok(self.sensitivity.clone()),
            n => Err(CaptureError::ConfigurationFailed(format!(
                "number of hotwords in decoder model ({}) and sensitivity ({}) does not match",
                num_hotwords, n
            ))),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, CaptureError> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| CaptureError::ConfigurationFailed(format!("invalid configuration: {}", e)))?;
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        Ok(config)
    }

    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs_f64(self.stop_grace_secs)
    }

    pub fn settle_interval(&self) -> Duration {
        Duration::from_secs_f64(self.settle_secs)
    }

    pub fn write_poll_interval(&self) -> Duration {
        Duration::from_secs_f64(self.write_poll_secs)
    }
}

impl Default for CaptureConfiguration {
    fn default() -> Self {
        Self {
            output_directory: PathBuf::from("."),
            file_prefix: "recording-".into(),
            continue_recording: false,
            delete_active_recording: false,
            sensitivity: Vec::new(),
            audio_gain: 1.0,
            frames_per_buffer: 2048,
            detection_buffer_secs: 5.0,
            stop_grace_secs: 2.0,
            settle_secs: 1.0,
            write_poll_secs: 3.0,
            max_consecutive_detector_errors: None,
        }
    }
}

/// Per-session parameters passed to `CaptureOrchestrator::start`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ListenParams {
    /// Seconds of audio kept before the hotword.
    pub record_before_secs: f64,
    /// Seconds of audio recorded after the hotword.
    pub record_after_secs: f64,
    /// Detection loop wake-up interval in seconds.
    pub sleep_time_secs: f64,
}

impl ListenParams {
    pub fn new(record_before_secs: f64, record_after_secs: f64, sleep_time_secs: f64) -> Self {
        Self {
            record_before_secs,
            record_after_secs,
            sleep_time_secs,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        non_negative("record before", self.record_before_secs)?;
        positive("record after", self.record_after_secs)?;
        positive("sleep time", self.sleep_time_secs)?;
        Ok(())
    }

    pub fn sleep_time(&self) -> Duration {
        Duration::from_secs_f64(self.sleep_time_secs)
    }
}

impl Default for ListenParams {
    fn default() -> Self {
        Self {
            record_before_secs: 60.0,
            record_after_secs: 60.0,
            sleep_time_secs: 0.03,
        }
    }
}

fn positive(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(format!("{} must be positive: {}", name, value))
    }
}

fn non_negative(name: &str, value: f64) -> Result<(), String> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(format!("{} must not be negative: {}", name, value))
    }
}
