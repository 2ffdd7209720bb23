use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Outcome of one capture session, reported once its file is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingResult {
    pub id: String,
    pub file_path: PathBuf,
    pub created_at: DateTime<Utc>,
    /// Pre-roll seconds written ahead of the hotword.
    pub before_secs: f64,
    /// Post-roll seconds written after the hotword.
    pub after_secs: f64,
    /// Total seconds of audio in the file.
    pub duration_secs: f64,
    pub interrupted: bool,
    /// The file was removed because the recording was interrupted.
    pub deleted: bool,
    /// SHA-256 of the finalized file; `None` when deleted or unreadable.
    pub checksum: Option<String>,
    /// Set when writing stopped early on an I/O failure.
    pub error: Option<String>,
}

impl RecordingResult {
    /// Whether the file holds everything the recorder meant to write.
    pub fn is_complete(&self) -> bool {
        !self.interrupted && self.error.is_none()
    }
}
