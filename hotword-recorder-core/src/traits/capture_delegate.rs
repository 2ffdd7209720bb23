use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::models::state::ListenerState;

/// Event delegate for listener and recording notifications.
///
/// Hosts hook LEDs, beeps or UI updates here. Methods are called from the
/// detection loop, the stop timer or a recorder's write thread, never from
/// the audio callback. All methods default to doing nothing.
pub trait CaptureDelegate: Send + Sync {
    /// Called when the listener state changes.
    fn on_state_changed(&self, _state: &ListenerState) {}

    /// Called when a hotword starts a new recording.
    fn on_recording_started(&self) {}

    /// Called when a repeated hotword extends the active recording.
    fn on_recording_continued(&self) {}

    /// Called when the stop timer fires and capture winds down.
    fn on_recording_stopped(&self) {}

    /// Called once a recording's file has been closed.
    fn on_recording_finished(&self, _result: &RecordingResult) {}

    /// Called for errors that do not stop listening.
    fn on_error(&self, _error: &CaptureError) {}
}
