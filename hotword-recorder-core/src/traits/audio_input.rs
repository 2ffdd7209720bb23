use std::sync::Arc;

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;

/// Callback invoked with each chunk of interleaved little-endian PCM bytes.
///
/// Runs on the audio subsystem's own thread: it must return promptly and
/// never block on I/O.
pub type AudioChunkCallback = Arc<dyn Fn(&[u8]) + Send + Sync + 'static>;

/// Interface to the hardware audio input.
///
/// Implemented by platform backends (PortAudio, ALSA, cpal, ...) outside this
/// crate, and by in-memory sources in tests.
pub trait AudioInput: Send {
    /// Open the input stream and start delivering chunks to `callback`.
    fn open(
        &mut self,
        format: &AudioFormat,
        frames_per_buffer: u32,
        callback: AudioChunkCallback,
    ) -> Result<(), CaptureError>;

    /// Stop the stream and release the device. After this returns the
    /// callback is not invoked again.
    fn close(&mut self) -> Result<(), CaptureError>;
}
