use crate::models::audio_models::{AudioFormat, Detection};
use crate::models::error::CaptureError;

/// Opaque keyword-spotting engine.
///
/// The engine dictates the audio format: the input stream, the buffers and
/// the recordings all use its sample rate, channel count and bit depth.
pub trait HotwordEngine: Send {
    /// Run detection over one chunk of PCM bytes.
    fn run_detection(&mut self, data: &[u8]) -> Result<Detection, CaptureError>;

    /// Number of hotword models loaded.
    fn num_hotwords(&self) -> usize;

    fn sample_rate(&self) -> u32;

    fn channels(&self) -> u16;

    fn bits_per_sample(&self) -> u16;

    /// Apply one sensitivity per hotword.
    fn set_sensitivity(&mut self, sensitivity: &[f32]) -> Result<(), CaptureError>;

    /// Multiply input volume by `gain` before detection.
    fn set_audio_gain(&mut self, gain: f32);

    /// Audio format expected by the engine.
    fn audio_format(&self) -> AudioFormat {
        AudioFormat::from_bits_per_sample(self.channels(), self.sample_rate(), self.bits_per_sample())
    }
}
