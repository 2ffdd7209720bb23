//! # hotword-recorder-core
//!
//! Hotword-triggered audio recorder core library.
//!
//! Listens to a live audio stream, runs a keyword-spotting engine over it and,
//! on each hotword, writes a WAV file holding the audio from shortly before
//! the hotword until some time after it. Audio inputs and hotword engines
//! implement the `AudioInput` and `HotwordEngine` traits and plug into the
//! generic `CaptureOrchestrator`.
//!
//! ## Architecture
//!
//! ```text
//! hotword-recorder-core (this crate)
//! ├── traits/       ← AudioInput, HotwordEngine, CaptureDelegate
//! ├── models/       ← CaptureError, ListenerState, CaptureConfiguration, AudioFormat, etc.
//! ├── processing/   ← RingBuffer, detection/pre-roll/post-roll buffers, WAV header generation
//! ├── session/      ← CaptureOrchestrator, InstanceRecorder, StopTimer
//! └── storage/      ← WavFileWriter
//! ```

pub mod models;
pub mod processing;
pub mod session;
pub mod storage;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use models::audio_models::{AudioFormat, Detection};
pub use models::config::{CaptureConfiguration, ListenParams};
pub use models::error::CaptureError;
pub use models::recording_result::RecordingResult;
pub use models::state::ListenerState;
pub use processing::capture_buffers::{DetectionBuffer, PostRollBuffer, PreRollBuffer};
pub use processing::ring_buffer::RingBuffer;
pub use session::orchestrator::{ActiveRecorder, CaptureOrchestrator};
pub use session::recorder::InstanceRecorder;
pub use session::timer::StopTimer;
pub use storage::wav_writer::WavFileWriter;
pub use traits::audio_input::{AudioChunkCallback, AudioInput};
pub use traits::capture_delegate::CaptureDelegate;
pub use traits::hotword_engine::HotwordEngine;
