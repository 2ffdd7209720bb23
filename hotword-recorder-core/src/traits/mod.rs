pub mod audio_input;
pub mod capture_delegate;
pub mod hotword_engine;
