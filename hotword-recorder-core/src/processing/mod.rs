pub mod capture_buffers;
pub mod ring_buffer;
pub mod wav_format;
