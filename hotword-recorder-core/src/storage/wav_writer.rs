use std::fs::{self, File};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::models::audio_models::AudioFormat;
use crate::models::error::CaptureError;
use crate::processing::wav_format;

/// Destination of a WAV stream. The header is patched in place on close.
pub trait WavSink: Write + Seek + Send {}

impl<T: Write + Seek + Send> WavSink for T {}

/// Streaming WAV file writer for raw PCM frames.
///
/// ## File Format
///
/// ```text
/// [44-byte WAV header]
/// [raw little-endian PCM frames...]
/// ```
///
/// The header is written with a zero data size when the file is opened
/// and patched with the real sizes on [`close`](Self::close).
pub struct WavFileWriter {
    file_path: PathBuf,
    format: AudioFormat,
    file: Option<BufWriter<Box<dyn WavSink>>>,
    total_bytes_written: u64,
}

impl WavFileWriter {
    /// Create the file (and its directory) and write the header.
    pub fn create(file_path: PathBuf, format: AudioFormat) -> Result<Self, CaptureError> {
        format.validate().map_err(CaptureError::ConfigurationFailed)?;

        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| CaptureError::StorageError(format!("failed to create directory: {}", e)))?;
        }

        let file = File::create(&file_path)
            .map_err(|e| CaptureError::StorageError(format!("failed to create file: {}", e)))?;

        Self::from_sink(file_path, format, Box::new(file))
    }

    /// Write the header to an already opened sink. `file_path` is only
    /// reported back, never opened.
    pub fn from_sink(
        file_path: PathBuf,
        format: AudioFormat,
        sink: Box<dyn WavSink>,
    ) -> Result<Self, CaptureError> {
        format.validate().map_err(CaptureError::ConfigurationFailed)?;

        let mut writer = Self {
            file_path,
            format,
            file: Some(BufWriter::new(sink)),
            total_bytes_written: 0,
        };
        let header = wav_format::generate_wav_header(&format, 0);
        writer.write_raw(&header)?;
        Ok(writer)
    }

    /// Append PCM frames.
    pub fn write(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        if data.is_empty() {
            return Ok(());
        }
        self.write_raw(data)
    }

    /// Finalize the file: rewrite the header with the real RIFF and data
    /// sizes, flush, close.
    pub fn close(&mut self) -> Result<(), CaptureError> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;

        let mut header = wav_format::generate_wav_header(&self.format, 0);
        wav_format::patch_file_size(&mut header, self.total_bytes_written);
        wav_format::patch_data_size(&mut header, self.data_bytes_written());

        file.seek(SeekFrom::Start(0))
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.write_all(&header)
            .map_err(|e| CaptureError::StorageError(e.to_string()))?;
        file.flush().map_err(|e| CaptureError::StorageError(e.to_string()))?;
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Total bytes written so far (including the WAV header).
    pub fn bytes_written(&self) -> u64 {
        self.total_bytes_written
    }

    /// PCM bytes written so far.
    pub fn data_bytes_written(&self) -> u64 {
        self.total_bytes_written
            .saturating_sub(wav_format::WAV_HEADER_SIZE as u64)
    }

    /// Seconds of audio written so far.
    pub fn secs_written(&self) -> f64 {
        self.format.secs_for_bytes(self.data_bytes_written())
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), CaptureError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| CaptureError::StorageError("file is not open".into()))?;
        file.write_all(data)
            .map_err(|e| CaptureError::StorageError(format!("write failed: {}", e)))?;
        self.total_bytes_written += data.len() as u64;
        Ok(())
    }
}

/// Compute the SHA-256 hex digest of a file.
pub fn sha256_file(path: &Path) -> Result<String, CaptureError> {
    let data = fs::read(path)
        .map_err(|e| CaptureError::StorageError(format!("failed to read file for checksum: {}", e)))?;
    let digest = Sha256::digest(&data);
    Ok(hex_encode(&digest))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
