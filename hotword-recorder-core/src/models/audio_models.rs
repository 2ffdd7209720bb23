use serde::{Deserialize, Serialize};

/// Raw linear PCM layout shared by the audio input, the detector and the
/// recordings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AudioFormat {
    pub channels: u16,
    pub sample_rate: u32,
    /// Bytes per sample (2 for 16-bit PCM).
    pub sample_width: u16,
}

impl AudioFormat {
    pub fn new(channels: u16, sample_rate: u32, sample_width: u16) -> Self {
        Self {
            channels,
            sample_rate,
            sample_width,
        }
    }

    /// Build a format from a detector's reported bit depth.
    pub fn from_bits_per_sample(channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self::new(channels, sample_rate, bits_per_sample / 8)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.channels == 0 {
            return Err("channel count must be positive".into());
        }
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.sample_width == 0 {
            return Err("sample width must be at least one byte".into());
        }
        Ok(())
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.sample_width * 8
    }

    /// Bytes in one interleaved frame.
    pub fn block_align(&self) -> usize {
        self.channels as usize * self.sample_width as usize
    }

    pub fn bytes_per_second(&self) -> u64 {
        self.sample_rate as u64 * self.block_align() as u64
    }

    /// Byte count for `secs` of audio, rounded down to a whole frame.
    pub fn bytes_for_secs(&self, secs: f64) -> usize {
        if !secs.is_finite() || secs <= 0.0 {
            return 0;
        }
        let frames = (secs * self.sample_rate as f64) as usize;
        frames * self.block_align()
    }

    pub fn secs_for_bytes(&self, bytes: u64) -> f64 {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return 0.0;
        }
        bytes as f64 / bps as f64
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 1,
            sample_rate: 16000,
            sample_width: 2,
        }
    }
}

/// Result of feeding one chunk of audio to the hotword engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detection {
    /// Nothing recognized in the chunk.
    None,
    /// A hotword was recognized; 1-based index into the engine's models.
    Hotword(usize),
}

impl Detection {
    /// A recognized hotword with a valid (1-based) index.
    pub fn is_trigger(&self) -> bool {
        matches!(self, Self::Hotword(index) if *index >= 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bytes_per_second_16khz_mono_16bit() {
        let format = AudioFormat::default();
        assert_eq!(format.bytes_per_second(), 32000);
        assert_eq!(format.block_align(), 2);
        assert_eq!(format.bits_per_sample(), 16);
    }

    #[test]
    fn bytes_for_secs_rounds_to_whole_frames() {
        let format = AudioFormat::new(2, 1000, 2);
        // 0.0015s = 1.5 frames -> 1 frame of 4 bytes
        assert_eq!(format.bytes_for_secs(0.0015), 4);
        assert_eq!(format.bytes_for_secs(1.0), 4000);
        assert_eq!(format.bytes_for_secs(-1.0), 0);
        assert_eq!(format.bytes_for_secs(f64::NAN), 0);
    }

    #[test]
    fn secs_for_bytes() {
        let format = AudioFormat::new(1, 1000, 2);
        approx::assert_abs_diff_eq!(format.secs_for_bytes(3000), 1.5);
    }

    #[test]
    fn from_bits_per_sample() {
        let format = AudioFormat::from_bits_per_sample(1, 16000, 16);
        assert_eq!(format.sample_width, 2);
    }

    #[test]
    fn hotword_index_zero_is_not_a_trigger() {
        assert!(Detection::Hotword(1).is_trigger());
        assert!(Detection::Hotword(3).is_trigger());
        assert!(!Detection::Hotword(0).is_trigger());
        assert!(!Detection::None.is_trigger());
    }

    #[test]
    fn validate_rejects_zero_fields() {
        assert!(AudioFormat::new(0, 16000, 2).validate().is_err());
        assert!(AudioFormat::new(1, 0, 2).validate().is_err());
        assert!(AudioFormat::new(1, 16000, 0).validate().is_err());
        assert!(AudioFormat::default().validate().is_ok());
    }
}
