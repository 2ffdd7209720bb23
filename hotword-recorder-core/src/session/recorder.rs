use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use crate::models::audio_models::AudioFormat;
use crate::models::config::CaptureConfiguration;
use crate::models::error::CaptureError;
use crate::models::recording_result::RecordingResult;
use crate::processing::capture_buffers::{PostRollBuffer, PreRollBuffer};
use crate::storage::wav_writer::{self, WavFileWriter};
use crate::traits::capture_delegate::CaptureDelegate;

/// Writes the audio surrounding one hotword to a WAV file.
///
/// Lifecycle:
/// ```text
/// new (file + header) → start_writing → [extend_desired_length]*
///     → request_stop → post-roll drained → file closed → clean_up
/// ```
///
/// The pre-roll is snapshotted at construction, so `actual_before_length`
/// reflects the pre-roll buffer at that instant. The write thread always
/// writes that snapshot before any post-roll bytes.
pub struct InstanceRecorder {
    id: Uuid,
    created_at: DateTime<Utc>,
    format: AudioFormat,
    file_path: PathBuf,
    post_roll: Arc<PostRollBuffer>,
    actual_before_length: f64,
    pre_roll_mark: u64,
    pre_roll_data: Mutex<Option<Vec<u8>>>,
    writer: Mutex<Option<WavFileWriter>>,
    write_poll_interval: Duration,
    delete_on_interrupt: bool,
    delegate: Option<Arc<dyn CaptureDelegate>>,
    will_stop_capture: AtomicBool,
    interrupted: AtomicBool,
    clean_up: AtomicBool,
    data_bytes_written: AtomicU64,
    result: Mutex<Option<RecordingResult>>,
    write_handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl InstanceRecorder {
    /// Create the output file, write its header and snapshot the pre-roll.
    ///
    /// Fails when the file cannot be created; nothing is left running then.
    pub fn new(
        pre_roll: &PreRollBuffer,
        post_roll: Arc<PostRollBuffer>,
        config: &CaptureConfiguration,
        delegate: Option<Arc<dyn CaptureDelegate>>,
    ) -> Result<Self, CaptureError> {
        let created_at = Utc::now();
        let file_name = format!(
            "{}{}.wav",
            config.file_prefix,
            created_at.format("%Y%m%d-%H%M%S%.3f")
        );
        let writer = WavFileWriter::create(config.output_directory.join(file_name), pre_roll.format())?;
        Ok(Self::with_writer(pre_roll, post_roll, config, delegate, created_at, writer))
    }

    fn with_writer(
        pre_roll: &PreRollBuffer,
        post_roll: Arc<PostRollBuffer>,
        config: &CaptureConfiguration,
        delegate: Option<Arc<dyn CaptureDelegate>>,
        created_at: DateTime<Utc>,
        writer: WavFileWriter,
    ) -> Self {
        let format = pre_roll.format();
        let file_path = writer.file_path().to_path_buf();

        let (pre_roll_data, pre_roll_mark) = pre_roll.snapshot_with_total();
        let actual_before_length = format.secs_for_bytes(pre_roll_data.len() as u64);

        let recorder = Self {
            id: Uuid::new_v4(),
            created_at,
            format,
            file_path,
            post_roll,
            actual_before_length,
            pre_roll_mark,
            pre_roll_data: Mutex::new(Some(pre_roll_data)),
            writer: Mutex::new(Some(writer)),
            write_poll_interval: config.write_poll_interval(),
            delete_on_interrupt: config.delete_active_recording,
            delegate,
            will_stop_capture: AtomicBool::new(false),
            interrupted: AtomicBool::new(false),
            clean_up: AtomicBool::new(false),
            data_bytes_written: AtomicU64::new(0),
            result: Mutex::new(None),
            write_handle: Mutex::new(None),
        };
        log::debug!(
            "Will record {} for {:.2}s ({:.2}s before, {:.2}s after)",
            recorder.file_path.display(),
            recorder.desired_total_length(),
            recorder.actual_before_length,
            recorder.desired_after_length()
        );
        recorder
    }

    /// Spawn the write thread. Returns immediately.
    pub fn start_writing(self: &Arc<Self>) -> Result<(), CaptureError> {
        let writer = self
            .writer
            .lock()
            .take()
            .ok_or_else(|| CaptureError::ConfigurationFailed("recorder already started".into()))?;
        let pre_roll = self.pre_roll_data.lock().take().unwrap_or_default();

        let this = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("recorder-{}", &self.id.simple().to_string()[..8]))
            .spawn(move || this.run(writer, pre_roll))
            .map_err(|e| {
                self.post_roll.stop_capture();
                self.clean_up.store(true, Ordering::SeqCst);
                CaptureError::Unknown(format!("failed to spawn recorder thread: {}", e))
            })?;

        *self.write_handle.lock() = Some(handle);
        Ok(())
    }

    /// Push a chunk from the audio callback into the post-roll.
    pub fn append(&self, data: &[u8]) {
        self.post_roll.append(data);
    }

    /// Move audio that reached the pre-roll after the snapshot into the
    /// post-roll, so nothing is lost between construction and registration.
    ///
    /// Must run while the caller keeps the audio callback out, right before
    /// the recorder starts receiving chunks.
    pub fn catch_up(&self, pre_roll: &PreRollBuffer) {
        let missed = pre_roll.bytes_since(self.pre_roll_mark);
        if !missed.is_empty() {
            log::debug!("Carrying {} bytes from the pre-roll into the post-roll", missed.len());
            self.post_roll.append(&missed);
        }
    }

    /// Record `delta_secs` more from now on.
    ///
    /// The new post-roll target is what has been captured so far plus
    /// `delta_secs`. Returns false when capture already stopped; the
    /// recording then keeps its old length.
    pub fn extend_desired_length(&self, delta_secs: f64) -> bool {
        let previous_total = self.desired_total_length();
        let delta = self.format.bytes_for_secs(delta_secs) as u64;
        match self.post_roll.extend_target(delta) {
            Some(_) => {
                log::debug!(
                    "Extend desired length to {:.2}s from now, from a total of {:.2}s to {:.2}s",
                    delta_secs,
                    previous_total,
                    self.desired_total_length()
                );
                log::debug!(
                    "Currently captured {:.2}s, written {:.2}s",
                    self.actual_before_length + self.captured_after_length(),
                    self.secs_written()
                );
                true
            }
            None => {
                log::debug!("Capture already stopped, not extending {}", self.file_path.display());
                false
            }
        }
    }

    /// Stop capturing once the desired post-roll has been captured.
    ///
    /// Never blocks: the append that reaches the target commits the stop.
    pub fn request_stop(&self) {
        self.will_stop_capture.store(true, Ordering::SeqCst);
        if self.post_roll.arm_stop() {
            log::debug!(
                "Capture stopped with enough data ({:.2}/{:.2})",
                self.captured_after_length(),
                self.desired_after_length()
            );
        } else {
            log::debug!(
                "Will stop capture when captured enough data ({:.2}/{:.2})",
                self.captured_after_length(),
                self.desired_after_length()
            );
        }
    }

    /// Abort writing; the file is closed truncated.
    pub fn interrupt(&self) {
        log::debug!("Interrupt triggered for {}", self.file_path.display());
        self.interrupted.store(true, Ordering::SeqCst);
        self.post_roll.stop_capture();
    }

    /// Stop capturing immediately, keeping what was captured.
    pub fn force_stop_capture(&self) {
        self.will_stop_capture.store(true, Ordering::SeqCst);
        self.post_roll.stop_capture();
    }

    /// Wait for the write thread to finish.
    pub fn join(&self) {
        let handle = self.write_handle.lock().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                log::error!("Recorder thread for {} panicked", self.file_path.display());
            }
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn post_roll(&self) -> &Arc<PostRollBuffer> {
        &self.post_roll
    }

    /// Pre-roll seconds captured at construction.
    pub fn actual_before_length(&self) -> f64 {
        self.actual_before_length
    }

    /// Post-roll seconds this recording aims for.
    pub fn desired_after_length(&self) -> f64 {
        self.format.secs_for_bytes(self.post_roll.target_total())
    }

    pub fn desired_total_length(&self) -> f64 {
        self.actual_before_length + self.desired_after_length()
    }

    /// Post-roll seconds captured so far.
    pub fn captured_after_length(&self) -> f64 {
        self.post_roll.captured_secs()
    }

    /// Seconds written to the file so far.
    pub fn secs_written(&self) -> f64 {
        self.format
            .secs_for_bytes(self.data_bytes_written.load(Ordering::SeqCst))
    }

    /// A stop was requested; triggers no longer continue this recording.
    pub fn is_stop_requested(&self) -> bool {
        self.will_stop_capture.load(Ordering::SeqCst)
    }

    /// The post-roll no longer accepts audio.
    pub fn capture_stopped(&self) -> bool {
        self.post_roll.capture_stopped()
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// File writing is done and the recorder may be dropped.
    pub fn is_clean_up(&self) -> bool {
        self.clean_up.load(Ordering::SeqCst)
    }

    pub fn result(&self) -> Option<RecordingResult> {
        self.result.lock().clone()
    }

    fn run(&self, mut writer: WavFileWriter, pre_roll: Vec<u8>) {
        let mut error = writer.write(&pre_roll).err();
        let pre_roll_bytes = writer.data_bytes_written();
        self.data_bytes_written.store(pre_roll_bytes, Ordering::SeqCst);
        log::debug!("Written {:.2} seconds from before the hotword", writer.secs_written());

        while error.is_none() {
            if self.is_interrupted() {
                log::debug!("Interrupt detected, closing {}", self.file_path.display());
                break;
            }

            self.post_roll.wait_for_stop(self.write_poll_interval);
            if self.is_interrupted() {
                log::debug!("Interrupt detected, closing {}", self.file_path.display());
                break;
            }

            let bytes = self.post_roll.drain_to_target();
            if let Err(e) = writer.write(&bytes) {
                error = Some(e);
                break;
            }
            self.data_bytes_written
                .store(writer.data_bytes_written(), Ordering::SeqCst);
            log::debug!("Written {:.2} seconds", self.format.secs_for_bytes(bytes.len() as u64));

            if self.post_roll.capture_stopped() && self.post_roll.length() == 0 {
                break;
            }
        }

        if let Some(ref e) = error {
            log::error!("Failed to write {}: {}", self.file_path.display(), e);
            self.post_roll.stop_capture();
        }

        let closed = match writer.close() {
            Ok(()) => true,
            Err(e) => {
                log::error!("Failed to close {}: {}", self.file_path.display(), e);
                error.get_or_insert(e);
                false
            }
        };

        let interrupted = self.is_interrupted();
        let mut deleted = false;
        if interrupted && self.delete_on_interrupt {
            match fs::remove_file(&self.file_path) {
                Ok(()) => {
                    log::info!("Deleted interrupted recording {}", self.file_path.display());
                    deleted = true;
                }
                Err(e) => log::warn!("Failed to delete {}: {}", self.file_path.display(), e),
            }
        }

        let checksum = if closed && !deleted {
            wav_writer::sha256_file(&self.file_path)
                .map_err(|e| log::warn!("Failed to checksum {}: {}", self.file_path.display(), e))
                .ok()
        } else {
            None
        };

        let data_bytes = writer.data_bytes_written();
        let result = RecordingResult {
            id: self.id.to_string(),
            file_path: self.file_path.clone(),
            created_at: self.created_at,
            before_secs: self.format.secs_for_bytes(pre_roll_bytes),
            after_secs: self.format.secs_for_bytes(data_bytes - pre_roll_bytes),
            duration_secs: self.format.secs_for_bytes(data_bytes),
            interrupted,
            deleted,
            checksum,
            error: error.as_ref().map(|e| e.to_string()),
        };
        log::info!(
            "Written {:.2} seconds of audio in {}",
            result.duration_secs,
            self.file_path.display()
        );

        *self.result.lock() = Some(result.clone());
        if let Some(ref delegate) = self.delegate {
            if let Some(ref e) = error {
                delegate.on_error(e);
            }
            delegate.on_recording_finished(&result);
        }
        self.clean_up.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use std::io::{self, Seek, SeekFrom, Write};
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::processing::wav_format;

    /// Accepts `limit` bytes, then fails every write.
    struct FullDisk {
        accepted: usize,
        limit: usize,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.accepted + buf.len() > self.limit {
                return Err(io::Error::other("no space left on device"));
            }
            self.accepted += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Seek for FullDisk {
        fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
            Ok(0)
        }
    }

    #[derive(Default)]
    struct Outcomes {
        errors: AtomicUsize,
        finished: AtomicUsize,
    }

    impl CaptureDelegate for Outcomes {
        fn on_recording_finished(&self, _result: &RecordingResult) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }

        fn on_error(&self, error: &CaptureError) {
            if matches!(error, CaptureError::StorageError(_)) {
                self.errors.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    // 1000 bytes per second.
    fn format() -> AudioFormat {
        AudioFormat::new(1, 500, 2)
    }

    fn config(dir: &Path) -> CaptureConfiguration {
        CaptureConfiguration {
            output_directory: dir.to_path_buf(),
            write_poll_secs: 0.02,
            ..Default::default()
        }
    }

    fn pre_roll_with(bytes: usize) -> PreRollBuffer {
        let pre_roll = PreRollBuffer::new(format(), 2.0);
        pre_roll.append(&vec![1u8; bytes]);
        pre_roll
    }

    fn wait_clean_up(recorder: &InstanceRecorder) {
        let started = Instant::now();
        while !recorder.is_clean_up() && started.elapsed() < Duration::from_secs(5) {
            thread::sleep(Duration::from_millis(5));
        }
        recorder.join();
    }

    #[test]
    fn before_length_is_fixed_at_construction() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(500);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));

        let recorder = InstanceRecorder::new(&pre_roll, post_roll, &config(dir.path()), None).unwrap();
        pre_roll.append(&[0u8; 700]);

        approx::assert_abs_diff_eq!(recorder.actual_before_length(), 0.5);
        approx::assert_abs_diff_eq!(recorder.desired_after_length(), 1.0);
        approx::assert_abs_diff_eq!(recorder.desired_total_length(), 1.5);
        assert!(recorder.file_path().exists());
    }

    #[test]
    fn catch_up_moves_late_pre_roll_audio() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(100);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));
        let recorder =
            InstanceRecorder::new(&pre_roll, Arc::clone(&post_roll), &config(dir.path()), None).unwrap();

        pre_roll.append(&[9u8; 30]);
        recorder.catch_up(&pre_roll);
        assert_eq!(post_roll.drain(), vec![9u8; 30]);

        recorder.catch_up(&pre_roll);
        assert_eq!(post_roll.total_length(), 30);
    }

    #[test]
    fn extension_is_relative_to_captured() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(0);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));
        let recorder = InstanceRecorder::new(&pre_roll, post_roll, &config(dir.path()), None).unwrap();

        recorder.append(&[0u8; 300]);
        assert!(recorder.extend_desired_length(2.0));
        approx::assert_abs_diff_eq!(recorder.desired_after_length(), 2.3);
    }

    #[test]
    fn extension_after_capture_stopped_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(0);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 0.1, 1000));
        let recorder = InstanceRecorder::new(&pre_roll, post_roll, &config(dir.path()), None).unwrap();

        recorder.append(&[0u8; 200]);
        recorder.request_stop();
        assert!(recorder.capture_stopped());
        assert!(!recorder.extend_desired_length(1.0));
        approx::assert_abs_diff_eq!(recorder.desired_after_length(), 0.1);
    }

    #[test]
    fn writes_pre_roll_then_post_roll() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(400);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 0.3, 1000));
        let recorder =
            Arc::new(InstanceRecorder::new(&pre_roll, post_roll, &config(dir.path()), None).unwrap());
        recorder.start_writing().unwrap();
        assert!(recorder.start_writing().is_err());

        recorder.append(&[2u8; 100]);
        recorder.request_stop();
        assert!(recorder.is_stop_requested());
        assert!(!recorder.capture_stopped());
        for _ in 0..5 {
            recorder.append(&[3u8; 100]);
        }
        assert!(recorder.capture_stopped());

        wait_clean_up(&recorder);
        assert!(recorder.is_clean_up());

        let data = fs::read(recorder.file_path()).unwrap();
        let info = wav_format::parse_wav_header(&data).unwrap();
        assert_eq!(info.format, format());
        assert_eq!(info.data_size, 700);

        let frames = &data[wav_format::WAV_HEADER_SIZE..];
        assert!(frames[..400].iter().all(|&b| b == 1));
        assert!(frames[400..500].iter().all(|&b| b == 2));
        assert!(frames[500..].iter().all(|&b| b == 3));

        let result = recorder.result().unwrap();
        assert!(result.is_complete());
        approx::assert_abs_diff_eq!(result.before_secs, 0.4);
        approx::assert_abs_diff_eq!(result.after_secs, 0.3);
        approx::assert_abs_diff_eq!(result.duration_secs, 0.7);
        assert!(result.checksum.is_some());
    }

    #[test]
    fn interrupt_closes_truncated_file() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(200);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 10.0, 20000));
        let mut cfg = config(dir.path());
        cfg.write_poll_secs = 0.2;
        let recorder = Arc::new(InstanceRecorder::new(&pre_roll, post_roll, &cfg, None).unwrap());
        recorder.start_writing().unwrap();
        recorder.append(&[5u8; 100]);

        let started = Instant::now();
        recorder.interrupt();
        wait_clean_up(&recorder);
        assert!(started.elapsed() < Duration::from_millis(200));
        assert!(recorder.capture_stopped());

        let data = fs::read(recorder.file_path()).unwrap();
        let info = wav_format::parse_wav_header(&data).unwrap();
        assert_eq!(info.data_size as usize, data.len() - wav_format::WAV_HEADER_SIZE);
        assert!(info.data_size >= 200);

        let result = recorder.result().unwrap();
        assert!(result.interrupted);
        assert!(!result.deleted);
        assert!(!result.is_complete());
    }

    #[test]
    fn interrupt_deletes_active_recording_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(200);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 10.0, 20000));
        let cfg = CaptureConfiguration {
            delete_active_recording: true,
            ..config(dir.path())
        };
        let recorder = Arc::new(InstanceRecorder::new(&pre_roll, post_roll, &cfg, None).unwrap());
        recorder.start_writing().unwrap();

        recorder.interrupt();
        wait_clean_up(&recorder);

        assert!(!recorder.file_path().exists());
        let result = recorder.result().unwrap();
        assert!(result.deleted);
        assert!(result.checksum.is_none());
    }

    #[test]
    fn creation_fails_without_writable_directory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();

        let pre_roll = pre_roll_with(10);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));
        let result = InstanceRecorder::new(&pre_roll, post_roll, &config(&blocker), None);
        assert!(matches!(result, Err(CaptureError::StorageError(_))));
    }

    #[test]
    fn file_name_uses_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = CaptureConfiguration {
            file_prefix: "cvr-".into(),
            ..config(dir.path())
        };
        let pre_roll = pre_roll_with(0);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));
        let recorder = InstanceRecorder::new(&pre_roll, post_roll, &cfg, None).unwrap();

        let name = recorder.file_path().file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cvr-"));
        assert!(name.ends_with(".wav"));
    }

    #[test]
    fn write_failure_ends_recording_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let pre_roll = pre_roll_with(200);
        let post_roll = Arc::new(PostRollBuffer::new(format(), 20.0, 40000));
        let outcomes = Arc::new(Outcomes::default());
        let delegate: Arc<dyn CaptureDelegate> = outcomes.clone();
        let sink = FullDisk { accepted: 0, limit: 1000 };
        let writer =
            WavFileWriter::from_sink(dir.path().join("full.wav"), format(), Box::new(sink)).unwrap();
        let recorder = Arc::new(InstanceRecorder::with_writer(
            &pre_roll,
            post_roll,
            &config(dir.path()),
            Some(delegate),
            Utc::now(),
            writer,
        ));

        // More than the write buffer holds, so the failure surfaces on the
        // first post-roll write.
        recorder.append(&vec![4u8; 16 * 1024]);
        recorder.start_writing().unwrap();
        wait_clean_up(&recorder);

        assert!(recorder.is_clean_up());
        assert!(recorder.capture_stopped());
        let result = recorder.result().unwrap();
        assert!(result.error.is_some());
        assert!(result.checksum.is_none());
        assert!(!result.interrupted);
        assert!(!result.is_complete());
        approx::assert_abs_diff_eq!(result.before_secs, 0.2);
        assert_eq!(outcomes.errors.load(Ordering::SeqCst), 1);
        assert_eq!(outcomes.finished.load(Ordering::SeqCst), 1);
    }
}
