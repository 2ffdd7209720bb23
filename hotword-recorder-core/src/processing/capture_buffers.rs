//! Thread-safe capture buffers built on [`RingBuffer`].
//!
//! The real-time audio callback is the only producer of each buffer. Readers
//! (detection loop, recorder write threads) take the same short
//! `parking_lot::Mutex`; no I/O ever happens while it is held.

use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use super::ring_buffer::RingBuffer;
use crate::models::audio_models::AudioFormat;

/// Buffer drained by the detection loop and fed to the hotword engine.
#[derive(Debug)]
pub struct DetectionBuffer {
    inner: Mutex<RingBuffer>,
}

impl DetectionBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(capacity)),
        }
    }

    /// Sized for `secs` seconds of `format` audio.
    pub fn for_duration(format: &AudioFormat, secs: f64) -> Self {
        Self::new(format.bytes_for_secs(secs))
    }

    pub fn append(&self, data: &[u8]) {
        self.inner.lock().append(data);
    }

    pub fn drain(&self) -> Vec<u8> {
        self.inner.lock().drain()
    }

    pub fn clear(&self) {
        self.inner.lock().clear();
    }

    pub fn length(&self) -> usize {
        self.inner.lock().length()
    }

    pub fn total_length(&self) -> u64 {
        self.inner.lock().total_length()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }
}

/// Continuously overwritten window of the most recent `record_before` seconds.
#[derive(Debug)]
pub struct PreRollBuffer {
    inner: Mutex<RingBuffer>,
    format: AudioFormat,
}

impl PreRollBuffer {
    pub fn new(format: AudioFormat, record_before_secs: f64) -> Self {
        Self {
            inner: Mutex::new(RingBuffer::new(format.bytes_for_secs(record_before_secs))),
            format,
        }
    }

    pub fn append(&self, data: &[u8]) {
        self.inner.lock().append(data);
    }

    /// Atomic copy of the current window.
    pub fn snapshot(&self) -> Vec<u8> {
        self.inner.lock().snapshot()
    }

    /// Snapshot together with the lifetime byte count it ends at.
    pub fn snapshot_with_total(&self) -> (Vec<u8>, u64) {
        let ring = self.inner.lock();
        (ring.snapshot(), ring.total_length())
    }

    /// Bytes appended after the lifetime count `mark`, as far as they are
    /// still held.
    pub fn bytes_since(&self, mark: u64) -> Vec<u8> {
        let ring = self.inner.lock();
        let missed = ring.total_length().saturating_sub(mark).min(ring.length() as u64) as usize;
        ring.tail(missed)
    }

    pub fn length(&self) -> usize {
        self.inner.lock().length()
    }

    /// Seconds of audio currently held.
    pub fn length_secs(&self) -> f64 {
        self.format.secs_for_bytes(self.length() as u64)
    }

    pub fn total_length(&self) -> u64 {
        self.inner.lock().total_length()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().capacity()
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

#[derive(Debug)]
struct PostRollState {
    ring: RingBuffer,
    capture_stopped: bool,
    /// Lifetime byte count at which capture should end.
    target_total: u64,
    /// A stop was requested; the append reaching `target_total` commits it.
    stop_armed: bool,
}

impl PostRollState {
    fn commit_stop(&mut self) {
        self.capture_stopped = true;
        self.stop_armed = false;
    }
}

/// Post-roll buffer owned by one recorder.
///
/// `capture_stopped` flips once from false to true; afterwards appends are
/// discarded. Stopping is two-phase: [`arm_stop`](Self::arm_stop) records the
/// request and the append that reaches the target commits it, cutting the
/// chunk at exactly the target. Target changes and the commit share one
/// lock, so the last extension before the commit always wins.
#[derive(Debug)]
pub struct PostRollBuffer {
    state: Mutex<PostRollState>,
    stopped: Condvar,
    format: AudioFormat,
}

impl PostRollBuffer {
    /// `record_after_secs` sets the initial capture target. `capacity` bounds
    /// how much may pile up between two drains.
    pub fn new(format: AudioFormat, record_after_secs: f64, capacity: usize) -> Self {
        Self {
            state: Mutex::new(PostRollState {
                ring: RingBuffer::new(capacity),
                capture_stopped: false,
                target_total: format.bytes_for_secs(record_after_secs) as u64,
                stop_armed: false,
            }),
            stopped: Condvar::new(),
            format,
        }
    }

    /// Append a chunk. No-op once capture has stopped.
    pub fn append(&self, data: &[u8]) {
        let mut state = self.state.lock();
        if state.capture_stopped || data.is_empty() {
            return;
        }
        if state.stop_armed {
            let room = state.target_total.saturating_sub(state.ring.total_length()) as usize;
            if data.len() >= room {
                state.ring.append(&data[..room]);
                state.commit_stop();
                drop(state);
                self.stopped.notify_all();
                return;
            }
        }
        state.ring.append(data);
    }

    /// Stop capturing right away. Idempotent.
    pub fn stop_capture(&self) {
        let mut state = self.state.lock();
        if state.capture_stopped {
            return;
        }
        state.commit_stop();
        drop(state);
        self.stopped.notify_all();
    }

    /// Request a stop once the lifetime total reaches the target.
    ///
    /// Commits immediately if enough has been captured already. Returns
    /// whether capture is stopped after the call.
    pub fn arm_stop(&self) -> bool {
        let mut state = self.state.lock();
        if state.capture_stopped {
            return true;
        }
        let total = state.ring.total_length();
        if total >= state.target_total {
            // Bytes past the target are still held back from the writer.
            let excess = (total - state.target_total) as usize;
            state.ring.truncate_back(excess);
            state.commit_stop();
            drop(state);
            self.stopped.notify_all();
            return true;
        }
        state.stop_armed = true;
        false
    }

    /// Move the target to `delta_bytes` past what has been captured so far.
    ///
    /// Returns the new target, or `None` when capture already stopped.
    pub fn extend_target(&self, delta_bytes: u64) -> Option<u64> {
        let mut state = self.state.lock();
        if state.capture_stopped {
            return None;
        }
        state.target_total = state.ring.total_length() + delta_bytes;
        Some(state.target_total)
    }

    pub fn capture_stopped(&self) -> bool {
        self.state.lock().capture_stopped
    }

    pub fn is_stop_armed(&self) -> bool {
        self.state.lock().stop_armed
    }

    /// Block for up to `timeout` or until capture stops.
    /// Returns whether capture is stopped.
    pub fn wait_for_stop(&self, timeout: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.capture_stopped {
            let _ = self.stopped.wait_for(&mut state, timeout);
        }
        state.capture_stopped
    }

    pub fn drain(&self) -> Vec<u8> {
        self.state.lock().ring.drain()
    }

    /// Drain only the bytes that fall within the current target.
    ///
    /// Bytes captured past the target stay buffered until an extension makes
    /// them part of the recording or the stop commit discards them. Once
    /// capture has stopped everything left is drained.
    pub fn drain_to_target(&self) -> Vec<u8> {
        let mut state = self.state.lock();
        if state.capture_stopped {
            return state.ring.drain();
        }
        let held = state.ring.length() as u64;
        let oldest = state.ring.total_length() - held;
        let within = state.target_total.saturating_sub(oldest).min(held);
        state.ring.read(within as usize)
    }

    pub fn length(&self) -> usize {
        self.state.lock().ring.length()
    }

    pub fn total_length(&self) -> u64 {
        self.state.lock().ring.total_length()
    }

    pub fn target_total(&self) -> u64 {
        self.state.lock().target_total
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().ring.capacity()
    }

    /// Seconds captured over the buffer's lifetime.
    pub fn captured_secs(&self) -> f64 {
        self.format.secs_for_bytes(self.total_length())
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    fn format() -> AudioFormat {
        // 1000 bytes per second keeps the arithmetic readable.
        AudioFormat::new(1, 500, 2)
    }

    #[test]
    fn detection_buffer_drain_clears() {
        let buf = DetectionBuffer::for_duration(&format(), 5.0);
        assert_eq!(buf.capacity(), 5000);

        buf.append(&[1, 2, 3]);
        assert_eq!(buf.drain(), vec![1, 2, 3]);
        assert_eq!(buf.length(), 0);
        assert!(buf.drain().is_empty());
        assert_eq!(buf.total_length(), 3);
    }

    #[test]
    fn pre_roll_keeps_last_window() {
        let buf = PreRollBuffer::new(format(), 0.004);
        assert_eq!(buf.capacity(), 4);

        buf.append(&[1, 2, 3]);
        buf.append(&[4, 5, 6]);
        assert_eq!(buf.snapshot(), vec![3, 4, 5, 6]);
        assert_eq!(buf.length(), 4);
        approx::assert_abs_diff_eq!(buf.length_secs(), 0.004);
    }

    #[test]
    fn pre_roll_bytes_since_mark() {
        let buf = PreRollBuffer::new(format(), 0.006);
        buf.append(&[1, 2]);
        let (snapshot, mark) = buf.snapshot_with_total();
        assert_eq!(snapshot, vec![1, 2]);
        assert_eq!(mark, 2);

        assert!(buf.bytes_since(mark).is_empty());
        buf.append(&[3, 4, 5]);
        assert_eq!(buf.bytes_since(mark), vec![3, 4, 5]);

        // Only what is still held comes back.
        buf.append(&[6, 7, 8, 9, 10, 11, 12]);
        assert_eq!(buf.bytes_since(mark), vec![7, 8, 9, 10, 11, 12]);
    }

    #[test]
    fn post_roll_ignores_appends_after_stop() {
        let buf = PostRollBuffer::new(format(), 1.0, 1000);
        buf.append(&[1, 2]);
        buf.stop_capture();
        buf.append(&[3, 4]);

        assert_eq!(buf.length(), 2);
        assert_eq!(buf.total_length(), 2);
        assert!(buf.capture_stopped());
    }

    #[test]
    fn stop_capture_is_idempotent() {
        let buf = PostRollBuffer::new(format(), 1.0, 1000);
        buf.append(&[1]);
        buf.stop_capture();
        buf.stop_capture();

        assert!(buf.capture_stopped());
        assert_eq!(buf.drain(), vec![1]);
        assert_eq!(buf.total_length(), 1);
    }

    #[test]
    fn armed_stop_cuts_at_target() {
        let buf = PostRollBuffer::new(format(), 0.010, 1000); // target 10 bytes
        buf.append(&[0; 6]);
        assert!(!buf.arm_stop());
        assert!(buf.is_stop_armed());

        buf.append(&[1; 6]);
        assert!(buf.capture_stopped());
        assert_eq!(buf.total_length(), 10);
        assert_eq!(buf.drain(), vec![0, 0, 0, 0, 0, 0, 1, 1, 1, 1]);
    }

    #[test]
    fn arm_stop_commits_when_target_already_reached() {
        let buf = PostRollBuffer::new(format(), 0.004, 1000);
        buf.append(&[0; 8]);

        assert!(buf.arm_stop());
        assert!(buf.capture_stopped());
        assert_eq!(buf.total_length(), 8);
    }

    #[test]
    fn arm_stop_discards_overshoot() {
        let buf = PostRollBuffer::new(format(), 0.004, 1000); // target 4 bytes
        buf.append(&[1, 2, 3, 4, 5, 6]);

        assert_eq!(buf.drain_to_target(), vec![1, 2, 3, 4]);
        assert!(buf.arm_stop());
        assert_eq!(buf.length(), 0);
        assert_eq!(buf.total_length(), 6);
        assert!(buf.drain_to_target().is_empty());
    }

    #[test]
    fn drain_to_target_holds_back_until_extended() {
        let buf = PostRollBuffer::new(format(), 0.004, 1000);
        buf.append(&[1, 2, 3]);
        assert_eq!(buf.drain_to_target(), vec![1, 2, 3]);

        buf.append(&[4, 5, 6]);
        assert_eq!(buf.drain_to_target(), vec![4]);
        assert_eq!(buf.length(), 2);

        buf.extend_target(2); // target = 6 + 2
        assert_eq!(buf.drain_to_target(), vec![5, 6]);
    }

    #[test]
    fn drain_returns_everything() {
        let buf = PostRollBuffer::new(format(), 0.004, 1000);
        buf.append(&[1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.drain(), vec![1, 2, 3, 4, 5, 6]);
        assert!(buf.drain().is_empty());
    }

    #[test]
    fn extension_moves_target_relative_to_captured() {
        let buf = PostRollBuffer::new(format(), 0.010, 1000);
        buf.append(&[0; 7]);

        assert_eq!(buf.extend_target(20), Some(27));
        assert!(!buf.arm_stop());
        buf.append(&[0; 15]);
        assert!(!buf.capture_stopped());
        buf.append(&[0; 15]);
        assert!(buf.capture_stopped());
        assert_eq!(buf.total_length(), 27);
    }

    #[test]
    fn extension_after_stop_is_rejected() {
        let buf = PostRollBuffer::new(format(), 1.0, 1000);
        buf.stop_capture();

        assert_eq!(buf.extend_target(100), None);
    }

    #[test]
    fn wait_for_stop_wakes_on_stop() {
        let buf = Arc::new(PostRollBuffer::new(format(), 1.0, 1000));
        let stopper = Arc::clone(&buf);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(50));
            stopper.stop_capture();
        });

        let started = Instant::now();
        assert!(buf.wait_for_stop(Duration::from_secs(5)));
        assert!(started.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn wait_for_stop_times_out() {
        let buf = PostRollBuffer::new(format(), 1.0, 1000);
        assert!(!buf.wait_for_stop(Duration::from_millis(20)));
    }
}
