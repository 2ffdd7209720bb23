use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::models::audio_models::{AudioFormat, Detection};
use crate::models::config::{CaptureConfiguration, ListenParams};
use crate::models::error::CaptureError;
use crate::models::state::ListenerState;
use crate::processing::capture_buffers::{DetectionBuffer, PostRollBuffer, PreRollBuffer};
use crate::session::recorder::InstanceRecorder;
use crate::session::timer::StopTimer;
use crate::traits::audio_input::AudioInput;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::hotword_engine::HotwordEngine;

/// The recorder a hotword would act on: the most recently created one, if
/// it still captures audio.
#[derive(Clone)]
pub enum ActiveRecorder {
    /// No recorder, or the newest one no longer captures.
    None,
    /// Capturing and not yet asked to stop; a hotword continues it.
    Capturing(Arc<InstanceRecorder>),
    /// Asked to stop and finishing its post-roll; a hotword starts a new one.
    Stopping(Arc<InstanceRecorder>),
}

impl ActiveRecorder {
    pub fn recorder(&self) -> Option<&Arc<InstanceRecorder>> {
        match self {
            Self::None => None,
            Self::Capturing(r) | Self::Stopping(r) => Some(r),
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing(_))
    }
}

/// What handling a hotword did, reported to the delegate after the control
/// lock is released.
enum TriggerOutcome {
    Started,
    Continued,
    Ignored,
    Failed(CaptureError),
}

struct ControlState {
    state: ListenerState,
}

/// State shared by the audio callback, the detection loop and the stop timer.
struct Shared {
    format: AudioFormat,
    config: CaptureConfiguration,
    detection_buffer: DetectionBuffer,
    pre_roll: RwLock<Option<Arc<PreRollBuffer>>>,
    recorders: Mutex<Vec<Arc<InstanceRecorder>>>,
    /// Serializes hotword handling, stop-timer firing and interrupts.
    control: Mutex<ControlState>,
    stop_timer: StopTimer,
    delegate: RwLock<Option<Arc<dyn CaptureDelegate>>>,
    is_running: AtomicBool,
    is_interrupted: AtomicBool,
    is_terminated: AtomicBool,
}

impl Shared {
    fn new(format: AudioFormat, config: CaptureConfiguration) -> Self {
        let detection_buffer = DetectionBuffer::for_duration(&format, config.detection_buffer_secs);
        Self {
            format,
            config,
            detection_buffer,
            pre_roll: RwLock::new(None),
            recorders: Mutex::new(Vec::new()),
            control: Mutex::new(ControlState {
                state: ListenerState::NotRunning,
            }),
            stop_timer: StopTimer::new(),
            delegate: RwLock::new(None),
            is_running: AtomicBool::new(false),
            is_interrupted: AtomicBool::new(false),
            is_terminated: AtomicBool::new(false),
        }
    }

    /// Real-time audio callback. Only short buffer copies under short locks.
    fn on_audio(&self, data: &[u8]) {
        self.detection_buffer.append(data);

        // The recorder list lock is held across the pre-roll append so a new
        // recorder's snapshot and registration cannot straddle a chunk.
        let mut recorders = self.recorders.lock();
        if let Some(pre_roll) = self.pre_roll.read().as_ref() {
            pre_roll.append(data);
        }
        recorders.retain(|r| !r.is_clean_up());
        for recorder in recorders.iter() {
            if !recorder.capture_stopped() {
                recorder.append(data);
            }
        }
    }

    fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.read().clone()
    }

    fn active_recorder(&self) -> ActiveRecorder {
        match self.recorders.lock().last() {
            Some(r) if r.capture_stopped() => ActiveRecorder::None,
            Some(r) if r.is_stop_requested() => ActiveRecorder::Stopping(Arc::clone(r)),
            Some(r) => ActiveRecorder::Capturing(Arc::clone(r)),
            None => ActiveRecorder::None,
        }
    }

    fn set_state(&self, control: &mut ControlState, state: ListenerState) {
        if control.state == state {
            return;
        }
        control.state = state;
        if let Some(delegate) = self.delegate() {
            delegate.on_state_changed(&state);
        }
    }

    fn on_hotword(self: &Arc<Self>, params: &ListenParams) {
        let outcome = {
            let _control = self.control.lock();
            self.handle_trigger(params)
        };

        let delegate = self.delegate();
        match outcome {
            TriggerOutcome::Started => {
                if let Some(d) = delegate {
                    d.on_recording_started();
                }
            }
            TriggerOutcome::Continued => {
                if let Some(d) = delegate {
                    d.on_recording_continued();
                }
            }
            TriggerOutcome::Ignored => {}
            TriggerOutcome::Failed(e) => {
                log::error!("Failed to start recording: {}", e);
                if let Some(d) = delegate {
                    d.on_error(&e);
                }
            }
        }
    }

    /// Decide between continuing the active recording and starting a new
    /// one. Caller holds the control lock.
    fn handle_trigger(self: &Arc<Self>, params: &ListenParams) -> TriggerOutcome {
        // stop, interrupt and terminate flip these under the same lock, so
        // no recording starts once they have run.
        if self.is_terminated.load(Ordering::SeqCst)
            || self.is_interrupted.load(Ordering::SeqCst)
            || !self.is_running.load(Ordering::SeqCst)
        {
            log::debug!("Listener shutting down, ignoring hotword");
            return TriggerOutcome::Ignored;
        }

        if let ActiveRecorder::Capturing(recorder) = self.active_recorder() {
            if !self.config.continue_recording {
                log::warn!("Continue recording disabled, ignoring hotword");
                return TriggerOutcome::Ignored;
            }

            log::info!("Continue recording");
            self.stop_timer.cancel();
            if recorder.extend_desired_length(params.record_after_secs) {
                if let Err(e) = self.schedule_stop(params) {
                    return TriggerOutcome::Failed(e);
                }
                return TriggerOutcome::Continued;
            }
            log::debug!("Active recording stopped before it could be extended");
        }

        log::info!("Start recording");
        match self.start_recording(params) {
            Ok(()) => TriggerOutcome::Started,
            Err(e) => TriggerOutcome::Failed(e),
        }
    }

    fn start_recording(self: &Arc<Self>, params: &ListenParams) -> Result<(), CaptureError> {
        let pre_roll = self
            .pre_roll
            .read()
            .clone()
            .ok_or_else(|| CaptureError::ConfigurationFailed("listener not started".into()))?;

        // Room for the post-roll bytes held back past the target until the
        // stop timer fires, plus two writer polls.
        let buffered_secs =
            params.record_after_secs + self.config.stop_grace_secs + 2.0 * self.config.write_poll_secs;
        let post_roll = Arc::new(PostRollBuffer::new(
            self.format,
            params.record_after_secs,
            self.format.bytes_for_secs(buffered_secs),
        ));

        let recorder = Arc::new(InstanceRecorder::new(
            &pre_roll,
            post_roll,
            &self.config,
            self.delegate(),
        )?);

        {
            let mut recorders = self.recorders.lock();
            recorder.catch_up(&pre_roll);
            recorders.push(Arc::clone(&recorder));
        }

        if let Err(e) = recorder.start_writing() {
            recorder.interrupt();
            return Err(e);
        }

        self.schedule_stop(params)
    }

    fn schedule_stop(self: &Arc<Self>, params: &ListenParams) -> Result<(), CaptureError> {
        let delay = Duration::from_secs_f64(params.record_after_secs) + self.config.stop_grace();
        let shared = Arc::clone(self);
        self.stop_timer
            .schedule(delay, move |generation| shared.fire_stop(generation))?;
        Ok(())
    }

    /// Stop-timer action: ask the newest recorder to stop.
    fn fire_stop(&self, generation: u64) {
        {
            let _control = self.control.lock();
            if !self.stop_timer.is_current(generation) {
                // Cancelled or replaced while this firing was on its way.
                return;
            }
            let Some(recorder) = self.recorders.lock().last().cloned() else {
                return;
            };
            log::info!("Stop recording");
            recorder.request_stop();
        }

        if let Some(d) = self.delegate() {
            d.on_recording_stopped();
        }
    }

    fn interrupt(&self) {
        log::debug!("Interrupt triggered");
        let interrupted_recording = {
            let mut control = self.control.lock();
            self.detection_buffer.clear();
            match self.active_recorder().recorder() {
                Some(recorder) => {
                    self.stop_timer.cancel();
                    recorder.interrupt();
                    true
                }
                None => {
                    self.is_interrupted.store(true, Ordering::SeqCst);
                    if control.state.is_listening() {
                        self.set_state(&mut control, ListenerState::Interrupted);
                    }
                    false
                }
            }
        };

        if interrupted_recording {
            log::info!("Interrupted active recording");
            if let Some(d) = self.delegate() {
                d.on_recording_stopped();
            }
        }
    }

    fn stop(&self) {
        if !self.is_running.load(Ordering::SeqCst) || self.is_terminated.load(Ordering::SeqCst) {
            return;
        }
        log::debug!("Will stop detection");

        let stopped_recording = {
            let _control = self.control.lock();
            self.is_interrupted.store(true, Ordering::SeqCst);
            self.is_running.store(false, Ordering::SeqCst);

            // Without the timer nothing else would end the active capture;
            // let it finish its post-roll instead.
            let had_timer = self.stop_timer.cancel();
            match self.active_recorder() {
                ActiveRecorder::Capturing(recorder) => {
                    recorder.request_stop();
                    true
                }
                _ => had_timer,
            }
        };

        if stopped_recording {
            if let Some(d) = self.delegate() {
                d.on_recording_stopped();
            }
        }
    }

    /// Returns false when already terminated.
    fn mark_terminated(&self) -> bool {
        if self.is_terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        let mut control = self.control.lock();
        self.set_state(&mut control, ListenerState::Terminated);
        true
    }

    /// End capture on every recorder still capturing so the writers drain
    /// what they have and close their files.
    fn finish_recorders(&self) {
        let recorders = self.recorders.lock().clone();
        for recorder in recorders.iter().filter(|r| !r.capture_stopped()) {
            log::debug!("Ending capture of {}", recorder.file_path().display());
            recorder.force_stop_capture();
        }
    }
}

/// Hotword-triggered capture orchestrator (the audio handler).
///
/// Generic over the audio input and the hotword engine. Owns the detection
/// buffer, the pre-roll buffer and the ordered list of recorders, and drives
/// the audio callback, the detection loop and the stop timer:
/// ```text
/// [AudioInput] → callback ─┬→ [DetectionBuffer] → detection loop → [HotwordEngine]
///                          ├→ [PreRollBuffer] ─────── snapshot ──┐        │ hotword
///                          └→ [PostRollBuffer] → [InstanceRecorder] ←─────┘
///                                                      ↓ write thread
///                                                  recording-*.wav
/// ```
///
/// All methods take `&self`; share it behind an `Arc` to call
/// [`interrupt`](Self::interrupt) or [`terminate`](Self::terminate) while
/// [`start`](Self::start) blocks another thread.
pub struct CaptureOrchestrator<A: AudioInput, E: HotwordEngine> {
    audio: Mutex<A>,
    engine: Mutex<E>,
    shared: Arc<Shared>,
}

impl<A: AudioInput, E: HotwordEngine> CaptureOrchestrator<A, E> {
    /// Configure the engine, size the buffers from its format and open the
    /// audio input.
    pub fn new(mut audio: A, mut engine: E, config: CaptureConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;

        let format = engine.audio_format();
        format.validate().map_err(CaptureError::ConfigurationFailed)?;

        let sensitivity = config.sensitivity_for(engine.num_hotwords())?;
        engine.set_audio_gain(config.audio_gain);
        if !sensitivity.is_empty() {
            engine.set_sensitivity(&sensitivity)?;
        }

        let frames_per_buffer = config.frames_per_buffer;
        let shared = Arc::new(Shared::new(format, config));

        let callback_shared = Arc::clone(&shared);
        audio.open(
            &format,
            frames_per_buffer,
            Arc::new(move |data: &[u8]| callback_shared.on_audio(data)),
        )?;

        log::debug!(
            "Audio handler created ({} ch, {} Hz, {} bytes per sample)",
            format.channels,
            format.sample_rate,
            format.sample_width
        );

        Ok(Self {
            audio: Mutex::new(audio),
            engine: Mutex::new(engine),
            shared,
        })
    }

    /// Listen for hotwords until interrupted, stopped or terminated.
    ///
    /// Blocks the calling thread with the detection loop. Each hotword
    /// starts a recording of `record_before_secs` of pre-roll plus
    /// `record_after_secs` of post-roll, or extends the active one when
    /// continuation is enabled.
    pub fn start(
        &self,
        params: ListenParams,
        delegate: Option<Arc<dyn CaptureDelegate>>,
    ) -> Result<(), CaptureError> {
        if self.shared.is_terminated.load(Ordering::SeqCst) {
            return Err(CaptureError::Terminated);
        }
        params.validate().map_err(CaptureError::ConfigurationFailed)?;

        {
            let mut control = self.shared.control.lock();
            if control.state.is_terminal() {
                return Err(CaptureError::Terminated);
            }
            // A previous run may still be winding down even after `stop`.
            if !control.state.can_start() || self.shared.is_running.swap(true, Ordering::SeqCst) {
                return Err(CaptureError::AlreadyRunning);
            }
            self.shared.is_interrupted.store(false, Ordering::SeqCst);
            *self.shared.delegate.write() = delegate;
            *self.shared.pre_roll.write() = Some(Arc::new(PreRollBuffer::new(
                self.shared.format,
                params.record_before_secs,
            )));
            self.shared.set_state(&mut control, ListenerState::Listening);
        }

        log::info!("Started listening for hotword...");
        self.detection_loop(&params);
        log::info!("Stopped listening for hotword");

        self.shared.stop();
        let mut control = self.shared.control.lock();
        if !control.state.is_terminal() {
            self.shared.set_state(&mut control, ListenerState::NotRunning);
        }
        Ok(())
    }

    fn detection_loop(&self, params: &ListenParams) {
        let sleep_time = params.sleep_time();
        let settle = self.shared.config.settle_interval();
        let max_errors = self.shared.config.max_consecutive_detector_errors;
        let mut consecutive_errors = 0u32;

        loop {
            if self.shared.is_interrupted.load(Ordering::SeqCst) {
                log::debug!("Interrupt detected");
                break;
            }
            if self.shared.is_terminated.load(Ordering::SeqCst) {
                log::debug!("Terminate detected");
                break;
            }

            let data = self.shared.detection_buffer.drain();
            if data.is_empty() {
                thread::sleep(sleep_time);
                continue;
            }

            let detection = self.engine.lock().run_detection(&data);
            match detection {
                Ok(detection @ Detection::Hotword(index)) if detection.is_trigger() => {
                    consecutive_errors = 0;
                    log::info!("Hotword {} detected", index);
                    self.shared.on_hotword(params);
                    thread::sleep(settle);
                }
                Ok(Detection::Hotword(index)) => {
                    consecutive_errors = 0;
                    log::warn!("Engine reported invalid hotword index {}, ignoring", index);
                    thread::sleep(sleep_time);
                }
                Ok(Detection::None) => {
                    consecutive_errors = 0;
                    thread::sleep(sleep_time);
                }
                Err(e) => {
                    consecutive_errors += 1;
                    log::error!("Error initialising streams or reading audio data: {}", e);
                    if let Some(d) = self.shared.delegate() {
                        d.on_error(&e);
                    }
                    if max_errors.is_some_and(|max| consecutive_errors >= max) {
                        log::error!("{} consecutive detector errors, stop listening", consecutive_errors);
                        break;
                    }
                    thread::sleep(sleep_time);
                }
            }
        }
    }

    /// Interrupt the active recording if there is one; otherwise make the
    /// detection loop exit.
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }

    /// Stop listening. The active recording still completes its post-roll.
    /// Idempotent; no-op once terminated.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Stop if running and release the audio input. Irrecoverable: `start`
    /// fails afterwards. Recordings still capturing are cut at what they
    /// have and finish writing in the background. Idempotent.
    pub fn terminate(&self) {
        if self.shared.is_running.load(Ordering::SeqCst) {
            self.shared.stop();
        }
        // Takes the control lock, so a hotword being handled right now has
        // registered its recorder before the sweep below.
        if !self.shared.mark_terminated() {
            return;
        }
        log::debug!("Will terminate audio stream");

        if let Err(e) = self.audio.lock().close() {
            log::error!("Failed to close audio input: {}", e);
        }
        self.shared.finish_recorders();
    }

    pub fn is_running(&self) -> bool {
        self.shared.is_running.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> ListenerState {
        self.shared.control.lock().state
    }

    pub fn format(&self) -> AudioFormat {
        self.shared.format
    }

    pub fn config(&self) -> &CaptureConfiguration {
        &self.shared.config
    }

    /// Recorders not yet pruned, oldest first.
    pub fn recorders(&self) -> Vec<Arc<InstanceRecorder>> {
        self.shared.recorders.lock().clone()
    }

    pub fn active_recorder(&self) -> ActiveRecorder {
        self.shared.active_recorder()
    }

    /// Current pre-roll buffer; `None` before the first `start`.
    pub fn pre_roll(&self) -> Option<Arc<PreRollBuffer>> {
        self.shared.pre_roll.read().clone()
    }

    pub fn has_pending_stop(&self) -> bool {
        self.shared.stop_timer.is_pending()
    }
}

impl<A: AudioInput, E: HotwordEngine> Drop for CaptureOrchestrator<A, E> {
    fn drop(&mut self) {
        self.terminate();
    }
}
