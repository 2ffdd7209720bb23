use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::error::CaptureError;

#[derive(Debug, Default)]
struct TimerSlot {
    generation: u64,
    pending: bool,
}

/// Single-slot deferred action.
///
/// Scheduling replaces whatever was pending; at most one action is ever
/// outstanding. Each schedule gets a generation number that is handed to the
/// action when it fires, so the action can re-check
/// [`is_current`](Self::is_current) under its own lock and drop a firing that
/// raced with a cancel.
#[derive(Clone, Default)]
pub struct StopTimer {
    slot: Arc<(Mutex<TimerSlot>, Condvar)>,
}

impl StopTimer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel any pending action and run `action` after `delay`.
    pub fn schedule<F>(&self, delay: Duration, action: F) -> Result<u64, CaptureError>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        let (lock, cvar) = &*self.slot;
        let generation = {
            let mut slot = lock.lock();
            slot.generation += 1;
            slot.pending = true;
            slot.generation
        };
        // Wake the replaced timer thread so it exits now.
        cvar.notify_all();

        let shared = Arc::clone(&self.slot);
        let deadline = Instant::now() + delay;
        thread::Builder::new()
            .name("stop-timer".into())
            .spawn(move || {
                let (lock, cvar) = &*shared;
                let mut slot = lock.lock();
                loop {
                    if slot.generation != generation {
                        return;
                    }
                    if Instant::now() >= deadline {
                        break;
                    }
                    let _ = cvar.wait_until(&mut slot, deadline);
                }
                slot.pending = false;
                drop(slot);
                action(generation);
            })
            .map_err(|e| {
                self.cancel();
                CaptureError::Unknown(format!("failed to spawn stop timer: {}", e))
            })?;

        Ok(generation)
    }

    /// Cancel the pending action, if any. Returns whether one was pending.
    pub fn cancel(&self) -> bool {
        let (lock, cvar) = &*self.slot;
        let was_pending = {
            let mut slot = lock.lock();
            let was_pending = slot.pending;
            slot.generation += 1;
            slot.pending = false;
            was_pending
        };
        cvar.notify_all();
        was_pending
    }

    pub fn is_pending(&self) -> bool {
        self.slot.0.lock().pending
    }

    /// Whether `generation` is still the latest schedule (not cancelled or replaced).
    pub fn is_current(&self, generation: u64) -> bool {
        self.slot.0.lock().generation == generation
    }
}
