//! Master-mode pulse generation.

use crate::config::PULSES_PER_QUARTER_NOTE;
use crossbeam::channel::{bounded, RecvTimeoutError, Sender};
use log::{debug, error, info};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub type PulseCallback = Box<dyn FnMut() + Send + 'static>;

/// Periodic source of internal clock pulses
pub trait PulseTimer: Send {
    /// Begins calling `on_pulse` every `interval`. Ignored while already active.
    fn start(&mut self, interval: Duration, on_pulse: PulseCallback);
    /// Takes effect from the next pulse
    fn set_interval(&mut self, interval: Duration);
    /// No pulse is delivered after this returns
    fn stop(&mut self);
    fn is_active(&self) -> bool;
}

/// 60000 / (bpm * 24) milliseconds
pub fn pulse_interval(bpm: f64) -> Duration {
    Duration::from_secs_f64(60.0 / (bpm * PULSES_PER_QUARTER_NOTE as f64))
}

/// Dedicated timing thread. Deadlines advance by whole intervals from the
/// start instant so sleep overshoot does not accumulate.
pub struct ThreadPulseTimer {
    interval_nanos: Arc<AtomicU64>,
    shutdown_tx: Option<Sender<()>>,
    thread_handle: Option<JoinHandle<()>>,
}

impl Default for ThreadPulseTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPulseTimer {
    pub fn new() -> Self {
        ThreadPulseTimer {
            interval_nanos: Arc::new(AtomicU64::new(0)),
            shutdown_tx: None,
            thread_handle: None,
        }
    }

    fn store_interval(&self, interval: Duration) {
        let nanos = u64::try_from(interval.as_nanos()).unwrap_or(u64::MAX).max(1);
        self.interval_nanos.store(nanos, Ordering::SeqCst);
    }
}

impl PulseTimer for ThreadPulseTimer {
    fn start(&mut self, interval: Duration, mut on_pulse: PulseCallback) {
        if self.thread_handle.is_some() {
            return; // Already running
        }

        self.store_interval(interval);
        let interval_nanos = Arc::clone(&self.interval_nanos);
        // Dropping the sender wakes the thread out of its wait immediately
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let spawned = thread::Builder::new()
            .name("barsync-pulse".into())
            .spawn(move || {
                debug!("Pulse generator thread started");
                let mut next = Instant::now() + interval;

                loop {
                    let wait = next.saturating_duration_since(Instant::now());
                    match shutdown_rx.recv_timeout(wait) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }

                    on_pulse();

                    let interval = Duration::from_nanos(interval_nanos.load(Ordering::SeqCst));
                    next += interval;

                    // Fell more than a whole interval behind: resync instead of bursting
                    let now = Instant::now();
                    if now.saturating_duration_since(next) > interval {
                        next = now + interval;
                    }
                }
                debug!("Pulse generator thread stopped");
            });

        match spawned {
            Ok(handle) => {
                self.shutdown_tx = Some(shutdown_tx);
                self.thread_handle = Some(handle);
                info!("Pulse generator started, interval {:?}", interval);
            }
            Err(e) => error!("Failed to spawn pulse generator thread: {}", e),
        }
    }

    fn set_interval(&mut self, interval: Duration) {
        self.store_interval(interval);
        debug!("Pulse generator interval set to {:?}", interval);
    }

    fn stop(&mut self) {
        self.shutdown_tx.take();

        if let Some(handle) = self.thread_handle.take() {
            // Joining ourselves would deadlock; the loop exits on its own
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
            info!("Pulse generator stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.thread_handle.is_some()
    }
}

impl Drop for ThreadPulseTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[derive(Default)]
struct ManualSlot {
    callback: Option<PulseCallback>,
    interval: Option<Duration>,
    active: bool,
    starts: u32,
}

/// Timer whose pulses are fired by hand. Clones share the same slot, so a test
/// keeps one clone and hands the other to the controller.
#[derive(Clone, Default)]
pub struct ManualPulseTimer {
    slot: Arc<Mutex<ManualSlot>>,
}

impl ManualPulseTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualSlot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delivers one pulse. Returns false when the timer is not running.
    pub fn pulse(&self) -> bool {
        let mut callback = {
            let mut slot = self.lock();
            if !slot.active {
                return false;
            }
            match slot.callback.take() {
                Some(callback) => callback,
                None => return false,
            }
        };

        // Called without the slot lock so the callback may stop the timer
        callback();

        let mut slot = self.lock();
        if slot.active && slot.callback.is_none() {
            slot.callback = Some(callback);
        }
        true
    }

    /// Delivers up to `count` pulses, stopping early if the timer is stopped
    pub fn pulses(&self, count: u64) -> u64 {
        let mut delivered = 0;
        for _ in 0..count {
            if !self.pulse() {
                break;
            }
            delivered += 1;
        }
        delivered
    }

    pub fn interval(&self) -> Option<Duration> {
        self.lock().interval
    }

    /// How many times the timer has been started
    pub fn start_count(&self) -> u32 {
        self.lock().starts
    }
}

impl PulseTimer for ManualPulseTimer {
    fn start(&mut self, interval: Duration, on_pulse: PulseCallback) {
        let mut slot = self.lock();
        if slot.active {
            return;
        }
        slot.callback = Some(on_pulse);
        slot.interval = Some(interval);
        slot.active = true;
        slot.starts += 1;
    }

    fn set_interval(&mut self, interval: Duration) {
        self.lock().interval = Some(interval);
    }

    fn stop(&mut self) {
        let mut slot = self.lock();
        slot.active = false;
        slot.callback = None;
    }

    fn is_active(&self) -> bool {
        self.lock().active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_pulse_interval() {
        // 120 BPM: 20.833ms per pulse
        assert_eq!(pulse_interval(120.0).as_micros(), 20_833);
        assert_eq!(pulse_interval(60.0).as_micros(), 41_666);
    }

    #[test]
    fn test_thread_timer_pulses_until_stopped() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let mut timer = ThreadPulseTimer::new();

        timer.start(
            Duration::from_millis(2),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert!(timer.is_active());
        thread::sleep(Duration::from_millis(50));
        timer.stop();
        assert!(!timer.is_active());

        let after_stop = count.load(Ordering::SeqCst);
        assert!(after_stop > 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(count.load(Ordering::SeqCst), after_stop);
    }

    #[test]
    fn test_thread_timer_stop_is_prompt_at_slow_intervals() {
        let mut timer = ThreadPulseTimer::new();
        timer.start(Duration::from_secs(5), Box::new(|| {}));
        let started = Instant::now();
        timer.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_manual_timer_delivers_on_demand() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = ManualPulseTimer::new();
        let mut timer = handle.clone();

        assert!(!handle.pulse());
        timer.start(
            Duration::from_millis(20),
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );
        assert_eq!(handle.pulses(5), 5);
        assert_eq!(count.load(Ordering::SeqCst), 5);
        assert_eq!(handle.interval(), Some(Duration::from_millis(20)));

        timer.stop();
        assert_eq!(handle.pulses(5), 0);
        assert_eq!(handle.start_count(), 1);
    }
}
