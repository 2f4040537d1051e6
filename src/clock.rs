//! Wall-clock time, pacing, and cooperative shutdown.
//!
//! The pipeline never calls `std::thread::sleep` or `Local::now` directly. Both
//! go through `Clock` so tests can drive the loop without real delays.

use chrono::{DateTime, Local, TimeZone};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Longest uninterrupted sleep slice used by `SystemClock::pause`.
const PAUSE_SLICE: Duration = Duration::from_millis(100);

/// Shared flag observed by the pipeline at iteration boundaries.
#[derive(Clone, Debug, Default)]
pub struct ShutdownSignal {
    flag: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request shutdown. Safe to call from any thread, any number of times.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Route Ctrl-C / SIGTERM to this signal.
    pub fn install_ctrlc(&self) -> anyhow::Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            log::info!("interrupt received, draining pipeline");
            signal.trigger();
        })
        .map_err(|e| anyhow::anyhow!("error setting Ctrl-C handler: {}", e))
    }
}

/// Source of wall-clock timestamps and inter-frame delays.
pub trait Clock: Send + Sync {
    /// Local wall-clock time, used to stamp artifacts.
    fn now(&self) -> DateTime<Local>;

    /// Block for `duration`, returning early if `shutdown` fires.
    fn pause(&self, duration: Duration, shutdown: &ShutdownSignal);
}

/// Real clock backed by the OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Local> {
        Local::now()
    }

    fn pause(&self, duration: Duration, shutdown: &ShutdownSignal) {
        let deadline = Instant::now() + duration;
        loop {
            if shutdown.is_triggered() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            std::thread::sleep((deadline - now).min(PAUSE_SLICE));
        }
    }
}

/// Deterministic clock: `pause` advances virtual time instantly.
///
/// Used to replay recorded streams and to drive the pipeline in tests.
#[derive(Debug)]
pub struct ManualClock {
    state: Mutex<ManualState>,
}

#[derive(Debug)]
struct ManualState {
    now: DateTime<Local>,
    paused: Duration,
    pauses: u64,
}

impl ManualClock {
    /// Start at a fixed local wall-clock time.
    pub fn starting_at(start: DateTime<Local>) -> Self {
        Self {
            state: Mutex::new(ManualState {
                now: start,
                paused: Duration::ZERO,
                pauses: 0,
            }),
        }
    }

    /// Start at the given local date and time.
    pub fn at_local(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        let start = Local
            .with_ymd_and_hms(year, month, day, hour, min, sec)
            .earliest()
            .unwrap_or_else(Local::now);
        Self::starting_at(start)
    }

    /// Total virtual time spent in `pause`.
    pub fn total_paused(&self) -> Duration {
        self.lock().paused
    }

    /// Number of `pause` calls so far.
    pub fn pause_count(&self) -> u64 {
        self.lock().pauses
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Local> {
        self.lock().now
    }

    fn pause(&self, duration: Duration, _shutdown: &ShutdownSignal) {
        let mut state = self.lock();
        state.now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        state.paused += duration;
        state.pauses += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shutdown_signal_is_shared_between_clones() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_triggered());
        signal.trigger();
        signal.trigger();
        assert!(observer.is_triggered());
    }

    #[test]
    fn system_clock_pause_returns_early_on_shutdown() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        let started = Instant::now();
        SystemClock.pause(Duration::from_secs(30), &signal);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn manual_clock_advances_on_pause() {
        let clock = ManualClock::at_local(2025, 7, 13, 12, 0, 0);
        let before = clock.now();
        clock.pause(Duration::from_secs(5), &ShutdownSignal::new());
        clock.pause(Duration::from_secs(5), &ShutdownSignal::new());
        assert_eq!((clock.now() - before).num_seconds(), 10);
        assert_eq!(clock.pause_count(), 2);
        assert_eq!(clock.total_paused(), Duration::from_secs(10));
    }

    #[test]
    fn system_clock_pause_waits() {
        let signal = ShutdownSignal::new();
        let started = Instant::now();
        SystemClock.pause(Duration::from_millis(20), &signal);
        assert!(started.elapsed() >= Duration::from_millis(20));
    }
}
