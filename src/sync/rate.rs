use crossbeam::atomic::AtomicCell;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Exponentially smoothed rate of some quantity per second.
///
/// Each update blends the instantaneous rate `amount / elapsed` into the
/// running estimate, keeping `smoothing` of the old value. The first
/// non-empty interval seeds the estimate directly.
#[derive(Debug, Clone)]
pub struct RateMeter {
    smoothing: f64,
    current: f64,
    seeded: bool,
    last: Option<Instant>,
}

impl RateMeter {
    pub fn new(smoothing: f64) -> Self {
        Self {
            smoothing: smoothing.clamp(0.0, 1.0),
            current: 0.0,
            seeded: false,
            last: None,
        }
    }

    /// Fold `amount` transferred over `elapsed` into the estimate.
    ///
    /// A zero interval carries no information and returns the previous value.
    pub fn update(&mut self, amount: f64, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs <= 0.0 || !amount.is_finite() {
            return self.current;
        }

        let instant = amount / secs;
        if self.seeded {
            self.current = self.current * self.smoothing + instant * (1.0 - self.smoothing);
        } else {
            self.current = instant;
            self.seeded = true;
        }
        self.current
    }

    /// Update at `now`, measuring from the previous call.
    ///
    /// The very first call only starts the clock.
    pub fn tick_at(&mut self, amount: f64, now: Instant) -> f64 {
        let previous = self.last.replace(now);
        match previous {
            Some(previous) => self.update(amount, now.saturating_duration_since(previous)),
            None => self.current,
        }
    }

    pub fn current(&self) -> f64 {
        self.current
    }
}

/// Advisory counters shared between the producer, the consumer and the overlay.
///
/// Rates have one writer (the source loop); any thread may read them. A
/// reader can see a value one update behind, which is fine for display.
#[derive(Debug, Default)]
pub struct Telemetry {
    bytes_per_sec: AtomicCell<f64>,
    frames_per_sec: AtomicCell<f64>,
    frames_produced: AtomicU64,
    frames_flushed: AtomicU64,
    bytes_read: AtomicU64,
}

impl Telemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish_rates(&self, bytes_per_sec: f64, frames_per_sec: f64) {
        self.bytes_per_sec.store(bytes_per_sec);
        self.frames_per_sec.store(frames_per_sec);
    }

    pub fn bytes_per_sec(&self) -> f64 {
        self.bytes_per_sec.load()
    }

    pub fn frames_per_sec(&self) -> f64 {
        self.frames_per_sec.load()
    }

    pub fn record_read(&self, bytes: usize) {
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn record_produced(&self) {
        self.frames_produced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_flushed(&self) {
        self.frames_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frames_produced(&self) -> u64 {
        self.frames_produced.load(Ordering::Relaxed)
    }

    pub fn frames_flushed(&self) -> u64 {
        self.frames_flushed.load(Ordering::Relaxed)
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read.load(Ordering::Relaxed)
    }

    /// Infobar text, e.g. `SD 2592.0 kBPS  15.0 FPS`.
    pub fn status_line(&self) -> String {
        format!(
            "SD {:.1} kBPS  {:.1} FPS",
            self.bytes_per_sec() / 1000.0,
            self.frames_per_sec()
        )
    }
}
