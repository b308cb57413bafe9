//! Byte and item counters with speed and ETA estimation.

use std::time::{Duration, Instant};

/// Per-task progress counters.
///
/// All methods take the current instant explicitly so that speed and ETA
/// arithmetic is deterministic under test.
#[derive(Debug, Clone)]
pub struct ProgressAccumulator {
    window: Duration,
    total_bytes: Option<u64>,
    total_items: Option<u64>,
    bytes_done: u64,
    items_done: u64,
    roots_total: u64,
    roots_done: u64,
    manual_percent: Option<u8>,
    /// Running time accumulated before the current stretch.
    accumulated: Duration,
    /// Start of the current running stretch; None while suspended.
    running_since: Option<Instant>,
    window_start: Option<Instant>,
    window_bytes: u64,
    current_speed: f64,
}

impl ProgressAccumulator {
    /// Create an accumulator sampling speed over `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            total_bytes: None,
            total_items: None,
            bytes_done: 0,
            items_done: 0,
            roots_total: 0,
            roots_done: 0,
            manual_percent: None,
            accumulated: Duration::ZERO,
            running_since: None,
            window_start: None,
            window_bytes: 0,
            current_speed: 0.0,
        }
    }

    /// Set the discovered totals. `None` means unknown.
    pub fn set_totals(&mut self, bytes: Option<u64>, items: Option<u64>) {
        self.total_bytes = bytes.map(|b| b.max(self.bytes_done));
        self.total_items = items.map(|i| i.max(self.items_done));
    }

    /// Number of top-level sources, used when totals are unknown.
    pub fn set_roots(&mut self, roots: u64) {
        self.roots_total = roots;
    }

    /// Fixed display percentage used instead of the computed one.
    pub fn set_manual_percent(&mut self, percent: Option<u8>) {
        self.manual_percent = percent.map(|p| p.min(100));
    }

    /// Start or continue counting running time.
    pub fn resume(&mut self, now: Instant) {
        if self.running_since.is_none() {
            self.running_since = Some(now);
            self.window_start = Some(now);
            self.window_bytes = self.bytes_done;
        }
    }

    /// Stop counting running time (paused, queued or waiting on a decision).
    pub fn suspend(&mut self, now: Instant) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += now.saturating_duration_since(since);
        }
        self.window_start = None;
        self.current_speed = 0.0;
    }

    /// Whether running time is being counted.
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Add processed bytes.
    pub fn add_bytes(&mut self, bytes: u64, now: Instant) {
        self.bytes_done = self.bytes_done.saturating_add(bytes);
        if let Some(total) = self.total_bytes.as_mut() {
            *total = (*total).max(self.bytes_done);
        }
        self.tick(now);
    }

    /// Count completed units.
    pub fn add_items(&mut self, items: u64, now: Instant) {
        self.items_done = self.items_done.saturating_add(items);
        if let Some(total) = self.total_items.as_mut() {
            *total = (*total).max(self.items_done);
        }
        self.tick(now);
    }

    /// Count a finished top-level source.
    pub fn complete_root(&mut self) {
        self.roots_done += 1;
    }

    fn tick(&mut self, now: Instant) {
        let Some(start) = self.window_start else {
            return;
        };
        let span = now.saturating_duration_since(start);
        if span < self.window {
            return;
        }
        let sample = (self.bytes_done - self.window_bytes) as f64 / span.as_secs_f64();
        self.current_speed = if self.current_speed == 0.0 {
            sample
        } else {
            (self.current_speed + sample) / 2.0
        };
        self.window_start = Some(now);
        self.window_bytes = self.bytes_done;
    }

    /// Total bytes, if known.
    pub fn total_bytes(&self) -> Option<u64> {
        self.total_bytes
    }

    /// Total units, if known.
    pub fn total_items(&self) -> Option<u64> {
        self.total_items
    }

    /// Bytes processed so far.
    pub fn bytes_done(&self) -> u64 {
        self.bytes_done
    }

    /// Units completed so far.
    pub fn items_done(&self) -> u64 {
        self.items_done
    }

    /// Running time, excluding suspended stretches.
    pub fn elapsed(&self, now: Instant) -> Duration {
        self.accumulated
            + self
                .running_since
                .map_or(Duration::ZERO, |since| now.saturating_duration_since(since))
    }

    /// Smoothed throughput over the most recent window, in bytes per second.
    pub fn current_speed(&self) -> f64 {
        self.current_speed
    }

    /// Average throughput over the running time, in bytes per second.
    pub fn average_speed(&self, now: Instant) -> f64 {
        let secs = self.elapsed(now).as_secs_f64();
        if secs > 0.0 {
            self.bytes_done as f64 / secs
        } else {
            0.0
        }
    }

    /// Completion percentage.
    ///
    /// Uses bytes when the byte total is known and non-zero, then units,
    /// then completed top-level sources. None when nothing can be estimated.
    pub fn percent(&self) -> Option<u8> {
        if let Some(manual) = self.manual_percent {
            return Some(manual);
        }
        let ratio = |done: u64, total: u64| ((done.min(total) * 100) / total) as u8;
        match (self.total_bytes, self.total_items) {
            (Some(bytes), _) if bytes > 0 => Some(ratio(self.bytes_done, bytes)),
            (_, Some(0)) => Some(100),
            (_, Some(items)) => Some(ratio(self.items_done, items)),
            _ if self.roots_total > 0 => Some(ratio(self.roots_done, self.roots_total)),
            _ => None,
        }
    }

    /// Estimated remaining time at the given speed.
    pub fn remaining(&self, speed: f64) -> Option<Duration> {
        let total = self.total_bytes?;
        if speed <= 0.0 || !speed.is_finite() {
            return None;
        }
        let left = total.saturating_sub(self.bytes_done) as f64;
        Some(Duration::from_secs_f64(left / speed))
    }
}
