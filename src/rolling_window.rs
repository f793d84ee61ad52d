use std::time::{Duration, Instant};

use super::clock;

/// Success and failure counters of one time bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct Bucket {
    successes: u64,
    failures: u64,
}

/// Outcome counters observed within the rolling window.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Total number of recorded calls.
    pub requests: u64,
    /// Calls recorded as success.
    pub successes: u64,
    /// Calls recorded as failure.
    pub failures: u64,
}

impl Snapshot {
    /// Returns the failure rate in percents rounded to the nearest integer, or zero when
    /// nothing was recorded.
    pub fn failure_percent(&self) -> u64 {
        if self.requests == 0 {
            return 0;
        }
        (self.failures * 100 + self.requests / 2) / self.requests
    }
}

/// Time windowed success/failure counters.
///
/// The window is split in buckets of equal width. Once a bucket falls out of the window
/// its counters are dropped, so the sums only reflect recent history.
#[derive(Debug)]
pub struct RollingWindow {
    width: Duration,
    buckets: Vec<Bucket>,
    index: usize,
    bucket_start: Instant,
}

impl RollingWindow {
    /// Creates a new window.
    ///
    /// * `window` - The range of time covered by the counters.
    /// * `buckets` - The number of buckets the window is split in.
    ///
    /// # Panics
    ///
    /// * When `buckets` is zero or `window` is shorter than one nanosecond per bucket.
    pub fn new(window: Duration, buckets: u8) -> Self {
        assert!(buckets > 0, "rolling window needs at least one bucket");

        let width = window / u32::from(buckets);
        assert!(!width.is_zero(), "rolling window bucket width is zero");

        Self {
            width,
            buckets: vec![Bucket::default(); buckets as usize],
            index: 0,
            bucket_start: clock::now(),
        }
    }

    /// Records a successful call.
    pub fn record_success(&mut self) {
        self.expire();
        self.buckets[self.index].successes += 1;
    }

    /// Records a failed call.
    pub fn record_failure(&mut self) {
        self.expire();
        self.buckets[self.index].failures += 1;
    }

    /// Returns the counters of the whole window.
    pub fn snapshot(&mut self) -> Snapshot {
        self.expire();

        let (successes, failures) = self
            .buckets
            .iter()
            .fold((0, 0), |(s, f), it| (s + it.successes, f + it.failures));

        Snapshot {
            requests: successes + failures,
            successes,
            failures,
        }
    }

    /// Drops every recorded outcome.
    pub fn reset(&mut self) {
        self.buckets.iter_mut().for_each(|it| *it = Bucket::default());
        self.bucket_start = clock::now();
    }

    /// Moves the current bucket forward, zeroing the buckets that left the window.
    fn expire(&mut self) {
        let now = clock::now();
        let since = now.saturating_duration_since(self.bucket_start);
        let crossed = since.as_nanos() / self.width.as_nanos();

        if crossed == 0 {
            return;
        }

        let len = self.buckets.len();
        if crossed >= len as u128 {
            self.reset();
            return;
        }

        for _ in 0..crossed {
            self.index = (self.index + 1) % len;
            self.buckets[self.index] = Bucket::default();
        }
        self.bucket_start += self.width * crossed as u32;
    }
}
