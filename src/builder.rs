use std::time::Duration;

use super::circuit_breaker::CircuitBreaker;
use super::instrument::{Instrument, Tracing};
use super::settings::Settings;

/// A `CircuitBreaker`'s builder.
#[derive(Debug)]
pub struct Builder<INSTRUMENT> {
    name: String,
    settings: Settings,
    instrument: INSTRUMENT,
}

impl Builder<Tracing> {
    pub(crate) fn new(name: String) -> Self {
        Builder {
            instrument: Tracing::new(name.clone()),
            name,
            settings: Settings::default(),
        }
    }
}

impl<INSTRUMENT> Builder<INSTRUMENT> {
    /// Replaces every parameter at once.
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Configures how long an admitted call may run.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    /// Configures how long the breaker stays open before probing.
    pub fn sleep_window(mut self, sleep_window: Duration) -> Self {
        self.settings.sleep_window = sleep_window;
        self
    }

    /// Configures the maximum number of calls in flight.
    pub fn max_concurrent_requests(mut self, max_concurrent_requests: usize) -> Self {
        self.settings.max_concurrent_requests = max_concurrent_requests;
        self
    }

    /// Configures the failure rate, in percents, which opens the breaker.
    pub fn error_percent_threshold(mut self, error_percent_threshold: u8) -> Self {
        self.settings.error_percent_threshold = error_percent_threshold;
        self
    }

    /// Configures the minimum number of calls before the failure rate is considered.
    pub fn request_volume_threshold(mut self, request_volume_threshold: u64) -> Self {
        self.settings.request_volume_threshold = request_volume_threshold;
        self
    }

    /// Configures the rolling statistics window and its number of buckets.
    pub fn rolling_window(mut self, window: Duration, buckets: u8) -> Self {
        self.settings.rolling_window = window;
        self.settings.rolling_buckets = buckets;
        self
    }

    /// Configures `Instrument` for a circuit breaker.
    pub fn instrument<T>(self, instrument: T) -> Builder<T>
    where
        T: Instrument,
    {
        Builder {
            name: self.name,
            settings: self.settings,
            instrument,
        }
    }

    /// Builds a new circuit breaker instance.
    ///
    /// # Panics
    ///
    /// When the rolling window can't be split in the configured number of buckets.
    pub fn build(self) -> CircuitBreaker<INSTRUMENT>
    where
        INSTRUMENT: Instrument,
    {
        CircuitBreaker::new(self.name, self.settings, self.instrument)
    }
}
