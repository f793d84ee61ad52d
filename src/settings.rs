use std::time::Duration;

/// Parameters of a circuit breaker.
///
/// The defaults are the usual Hystrix command defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// How long an admitted call may run before it is recorded as a failure.
    pub timeout: Duration,
    /// How long the breaker stays open before a probe is allowed.
    pub sleep_window: Duration,
    /// Maximum number of calls in flight at the same time.
    pub max_concurrent_requests: usize,
    /// Failure rate in percents, within the rolling window, which opens the breaker.
    pub error_percent_threshold: u8,
    /// Minimum number of calls within the rolling window before the failure rate is
    /// taken into account.
    pub request_volume_threshold: u64,
    /// The range of time covered by the failure statistics.
    pub rolling_window: Duration,
    /// The number of buckets the rolling window is split in.
    pub rolling_buckets: u8,
}

impl Settings {
    /// Default for [`Settings::timeout`].
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(1_000);
    /// Default for [`Settings::sleep_window`].
    pub const DEFAULT_SLEEP_WINDOW: Duration = Duration::from_millis(5_000);
    /// Default for [`Settings::max_concurrent_requests`].
    pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 10;
    /// Default for [`Settings::error_percent_threshold`].
    pub const DEFAULT_ERROR_PERCENT_THRESHOLD: u8 = 50;
    /// Default for [`Settings::request_volume_threshold`].
    pub const DEFAULT_REQUEST_VOLUME_THRESHOLD: u64 = 20;
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            timeout: Self::DEFAULT_TIMEOUT,
            sleep_window: Self::DEFAULT_SLEEP_WINDOW,
            max_concurrent_requests: Self::DEFAULT_MAX_CONCURRENT_REQUESTS,
            error_percent_threshold: Self::DEFAULT_ERROR_PERCENT_THRESHOLD,
            request_volume_threshold: Self::DEFAULT_REQUEST_VOLUME_THRESHOLD,
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
        }
    }
}
