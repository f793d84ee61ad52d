//! The circuit breaker block of a backend's extra configuration.
//!
//! The block lives under [`NAMESPACE`] and is parsed leniently: anything missing,
//! malformed or out of range turns the whole block into the disabled [`Config`], so a
//! bad configuration degrades to a passthrough instead of failing the gateway.

use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};

use super::settings::Settings;

/// The key of the circuit breaker block in a backend's extra configuration.
pub const NAMESPACE: &str = "gateway_cbreaker";

/// A backend's extension configuration, keyed by namespace.
pub type ExtraConfig = Map<String, Value>;

/// What the caller receives once a call's outcome has been recorded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Propagation {
    /// Return exactly what the backend returned. Response statuses are not inspected.
    Strict,
    /// Responses with a failure status count as failures for the breaker.
    ///
    /// When `surface_error` is `true` the caller receives the response wrapped in a
    /// dedicated error, otherwise it receives the response as a success.
    ///
    /// With `suppress_backend_errors` the caller never sees a backend error: the failure
    /// is recorded and an empty, incomplete response is returned instead. Rejections and
    /// timeouts are still reported.
    PermissiveOnStatus {
        /// Whether failure statuses are returned as an error.
        surface_error: bool,
        /// Whether backend errors are swallowed once recorded.
        suppress_backend_errors: bool,
    },
}

impl Default for Propagation {
    fn default() -> Self {
        Propagation::PermissiveOnStatus {
            surface_error: true,
            suppress_backend_errors: false,
        }
    }
}

/// The circuit breaker configuration of a backend.
///
/// `Config::default()` is the disabled sentinel.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    /// The name under which breakers are shared; empty when disabled.
    pub command_name: String,
    /// Milliseconds, zero for the default.
    pub timeout: u64,
    /// Milliseconds, zero for the default.
    pub sleep_window: u64,
    /// Zero for the default.
    pub max_concurrent_requests: u64,
    /// In percents, zero for the default.
    pub error_percent_threshold: u8,
    /// Zero for the default.
    pub request_volume_threshold: u64,
    /// How outcomes are handed back to the caller.
    pub propagation: Propagation,
    /// Response statuses counted as failures by `Propagation::PermissiveOnStatus`.
    pub failure_status_codes: Vec<u16>,
}

impl Config {
    /// Returns `true` for the disabled sentinel.
    pub fn is_disabled(&self) -> bool {
        self.command_name.is_empty()
    }
}

impl From<&Config> for Settings {
    fn from(config: &Config) -> Self {
        let defaults = Settings::default();
        let millis_or = |value: u64, default: Duration| match value {
            0 => default,
            ms => Duration::from_millis(ms),
        };

        Settings {
            timeout: millis_or(config.timeout, defaults.timeout),
            sleep_window: millis_or(config.sleep_window, defaults.sleep_window),
            max_concurrent_requests: match config.max_concurrent_requests {
                0 => defaults.max_concurrent_requests,
                n => usize::try_from(n).unwrap_or(usize::MAX),
            },
            error_percent_threshold: match config.error_percent_threshold {
                0 => defaults.error_percent_threshold,
                n => n,
            },
            request_volume_threshold: match config.request_volume_threshold {
                0 => defaults.request_volume_threshold,
                n => n,
            },
            ..defaults
        }
    }
}

/// Extracts the circuit breaker configuration from a backend's extra configuration.
///
/// Returns the disabled sentinel when the block is absent or malformed.
pub fn from_extra_config(extra: &ExtraConfig) -> Config {
    extra
        .get(NAMESPACE)
        .filter(|value| value.is_object())
        .and_then(|value| RawConfig::deserialize(value).ok())
        .and_then(RawConfig::validate)
        .unwrap_or_default()
}

/// The block as written, numbers may be floating point.
#[derive(Debug, Deserialize)]
struct RawConfig {
    command_name: Option<String>,
    timeout: Option<f64>,
    sleep_window: Option<f64>,
    max_concurrent_requests: Option<f64>,
    error_percent_threshold: Option<f64>,
    request_volume_threshold: Option<f64>,
    propagation: Option<String>,
    surface_status_error: Option<bool>,
    suppress_backend_errors: Option<bool>,
    failure_status_codes: Option<Vec<f64>>,
}

impl RawConfig {
    fn validate(self) -> Option<Config> {
        let command_name = self.command_name.filter(|name| !name.is_empty())?;

        let error_percent_threshold = truncate(self.error_percent_threshold)?;
        if error_percent_threshold > 100 {
            return None;
        }

        let propagation = match self.propagation.as_deref() {
            None | Some("permissive") => Propagation::PermissiveOnStatus {
                surface_error: self.surface_status_error.unwrap_or(true),
                suppress_backend_errors: self.suppress_backend_errors.unwrap_or(false),
            },
            Some("strict") => Propagation::Strict,
            Some(_) => return None,
        };

        let failure_status_codes = match self.failure_status_codes {
            None => vec![500],
            Some(codes) => codes
                .into_iter()
                .map(|code| {
                    truncate(Some(code))
                        .filter(|code| (100..=599).contains(code))
                        .map(|code| code as u16)
                })
                .collect::<Option<Vec<_>>>()?,
        };

        Some(Config {
            command_name,
            timeout: truncate(self.timeout)?,
            sleep_window: truncate(self.sleep_window)?,
            max_concurrent_requests: truncate(self.max_concurrent_requests)?,
            error_percent_threshold: error_percent_threshold as u8,
            request_volume_threshold: truncate(self.request_volume_threshold)?,
            propagation,
            failure_status_codes,
        })
    }
}

/// Truncates a JSON number toward zero. Absent values are zero, negative or
/// non-finite ones are invalid.
fn truncate(value: Option<f64>) -> Option<u64> {
    match value {
        None => Some(0),
        Some(n) if n.is_finite() && n >= 0.0 => Some(n.trunc() as u64),
        Some(_) => None,
    }
}
