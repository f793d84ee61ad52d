use super::error::Rejection;
use super::rolling_window::Snapshot;

/// Consumes the state machine events. May used for metrics and/or logs.
pub trait Instrument {
    /// Calls when state machine reject a call.
    fn on_call_rejected(&self, rejection: Rejection);

    /// Calls when the circuit breaker become to open state.
    fn on_open(&self, stats: &Snapshot);

    /// Calls when the circuit breaker become to half open state.
    fn on_half_open(&self);

    /// Calls when the circuit breaker become to closed state.
    fn on_closed(&self);
}

/// An instrumentation which does nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopInstrument;

impl Instrument for NoopInstrument {
    fn on_call_rejected(&self, _: Rejection) {}

    fn on_open(&self, _: &Snapshot) {}

    fn on_half_open(&self) {}

    fn on_closed(&self) {}
}

/// Logs state changes with `tracing`, tagged by the breaker's command name.
#[derive(Clone, Debug)]
pub struct Tracing {
    command: String,
}

impl Tracing {
    /// Creates an instrument logging under the given command name.
    pub fn new(command: impl Into<String>) -> Self {
        Tracing {
            command: command.into(),
        }
    }
}

impl Instrument for Tracing {
    fn on_call_rejected(&self, rejection: Rejection) {
        tracing::debug!(command = %self.command, reason = %rejection, "Call rejected");
    }

    fn on_open(&self, stats: &Snapshot) {
        tracing::warn!(
            command = %self.command,
            requests = stats.requests,
            failures = stats.failures,
            failure_percent = stats.failure_percent(),
            "Circuit opened"
        );
    }

    fn on_half_open(&self) {
        tracing::info!(command = %self.command, "Circuit half open, probing backend");
    }

    fn on_closed(&self) {
        tracing::info!(command = %self.command, "Circuit closed");
    }
}
