use std::fmt::{self, Display};
use std::time::Instant;

use super::classifier::Outcome;
use super::clock;
use super::error::Rejection;
use super::instrument::Instrument;
use super::rolling_window::{RollingWindow, Snapshot};
use super::settings::Settings;

/// States of the state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum State {
    /// A closed breaker is operating normally and allowing.
    Closed,
    /// An open breaker has tripped and will not allow requests through until the sleep
    /// window expired.
    Open,
    /// A half open breaker has completed its sleep window and allows a single probe.
    HalfOpen,
}

impl State {
    /// Returns a string value for the state identifier.
    #[inline]
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Open => "open",
            State::Closed => "closed",
            State::HalfOpen => "half_open",
        }
    }
}

impl Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> Result<(), fmt::Error> {
        write!(f, "{}", self.as_str())
    }
}

/// A granted permission to call the backend.
///
/// Every admission must be handed back exactly once, via `on_outcome` or `on_cancel`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Admission {
    /// The half open round this probe was admitted in.
    probe: Option<u64>,
}

impl Admission {
    /// Returns `true` if this call is the half open state's probe.
    pub fn is_probe(&self) -> bool {
        self.probe.is_some()
    }
}

/// A circuit breaker's state machine.
///
/// It is implemented via a finite state machine with three states: `Closed`, `Open` and `HalfOpen`.
/// The state machine does not know anything about the backend's state by itself, but uses the
/// outcomes reported via `on_outcome`. Before communicating with the backend, the permission to
/// do so must be obtained via `try_acquire`.
///
/// The state changes from `Closed` to `Open` once the rolling window holds at least
/// `request_volume_threshold` calls and their failure rate reaches `error_percent_threshold`.
/// Then all access to the backend is blocked for `sleep_window`.
///
/// After the sleep window has elapsed, the state changes from `Open` to `HalfOpen` and a single
/// probe is admitted. If the probe fails the state changes back to `Open`, otherwise it changes
/// to `Closed` with fresh statistics.
#[derive(Debug)]
pub struct StateMachine<INSTRUMENT> {
    settings: Settings,
    instrument: INSTRUMENT,
    state: State,
    last_transition: Instant,
    stats: RollingWindow,
    in_flight: usize,
    probe_in_flight: bool,
    half_open_rounds: u64,
}

impl<INSTRUMENT> StateMachine<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    /// Creates a new state machine with given settings and instrument.
    pub fn new(settings: Settings, instrument: INSTRUMENT) -> Self {
        StateMachine {
            stats: RollingWindow::new(settings.rolling_window, settings.rolling_buckets),
            settings,
            instrument,
            state: State::Closed,
            last_transition: clock::now(),
            in_flight: 0,
            probe_in_flight: false,
            half_open_rounds: 0,
        }
    }

    /// Requests permission to call this circuit breaker's backend.
    pub fn try_acquire(&mut self) -> Result<Admission, Rejection> {
        if self.state == State::Open {
            if clock::now().saturating_duration_since(self.last_transition)
                < self.settings.sleep_window
            {
                return Err(self.reject(Rejection::CircuitOpen));
            }
            self.transit_to_half_open();
        }

        match self.state {
            State::HalfOpen if self.probe_in_flight => Err(self.reject(Rejection::CircuitOpen)),
            State::HalfOpen => {
                self.probe_in_flight = true;
                self.in_flight += 1;
                Ok(Admission {
                    probe: Some(self.half_open_rounds),
                })
            }
            _ if self.in_flight >= self.settings.max_concurrent_requests => {
                Err(self.reject(Rejection::MaxConcurrency))
            }
            _ => {
                self.in_flight += 1;
                Ok(Admission { probe: None })
            }
        }
    }

    /// Records the outcome of an admitted call.
    ///
    /// Only the probe of the current half open round moves the breaker. A probe which
    /// outlived its round, e.g. across a `reset`, counts like any other call.
    pub fn on_outcome(&mut self, admission: Admission, outcome: Outcome) {
        let current_probe = self.is_current_probe(admission);
        self.release(admission);

        match outcome {
            Outcome::Success => self.stats.record_success(),
            Outcome::Failure => self.stats.record_failure(),
        }

        if current_probe {
            match outcome {
                Outcome::Success => self.reset(),
                Outcome::Failure => self.transit_to_open(),
            }
            return;
        }

        if self.state == State::Closed && self.is_tripped() {
            self.transit_to_open();
        }
    }

    /// Hands back an admitted call which was abandoned before it completed.
    pub fn on_cancel(&mut self, admission: Admission) {
        self.release(admission);
    }

    /// Returns the circuit breaker to its original closed state, losing statistics.
    pub fn reset(&mut self) {
        self.state = State::Closed;
        self.last_transition = clock::now();
        self.probe_in_flight = false;
        self.stats.reset();
        self.instrument.on_closed();
    }

    /// Returns the current state.
    ///
    /// An open breaker whose sleep window expired still reports `Open` until the next
    /// call attempt.
    #[inline]
    pub fn state(&self) -> State {
        self.state
    }

    /// Returns the number of admitted calls which have not completed yet.
    #[inline]
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Returns the statistics of the rolling window.
    pub fn metrics(&mut self) -> Snapshot {
        self.stats.snapshot()
    }

    /// Returns the settings this state machine was built with.
    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    fn is_tripped(&mut self) -> bool {
        let stats = self.stats.snapshot();
        stats.requests >= self.settings.request_volume_threshold
            && stats.failure_percent() >= u64::from(self.settings.error_percent_threshold)
    }

    fn is_current_probe(&self, admission: Admission) -> bool {
        self.state == State::HalfOpen && admission.probe == Some(self.half_open_rounds)
    }

    fn release(&mut self, admission: Admission) {
        self.in_flight = self.in_flight.saturating_sub(1);
        if self.is_current_probe(admission) {
            self.probe_in_flight = false;
        }
    }

    fn reject(&self, rejection: Rejection) -> Rejection {
        self.instrument.on_call_rejected(rejection);
        rejection
    }

    #[inline]
    fn transit_to_half_open(&mut self) {
        self.state = State::HalfOpen;
        self.last_transition = clock::now();
        self.half_open_rounds += 1;
        self.probe_in_flight = false;
        self.instrument.on_half_open();
    }

    #[inline]
    fn transit_to_open(&mut self) {
        self.state = State::Open;
        self.last_transition = clock::now();
        let stats = self.stats.snapshot();
        self.instrument.on_open(&stats);
    }
}
