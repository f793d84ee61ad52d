use std::sync::Arc;

use parking_lot::Mutex;

use super::builder::Builder;
use super::classifier::{self, Classifier, Outcome};
use super::clock;
use super::error::{Error, Rejection};
use super::instrument::{Instrument, Tracing};
use super::rolling_window::Snapshot;
use super::settings::Settings;
use super::state_machine::{Admission, State, StateMachine};

/// A named circuit breaker.
///
/// The breaker is a cheap handle: clones share the same state machine, statistics and
/// in-flight counter.
#[derive(Debug)]
pub struct CircuitBreaker<INSTRUMENT = Tracing> {
    inner: Arc<Inner<INSTRUMENT>>,
}

#[derive(Debug)]
pub(crate) struct Inner<INSTRUMENT> {
    name: String,
    settings: Settings,
    state_machine: Mutex<StateMachine<INSTRUMENT>>,
}

/// A circuit breaker's public interface.
pub trait Callable {
    /// Executes a given function within circuit breaker.
    ///
    /// Depending on function result value, the call will be recorded as success or failure.
    #[inline]
    fn call<F, E, R>(&self, f: F) -> Result<R, Error<E>>
    where
        F: FnOnce() -> Result<R, E>,
    {
        self.call_with(classifier::AnyError, f)
    }

    /// Executes a given function within circuit breaker.
    ///
    /// The result is recorded as success or failure according to the `classifier`. A
    /// function which returns after the breaker's timeout is recorded as failure and its
    /// result is replaced by `Error::Timeout`.
    fn call_with<C, F, E, R>(&self, classifier: C, f: F) -> Result<R, Error<E>>
    where
        F: FnOnce() -> Result<R, E>,
        C: Classifier<R, E>;
}

impl CircuitBreaker {
    /// Returns a circuit breaker's builder, logging state changes under `name`.
    pub fn builder(name: impl Into<String>) -> Builder<Tracing> {
        Builder::new(name.into())
    }
}

impl<INSTRUMENT> CircuitBreaker<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    pub(crate) fn new(name: String, settings: Settings, instrument: INSTRUMENT) -> Self {
        Self {
            inner: Arc::new(Inner {
                name,
                settings,
                state_machine: Mutex::new(StateMachine::new(settings, instrument)),
            }),
        }
    }

    /// Requests permission to call the backend.
    ///
    /// The returned permit must be completed with [`Permit::record`]; dropping it hands
    /// the admission back without recording an outcome.
    pub fn acquire(&self) -> Result<Permit<INSTRUMENT>, Rejection> {
        let admission = self.inner.state_machine.lock().try_acquire()?;
        Ok(Permit {
            inner: self.inner.clone(),
            admission: Some(admission),
        })
    }

    /// Returns the command name of this breaker.
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the settings this breaker was created with.
    #[inline]
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Returns the current state.
    pub fn state(&self) -> State {
        self.inner.state_machine.lock().state()
    }

    /// Returns the number of calls currently in flight.
    pub fn in_flight(&self) -> usize {
        self.inner.state_machine.lock().in_flight()
    }

    /// Returns the statistics of the rolling window.
    pub fn metrics(&self) -> Snapshot {
        self.inner.state_machine.lock().metrics()
    }

    /// Forces the breaker into the closed state, losing statistics.
    pub fn reset(&self) {
        self.inner.state_machine.lock().reset();
    }

    /// Returns `true` if both handles refer to the same breaker.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl<INSTRUMENT> Callable for CircuitBreaker<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    fn call_with<C, F, E, R>(&self, classifier: C, f: F) -> Result<R, Error<E>>
    where
        F: FnOnce() -> Result<R, E>,
        C: Classifier<R, E>,
    {
        let permit = self.acquire().map_err(Error::Rejected)?;

        let started = clock::now();
        let result = f();

        if clock::now().saturating_duration_since(started) >= self.inner.settings.timeout {
            permit.record(Outcome::Failure);
            return Err(Error::Timeout);
        }

        permit.record(classifier.classify(&result));
        result.map_err(Error::Inner)
    }
}

impl<INSTRUMENT> Clone for CircuitBreaker<INSTRUMENT> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// A call admitted by a circuit breaker.
///
/// The breaker counts the call as in flight until the permit is recorded or dropped,
/// whichever happens first.
#[derive(Debug)]
pub struct Permit<INSTRUMENT = Tracing>
where
    INSTRUMENT: Instrument,
{
    inner: Arc<Inner<INSTRUMENT>>,
    admission: Option<Admission>,
}

impl<INSTRUMENT> Permit<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    /// Returns `true` if this call is the half open breaker's probe.
    pub fn is_probe(&self) -> bool {
        self.admission.map_or(false, |it| it.is_probe())
    }

    /// Reports the call's outcome to the breaker.
    pub fn record(mut self, outcome: Outcome) {
        if let Some(admission) = self.admission.take() {
            self.inner
                .state_machine
                .lock()
                .on_outcome(admission, outcome);
        }
    }
}

impl<INSTRUMENT> Drop for Permit<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    fn drop(&mut self) {
        if let Some(admission) = self.admission.take() {
            self.inner.state_machine.lock().on_cancel(admission);
        }
    }
}
