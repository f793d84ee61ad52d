//! Futures aware circuit breaker.
//!
//! # Example
//!
//! ```
//! # async fn run() {
//! use gateway_cbreaker::futures::Callable;
//! use gateway_cbreaker::{CircuitBreaker, Error};
//!
//! async fn dangerous_call() -> Result<u32, &'static str> {
//!     Err("backend down")
//! }
//!
//! let circuit_breaker = CircuitBreaker::builder("dangerous")
//!     .request_volume_threshold(1)
//!     .build();
//!
//! match circuit_breaker.call(dangerous_call()).await {
//!     Err(Error::Inner(err)) => assert_eq!("backend down", err),
//!     other => unreachable!("{:?}", other),
//! }
//!
//! // The breaker is open now, `dangerous_call` is not polled.
//! match circuit_breaker.call(dangerous_call()).await {
//!     Err(Error::Rejected(_)) => {}
//!     other => unreachable!("{:?}", other),
//! }
//! # }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use pin_project_lite::pin_project;
use tokio::runtime::Handle;
use tokio::time::Sleep;

use super::circuit_breaker::{CircuitBreaker, Permit};
use super::classifier::{self, Classifier, Outcome};
use super::clock;
use super::error::Error;
use super::instrument::Instrument;

/// A futures aware circuit breaker's public interface.
pub trait Callable {
    /// The instrument of the breaker.
    type Instrument: Instrument;

    /// Executes a given future within circuit breaker.
    ///
    /// Depending on future result value, the call will be recorded as success or failure.
    #[inline]
    fn call<F, T, E>(&self, f: F) -> ResponseFuture<F, classifier::AnyError, Self::Instrument>
    where
        F: Future<Output = Result<T, E>>,
    {
        self.call_with(classifier::AnyError, f)
    }

    /// Executes a given future within circuit breaker.
    ///
    /// Admission is requested on the first poll; a rejected future is never polled. The
    /// future's result is recorded according to the `classifier`.
    ///
    /// Within a tokio runtime a future which does not complete within the breaker's
    /// timeout is dropped and recorded as failure. Other executors have no timer to wake
    /// the call, so a result arriving after the timeout is recorded as failure and
    /// replaced by `Error::Timeout`, as the blocking `Callable` does.
    fn call_with<F, C, T, E>(&self, classifier: C, f: F) -> ResponseFuture<F, C, Self::Instrument>
    where
        F: Future<Output = Result<T, E>>,
        C: Classifier<T, E>;
}

impl<INSTRUMENT> Callable for CircuitBreaker<INSTRUMENT>
where
    INSTRUMENT: Instrument,
{
    type Instrument = INSTRUMENT;

    fn call_with<F, C, T, E>(&self, classifier: C, f: F) -> ResponseFuture<F, C, INSTRUMENT>
    where
        F: Future<Output = Result<T, E>>,
        C: Classifier<T, E>,
    {
        ResponseFuture {
            future: f,
            deadline: None,
            breaker: self.clone(),
            classifier,
            permit: None,
            started: None,
            once: true,
        }
    }
}

pin_project! {
    /// A circuit breaker's future.
    #[allow(missing_debug_implementations)]
    #[must_use = "futures do nothing unless polled"]
    pub struct ResponseFuture<FUT, CLASSIFIER, INSTRUMENT>
    where
        INSTRUMENT: Instrument,
    {
        #[pin]
        future: FUT,
        #[pin]
        deadline: Option<Sleep>,
        breaker: CircuitBreaker<INSTRUMENT>,
        classifier: CLASSIFIER,
        permit: Option<Permit<INSTRUMENT>>,
        started: Option<Instant>,
        once: bool,
    }
}

impl<FUT, CLASSIFIER, INSTRUMENT, T, E> Future for ResponseFuture<FUT, CLASSIFIER, INSTRUMENT>
where
    FUT: Future<Output = Result<T, E>>,
    CLASSIFIER: Classifier<T, E>,
    INSTRUMENT: Instrument,
{
    type Output = Result<T, Error<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut this = self.project();

        if *this.once {
            *this.once = false;

            match this.breaker.acquire() {
                Ok(permit) => *this.permit = Some(permit),
                Err(rejection) => return Poll::Ready(Err(Error::Rejected(rejection))),
            }
            *this.started = Some(clock::now());
            if Handle::try_current().is_ok() {
                let timeout = this.breaker.settings().timeout;
                this.deadline.set(Some(tokio::time::sleep(timeout)));
            }
        }

        let permit = match this.permit.take() {
            Some(permit) => permit,
            None => panic!("ResponseFuture polled after completion"),
        };

        if let Poll::Ready(result) = this.future.poll(cx) {
            let timeout = this.breaker.settings().timeout;
            let late = this
                .started
                .map_or(false, |at| clock::now().saturating_duration_since(at) >= timeout);
            if late {
                permit.record(Outcome::Failure);
                return Poll::Ready(Err(Error::Timeout));
            }

            permit.record(this.classifier.classify(&result));
            return Poll::Ready(result.map_err(Error::Inner));
        }

        if let Some(deadline) = this.deadline.as_pin_mut() {
            if deadline.poll(cx).is_ready() {
                permit.record(Outcome::Failure);
                return Poll::Ready(Err(Error::Timeout));
            }
        }

        *this.permit = Some(permit);
        Poll::Pending
    }
}
