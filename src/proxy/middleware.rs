use std::sync::Arc;
use std::time::Duration;

use futures_core::future::BoxFuture;

use super::{Backend, BackendFactory, BoxError, CompositionError, Proxy, Request, Response};
use crate::circuit_breaker::CircuitBreaker;
use crate::classifier::{Classifier, Outcome};
use crate::config::{self, Config, Propagation};
use crate::error::{Error, Rejection};
use crate::futures::Callable;
use crate::registry::Registry;
use crate::settings::Settings;

/// An error produced by the circuit breaker middleware rather than by the backend.
///
/// Backend errors are returned untouched, so callers tell both apart with
/// `err.downcast_ref::<BreakerError>()`.
#[derive(Debug, thiserror::Error)]
pub enum BreakerError {
    /// The call was rejected, the backend was not contacted.
    #[error("circuit breaker rejected the call: {0}")]
    Rejected(Rejection),
    /// The backend did not answer in time.
    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),
    /// The backend answered with a failure status; the response is kept.
    #[error("backend responded with failure status {}", .0.metadata.status_code)]
    FailureStatus(Box<Response>),
}

impl BreakerError {
    /// Returns the backend's response carried by a `FailureStatus` error.
    pub fn response(&self) -> Option<&Response> {
        match self {
            BreakerError::FailureStatus(response) => Some(response),
            _ => None,
        }
    }
}

/// Classifies backend errors, and responses with one of the given statuses, as failures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FailureStatus {
    codes: Arc<[u16]>,
}

impl FailureStatus {
    /// Creates a classifier treating `codes` as failures.
    pub fn new(codes: impl Into<Arc<[u16]>>) -> Self {
        FailureStatus {
            codes: codes.into(),
        }
    }

    /// Returns `true` if the response's status is a failure status.
    pub fn is_failure(&self, response: &Response) -> bool {
        self.codes.contains(&response.metadata.status_code)
    }
}

impl Default for FailureStatus {
    /// No failure status, only backend errors are failures.
    fn default() -> Self {
        FailureStatus::new(Vec::new())
    }
}

impl Classifier<Response, BoxError> for FailureStatus {
    fn classify(&self, result: &Result<Response, BoxError>) -> Outcome {
        match result {
            Ok(response) if self.is_failure(response) => Outcome::Failure,
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        }
    }
}

/// The circuit breaker middleware of one backend.
#[derive(Debug)]
pub struct Middleware {
    enabled: Option<Guard>,
}

#[derive(Clone, Debug)]
struct Guard {
    breaker: CircuitBreaker,
    propagation: Propagation,
    classifier: FailureStatus,
}

impl Middleware {
    /// Builds the middleware from the backend's extra configuration.
    pub fn new(registry: &Registry, backend: &Backend) -> Self {
        Self::from_config(registry, &config::from_extra_config(&backend.extra_config))
    }

    /// Builds the middleware from an extracted configuration.
    ///
    /// A disabled configuration builds a passthrough which never touches the registry.
    pub fn from_config(registry: &Registry, config: &Config) -> Self {
        if config.is_disabled() {
            return Middleware { enabled: None };
        }

        let classifier = match config.propagation {
            Propagation::Strict => FailureStatus::default(),
            Propagation::PermissiveOnStatus { .. } => {
                FailureStatus::new(config.failure_status_codes.clone())
            }
        };

        Middleware {
            enabled: Some(Guard {
                breaker: registry.get_or_create(&config.command_name, Settings::from(config)),
                propagation: config.propagation,
                classifier,
            }),
        }
    }

    /// Returns the breaker guarding the backend, `None` for a passthrough.
    pub fn breaker(&self) -> Option<&CircuitBreaker> {
        self.enabled.as_ref().map(|guard| &guard.breaker)
    }

    /// Wraps the single upstream proxy.
    ///
    /// Any other number of proxies is an error in the way the chain is assembled.
    pub fn wrap(&self, next: Vec<Proxy>) -> Result<Proxy, CompositionError> {
        let count = next.len();
        let mut next = next.into_iter();
        match (next.next(), count) {
            (Some(proxy), 1) => Ok(self.decorate(proxy)),
            (None, _) => Err(CompositionError::NoProxy),
            (Some(_), count) => Err(CompositionError::TooManyProxies(count)),
        }
    }

    /// Decorates a proxy with the circuit breaker, or returns it as is for a passthrough.
    pub fn decorate(&self, next: Proxy) -> Proxy {
        let guard = match &self.enabled {
            Some(guard) => guard.clone(),
            None => return next,
        };

        Arc::new(move |request| -> BoxFuture<'static, Result<Response, BoxError>> {
            let guard = guard.clone();
            let next = next.clone();
            Box::pin(async move { guard.call(next, request).await })
        })
    }
}

impl Guard {
    async fn call(&self, next: Proxy, request: Request) -> Result<Response, BoxError> {
        // `next` is only invoked once the breaker admitted the call.
        let backend = async move { next(request).await };

        match self.breaker.call_with(self.classifier.clone(), backend).await {
            Ok(response) => self.propagate(response),
            Err(Error::Inner(err)) => self.suppress(err),
            Err(Error::Rejected(rejection)) => Err(BreakerError::Rejected(rejection).into()),
            Err(Error::Timeout) => {
                Err(BreakerError::Timeout(self.breaker.settings().timeout).into())
            }
        }
    }

    fn propagate(&self, response: Response) -> Result<Response, BoxError> {
        match self.propagation {
            Propagation::PermissiveOnStatus {
                surface_error: true,
                ..
            } if self.classifier.is_failure(&response) => {
                Err(BreakerError::FailureStatus(Box::new(response)).into())
            }
            _ => Ok(response),
        }
    }

    fn suppress(&self, err: BoxError) -> Result<Response, BoxError> {
        match self.propagation {
            Propagation::PermissiveOnStatus {
                suppress_backend_errors: true,
                ..
            } => {
                tracing::debug!(
                    command = %self.breaker.name(),
                    error = %err,
                    "Backend error recorded and suppressed"
                );
                Ok(Response::default())
            }
            _ => Err(err),
        }
    }
}

/// Decorates a backend factory, so every proxy it builds is circuit protected.
pub fn backend_factory(registry: Arc<Registry>, next: BackendFactory) -> BackendFactory {
    Arc::new(move |backend: &Backend| Middleware::new(&registry, backend).decorate(next(backend)))
}
