use std::error::Error as StdError;
use std::fmt::{self, Display};

/// The reason a call was not admitted by a circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rejection {
    /// The breaker is open, or half open with a probe already in flight.
    CircuitOpen,
    /// The breaker already runs the maximum number of concurrent calls.
    MaxConcurrency,
}

impl Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Rejection::CircuitOpen => write!(f, "circuit open"),
            Rejection::MaxConcurrency => write!(f, "max concurrency"),
        }
    }
}

impl StdError for Rejection {}

/// A `CircuitBreaker`'s error.
#[derive(Debug, PartialEq)]
pub enum Error<E> {
    /// An error from inner call.
    Inner(E),
    /// The call was not admitted, the inner call never ran.
    Rejected(Rejection),
    /// The inner call did not complete within the breaker's timeout.
    Timeout,
}

impl<E> Display for Error<E>
where
    E: Display,
{
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Rejected(rejection) => write!(f, "call was rejected: {}", rejection),
            Error::Timeout => write!(f, "call timed out"),
            Error::Inner(err) => write!(f, "{}", err),
        }
    }
}

impl<E> StdError for Error<E>
where
    E: StdError + 'static,
{
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Error::Inner(ref err) => Some(err),
            Error::Rejected(ref rejection) => Some(rejection),
            Error::Timeout => None,
        }
    }
}
