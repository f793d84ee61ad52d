/// The verdict of a completed call, as seen by the circuit breaker.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// The call counts as success.
    Success,
    /// The call counts as failure and increases the failure rate.
    Failure,
}

/// Evaluates whether a completed call should be recorded as a success or a failure.
pub trait Classifier<T, E> {
    /// Returns the verdict for the call's result.
    fn classify(&self, result: &Result<T, E>) -> Outcome;
}

impl<T, E, F> Classifier<T, E> for F
where
    F: Fn(&Result<T, E>) -> Outcome,
{
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        self(result)
    }
}

/// Classify every error as failure and every value as success.
#[derive(Clone, Copy, Debug, Default)]
pub struct AnyError;

impl<T, E> Classifier<T, E> for AnyError {
    #[inline]
    fn classify(&self, result: &Result<T, E>) -> Outcome {
        match result {
            Ok(_) => Outcome::Success,
            Err(_) => Outcome::Failure,
        }
    }
}
