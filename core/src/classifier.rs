//! Failure classification
//!
//! Decides which operation errors count against the circuit. An error the
//! classifier declines still reaches the caller unchanged; it just leaves
//! the breaker's counters alone.

use std::time::Duration;

/// What a classifier gets to look at
#[derive(Debug)]
pub struct FailureContext<'a, E> {
    /// Circuit name
    pub circuit_name: &'a str,
    /// The error returned by the protected operation
    pub error: &'a E,
    /// Time between admission and the failure, per the breaker's clock
    pub duration: Duration,
}

/// Determines whether an error should count as a failure
///
/// # Examples
///
/// ```rust
/// use breaker_gate::{FailureClassifier, FailureContext};
///
/// #[derive(Debug)]
/// enum ApiError {
///     NotFound,
///     Unavailable,
/// }
///
/// #[derive(Debug)]
/// struct ServerErrorsOnly;
///
/// impl FailureClassifier<ApiError> for ServerErrorsOnly {
///     fn should_trip(&self, ctx: &FailureContext<'_, ApiError>) -> bool {
///         matches!(ctx.error, ApiError::Unavailable)
///     }
/// }
/// ```
pub trait FailureClassifier<E>: Send + Sync + std::fmt::Debug {
    /// `true` if the error counts toward opening the circuit
    fn should_trip(&self, ctx: &FailureContext<'_, E>) -> bool;
}

/// Counts every error
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultClassifier;

impl<E> FailureClassifier<E> for DefaultClassifier {
    fn should_trip(&self, _ctx: &FailureContext<'_, E>) -> bool {
        true
    }
}

/// Closure-backed classifier
pub struct PredicateClassifier<F> {
    predicate: F,
}

impl<F> PredicateClassifier<F> {
    pub fn new(predicate: F) -> Self {
        Self { predicate }
    }
}

impl<E, F> FailureClassifier<E> for PredicateClassifier<F>
where
    F: Fn(&FailureContext<'_, E>) -> bool + Send + Sync,
{
    fn should_trip(&self, ctx: &FailureContext<'_, E>) -> bool {
        (self.predicate)(ctx)
    }
}

impl<F> std::fmt::Debug for PredicateClassifier<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PredicateClassifier")
            .field("predicate", &"<closure>")
            .finish()
    }
}
