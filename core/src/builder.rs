//! Builder API for ergonomic circuit breaker configuration

use crate::{
    callbacks::{Callbacks, Transition},
    circuit::{CircuitBreaker, CircuitContext, Config, FailureTally},
    classifier::FailureClassifier,
    clock::{Clock, SystemClock},
    errors::ConfigError,
};
use std::sync::Arc;
use std::time::Duration;

/// Builder for creating circuit breakers with fluent API
pub struct CircuitBuilder<E> {
    name: String,
    config: Config,
    clock: Option<Arc<dyn Clock>>,
    failure_classifier: Option<Arc<dyn FailureClassifier<E>>>,
    callbacks: Callbacks,
}

impl<E> CircuitBuilder<E> {
    /// Create a new builder for a circuit with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Config::default(),
            clock: None,
            failure_classifier: None,
            callbacks: Callbacks::new(),
        }
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    /// Consecutive failures that open the circuit
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config.failure_threshold = threshold;
        self
    }

    /// Consecutive half-open successes that close the circuit
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.config.success_threshold = threshold;
        self
    }

    /// How long the circuit stays open before admitting a probe
    pub fn open_duration(mut self, duration: Duration) -> Self {
        self.config.open_duration = duration;
        self
    }

    /// Same as [`open_duration`](Self::open_duration), in seconds
    ///
    /// Negative or NaN values mean no wait; values beyond what a
    /// `Duration` holds saturate to `Duration::MAX`.
    pub fn open_duration_secs(mut self, seconds: f64) -> Self {
        self.config.open_duration =
            Duration::try_from_secs_f64(seconds.max(0.0)).unwrap_or(Duration::MAX);
        self
    }

    /// Probes allowed in flight at once while half-open
    pub fn half_open_max_probes(mut self, probes: u32) -> Self {
        self.config.half_open_max_probes = probes;
        self
    }

    /// Set the jitter factor (0.0 = no jitter, 1.0 = full jitter)
    /// Uses chrono-machines formula: duration * (1 - jitter + rand * jitter)
    pub fn jitter_factor(mut self, factor: f64) -> Self {
        self.config.jitter_factor = factor;
        self
    }

    /// Time source; defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Set a failure classifier to filter which errors should trip the circuit
    ///
    /// Use this to ignore "expected" errors such as validation failures or
    /// client errors (4xx) while still tripping on server errors (5xx).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use breaker_gate::{CircuitBreaker, FailureContext, PredicateClassifier};
    /// use std::sync::Arc;
    /// use std::time::Duration;
    ///
    /// let circuit = CircuitBreaker::<String>::builder("api")
    ///     .failure_classifier(Arc::new(PredicateClassifier::new(
    ///         |ctx: &FailureContext<'_, String>| ctx.duration > Duration::from_secs(1),
    ///     )))
    ///     .build()
    ///     .unwrap();
    /// assert!(circuit.is_closed());
    /// ```
    pub fn failure_classifier(mut self, classifier: Arc<dyn FailureClassifier<E>>) -> Self {
        self.failure_classifier = Some(classifier);
        self
    }

    /// Set callback for when circuit opens
    ///
    /// Behind a [`CallGate`](crate::CallGate), hooks run once the breaker
    /// lock is released, so a hook may read the same gate's breaker.
    pub fn on_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transition<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_open = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit closes
    pub fn on_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transition<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_close = Some(Arc::new(f));
        self
    }

    /// Set callback for when circuit enters half-open
    pub fn on_half_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&Transition<'_>) + Send + Sync + 'static,
    {
        self.callbacks.on_half_open = Some(Arc::new(f));
        self
    }

    /// Validate the configuration and build the circuit breaker
    pub fn build(self) -> Result<CircuitBreaker<E>, ConfigError> {
        self.config.validate(&self.name)?;

        let context = CircuitContext {
            name: self.name,
            config: self.config,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            failures: Arc::new(FailureTally::default()),
        };

        Ok(CircuitBreaker::with_parts(
            context,
            self.callbacks,
            self.failure_classifier,
        ))
    }
}
