//! Circuit breaker state machine
//!
//! Pure decision logic: the breaker never runs the protected operation. A
//! caller asks [`CircuitBreaker::admit`] before each invocation and hands
//! the outcome back through [`CircuitBreaker::record`].

use crate::{
    Outcome,
    callbacks::{Callbacks, Notices},
    classifier::{FailureClassifier, FailureContext},
    clock::{Clock, SystemClock},
    errors::ConfigError,
};
use state_machines::state_machine;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Consecutive failures that open a closed circuit
    pub failure_threshold: u32,

    /// Consecutive half-open successes that close the circuit
    pub success_threshold: u32,

    /// Wait between opening and admitting the first probe
    pub open_duration: Duration,

    /// Probes allowed in flight at once while half-open
    pub half_open_max_probes: u32,

    /// Jitter factor for open_duration (0.0 = none, 1.0 = full)
    /// Uses chrono-machines formula: duration * (1 - jitter + rand * jitter)
    pub jitter_factor: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_duration: Duration::from_secs(30),
            half_open_max_probes: 1,
            jitter_factor: 0.0,
        }
    }
}

impl Config {
    /// Reject settings the state machine cannot honour
    pub fn validate(&self, circuit: &str) -> Result<(), ConfigError> {
        let circuit = circuit.to_string();
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold { circuit });
        }
        if self.success_threshold == 0 {
            return Err(ConfigError::ZeroSuccessThreshold { circuit });
        }
        if self.half_open_max_probes == 0 {
            return Err(ConfigError::ZeroProbeLimit { circuit });
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(ConfigError::JitterOutOfRange {
                circuit,
                factor: self.jitter_factor,
            });
        }
        Ok(())
    }

    /// Wait before the next probe, with jitter applied when configured
    fn open_wait(&self) -> Duration {
        if self.jitter_factor <= 0.0 {
            return self.open_duration;
        }
        let base_ms = u64::try_from(self.open_duration.as_millis()).unwrap_or(u64::MAX);
        let policy = chrono_machines::Policy {
            max_attempts: 1,
            base_delay_ms: base_ms,
            multiplier: 1.0,
            max_delay_ms: base_ms,
        };
        Duration::from_millis(policy.calculate_delay(1, self.jitter_factor))
    }
}

/// Externally visible circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CircuitState {
    /// Calls run normally
    Closed,
    /// Calls are rejected until the retry time
    Open,
    /// Probes are admitted to test recovery
    HalfOpen,
}

impl CircuitState {
    fn from_machine(name: &str) -> Self {
        match name {
            "Open" => CircuitState::Open,
            "HalfOpen" => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Admission ticket for a single invocation
///
/// Move-only: it is consumed by [`CircuitBreaker::record`] once the
/// operation settles, or by [`CircuitBreaker::release`] if the call is
/// abandoned without an outcome.
#[derive(Debug)]
#[must_use = "a permit must be recorded or released"]
pub struct Permit {
    admitted_at: Instant,
    probe_epoch: Option<u64>,
}

impl Permit {
    /// Whether this call was admitted as a half-open probe
    pub fn is_probe(&self) -> bool {
        self.probe_epoch.is_some()
    }

    pub fn admitted_at(&self) -> Instant {
        self.admitted_at
    }
}

/// Result of asking the breaker for admission
#[derive(Debug)]
pub enum Admission<E> {
    Permit(Permit),
    /// Refused; carries the error that last opened the circuit
    Reject(E),
}

/// Consecutive failure counter shared with the state machine guards
#[derive(Debug, Default)]
pub struct FailureTally {
    consecutive: AtomicU32,
}

impl FailureTally {
    fn increment(&self) -> u32 {
        self.consecutive.fetch_add(1, Ordering::AcqRel).saturating_add(1)
    }

    fn reset(&self) {
        self.consecutive.store(0, Ordering::Release);
    }

    pub fn get(&self) -> u32 {
        self.consecutive.load(Ordering::Acquire)
    }
}

/// Circuit breaker context - shared data across all states
#[derive(Clone)]
pub struct CircuitContext {
    pub name: String,
    pub config: Config,
    pub clock: Arc<dyn Clock>,
    pub failures: Arc<FailureTally>,
}

impl Default for CircuitContext {
    fn default() -> Self {
        Self {
            name: String::new(),
            config: Config::default(),
            clock: Arc::new(SystemClock),
            failures: Arc::new(FailureTally::default()),
        }
    }
}

impl fmt::Debug for CircuitContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitContext")
            .field("name", &self.name)
            .field("config", &self.config)
            .field("clock", &self.clock)
            .field("failures", &self.failures.get())
            .finish()
    }
}

/// Data specific to the Open state
#[derive(Debug, Clone, Default)]
pub struct OpenData {
    pub opened_at: Option<Instant>,
    pub retry_at: Option<Instant>,
}

/// Data specific to the HalfOpen state
#[derive(Debug, Clone, Default)]
pub struct HalfOpenData {
    pub consecutive_successes: u32,
    pub probes_in_flight: u32,
}

state_machine! {
    name: Circuit,
    context: CircuitContext,
    dynamic: true,

    initial: Closed,
    states: [
        Closed,
        Open(OpenData),
        HalfOpen(HalfOpenData),
    ],
    events {
        trip {
            guards: [should_open],
            transition: { from: [Closed, HalfOpen], to: Open }
        }
        attempt_reset {
            guards: [retry_due],
            transition: { from: Open, to: HalfOpen }
        }
        close {
            guards: [should_close],
            transition: { from: HalfOpen, to: Closed }
        }
    }
}

impl Circuit<Closed> {
    /// Enough consecutive failures to open
    fn should_open(&self, ctx: &CircuitContext) -> bool {
        ctx.failures.get() >= ctx.config.failure_threshold
    }
}

impl Circuit<HalfOpen> {
    /// A single counted failure reopens a half-open circuit
    fn should_open(&self, _ctx: &CircuitContext) -> bool {
        true
    }

    fn should_close(&self, ctx: &CircuitContext) -> bool {
        let data = self
            .state_data_half_open()
            .expect("HalfOpen state must have data");
        data.consecutive_successes >= ctx.config.success_threshold
    }
}

impl Circuit<Open> {
    /// Lazy check against the clock; no timer drives this transition
    ///
    /// No retry time means the wait does not fit on the clock: never due.
    fn retry_due(&self, ctx: &CircuitContext) -> bool {
        let data = self.state_data_open().expect("Open state must have data");
        data.retry_at.is_some_and(|at| ctx.clock.now() >= at)
    }
}

/// Circuit breaker for one protected resource
///
/// Not synchronised by itself; share it behind a mutex (see
/// [`CallGate`](crate::CallGate)) when calls run concurrently. Transition
/// hooks run before `admit`, `record` and `reset` return; the gate runs
/// them after releasing its lock instead.
pub struct CircuitBreaker<E> {
    machine: DynamicCircuit,
    context: CircuitContext,
    callbacks: Callbacks,
    classifier: Option<Arc<dyn FailureClassifier<E>>>,
    last_error: Option<E>,
    probe_epoch: u64,
    pending: Vec<(CircuitState, CircuitState)>,
}

impl<E> CircuitBreaker<E> {
    /// Create a circuit breaker on the system clock (use builder() for more options)
    pub fn new(name: impl Into<String>, config: Config) -> Result<Self, ConfigError> {
        let name = name.into();
        config.validate(&name)?;
        let context = CircuitContext {
            name,
            config,
            ..Default::default()
        };
        Ok(Self::with_parts(context, Callbacks::new(), None))
    }

    /// Assemble a breaker from an already validated context
    pub(crate) fn with_parts(
        context: CircuitContext,
        callbacks: Callbacks,
        classifier: Option<Arc<dyn FailureClassifier<E>>>,
    ) -> Self {
        let machine = DynamicCircuit::new(context.clone());
        Self {
            machine,
            context,
            callbacks,
            classifier,
            last_error: None,
            probe_epoch: 0,
            pending: Vec::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> crate::builder::CircuitBuilder<E> {
        crate::builder::CircuitBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn state(&self) -> CircuitState {
        CircuitState::from_machine(self.machine.current_state())
    }

    /// Current state name as the state machine reports it
    pub fn state_name(&self) -> &'static str {
        self.machine.current_state()
    }

    pub fn is_open(&self) -> bool {
        self.state() == CircuitState::Open
    }

    pub fn is_closed(&self) -> bool {
        self.state() == CircuitState::Closed
    }

    pub fn is_half_open(&self) -> bool {
        self.state() == CircuitState::HalfOpen
    }

    /// Consecutive counted failures since the last success
    pub fn failure_count(&self) -> u32 {
        self.context.failures.get()
    }

    /// Consecutive successes in the current half-open period
    pub fn success_count(&self) -> u32 {
        self.machine
            .half_open_data()
            .map(|d| d.consecutive_successes)
            .unwrap_or(0)
    }

    /// The error that most recently opened the circuit
    pub fn last_error(&self) -> Option<&E> {
        self.last_error.as_ref()
    }

    /// When an open circuit will admit its next probe
    ///
    /// `None` while not open, or when `open_duration` is too long to
    /// represent; such a circuit stays open until [`reset`](Self::reset).
    pub fn next_attempt_at(&self) -> Option<Instant> {
        self.machine.open_data().and_then(|d| d.retry_at)
    }

    /// Decide whether an invocation may proceed
    ///
    /// Performs the Open -> HalfOpen transition when the wait has elapsed.
    /// While half-open, at most `half_open_max_probes` permits are out at
    /// once; anyone beyond that is rejected like an open circuit.
    pub fn admit(&mut self) -> Admission<E>
    where
        E: Clone,
    {
        let (admission, notices) = self.admit_deferred();
        notices.fire();
        admission
    }

    /// [`admit`](Self::admit), handing the transition hooks back unfired
    pub(crate) fn admit_deferred(&mut self) -> (Admission<E>, Notices)
    where
        E: Clone,
    {
        let admission = self.try_admit();
        (admission, self.take_notices())
    }

    fn try_admit(&mut self) -> Admission<E>
    where
        E: Clone,
    {
        if self.state() == CircuitState::Open {
            if self.machine.handle(CircuitEvent::AttemptReset).is_err() {
                return self.reject();
            }
            self.probe_epoch += 1;
            self.notify(CircuitState::Open, CircuitState::HalfOpen);
        }

        let admitted_at = self.context.clock.now();
        if self.state() != CircuitState::HalfOpen {
            return Admission::Permit(Permit {
                admitted_at,
                probe_epoch: None,
            });
        }

        let limit = self.context.config.half_open_max_probes;
        let slot_taken = match self.machine.half_open_data_mut() {
            Some(data) if data.probes_in_flight < limit => {
                data.probes_in_flight += 1;
                true
            }
            _ => false,
        };
        if !slot_taken {
            return self.reject();
        }
        Admission::Permit(Permit {
            admitted_at,
            probe_epoch: Some(self.probe_epoch),
        })
    }

    /// Apply the outcome of a permitted invocation
    pub fn record(&mut self, permit: Permit, outcome: Outcome<'_, E>)
    where
        E: Clone,
    {
        self.record_deferred(permit, outcome).fire();
    }

    /// [`record`](Self::record), handing the transition hooks back unfired
    pub(crate) fn record_deferred(&mut self, permit: Permit, outcome: Outcome<'_, E>) -> Notices
    where
        E: Clone,
    {
        self.apply(permit, outcome);
        self.take_notices()
    }

    fn apply(&mut self, permit: Permit, outcome: Outcome<'_, E>)
    where
        E: Clone,
    {
        let duration = self
            .context
            .clock
            .now()
            .saturating_duration_since(permit.admitted_at);
        self.release(permit);

        match outcome {
            Outcome::Success => self.on_success(),
            Outcome::Failure(error) => {
                let ctx = FailureContext {
                    circuit_name: &self.context.name,
                    error,
                    duration,
                };
                let counts = self
                    .classifier
                    .as_ref()
                    .is_none_or(|classifier| classifier.should_trip(&ctx));
                if counts {
                    self.on_failure(error);
                } else {
                    tracing::debug!(
                        circuit = %self.context.name,
                        "failure declined by classifier"
                    );
                }
            }
        }
    }

    /// Give back a permit whose call ended without an outcome
    ///
    /// Frees the probe slot if the permit was a probe of the current
    /// half-open period; counters are untouched.
    pub fn release(&mut self, permit: Permit) {
        let Some(epoch) = permit.probe_epoch else {
            return;
        };
        if epoch != self.probe_epoch {
            return;
        }
        if let Some(data) = self.machine.half_open_data_mut() {
            data.probes_in_flight = data.probes_in_flight.saturating_sub(1);
        }
    }

    /// Clear counters and the retained error, returning to Closed
    pub fn reset(&mut self) {
        self.reset_deferred().fire();
    }

    /// [`reset`](Self::reset), handing the transition hook back unfired
    pub(crate) fn reset_deferred(&mut self) -> Notices {
        let from = self.state();
        self.context.failures.reset();
        self.last_error = None;
        self.machine = DynamicCircuit::new(self.context.clone());
        if from != CircuitState::Closed {
            self.notify(from, CircuitState::Closed);
        }
        self.take_notices()
    }

    fn on_success(&mut self) {
        match self.state() {
            CircuitState::Closed => self.context.failures.reset(),
            CircuitState::HalfOpen => {
                self.context.failures.reset();
                if let Some(data) = self.machine.half_open_data_mut() {
                    data.consecutive_successes += 1;
                }
                if self.machine.handle(CircuitEvent::Close).is_ok() {
                    self.notify(CircuitState::HalfOpen, CircuitState::Closed);
                }
            }
            CircuitState::Open => {
                tracing::trace!(circuit = %self.context.name, "ignoring success while open");
            }
        }
    }

    fn on_failure(&mut self, error: &E)
    where
        E: Clone,
    {
        let from = self.state();
        if from == CircuitState::Open {
            tracing::trace!(circuit = %self.context.name, "ignoring failure while open");
            return;
        }

        let failures = self.context.failures.increment();
        if self.machine.handle(CircuitEvent::Trip).is_ok() {
            self.last_error = Some(error.clone());
            self.mark_open();
            self.notify(from, CircuitState::Open);
        } else {
            tracing::debug!(
                circuit = %self.context.name,
                failures,
                threshold = self.context.config.failure_threshold,
                "failure recorded"
            );
        }
    }

    /// Stamp the Open data with the time and the next probe time
    fn mark_open(&mut self) {
        let now = self.context.clock.now();
        let wait = self.context.config.open_wait();
        if let Some(data) = self.machine.open_data_mut() {
            data.opened_at = Some(now);
            data.retry_at = now.checked_add(wait);
        }
    }

    fn reject(&self) -> Admission<E>
    where
        E: Clone,
    {
        tracing::debug!(
            circuit = %self.context.name,
            state = %self.state(),
            "call rejected"
        );
        let error = self
            .last_error
            .clone()
            .expect("a circuit only rejects after a failure opened it");
        Admission::Reject(error)
    }

    fn notify(&mut self, from: CircuitState, to: CircuitState) {
        self.pending.push((from, to));
    }

    fn take_notices(&mut self) -> Notices {
        if self.pending.is_empty() {
            return Notices::default();
        }
        Notices::new(
            self.context.name.clone(),
            self.callbacks.clone(),
            std::mem::take(&mut self.pending),
        )
    }
}

impl<E> fmt::Debug for CircuitBreaker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("name", &self.context.name)
            .field("state", &self.state())
            .field("failure_count", &self.failure_count())
            .field("success_count", &self.success_count())
            .field("next_attempt_at", &self.next_attempt_at())
            .field("callbacks", &self.callbacks)
            .finish_non_exhaustive()
    }
}
