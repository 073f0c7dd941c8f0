//! breaker-gate - circuit breaker gate for sync and async operations
//!
//! This crate provides:
//! - A state machine for the circuit breaker lifecycle (Closed → Open → HalfOpen)
//! - A [`CallGate`] that runs operations under the breaker's protection and
//!   propagates their results unchanged
//! - Probe-limited half-open recovery and an injectable [`Clock`]
//! - A per-resource [`GateRegistry`] and an explicit [`IntervalScheduler`]
//!
//! # Example
//!
//! ```rust
//! use breaker_gate::{CallGate, CircuitBreaker};
//! use std::time::Duration;
//!
//! let breaker = CircuitBreaker::<String>::builder("payment_api")
//!     .failure_threshold(3)
//!     .success_threshold(3)
//!     .open_duration(Duration::from_secs(60))
//!     .on_open(|t| println!("Circuit {} opened!", t.circuit))
//!     .build()
//!     .expect("valid config");
//! let gate = CallGate::new(breaker);
//!
//! // Execute with circuit protection
//! let result = gate.call(|| Ok::<_, String>("charged"));
//! assert_eq!(result, Ok("charged"));
//!
//! // Failures reach the caller untouched; once the circuit opens, rejected
//! // calls fail with the error that opened it
//! for _ in 0..3 {
//!     let _ = gate.call(|| Err::<(), _>("gateway timeout".to_string()));
//! }
//! assert_eq!(
//!     gate.call(|| Ok::<_, String>("never runs")),
//!     Err("gateway timeout".to_string())
//! );
//! ```

pub mod builder;
pub mod callbacks;
pub mod circuit;
pub mod classifier;
pub mod clock;
pub mod errors;
pub mod gate;
pub mod registry;
pub mod scheduler;

pub use builder::CircuitBuilder;
pub use callbacks::{Callbacks, Transition};
pub use circuit::{Admission, CircuitBreaker, CircuitState, Config, Permit};
pub use classifier::{DefaultClassifier, FailureClassifier, FailureContext, PredicateClassifier};
pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{ConfigError, ScheduleError};
pub use gate::{CallGate, SharedBreaker};
pub use registry::GateRegistry;
pub use scheduler::IntervalScheduler;

/// How a permitted invocation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<'a, E> {
    Success,
    Failure(&'a E),
}

impl<'a, E> Outcome<'a, E> {
    /// Classify an operation result without consuming it
    pub fn of<T>(result: &'a Result<T, E>) -> Self {
        match result {
            Ok(_) => Outcome::Success,
            Err(e) => Outcome::Failure(e),
        }
    }
}
