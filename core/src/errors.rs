//! Error types for gate construction and task scheduling
//!
//! Errors raised by the protected operation are never wrapped: callers see
//! their own error type whether the call ran or was rejected.

use std::time::Duration;
use thiserror::Error;

/// Invalid breaker configuration, reported when the breaker is built
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("circuit '{circuit}': failure_threshold must be at least 1")]
    ZeroFailureThreshold { circuit: String },

    #[error("circuit '{circuit}': success_threshold must be at least 1")]
    ZeroSuccessThreshold { circuit: String },

    #[error("circuit '{circuit}': half_open_max_probes must be at least 1")]
    ZeroProbeLimit { circuit: String },

    #[error("circuit '{circuit}': jitter_factor must be within 0.0..=1.0 (got {factor})")]
    JitterOutOfRange { circuit: String, factor: f64 },
}

/// Errors raised while registering or starting periodic tasks
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("task '{task}' has a zero period")]
    ZeroPeriod { task: String },

    #[error("task '{task}' is already registered")]
    Duplicate { task: String },

    #[error("scheduler is already running")]
    AlreadyStarted,

    #[error("task '{task}' registered after start (period {period:?})")]
    RegisteredAfterStart { task: String, period: Duration },
}
