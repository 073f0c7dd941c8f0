//! Hooks fired on circuit state changes

use crate::circuit::CircuitState;
use std::sync::Arc;

/// A state change that just happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<'a> {
    pub circuit: &'a str,
    pub from: CircuitState,
    pub to: CircuitState,
}

pub type TransitionHook = Arc<dyn Fn(&Transition<'_>) + Send + Sync>;

/// Hooks keyed by the state being entered
#[derive(Clone, Default)]
pub struct Callbacks {
    pub on_open: Option<TransitionHook>,
    pub on_close: Option<TransitionHook>,
    pub on_half_open: Option<TransitionHook>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Log the transition and run the hook registered for its target state
    pub fn fire(&self, transition: &Transition<'_>) {
        match transition.to {
            CircuitState::Open => tracing::warn!(
                circuit = %transition.circuit,
                from = %transition.from,
                "circuit opened"
            ),
            CircuitState::HalfOpen => tracing::info!(
                circuit = %transition.circuit,
                "circuit half-open, admitting probe"
            ),
            CircuitState::Closed => tracing::info!(
                circuit = %transition.circuit,
                from = %transition.from,
                "circuit closed"
            ),
        }

        let hook = match transition.to {
            CircuitState::Open => &self.on_open,
            CircuitState::HalfOpen => &self.on_half_open,
            CircuitState::Closed => &self.on_close,
        };
        if let Some(hook) = hook {
            hook(transition);
        }
    }
}

/// Transitions whose hooks have not run yet
///
/// A breaker borrowed mutably only queues its state changes; whoever holds
/// the lock around it fires them once the lock is gone, so hooks are free
/// to inspect the same breaker.
#[derive(Debug, Default)]
#[must_use = "queued hooks only run when fired"]
pub(crate) struct Notices {
    circuit: String,
    callbacks: Callbacks,
    transitions: Vec<(CircuitState, CircuitState)>,
}

impl Notices {
    pub(crate) fn new(
        circuit: String,
        callbacks: Callbacks,
        transitions: Vec<(CircuitState, CircuitState)>,
    ) -> Self {
        Self {
            circuit,
            callbacks,
            transitions,
        }
    }

    /// Run the hooks in the order the transitions happened
    pub(crate) fn fire(self) {
        for (from, to) in self.transitions {
            self.callbacks.fire(&Transition {
                circuit: &self.circuit,
                from,
                to,
            });
        }
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks")
            .field("on_open", &self.on_open.is_some())
            .field("on_close", &self.on_close.is_some())
            .field("on_half_open", &self.on_half_open.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fire_dispatches_by_target_state() {
        let opens = Arc::new(AtomicUsize::new(0));
        let closes = Arc::new(AtomicUsize::new(0));
        let opens_hook = opens.clone();
        let closes_hook = closes.clone();

        let callbacks = Callbacks {
            on_open: Some(Arc::new(move |_| {
                opens_hook.fetch_add(1, Ordering::SeqCst);
            })),
            on_close: Some(Arc::new(move |_| {
                closes_hook.fetch_add(1, Ordering::SeqCst);
            })),
            on_half_open: None,
        };

        callbacks.fire(&Transition {
            circuit: "fibonacci",
            from: CircuitState::Closed,
            to: CircuitState::Open,
        });
        callbacks.fire(&Transition {
            circuit: "fibonacci",
            from: CircuitState::Open,
            to: CircuitState::HalfOpen,
        });

        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(closes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_notices_fire_in_queue_order() {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let (open_seen, close_seen) = (seen.clone(), seen.clone());
        let callbacks = Callbacks {
            on_open: Some(Arc::new(move |t| open_seen.lock().push(t.to))),
            on_close: Some(Arc::new(move |t| close_seen.lock().push(t.to))),
            on_half_open: None,
        };

        let notices = Notices::new(
            "coffees".to_string(),
            callbacks,
            vec![
                (CircuitState::HalfOpen, CircuitState::Closed),
                (CircuitState::Closed, CircuitState::Open),
            ],
        );
        assert!(seen.lock().is_empty());

        notices.fire();
        assert_eq!(*seen.lock(), vec![CircuitState::Closed, CircuitState::Open]);
    }

    #[test]
    fn test_hook_sees_transition_details() {
        let seen = Arc::new(parking_lot::Mutex::new(None));
        let seen_hook = seen.clone();

        let callbacks = Callbacks {
            on_close: Some(Arc::new(move |t| {
                *seen_hook.lock() = Some((t.circuit.to_string(), t.from));
            })),
            ..Default::default()
        };

        callbacks.fire(&Transition {
            circuit: "coffees",
            from: CircuitState::HalfOpen,
            to: CircuitState::Closed,
        });

        assert_eq!(
            *seen.lock(),
            Some(("coffees".to_string(), CircuitState::HalfOpen))
        );
    }
}
