//! Registry of gates, one per protected resource

use crate::{
    callbacks::Callbacks,
    circuit::{CircuitBreaker, CircuitContext, CircuitState, Config, FailureTally},
    clock::{Clock, SystemClock},
    errors::ConfigError,
    gate::CallGate,
};
use dashmap::DashMap;
use std::sync::Arc;

/// Collection of call gates keyed by resource name
///
/// Every call site that asks for the same name gets a gate over the same
/// breaker, so the registry owns breaker lifetimes instead of a global.
pub struct GateRegistry<E> {
    gates: DashMap<String, CallGate<E>>,
    default_config: Config,
    clock: Option<Arc<dyn Clock>>,
}

impl<E: Clone> GateRegistry<E> {
    /// Create a registry with default config
    pub fn new() -> Self {
        Self {
            gates: DashMap::new(),
            default_config: Config::default(),
            clock: None,
        }
    }

    /// Create a registry with a custom default config, validated up front
    pub fn with_config(config: Config) -> Result<Self, ConfigError> {
        config.validate("<registry default>")?;
        Ok(Self {
            gates: DashMap::new(),
            default_config: config,
            clock: None,
        })
    }

    /// Clock handed to every breaker this registry creates
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Get or create the gate for a resource
    pub fn gate(&self, name: &str) -> CallGate<E> {
        if let Some(gate) = self.gates.get(name) {
            return gate.clone();
        }
        self.gates
            .entry(name.to_string())
            .or_insert_with(|| CallGate::new(self.breaker_for(name, self.default_config.clone())))
            .clone()
    }

    /// Get or create with a custom config
    ///
    /// The config only applies when the gate is created; an existing gate
    /// is returned unchanged.
    pub fn gate_with_config(&self, name: &str, config: Config) -> Result<CallGate<E>, ConfigError> {
        if let Some(gate) = self.gates.get(name) {
            return Ok(gate.clone());
        }
        config.validate(name)?;
        Ok(self
            .gates
            .entry(name.to_string())
            .or_insert_with(|| CallGate::new(self.breaker_for(name, config)))
            .clone())
    }

    /// Get all resource names
    pub fn names(&self) -> Vec<String> {
        self.gates.iter().map(|e| e.key().clone()).collect()
    }

    /// Current state of every breaker
    pub fn states(&self) -> Vec<(String, CircuitState)> {
        self.gates
            .iter()
            .map(|e| (e.key().clone(), e.value().breaker().lock().state()))
            .collect()
    }

    /// Reset all circuit breakers
    ///
    /// Close hooks run after the map is unlocked and may use the registry.
    pub fn reset_all(&self) {
        let gates: Vec<CallGate<E>> = self.gates.iter().map(|e| e.value().clone()).collect();
        for gate in gates {
            gate.reset();
        }
    }

    /// Forget a resource; gates already handed out keep working
    pub fn remove(&self, name: &str) -> Option<CallGate<E>> {
        self.gates.remove(name).map(|(_, gate)| gate)
    }

    /// Configs reaching here were validated by the caller
    fn breaker_for(&self, name: &str, config: Config) -> CircuitBreaker<E> {
        let context = CircuitContext {
            name: name.to_string(),
            config,
            clock: self
                .clock
                .clone()
                .unwrap_or_else(|| Arc::new(SystemClock)),
            failures: Arc::new(FailureTally::default()),
        };
        CircuitBreaker::with_parts(context, Callbacks::new(), None)
    }
}

impl<E: Clone> Default for GateRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}
