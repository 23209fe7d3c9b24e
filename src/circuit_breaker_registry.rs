//! Registry of named circuit breakers.
//!
//! SDK clients isolate failure domains by keying a breaker per host or
//! endpoint group. The registry hands out shared instances with
//! get-or-create semantics and supports inspection and reset by id.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Registry keyed by breaker id.
#[derive(Default, Clone, Debug)]
pub struct CircuitBreakerRegistry {
    inner: Arc<Mutex<HashMap<String, CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the breaker for `id`, creating it from `config` when absent.
    pub fn get_or_create(&self, id: &str, config: &CircuitBreakerConfig) -> CircuitBreaker {
        let mut map = self.lock();
        map.entry(id.to_string())
            .or_insert_with(|| CircuitBreaker::new(config.clone()))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<CircuitBreaker> {
        self.lock().get(id).cloned()
    }

    /// Reset a registered breaker to Closed. Returns false for unknown ids.
    pub fn reset(&self, id: &str) -> bool {
        match self.get(id) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// Sorted snapshot of all breaker states.
    pub fn snapshot(&self) -> Vec<(String, CircuitState)> {
        let map = self.lock();
        let mut entries: Vec<(String, CircuitState)> =
            map.iter().map(|(k, v)| (k.clone(), v.state())).collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
