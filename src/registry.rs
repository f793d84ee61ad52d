use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::RwLock;

use super::circuit_breaker::CircuitBreaker;
use super::instrument::Tracing;
use super::settings::Settings;

/// Named circuit breakers, shared by every call site using the same command name.
///
/// A breaker is created on first reference and lives as long as the registry. The first
/// registration fixes its settings: later registrations with the same name get the live
/// breaker back, statistics included, and their settings are ignored.
#[derive(Debug, Default)]
pub struct Registry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl Registry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide registry, created on first use.
    pub fn global() -> Arc<Registry> {
        static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();
        GLOBAL.get_or_init(|| Arc::new(Registry::new())).clone()
    }

    /// Returns the breaker registered under `name`, creating it with `settings` if absent.
    pub fn get_or_create(&self, name: &str, settings: Settings) -> CircuitBreaker {
        if let Some(breaker) = self.get(name) {
            warn_on_divergence(&breaker, &settings);
            return breaker;
        }

        let mut breakers = self.breakers.write();
        // Another caller may have won the race between both locks.
        if let Some(breaker) = breakers.get(name) {
            warn_on_divergence(breaker, &settings);
            return breaker.clone();
        }

        tracing::debug!(command = %name, ?settings, "Creating circuit breaker");
        let breaker = CircuitBreaker::new(name.to_string(), settings, Tracing::new(name));
        breakers.insert(name.to_string(), breaker.clone());
        breaker
    }

    /// Returns the breaker registered under `name`.
    pub fn get(&self, name: &str) -> Option<CircuitBreaker> {
        self.breakers.read().get(name).cloned()
    }

    /// Returns the number of registered breakers.
    pub fn len(&self) -> usize {
        self.breakers.read().len()
    }

    /// Returns `true` if no breaker was registered yet.
    pub fn is_empty(&self) -> bool {
        self.breakers.read().is_empty()
    }
}

fn warn_on_divergence(breaker: &CircuitBreaker, settings: &Settings) {
    if breaker.settings() != settings {
        tracing::warn!(
            command = %breaker.name(),
            live = ?breaker.settings(),
            ignored = ?settings,
            "Circuit breaker already registered with different settings"
        );
    }
}
