/*!
 * Properties Registry
 * String property store backing GET_PROP / SET_PROP and the daemon tunables
 */

use ahash::RandomState;
use log::warn;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

/// Well-known tunable keys
pub mod keys {
    pub const MAX_CONCURRENT_REQUESTS: &str = "maximum.concurrent.requests";
    pub const MAX_RESOURCES_PER_REQUEST: &str = "maximum.resources.per.request";
    pub const PULSE_DURATION: &str = "pulse.duration";
    pub const GC_DURATION: &str = "garbage_collection.duration";
    pub const RATE_LIMITER_DELTA: &str = "rate_limiter.delta";
    pub const PENALTY_FACTOR: &str = "penalty.factor";
    pub const REWARD_FACTOR: &str = "reward.factor";
    pub const GC_BATCH: &str = "garbage_collection.batch";
    pub const QUEUE_CAPACITY: &str = "request_queue.capacity";
}

/// Snapshot of the numeric tunables, resolved once at startup
#[derive(Debug, Clone)]
pub struct Tunables {
    pub max_concurrent_requests: usize,
    pub max_resources_per_request: usize,
    pub pulse_duration: Duration,
    pub gc_duration: Duration,
    pub gc_batch: usize,
    pub rate_limiter_delta_ms: i64,
    pub penalty_factor: f64,
    pub reward_factor: f64,
    pub queue_capacity: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 128,
            max_resources_per_request: 32,
            pulse_duration: Duration::from_secs(60),
            gc_duration: Duration::from_secs(83),
            gc_batch: 8,
            rate_limiter_delta_ms: 5,
            penalty_factor: 2.0,
            reward_factor: 0.4,
            queue_capacity: 256,
        }
    }
}

/// Thread-safe property map. Loaded from config at startup; `SET_PROP`
/// mutates it at runtime (system permission only, enforced at ingress).
#[derive(Default)]
pub struct PropertiesRegistry {
    properties: RwLock<HashMap<String, String, RandomState>>,
}

impl PropertiesRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.properties.read().get(name).cloned()
    }

    /// Create or overwrite a property
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.properties.write().insert(name.into(), value.into());
    }

    pub fn remove(&self, name: &str) -> bool {
        self.properties.write().remove(name).is_some()
    }

    pub fn len(&self) -> usize {
        self.properties.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.read().is_empty()
    }

    /// Parse a property, falling back to `default` when absent or malformed
    pub fn get_parsed<T: FromStr>(&self, name: &str, default: T) -> T {
        match self.get(name) {
            Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
                warn!("property '{}' has unparseable value '{}'", name, raw);
                default
            }),
            None => default,
        }
    }

    /// Resolve the numeric tunables against the built-in defaults
    pub fn tunables(&self) -> Tunables {
        let defaults = Tunables::default();
        Tunables {
            max_concurrent_requests: self.get_parsed(
                keys::MAX_CONCURRENT_REQUESTS,
                defaults.max_concurrent_requests,
            ),
            max_resources_per_request: self.get_parsed(
                keys::MAX_RESOURCES_PER_REQUEST,
                defaults.max_resources_per_request,
            ),
            pulse_duration: Duration::from_secs(
                self.get_parsed(keys::PULSE_DURATION, defaults.pulse_duration.as_secs()),
            ),
            gc_duration: Duration::from_secs(
                self.get_parsed(keys::GC_DURATION, defaults.gc_duration.as_secs()),
            ),
            gc_batch: self.get_parsed(keys::GC_BATCH, defaults.gc_batch),
            rate_limiter_delta_ms: self
                .get_parsed(keys::RATE_LIMITER_DELTA, defaults.rate_limiter_delta_ms),
            penalty_factor: self.get_parsed(keys::PENALTY_FACTOR, defaults.penalty_factor),
            reward_factor: self.get_parsed(keys::REWARD_FACTOR, defaults.reward_factor),
            queue_capacity: self.get_parsed(keys::QUEUE_CAPACITY, defaults.queue_capacity),
        }
    }
}
