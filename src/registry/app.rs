/*!
 * App Registry
 * Per-app bindings: an app name aliases a list of signal codes
 *
 * Thread-comm matching and cgroup placement live in the process
 * classifier, not here; the daemon only resolves the alias.
 */

use ahash::RandomState;
use log::debug;
use std::collections::HashMap;

/// Signals bound to one app name
#[derive(Debug, Clone)]
pub struct AppBinding {
    pub app_name: String,
    /// (sig_id, sig_type) pairs provisioned when the app is in focus
    pub signals: Vec<(u16, u32)>,
}

/// Read-only after startup registration
#[derive(Default)]
pub struct AppRegistry {
    bindings: HashMap<String, AppBinding, RandomState>,
}

impl AppRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, binding: AppBinding) {
        debug!(
            "registered app binding '{}' with {} signal(s)",
            binding.app_name,
            binding.signals.len()
        );
        self.bindings.insert(binding.app_name.clone(), binding);
    }

    pub fn lookup(&self, app_name: &str) -> Option<&AppBinding> {
        self.bindings.get(app_name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
