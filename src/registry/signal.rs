/*!
 * Signal Registry
 * Maps signal ids to ordered resource bundles; expansion is a pure fan-out
 */

use ahash::RandomState;
use log::{debug, warn};
use std::collections::HashMap;

use crate::core::errors::{Result, TuneError};
use crate::core::types::{signal_key, Permission, ResCode, ResourceTuple};

/// One resource bundle inside a signal: parallel scope/value vectors, one
/// concrete mutation per pair
#[derive(Debug, Clone)]
pub struct SignalResourceBundle {
    pub res_code: ResCode,
    pub scopes: Vec<i32>,
    pub values: Vec<i32>,
}

/// One signal as declared by the config
#[derive(Debug, Clone)]
pub struct SignalDescriptor {
    pub sig_id: u16,
    pub category: u8,
    pub sig_type: u32,
    pub name: String,
    /// Used when the client passes a duration of 0
    pub default_timeout_ms: i64,
    /// Access levels allowed to provision this signal
    pub permissions: Vec<Permission>,
    pub bundles: Vec<SignalResourceBundle>,
}

impl SignalDescriptor {
    pub fn key(&self) -> u64 {
        signal_key(self.sig_id, self.sig_type)
    }

    pub fn permits(&self, permission: Permission) -> bool {
        self.permissions.is_empty() || self.permissions.contains(&permission)
    }
}

/// Builder used by the config loader
pub struct SignalDescriptorBuilder {
    desc: SignalDescriptor,
}

impl SignalDescriptorBuilder {
    pub fn new(sig_id: u16, sig_type: u32, name: impl Into<String>) -> Self {
        Self {
            desc: SignalDescriptor {
                sig_id,
                category: 0,
                sig_type,
                name: name.into(),
                default_timeout_ms: 0,
                permissions: Vec::new(),
                bundles: Vec::new(),
            },
        }
    }

    pub fn category(mut self, category: u8) -> Self {
        self.desc.category = category;
        self
    }

    pub fn default_timeout_ms(mut self, timeout_ms: i64) -> Self {
        self.desc.default_timeout_ms = timeout_ms;
        self
    }

    pub fn permit(mut self, permission: Permission) -> Self {
        self.desc.permissions.push(permission);
        self
    }

    pub fn bundle(mut self, res_code: ResCode, scopes: Vec<i32>, values: Vec<i32>) -> Self {
        self.desc.bundles.push(SignalResourceBundle {
            res_code,
            scopes,
            values,
        });
        self
    }

    pub fn build(self) -> SignalDescriptor {
        self.desc
    }
}

/// Read-only after startup registration
#[derive(Default)]
pub struct SignalRegistry {
    descriptors: Vec<SignalDescriptor>,
    by_key: HashMap<u64, usize, RandomState>,
}

impl SignalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one signal. Malformed signals are dropped with a warning.
    pub fn register(&mut self, desc: SignalDescriptor) -> Result<()> {
        if desc.bundles.is_empty() {
            return Err(TuneError::ArgInvalid(format!(
                "signal '{}': no resource bundles",
                desc.name
            )));
        }
        if desc.default_timeout_ms <= 0 {
            return Err(TuneError::ArgInvalid(format!(
                "signal '{}': non-positive default timeout",
                desc.name
            )));
        }
        for bundle in &desc.bundles {
            let scopes = bundle.scopes.len().max(1);
            if bundle.values.len() != scopes {
                return Err(TuneError::ArgInvalid(format!(
                    "signal '{}': bundle {:#x} has {} scope(s) but {} value(s)",
                    desc.name,
                    bundle.res_code,
                    scopes,
                    bundle.values.len()
                )));
            }
        }
        if self.by_key.contains_key(&desc.key()) {
            return Err(TuneError::Conflict(format!(
                "signal {:#x}/{:#x} already registered",
                desc.sig_id, desc.sig_type
            )));
        }

        debug!(
            "registered signal '{}' ({:#x}/{:#x}): {} bundle(s), timeout {} ms",
            desc.name,
            desc.sig_id,
            desc.sig_type,
            desc.bundles.len(),
            desc.default_timeout_ms
        );
        self.by_key.insert(desc.key(), self.descriptors.len());
        self.descriptors.push(desc);
        Ok(())
    }

    pub fn lookup(&self, sig_id: u16, sig_type: u32) -> Option<&SignalDescriptor> {
        self.by_key
            .get(&signal_key(sig_id, sig_type))
            .map(|&i| &self.descriptors[i])
    }

    /// Fan a signal out into its ordered concrete mutations. Returns the
    /// descriptor alongside so callers can pick up the default timeout and
    /// permission list.
    pub fn expand(
        &self,
        sig_id: u16,
        sig_type: u32,
    ) -> Option<(&SignalDescriptor, Vec<ResourceTuple>)> {
        let desc = self.lookup(sig_id, sig_type)?;
        let mut tuples = Vec::new();
        for bundle in &desc.bundles {
            if bundle.scopes.is_empty() {
                // Global bundle: single value, qualifier 0
                tuples.push(ResourceTuple {
                    res_code: bundle.res_code,
                    res_info: 0,
                    value: bundle.values[0],
                });
            } else {
                for (&scope, &value) in bundle.scopes.iter().zip(&bundle.values) {
                    tuples.push(ResourceTuple {
                        res_code: bundle.res_code,
                        res_info: scope,
                        value,
                    });
                }
            }
        }
        if tuples.is_empty() {
            warn!("signal '{}' expanded to nothing", desc.name);
            return None;
        }
        Some((desc, tuples))
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &SignalDescriptor> {
        self.descriptors.iter()
    }
}
