/*!
 * Resource Registry
 * Immutable table of tunable resource descriptors with flattened scope slots
 *
 * Default values are captured by reading the live node once during
 * registration and are what tear-down restores.
 */

use ahash::RandomState;
use log::{debug, warn};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::sync::Arc;

use crate::core::errors::{Result, TuneError};
use crate::core::types::{ApplyScope, Permission, Policy, ResCode, Unit};

use super::target::TargetRegistry;

/// Custom apply hook: (descriptor, scope qualifier, value)
pub type ApplyFn = Arc<dyn Fn(&ResourceDescriptor, i32, i32) + Send + Sync>;
/// Custom tear hook: (descriptor, scope qualifier, captured default)
pub type TearFn = Arc<dyn Fn(&ResourceDescriptor, i32, Option<&str>) + Send + Sync>;

/// One tunable resource as declared by the config
#[derive(Clone)]
pub struct ResourceDescriptor {
    pub res_code: ResCode,
    pub name: String,
    /// Backing node path template. `%d` expands to the scope qualifier,
    /// `%s` to the cgroup name.
    pub path: String,
    pub low: i32,
    pub high: i32,
    pub permission: Permission,
    pub modes: u8,
    pub scope: ApplyScope,
    pub policy: Policy,
    pub unit: Unit,
    pub apply_cb: Option<ApplyFn>,
    pub tear_cb: Option<TearFn>,
}

impl fmt::Debug for ResourceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceDescriptor")
            .field("res_code", &format_args!("{:#x}", self.res_code))
            .field("name", &self.name)
            .field("path", &self.path)
            .field("low", &self.low)
            .field("high", &self.high)
            .field("permission", &self.permission)
            .field("scope", &self.scope)
            .field("policy", &self.policy)
            .field("has_callbacks", &self.apply_cb.is_some())
            .finish()
    }
}

impl ResourceDescriptor {
    pub fn builder(res_code: ResCode, name: impl Into<String>) -> ResourceDescriptorBuilder {
        ResourceDescriptorBuilder::new(res_code, name)
    }

    /// Whether `value` lies inside the declared bounds
    pub fn in_bounds(&self, value: i32) -> bool {
        value >= self.low && value <= self.high
    }
}

/// Builder used by the config loader
pub struct ResourceDescriptorBuilder {
    desc: ResourceDescriptor,
}

impl ResourceDescriptorBuilder {
    pub fn new(res_code: ResCode, name: impl Into<String>) -> Self {
        Self {
            desc: ResourceDescriptor {
                res_code,
                name: name.into(),
                path: String::new(),
                low: i32::MIN,
                high: i32::MAX,
                permission: Permission::ThirdParty,
                modes: crate::core::types::modes::ALL,
                scope: ApplyScope::Global,
                policy: Policy::Instant,
                unit: Unit::None,
                apply_cb: None,
                tear_cb: None,
            },
        }
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.desc.path = path.into();
        self
    }

    pub fn bounds(mut self, low: i32, high: i32) -> Self {
        self.desc.low = low;
        self.desc.high = high;
        self
    }

    pub fn permission(mut self, permission: Permission) -> Self {
        self.desc.permission = permission;
        self
    }

    pub fn modes(mut self, modes: u8) -> Self {
        self.desc.modes = modes;
        self
    }

    pub fn scope(mut self, scope: ApplyScope) -> Self {
        self.desc.scope = scope;
        self
    }

    pub fn policy(mut self, policy: Policy) -> Self {
        self.desc.policy = policy;
        self
    }

    pub fn unit(mut self, unit: Unit) -> Self {
        self.desc.unit = unit;
        self
    }

    /// Attach a custom apply/tear pair. They only come matched; a lone
    /// half is rejected at registration.
    pub fn callbacks(mut self, apply: ApplyFn, tear: TearFn) -> Self {
        self.desc.apply_cb = Some(apply);
        self.desc.tear_cb = Some(tear);
        self
    }

    pub fn build(self) -> ResourceDescriptor {
        self.desc
    }
}

/// Expand a path template for one scope instance
pub fn resolve_path(
    desc: &ResourceDescriptor,
    qualifier: i32,
    targets: &TargetRegistry,
) -> Option<String> {
    match desc.scope {
        ApplyScope::Global => Some(desc.path.clone()),
        ApplyScope::Core | ApplyScope::Cluster => {
            Some(desc.path.replace("%d", &qualifier.to_string()))
        }
        ApplyScope::Cgroup => {
            let name = targets.cgroup_name(qualifier as u32)?;
            Some(desc.path.replace("%s", name))
        }
    }
}

/// Read-only after startup registration
pub struct ResourceRegistry {
    targets: Arc<TargetRegistry>,
    descriptors: Vec<ResourceDescriptor>,
    by_code: HashMap<ResCode, usize, RandomState>,
    /// Per descriptor: first flat slot it owns
    scope_base: Vec<usize>,
    /// Per flat slot: owning descriptor index
    slot_owner: Vec<usize>,
    /// Per flat slot: the concrete scope qualifier it addresses
    slot_qualifier: Vec<i32>,
    /// Resolved node path -> value captured at registration
    defaults: HashMap<String, String, RandomState>,
}

impl ResourceRegistry {
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self {
            targets,
            descriptors: Vec::new(),
            by_code: HashMap::with_hasher(RandomState::new()),
            scope_base: Vec::new(),
            slot_owner: Vec::new(),
            slot_qualifier: Vec::new(),
            defaults: HashMap::with_hasher(RandomState::new()),
        }
    }

    /// Register one descriptor, validating and capturing its defaults.
    /// Malformed descriptors are dropped with a warning.
    pub fn register(&mut self, desc: ResourceDescriptor) -> Result<()> {
        self.validate(&desc)?;

        let qualifiers = self.scope_qualifiers(&desc);
        if qualifiers.is_empty() {
            return Err(TuneError::ArgInvalid(format!(
                "resource '{}': scope {:?} has no instances on this target",
                desc.name, desc.scope
            )));
        }

        let index = self.descriptors.len();
        let base = self.slot_owner.len();
        for &qualifier in &qualifiers {
            self.slot_owner.push(index);
            self.slot_qualifier.push(qualifier);
            if let Some(path) = resolve_path(&desc, qualifier, &self.targets) {
                self.capture_default(&path);
            }
        }

        debug!(
            "registered resource '{}' ({:#x}): {} scope slot(s) at base {}",
            desc.name,
            desc.res_code,
            qualifiers.len(),
            base
        );

        self.by_code.insert(desc.res_code, index);
        self.scope_base.push(base);
        self.descriptors.push(desc);
        Ok(())
    }

    fn validate(&self, desc: &ResourceDescriptor) -> Result<()> {
        if desc.path.is_empty() && desc.apply_cb.is_none() {
            return Err(TuneError::ArgInvalid(format!(
                "resource '{}': empty path and no applier callback",
                desc.name
            )));
        }
        if desc.low > desc.high {
            return Err(TuneError::ArgInvalid(format!(
                "resource '{}': inverted bounds [{}, {}]",
                desc.name, desc.low, desc.high
            )));
        }
        if desc.apply_cb.is_some() != desc.tear_cb.is_some() {
            return Err(TuneError::ArgInvalid(format!(
                "resource '{}': apply/tear callbacks must come as a pair",
                desc.name
            )));
        }
        if self.by_code.contains_key(&desc.res_code) {
            return Err(TuneError::Conflict(format!(
                "resource id {:#x} already registered",
                desc.res_code
            )));
        }
        Ok(())
    }

    fn scope_qualifiers(&self, desc: &ResourceDescriptor) -> Vec<i32> {
        match desc.scope {
            ApplyScope::Global => vec![0],
            ApplyScope::Core => (0..self.targets.total_cores() as i32).collect(),
            ApplyScope::Cluster => self
                .targets
                .clusters()
                .iter()
                .map(|c| c.logical_id as i32)
                .collect(),
            ApplyScope::Cgroup => self
                .targets
                .cgroups()
                .iter()
                .map(|c| c.id as i32)
                .collect(),
        }
    }

    fn capture_default(&mut self, path: &str) {
        match fs::read_to_string(path) {
            Ok(value) => {
                self.defaults
                    .insert(path.to_string(), value.trim_end().to_string());
            }
            Err(e) => {
                warn!("could not capture default for {}: {}", path, e);
            }
        }
    }

    pub fn lookup(&self, res_code: ResCode) -> Option<&ResourceDescriptor> {
        self.by_code.get(&res_code).map(|&i| &self.descriptors[i])
    }

    /// Flat coordinator-table index for one scope instance of a resource
    pub fn scope_index(&self, res_code: ResCode, qualifier: i32) -> Option<usize> {
        let &index = self.by_code.get(&res_code)?;
        let desc = &self.descriptors[index];
        let offset = match desc.scope {
            ApplyScope::Global => 0,
            ApplyScope::Core => self.targets.core_slot(u32::try_from(qualifier).ok()?)?,
            ApplyScope::Cluster => self.targets.cluster_slot(u32::try_from(qualifier).ok()?)?,
            ApplyScope::Cgroup => self.targets.cgroup_slot(u32::try_from(qualifier).ok()?)?,
        };
        Some(self.scope_base[index] + offset)
    }

    /// Owning descriptor of a flat slot
    pub fn slot_owner(&self, slot: usize) -> &ResourceDescriptor {
        &self.descriptors[self.slot_owner[slot]]
    }

    /// Concrete qualifier addressed by a flat slot
    pub fn slot_qualifier(&self, slot: usize) -> i32 {
        self.slot_qualifier[slot]
    }

    /// Total number of flat scope slots (the coordinator table dimension)
    pub fn total_scopes(&self) -> usize {
        self.slot_owner.len()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    pub fn all(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.descriptors.iter()
    }

    pub fn targets(&self) -> &TargetRegistry {
        &self.targets
    }

    /// Value captured for a resolved node path at registration, if any
    pub fn default_value(&self, path: &str) -> Option<&str> {
        self.defaults.get(path).map(String::as_str)
    }

    /// Default for one scope instance of a resource
    pub fn default_for(&self, desc: &ResourceDescriptor, qualifier: i32) -> Option<&str> {
        let path = resolve_path(desc, qualifier, &self.targets)?;
        self.defaults.get(&path).map(String::as_str)
    }

    /// Write every captured default back to its node. Used on shutdown and
    /// after a dispatcher restart; write failures are logged and skipped.
    pub fn restore_all_defaults(&self) {
        for (path, value) in &self.defaults {
            if let Err(e) = fs::write(path, value) {
                warn!("restore of {} failed: {}", path, e);
            }
        }
    }

    /// Dump the table at debug level
    pub fn display(&self) {
        for desc in &self.descriptors {
            debug!(
                "resource {:#x} '{}' scope={:?} policy={:?} bounds=[{}, {}]",
                desc.res_code, desc.name, desc.scope, desc.policy, desc.low, desc.high
            );
        }
    }
}
