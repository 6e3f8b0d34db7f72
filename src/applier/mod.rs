/*!
 * Resource Applier
 * Stateless writers that push values to the underlying OS and restore
 * captured defaults
 *
 * Tuning is best-effort: a failed node write is logged and swallowed so
 * the owning request stays tracked and its teardown still runs if the node
 * becomes writable later.
 */

use log::{debug, warn};
use std::fs;
use std::sync::Arc;

use crate::core::types::ApplyScope;
use crate::registry::resource::{resolve_path, ResourceDescriptor};
use crate::registry::target::TargetRegistry;

/// Side-effect boundary between the coordinator and the OS
pub trait Applier: Send + Sync {
    /// Write `value` for one scope instance of a resource
    fn apply(&self, desc: &ResourceDescriptor, qualifier: i32, value: i32);

    /// Restore one scope instance to its startup-captured default
    fn tear(&self, desc: &ResourceDescriptor, qualifier: i32, default: Option<&str>);
}

fn write_node(path: &str, contents: &str) {
    match fs::write(path, contents) {
        Ok(()) => debug!("wrote '{}' to {}", contents, path),
        Err(e) => warn!("write of '{}' to {} failed: {}", contents, path, e),
    }
}

/// Plain sysfs node writer for core, cluster, and global scopes
pub struct SysfsApplier {
    targets: Arc<TargetRegistry>,
}

impl SysfsApplier {
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self { targets }
    }
}

impl Applier for SysfsApplier {
    fn apply(&self, desc: &ResourceDescriptor, qualifier: i32, value: i32) {
        if let Some(path) = resolve_path(desc, qualifier, &self.targets) {
            write_node(&path, &value.to_string());
        }
    }

    fn tear(&self, desc: &ResourceDescriptor, qualifier: i32, default: Option<&str>) {
        let Some(default) = default else {
            debug!("no captured default for '{}', leaving node as-is", desc.name);
            return;
        };
        if let Some(path) = resolve_path(desc, qualifier, &self.targets) {
            write_node(&path, default);
        }
    }
}

/// Cgroup controller-file writer; the `%s` placeholder expands to the
/// registered cgroup name
pub struct CgroupApplier {
    targets: Arc<TargetRegistry>,
}

impl CgroupApplier {
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self { targets }
    }
}

impl Applier for CgroupApplier {
    fn apply(&self, desc: &ResourceDescriptor, qualifier: i32, value: i32) {
        match resolve_path(desc, qualifier, &self.targets) {
            Some(path) => write_node(&path, &value.to_string()),
            None => warn!(
                "resource '{}': no cgroup registered for id {}",
                desc.name, qualifier
            ),
        }
    }

    fn tear(&self, desc: &ResourceDescriptor, qualifier: i32, default: Option<&str>) {
        let Some(default) = default else {
            return;
        };
        if let Some(path) = resolve_path(desc, qualifier, &self.targets) {
            write_node(&path, default);
        }
    }
}

/// IRQ affinity writer: values are CPU masks, written in hex to
/// `/proc/irq/<n>/smp_affinity`
pub struct IrqApplier {
    targets: Arc<TargetRegistry>,
}

impl IrqApplier {
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self { targets }
    }
}

impl Applier for IrqApplier {
    fn apply(&self, desc: &ResourceDescriptor, qualifier: i32, value: i32) {
        if let Some(path) = resolve_path(desc, qualifier, &self.targets) {
            write_node(&path, &format!("{:x}", value));
        }
    }

    fn tear(&self, desc: &ResourceDescriptor, qualifier: i32, default: Option<&str>) {
        let Some(default) = default else {
            return;
        };
        if let Some(path) = resolve_path(desc, qualifier, &self.targets) {
            write_node(&path, default);
        }
    }
}

/// Routes each resource to the writer that fits it
pub struct DefaultApplier {
    sysfs: SysfsApplier,
    cgroup: CgroupApplier,
    irq: IrqApplier,
}

impl DefaultApplier {
    pub fn new(targets: Arc<TargetRegistry>) -> Self {
        Self {
            sysfs: SysfsApplier::new(Arc::clone(&targets)),
            cgroup: CgroupApplier::new(Arc::clone(&targets)),
            irq: IrqApplier::new(targets),
        }
    }

    fn route(&self, desc: &ResourceDescriptor) -> &dyn Applier {
        if desc.scope == ApplyScope::Cgroup {
            &self.cgroup
        } else if desc.path.starts_with("/proc/irq/") {
            &self.irq
        } else {
            &self.sysfs
        }
    }
}

impl Applier for DefaultApplier {
    fn apply(&self, desc: &ResourceDescriptor, qualifier: i32, value: i32) {
        self.route(desc).apply(desc, qualifier, value);
    }

    fn tear(&self, desc: &ResourceDescriptor, qualifier: i32, default: Option<&str>) {
        self.route(desc).tear(desc, qualifier, default);
    }
}
