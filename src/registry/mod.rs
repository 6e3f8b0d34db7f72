/*!
 * Registry Module
 * Immutable post-init tables: resources, signals, targets, apps, properties
 */

pub mod app;
pub mod properties;
pub mod resource;
pub mod signal;
pub mod target;

pub use app::{AppBinding, AppRegistry};
pub use properties::{PropertiesRegistry, Tunables};
pub use resource::{resolve_path, ResourceDescriptor, ResourceDescriptorBuilder, ResourceRegistry};
pub use signal::{SignalDescriptor, SignalDescriptorBuilder, SignalRegistry};
pub use target::{CgroupInfo, ClusterInfo, TargetRegistry};
