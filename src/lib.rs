/*!
 * Restune
 * System resource tuning daemon
 *
 * Clients request temporary overrides of kernel and platform tunables
 * (sysfs nodes, cgroup controllers, IRQ affinities). The concurrency
 * coordinator arbitrates between contending requests by per-resource
 * policy and per-request priority, drives request lifetimes with timers,
 * and guarantees that every applied value is eventually torn back down to
 * the default captured at startup.
 */

pub mod applier;
pub mod client;
pub mod coco;
pub mod config;
pub mod core;
pub mod registry;
pub mod request;
pub mod server;

pub use crate::applier::{Applier, DefaultApplier};
pub use crate::client::{ClientDataManager, GarbageCollector, PulseMonitor, RateLimiter};
pub use crate::coco::CocoTable;
pub use crate::core::{Result, TimerWheel, TuneError, WireCode};
pub use crate::registry::{
    PropertiesRegistry, ResourceRegistry, SignalRegistry, TargetRegistry, Tunables,
};
pub use crate::request::{RequestManager, RequestQueue};
pub use crate::server::{Server, ServerBuilder};
