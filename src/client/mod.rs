/*!
 * Client Module
 * Client tracking, admission control, and dead-client cleanup
 */

pub mod gc;
pub mod manager;
pub mod pulse;
pub mod rate_limiter;

pub use gc::GarbageCollector;
pub use manager::{ClientDataManager, PER_CLIENT_TID_CAP};
pub use pulse::{GcQueue, LivenessProbe, ProcLiveness, PulseMonitor};
pub use rate_limiter::RateLimiter;
