/*!
 * Core Module
 * Shared types, errors, wire codec, and the timer wheel
 */

pub mod errors;
pub mod timer;
pub mod types;
pub mod wire;

pub use errors::{Result, TuneError, WireCode};
pub use timer::TimerWheel;
pub use types::{
    pack_res_code, res_id, res_type, signal_key, ApplyScope, Handle, Permission, Pid, Policy,
    PriorityTier, ResCode, Tid, Unit,
};
