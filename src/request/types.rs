/*!
 * Request Types
 * The accepted request record and its lifecycle states
 */

use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::core::types::{Handle, Pid, PriorityTier, ResourceTuple, Tid};

/// Lifecycle of a request. Exactly one terminal transition happens per
/// handle: expiry or cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestState {
    /// Received and validated, not yet placed in the coordinator
    Pending,
    /// Placed; its timer is armed
    Active,
    /// Timer fired
    Expired,
    /// Client (or the garbage collector) untuned it
    Cancelled,
}

impl RequestState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Expired | RequestState::Cancelled)
    }
}

/// One accepted tune request. Immutable payload; mutable lifecycle state
/// lives in the request manager's record.
#[derive(Debug, Clone)]
pub struct Request {
    pub handle: Handle,
    pub client_pid: Pid,
    pub client_tid: Tid,
    pub tier: PriorityTier,
    pub duration_ms: i64,
    /// Absolute monotonic deadline
    pub deadline: Instant,
    pub resources: Vec<ResourceTuple>,
}
