/*!
 * Request Manager
 * Central registry of live requests keyed by opaque handle
 *
 * Owns the handle space: 32-bit millisecond timestamp in the high word,
 * 32-bit monotone counter low. Handles are never reused.
 */

use ahash::RandomState;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use super::types::{Request, RequestState};
use crate::core::errors::{Result, TuneError};
use crate::core::types::Handle;

/// Location of one coordinator node belonging to a request: the flat scope
/// slot and the arena id. Teardown walks this instead of scanning lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeRef {
    pub scope: usize,
    pub node: u32,
}

/// A live request plus its mutable bookkeeping
#[derive(Debug)]
pub struct RequestRecord {
    pub request: Request,
    pub state: RequestState,
    /// Filled when the coordinator places the request
    pub nodes: Vec<NodeRef>,
}

pub struct RequestManager {
    records: DashMap<Handle, RequestRecord, RandomState>,
    counter: AtomicU32,
    live: AtomicUsize,
}

impl Default for RequestManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestManager {
    pub fn new() -> Self {
        Self {
            records: DashMap::with_hasher(RandomState::new()),
            counter: AtomicU32::new(1),
            live: AtomicUsize::new(0),
        }
    }

    /// Allocate the next handle
    pub fn allocate_handle(&self) -> Handle {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let counter = self.counter.fetch_add(1, Ordering::SeqCst) as u64;
        ((millis & 0xffff_ffff) << 32) | counter
    }

    /// Track an accepted request in the pending state
    pub fn insert(&self, request: Request) -> Result<()> {
        let handle = request.handle;
        let record = RequestRecord {
            request,
            state: RequestState::Pending,
            nodes: Vec::new(),
        };
        if self.records.insert(handle, record).is_some() {
            return Err(TuneError::Internal(format!(
                "handle {} inserted twice",
                handle
            )));
        }
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    pub fn contains(&self, handle: Handle) -> bool {
        self.records.contains_key(&handle)
    }

    /// Run `f` against the record, if it exists. The map shard lock is held
    /// for the duration of `f`; keep it short and reentrant-free.
    pub fn with<R>(&self, handle: Handle, f: impl FnOnce(&RequestRecord) -> R) -> Option<R> {
        self.records.get(&handle).map(|r| f(r.value()))
    }

    pub fn with_mut<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut RequestRecord) -> R,
    ) -> Option<R> {
        self.records.get_mut(&handle).map(|mut r| f(r.value_mut()))
    }

    /// Remove a record on its terminal transition
    pub fn remove(&self, handle: Handle) -> Option<RequestRecord> {
        let removed = self.records.remove(&handle).map(|(_, record)| record);
        if removed.is_some() {
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        removed
    }

    /// Number of tracked (pending or active) requests, for the global rate
    /// limit
    pub fn live_count(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Handles currently tracked, in no particular order
    pub fn live_handles(&self) -> Vec<Handle> {
        self.records.iter().map(|r| *r.key()).collect()
    }
}
