/*!
 * Client Data Manager
 * Per-client bookkeeping: owned handles, health, timestamps, permissions
 *
 * Central storage for client tracking data; the rate limiter, pulse
 * monitor, and request manager are all clients of this table.
 */

use ahash::RandomState;
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};

use crate::core::errors::{Result, TuneError};
use crate::core::types::{Handle, Permission, Pid, Tid};

/// Maximum threads tracked per client process
pub const PER_CLIENT_TID_CAP: usize = 32;

/// Health every client starts with; the rate limiter moves it in [0, 100]
pub const INITIAL_HEALTH: f64 = 100.0;

struct ClientInfo {
    permission: Permission,
    tids: HashSet<Tid, RandomState>,
}

struct TidData {
    owner_pid: Pid,
    handles: HashSet<Handle, RandomState>,
    last_ts_ms: i64,
    health: f64,
}

#[derive(Default)]
struct CdmInner {
    by_pid: HashMap<Pid, ClientInfo, RandomState>,
    by_tid: HashMap<Tid, TidData, RandomState>,
}

/// Thread-safe client table behind one shared-exclusive lock. Contention
/// is low, so fine-grained per-pid locking is deliberately not used.
#[derive(Default)]
pub struct ClientDataManager {
    inner: RwLock<CdmInner>,
}

impl ClientDataManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exists(&self, pid: Pid, tid: Tid) -> bool {
        let inner = self.inner.read();
        inner.by_pid.contains_key(&pid) && inner.by_tid.contains_key(&tid)
    }

    /// Create tracking entries for (pid, tid) as needed. The permission is
    /// frozen at the first sighting of the pid; later calls ignore the
    /// argument. Fails with `CapacityExceeded` at the per-client tid cap.
    pub fn upsert(&self, pid: Pid, tid: Tid, permission: Permission) -> Result<()> {
        let mut inner = self.inner.write();

        let info = inner.by_pid.entry(pid).or_insert_with(|| {
            debug!("tracking new client pid {} ({:?})", pid, permission);
            ClientInfo {
                permission,
                tids: HashSet::with_hasher(RandomState::new()),
            }
        });

        if !info.tids.contains(&tid) {
            if info.tids.len() >= PER_CLIENT_TID_CAP {
                return Err(TuneError::CapacityExceeded(format!(
                    "pid {} already tracks {} threads",
                    pid, PER_CLIENT_TID_CAP
                )));
            }
            info.tids.insert(tid);
        }

        inner.by_tid.entry(tid).or_insert_with(|| TidData {
            owner_pid: pid,
            handles: HashSet::with_hasher(RandomState::new()),
            last_ts_ms: 0,
            health: INITIAL_HEALTH,
        });
        Ok(())
    }

    pub fn bind_handle(&self, tid: Tid, handle: Handle) {
        if let Some(data) = self.inner.write().by_tid.get_mut(&tid) {
            data.handles.insert(handle);
        }
    }

    pub fn unbind_handle(&self, tid: Tid, handle: Handle) {
        if let Some(data) = self.inner.write().by_tid.get_mut(&tid) {
            data.handles.remove(&handle);
        }
    }

    pub fn handles_of(&self, tid: Tid) -> Vec<Handle> {
        self.inner
            .read()
            .by_tid
            .get(&tid)
            .map(|d| d.handles.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn health(&self, tid: Tid) -> Option<f64> {
        self.inner.read().by_tid.get(&tid).map(|d| d.health)
    }

    /// Set health, clamped to [0, 100]
    pub fn set_health(&self, tid: Tid, health: f64) {
        if let Some(data) = self.inner.write().by_tid.get_mut(&tid) {
            data.health = health.clamp(0.0, 100.0);
        }
    }

    /// Adjust health by `delta`, clamped to [0, 100]; returns the new value
    pub fn bump_health(&self, tid: Tid, delta: f64) -> Option<f64> {
        let mut inner = self.inner.write();
        let data = inner.by_tid.get_mut(&tid)?;
        data.health = (data.health + delta).clamp(0.0, 100.0);
        Some(data.health)
    }

    pub fn last_ts(&self, tid: Tid) -> Option<i64> {
        self.inner.read().by_tid.get(&tid).map(|d| d.last_ts_ms)
    }

    pub fn set_last_ts(&self, tid: Tid, ts_ms: i64) {
        if let Some(data) = self.inner.write().by_tid.get_mut(&tid) {
            data.last_ts_ms = ts_ms;
        }
    }

    pub fn permission(&self, pid: Pid) -> Option<Permission> {
        self.inner.read().by_pid.get(&pid).map(|i| i.permission)
    }

    pub fn tids_of(&self, pid: Pid) -> Vec<Tid> {
        self.inner
            .read()
            .by_pid
            .get(&pid)
            .map(|i| i.tids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Pids with tracking entries, for the pulse monitor sweep
    pub fn list_live_clients(&self) -> Vec<Pid> {
        self.inner.read().by_pid.keys().copied().collect()
    }

    /// Drop a pid and every tid it owns
    pub fn drop_pid(&self, pid: Pid) {
        let mut inner = self.inner.write();
        if let Some(info) = inner.by_pid.remove(&pid) {
            for tid in info.tids {
                inner.by_tid.remove(&tid);
            }
            debug!("dropped client pid {}", pid);
        }
    }

    /// Drop a single tid entry (and its membership in the owning pid)
    pub fn drop_tid(&self, tid: Tid) {
        let mut inner = self.inner.write();
        if let Some(data) = inner.by_tid.remove(&tid) {
            if let Some(info) = inner.by_pid.get_mut(&data.owner_pid) {
                info.tids.remove(&tid);
            }
        }
    }

    /// Total bound handles across every tid
    pub fn total_bound_handles(&self) -> usize {
        self.inner
            .read()
            .by_tid
            .values()
            .map(|d| d.handles.len())
            .sum()
    }
}
