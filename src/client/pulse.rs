/*!
 * Pulse Monitor
 * Periodic liveness sweep of client pids; dead clients go to the GC queue
 *
 * Detection only. Cleanup runs on the garbage collector's own cadence so a
 * slow teardown never delays the next sweep.
 */

use ahash::RandomState;
use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashSet, VecDeque};
use std::path::Path;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::manager::ClientDataManager;
use crate::core::types::Pid;

/// Process liveness probe, injectable for tests
pub trait LivenessProbe: Send + Sync {
    fn is_alive(&self, pid: Pid) -> bool;
}

/// Probes `/proc/<pid>` existence
pub struct ProcLiveness;

impl LivenessProbe for ProcLiveness {
    fn is_alive(&self, pid: Pid) -> bool {
        Path::new(&format!("/proc/{}", pid)).exists()
    }
}

struct GcQueueInner {
    queue: VecDeque<Pid>,
    queued: HashSet<Pid, RandomState>,
}

/// Handoff queue between the pulse monitor and the garbage collector.
/// Enqueueing an already-queued pid is a no-op, so repeated detection of
/// the same dead client is harmless.
pub struct GcQueue {
    inner: Mutex<GcQueueInner>,
}

impl Default for GcQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GcQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(GcQueueInner {
                queue: VecDeque::new(),
                queued: HashSet::with_hasher(RandomState::new()),
            }),
        }
    }

    pub fn push(&self, pid: Pid) {
        let mut inner = self.inner.lock();
        if inner.queued.insert(pid) {
            inner.queue.push_back(pid);
        }
    }

    /// Take up to `max` pids off the queue, oldest first
    pub fn drain(&self, max: usize) -> Vec<Pid> {
        let mut inner = self.inner.lock();
        let take = max.min(inner.queue.len());
        let mut out = Vec::with_capacity(take);
        for _ in 0..take {
            let pid = inner.queue.pop_front().expect("len checked");
            inner.queued.remove(&pid);
            out.push(pid);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct StopSignal {
    stopped: Mutex<bool>,
    cond: Condvar,
}

impl StopSignal {
    fn new() -> Self {
        Self {
            stopped: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Sleep for `period`, returning early (true) when stopped
    fn sleep(&self, period: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if *stopped {
            return true;
        }
        self.cond.wait_for(&mut stopped, period);
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.cond.notify_all();
    }
}

/// Daemon thread sweeping the client table for dead processes
pub struct PulseMonitor {
    signal: Arc<StopSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl PulseMonitor {
    pub fn start(
        cdm: Arc<ClientDataManager>,
        probe: Arc<dyn LivenessProbe>,
        gc_queue: Arc<GcQueue>,
        period: Duration,
    ) -> Self {
        info!("pulse monitor started, period {:?}", period);
        let signal = Arc::new(StopSignal::new());
        let stop = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("restune-pulse".into())
            .spawn(move || {
                while !stop.sleep(period) {
                    Self::sweep(&cdm, probe.as_ref(), &gc_queue);
                }
            })
            .expect("failed to spawn pulse monitor");

        Self {
            signal,
            thread: Mutex::new(Some(handle)),
        }
    }

    fn sweep(cdm: &ClientDataManager, probe: &dyn LivenessProbe, gc_queue: &GcQueue) {
        for pid in cdm.list_live_clients() {
            if !probe.is_alive(pid) {
                debug!("client pid {} is gone, queueing for cleanup", pid);
                gc_queue.push(pid);
            }
        }
    }

    pub fn stop(&self) {
        self.signal.stop();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for PulseMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Permission;

    struct NeverAlive;
    impl LivenessProbe for NeverAlive {
        fn is_alive(&self, _pid: Pid) -> bool {
            false
        }
    }

    #[test]
    fn test_gc_queue_dedupes() {
        let queue = GcQueue::new();
        queue.push(1);
        queue.push(2);
        queue.push(1);
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.drain(10), vec![1, 2]);
        // Drained pids can be re-queued
        queue.push(1);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_drain_respects_batch_cap() {
        let queue = GcQueue::new();
        for pid in 0..5 {
            queue.push(pid);
        }
        assert_eq!(queue.drain(2), vec![0, 1]);
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_sweep_detects_dead_clients() {
        let cdm = Arc::new(ClientDataManager::new());
        cdm.upsert(41, 410, Permission::ThirdParty).unwrap();
        cdm.upsert(42, 420, Permission::ThirdParty).unwrap();
        let gc_queue = Arc::new(GcQueue::new());

        let monitor = PulseMonitor::start(
            Arc::clone(&cdm),
            Arc::new(NeverAlive),
            Arc::clone(&gc_queue),
            Duration::from_millis(10),
        );
        thread::sleep(Duration::from_millis(60));
        monitor.stop();

        assert_eq!(gc_queue.len(), 2);
    }

    #[test]
    fn test_proc_probe_self_is_alive() {
        let probe = ProcLiveness;
        assert!(probe.is_alive(std::process::id()));
    }
}
