/*!
 * Client Garbage Collector
 * Batched teardown of dead clients detected by the pulse monitor
 *
 * Each wake drains at most a configured batch so one sweep can never
 * monopolize the client table; leftovers stay queued for the next wake.
 */

use log::{debug, info};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::manager::ClientDataManager;
use super::pulse::GcQueue;
use crate::core::types::Pid;
use crate::request::queue::{Message, RequestQueue};

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

/// Daemon thread cleaning up after dead clients
pub struct GarbageCollector {
    signal: Arc<StopSignal>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl GarbageCollector {
    pub fn start(
        cdm: Arc<ClientDataManager>,
        gc_queue: Arc<GcQueue>,
        request_queue: Arc<RequestQueue>,
        batch: usize,
        period: Duration,
    ) -> Self {
        info!(
            "garbage collector started, period {:?}, batch {}",
            period, batch
        );
        let signal = Arc::new(StopSignal::new());
        let stop = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("restune-gc".into())
            .spawn(move || {
                while !stop.sleep(period) {
                    Self::collect(&cdm, &gc_queue, &request_queue, batch);
                }
            })
            .expect("failed to spawn garbage collector");

        Self {
            signal,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// One GC wake: untune every handle owned by up to `batch` dead pids,
    /// then drop their tracking entries.
    fn collect(
        cdm: &ClientDataManager,
        gc_queue: &GcQueue,
        request_queue: &RequestQueue,
        batch: usize,
    ) {
        for pid in gc_queue.drain(batch.max(1)) {
            Self::cleanup_pid(cdm, request_queue, pid);
        }
    }

    fn cleanup_pid(cdm: &ClientDataManager, request_queue: &RequestQueue, pid: Pid) {
        let mut untuned = 0usize;
        for tid in cdm.tids_of(pid) {
            for handle in cdm.handles_of(tid) {
                request_queue.push_internal(Message::Untune { handle, tier: None });
                untuned += 1;
            }
        }
        cdm.drop_pid(pid);
        debug!("cleaned dead client pid {}: {} request(s)", pid, untuned);
    }

    pub fn stop(&self) {
        self.signal.stop();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for GarbageCollector {
    fn drop(&mut self) {
        self.stop();
    }
}
