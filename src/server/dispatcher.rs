/*!
 * Dispatcher
 * The single consumer thread behind the request queue
 *
 * All coordinator mutations happen here, which is what keeps the Coco
 * table lock-free: timers, GC, and clients only ever submit messages.
 */

use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::client::manager::ClientDataManager;
use crate::coco::table::CocoTable;
use crate::core::timer::TimerWheel;
use crate::registry::resource::ResourceRegistry;
use crate::request::manager::RequestManager;
use crate::request::queue::{Message, RequestQueue};
use crate::request::types::{Request, RequestState};

pub struct Dispatcher {
    coco: CocoTable,
    queue: Arc<RequestQueue>,
    requests: Arc<RequestManager>,
    cdm: Arc<ClientDataManager>,
    wheel: Arc<TimerWheel>,
    registry: Arc<ResourceRegistry>,
}

impl Dispatcher {
    pub fn new(
        coco: CocoTable,
        queue: Arc<RequestQueue>,
        requests: Arc<RequestManager>,
        cdm: Arc<ClientDataManager>,
        wheel: Arc<TimerWheel>,
        registry: Arc<ResourceRegistry>,
    ) -> Self {
        Self {
            coco,
            queue,
            requests,
            cdm,
            wheel,
            registry,
        }
    }

    /// Consume until shutdown. Runs on its own thread.
    pub fn run(mut self) {
        info!("dispatcher running");
        while let Some(msg) = self.queue.pop() {
            match msg {
                Message::Tune(request) => self.handle_tune(*request),
                Message::Retune {
                    handle,
                    duration_ms,
                    ..
                } => self.handle_retune(handle, duration_ms),
                Message::Untune { handle, .. } => self.teardown(handle, RequestState::Cancelled),
                Message::Expire { handle } => self.teardown(handle, RequestState::Expired),
                Message::Shutdown => break,
            }
        }
        self.shutdown();
    }

    fn handle_tune(&mut self, request: Request) {
        let handle = request.handle;
        // A dead client's GC untune may have removed the record while this
        // message was queued; nothing to do then.
        if !self.requests.contains(handle) {
            debug!("request {} vanished before placement", handle);
            return;
        }

        let nodes = match self.coco.insert_request(&request) {
            Ok(nodes) => nodes,
            Err(err) => {
                // Coordinator-level failures are invariant breaches: drop
                // the request, keep serving.
                error!("placing request {} failed: {}", handle, err);
                if let Some(record) = self.requests.remove(handle) {
                    self.cdm.unbind_handle(record.request.client_tid, handle);
                }
                return;
            }
        };

        // The record's deadline may already have been extended by an early
        // retune; the timer honors the record, not the message.
        let deadline = self.requests.with_mut(handle, |record| {
            record.state = RequestState::Active;
            record.nodes = nodes.clone();
            record.request.deadline
        });
        match deadline {
            Some(deadline) => self.wheel.arm(handle, deadline),
            None => {
                warn!("request {} lost its record during placement", handle);
                self.coco.remove_nodes(&nodes);
            }
        }
    }

    fn handle_retune(&mut self, handle: u64, duration_ms: i64) {
        let new_deadline = Instant::now() + Duration::from_millis(duration_ms as u64);
        let outcome = self.requests.with_mut(handle, |record| {
            if record.state.is_terminal() || new_deadline <= record.request.deadline {
                return None;
            }
            record.request.deadline = new_deadline;
            Some(record.state)
        });
        match outcome {
            Some(Some(RequestState::Active)) => {
                // Lists stay untouched: priority and values are unchanged
                self.wheel.reschedule(handle, new_deadline);
                debug!("request {} extended by {} ms", handle, duration_ms);
            }
            Some(Some(_)) => {
                // Still pending; activation will arm the extended deadline
                debug!("request {} extended before placement", handle);
            }
            Some(None) => debug!("stale retune for handle {}", handle),
            None => debug!("retune for unknown handle {}", handle),
        }
    }

    /// Shared terminal path for expiry and cancellation. Idempotent: a
    /// handle already gone is a no-op.
    fn teardown(&mut self, handle: u64, terminal: RequestState) {
        let Some(mut record) = self.requests.remove(handle) else {
            debug!("teardown for unknown handle {}", handle);
            return;
        };
        record.state = terminal;
        self.wheel.cancel(handle);
        self.coco.remove_nodes(&record.nodes);
        self.cdm.unbind_handle(record.request.client_tid, handle);
        debug!(
            "request {} reached {:?}, {} node(s) released",
            handle,
            terminal,
            record.nodes.len()
        );
    }

    /// Drain the queue through the reject path, cancel every live handle
    /// (tearing down all applied values), and restore captured defaults.
    fn shutdown(&mut self) {
        info!("dispatcher shutting down");
        for msg in self.queue.drain() {
            if let Message::Tune(request) = msg {
                if let Some(record) = self.requests.remove(request.handle) {
                    self.cdm
                        .unbind_handle(record.request.client_tid, request.handle);
                }
            }
        }
        for handle in self.requests.live_handles() {
            self.teardown(handle, RequestState::Cancelled);
        }
        self.registry.restore_all_defaults();
        info!("dispatcher stopped");
    }
}
