/*!
 * Request Queue
 * Bounded multi-producer single-consumer priority queue feeding the
 * dispatcher
 *
 * Control messages (expiry, internal untune, shutdown) rank above all
 * client tiers and bypass the capacity bound: losing an expiry to
 * backpressure would leave an applied value behind forever.
 */

use parking_lot::{Condvar, Mutex};
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::Request;
use crate::core::errors::{Result, TuneError};
use crate::core::types::{Handle, PriorityTier};

/// Messages consumed by the dispatcher
#[derive(Debug)]
pub enum Message {
    Tune(Box<Request>),
    /// Deadline extension; ranked at the owning request's tier, like untune
    Retune {
        handle: Handle,
        duration_ms: i64,
        tier: Option<PriorityTier>,
    },
    /// Client-issued cancel; ranked at the owning request's tier so it can
    /// never overtake that client's earlier traffic
    Untune {
        handle: Handle,
        tier: Option<PriorityTier>,
    },
    /// Posted by the timer wheel; never by clients
    Expire {
        handle: Handle,
    },
    Shutdown,
}

impl Message {
    /// Lower rank pops first
    fn rank(&self) -> u8 {
        match self {
            Message::Shutdown => 0,
            Message::Expire { .. } => 1,
            Message::Untune { tier: None, .. } => 1,
            Message::Untune {
                tier: Some(tier), ..
            } => 2 + tier.index() as u8,
            Message::Retune { tier: None, .. } => 2,
            Message::Retune {
                tier: Some(tier), ..
            } => 2 + tier.index() as u8,
            Message::Tune(req) => 2 + req.tier.index() as u8,
        }
    }
}

struct QueueEntry {
    rank: u8,
    seq: u64,
    msg: Message,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.rank == other.rank && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Max-heap: invert so the smallest (rank, seq) surfaces first,
        // which keeps ties FIFO.
        other
            .rank
            .cmp(&self.rank)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct QueueState {
    heap: BinaryHeap<QueueEntry>,
    closed: bool,
}

pub struct RequestQueue {
    state: Mutex<QueueState>,
    cond: Condvar,
    capacity: usize,
    seq: AtomicU64,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                closed: false,
            }),
            cond: Condvar::new(),
            capacity: capacity.max(1),
            seq: AtomicU64::new(0),
        }
    }

    /// Enqueue client traffic. Fails with `Overflow` instead of blocking
    /// when the queue is at capacity or closed.
    pub fn push(&self, msg: Message) -> Result<()> {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let rank = msg.rank();
        {
            let mut state = self.state.lock();
            if state.closed || state.heap.len() >= self.capacity {
                return Err(TuneError::Overflow);
            }
            state.heap.push(QueueEntry { rank, seq, msg });
        }
        self.cond.notify_one();
        Ok(())
    }

    /// Enqueue a control message, ignoring the capacity bound. Silently
    /// dropped once the queue is closed (the dispatcher is gone).
    pub fn push_internal(&self, msg: Message) {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let rank = msg.rank();
        {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.heap.push(QueueEntry { rank, seq, msg });
        }
        self.cond.notify_one();
    }

    /// Block until a message is available. Returns `None` once the queue
    /// is closed and empty.
    pub fn pop(&self) -> Option<Message> {
        let mut state = self.state.lock();
        loop {
            if let Some(entry) = state.heap.pop() {
                return Some(entry.msg);
            }
            if state.closed {
                return None;
            }
            self.cond.wait(&mut state);
        }
    }

    /// Remove and return everything still queued, in priority order
    pub fn drain(&self) -> Vec<Message> {
        let mut state = self.state.lock();
        let mut out = Vec::with_capacity(state.heap.len());
        while let Some(entry) = state.heap.pop() {
            out.push(entry.msg);
        }
        out
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.cond.notify_all();
    }

    pub fn len(&self) -> usize {
        self.state.lock().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
