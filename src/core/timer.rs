/*!
 * Timer Wheel
 * One timer thread over a deadline min-heap; supports reschedule and cancel
 *
 * Expiry never mutates coordinator state directly: the fire callback posts
 * an expire message to the request queue and the dispatcher does the rest.
 */

use parking_lot::{Condvar, Mutex};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use super::types::Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct TimerEntry {
    deadline: Instant,
    generation: u64,
    handle: Handle,
}

struct WheelState {
    heap: BinaryHeap<Reverse<TimerEntry>>,
    /// Current generation per armed handle. A heap entry fires only if its
    /// generation still matches; cancel and reschedule invalidate by bump.
    live: HashMap<Handle, u64>,
    next_generation: u64,
    running: bool,
}

struct WheelShared {
    state: Mutex<WheelState>,
    cond: Condvar,
    on_fire: Box<dyn Fn(Handle) + Send + Sync>,
}

/// Monotonic one-shot timer store with a dedicated firing thread
pub struct TimerWheel {
    shared: Arc<WheelShared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl TimerWheel {
    /// Spawn the wheel thread. `on_fire` runs on that thread with no
    /// internal locks held.
    pub fn start<F>(on_fire: F) -> Self
    where
        F: Fn(Handle) + Send + Sync + 'static,
    {
        let shared = Arc::new(WheelShared {
            state: Mutex::new(WheelState {
                heap: BinaryHeap::new(),
                live: HashMap::new(),
                next_generation: 0,
                running: true,
            }),
            cond: Condvar::new(),
            on_fire: Box::new(on_fire),
        });

        let worker = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name("restune-timer".into())
            .spawn(move || Self::run(worker))
            .expect("failed to spawn timer thread");

        Self {
            shared,
            thread: Mutex::new(Some(handle)),
        }
    }

    /// Arm (or re-arm) the timer for `handle` at an absolute deadline
    pub fn arm(&self, handle: Handle, deadline: Instant) {
        let mut state = self.shared.state.lock();
        state.next_generation += 1;
        let generation = state.next_generation;
        state.live.insert(handle, generation);
        state.heap.push(Reverse(TimerEntry {
            deadline,
            generation,
            handle,
        }));
        drop(state);
        self.shared.cond.notify_one();
    }

    /// Replace the pending deadline for `handle`. Identical to `arm`; the
    /// superseded heap entry becomes stale and is skipped on pop.
    pub fn reschedule(&self, handle: Handle, deadline: Instant) {
        self.arm(handle, deadline);
    }

    /// Cancel the pending timer for `handle`, if any
    pub fn cancel(&self, handle: Handle) {
        let mut state = self.shared.state.lock();
        state.live.remove(&handle);
    }

    /// Number of handles with a pending timer
    pub fn pending(&self) -> usize {
        self.shared.state.lock().live.len()
    }

    /// Stop the wheel thread and join it. Pending timers are discarded.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            state.running = false;
        }
        self.shared.cond.notify_all();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    fn run(shared: Arc<WheelShared>) {
        let mut state = shared.state.lock();
        loop {
            if !state.running {
                break;
            }
            let next = state.heap.peek().map(|Reverse(e)| *e);
            match next {
                None => {
                    shared.cond.wait(&mut state);
                }
                Some(entry) if entry.deadline <= Instant::now() => {
                    state.heap.pop();
                    let current = state.live.get(&entry.handle).copied();
                    if current == Some(entry.generation) {
                        state.live.remove(&entry.handle);
                        // Fire with the lock released so the callback can
                        // enqueue freely.
                        drop(state);
                        (shared.on_fire)(entry.handle);
                        state = shared.state.lock();
                    }
                }
                Some(entry) => {
                    shared.cond.wait_until(&mut state, entry.deadline);
                }
            }
        }
    }
}

impl Drop for TimerWheel {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_fires_in_deadline_order() {
        let fired = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired);
        let wheel = TimerWheel::start(move |h| sink.lock().push(h));

        let now = Instant::now();
        wheel.arm(2, now + Duration::from_millis(60));
        wheel.arm(1, now + Duration::from_millis(20));

        thread::sleep(Duration::from_millis(120));
        assert_eq!(*fired.lock(), vec![1, 2]);
        assert_eq!(wheel.pending(), 0);
    }

    #[test]
    fn test_cancel_suppresses_fire() {
        let count = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&count);
        let wheel = TimerWheel::start(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        wheel.arm(7, Instant::now() + Duration::from_millis(30));
        wheel.cancel(7);

        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reschedule_extends() {
        let fired_at = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&fired_at);
        let start = Instant::now();
        let wheel = TimerWheel::start(move |h| sink.lock().push((h, start.elapsed())));

        wheel.arm(9, start + Duration::from_millis(30));
        wheel.reschedule(9, start + Duration::from_millis(90));

        thread::sleep(Duration::from_millis(60));
        assert!(fired_at.lock().is_empty());

        thread::sleep(Duration::from_millis(80));
        let fired = fired_at.lock();
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, 9);
        assert!(fired[0].1 >= Duration::from_millis(90));
    }

    #[test]
    fn test_shutdown_joins() {
        let wheel = TimerWheel::start(|_| {});
        wheel.arm(1, Instant::now() + Duration::from_secs(60));
        wheel.shutdown();
    }
}
