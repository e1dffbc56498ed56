//! Thread-safe FIFO queue with a blocking, bounded-wait pop.
//!
//! Every member's connection threads push unhandled requests here; the
//! test program's thread pops them. FIFO order is the true cross-member
//! arrival order, which many assertions depend on.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

struct QueueState<T> {
    items: VecDeque<T>,
    shutdown: bool,
}

/// Unbounded multi-producer FIFO with a timed blocking pop.
///
/// Uses a mutex plus condition variable so a waiting popper sleeps instead
/// of spinning; pushers never block.
pub struct SyncQueue<T> {
    state: Mutex<QueueState<T>>,
    available: Condvar,
}

impl<T> SyncQueue<T> {
    /// Create an empty queue.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                items: VecDeque::new(),
                shutdown: false,
            }),
            available: Condvar::new(),
        }
    }

    /// Append an item and wake one waiter. Never blocks.
    ///
    /// Items pushed after shutdown are dropped; the popper is already
    /// gone by contract.
    pub fn push(&self, item: T) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.items.push_back(item);
        drop(state);
        self.available.notify_one();
    }

    /// Remove and return the head item, waiting up to `timeout` for one
    /// to arrive. Returns `None` on expiry or once the queue has been
    /// shut down and drained.
    pub fn pop(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                return Some(item);
            }
            if state.shutdown {
                return None;
            }
            if self.available.wait_until(&mut state, deadline).timed_out() {
                return state.items.pop_front();
            }
        }
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Begin teardown: reject further pushes and wake all waiters so no
    /// popper blocks past this point.
    pub fn shutdown(&self) {
        self.state.lock().shutdown = true;
        self.available.notify_all();
    }
}

impl<T> Default for SyncQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fifo_order() {
        let q = SyncQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert_eq!(q.pop(Duration::from_millis(10)), Some(1));
        assert_eq!(q.pop(Duration::from_millis(10)), Some(2));
        assert_eq!(q.pop(Duration::from_millis(10)), Some(3));
        assert_eq!(q.pop(Duration::from_millis(10)), None);
    }

    #[test]
    fn test_pop_times_out_within_bound() {
        let q: SyncQueue<u32> = SyncQueue::new();
        let start = Instant::now();
        assert_eq!(q.pop(Duration::from_millis(50)), None);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(50));
        assert!(elapsed < Duration::from_secs(2));
    }

    #[test]
    fn test_pop_wakes_on_push() {
        let q = Arc::new(SyncQueue::new());
        let pusher = {
            let q = q.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                q.push(7u32);
            })
        };
        assert_eq!(q.pop(Duration::from_secs(5)), Some(7));
        pusher.join().unwrap();
    }

    #[test]
    fn test_concurrent_pushers_all_arrive() {
        let q = Arc::new(SyncQueue::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let q = q.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        q.push(i * 100 + j);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let mut seen = Vec::new();
        while let Some(v) = q.pop(Duration::from_millis(10)) {
            seen.push(v);
        }
        assert_eq!(seen.len(), 800);
    }

    #[test]
    fn test_shutdown_wakes_waiter() {
        let q: Arc<SyncQueue<u32>> = Arc::new(SyncQueue::new());
        let waiter = {
            let q = q.clone();
            thread::spawn(move || q.pop(Duration::from_secs(30)))
        };
        thread::sleep(Duration::from_millis(20));
        q.shutdown();
        assert_eq!(waiter.join().unwrap(), None);
    }

    #[test]
    fn test_push_after_shutdown_is_dropped() {
        let q = SyncQueue::new();
        q.shutdown();
        q.push(1);
        assert!(q.is_empty());
    }
}
