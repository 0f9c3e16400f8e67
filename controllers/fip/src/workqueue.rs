//! Rate-limited deduplicating work queue
//!
//! A FIFO of node keys with the three guarantees the reconcile loop relies on:
//! a key queued twice is processed once, a key being processed is not handed to
//! a second worker (later enqueues are buffered and released on `done`), and
//! re-admission of failing keys backs off exponentially per key, 30 seconds
//! doubling up to a 10 minute cap.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

const BASE_DELAY: Duration = Duration::from_secs(30);
const MAX_DELAY: Duration = Duration::from_secs(600);

#[derive(Default)]
struct QueueState {
    /// Keys ready to be handed to workers, in admission order.
    queue: VecDeque<String>,
    /// Keys admitted but not yet completed; membership dedups enqueues.
    dirty: HashSet<String>,
    /// Keys currently held by a worker.
    processing: HashSet<String>,
    /// Per-key consecutive admission counter, reset by `forget`.
    failures: HashMap<String, u32>,
    shutting_down: bool,
}

/// Rate-limited deduplicating queue of node keys.
pub struct RateLimitedQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl RateLimitedQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        })
    }

    /// Admits a key after its per-key backoff delay, bumping the counter.
    pub fn add(self: &Arc<Self>, key: &str) {
        let delay = {
            let mut state = self.state.lock().expect("workqueue mutex poisoned");
            if state.shutting_down {
                return;
            }
            let failures = state.failures.entry(key.to_string()).or_insert(0);
            let delay = backoff_for(*failures);
            *failures += 1;
            delay
        };

        let queue = Arc::clone(self);
        let key = key.to_string();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.insert(&key);
        });
    }

    /// Places a key on the queue immediately, respecting deduplication and
    /// in-flight exclusion.
    fn insert(&self, key: &str) {
        let mut state = self.state.lock().expect("workqueue mutex poisoned");
        if state.shutting_down || state.dirty.contains(key) {
            return;
        }
        state.dirty.insert(key.to_string());
        if state.processing.contains(key) {
            // Buffered; `done` re-admits it.
            return;
        }
        state.queue.push_back(key.to_string());
        drop(state);
        self.notify.notify_waiters();
    }

    /// Waits for the next key. Returns `None` once the queue is shut down and
    /// drained; every `Some` must be paired with a `done` call.
    pub async fn get(&self) -> Option<String> {
        loop {
            let notified = self.notify.notified();
            {
                let mut state = self.state.lock().expect("workqueue mutex poisoned");
                if let Some(key) = state.queue.pop_front() {
                    state.dirty.remove(&key);
                    state.processing.insert(key.clone());
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    /// Marks processing of a key complete. A key enqueued while in flight is
    /// re-admitted exactly once.
    pub fn done(&self, key: &str) {
        let mut state = self.state.lock().expect("workqueue mutex poisoned");
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.to_string());
            drop(state);
            self.notify.notify_waiters();
        }
    }

    /// Resets the failure counter and backoff for a key.
    pub fn forget(&self, key: &str) {
        let mut state = self.state.lock().expect("workqueue mutex poisoned");
        state.failures.remove(key);
    }

    /// How often the key has been admitted since it was last forgotten.
    pub fn num_requeues(&self, key: &str) -> u32 {
        let state = self.state.lock().expect("workqueue mutex poisoned");
        state.failures.get(key).copied().unwrap_or(0)
    }

    /// Stops admission and wakes all waiting workers so they can drain.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().expect("workqueue mutex poisoned");
        state.shutting_down = true;
        drop(state);
        self.notify.notify_waiters();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.state.lock().expect("workqueue mutex poisoned").queue.len()
    }
}

/// Exponential per-key backoff: 30s * 2^failures, capped at 600s.
fn backoff_for(failures: u32) -> Duration {
    let exp = failures.min(16);
    let delay = BASE_DELAY.saturating_mul(1u32 << exp);
    delay.min(MAX_DELAY)
}
