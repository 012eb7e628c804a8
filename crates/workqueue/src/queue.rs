//! Deduplicating, delay-capable work queue.
//!
//! Semantics follow the classic controller work queue:
//!
//! - A key is *dirty* when it is waiting to be processed and *processing*
//!   while a worker holds it.
//! - [`WorkQueue::add`] on a dirty key is a no-op, so bursts of events for the
//!   same object collapse into a single pending entry.
//! - A key added while it is processing is only marked dirty; it is queued
//!   again when the worker calls [`WorkQueue::done`].
//!
//! The queue does not give mutual exclusion across time. Once `done` has been
//! called a fresh `add` can hand the same key to another worker while the
//! first one is still unwinding, so handlers must be idempotent.

use crate::rate_limiter::ItemRateLimiter;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

struct State<K> {
    queue: VecDeque<K>,
    dirty: HashSet<K>,
    processing: HashSet<K>,
    shutting_down: bool,
}

struct Inner<K> {
    name: String,
    state: Mutex<State<K>>,
    rate_limiter: Mutex<ItemRateLimiter<K>>,
    notify: Notify,
}

/// Rate-limited work queue shared between an event source and a pool of workers.
///
/// Cloning is cheap; all clones refer to the same queue.
pub struct WorkQueue<K> {
    inner: Arc<Inner<K>>,
}

impl<K> Clone for WorkQueue<K> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K> fmt::Debug for WorkQueue<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkQueue")
            .field("name", &self.inner.name)
            .finish_non_exhaustive()
    }
}

impl<K> WorkQueue<K>
where
    K: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static,
{
    /// Create a named queue with the default per-item exponential rate limiter.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_rate_limiter(name, ItemRateLimiter::default())
    }

    /// Create a named queue with a custom rate limiter.
    pub fn with_rate_limiter(name: impl Into<String>, rate_limiter: ItemRateLimiter<K>) -> Self {
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                state: Mutex::new(State {
                    queue: VecDeque::new(),
                    dirty: HashSet::new(),
                    processing: HashSet::new(),
                    shutting_down: false,
                }),
                rate_limiter: Mutex::new(rate_limiter),
                notify: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, State<K>> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn rate_limiter(&self) -> MutexGuard<'_, ItemRateLimiter<K>> {
        self.inner
            .rate_limiter
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue `key` unless it is already pending.
    pub fn add(&self, key: K) {
        let mut state = self.state();
        if state.shutting_down {
            trace!(queue = %self.inner.name, ?key, "Ignoring add on shut down queue");
            return;
        }
        if !state.dirty.insert(key.clone()) {
            trace!(queue = %self.inner.name, ?key, "Key already pending");
            return;
        }
        if state.processing.contains(&key) {
            // Released by done()
            return;
        }
        state.queue.push_back(key);
        drop(state);
        self.inner.notify.notify_one();
    }

    /// Enqueue `key` after `delay` has elapsed.
    ///
    /// Must be called from within a Tokio runtime when `delay` is non-zero.
    pub fn add_after(&self, key: K, delay: Duration) {
        if self.is_shutting_down() {
            return;
        }
        if delay.is_zero() {
            self.add(key);
            return;
        }
        let queue = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            queue.add(key);
        });
    }

    /// Enqueue `key` after its current backoff delay and bump its failure count.
    pub fn add_rate_limited(&self, key: K) {
        let delay = self.rate_limiter().when(&key);
        debug!(queue = %self.inner.name, ?key, ?delay, "Requeueing with backoff");
        self.add_after(key, delay);
    }

    /// Reset the backoff history of `key`.
    pub fn forget(&self, key: &K) {
        self.rate_limiter().forget(key);
    }

    /// Number of rate-limited requeues of `key` since it was last forgotten.
    pub fn num_requeues(&self, key: &K) -> u32 {
        self.rate_limiter().num_requeues(key)
    }

    /// Wait for the next key.
    ///
    /// Returns `None` once the queue has been shut down and no queued keys remain.
    /// The caller owns the returned key until it calls [`done`](Self::done).
    pub async fn get(&self) -> Option<K> {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before inspecting state so a concurrent add or shutdown is not missed
            notified.as_mut().enable();

            {
                let mut state = self.state();
                if let Some(key) = state.queue.pop_front() {
                    state.processing.insert(key.clone());
                    state.dirty.remove(&key);
                    return Some(key);
                }
                if state.shutting_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Mark `key` as processed, re-queueing it if it was added while in flight.
    pub fn done(&self, key: &K) {
        let mut state = self.state();
        state.processing.remove(key);
        if state.dirty.contains(key) {
            state.queue.push_back(key.clone());
            drop(state);
            self.inner.notify.notify_one();
        }
    }

    /// Stop accepting new keys and wake every waiting worker.
    ///
    /// Keys already queued are still handed out; `get` returns `None` afterwards.
    pub fn shut_down(&self) {
        self.state().shutting_down = true;
        debug!(queue = %self.inner.name, "Work queue shutting down");
        self.inner.notify.notify_waiters();
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.state().shutting_down
    }

    /// Number of keys waiting to be handed out.
    pub fn len(&self) -> usize {
        self.state().queue.len()
    }

    /// Whether no keys are waiting to be handed out.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limiter::ExponentialBackoff;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_duplicate_adds_collapse() {
        let queue = WorkQueue::new("test");
        for _ in 0..10 {
            queue.add("default/web-tls".to_string());
        }
        assert_eq!(queue.len(), 1);

        let key = timeout(WAIT, queue.get()).await.expect("get timed out");
        assert_eq!(key.as_deref(), Some("default/web-tls"));
        assert!(queue.is_empty(), "Only one entry should be dequeued");
    }

    #[tokio::test]
    async fn test_add_while_processing_is_deferred_until_done() {
        let queue = WorkQueue::new("test");
        queue.add("a".to_string());
        let key = queue.get().await.expect("key");

        queue.add(key.clone());
        queue.add(key.clone());
        assert!(queue.is_empty(), "Re-add must wait for done()");

        queue.done(&key);
        assert_eq!(queue.len(), 1);
        let again = timeout(WAIT, queue.get()).await.expect("get timed out");
        assert_eq!(again, Some(key));
    }

    #[tokio::test]
    async fn test_add_after_done_is_independent_dequeue() {
        let queue = WorkQueue::new("test");
        queue.add(1u32);
        let first = queue.get().await.expect("first");
        queue.done(&first);
        assert!(queue.is_empty());

        queue.add(1u32);
        let second = timeout(WAIT, queue.get()).await.expect("get timed out");
        assert_eq!(second, Some(1));
    }

    #[tokio::test]
    async fn test_distinct_keys_keep_fifo_order() {
        let queue = WorkQueue::new("test");
        queue.add("a");
        queue.add("b");
        queue.add("a");
        queue.add("c");

        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert_eq!(queue.get().await, Some("c"));
    }

    #[tokio::test]
    async fn test_get_blocks_until_add() {
        let queue = WorkQueue::new("test");
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!consumer.is_finished(), "get() must block on an empty queue");

        queue.add("late".to_string());
        let got = timeout(WAIT, consumer)
            .await
            .expect("consumer timed out")
            .expect("consumer panicked");
        assert_eq!(got.as_deref(), Some("late"));
    }

    #[tokio::test]
    async fn test_shut_down_wakes_waiters() {
        let queue: WorkQueue<String> = WorkQueue::new("test");
        let workers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();

        for worker in workers {
            let got = timeout(WAIT, worker)
                .await
                .expect("worker did not observe shutdown")
                .expect("worker panicked");
            assert_eq!(got, None);
        }
    }

    #[tokio::test]
    async fn test_shut_down_drains_queued_keys_and_rejects_new_ones() {
        let queue = WorkQueue::new("test");
        queue.add("queued");
        queue.shut_down();
        queue.add("rejected");

        assert_eq!(queue.get().await, Some("queued"));
        assert_eq!(queue.get().await, None);
    }

    #[tokio::test]
    async fn test_add_rate_limited_requeues_with_backoff() {
        let limiter = ItemRateLimiter::new(ExponentialBackoff::new(
            Duration::from_millis(10),
            Duration::from_millis(50),
        ));
        let queue = WorkQueue::with_rate_limiter("test", limiter);

        queue.add("retry".to_string());
        let key = queue.get().await.expect("key");
        queue.add_rate_limited(key.clone());
        queue.done(&key);

        assert!(queue.is_empty(), "Rate-limited add must be delayed");
        assert_eq!(queue.num_requeues(&key), 1);

        let again = timeout(WAIT, queue.get()).await.expect("delayed add never arrived");
        assert_eq!(again, Some(key.clone()));

        queue.forget(&key);
        assert_eq!(queue.num_requeues(&key), 0);
    }

    #[tokio::test]
    async fn test_delayed_add_after_shut_down_is_dropped() {
        let queue = WorkQueue::new("test");
        queue.add_after("late", Duration::from_millis(10));
        queue.shut_down();

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(queue.is_empty());
        assert_eq!(queue.get().await, None);
    }
}
