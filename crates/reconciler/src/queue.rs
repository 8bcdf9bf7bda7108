//! Deduplicating work queue.
//!
//! An item is held in at most one place at a time: pending (waiting for a
//! worker) or in flight (handed out by [`WorkQueue::get`] and not yet
//! [`done`](WorkQueue::done)). Adding an item that is already pending is a
//! no-op, which collapses bursts of triggers for the same key into one pass.
//!
//! # Example
//!
//! ```ignore
//! let queue = WorkQueue::new();
//! queue.add("a");
//! queue.add("a");
//! assert_eq!(queue.len(), 1);
//!
//! let item = queue.get().await;      // Some("a"), now in flight
//! queue.add("a");                    // dropped: already in flight
//! queue.done(&"a");
//! ```

use std::collections::{HashSet, VecDeque};
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{Notify, watch};
use tracing::debug;

struct QueueState<T> {
    pending: VecDeque<T>,
    queued: HashSet<T>,
    in_flight: HashSet<T>,
    dirty: HashSet<T>,
    shutting_down: bool,
}

impl<T> Default for QueueState<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            queued: HashSet::new(),
            in_flight: HashSet::new(),
            dirty: HashSet::new(),
            shutting_down: false,
        }
    }
}

struct Inner<T> {
    state: Mutex<QueueState<T>>,
    available: Notify,
    shutdown: watch::Sender<bool>,
    rerun_on_done: bool,
}

impl<T> Inner<T> {
    fn lock(&self) -> MutexGuard<'_, QueueState<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A cloneable handle to a shared work queue.
pub struct WorkQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Create a queue that drops adds for in-flight items.
    pub fn new() -> Self {
        Self::build(false)
    }

    /// Create a queue that remembers adds for in-flight items and re-queues
    /// them once the current pass calls [`done`](Self::done).
    pub fn with_rerun_on_done() -> Self {
        Self::build(true)
    }

    fn build(rerun_on_done: bool) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(QueueState::default()),
                available: Notify::new(),
                shutdown,
                rerun_on_done,
            }),
        }
    }

    /// Enqueue an item. Returns `true` if it became pending.
    pub fn add(&self, item: T) -> bool {
        let mut state = self.inner.lock();
        if state.shutting_down || state.queued.contains(&item) {
            return false;
        }
        if state.in_flight.contains(&item) {
            if self.inner.rerun_on_done {
                state.dirty.insert(item);
            }
            return false;
        }

        state.queued.insert(item.clone());
        state.pending.push_back(item);
        drop(state);

        self.inner.available.notify_one();
        true
    }

    /// Enqueue an item once `delay` has elapsed.
    ///
    /// The timer runs on a detached task and is abandoned if the queue shuts
    /// down first. Must be called from within a tokio runtime unless `delay`
    /// is zero.
    pub fn add_after(&self, item: T, delay: Duration) {
        if delay.is_zero() {
            self.add(item);
            return;
        }
        if self.is_shutting_down() {
            return;
        }

        let queue = self.clone();
        let mut shutdown = self.inner.shutdown.subscribe();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {
                    queue.add(item);
                }
                _ = shutdown.wait_for(|down| *down) => {
                    debug!("delayed add abandoned on shutdown");
                }
            }
        });
    }

    /// Wait for the next item.
    ///
    /// Returns `None` once the queue is shutting down. The returned item is
    /// in flight until [`done`](Self::done) is called for it.
    pub async fn get(&self) -> Option<T> {
        loop {
            let mut notified = pin!(self.inner.available.notified());
            notified.as_mut().enable();

            {
                let mut state = self.inner.lock();
                if state.shutting_down {
                    return None;
                }
                if let Some(item) = state.pending.pop_front() {
                    state.queued.remove(&item);
                    state.in_flight.insert(item.clone());
                    return Some(item);
                }
            }

            notified.await;
        }
    }

    /// Mark an item as finished.
    pub fn done(&self, item: &T) {
        let mut state = self.inner.lock();
        state.in_flight.remove(item);

        let rerun = state.dirty.remove(item) && !state.shutting_down;
        if rerun {
            state.queued.insert(item.clone());
            state.pending.push_back(item.clone());
            drop(state);
            self.inner.available.notify_one();
        }
    }

    /// Stop accepting items and release every waiting [`get`](Self::get).
    pub fn shut_down(&self) {
        {
            let mut state = self.inner.lock();
            if state.shutting_down {
                return;
            }
            state.shutting_down = true;
        }
        self.inner.shutdown.send_replace(true);
        self.inner.available.notify_waiters();
    }

    /// Number of pending items.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// Whether nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of items handed out and not yet done.
    pub fn in_flight(&self) -> usize {
        self.inner.lock().in_flight.len()
    }

    /// Whether [`shut_down`](Self::shut_down) has been called.
    pub fn is_shutting_down(&self) -> bool {
        self.inner.lock().shutting_down
    }
}

impl<T> Default for WorkQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn should_deliver_double_add_once() {
        let queue = WorkQueue::new();
        assert!(queue.add("a"));
        assert!(!queue.add("a"));
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.get().await, Some("a"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn should_not_requeue_item_while_in_flight() {
        let queue = WorkQueue::new();
        queue.add("a");
        assert_eq!(queue.get().await, Some("a"));

        assert!(!queue.add("a"));
        assert_eq!(queue.len(), 0);
        assert_eq!(queue.in_flight(), 1);

        queue.done(&"a");
        assert_eq!(queue.in_flight(), 0);
        assert_eq!(queue.len(), 0);

        assert!(queue.add("a"));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn should_rerun_after_done_when_enabled() {
        let queue = WorkQueue::with_rerun_on_done();
        queue.add("a");
        assert_eq!(queue.get().await, Some("a"));

        assert!(!queue.add("a"));
        assert_eq!(queue.len(), 0);

        queue.done(&"a");
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get().await, Some("a"));
    }

    #[tokio::test]
    async fn should_preserve_fifo_order() {
        let queue = WorkQueue::new();
        for item in ["a", "b", "c"] {
            queue.add(item);
        }
        assert_eq!(queue.get().await, Some("a"));
        assert_eq!(queue.get().await, Some("b"));
        assert_eq!(queue.get().await, Some("c"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_release_every_parked_get_on_shutdown() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let waiters: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                tokio::spawn(async move { queue.get().await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.shut_down();

        for waiter in waiters {
            let result = tokio::time::timeout(Duration::from_secs(2), waiter).await;
            assert!(matches!(result, Ok(Ok(None))));
        }
        assert!(queue.is_shutting_down());
        assert!(!queue.add(1));
    }

    #[tokio::test]
    async fn should_wake_parked_get_on_add() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let waiter = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.get().await })
        };

        tokio::task::yield_now().await;
        queue.add(7);

        let result = tokio::time::timeout(Duration::from_secs(2), waiter).await;
        assert!(matches!(result, Ok(Ok(Some(7)))));
    }

    #[tokio::test(start_paused = true)]
    async fn should_add_after_delay() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(5));
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(queue.is_empty());

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn should_add_immediately_for_zero_delay() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::ZERO);
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn should_abandon_delayed_add_on_shutdown() {
        let queue = WorkQueue::new();
        queue.add_after("a", Duration::from_secs(1));
        queue.shut_down();

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(queue.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn should_never_hand_one_item_to_two_workers() {
        let queue: WorkQueue<u32> = WorkQueue::new();
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let processed = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..4)
            .map(|_| {
                let queue = queue.clone();
                let active = Arc::clone(&active);
                let overlaps = Arc::clone(&overlaps);
                let processed = Arc::clone(&processed);
                tokio::spawn(async move {
                    while let Some(item) = queue.get().await {
                        if active.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        processed.fetch_add(1, Ordering::SeqCst);
                        queue.done(&item);
                    }
                })
            })
            .collect();

        // A single key hammered from outside must never run concurrently.
        for _ in 0..50 {
            queue.add(1);
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.shut_down();
        for worker in workers {
            let _ = worker.await;
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(processed.load(Ordering::SeqCst) >= 1);
    }
}
