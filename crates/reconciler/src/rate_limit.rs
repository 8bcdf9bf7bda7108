//! Per-item retry backoff on top of [`WorkQueue`].

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use crate::queue::WorkQueue;

/// Decides how long an item waits before its next retry.
pub trait RateLimiter<T>: Send + Sync {
    /// Delay before the next retry of `item`; records a failure.
    fn when(&self, item: &T) -> Duration;

    /// Clear the failure history of `item`.
    fn forget(&self, item: &T);

    /// Consecutive failures recorded for `item`.
    fn num_requeues(&self, item: &T) -> u32;
}

/// `base * 2^attempt`, saturating at `max`.
pub fn calculate_backoff(attempt: u32, base: Duration, max: Duration) -> Duration {
    2_u32
        .checked_pow(attempt)
        .and_then(|factor| base.checked_mul(factor))
        .map_or(max, |delay| delay.min(max))
}

#[derive(Debug, Clone, Copy)]
struct Failures {
    count: u32,
    last_seen: Instant,
}

/// Exponential per-item backoff.
///
/// Entries idle for longer than `max_age` are pruned whenever a delay is
/// computed, so items that stop failing without an explicit `forget` do not
/// accumulate.
#[derive(Debug)]
pub struct ExponentialBackoff<T> {
    base_delay: Duration,
    max_delay: Duration,
    max_age: Duration,
    failures: Mutex<HashMap<T, Failures>>,
}

impl<T: Eq + Hash + Clone> ExponentialBackoff<T> {
    /// Create a limiter. Equal `base_delay` and `max_delay` give a fixed delay.
    pub fn new(base_delay: Duration, max_delay: Duration, max_age: Duration) -> Self {
        Self {
            base_delay,
            max_delay: max_delay.max(base_delay),
            max_age,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Number of items with a recorded failure.
    pub fn tracked(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<T, Failures>> {
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> RateLimiter<T> for ExponentialBackoff<T>
where
    T: Eq + Hash + Clone + Send + Sync,
{
    fn when(&self, item: &T) -> Duration {
        let now = Instant::now();
        let mut failures = self.lock();
        failures.retain(|_, f| now.duration_since(f.last_seen) <= self.max_age);

        let entry = failures.entry(item.clone()).or_insert(Failures {
            count: 0,
            last_seen: now,
        });
        let attempt = entry.count;
        entry.count = entry.count.saturating_add(1);
        entry.last_seen = now;

        calculate_backoff(attempt, self.base_delay, self.max_delay)
    }

    fn forget(&self, item: &T) {
        self.lock().remove(item);
    }

    fn num_requeues(&self, item: &T) -> u32 {
        self.lock().get(item).map_or(0, |f| f.count)
    }
}

/// A [`WorkQueue`] paired with a [`RateLimiter`].
pub struct RateLimitingQueue<T> {
    queue: WorkQueue<T>,
    limiter: Arc<dyn RateLimiter<T>>,
}

impl<T> Clone for RateLimitingQueue<T> {
    fn clone(&self) -> Self {
        Self {
            queue: self.queue.clone(),
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<T> RateLimitingQueue<T>
where
    T: Clone + Eq + Hash + Send + Sync + 'static,
{
    /// Wrap a queue with a limiter.
    pub fn new(queue: WorkQueue<T>, limiter: Arc<dyn RateLimiter<T>>) -> Self {
        Self { queue, limiter }
    }

    /// Re-add `item` after the limiter's delay for it.
    pub fn add_rate_limited(&self, item: T) -> Duration {
        let delay = self.limiter.when(&item);
        self.queue.add_after(item, delay);
        delay
    }

    /// Clear the failure history of `item`.
    pub fn forget(&self, item: &T) {
        self.limiter.forget(item);
    }

    /// Consecutive failures recorded for `item`.
    pub fn num_requeues(&self, item: &T) -> u32 {
        self.limiter.num_requeues(item)
    }

    /// See [`WorkQueue::add`].
    pub fn add(&self, item: T) -> bool {
        self.queue.add(item)
    }

    /// See [`WorkQueue::add_after`].
    pub fn add_after(&self, item: T, delay: Duration) {
        self.queue.add_after(item, delay);
    }

    /// See [`WorkQueue::get`].
    pub async fn get(&self) -> Option<T> {
        self.queue.get().await
    }

    /// See [`WorkQueue::done`].
    pub fn done(&self, item: &T) {
        self.queue.done(item);
    }

    /// See [`WorkQueue::shut_down`].
    pub fn shut_down(&self) {
        self.queue.shut_down();
    }

    /// See [`WorkQueue::len`].
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// See [`WorkQueue::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// See [`WorkQueue::is_shutting_down`].
    pub fn is_shutting_down(&self) -> bool {
        self.queue.is_shutting_down()
    }

    /// The underlying queue.
    pub const fn queue(&self) -> &WorkQueue<T> {
        &self.queue
    }
}
