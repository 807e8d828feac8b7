//! Bounded async queue with explicit eviction policies.
//!
//! A single consumer is assumed (the orchestrator's read loop), but multiple
//! producers are safe to use concurrently. Every wait is expressed as
//! "capture a [`tokio::sync::Notify`] permit, then re-check the condition
//! under the lock" so a `put`/`close`/`drop_where` that races a waiter's
//! registration is never missed.

use std::collections::VecDeque;
use tokio::sync::{Mutex, Notify};

/// The queue has been closed and is empty; no more items will ever be
/// produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("queue closed")]
pub struct QueueClosed;

struct Inner<T> {
    items: VecDeque<T>,
    closed: bool,
}

/// Bounded FIFO queue with predicate-driven eviction and dequeue ordering,
/// used for both the inbound and outbound frame queues.
pub struct BoundedQueue<T> {
    maxsize: usize,
    inner: Mutex<Inner<T>>,
    notify: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `maxsize` items. Panics if `maxsize`
    /// is zero.
    pub fn new(maxsize: usize) -> Self {
        assert!(maxsize > 0, "maxsize must be > 0");
        Self {
            maxsize,
            inner: Mutex::new(Inner {
                items: VecDeque::new(),
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Configured capacity.
    pub fn maxsize(&self) -> usize {
        self.maxsize
    }

    /// Current number of queued items.
    pub async fn len(&self) -> usize {
        self.inner.lock().await.items.len()
    }

    /// Whether the queue has no queued items.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Whether [`Self::close`] has been called.
    pub async fn is_closed(&self) -> bool {
        self.inner.lock().await.closed
    }

    /// Enqueue `item`. If the queue is full and `evict` is provided, the
    /// first queued item matching `evict` is dropped to make room. Returns
    /// `false` if the queue is closed, or full with no evictable victim.
    pub async fn put(&self, item: T, evict: Option<&dyn Fn(&T) -> bool>) -> bool {
        let mut inner = self.inner.lock().await;
        if inner.closed {
            return false;
        }

        if inner.items.len() < self.maxsize {
            inner.items.push_back(item);
            drop(inner);
            self.notify.notify_one();
            return true;
        }

        if let Some(evict) = evict {
            if let Some(pos) = inner.items.iter().position(|x| evict(x)) {
                inner.items.remove(pos);
            }
            if inner.items.len() < self.maxsize {
                inner.items.push_back(item);
                drop(inner);
                self.notify.notify_one();
                return true;
            }
        }

        false
    }

    /// Dequeue the head item, waiting if the queue is empty. Returns
    /// [`QueueClosed`] once the queue is closed and drained.
    pub async fn get(&self) -> Result<T, QueueClosed> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(item) = inner.items.pop_front() {
                    return Ok(item);
                }
                if inner.closed {
                    return Err(QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Dequeue the first item matching `pred`, falling back to FIFO order
    /// if none match. Waits if the queue is empty.
    pub async fn get_prefer(&self, pred: impl Fn(&T) -> bool) -> Result<T, QueueClosed> {
        loop {
            let notified = self.notify.notified();
            {
                let mut inner = self.inner.lock().await;
                if let Some(pos) = inner.items.iter().position(&pred) {
                    return Ok(inner.items.remove(pos).expect("position just found"));
                }
                if let Some(item) = inner.items.pop_front() {
                    return Ok(item);
                }
                if inner.closed {
                    return Err(QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Block until any queued item matches `pred`, or the queue closes.
    pub async fn wait_for_any(&self, pred: impl Fn(&T) -> bool) -> Result<(), QueueClosed> {
        loop {
            let notified = self.notify.notified();
            {
                let inner = self.inner.lock().await;
                if inner.items.iter().any(&pred) {
                    return Ok(());
                }
                if inner.closed {
                    return Err(QueueClosed);
                }
            }
            notified.await;
        }
    }

    /// Mark the queue closed. Future `put`s fail; waiters drain remaining
    /// items and then observe [`QueueClosed`].
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;
        inner.closed = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Remove every queued item matching `pred`. Returns the number removed.
    pub async fn drop_where(&self, pred: impl Fn(&T) -> bool) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.items.len();
        inner.items.retain(|x| !pred(x));
        let dropped = before - inner.items.len();
        if dropped > 0 {
            drop(inner);
            self.notify.notify_waiters();
        }
        dropped
    }

    /// Whether any queued item matches `pred`.
    pub async fn any_where(&self, pred: impl Fn(&T) -> bool) -> bool {
        self.inner.lock().await.items.iter().any(pred)
    }

    /// Remove the first queued item matching `pred`. Returns whether an
    /// item was removed.
    pub async fn evict_one_where(&self, pred: impl Fn(&T) -> bool) -> bool {
        let mut inner = self.inner.lock().await;
        if let Some(pos) = inner.items.iter().position(&pred) {
            inner.items.remove(pos);
            drop(inner);
            self.notify.notify_waiters();
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn put_and_get_fifo_order() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        assert!(q.put(1, None).await);
        assert!(q.put(2, None).await);
        assert_eq!(q.get().await.unwrap(), 1);
        assert_eq!(q.get().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn put_fails_when_full_without_evict() {
        let q: BoundedQueue<i32> = BoundedQueue::new(1);
        assert!(q.put(1, None).await);
        assert!(!q.put(2, None).await);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn put_evicts_matching_victim_when_full() {
        let q: BoundedQueue<i32> = BoundedQueue::new(2);
        assert!(q.put(1, None).await);
        assert!(q.put(2, None).await);
        let evicted = q.put(3, Some(&|x: &i32| *x == 1)).await;
        assert!(evicted);
        assert_eq!(q.get().await.unwrap(), 2);
        assert_eq!(q.get().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn get_waits_until_item_available() {
        let q = Arc::new(BoundedQueue::<i32>::new(4));
        let q2 = q.clone();
        let getter = tokio::spawn(async move { q2.get().await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(q.put(42, None).await);

        let got = tokio::time::timeout(Duration::from_millis(500), getter)
            .await
            .expect("getter did not resolve")
            .unwrap()
            .unwrap();
        assert_eq!(got, 42);
    }

    #[tokio::test]
    async fn get_returns_closed_once_drained() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        assert!(q.put(1, None).await);
        q.close().await;
        assert_eq!(q.get().await.unwrap(), 1);
        assert_eq!(q.get().await, Err(QueueClosed));
    }

    #[tokio::test]
    async fn get_prefer_returns_matching_item_out_of_order() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        q.put(1, None).await;
        q.put(2, None).await;
        q.put(3, None).await;
        let got = q.get_prefer(|x| *x == 2).await.unwrap();
        assert_eq!(got, 2);
        assert_eq!(q.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn drop_where_removes_all_matches() {
        let q: BoundedQueue<i32> = BoundedQueue::new(8);
        for v in [1, 2, 3, 4, 5] {
            q.put(v, None).await;
        }
        let dropped = q.drop_where(|x| x % 2 == 0).await;
        assert_eq!(dropped, 2);
        assert_eq!(q.len().await, 3);
    }

    #[tokio::test]
    async fn evict_one_where_removes_single_match() {
        let q: BoundedQueue<i32> = BoundedQueue::new(8);
        q.put(1, None).await;
        q.put(1, None).await;
        assert!(q.evict_one_where(|x| *x == 1).await);
        assert_eq!(q.len().await, 1);
    }

    #[tokio::test]
    async fn wait_for_any_unblocks_on_matching_put() {
        let q = Arc::new(BoundedQueue::<i32>::new(4));
        let q2 = q.clone();
        let waiter = tokio::spawn(async move { q2.wait_for_any(|x| *x == 9).await });

        tokio::time::sleep(Duration::from_millis(20)).await;
        q.put(1, None).await;
        q.put(9, None).await;

        tokio::time::timeout(Duration::from_millis(500), waiter)
            .await
            .expect("waiter did not resolve")
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn closed_queue_rejects_put() {
        let q: BoundedQueue<i32> = BoundedQueue::new(4);
        q.close().await;
        assert!(!q.put(1, None).await);
    }
}
