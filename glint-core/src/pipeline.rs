//! Bounded hand-off queues between pipeline stages.
//!
//! Stages (capture, encode, decode, display pacing) exchange items
//! through queues of capacity 1–3. A producer hitting a full queue
//! displaces the oldest pending item instead of blocking: for a live
//! stream, a stale frame is worse than a dropped one.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Notify;

struct Inner<T> {
    queue: std::sync::Mutex<QueueState<T>>,
    notify: Notify,
    dropped: AtomicU64,
}

struct QueueState<T> {
    items: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// A bounded, oldest-dropping hand-off queue. Cloned handles share the
/// same queue; any handle may push, pop, or close.
pub struct HandoffQueue<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for HandoffQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> HandoffQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: std::sync::Mutex::new(QueueState {
                    items: VecDeque::with_capacity(capacity.max(1)),
                    capacity: capacity.max(1),
                    closed: false,
                }),
                notify: Notify::new(),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Push an item, never blocking. Returns the displaced oldest item
    /// when the queue was full.
    pub fn push(&self, item: T) -> Option<T> {
        let displaced = {
            let mut state = self.inner.queue.lock().expect("handoff queue poisoned");
            if state.closed {
                return Some(item);
            }
            let displaced = if state.items.len() >= state.capacity {
                state.items.pop_front()
            } else {
                None
            };
            state.items.push_back(item);
            displaced
        };
        if displaced.is_some() {
            self.inner.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.notify.notify_one();
        displaced
    }

    /// Take the next item without waiting.
    pub fn try_pop(&self) -> Option<T> {
        let mut state = self.inner.queue.lock().expect("handoff queue poisoned");
        state.items.pop_front()
    }

    /// Wait for the next item. Returns `None` once the queue is closed
    /// and drained.
    pub async fn pop(&self) -> Option<T> {
        loop {
            {
                let mut state = self.inner.queue.lock().expect("handoff queue poisoned");
                if let Some(item) = state.items.pop_front() {
                    return Some(item);
                }
                if state.closed {
                    return None;
                }
            }
            self.inner.notify.notified().await;
        }
    }

    /// Close the queue: pending items stay poppable, further pushes are
    /// refused, waiting consumers wake up.
    pub fn close(&self) {
        {
            let mut state = self.inner.queue.lock().expect("handoff queue poisoned");
            state.closed = true;
        }
        self.inner.notify.notify_waiters();
        self.inner.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.queue.lock().expect("handoff queue poisoned").closed
    }

    pub fn len(&self) -> usize {
        self.inner.queue.lock().expect("handoff queue poisoned").items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items displaced by full-queue pushes so far.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn push_displaces_oldest_when_full() {
        let q = HandoffQueue::new(2);
        assert!(q.push(1).is_none());
        assert!(q.push(2).is_none());
        assert_eq!(q.push(3), Some(1));
        assert_eq!(q.dropped(), 1);
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), Some(3));
    }

    #[tokio::test]
    async fn pop_waits_for_push() {
        let q = HandoffQueue::new(2);
        let consumer = q.clone();
        let handle = tokio::spawn(async move { consumer.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.push(42);
        assert_eq!(handle.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer() {
        let q: HandoffQueue<u32> = HandoffQueue::new(1);
        let consumer = q.clone();
        let handle = tokio::spawn(async move { consumer.pop().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        q.close();
        assert_eq!(handle.await.unwrap(), None);
    }

    #[tokio::test]
    async fn close_drains_pending_items_first() {
        let q = HandoffQueue::new(2);
        q.push(1);
        q.close();
        assert_eq!(q.pop().await, Some(1));
        assert_eq!(q.pop().await, None);
        // Pushes after close are refused.
        assert_eq!(q.push(2), Some(2));
    }
}
