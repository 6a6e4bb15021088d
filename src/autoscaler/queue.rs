//! Deduplicating work queue keyed by target
//!
//! Ticking is periodic but scaling blocks, so enqueues for the same key
//! must collapse: a key already pending is not queued twice, and a key
//! re-added while in flight is re-scheduled exactly once after its
//! current processing finishes. Items are never re-queued on failure;
//! the next tick re-drives the decision.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use tokio::sync::Notify;

#[derive(Default)]
struct QueueInner {
    queue: VecDeque<String>,
    /// Keys awaiting processing (queued, or in flight and re-added)
    dirty: HashSet<String>,
    /// Keys currently being processed by a worker
    processing: HashSet<String>,
    shut_down: bool,
}

/// Thread-safe dedup queue with the add / get / done discipline.
#[derive(Default)]
pub struct WorkQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue `key` unless it is already pending. A key in flight is
    /// marked dirty and re-queued when its worker calls [`Self::done`].
    pub fn add(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.shut_down || inner.dirty.contains(key) {
            return;
        }
        inner.dirty.insert(key.to_string());
        if !inner.processing.contains(key) {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Wait for the next key. Returns `None` once the queue is shut down
    /// and drained.
    pub async fn get(&self) -> Option<String> {
        loop {
            // Register for wakeups before the emptiness check, so a
            // notify between check and await is not lost.
            let mut wait = std::pin::pin!(self.notify.notified());
            wait.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap();
                if let Some(key) = inner.queue.pop_front() {
                    inner.processing.insert(key.clone());
                    inner.dirty.remove(&key);
                    return Some(key);
                }
                if inner.shut_down {
                    return None;
                }
            }
            wait.await;
        }
    }

    /// Mark `key` as processed. If it was re-added while in flight it is
    /// queued again, once.
    pub fn done(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.processing.remove(key);
        if inner.dirty.contains(key) && !inner.shut_down {
            inner.queue.push_back(key.to_string());
            drop(inner);
            self.notify.notify_one();
        }
    }

    /// Stop accepting work and wake all waiting workers. Queued items
    /// are still handed out so in-progress keys drain.
    pub fn shut_down(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.shut_down = true;
        drop(inner);
        self.notify.notify_waiters();
    }

    /// Number of keys currently queued (excluding in-flight ones).
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_add_get_done() {
        let q = WorkQueue::new();
        q.add("a");
        assert_eq!(q.get().await.as_deref(), Some("a"));
        q.done("a");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_pending_duplicates_collapse() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("a");
        q.add("a");
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("a"));
        q.done("a");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_readd_requeues_once() {
        let q = WorkQueue::new();
        q.add("a");
        let key = q.get().await.unwrap();
        // Re-added N times while in flight: exactly one extra processing.
        q.add("a");
        q.add("a");
        q.add("a");
        assert_eq!(q.len(), 0, "in-flight key must not be queued yet");
        q.done(&key);
        assert_eq!(q.len(), 1);
        assert_eq!(q.get().await.as_deref(), Some("a"));
        q.done("a");
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_keys_independent() {
        let q = WorkQueue::new();
        q.add("a");
        q.add("b");
        assert_eq!(q.len(), 2);
        let first = q.get().await.unwrap();
        let second = q.get().await.unwrap();
        assert_eq!(first, "a");
        assert_eq!(second, "b");
    }

    #[tokio::test]
    async fn test_get_blocks_until_add() {
        let q = Arc::new(WorkQueue::new());
        let q2 = q.clone();
        let handle = tokio::spawn(async move { q2.get().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!handle.is_finished());
        q.add("a");
        let got = handle.await.unwrap();
        assert_eq!(got.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_shutdown_wakes_waiters() {
        let q = Arc::new(WorkQueue::new());
        let mut handles = Vec::new();
        for _ in 0..4 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.get().await }));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        q.shut_down();
        for h in handles {
            assert_eq!(h.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let q = WorkQueue::new();
        q.shut_down();
        q.add("a");
        assert!(q.is_empty());
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_shutdown_drains_queued_items() {
        let q = WorkQueue::new();
        q.add("a");
        q.shut_down();
        assert_eq!(q.get().await.as_deref(), Some("a"));
        q.done("a");
        assert_eq!(q.get().await, None);
    }

    #[tokio::test]
    async fn test_concurrent_adds_single_processing() {
        let q = Arc::new(WorkQueue::new());
        let mut handles = Vec::new();
        for _ in 0..32 {
            let q = q.clone();
            handles.push(tokio::spawn(async move { q.add("a") }));
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(q.len(), 1);
    }
}
