//! Bounded FIFO queue shared between two pipeline stages.
//!
//! Unlike a plain `mpsc` channel, a [`StageQueue`] can be drained by a third
//! party: the pipeline controller empties every queue on pause while the
//! producer and consumer tasks keep their handles.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Notify;

struct Shared<T> {
    name: &'static str,
    capacity: usize,
    items: Mutex<VecDeque<T>>,
    /// Signalled when an item is pushed.
    item_ready: Notify,
    /// Signalled when space is freed.
    space_ready: Notify,
}

/// Multi-producer multi-consumer bounded queue.
pub struct StageQueue<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for StageQueue<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> std::fmt::Debug for StageQueue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageQueue")
            .field("name", &self.shared.name)
            .field("len", &self.len())
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

impl<T> StageQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(name: &'static str, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            shared: Arc::new(Shared {
                name,
                capacity,
                items: Mutex::new(VecDeque::with_capacity(capacity)),
                item_ready: Notify::new(),
                space_ready: Notify::new(),
            }),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<T>> {
        self.shared
            .items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue name used in logs.
    pub fn name(&self) -> &'static str {
        self.shared.name
    }

    /// Maximum number of queued items.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of queued items.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append an item, waiting while the queue is full.
    ///
    /// Cancel-safe: if the future is dropped before completion the item is
    /// dropped with it and the queue is unchanged.
    pub async fn send(&self, value: T) {
        loop {
            let space = self.shared.space_ready.notified();
            tokio::pin!(space);
            space.as_mut().enable();
            {
                let mut items = self.lock();
                if items.len() < self.shared.capacity {
                    items.push_back(value);
                    drop(items);
                    self.shared.item_ready.notify_one();
                    return;
                }
            }
            space.await;
        }
    }

    /// Append an item without waiting. When the queue is full the oldest
    /// item is evicted and returned.
    pub fn push_evicting(&self, value: T) -> Option<T> {
        let evicted = {
            let mut items = self.lock();
            let evicted = if items.len() >= self.shared.capacity {
                items.pop_front()
            } else {
                None
            };
            items.push_back(value);
            evicted
        };
        self.shared.item_ready.notify_one();
        evicted
    }

    /// Pop the oldest item if one is queued.
    pub fn try_recv(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.shared.space_ready.notify_one();
        }
        item
    }

    /// Wait for and pop the oldest item.
    ///
    /// Cancel-safe: an item is only removed when the future completes.
    pub async fn recv(&self) -> T {
        loop {
            let ready = self.shared.item_ready.notified();
            tokio::pin!(ready);
            ready.as_mut().enable();
            if let Some(item) = self.try_recv() {
                return item;
            }
            ready.await;
        }
    }

    /// Remove and drop every queued item, returning how many were removed.
    pub fn drain(&self) -> usize {
        let removed = {
            let mut items = self.lock();
            let n = items.len();
            items.clear();
            n
        };
        if removed > 0 {
            self.shared.space_ready.notify_waiters();
        }
        removed
    }

    /// Remove and return every queued item in FIFO order.
    pub fn take_all(&self) -> Vec<T> {
        let taken: Vec<T> = self.lock().drain(..).collect();
        if !taken.is_empty() {
            self.shared.space_ready.notify_waiters();
        }
        taken
    }
}

/// Type-erased view of a queue, used by the controller to flush on pause.
pub trait Drainable: Send + Sync {
    /// Queue name used in logs.
    fn name(&self) -> &'static str;
    /// Remove every queued item, returning the count.
    fn drain(&self) -> usize;
}

impl<T: Send> Drainable for StageQueue<T> {
    fn name(&self) -> &'static str {
        StageQueue::name(self)
    }

    fn drain(&self) -> usize {
        StageQueue::drain(self)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn preserves_fifo_order() {
        let q = StageQueue::new("test", 8);
        for i in 0..5 {
            q.send(i).await;
        }
        let mut out = Vec::new();
        for _ in 0..5 {
            out.push(q.recv().await);
        }
        assert_eq!(out, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn send_waits_for_space() {
        let q = StageQueue::new("test", 1);
        q.send(1).await;

        let producer = q.clone();
        let handle = tokio::spawn(async move {
            producer.send(2).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(q.len(), 1);
        assert!(!handle.is_finished());

        assert_eq!(q.recv().await, 1);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q.recv().await, 2);
    }

    #[tokio::test]
    async fn drain_releases_blocked_producer() {
        let q = StageQueue::new("test", 1);
        q.send(1).await;

        let producer = q.clone();
        let handle = tokio::spawn(async move {
            producer.send(2).await;
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(q.drain(), 1);
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(q.try_recv(), Some(2));
        assert!(q.is_empty());
    }

    #[tokio::test]
    async fn recv_wakes_on_push() {
        let q: StageQueue<u32> = StageQueue::new("test", 4);
        let consumer = q.clone();
        let handle = tokio::spawn(async move { consumer.recv().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.send(7).await;
        let got = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got, 7);
    }

    #[tokio::test]
    async fn cancelled_recv_loses_nothing() {
        let q: StageQueue<u32> = StageQueue::new("test", 4);
        let res = tokio::time::timeout(Duration::from_millis(10), q.recv()).await;
        assert!(res.is_err());
        q.send(9).await;
        assert_eq!(q.recv().await, 9);
    }

    #[test]
    fn push_evicting_drops_oldest() {
        let q = StageQueue::new("echo", 2);
        assert_eq!(q.push_evicting(1), None);
        assert_eq!(q.push_evicting(2), None);
        assert_eq!(q.push_evicting(3), Some(1));
        assert_eq!(q.take_all(), vec![2, 3]);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let q: StageQueue<u8> = StageQueue::new("tiny", 0);
        assert_eq!(q.capacity(), 1);
    }

    #[test]
    fn drainable_trait_object() {
        let q = StageQueue::new("sentences", 4);
        q.push_evicting("a");
        q.push_evicting("b");
        let erased: Box<dyn Drainable> = Box::new(q.clone());
        assert_eq!(erased.name(), "sentences");
        assert_eq!(erased.drain(), 2);
        assert!(q.is_empty());
    }
}
