use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A bounded FIFO shared between async tasks.
///
/// `offer` and `poll` wait up to a timeout instead of blocking forever. The
/// internal lock is never held across an await.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Append without waiting. Hands the item back when the queue is full.
    pub fn try_offer(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.not_empty.notify_waiters();
        Ok(())
    }

    /// Append, waiting up to `timeout` for space. Hands the item back on timeout.
    pub async fn offer(&self, mut item: T, timeout: Duration) -> Result<(), T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            match self.try_offer(item) {
                Ok(()) => return Ok(()),
                Err(back) => item = back,
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_offer(item);
            }
        }
    }

    /// Remove the head without waiting.
    pub fn pop_front(&self) -> Option<T> {
        let item = self.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_waiters();
        }
        item
    }

    /// Remove the head, waiting up to `timeout` for one to arrive.
    pub async fn poll(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.pop_front() {
                return Some(item);
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.pop_front();
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> BoundedQueue<T> {
    /// Clone of the head, leaving it in place.
    pub fn peek(&self) -> Option<T> {
        self.lock().front().cloned()
    }

    /// Clone of every queued item, head first.
    pub fn snapshot(&self) -> Vec<T> {
        self.lock().iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = BoundedQueue::new(4);
        for i in 0..3 {
            queue.offer(i, Duration::from_millis(10)).await.unwrap();
        }
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(0));
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(1));
        assert_eq!(queue.poll(Duration::from_millis(10)).await, Some(2));
        assert_eq!(queue.poll(Duration::from_millis(10)).await, None);
    }

    #[tokio::test]
    async fn test_offer_times_out_when_full() {
        let queue = BoundedQueue::new(1);
        queue.offer("a", Duration::from_millis(10)).await.unwrap();

        let start = Instant::now();
        let rejected = queue.offer("b", Duration::from_millis(30)).await;
        assert_eq!(rejected, Err("b"));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert_eq!(queue.len(), 1);
    }

    #[tokio::test]
    async fn test_offer_waits_for_space() {
        let queue = Arc::new(BoundedQueue::new(1));
        queue.offer(1, Duration::from_millis(10)).await.unwrap();

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.pop_front()
            })
        };

        queue.offer(2, Duration::from_secs(5)).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Some(1));
        assert_eq!(queue.snapshot(), vec![2]);
    }

    #[tokio::test]
    async fn test_poll_waits_for_item() {
        let queue = Arc::new(BoundedQueue::new(2));

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                queue.try_offer(7).unwrap();
            })
        };

        assert_eq!(queue.poll(Duration::from_secs(5)).await, Some(7));
        producer.await.unwrap();
    }

    #[test]
    fn test_peek_leaves_head_in_place() {
        let queue = BoundedQueue::new(2);
        queue.try_offer(1).unwrap();
        queue.try_offer(2).unwrap();
        assert_eq!(queue.try_offer(3), Err(3));

        assert_eq!(queue.peek(), Some(1));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop_front(), Some(1));
        assert_eq!(queue.peek(), Some(2));
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let queue: BoundedQueue<u8> = BoundedQueue::new(0);
        assert_eq!(queue.capacity(), 1);
    }
}
