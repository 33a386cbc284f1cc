//! Fixed-capacity FIFO with suspending put/get.

use parking_lot::Mutex;
use std::collections::VecDeque;
use tokio::sync::Notify;

/// A bounded FIFO queue.
///
/// `put` suspends while the queue is full and `get` suspends while it is
/// empty. Unlike a channel, either side can [`drain`](Self::drain) the queue,
/// which is what interruption needs. The lock is never held across an await.
#[derive(Debug)]
pub struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    not_empty: Notify,
    not_full: Notify,
}

impl<T> BoundedQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            not_empty: Notify::new(),
            not_full: Notify::new(),
        }
    }

    /// Maximum number of items.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current number of items.
    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    /// Whether the queue holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Append an item, suspending while the queue is full.
    pub async fn put(&self, item: T) {
        self.put_if(item, || true).await;
    }

    /// Append an item once there is room, provided `admit` still holds.
    ///
    /// `admit` is evaluated under the queue lock at the moment of insertion,
    /// so a concurrent [`drain`](Self::drain) either sees the item or the
    /// item is rejected. Returns `false` when the item was rejected.
    pub async fn put_if(&self, item: T, admit: impl Fn() -> bool) -> bool {
        loop {
            let notified = self.not_full.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut items = self.items.lock();
                if !admit() {
                    return false;
                }
                if items.len() < self.capacity {
                    items.push_back(item);
                    drop(items);
                    self.not_empty.notify_one();
                    return true;
                }
            }

            notified.await;
        }
    }

    /// Append an item without waiting. Returns it back when the queue is full.
    pub fn try_put(&self, item: T) -> Result<(), T> {
        let mut items = self.items.lock();
        if items.len() >= self.capacity {
            return Err(item);
        }
        items.push_back(item);
        drop(items);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Remove the oldest item, suspending while the queue is empty.
    pub async fn get(&self) -> T {
        loop {
            let notified = self.not_empty.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(item) = self.try_get() {
                return item;
            }

            notified.await;
        }
    }

    /// Remove the oldest item without waiting.
    pub fn try_get(&self) -> Option<T> {
        let item = self.items.lock().pop_front();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    /// Discard every queued item, waking all blocked producers.
    ///
    /// Returns the number of items discarded.
    pub fn drain(&self) -> usize {
        let drained = {
            let mut items = self.items.lock();
            let n = items.len();
            items.clear();
            n
        };
        self.not_full.notify_waiters();
        drained
    }
}
