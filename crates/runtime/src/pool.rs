use std::collections::VecDeque;
use std::fmt;
use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PoolClosed;

impl fmt::Display for PoolClosed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool is closed")
    }
}

impl std::error::Error for PoolClosed {}

struct Shared<T> {
    permits: Arc<Semaphore>,
    items: Mutex<VecDeque<T>>,
}

/// Fixed-size pool of pre-built items with exclusive checkout.
///
/// One semaphore permit exists per idle item. Tokio's semaphore is fair, so
/// waiters are served in arrival order, and items leave the queue oldest
/// first.
pub struct Pool<T> {
    shared: Arc<Shared<T>>,
    capacity: usize,
}

impl<T> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
            capacity: self.capacity,
        }
    }
}

impl<T> Pool<T> {
    pub fn new(items: Vec<T>) -> Self {
        let capacity = items.len();
        Self {
            shared: Arc::new(Shared {
                permits: Arc::new(Semaphore::new(capacity)),
                items: Mutex::new(items.into()),
            }),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Items currently idle in the queue.
    pub fn available(&self) -> usize {
        self.shared.items.lock().len()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.permits.is_closed()
    }

    /// Waits for an idle item and takes it exclusively until the guard drops.
    pub async fn checkout(&self) -> Result<Pooled<T>, PoolClosed> {
        let permit = self
            .shared
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| PoolClosed)?;
        self.take(permit)
    }

    pub fn try_checkout(&self) -> Option<Pooled<T>> {
        let permit = self.shared.permits.clone().try_acquire_owned().ok()?;
        self.take(permit).ok()
    }

    fn take(&self, permit: OwnedSemaphorePermit) -> Result<Pooled<T>, PoolClosed> {
        // A permit is only available while its item is queued.
        let item = self.shared.items.lock().pop_front().ok_or(PoolClosed)?;
        Ok(Pooled {
            item: ManuallyDrop::new(item),
            shared: self.shared.clone(),
            _permit: permit,
        })
    }

    /// Waits for every outstanding checkout to come back, then closes the
    /// pool and hands all items to the caller for teardown.
    pub async fn close(&self) -> Vec<T> {
        let all = u32::try_from(self.capacity).unwrap_or(u32::MAX);
        let held = self.shared.permits.acquire_many(all).await;
        self.shared.permits.close();
        drop(held);
        self.shared.items.lock().drain(..).collect()
    }
}

impl<T> fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("capacity", &self.capacity)
            .field("available", &self.available())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Exclusive handle to a pooled item. Dropping it, on success, error or
/// unwind, puts the item back at the end of the queue.
pub struct Pooled<T> {
    item: ManuallyDrop<T>,
    shared: Arc<Shared<T>>,
    // Released after the item is queued again.
    _permit: OwnedSemaphorePermit,
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.item
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.item
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        // SAFETY: `item` is taken exactly once, here, and never touched again.
        let item = unsafe { ManuallyDrop::take(&mut self.item) };
        self.shared.items.lock().push_back(item);
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Pooled").field(&*self.item).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Pool, PoolClosed};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn checkout_is_fifo_and_returns_on_drop() {
        let pool = Pool::new(vec![1, 2, 3]);
        {
            let a = pool.checkout().await.unwrap();
            let b = pool.checkout().await.unwrap();
            assert_eq!((*a, *b), (1, 2));
            assert_eq!(pool.available(), 1);
        }
        assert_eq!(pool.available(), 3);

        // Returned items queue behind the one never taken.
        let next = pool.checkout().await.unwrap();
        assert_eq!(*next, 3);
    }

    #[tokio::test]
    async fn extra_checkout_waits_for_a_return() {
        let pool = Pool::new(vec!["only"]);
        let held = pool.checkout().await.unwrap();
        assert!(pool.try_checkout().is_none());

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { *pool.checkout().await.unwrap() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(held);
        assert_eq!(waiter.await.unwrap(), "only");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_never_exceeds_capacity() {
        let pool = Pool::new(vec![(); 3]);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..24 {
            let pool = pool.clone();
            let active = active.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                let _item = pool.checkout().await.unwrap();
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(2)).await;
                active.fetch_sub(1, Ordering::SeqCst);
                if i % 5 == 0 {
                    return Err("render failed");
                }
                Ok(())
            }));
        }
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(pool.available(), 3);
    }

    #[tokio::test]
    async fn item_returns_after_a_panicking_holder() {
        let pool = Pool::new(vec![7u8]);
        let handle = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let _item = pool.checkout().await.unwrap();
                panic!("holder failed");
            })
        };
        assert!(handle.await.is_err());
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn close_waits_for_outstanding_items() {
        let pool = Pool::new(vec![1, 2]);
        let held = pool.checkout().await.unwrap();

        let closer = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.close().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closer.is_finished());

        drop(held);
        let mut drained = closer.await.unwrap();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(pool.is_closed());
        assert_eq!(pool.checkout().await.unwrap_err(), PoolClosed);
    }
}
