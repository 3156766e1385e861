use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;

use crate::error::BrokerError;

/// Per-agent concurrency tokens, split into an available and a locked pool.
///
/// The send loop moves a token from available to locked before writing a request; the recv loop
/// moves one back for every response. Both pools are sized once when the agent connects.
pub(crate) struct TokenBucket {
    available: Semaphore,
    locked: AtomicUsize,
    capacity: usize,
}

impl TokenBucket {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            available: Semaphore::new(capacity),
            locked: AtomicUsize::new(0),
            capacity,
        }
    }

    /// Wait for an available token and lock it.
    pub(crate) async fn acquire(&self) -> Result<(), BrokerError> {
        let permit = self
            .available
            .acquire()
            .await
            .map_err(|_| BrokerError::ShuttingDown)?;
        permit.forget();
        self.locked.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Return one locked token to the available pool.
    pub(crate) fn release(&self) -> Result<(), BrokerError> {
        self.locked
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .map_err(|_| BrokerError::TokenImbalance)?;
        self.available.add_permits(1);
        Ok(())
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn locked(&self) -> usize {
        self.locked.load(Ordering::Acquire)
    }

    pub(crate) fn available(&self) -> usize {
        self.available.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn acquire_blocks_when_exhausted() {
        let bucket = TokenBucket::new(2);
        bucket.acquire().await.unwrap();
        bucket.acquire().await.unwrap();
        assert_eq!(bucket.locked(), 2);
        assert_eq!(bucket.available(), 0);

        assert!(
            timeout(Duration::from_millis(50), bucket.acquire())
                .await
                .is_err(),
            "third acquire must wait"
        );

        bucket.release().unwrap();
        timeout(Duration::from_secs(1), bucket.acquire())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bucket.locked(), 2);
    }

    #[test]
    fn release_without_lock_is_an_imbalance() {
        let bucket = TokenBucket::new(1);

        match bucket.release() {
            Err(BrokerError::TokenImbalance) => {}
            other => panic!("expected TokenImbalance, got {other:?}"),
        }
        assert_eq!(bucket.available(), 1, "imbalance must not mint tokens");
        assert_eq!(bucket.capacity(), 1);
    }
}
