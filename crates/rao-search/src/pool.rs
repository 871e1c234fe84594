//! Bounded pool of independent network copies for concurrent leaf evaluation.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, warn};

use rao_types::{Network, NetworkError};

/// Hands out at most `capacity` network copies at a time. Checking out
/// blocks while every copy is in use.
pub struct NetworkPool {
    base: Mutex<Box<dyn Network>>,
    sender: Sender<Box<dyn Network>>,
    receiver: Receiver<Box<dyn Network>>,
    capacity: usize,
    checkout_timeout: Duration,
    in_use: AtomicUsize,
    max_in_use: AtomicUsize,
}

impl NetworkPool {
    pub fn new(base: &dyn Network, capacity: usize, checkout_timeout: Duration) -> Arc<Self> {
        let capacity = capacity.max(1);
        let (sender, receiver) = bounded(capacity);
        for _ in 0..capacity {
            // the channel was sized for exactly this many copies
            let _ = sender.try_send(base.clone_boxed());
        }
        debug!(capacity, "network pool created");
        Arc::new(Self {
            base: Mutex::new(base.clone_boxed()),
            sender,
            receiver,
            capacity,
            checkout_timeout,
            in_use: AtomicUsize::new(0),
            max_in_use: AtomicUsize::new(0),
        })
    }

    /// Takes a copy out of the pool, waiting up to the checkout timeout.
    pub fn checkout(self: &Arc<Self>) -> Result<PooledNetwork, NetworkError> {
        let network = self
            .receiver
            .recv_timeout(self.checkout_timeout)
            .map_err(|e| match e {
                RecvTimeoutError::Timeout => NetworkError::PoolExhausted {
                    timeout_seconds: self.checkout_timeout.as_secs(),
                },
                RecvTimeoutError::Disconnected => NetworkError::PoolClosed,
            })?;
        let in_use = self.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_use.fetch_max(in_use, Ordering::SeqCst);
        Ok(PooledNetwork {
            network,
            pool: Arc::clone(self),
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn in_use(&self) -> usize {
        self.in_use.load(Ordering::SeqCst)
    }

    /// Highest number of copies held at the same time since creation.
    pub fn max_in_use(&self) -> usize {
        self.max_in_use.load(Ordering::SeqCst)
    }

    fn give_back(&self) {
        // returned copies were modified by their leaf; refill from the base
        let fresh = self.base.lock().clone_boxed();
        self.in_use.fetch_sub(1, Ordering::SeqCst);
        if self.sender.try_send(fresh).is_err() {
            warn!("network pool refused a returned copy");
        }
    }
}

/// A network copy checked out of a [`NetworkPool`]; dropping it hands a
/// fresh copy back to the pool.
pub struct PooledNetwork {
    network: Box<dyn Network>,
    pool: Arc<NetworkPool>,
}

impl Deref for PooledNetwork {
    type Target = dyn Network;

    fn deref(&self) -> &Self::Target {
        self.network.as_ref()
    }
}

impl DerefMut for PooledNetwork {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.network.as_mut()
    }
}

impl Drop for PooledNetwork {
    fn drop(&mut self) {
        self.pool.give_back();
    }
}

impl std::fmt::Debug for PooledNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledNetwork")
            .field("pool_in_use", &self.pool.in_use())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::MockNetwork;
    use rao_types::NetworkAction;
    use std::thread;

    #[test]
    fn checkout_and_release() {
        let pool = NetworkPool::new(&MockNetwork::new(), 2, Duration::from_secs(1));
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_eq!(pool.in_use(), 2);
        drop(a);
        assert_eq!(pool.in_use(), 1);
        drop(b);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.max_in_use(), 2);
    }

    #[test]
    fn exhausted_pool_times_out() {
        let pool = NetworkPool::new(&MockNetwork::new(), 1, Duration::from_millis(20));
        let _held = pool.checkout().unwrap();
        match pool.checkout() {
            Err(NetworkError::PoolExhausted { .. }) => (),
            other => panic!("expected exhausted pool, got {other:?}"),
        }
    }

    #[test]
    fn returned_copies_are_fresh() {
        let pool = NetworkPool::new(&MockNetwork::new(), 1, Duration::from_secs(1));
        {
            let mut network = pool.checkout().unwrap();
            network
                .apply_network_action(&NetworkAction::new("open-line"))
                .unwrap();
        }
        let network = pool.checkout().unwrap();
        let mock = network.as_any().downcast_ref::<MockNetwork>().unwrap();
        assert!(mock.applied_actions().is_empty());
    }

    #[test]
    fn never_exceeds_capacity_under_contention() {
        let pool = NetworkPool::new(&MockNetwork::new(), 3, Duration::from_secs(10));
        let handles: Vec<_> = (0..12)
            .map(|_| {
                let pool = Arc::clone(&pool);
                thread::spawn(move || {
                    let network = pool.checkout().unwrap();
                    assert!(pool.in_use() <= 3);
                    thread::sleep(Duration::from_millis(5));
                    drop(network);
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(pool.max_in_use() <= 3);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn zero_capacity_is_raised_to_one() {
        let pool = NetworkPool::new(&MockNetwork::new(), 0, Duration::from_secs(1));
        assert_eq!(pool.capacity(), 1);
        assert!(pool.checkout().is_ok());
    }
}
