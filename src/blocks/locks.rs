//! Per-address locks for operations that rewrite or remove stored blocks.
//!
//! A migration holds its address's lock from the store read through the
//! write and the classifier update; `delete` takes the same lock. Reads never
//! lock.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::blocks::address::BlockAddress;

#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: DashMap<BlockAddress, Arc<Mutex<()>>>,
}

/// Held lock for one address. The table entry goes away with the last holder.
pub struct AddressGuard<'a> {
    locks: &'a AddressLocks,
    address: BlockAddress,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `address`.
    pub async fn lock(&self, address: &BlockAddress) -> AddressGuard<'_> {
        let mutex = self.locks.entry(*address).or_default().clone();
        let guard = mutex.lock_owned().await;
        AddressGuard {
            locks: self,
            address: *address,
            guard: Some(guard),
        }
    }

    /// Addresses with a holder or waiter.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for AddressGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone, so a count of one means nobody else
        // wants this address.
        self.locks
            .locks
            .remove_if(&self.address, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_lock_excludes_and_cleans_up() {
        let locks = Arc::new(AddressLocks::new());
        let a = BlockAddress::for_content(b"a");

        let guard = locks.lock(&a).await;
        let contender = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.lock(&a).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(guard);
        contender.await.unwrap();
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_distinct_addresses_do_not_block() {
        let locks = AddressLocks::new();
        let _a = locks.lock(&BlockAddress::for_content(b"a")).await;
        let _b = locks.lock(&BlockAddress::for_content(b"b")).await;
        assert_eq!(locks.len(), 2);
    }
}
