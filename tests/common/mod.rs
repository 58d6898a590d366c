//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Notify, Semaphore};

use hcd_blocks::blocks::address::BlockAddress;
use hcd_blocks::blocks::service::BlockService;
use hcd_blocks::config::{Config, ShutdownPolicy};
use hcd_blocks::metrics::BlockMetrics;
use hcd_blocks::store::{BlockStore, MemoryBlockStore, StoreError};

/// Memory store whose writes can be made to fail.
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryBlockStore,
    pub fail_writes: AtomicBool,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BlockStore for FlakyStore {
    async fn read(&self, address: &BlockAddress) -> Result<Vec<u8>, StoreError> {
        self.inner.read(address).await
    }

    async fn write(&self, address: &BlockAddress, data: &[u8]) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("injected write failure")));
        }
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.write(address, data).await
    }

    async fn contains(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        self.inner.contains(address).await
    }

    async fn delete(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        self.inner.delete(address).await
    }
}

/// Memory store whose writes can be held until the test releases them.
pub struct GatedStore {
    pub inner: MemoryBlockStore,
    gated: AtomicBool,
    gate: Semaphore,
    write_started: Notify,
}

impl GatedStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryBlockStore::new(),
            gated: AtomicBool::new(false),
            gate: Semaphore::new(0),
            write_started: Notify::new(),
        }
    }

    /// Hold every following write until [`GatedStore::release`].
    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    /// Wait until a write is parked at the gate.
    pub async fn write_started(&self) {
        self.write_started.notified().await;
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl BlockStore for GatedStore {
    async fn read(&self, address: &BlockAddress) -> Result<Vec<u8>, StoreError> {
        self.inner.read(address).await
    }

    async fn write(&self, address: &BlockAddress, data: &[u8]) -> Result<(), StoreError> {
        if self.gated.load(Ordering::SeqCst) {
            self.write_started.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.inner.write(address, data).await
    }

    async fn contains(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        self.inner.contains(address).await
    }

    async fn delete(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        self.inner.delete(address).await
    }
}

/// Config with a small threshold and draining shutdown, so tests can wait
/// for queued work by shutting the service down.
pub fn test_config(threshold: u32) -> Config {
    let mut config = Config::default();
    config.classifier.promotion_threshold = threshold;
    config.promotion.shutdown = ShutdownPolicy::Drain;
    config.store.in_memory = true;
    config
}

pub fn start(config: &Config, store: Arc<dyn BlockStore>) -> BlockService {
    BlockService::start(config, store, Arc::new(BlockMetrics::new().unwrap()))
}
