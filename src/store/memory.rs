use async_trait::async_trait;
use dashmap::DashMap;

use crate::blocks::address::BlockAddress;
use crate::store::{BlockStore, StoreError};

/// In-memory block store.
///
/// Each write replaces the whole value under its shard lock, so readers see
/// either the old or the new representation.
#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    blocks: DashMap<BlockAddress, Vec<u8>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Stored bytes without going through the async trait.
    pub fn raw(&self, address: &BlockAddress) -> Option<Vec<u8>> {
        self.blocks.get(address).map(|data| data.value().clone())
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn read(&self, address: &BlockAddress) -> Result<Vec<u8>, StoreError> {
        self.raw(address).ok_or(StoreError::NotFound(*address))
    }

    async fn write(&self, address: &BlockAddress, data: &[u8]) -> Result<(), StoreError> {
        self.blocks.insert(*address, data.to_vec());
        Ok(())
    }

    async fn contains(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        Ok(self.blocks.contains_key(address))
    }

    async fn delete(&self, address: &BlockAddress) -> Result<bool, StoreError> {
        Ok(self.blocks.remove(address).is_some())
    }
}
