//! Backing block stores.
//!
//! The compression layer treats the store as an opaque content-addressed
//! key-value collaborator:
//! - [`memory`]: in-process map, for tests and embedding
//! - [`disk`]: one file per block under a sharded directory tree

pub mod disk;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::blocks::address::BlockAddress;

pub use disk::DiskBlockStore;
pub use memory::MemoryBlockStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("block not found: {0}")]
    NotFound(BlockAddress),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Content-addressed storage of block representations.
///
/// A write replaces the stored representation of `address` as a whole: a
/// reader sees either the previous bytes or the new ones, never a mix.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Read the stored bytes for `address`.
    async fn read(&self, address: &BlockAddress) -> Result<Vec<u8>, StoreError>;

    /// Replace the stored bytes for `address`.
    async fn write(&self, address: &BlockAddress, data: &[u8]) -> Result<(), StoreError>;

    async fn contains(&self, address: &BlockAddress) -> Result<bool, StoreError>;

    /// Delete a block. Returns `true` if it existed.
    async fn delete(&self, address: &BlockAddress) -> Result<bool, StoreError>;
}
