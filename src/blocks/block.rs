//! Block values.
//!
//! A block is an address plus its decoded payload. Blocks are built per read
//! and are never mutated; a migration rewrites the stored bytes under the same
//! address without producing a new block identity.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use crate::blocks::address::BlockAddress;
use crate::blocks::codec::CodecError;
use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum BlockError {
    #[error("data did not match given hash: expected {expected}, computed {computed}")]
    HashMismatch {
        expected: BlockAddress,
        computed: BlockAddress,
    },

    #[error("block store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("invalid block address: {0}")]
    InvalidAddress(String),

    #[error("block could not be encoded for storage: {0}")]
    Codec(#[from] CodecError),
}

/// An immutable block of content.
#[derive(Clone, PartialEq, Eq)]
pub struct Block {
    address: BlockAddress,
    data: Bytes,
}

impl Block {
    /// Build a block from its payload, hashing it to get the address.
    pub fn new(data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            address: BlockAddress::for_content(&data),
            data,
        }
    }

    /// Build a block whose address is already known.
    ///
    /// With `verify` set the payload is re-hashed and a mismatch is an error.
    /// Skipping verification is only sound when the caller guarantees the
    /// pairing some other way.
    pub fn with_address(
        data: impl Into<Bytes>,
        address: BlockAddress,
        verify: bool,
    ) -> Result<Self, BlockError> {
        let data = data.into();
        if verify {
            let computed = BlockAddress::for_content(&data);
            if computed != address {
                return Err(BlockError::HashMismatch {
                    expected: address,
                    computed,
                });
            }
        }
        Ok(Self { address, data })
    }

    pub fn address(&self) -> &BlockAddress {
        &self.address
    }

    /// Decoded payload.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_data(self) -> Bytes {
        self.data
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("address", &self.address)
            .field("len", &self.data.len())
            .finish()
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Block {}]", self.address)
    }
}
