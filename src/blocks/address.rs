//! Block addresses.
//!
//! A [`BlockAddress`] is the BLAKE3 digest of a block's decoded payload. It is
//! independent of how the block is currently stored, so a block keeps its
//! address across promotion and demotion.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::blocks::block::BlockError;

/// Stable, content-derived key for a block.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockAddress([u8; 32]);

impl BlockAddress {
    /// Derive the address of a decoded payload.
    pub fn for_content(data: &[u8]) -> Self {
        Self(*blake3::hash(data).as_bytes())
    }

    /// Wrap a digest computed elsewhere.
    pub fn from_digest(digest: [u8; 32]) -> Self {
        Self(digest)
    }

    /// The hash embedded in this address.
    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Whether `data` hashes to this address.
    pub fn matches(&self, data: &[u8]) -> bool {
        Self::for_content(data) == *self
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines.
    pub fn short_hex(&self) -> String {
        hex::encode(&self.0[..4])
    }

    /// Shard index for spreading work across `shards` buckets.
    pub fn shard(&self, shards: usize) -> usize {
        if shards <= 1 {
            return 0;
        }
        let mut prefix = [0u8; 8];
        prefix.copy_from_slice(&self.0[..8]);
        (u64::from_le_bytes(prefix) % shards as u64) as usize
    }
}

impl fmt::Debug for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlockAddress({})", self.short_hex())
    }
}

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for BlockAddress {
    type Err = BlockError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|e| BlockError::InvalidAddress(e.to_string()))?;
        let digest: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            BlockError::InvalidAddress(format!("expected 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(digest))
    }
}
