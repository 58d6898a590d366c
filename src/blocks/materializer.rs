//! Block materializer: the read path.
//!
//! Turns stored bytes into [`Block`]s. Every read detects the stored
//! algorithm, decodes when needed, counts the access in the classifier, and
//! queues a promotion when a cold block crosses the threshold. Nothing here
//! waits on the promotion workers.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::blocks::address::BlockAddress;
use crate::blocks::block::{Block, BlockError};
use crate::blocks::classifier::FrequencyClassifier;
use crate::blocks::codec::{Algorithm, Codec, DecodeOutcome};
use crate::blocks::locks::AddressLocks;
use crate::blocks::promotion::{MigrationRequest, PromotionQueue};
use crate::config::MaterializerConfig;
use crate::metrics::{BlockMetrics, ReadPath};
use crate::store::BlockStore;

/// Where and how [`BlockMaterializer::put`] stored a payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredBlock {
    pub address: BlockAddress,
    pub algorithm: Algorithm,
    pub stored_len: usize,
}

pub struct BlockMaterializer {
    store: Arc<dyn BlockStore>,
    classifier: Arc<FrequencyClassifier>,
    codec: Codec,
    queue: PromotionQueue,
    locks: Arc<AddressLocks>,
    metrics: Arc<BlockMetrics>,
    config: MaterializerConfig,
}

impl BlockMaterializer {
    pub fn new(
        store: Arc<dyn BlockStore>,
        classifier: Arc<FrequencyClassifier>,
        codec: Codec,
        queue: PromotionQueue,
        locks: Arc<AddressLocks>,
        metrics: Arc<BlockMetrics>,
        config: MaterializerConfig,
    ) -> Self {
        Self {
            store,
            classifier,
            codec,
            queue,
            locks,
            metrics,
            config,
        }
    }

    /// Fetch, decode and classify the block at `address`.
    pub async fn get(&self, address: &BlockAddress) -> Result<Block, BlockError> {
        let stored = self.store.read(address).await?;
        self.materialize(Bytes::from(stored), *address, self.config.verify_on_read)
    }

    /// Build a block from stored bytes whose address is already known.
    ///
    /// With `verify` set the decoded payload must hash to `address`; a
    /// mismatch is returned as [`BlockError::HashMismatch`] and the access is
    /// not counted.
    pub fn materialize(
        &self,
        stored: Bytes,
        address: BlockAddress,
        verify: bool,
    ) -> Result<Block, BlockError> {
        let started = Instant::now();
        let decoded = self.codec.decode_or_passthrough(stored);

        let block = match Block::with_address(decoded.data, address, verify) {
            Ok(block) => block,
            Err(e) => {
                self.metrics.record_hash_mismatch();
                warn!(address = %address.short_hex(), error = %e, "Block verification failed");
                return Err(e);
            }
        };

        let path = match decoded.outcome {
            DecodeOutcome::Raw => {
                self.classifier.observe_hot(&address);
                ReadPath::Hot
            }
            DecodeOutcome::Decoded(_) => {
                let observation = self.classifier.observe_cold(&address);
                if observation.crossed_threshold {
                    self.request_promotion(address);
                }
                ReadPath::Cold
            }
            // Undecodable blocks are served verbatim but never migrated.
            DecodeOutcome::Failed(algorithm) => {
                self.metrics.record_decode_failure(algorithm);
                ReadPath::Corrupt
            }
        };

        self.metrics
            .record_read(path, started.elapsed().as_secs_f64());
        Ok(block)
    }

    fn request_promotion(&self, address: BlockAddress) {
        match self.queue.try_enqueue(MigrationRequest::promote(address)) {
            Ok(()) => {
                self.metrics.record_enqueued();
                debug!(address = %address.short_hex(), "Queued promotion");
            }
            Err(e) => {
                self.metrics.record_dropped();
                self.classifier.rearm(&address);
                debug!(error = %e, "Promotion request dropped");
            }
        }
    }

    /// Store a payload encoded with `algorithm`.
    ///
    /// The stored bytes always decode back to `payload`: a payload that would
    /// be misread when stored as requested is wrapped with the demotion
    /// algorithm instead. New blocks start unclassified.
    pub async fn put(&self, payload: &[u8], algorithm: Algorithm) -> Result<StoredBlock, BlockError> {
        let address = BlockAddress::for_content(payload);
        let (encoded, algorithm) = self.codec.encode_for_storage(payload, algorithm)?;
        self.store.write(&address, &encoded).await?;
        debug!(
            address = %address.short_hex(),
            %algorithm,
            raw = payload.len(),
            stored = encoded.len(),
            "Stored block"
        );
        Ok(StoredBlock {
            address,
            algorithm,
            stored_len: encoded.len(),
        })
    }

    /// Remove a block and forget its access counts.
    ///
    /// Waits for a migration of the same address to finish, so the migration
    /// cannot write the block back afterwards.
    pub async fn delete(&self, address: &BlockAddress) -> Result<bool, BlockError> {
        let _guard = self.locks.lock(address).await;
        let existed = self.store.delete(address).await?;
        self.classifier.remove(address);
        Ok(existed)
    }

    pub fn classifier(&self) -> &Arc<FrequencyClassifier> {
        &self.classifier
    }

    pub fn metrics(&self) -> &Arc<BlockMetrics> {
        &self.metrics
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::classifier::Temperature;
    use crate::config::ClassifierConfig;
    use crate::store::MemoryBlockStore;
    use tokio::sync::mpsc;

    fn materializer(
        threshold: u32,
        capacity: usize,
    ) -> (
        BlockMaterializer,
        Arc<MemoryBlockStore>,
        mpsc::Receiver<MigrationRequest>,
    ) {
        let store = Arc::new(MemoryBlockStore::new());
        let classifier = Arc::new(FrequencyClassifier::new(&ClassifierConfig {
            promotion_threshold: threshold,
            ..Default::default()
        }));
        let (queue, mut receivers) = PromotionQueue::channel(1, capacity);
        let m = BlockMaterializer::new(
            store.clone(),
            classifier,
            Codec::default(),
            queue,
            Arc::new(AddressLocks::new()),
            Arc::new(BlockMetrics::new().unwrap()),
            MaterializerConfig::default(),
        );
        (m, store, receivers.remove(0))
    }

    #[tokio::test]
    async fn test_zlib_block_decodes_and_counts_cold() {
        let (m, _store, _rx) = materializer(5, 8);
        let address = m.put(b"hello world", Algorithm::Zlib).await.unwrap().address;

        let block = m.get(&address).await.unwrap();
        assert_eq!(&block.data()[..], b"hello world");
        let entry = m.classifier().get(&address).unwrap();
        assert_eq!(entry.temperature, Temperature::Cold);
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn test_dropped_promotion_rearms() {
        let (m, _store, mut rx) = materializer(1, 1);
        let a = m.put(b"first", Algorithm::Zstd).await.unwrap().address;
        let b = m.put(b"second", Algorithm::Zstd).await.unwrap().address;

        m.get(&a).await.unwrap();
        m.get(&b).await.unwrap();

        assert_eq!(m.metrics().enqueued(), 1);
        assert_eq!(m.metrics().dropped(), 1);
        assert_eq!(m.classifier().get(&b).unwrap().count, 0);

        assert_eq!(rx.try_recv().unwrap(), MigrationRequest::promote(a));
        m.get(&b).await.unwrap();
        assert_eq!(rx.try_recv().unwrap(), MigrationRequest::promote(b));
    }

    #[tokio::test]
    async fn test_verify_rejects_wrong_address() {
        let (m, _store, _rx) = materializer(5, 8);
        let wrong = BlockAddress::for_content(b"something else");
        let err = m
            .materialize(Bytes::from_static(b"payload"), wrong, true)
            .unwrap_err();
        assert!(matches!(err, BlockError::HashMismatch { .. }));
        assert!(m.classifier().get(&wrong).is_none());
    }
}
