//! Wiring for a running block layer: classifier, materializer and workers
//! sharing one store.

use std::sync::Arc;

use crate::blocks::classifier::FrequencyClassifier;
use crate::blocks::codec::Codec;
use crate::blocks::materializer::BlockMaterializer;
use crate::blocks::promotion::{MigrationStatsSnapshot, Migrator, PromotionWorker};
use crate::config::Config;
use crate::metrics::BlockMetrics;
use crate::store::BlockStore;

pub struct BlockService {
    materializer: Arc<BlockMaterializer>,
    worker: PromotionWorker,
}

impl BlockService {
    /// Build the layer over `store` and spawn its workers.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(
        config: &Config,
        store: Arc<dyn BlockStore>,
        metrics: Arc<BlockMetrics>,
    ) -> Self {
        let classifier = Arc::new(FrequencyClassifier::new(&config.classifier));
        let codec = Codec::new(config.compression.clone());

        let migrator = Arc::new(Migrator::new(
            store.clone(),
            classifier.clone(),
            codec.clone(),
            config.compression.demote_algorithm,
            metrics.clone(),
        ));
        let locks = migrator.locks().clone();
        let worker = PromotionWorker::spawn(
            migrator,
            &config.promotion,
            config.classifier.demotion_floor,
        );

        let materializer = Arc::new(BlockMaterializer::new(
            store,
            classifier,
            codec,
            worker.queue(),
            locks,
            metrics,
            config.materializer.clone(),
        ));

        Self {
            materializer,
            worker,
        }
    }

    pub fn materializer(&self) -> &Arc<BlockMaterializer> {
        &self.materializer
    }

    pub fn migration_stats(&self) -> MigrationStatsSnapshot {
        self.worker.stats()
    }

    /// Stop the workers. The materializer stays usable; promotions requested
    /// afterwards are dropped.
    pub async fn shutdown(self) -> MigrationStatsSnapshot {
        self.worker.shutdown().await
    }
}
