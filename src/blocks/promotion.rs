//! Promotion queue and migration workers.
//!
//! The read path hands addresses that crossed the promotion threshold to a
//! [`PromotionQueue`] without ever waiting on it. A small pool of workers
//! drains the queue and rewrites stored representations through a
//! [`Migrator`]: promotion stores the decoded bytes, demotion stores them
//! re-encoded. Requests are routed to workers by address, so migrations of
//! the same address never run concurrently.
//!
//! Migration is an optimisation. Every failure is logged and counted, the
//! previous representation stays in place, and the classifier is rearmed so
//! a later run of reads can request it again.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::blocks::address::BlockAddress;
use crate::blocks::classifier::{FrequencyClassifier, Temperature};
use crate::blocks::codec::{detect, Algorithm, Codec};
use crate::blocks::locks::AddressLocks;
use crate::config::{PromotionConfig, ShutdownPolicy};
use crate::metrics::BlockMetrics;
use crate::store::BlockStore;

/// Which way a block moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Cold to hot: store decoded.
    Promote,
    /// Hot to cold: store encoded.
    Demote,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Promote => "promote",
            Direction::Demote => "demote",
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A queued migration. Carries no payload: the worker re-reads the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationRequest {
    pub address: BlockAddress,
    pub direction: Direction,
}

impl MigrationRequest {
    pub fn promote(address: BlockAddress) -> Self {
        Self {
            address,
            direction: Direction::Promote,
        }
    }

    pub fn demote(address: BlockAddress) -> Self {
        Self {
            address,
            direction: Direction::Demote,
        }
    }
}

/// What a worker did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The stored representation was rewritten.
    Migrated,
    /// Already in the target representation; nothing written.
    Skipped,
    /// Left untouched after a store or codec error.
    Failed,
    /// Dropped unprocessed at shutdown.
    Discarded,
}

impl MigrationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationOutcome::Migrated => "migrated",
            MigrationOutcome::Skipped => "skipped",
            MigrationOutcome::Failed => "failed",
            MigrationOutcome::Discarded => "discarded",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PromotionError {
    #[error("promotion queue saturated, dropped request for {0}")]
    ChannelSaturated(BlockAddress),

    #[error("promotion queue closed, dropped request for {0}")]
    ChannelClosed(BlockAddress),
}

/// Producer side of the promotion queue.
///
/// One bounded channel per worker; an address always maps to the same one.
#[derive(Debug, Clone)]
pub struct PromotionQueue {
    shards: Arc<[mpsc::Sender<MigrationRequest>]>,
}

impl PromotionQueue {
    /// Create `shards` bounded channels of `capacity` each.
    pub fn channel(
        shards: usize,
        capacity: usize,
    ) -> (Self, Vec<mpsc::Receiver<MigrationRequest>>) {
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..shards.max(1))
            .map(|_| mpsc::channel(capacity.max(1)))
            .unzip();
        (
            Self {
                shards: senders.into(),
            },
            receivers,
        )
    }

    /// Enqueue without waiting. A full or closed queue drops the request.
    pub fn try_enqueue(&self, request: MigrationRequest) -> Result<(), PromotionError> {
        let shard = request.address.shard(self.shards.len());
        self.shards[shard].try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(r) => PromotionError::ChannelSaturated(r.address),
            mpsc::error::TrySendError::Closed(r) => PromotionError::ChannelClosed(r.address),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }
}

/// Running totals of worker outcomes.
#[derive(Debug, Default)]
pub struct MigrationStats {
    promoted: AtomicU64,
    demoted: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MigrationStatsSnapshot {
    pub promoted: u64,
    pub demoted: u64,
    pub skipped: u64,
    pub failed: u64,
    pub discarded: u64,
}

impl MigrationStats {
    fn record(&self, direction: Direction, outcome: MigrationOutcome) {
        let counter = match (outcome, direction) {
            (MigrationOutcome::Migrated, Direction::Promote) => &self.promoted,
            (MigrationOutcome::Migrated, Direction::Demote) => &self.demoted,
            (MigrationOutcome::Skipped, _) => &self.skipped,
            (MigrationOutcome::Failed, _) => &self.failed,
            (MigrationOutcome::Discarded, _) => &self.discarded,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MigrationStatsSnapshot {
        MigrationStatsSnapshot {
            promoted: self.promoted.load(Ordering::Relaxed),
            demoted: self.demoted.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            discarded: self.discarded.load(Ordering::Relaxed),
        }
    }
}

/// Rewrites stored block representations.
pub struct Migrator {
    store: Arc<dyn BlockStore>,
    classifier: Arc<FrequencyClassifier>,
    codec: Codec,
    demote_algorithm: Algorithm,
    metrics: Arc<BlockMetrics>,
    locks: Arc<AddressLocks>,
    stats: MigrationStats,
}

impl Migrator {
    pub fn new(
        store: Arc<dyn BlockStore>,
        classifier: Arc<FrequencyClassifier>,
        codec: Codec,
        demote_algorithm: Algorithm,
        metrics: Arc<BlockMetrics>,
    ) -> Self {
        Self {
            store,
            classifier,
            codec,
            demote_algorithm,
            metrics,
            locks: Arc::new(AddressLocks::new()),
            stats: MigrationStats::default(),
        }
    }

    pub fn stats(&self) -> MigrationStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn classifier(&self) -> &Arc<FrequencyClassifier> {
        &self.classifier
    }

    /// Locks a migration holds while it rewrites a block. Anything else that
    /// rewrites or removes stored blocks must take them too.
    pub fn locks(&self) -> &Arc<AddressLocks> {
        &self.locks
    }

    /// Handle one request against the current stored bytes.
    pub async fn migrate(&self, request: MigrationRequest) -> MigrationOutcome {
        let _guard = self.locks.lock(&request.address).await;
        let outcome = match request.direction {
            Direction::Promote => self.promote(&request.address).await,
            Direction::Demote => self.demote(&request.address).await,
        };

        if outcome == MigrationOutcome::Failed {
            self.classifier.rearm(&request.address);
        }
        self.record(request.direction, outcome);
        outcome
    }

    fn record(&self, direction: Direction, outcome: MigrationOutcome) {
        self.stats.record(direction, outcome);
        self.metrics.record_migration(direction, outcome);
    }

    async fn promote(&self, address: &BlockAddress) -> MigrationOutcome {
        let stored = match self.store.read(address).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(address = %address.short_hex(), error = %e, "Promotion read failed");
                return MigrationOutcome::Failed;
            }
        };

        let algorithm = detect(&stored);
        if !algorithm.is_compressed() {
            if self.classifier.temperature_of(address) != Some(Temperature::Hot) {
                self.classifier.reset_and_move_to_hot(address);
            }
            debug!(address = %address.short_hex(), "Block already stored raw");
            return MigrationOutcome::Skipped;
        }

        let decoded = match self.codec.decode(&stored, algorithm) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(address = %address.short_hex(), %algorithm, error = %e, "Promotion decode failed");
                return MigrationOutcome::Failed;
            }
        };

        // Never replace stored bytes with a payload that is not this block.
        if !address.matches(&decoded) {
            warn!(address = %address.short_hex(), %algorithm, "Decoded payload does not match address");
            return MigrationOutcome::Failed;
        }

        // Stored raw, this payload would be decoded again by every read.
        if detect(&decoded).is_compressed() {
            debug!(address = %address.short_hex(), %algorithm, "Payload carries a signature, keeping it encoded");
            return MigrationOutcome::Skipped;
        }

        if let Err(e) = self.store.write(address, &decoded).await {
            warn!(address = %address.short_hex(), error = %e, "Promotion write failed");
            return MigrationOutcome::Failed;
        }

        self.classifier.reset_and_move_to_hot(address);
        debug!(
            address = %address.short_hex(),
            %algorithm,
            stored = stored.len(),
            decoded = decoded.len(),
            "Promoted block"
        );
        MigrationOutcome::Migrated
    }

    async fn demote(&self, address: &BlockAddress) -> MigrationOutcome {
        if !self.demote_algorithm.is_compressed() {
            return MigrationOutcome::Skipped;
        }

        let stored = match self.store.read(address).await {
            Ok(stored) => stored,
            Err(e) => {
                warn!(address = %address.short_hex(), error = %e, "Demotion read failed");
                return MigrationOutcome::Failed;
            }
        };

        if detect(&stored).is_compressed() {
            if self.classifier.temperature_of(address) == Some(Temperature::Hot) {
                self.classifier.reset_and_move_to_cold(address);
            }
            debug!(address = %address.short_hex(), "Block already stored compressed");
            return MigrationOutcome::Skipped;
        }

        let algorithm = self.demote_algorithm;
        let encoded = match self.codec.encode(&stored, algorithm) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!(address = %address.short_hex(), %algorithm, error = %e, "Demotion encode failed");
                return MigrationOutcome::Failed;
            }
        };

        // Readers must be able to recognise what we write.
        if detect(&encoded) != algorithm {
            warn!(address = %address.short_hex(), %algorithm, "Encoded stream is not detectable");
            return MigrationOutcome::Failed;
        }

        if let Err(e) = self.store.write(address, &encoded).await {
            warn!(address = %address.short_hex(), error = %e, "Demotion write failed");
            return MigrationOutcome::Failed;
        }

        self.classifier.reset_and_move_to_cold(address);
        debug!(
            address = %address.short_hex(),
            %algorithm,
            raw = stored.len(),
            encoded = encoded.len(),
            "Demoted block"
        );
        MigrationOutcome::Migrated
    }

    fn discard(&self, request: MigrationRequest) {
        self.record(request.direction, MigrationOutcome::Discarded);
    }
}

/// Handle to the running worker pool and demotion sweeper.
pub struct PromotionWorker {
    queue: PromotionQueue,
    migrator: Arc<Migrator>,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    sweeper: Option<JoinHandle<()>>,
}

impl PromotionWorker {
    /// Spawn the worker pool on the current tokio runtime.
    ///
    /// With a non-zero `sweep_interval_secs` a sweeper task periodically
    /// queues demotions for hot blocks at or below `demotion_floor`.
    pub fn spawn(migrator: Arc<Migrator>, config: &PromotionConfig, demotion_floor: u32) -> Self {
        let (queue, receivers) = PromotionQueue::channel(config.workers, config.queue_capacity);
        let (shutdown, _) = watch::channel(false);

        let workers = receivers
            .into_iter()
            .enumerate()
            .map(|(id, rx)| {
                tokio::spawn(run_worker(
                    id,
                    rx,
                    migrator.clone(),
                    shutdown.subscribe(),
                    config.shutdown,
                ))
            })
            .collect();

        let sweeper = (config.sweep_interval_secs > 0).then(|| {
            tokio::spawn(run_sweeper(
                Duration::from_secs(config.sweep_interval_secs),
                demotion_floor,
                queue.clone(),
                migrator.clone(),
                shutdown.subscribe(),
            ))
        });

        info!(
            workers = queue.shard_count(),
            queue_capacity = config.queue_capacity,
            sweep_interval_secs = config.sweep_interval_secs,
            "Promotion workers started"
        );

        Self {
            queue,
            migrator,
            shutdown,
            workers,
            sweeper,
        }
    }

    pub fn queue(&self) -> PromotionQueue {
        self.queue.clone()
    }

    pub fn stats(&self) -> MigrationStatsSnapshot {
        self.migrator.stats()
    }

    /// Stop the sweeper and workers.
    ///
    /// A migration already in progress finishes; requests still queued are
    /// drained or discarded according to the shutdown policy.
    pub async fn shutdown(self) -> MigrationStatsSnapshot {
        let _ = self.shutdown.send(true);

        if let Some(sweeper) = self.sweeper {
            if let Err(e) = sweeper.await {
                warn!(error = %e, "Demotion sweeper panicked");
            }
        }
        for worker in self.workers {
            if let Err(e) = worker.await {
                warn!(error = %e, "Promotion worker panicked");
            }
        }

        let stats = self.migrator.stats();
        info!(
            promoted = stats.promoted,
            demoted = stats.demoted,
            skipped = stats.skipped,
            failed = stats.failed,
            discarded = stats.discarded,
            "Promotion workers stopped"
        );
        stats
    }
}

async fn run_worker(
    id: usize,
    mut rx: mpsc::Receiver<MigrationRequest>,
    migrator: Arc<Migrator>,
    mut shutdown: watch::Receiver<bool>,
    policy: ShutdownPolicy,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            request = rx.recv() => match request {
                Some(request) => {
                    migrator.migrate(request).await;
                }
                None => break,
            },
        }
    }

    // No new requests past this point; deal with what is left.
    rx.close();
    let mut remaining = 0usize;
    while let Ok(request) = rx.try_recv() {
        remaining += 1;
        match policy {
            ShutdownPolicy::Drain => {
                migrator.migrate(request).await;
            }
            ShutdownPolicy::Discard => migrator.discard(request),
        }
    }

    debug!(worker = id, remaining, ?policy, "Promotion worker exiting");
}

async fn run_sweeper(
    period: Duration,
    floor: u32,
    queue: PromotionQueue,
    migrator: Arc<Migrator>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {}
        }

        let classifier = migrator.classifier();
        let candidates = classifier.sweep_hot(floor);
        let mut queued = 0usize;
        for address in &candidates {
            match queue.try_enqueue(MigrationRequest::demote(*address)) {
                Ok(()) => queued += 1,
                Err(e) => {
                    debug!(error = %e, "Demotion request dropped");
                    migrator.metrics.record_dropped();
                }
            }
        }
        migrator.metrics.record_snapshot(classifier.snapshot());

        if !candidates.is_empty() {
            info!(candidates = candidates.len(), queued, "Demotion sweep complete");
        }
    }
}
