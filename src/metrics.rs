//! Prometheus instrumentation for the block layer.
//!
//! [`BlockMetrics`] is handed to the materializer and the promotion workers;
//! nothing on the read path logs timings inline.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::blocks::classifier::ClassifierSnapshot;
use crate::blocks::codec::Algorithm;
use crate::blocks::promotion::{Direction, MigrationOutcome};

/// Which path a read took through the materializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadPath {
    /// Stored compressed, decoded.
    Cold,
    /// Stored raw.
    Hot,
    /// Stored compressed but undecodable; served verbatim.
    Corrupt,
}

impl ReadPath {
    fn label(&self) -> &'static str {
        match self {
            ReadPath::Cold => "cold",
            ReadPath::Hot => "hot",
            ReadPath::Corrupt => "corrupt",
        }
    }
}

pub struct BlockMetrics {
    registry: Registry,
    reads: IntCounterVec,
    read_duration: Histogram,
    decode_failures: IntCounterVec,
    hash_mismatches: IntCounter,
    promotions_enqueued: IntCounter,
    promotions_dropped: IntCounter,
    migrations: IntCounterVec,
    classifier_entries: IntGaugeVec,
}

impl BlockMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new_custom(Some("hcd_blocks".to_string()), None)?;

        let reads = IntCounterVec::new(
            Opts::new("reads_total", "Blocks materialized, by read path"),
            &["path"],
        )?;
        let read_duration = Histogram::with_opts(
            HistogramOpts::new("read_duration_seconds", "Time spent materializing a block")
                .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]),
        )?;
        let decode_failures = IntCounterVec::new(
            Opts::new("decode_failures_total", "Stored streams that failed to decode"),
            &["algorithm"],
        )?;
        let hash_mismatches = IntCounter::new(
            "hash_mismatches_total",
            "Verified reads whose payload did not match the address",
        )?;
        let promotions_enqueued = IntCounter::new(
            "promotions_enqueued_total",
            "Migration requests accepted by the promotion queue",
        )?;
        let promotions_dropped = IntCounter::new(
            "promotions_dropped_total",
            "Migration requests dropped because the queue was full or closed",
        )?;
        let migrations = IntCounterVec::new(
            Opts::new("migrations_total", "Migration requests handled by the workers"),
            &["direction", "outcome"],
        )?;
        let classifier_entries = IntGaugeVec::new(
            Opts::new("classifier_entries", "Addresses tracked by the frequency classifier"),
            &["table"],
        )?;

        registry.register(Box::new(reads.clone()))?;
        registry.register(Box::new(read_duration.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(hash_mismatches.clone()))?;
        registry.register(Box::new(promotions_enqueued.clone()))?;
        registry.register(Box::new(promotions_dropped.clone()))?;
        registry.register(Box::new(migrations.clone()))?;
        registry.register(Box::new(classifier_entries.clone()))?;

        Ok(Self {
            registry,
            reads,
            read_duration,
            decode_failures,
            hash_mismatches,
            promotions_enqueued,
            promotions_dropped,
            migrations,
            classifier_entries,
        })
    }

    pub fn record_read(&self, path: ReadPath, seconds: f64) {
        self.reads.with_label_values(&[path.label()]).inc();
        self.read_duration.observe(seconds);
    }

    pub fn record_decode_failure(&self, algorithm: Algorithm) {
        self.decode_failures
            .with_label_values(&[algorithm.as_str()])
            .inc();
    }

    pub fn record_hash_mismatch(&self) {
        self.hash_mismatches.inc();
    }

    pub fn record_enqueued(&self) {
        self.promotions_enqueued.inc();
    }

    pub fn record_dropped(&self) {
        self.promotions_dropped.inc();
    }

    pub fn record_migration(&self, direction: Direction, outcome: MigrationOutcome) {
        self.migrations
            .with_label_values(&[direction.as_str(), outcome.as_str()])
            .inc();
    }

    pub fn record_snapshot(&self, snapshot: ClassifierSnapshot) {
        self.classifier_entries
            .with_label_values(&["cold"])
            .set(snapshot.cold_entries as i64);
        self.classifier_entries
            .with_label_values(&["hot"])
            .set(snapshot.hot_entries as i64);
    }

    pub fn reads(&self, path: ReadPath) -> u64 {
        self.reads.with_label_values(&[path.label()]).get()
    }

    pub fn enqueued(&self) -> u64 {
        self.promotions_enqueued.get()
    }

    pub fn dropped(&self) -> u64 {
        self.promotions_dropped.get()
    }

    pub fn migrations(&self, direction: Direction, outcome: MigrationOutcome) -> u64 {
        self.migrations
            .with_label_values(&[direction.as_str(), outcome.as_str()])
            .get()
    }

    /// Prometheus text exposition of every metric.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

impl std::fmt::Debug for BlockMetrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockMetrics").finish_non_exhaustive()
    }
}
