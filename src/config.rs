//! Runtime configuration for hcd-blocks.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! Every hot/cold tuning knob (thresholds, queue sizes, codecs) lives here.

use std::path::PathBuf;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::blocks::codec::Algorithm;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "hcd-blocks", about = "Hot/cold compressed block gateway")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub store: StoreConfig,
    pub classifier: ClassifierConfig,
    pub promotion: PromotionConfig,
    pub compression: CompressionConfig,
    pub materializer: MaterializerConfig,
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "0.0.0.0:8080").
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Backing store selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Root directory of the disk store.
    pub path: PathBuf,

    /// Keep blocks in memory instead of on disk.
    pub in_memory: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/tmp/hcd-blocks"),
            in_memory: false,
        }
    }
}

/// Frequency classifier tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Cold reads after which a block is queued for promotion.
    pub promotion_threshold: u32,

    /// Cap on hot-table counts.
    pub hot_saturation: u32,

    /// Hot entries counted at or below this at sweep time are demoted.
    pub demotion_floor: u32,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 5,
            hot_saturation: 1000,
            demotion_floor: 9,
        }
    }
}

/// What happens to queued requests on shutdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Process every queued request before stopping.
    Drain,
    /// Drop queued requests; stored blocks keep their current form.
    Discard,
}

/// Promotion queue and worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PromotionConfig {
    /// Queue slots per worker. Enqueues beyond this are dropped.
    pub queue_capacity: usize,

    /// Number of migration workers.
    pub workers: usize,

    /// Seconds between demotion sweeps of the hot table (0 = disabled).
    pub sweep_interval_secs: u64,

    pub shutdown: ShutdownPolicy,
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            workers: 1,
            sweep_interval_secs: 0,
            shutdown: ShutdownPolicy::Discard,
        }
    }
}

/// Codec choices.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompressionConfig {
    /// Algorithm used when a hot block is demoted.
    pub demote_algorithm: Algorithm,

    /// Algorithm used for newly ingested blocks.
    pub ingest_algorithm: Algorithm,

    /// zstd compression level (1-22).
    pub zstd_level: i32,
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            demote_algorithm: Algorithm::Zstd,
            ingest_algorithm: Algorithm::Zstd,
            zstd_level: 3,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MaterializerConfig {
    /// Re-hash every decoded payload on `get`.
    pub verify_on_read: bool,
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let data = std::fs::read_to_string(path)?;
            let config: Config = serde_json::from_str(&data)?;
            Ok(config)
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Ok(Config::default())
        }
    }
}
