//! hcd-blocks server binary.
//!
//! Opens the configured block store, starts the promotion workers and serves
//! the raw-block gateway until interrupted.

use std::sync::Arc;
use std::time::Instant;

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use hcd_blocks::blocks::service::BlockService;
use hcd_blocks::config::{Cli, Config};
use hcd_blocks::metrics::BlockMetrics;
use hcd_blocks::server::gateway::{build_router, AppState};
use hcd_blocks::store::{BlockStore, DiskBlockStore, MemoryBlockStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Initialize tracing/logging.
    let filter = if cli.verbose {
        "hcd_blocks=debug,tower_http=debug"
    } else {
        "hcd_blocks=info,tower_http=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| filter.into()),
        )
        .with_target(true)
        .init();

    info!("hcd-blocks v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration.
    let mut config = Config::load(&cli.config)?;
    if let Some(listen) = cli.listen {
        config.server.listen = listen;
    }
    let config = Arc::new(config);

    info!(
        promotion_threshold = config.classifier.promotion_threshold,
        hot_saturation = config.classifier.hot_saturation,
        demotion_floor = config.classifier.demotion_floor,
        demote_algorithm = %config.compression.demote_algorithm,
        workers = config.promotion.workers,
        "Configuration loaded"
    );

    // Open the backing store.
    let store: Arc<dyn BlockStore> = if config.store.in_memory {
        info!("Using in-memory block store");
        Arc::new(MemoryBlockStore::new())
    } else {
        info!(path = %config.store.path.display(), "Using disk block store");
        Arc::new(DiskBlockStore::open(config.store.path.clone()).await?)
    };

    let metrics = Arc::new(BlockMetrics::new()?);
    let service = BlockService::start(&config, store, metrics);

    let state = Arc::new(AppState {
        materializer: service.materializer().clone(),
        config: config.clone(),
        start_time: Instant::now(),
    });
    let app = build_router(state);

    let listen_addr = config.server.listen.clone();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Listening on {listen_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    service.shutdown().await;
    Ok(())
}
