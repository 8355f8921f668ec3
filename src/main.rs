use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn, Level};
use tracing_subscriber;

use ragbridge::api::{self, AppState};
use ragbridge::config;
use ragbridge::persistence::{self, PersistenceManager};
use ragbridge::store::FileStore;
use ragbridge::upstream::{HttpRetrievalClient, RetrievalBackend};
use ragbridge::web;

#[derive(Parser, Debug)]
#[command(name = "ragbridge")]
#[command(about = "RAG document gateway - uploads, ingestion tracking and query proxy")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = config::DEFAULT_PORT)]
    port: u16,

    /// Data directory for uploads and registry snapshots
    #[arg(short, long, default_value = config::DEFAULT_DATA_DIR)]
    data_dir: String,

    /// Base URL of the retrieval engine
    #[arg(short, long, default_value = config::DEFAULT_ENGINE_URL)]
    engine_url: String,

    /// Snapshot interval in seconds
    #[arg(short, long, default_value_t = config::SNAPSHOT_INTERVAL_SECS)]
    snapshot_interval: u64,

    /// Directory of prebuilt console assets
    #[arg(long, default_value = "./webui")]
    static_dir: String,
}

#[tokio::main]
async fn main() {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("🚀 ragbridge gateway starting");
    info!("📁 Data directory: {}", args.data_dir);
    info!("🔎 Retrieval engine: {}", args.engine_url);
    info!("⏱️  Snapshot interval: {}s", args.snapshot_interval);

    let store = match FileStore::new(Path::new(&args.data_dir)) {
        Ok(store) => store,
        Err(e) => {
            error!("Failed to prepare data directory {}: {}", args.data_dir, e);
            std::process::exit(1);
        }
    };

    let persistence = match PersistenceManager::new(Path::new(&args.data_dir), args.snapshot_interval) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to initialize persistence: {}", e);
            std::process::exit(1);
        }
    };

    // Restore the registry, then reconcile it against what is on disk
    match persistence.load_state() {
        Ok(state) => {
            info!(
                "✅ Restored {} file records, {} knowledge bases",
                state.files.len(),
                state.knowledge_bases.len()
            );
            store.restore(state.files, state.knowledge_bases);
        }
        Err(e) => {
            warn!("⚠️  Failed to load snapshot: {}, starting fresh", e);
        }
    }
    match store.sync_from_disk() {
        Ok(report) => {
            info!(
                "🗂️  Disk sync: {} knowledge bases, {} recovered uploads, {} dropped records",
                report.registered_kbs, report.recovered_files, report.dropped_records
            );
        }
        Err(e) => {
            warn!("⚠️  Disk sync failed: {}", e);
        }
    }

    let backend: Arc<dyn RetrievalBackend> = match HttpRetrievalClient::new(&args.engine_url) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            error!("Failed to build retrieval engine client: {}", e);
            std::process::exit(1);
        }
    };

    // The gateway starts either way; ingestion and queries surface engine
    // outages per request
    match backend.health().await {
        Ok(()) => info!("✅ Retrieval engine reachable"),
        Err(e) => warn!("⚠️  Retrieval engine not reachable yet: {}", e),
    }

    // Start background snapshots
    let _snapshot_handle = persistence.start_background_snapshots(store.clone()).await;

    // Setup graceful shutdown
    persistence::setup_shutdown_handler(persistence.clone(), store.clone()).await;

    // Build the router
    let state = AppState::new(store, backend);
    let app = Router::new()
        .merge(api::routes(state))
        .merge(web::routes(PathBuf::from(&args.static_dir)))
        .layer(CorsLayer::permissive());

    // Start the server
    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!("🌐 Gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
