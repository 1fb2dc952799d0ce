//! Composition root for the HTTP server.

use std::sync::Arc;

use miette::Result;
use tracing::{info, warn};

use shiftdesk_cache::{SyncConfig, SyncEngine};
use shiftdesk_store::DocumentStore;
use shiftdesk_web::create_router;

/// Build the one engine this process owns, serve it, and stop it on exit.
pub async fn run(
    store: Arc<dyn DocumentStore>,
    config: SyncConfig,
    port: u16,
    static_dir: Option<&str>,
) -> Result<()> {
    let engine = SyncEngine::new(store, config);
    engine.initialize().await;
    engine.start();
    info!(
        tables = engine.snapshot().len(),
        countries = ?engine.config().countries,
        "sync engine started"
    );

    let router = create_router(engine.clone(), static_dir);
    let served = shiftdesk_web::serve(router, port, shutdown_signal()).await;

    engine.stop();
    if engine.is_dirty() {
        match engine.force_sync().await {
            Ok(_) => info!("flushed pending changes"),
            Err(e) => warn!(error = %e, "pending changes were not synced before exit"),
        }
    }

    served.map_err(|e| miette::miette!("{}", e))
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}
