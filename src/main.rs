use std::sync::Arc;

use jobscout::config::Settings;
use jobscout::db;
use jobscout::engine::background::{start_loops, WorkerState, DEFAULT_SURFACING_INTERVAL};
use jobscout::logging;

#[tokio::main]
async fn main() {
    logging::init();

    let settings = Settings::from_env();
    let pool = match db::init_db(&settings.db_path) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Database initialization failed");
            std::process::exit(1);
        }
    };

    let state = Arc::new(WorkerState::new());
    let handles = start_loops(state.clone(), pool, DEFAULT_SURFACING_INTERVAL);

    tracing::info!("Jobscout daemon running; press Ctrl-C to stop");
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }

    tracing::info!(stats = ?state.stats(), "Shutting down");
    handles.shutdown().await;
}
