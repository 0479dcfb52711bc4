//! `jobscout-dedup` — merge cross-pool duplicate postings.
//!
//! Run after the shared-pool cutover, or whenever duplicate description
//! hashes are suspected. Idempotent; safe to re-run.

use jobscout::config::Settings;
use jobscout::db;
use jobscout::engine::cross_dedup::run_dedup;
use jobscout::logging;

fn main() {
    logging::init();

    let settings = Settings::from_env();
    let pool = match db::init_db(&settings.db_path) {
        Ok(pool) => pool,
        Err(e) => {
            tracing::error!(error = %e, "Database initialization failed");
            std::process::exit(1);
        }
    };

    let mut conn = match pool.get() {
        Ok(conn) => conn,
        Err(e) => {
            tracing::error!(error = %e, "Could not get database connection");
            std::process::exit(1);
        }
    };

    match run_dedup(&mut conn) {
        Ok(stats) => {
            tracing::info!(
                groups_found = stats.groups_found,
                groups_merged = stats.groups_merged,
                groups_skipped = stats.groups_skipped,
                duplicates_deleted = stats.duplicates_deleted,
                persona_jobs_reassigned = stats.persona_jobs_reassigned,
                persona_jobs_conflicts = stats.persona_jobs_conflicts,
                "Dedup finished"
            );
        }
        Err(e) => {
            tracing::error!(error = %e, "Dedup failed");
            std::process::exit(1);
        }
    }
}
