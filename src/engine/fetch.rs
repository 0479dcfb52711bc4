//! Job-fetch orchestration: fetch from all enabled sources in parallel,
//! merge, partition new vs existing via the shared pool, enrich the new
//! jobs, persist through the dedup pipeline, and compute poll timestamps.
//!
//! Fail-forward throughout: a source failure never aborts the other
//! sources, and a single job's save failure never aborts the poll.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Settings;
use crate::db::repos::{job_postings, sources as source_repo};
use crate::db::DbPool;
use crate::engine::dedup::{deduplicate_and_save, DedupJobData};
use crate::engine::enrichment::{enrich_jobs, PipelineJob};
use crate::engine::provider::LlmProvider;
use crate::engine::similarity::description_hash;
use crate::engine::sources::{resolve_adapter, SearchParams, SourceAdapter};
use crate::error::AppError;

/// Result of a single poll cycle.
#[derive(Debug)]
pub struct PollResult {
    /// All jobs processed (enriched new + linked existing).
    pub processed_jobs: Vec<PipelineJob>,
    pub new_job_count: usize,
    pub existing_job_count: usize,
    /// Sources that failed during fetch.
    pub error_sources: Vec<String>,
    pub last_polled_at: String,
    /// None for manual-only polling (schedule unchanged).
    pub next_poll_at: Option<String>,
}

/// Next scheduled poll for a frequency setting.
pub fn calculate_next_poll_time(
    now: chrono::DateTime<chrono::Utc>,
    frequency: &str,
) -> Option<chrono::DateTime<chrono::Utc>> {
    match frequency {
        "twice_daily" => Some(now + chrono::Duration::hours(12)),
        "daily" => Some(now + chrono::Duration::hours(24)),
        "weekly" => Some(now + chrono::Duration::days(7)),
        "manual_only" => None,
        other => {
            tracing::warn!(frequency = other, "Unknown polling frequency, treating as daily");
            Some(now + chrono::Duration::hours(24))
        }
    }
}

pub struct JobFetchService {
    pool: DbPool,
    settings: Settings,
    llm: Arc<dyn LlmProvider>,
    user_id: String,
    persona_id: String,
}

impl JobFetchService {
    pub fn new(
        pool: DbPool,
        settings: Settings,
        llm: Arc<dyn LlmProvider>,
        user_id: impl Into<String>,
        persona_id: impl Into<String>,
    ) -> Self {
        JobFetchService {
            pool,
            settings,
            llm,
            user_id: user_id.into(),
            persona_id: persona_id.into(),
        }
    }

    /// Execute a full poll cycle for the configured persona.
    pub async fn run_poll(
        &self,
        enabled_sources: &[String],
        polling_frequency: &str,
        cancel: &CancellationToken,
    ) -> Result<PollResult, AppError> {
        // Resolve adapters first — unknown sources are skipped with a warning.
        let mut adapters: Vec<Box<dyn SourceAdapter>> = Vec::new();
        for name in enabled_sources {
            match resolve_adapter(name, &self.settings) {
                Some(adapter) => adapters.push(adapter),
                None => tracing::warn!(source = %name, "Unknown source adapter, skipping"),
            }
        }
        self.run_poll_with_adapters(adapters, polling_frequency, cancel)
            .await
    }

    /// `run_poll` wrapped in an outer time budget. On budget exhaustion the
    /// cancellation signal fires so in-flight work stops at a safe point.
    pub async fn run_poll_with_budget(
        &self,
        enabled_sources: &[String],
        polling_frequency: &str,
        budget: std::time::Duration,
    ) -> Result<PollResult, AppError> {
        let cancel = CancellationToken::new();
        match tokio::time::timeout(budget, self.run_poll(enabled_sources, polling_frequency, &cancel))
            .await
        {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                Err(AppError::Internal(format!(
                    "poll exceeded budget of {}s",
                    budget.as_secs()
                )))
            }
        }
    }

    /// Poll with pre-resolved adapters (injection point for tests).
    pub async fn run_poll_with_adapters(
        &self,
        adapters: Vec<Box<dyn SourceAdapter>>,
        polling_frequency: &str,
        cancel: &CancellationToken,
    ) -> Result<PollResult, AppError> {
        // Step 1: parallel fetch with per-source error capture.
        let (merged, error_sources) = fetch_from_adapters(adapters, cancel).await;

        if cancel.is_cancelled() {
            tracing::info!("Poll cancelled after fetch stage");
            let now = chrono::Utc::now();
            return Ok(PollResult {
                processed_jobs: vec![],
                new_job_count: 0,
                existing_job_count: 0,
                error_sources,
                last_polled_at: now.to_rfc3339(),
                next_poll_at: calculate_next_poll_time(now, polling_frequency)
                    .map(|t| t.to_rfc3339()),
            });
        }

        // Steps 2–3: merge happened in the fetch; partition via pool check.
        let (mut new_jobs, existing_jobs) = self.partition_jobs(merged)?;

        // Step 4: enrich new jobs only.
        enrich_jobs(self.llm.as_ref(), &mut new_jobs).await;

        // Step 5: save new + link existing through the dedup pipeline.
        let saved = self.save_new_jobs(&new_jobs)?;
        let linked = self.link_existing_jobs(&existing_jobs)?;

        // Step 6: poll timestamps.
        let now = chrono::Utc::now();
        let next_poll = calculate_next_poll_time(now, polling_frequency);

        let mut processed = new_jobs;
        processed.extend(existing_jobs);

        Ok(PollResult {
            processed_jobs: processed,
            new_job_count: saved,
            existing_job_count: linked,
            error_sources,
            last_polled_at: now.to_rfc3339(),
            next_poll_at: next_poll.map(|t| t.to_rfc3339()),
        })
    }

    // ------------------------------------------------------------------
    // Private helpers
    // ------------------------------------------------------------------

    /// Partition merged jobs into new and existing via the two-tier pool
    /// check (external_id first, then description_hash). Source ids are
    /// resolved once per source within this call.
    fn partition_jobs(
        &self,
        merged: Vec<PipelineJob>,
    ) -> Result<(Vec<PipelineJob>, Vec<PipelineJob>), AppError> {
        let conn = self.pool.get()?;
        let mut source_id_cache: HashMap<String, Option<String>> = HashMap::new();

        let mut new_jobs = Vec::new();
        let mut existing_jobs = Vec::new();

        for mut job in merged {
            let source_id = source_id_cache
                .entry(job.source_name.clone())
                .or_insert_with(|| {
                    source_repo::resolve_source_id(&conn, &job.source_name).unwrap_or_else(|e| {
                        tracing::error!(source = %job.source_name, error = %e, "Source resolution failed");
                        None
                    })
                })
                .clone();

            let Some(source_id) = source_id else {
                tracing::warn!(
                    external_id = ?job.raw.external_id,
                    source = %job.source_name,
                    "Skipping job from unresolvable source"
                );
                continue;
            };
            job.source_id = Some(source_id.clone());

            // Tier 1: source + external id.
            let mut existing = None;
            if let Some(ref external_id) = job.raw.external_id {
                if !external_id.is_empty() {
                    existing =
                        job_postings::get_by_source_and_external_id(&conn, &source_id, external_id)?;
                }
            }
            // Tier 2: description hash.
            if existing.is_none() && !job.raw.description.is_empty() {
                let hash = description_hash(&job.raw.description);
                existing = job_postings::get_by_description_hash(&conn, &hash)?;
            }

            match existing {
                Some(pooled) => {
                    job.pool_job_posting_id = Some(pooled.id);
                    existing_jobs.push(job);
                }
                None => new_jobs.push(job),
            }
        }

        Ok((new_jobs, existing_jobs))
    }

    fn dedup_data(&self, job: &PipelineJob, source_id: &str) -> DedupJobData {
        let extraction = job.extraction.as_ref();
        DedupJobData {
            source_id: source_id.to_string(),
            job_title: job.raw.title.clone(),
            company_name: job.raw.company.clone(),
            description: job.raw.description.clone(),
            description_hash: description_hash(&job.raw.description),
            first_seen_date: crate::db::today_ymd(),
            external_id: job.raw.external_id.clone(),
            source_url: job.raw.source_url.clone(),
            location: job.raw.location.clone(),
            salary_min: job.raw.salary_min,
            salary_max: job.raw.salary_max,
            posted_date: job.raw.posted_date.clone(),
            culture_text: extraction.and_then(|e| e.culture_text.clone()),
            requirements: extraction.and_then(|e| {
                (!e.required_skills.is_empty()).then(|| e.required_skills.join(", "))
            }),
            preferred_skills: extraction.and_then(|e| {
                (!e.preferred_skills.is_empty()).then(|| e.preferred_skills.join(", "))
            }),
            raw_text: Some(job.raw.description.clone()),
            ..Default::default()
        }
    }

    /// Save enriched new jobs via dedup; failures are logged and skipped.
    fn save_new_jobs(&self, jobs: &[PipelineJob]) -> Result<usize, AppError> {
        let mut conn = self.pool.get()?;
        let mut saved = 0;
        for job in jobs {
            let Some(ref source_id) = job.source_id else { continue };
            let data = self.dedup_data(job, source_id);
            match deduplicate_and_save(
                &mut conn,
                &data,
                &self.persona_id,
                Some(&self.user_id),
                "scouter",
            ) {
                Ok(outcome) => {
                    if let (Some(score), Some(signals)) = (job.ghost_score, &job.ghost_signals) {
                        if let Err(e) = job_postings::set_ghost_data(
                            &conn,
                            &outcome.job_posting.id,
                            score,
                            signals,
                        ) {
                            tracing::warn!(job_id = %outcome.job_posting.id, error = %e, "Ghost data write failed");
                        }
                    }
                    saved += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        external_id = ?job.raw.external_id,
                        error = %e,
                        "Failed to save job"
                    );
                }
            }
        }
        Ok(saved)
    }

    /// Link existing pool jobs to this persona; failures logged and skipped.
    fn link_existing_jobs(&self, jobs: &[PipelineJob]) -> Result<usize, AppError> {
        let mut conn = self.pool.get()?;
        let mut linked = 0;
        for job in jobs {
            let Some(ref source_id) = job.source_id else { continue };
            let data = self.dedup_data(job, source_id);
            match deduplicate_and_save(
                &mut conn,
                &data,
                &self.persona_id,
                Some(&self.user_id),
                "scouter",
            ) {
                Ok(_) => linked += 1,
                Err(e) => {
                    tracing::warn!(
                        pool_job_id = ?job.pool_job_posting_id,
                        error = %e,
                        "Failed to link pool job"
                    );
                }
            }
        }
        Ok(linked)
    }
}

/// Fan out adapter fetches concurrently, collecting results and failures.
/// Source errors and panics both record the source name; neither aborts
/// the other fetches.
pub async fn fetch_from_adapters(
    adapters: Vec<Box<dyn SourceAdapter>>,
    cancel: &CancellationToken,
) -> (Vec<PipelineJob>, Vec<String>) {
    if adapters.is_empty() {
        return (vec![], vec![]);
    }

    let params = SearchParams::default();
    let mut join_set = JoinSet::new();
    for adapter in adapters {
        let params = params.clone();
        let cancel = cancel.clone();
        join_set.spawn(async move {
            let name = adapter.name();
            let result = tokio::select! {
                r = adapter.fetch_jobs(&params) => r,
                _ = cancel.cancelled() => Err(crate::engine::sources::SourceError::new(
                    crate::engine::sources::SourceErrorKind::Timeout,
                    "poll cancelled",
                )),
            };
            (name, result)
        });
    }

    let mut merged = Vec::new();
    let mut error_sources = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((name, Ok(jobs))) => {
                tracing::info!(source = name, count = jobs.len(), "Fetched jobs");
                merged.extend(jobs.into_iter().map(|raw| PipelineJob::new(name, raw)));
            }
            Ok((name, Err(e))) => {
                tracing::warn!(
                    source = name,
                    retryable = e.retryable,
                    "Source failed: {e}"
                );
                error_sources.push(name.to_string());
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "Adapter task panicked");
                error_sources.push("unknown".to_string());
            }
        }
    }

    (merged, error_sources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreateUserInput};
    use crate::db::repos::{persona_jobs, personas, users};
    use crate::engine::provider::mock::MockLlmProvider;
    use crate::engine::sources::{RawJob, SourceError, SourceErrorKind};

    struct StubAdapter {
        name: &'static str,
        outcome: Result<Vec<RawJob>, SourceError>,
    }

    #[async_trait]
    impl SourceAdapter for StubAdapter {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_jobs(&self, _params: &SearchParams) -> Result<Vec<RawJob>, SourceError> {
            self.outcome.clone()
        }
    }

    fn raw_job(external_id: &str, description: &str) -> RawJob {
        RawJob {
            external_id: Some(external_id.into()),
            title: "Software Engineer".into(),
            company: "Acme Corp".into(),
            description: description.into(),
            source_url: Some("https://example.com/j/1".into()),
            location: Some("Remote".into()),
            salary_min: Some(120_000),
            salary_max: Some(160_000),
            posted_date: Some("2026-07-20".into()),
        }
    }

    fn test_settings() -> Settings {
        Settings {
            db_path: std::path::PathBuf::from("unused.db"),
            admin_emails: vec![],
            anthropic_api_key: None,
            openai_api_key: None,
            gemini_api_key: None,
            adzuna_app_id: None,
            adzuna_app_key: None,
            usajobs_api_key: None,
        }
    }

    fn make_service(pool: &DbPool) -> (JobFetchService, String) {
        let conn = pool.get().unwrap();
        let user = users::create(&conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        let persona = personas::create(&conn, CreatePersonaInput {
            user_id: user.id.clone(),
            full_name: "Poller".into(),
            email: "p@example.com".into(),
            ..Default::default()
        }).unwrap();
        drop(conn);
        let llm = Arc::new(MockLlmProvider::with_responses(vec![
            r#"{"required_skills":["Rust"],"preferred_skills":["Docker"],"culture_text":null}"#.into(),
        ]));
        (
            JobFetchService::new(pool.clone(), test_settings(), llm, user.id, persona.id.clone()),
            persona.id,
        )
    }

    #[tokio::test]
    async fn test_poll_fail_forward() {
        let pool = init_test_db().unwrap();
        let (service, persona_id) = make_service(&pool);

        let adapters: Vec<Box<dyn SourceAdapter>> = vec![
            Box::new(StubAdapter {
                name: "Adzuna",
                outcome: Ok(vec![raw_job("AZ-1", "Build Rust services at Acme")]),
            }),
            Box::new(StubAdapter {
                name: "RemoteOK",
                outcome: Err(SourceError::new(SourceErrorKind::ApiDown, "503")),
            }),
        ];

        let cancel = CancellationToken::new();
        let result = service
            .run_poll_with_adapters(adapters, "daily", &cancel)
            .await
            .unwrap();

        assert_eq!(result.new_job_count, 1);
        assert_eq!(result.existing_job_count, 0);
        assert_eq!(result.error_sources, vec!["RemoteOK".to_string()]);
        assert_eq!(result.processed_jobs.len(), 1);
        // Enrichment ran on the new job.
        let processed = &result.processed_jobs[0];
        assert!(processed.extraction.is_some());
        assert!(processed.ghost_score.is_some());
        assert!(result.next_poll_at.is_some());

        // The job landed in the pool with a link for the polling persona.
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let job_id: String = conn
            .query_row("SELECT id FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert!(persona_jobs::get_by_persona_and_job(&conn, &persona_id, &job_id, None)
            .unwrap()
            .is_some());
        // Ghost data was attached after the save.
        let ghost: i64 = conn
            .query_row("SELECT ghost_score FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert!(ghost >= 0);
        // Extraction output persisted on the pool row, both skill tiers.
        let pooled = job_postings::get_by_id(&conn, &job_id).unwrap().unwrap();
        assert_eq!(pooled.requirements.as_deref(), Some("Rust"));
        assert_eq!(pooled.preferred_skills.as_deref(), Some("Docker"));
    }

    #[tokio::test]
    async fn test_second_poll_partitions_as_existing() {
        let pool = init_test_db().unwrap();
        let (service, _) = make_service(&pool);
        let cancel = CancellationToken::new();

        let make_adapters = || -> Vec<Box<dyn SourceAdapter>> {
            vec![Box::new(StubAdapter {
                name: "Adzuna",
                outcome: Ok(vec![raw_job("AZ-1", "Build Rust services at Acme")]),
            })]
        };

        let first = service
            .run_poll_with_adapters(make_adapters(), "daily", &cancel)
            .await
            .unwrap();
        assert_eq!(first.new_job_count, 1);

        let second = service
            .run_poll_with_adapters(make_adapters(), "daily", &cancel)
            .await
            .unwrap();
        assert_eq!(second.new_job_count, 0);
        assert_eq!(second.existing_job_count, 1);

        // Still a single pool row.
        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_unknown_source_skipped() {
        let pool = init_test_db().unwrap();
        let (service, _) = make_service(&pool);
        let cancel = CancellationToken::new();

        let result = service
            .run_poll(&["SketchyBoard".to_string()], "daily", &cancel)
            .await
            .unwrap();
        assert_eq!(result.new_job_count, 0);
        assert!(result.error_sources.is_empty());
        assert!(result.processed_jobs.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_poll_short_circuits() {
        let pool = init_test_db().unwrap();
        let (service, _) = make_service(&pool);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let adapters: Vec<Box<dyn SourceAdapter>> = vec![Box::new(StubAdapter {
            name: "Adzuna",
            outcome: Ok(vec![raw_job("AZ-1", "desc")]),
        })];
        let result = service
            .run_poll_with_adapters(adapters, "daily", &cancel)
            .await
            .unwrap();
        assert_eq!(result.new_job_count, 0);

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn test_poll_budget_wraps_cycle() {
        let pool = init_test_db().unwrap();
        let (service, _) = make_service(&pool);
        let result = service
            .run_poll_with_budget(
                &["SketchyBoard".to_string()],
                "daily",
                std::time::Duration::from_secs(30),
            )
            .await
            .unwrap();
        assert_eq!(result.new_job_count, 0);
    }

    #[test]
    fn test_next_poll_time() {
        let now = chrono::Utc::now();
        assert_eq!(
            calculate_next_poll_time(now, "daily").unwrap() - now,
            chrono::Duration::hours(24)
        );
        assert_eq!(
            calculate_next_poll_time(now, "twice_daily").unwrap() - now,
            chrono::Duration::hours(12)
        );
        assert_eq!(
            calculate_next_poll_time(now, "weekly").unwrap() - now,
            chrono::Duration::days(7)
        );
        assert!(calculate_next_poll_time(now, "manual_only").is_none());
    }
}
