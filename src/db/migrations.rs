use rusqlite::Connection;

use crate::error::AppError;

/// Run the consolidated schema migration.
/// The full shared-pool schema is merged into a single idempotent batch.
pub fn run(conn: &Connection) -> Result<(), AppError> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::info!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"

-- ============================================================================
-- Users
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id                          TEXT PRIMARY KEY,
    email                       TEXT NOT NULL UNIQUE COLLATE NOCASE,
    password_hash               TEXT,
    email_verified_at           TEXT,
    is_admin                    INTEGER NOT NULL DEFAULT 0,
    balance_usd_micros          INTEGER NOT NULL DEFAULT 0 CHECK(balance_usd_micros >= 0),
    token_invalidated_before    TEXT,
    created_at                  TEXT NOT NULL,
    updated_at                  TEXT NOT NULL
);

-- ============================================================================
-- Personas
-- ============================================================================

CREATE TABLE IF NOT EXISTS personas (
    id                          TEXT PRIMARY KEY,
    user_id                     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    full_name                   TEXT NOT NULL DEFAULT '',
    email                       TEXT NOT NULL DEFAULT '',
    phone                       TEXT,
    home_city                   TEXT,
    home_state                  TEXT,
    home_country                TEXT,
    linkedin_url                TEXT,
    portfolio_url               TEXT,
    professional_summary        TEXT,
    years_experience            INTEGER,
    current_role                TEXT,
    current_company             TEXT,
    target_roles                TEXT NOT NULL DEFAULT '[]',
    target_skills               TEXT NOT NULL DEFAULT '[]',
    commutable_cities           TEXT NOT NULL DEFAULT '[]',
    industry_exclusions         TEXT NOT NULL DEFAULT '[]',
    minimum_base_salary         INTEGER,
    salary_currency             TEXT NOT NULL DEFAULT 'USD',
    remote_preference           TEXT NOT NULL DEFAULT 'No Preference'
                                CHECK(remote_preference IN
                                      ('Remote Only', 'Hybrid OK', 'Onsite OK', 'No Preference')),
    visa_sponsorship_required   INTEGER NOT NULL DEFAULT 0,
    stretch_appetite            TEXT NOT NULL DEFAULT 'Balanced',
    minimum_fit_threshold       INTEGER NOT NULL DEFAULT 60
                                CHECK(minimum_fit_threshold BETWEEN 0 AND 100),
    auto_draft_threshold        INTEGER NOT NULL DEFAULT 85
                                CHECK(auto_draft_threshold BETWEEN 0 AND 100),
    onboarding_complete         INTEGER NOT NULL DEFAULT 0,
    polling_frequency           TEXT NOT NULL DEFAULT 'daily'
                                CHECK(polling_frequency IN
                                      ('daily', 'twice_daily', 'weekly', 'manual_only')),
    created_at                  TEXT NOT NULL,
    updated_at                  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_personas_user       ON personas(user_id);
CREATE INDEX IF NOT EXISTS idx_personas_onboarded  ON personas(onboarding_complete);

-- ============================================================================
-- Persona children
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_skills (
    id          TEXT PRIMARY KEY,
    persona_id  TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    skill_name  TEXT NOT NULL,
    skill_type  TEXT NOT NULL DEFAULT 'Hard' CHECK(skill_type IN ('Hard', 'Soft')),
    years_used  INTEGER,
    created_at  TEXT NOT NULL,
    UNIQUE(persona_id, skill_name)
);
CREATE INDEX IF NOT EXISTS idx_ps_persona ON persona_skills(persona_id);

CREATE TABLE IF NOT EXISTS work_histories (
    id            TEXT PRIMARY KEY,
    persona_id    TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    company       TEXT NOT NULL,
    title         TEXT NOT NULL,
    start_date    TEXT,
    end_date      TEXT,
    sort_order    INTEGER NOT NULL DEFAULT 0,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_wh_persona ON work_histories(persona_id, sort_order);

CREATE TABLE IF NOT EXISTS work_history_bullets (
    id               TEXT PRIMARY KEY,
    work_history_id  TEXT NOT NULL REFERENCES work_histories(id) ON DELETE CASCADE,
    text             TEXT NOT NULL,
    sort_order       INTEGER NOT NULL DEFAULT 0,
    created_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_whb_history ON work_history_bullets(work_history_id, sort_order);

CREATE TABLE IF NOT EXISTS educations (
    id            TEXT PRIMARY KEY,
    persona_id    TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    institution   TEXT NOT NULL,
    degree        TEXT,
    field_of_study TEXT,
    graduation_year INTEGER,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_edu_persona ON educations(persona_id);

CREATE TABLE IF NOT EXISTS certifications (
    id            TEXT PRIMARY KEY,
    persona_id    TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    name          TEXT NOT NULL,
    issuer        TEXT,
    issued_year   INTEGER,
    created_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cert_persona ON certifications(persona_id);

CREATE TABLE IF NOT EXISTS achievement_stories (
    id                    TEXT PRIMARY KEY,
    persona_id            TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    title                 TEXT NOT NULL,
    situation             TEXT NOT NULL,
    action                TEXT NOT NULL,
    result                TEXT NOT NULL,
    skills_demonstrated   TEXT NOT NULL DEFAULT '[]',
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_as_persona ON achievement_stories(persona_id);

CREATE TABLE IF NOT EXISTS voice_profiles (
    id              TEXT PRIMARY KEY,
    persona_id      TEXT NOT NULL UNIQUE REFERENCES personas(id) ON DELETE CASCADE,
    tone            TEXT NOT NULL DEFAULT 'professional',
    formality       TEXT NOT NULL DEFAULT 'neutral',
    sample_text     TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS custom_non_negotiables (
    id              TEXT PRIMARY KEY,
    persona_id      TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    criterion       TEXT NOT NULL,
    expected_answer INTEGER NOT NULL DEFAULT 1,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cnn_persona ON custom_non_negotiables(persona_id);

CREATE TABLE IF NOT EXISTS persona_embeddings (
    id              TEXT PRIMARY KEY,
    persona_id      TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    embedding_type  TEXT NOT NULL CHECK(embedding_type IN ('hard_skills', 'soft_skills', 'logistics')),
    vector          TEXT NOT NULL,
    model           TEXT NOT NULL,
    generated_at    TEXT NOT NULL,
    UNIQUE(persona_id, embedding_type)
);

CREATE TABLE IF NOT EXISTS persona_change_flags (
    id              TEXT PRIMARY KEY,
    persona_id      TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    field_name      TEXT NOT NULL,
    resolved        INTEGER NOT NULL DEFAULT 0,
    resolved_at     TEXT,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_pcf_persona ON persona_change_flags(persona_id);

-- ============================================================================
-- Job Sources
-- ============================================================================

CREATE TABLE IF NOT EXISTS job_sources (
    id            TEXT PRIMARY KEY,
    source_name   TEXT NOT NULL UNIQUE,
    source_type   TEXT NOT NULL DEFAULT 'API',
    description   TEXT,
    created_at    TEXT NOT NULL
);

-- ============================================================================
-- Job Postings (Tier 0 — shared pool, no per-user columns)
-- ============================================================================

CREATE TABLE IF NOT EXISTS job_postings (
    id                    TEXT PRIMARY KEY,
    source_id             TEXT NOT NULL REFERENCES job_sources(id) ON DELETE RESTRICT,
    external_id           TEXT,
    also_found_on         TEXT NOT NULL DEFAULT '{"sources":[]}',
    job_title             TEXT NOT NULL,
    company_name          TEXT NOT NULL,
    company_url           TEXT,
    source_url            TEXT,
    apply_url             TEXT,
    location              TEXT,
    work_model            TEXT CHECK(work_model IN ('Remote', 'Hybrid', 'Onsite') OR work_model IS NULL),
    seniority_level       TEXT CHECK(seniority_level IN ('Entry', 'Mid', 'Senior', 'Lead', 'Executive')
                               OR seniority_level IS NULL),
    salary_min            INTEGER,
    salary_max            INTEGER,
    salary_currency       TEXT,
    description           TEXT NOT NULL,
    description_hash      TEXT NOT NULL UNIQUE,
    culture_text          TEXT,
    requirements          TEXT,
    preferred_skills      TEXT,
    raw_text              TEXT,
    years_experience_min  INTEGER,
    years_experience_max  INTEGER,
    posted_date           TEXT,
    application_deadline  TEXT,
    first_seen_date       TEXT NOT NULL,
    is_active             INTEGER NOT NULL DEFAULT 1,
    is_quarantined        INTEGER NOT NULL DEFAULT 0,
    quarantined_until     TEXT,
    ghost_score           INTEGER NOT NULL DEFAULT 0 CHECK(ghost_score BETWEEN 0 AND 100),
    ghost_signals         TEXT,
    repost_count          INTEGER NOT NULL DEFAULT 0,
    previous_posting_ids  TEXT,
    last_verified_at      TEXT,
    expired_at            TEXT,
    created_at            TEXT NOT NULL,
    updated_at            TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uq_jp_source_external
    ON job_postings(source_id, external_id) WHERE external_id IS NOT NULL;
CREATE INDEX IF NOT EXISTS idx_jp_company  ON job_postings(company_name);
CREATE INDEX IF NOT EXISTS idx_jp_active   ON job_postings(is_active, is_quarantined, created_at);

-- ============================================================================
-- Persona ↔ Job links (all user-specific state lives here)
-- ============================================================================

CREATE TABLE IF NOT EXISTS persona_jobs (
    id                      TEXT PRIMARY KEY,
    persona_id              TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    job_posting_id          TEXT NOT NULL REFERENCES job_postings(id) ON DELETE RESTRICT,
    discovery_method        TEXT NOT NULL CHECK(discovery_method IN ('scouter', 'manual', 'pool')),
    discovered_at           TEXT NOT NULL,
    status                  TEXT NOT NULL DEFAULT 'Discovered'
                            CHECK(status IN ('Discovered', 'Dismissed', 'Applied', 'Expired')),
    is_favorite             INTEGER NOT NULL DEFAULT 0,
    fit_score               INTEGER CHECK(fit_score BETWEEN 0 AND 100 OR fit_score IS NULL),
    stretch_score           INTEGER CHECK(stretch_score BETWEEN 0 AND 100 OR stretch_score IS NULL),
    failed_non_negotiables  TEXT,
    score_details           TEXT,
    scored_at               TEXT,
    dismissed_at            TEXT,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL,
    UNIQUE(persona_id, job_posting_id)
);
CREATE INDEX IF NOT EXISTS idx_pj_persona ON persona_jobs(persona_id, status);
CREATE INDEX IF NOT EXISTS idx_pj_job     ON persona_jobs(job_posting_id);

-- ============================================================================
-- Resumes and application artifacts
-- ============================================================================

CREATE TABLE IF NOT EXISTS base_resumes (
    id          TEXT PRIMARY KEY,
    persona_id  TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    title       TEXT NOT NULL,
    summary     TEXT NOT NULL DEFAULT '',
    is_primary  INTEGER NOT NULL DEFAULT 0,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_br_persona ON base_resumes(persona_id);

CREATE TABLE IF NOT EXISTS job_variants (
    id                TEXT PRIMARY KEY,
    base_resume_id    TEXT NOT NULL REFERENCES base_resumes(id) ON DELETE CASCADE,
    persona_id        TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    job_posting_id    TEXT NOT NULL REFERENCES job_postings(id) ON DELETE RESTRICT,
    status            TEXT NOT NULL DEFAULT 'Draft'
                      CHECK(status IN ('Draft', 'Approved', 'Archived')),
    modified_summary  TEXT,
    job_bullet_order  TEXT NOT NULL,
    summary_snapshot  TEXT,
    bullets_snapshot  TEXT,
    archived_at       TEXT,
    created_at        TEXT NOT NULL,
    updated_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_jv_persona_job ON job_variants(persona_id, job_posting_id);

CREATE TABLE IF NOT EXISTS cover_letters (
    id               TEXT PRIMARY KEY,
    persona_id       TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    job_posting_id   TEXT NOT NULL REFERENCES job_postings(id) ON DELETE RESTRICT,
    job_variant_id   TEXT REFERENCES job_variants(id) ON DELETE SET NULL,
    content          TEXT NOT NULL,
    word_count       INTEGER NOT NULL DEFAULT 0,
    status           TEXT NOT NULL DEFAULT 'Draft'
                     CHECK(status IN ('Draft', 'Approved', 'Archived')),
    archived_at      TEXT,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_cl_persona_job ON cover_letters(persona_id, job_posting_id);

CREATE TABLE IF NOT EXISTS applications (
    id                        TEXT PRIMARY KEY,
    persona_id                TEXT NOT NULL REFERENCES personas(id) ON DELETE CASCADE,
    job_posting_id            TEXT NOT NULL REFERENCES job_postings(id) ON DELETE RESTRICT,
    persona_job_id            TEXT REFERENCES persona_jobs(id) ON DELETE SET NULL,
    status                    TEXT NOT NULL DEFAULT 'Applied'
                              CHECK(status IN ('Applied', 'Interviewing', 'Offer',
                                               'Accepted', 'Rejected', 'Withdrawn')),
    is_pinned                 INTEGER NOT NULL DEFAULT 0,
    archived_at               TEXT,
    description_snapshot      TEXT NOT NULL,
    submitted_resume_pdf_id   TEXT,
    applied_at                TEXT NOT NULL,
    created_at                TEXT NOT NULL,
    updated_at                TEXT NOT NULL,
    UNIQUE(persona_id, job_posting_id)
);
CREATE INDEX IF NOT EXISTS idx_app_persona ON applications(persona_id, status);

CREATE TABLE IF NOT EXISTS submitted_pdfs (
    id              TEXT PRIMARY KEY,
    application_id  TEXT REFERENCES applications(id) ON DELETE SET NULL,
    kind            TEXT NOT NULL CHECK(kind IN ('resume', 'cover_letter')),
    content         BLOB NOT NULL,
    generated_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_spdf_application ON submitted_pdfs(application_id);

-- ============================================================================
-- Model registry / pricing / routing
-- ============================================================================

CREATE TABLE IF NOT EXISTS model_registry (
    id            TEXT PRIMARY KEY,
    provider      TEXT NOT NULL,
    model         TEXT NOT NULL,
    display_name  TEXT NOT NULL,
    model_type    TEXT NOT NULL DEFAULT 'llm' CHECK(model_type IN ('llm', 'embedding')),
    is_active     INTEGER NOT NULL DEFAULT 1,
    created_at    TEXT NOT NULL,
    updated_at    TEXT NOT NULL,
    UNIQUE(provider, model)
);

CREATE TABLE IF NOT EXISTS pricing_config (
    id                        TEXT PRIMARY KEY,
    provider                  TEXT NOT NULL,
    model                     TEXT NOT NULL,
    input_cost_per_1k_micros  INTEGER NOT NULL CHECK(input_cost_per_1k_micros >= 0),
    output_cost_per_1k_micros INTEGER NOT NULL CHECK(output_cost_per_1k_micros >= 0),
    margin_multiplier         REAL NOT NULL CHECK(margin_multiplier > 0),
    effective_date            TEXT NOT NULL,
    created_at                TEXT NOT NULL,
    updated_at                TEXT NOT NULL,
    UNIQUE(provider, model, effective_date)
);

CREATE TABLE IF NOT EXISTS task_routing_config (
    id          TEXT PRIMARY KEY,
    provider    TEXT NOT NULL,
    task_type   TEXT NOT NULL,
    model       TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    updated_at  TEXT NOT NULL,
    UNIQUE(provider, task_type)
);

-- ============================================================================
-- Metering
-- ============================================================================

CREATE TABLE IF NOT EXISTS llm_usage_records (
    id                      TEXT PRIMARY KEY,
    user_id                 TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    provider                TEXT NOT NULL,
    model                   TEXT NOT NULL,
    task_type               TEXT NOT NULL,
    input_tokens            INTEGER NOT NULL CHECK(input_tokens >= 0),
    output_tokens           INTEGER NOT NULL CHECK(output_tokens >= 0),
    raw_cost_usd_micros     INTEGER NOT NULL CHECK(raw_cost_usd_micros >= 0),
    billed_cost_usd_micros  INTEGER NOT NULL CHECK(billed_cost_usd_micros >= 0),
    margin_multiplier       REAL NOT NULL CHECK(margin_multiplier > 0),
    created_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_lur_user ON llm_usage_records(user_id, created_at);

CREATE TABLE IF NOT EXISTS credit_transactions (
    id                TEXT PRIMARY KEY,
    user_id           TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    amount_usd_micros INTEGER NOT NULL,
    transaction_type  TEXT NOT NULL CHECK(transaction_type IN
                      ('purchase', 'usage_debit', 'admin_grant', 'refund')),
    reference_id      TEXT,
    description       TEXT,
    created_at        TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_ct_user ON credit_transactions(user_id, created_at);

-- ============================================================================
-- System config
-- ============================================================================

CREATE TABLE IF NOT EXISTS system_config (
    key          TEXT PRIMARY KEY,
    value        TEXT NOT NULL,
    description  TEXT
);
"#;

/// Incremental migrations for databases created before the shared pool.
///
/// Early databases carried per-user columns (persona_id, status, is_favorite,
/// fit_score, stretch_score, dismissed_at) directly on job_postings. The
/// cutover backfills one persona_jobs link per posting, then rebuilds
/// job_postings without the per-user columns. Forward-only; the downgrade is
/// lossy and intentionally not provided.
pub fn run_incremental(conn: &Connection) -> Result<(), AppError> {
    if !has_column(conn, "job_postings", "persona_id")? {
        return Ok(());
    }

    tracing::info!("Running shared-pool cutover: backfilling persona_jobs from legacy columns");

    let now = chrono::Utc::now().to_rfc3339();

    // The rebuild drops a referenced table; FK enforcement must be off for
    // the duration (a no-op inside a transaction, so toggled outside it).
    conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    conn.execute_batch("BEGIN")?;
    let result = (|| -> Result<(), AppError> {
        // Backfill one link per legacy posting, skipping postings already linked.
        conn.execute(
            "INSERT INTO persona_jobs
                 (id, persona_id, job_posting_id, discovery_method, discovered_at,
                  status, is_favorite, fit_score, stretch_score, dismissed_at,
                  created_at, updated_at)
             SELECT lower(hex(randomblob(16))), jp.persona_id, jp.id, 'scouter', jp.created_at,
                    COALESCE(jp.status, 'Discovered'), COALESCE(jp.is_favorite, 0),
                    jp.fit_score, jp.stretch_score, jp.dismissed_at,
                    ?1, ?1
             FROM job_postings jp
             WHERE jp.persona_id IS NOT NULL
               AND NOT EXISTS (
                   SELECT 1 FROM persona_jobs pj
                   WHERE pj.persona_id = jp.persona_id AND pj.job_posting_id = jp.id
               )",
            rusqlite::params![now],
        )?;

        // Rebuild job_postings without the per-user columns.
        conn.execute_batch(
            "CREATE TABLE job_postings_new AS
                 SELECT id, source_id, external_id, also_found_on, job_title, company_name,
                        company_url, source_url, apply_url, location, work_model,
                        seniority_level, salary_min, salary_max, salary_currency,
                        description, description_hash, culture_text, requirements,
                        preferred_skills, raw_text,
                        years_experience_min, years_experience_max, posted_date,
                        application_deadline, first_seen_date, is_active, is_quarantined,
                        quarantined_until, ghost_score, ghost_signals, repost_count,
                        previous_posting_ids, last_verified_at, expired_at,
                        created_at, updated_at
                 FROM job_postings;
             DROP TABLE job_postings;
             ALTER TABLE job_postings_new RENAME TO job_postings;
             CREATE INDEX IF NOT EXISTS idx_jp_hash
                 ON job_postings(description_hash);
             CREATE INDEX IF NOT EXISTS idx_jp_source_external
                 ON job_postings(source_id, external_id) WHERE external_id IS NOT NULL;
             CREATE INDEX IF NOT EXISTS idx_jp_company
                 ON job_postings(company_name);
             CREATE INDEX IF NOT EXISTS idx_jp_active
                 ON job_postings(is_active, is_quarantined, created_at);",
        )?;
        Ok(())
    })();

    let finished = match result {
        Ok(()) => {
            conn.execute_batch("COMMIT")?;
            // The dedup indexes stay non-unique here: backfilled data may
            // still hold cross-persona duplicates. jobscout-dedup merges
            // them and promotes both indexes to UNIQUE.
            tracing::warn!(
                "Shared-pool cutover complete; run jobscout-dedup to merge \
                 cross-persona duplicates and enforce hash uniqueness"
            );
            Ok(())
        }
        Err(e) => {
            let _ = conn.execute_batch("ROLLBACK");
            Err(e)
        }
    };
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    finished
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, AppError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        run(&conn).unwrap();
        run_incremental(&conn).unwrap();
    }

    #[test]
    fn test_has_column() {
        let conn = Connection::open_in_memory().unwrap();
        run(&conn).unwrap();
        assert!(has_column(&conn, "job_postings", "description_hash").unwrap());
        assert!(!has_column(&conn, "job_postings", "persona_id").unwrap());
    }
}
