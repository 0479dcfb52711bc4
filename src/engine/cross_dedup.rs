//! Cross-pool duplicate merge, driven by the `jobscout-dedup` binary.
//!
//! Groups pool rows by description_hash, keeps the oldest as canonical,
//! reassigns child foreign keys, merges also_found_on, and deletes the
//! duplicates. Idempotent; an exclusive transaction keeps concurrent runs
//! out. Groups whose company names disagree are skipped — identical hashes
//! with different companies mean a hash collision, not a duplicate.

use std::collections::HashMap;

use rusqlite::{params, Connection};

use crate::db::models::{AlsoFoundOn, AlsoFoundOnSource};
use crate::error::AppError;

// Child tables reassigned with a plain UPDATE. applications and
// persona_jobs carry UNIQUE(persona_id, job_posting_id) and need the
// two-phase treatment instead. Extracted skills live as columns on the
// pool row itself (requirements / preferred_skills), so there is no
// skills child table to reassign.
const SIMPLE_CHILD_TABLES: [&str; 2] = ["job_variants", "cover_letters"];

#[derive(Debug, Default)]
pub struct MergeStats {
    pub groups_found: usize,
    pub groups_merged: usize,
    pub groups_skipped: usize,
    pub duplicates_deleted: usize,
    pub child_fks_reassigned: HashMap<String, usize>,
    pub persona_jobs_reassigned: usize,
    pub persona_jobs_conflicts: usize,
}

struct DuplicateGroup {
    description_hash: String,
    /// Oldest first; the head is canonical.
    job_ids: Vec<String>,
    company_names: Vec<String>,
}

/// Run the merge. The caller owns the connection; everything happens in
/// one exclusive transaction, and on a clean pass the hash index is
/// promoted to UNIQUE afterwards.
pub fn run_dedup(conn: &mut Connection) -> Result<MergeStats, AppError> {
    let mut stats = MergeStats::default();

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Exclusive)?;

    let groups = find_duplicate_groups(&tx)?;
    stats.groups_found = groups.len();

    for group in groups {
        let canonical_id = group.job_ids[0].clone();
        let duplicate_ids = &group.job_ids[1..];

        if !companies_match(&group.company_names) {
            tracing::warn!(
                hash = %group.description_hash,
                companies = ?group.company_names,
                "Skipping group: company names differ"
            );
            stats.groups_skipped += 1;
            continue;
        }

        for table in SIMPLE_CHILD_TABLES {
            let count = reassign_simple(&tx, table, &canonical_id, duplicate_ids)?;
            *stats.child_fks_reassigned.entry(table.to_string()).or_insert(0) += count;
        }

        let app_count = reassign_two_phase(&tx, "applications", &canonical_id, duplicate_ids)?;
        *stats
            .child_fks_reassigned
            .entry("applications".to_string())
            .or_insert(0) += app_count.0;

        let (reassigned, conflicts) =
            reassign_two_phase(&tx, "persona_jobs", &canonical_id, duplicate_ids)?;
        stats.persona_jobs_reassigned += reassigned;
        stats.persona_jobs_conflicts += conflicts;

        merge_also_found_on(&tx, &canonical_id, duplicate_ids)?;

        stats.duplicates_deleted += delete_rows(&tx, duplicate_ids)?;
        stats.groups_merged += 1;
    }

    tx.commit()?;

    if stats.groups_skipped == 0 {
        // Clean pass: the pool holds one row per hash (and per source +
        // external id) again. Promotion is best-effort — the merged data is
        // already committed either way.
        if let Err(e) = conn.execute_batch(
            "CREATE UNIQUE INDEX IF NOT EXISTS uq_jp_hash ON job_postings(description_hash);
             CREATE UNIQUE INDEX IF NOT EXISTS uq_jp_source_external
                 ON job_postings(source_id, external_id) WHERE external_id IS NOT NULL;",
        ) {
            tracing::warn!(error = %e, "Could not promote dedup indexes to UNIQUE");
        }
    } else {
        tracing::warn!(
            skipped = stats.groups_skipped,
            "Hash uniqueness not enforced: collision-guarded groups remain"
        );
    }

    tracing::info!(
        groups = stats.groups_found,
        merged = stats.groups_merged,
        skipped = stats.groups_skipped,
        deleted = stats.duplicates_deleted,
        "Cross-pool dedup complete"
    );
    Ok(stats)
}

fn find_duplicate_groups(conn: &Connection) -> Result<Vec<DuplicateGroup>, AppError> {
    let mut hashes_stmt = conn.prepare(
        "SELECT description_hash FROM job_postings
         GROUP BY description_hash HAVING COUNT(*) > 1",
    )?;
    let hashes: Vec<String> = hashes_stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .collect();

    let mut group_stmt = conn.prepare(
        "SELECT id, company_name FROM job_postings
         WHERE description_hash = ?1 ORDER BY created_at ASC",
    )?;
    let mut groups = Vec::with_capacity(hashes.len());
    for hash in hashes {
        let rows: Vec<(String, String)> = group_stmt
            .query_map(params![hash], |row| Ok((row.get(0)?, row.get(1)?)))?
            .filter_map(|r| r.ok())
            .collect();
        groups.push(DuplicateGroup {
            description_hash: hash,
            job_ids: rows.iter().map(|(id, _)| id.clone()).collect(),
            company_names: rows.into_iter().map(|(_, name)| name).collect(),
        });
    }
    Ok(groups)
}

/// Hash-collision guard: every company name must normalize to the same
/// value. Unverifiable (all empty) groups are not merged.
fn companies_match(company_names: &[String]) -> bool {
    let normalized: std::collections::HashSet<String> = company_names
        .iter()
        .filter(|name| !name.trim().is_empty())
        .map(|name| name.trim().to_lowercase())
        .collect();
    normalized.len() == 1
}

fn placeholders(count: usize, offset: usize) -> String {
    (0..count)
        .map(|i| format!("?{}", i + offset + 1))
        .collect::<Vec<_>>()
        .join(", ")
}

fn id_params<'a>(
    canonical_id: &'a String,
    duplicate_ids: &'a [String],
) -> Vec<&'a dyn rusqlite::types::ToSql> {
    let mut out: Vec<&dyn rusqlite::types::ToSql> = vec![canonical_id];
    for id in duplicate_ids {
        out.push(id);
    }
    out
}

fn reassign_simple(
    conn: &Connection,
    table: &str,
    canonical_id: &String,
    duplicate_ids: &[String],
) -> Result<usize, AppError> {
    let sql = format!(
        "UPDATE {table} SET job_posting_id = ?1 WHERE job_posting_id IN ({})",
        placeholders(duplicate_ids.len(), 1)
    );
    Ok(conn.execute(&sql, id_params(canonical_id, duplicate_ids).as_slice())?)
}

/// Two-phase reassignment for tables with UNIQUE(persona_id,
/// job_posting_id): move rows whose persona has no canonical link, then
/// delete the conflicting remainder. Returns (reassigned, deleted).
fn reassign_two_phase(
    conn: &Connection,
    table: &str,
    canonical_id: &String,
    duplicate_ids: &[String],
) -> Result<(usize, usize), AppError> {
    let update_sql = format!(
        "UPDATE {table} SET job_posting_id = ?1
         WHERE job_posting_id IN ({ids})
           AND NOT EXISTS (
               SELECT 1 FROM {table} other
               WHERE other.persona_id = {table}.persona_id
                 AND other.job_posting_id = ?1
           )",
        ids = placeholders(duplicate_ids.len(), 1)
    );
    let reassigned = conn.execute(&update_sql, id_params(canonical_id, duplicate_ids).as_slice())?;

    let delete_sql = format!(
        "DELETE FROM {table} WHERE job_posting_id IN ({})",
        placeholders(duplicate_ids.len(), 0)
    );
    let dup_params: Vec<&dyn rusqlite::types::ToSql> =
        duplicate_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
    let conflicts = conn.execute(&delete_sql, dup_params.as_slice())?;

    if conflicts > 0 {
        tracing::info!(
            table,
            conflicts,
            "Deleted conflicting rows (persona already linked to canonical)"
        );
    }
    Ok((reassigned, conflicts))
}

/// Merge also_found_on arrays into the canonical row, deduplicated by
/// source_id.
fn merge_also_found_on(
    conn: &Connection,
    canonical_id: &String,
    duplicate_ids: &[String],
) -> Result<(), AppError> {
    let sql = format!(
        "SELECT also_found_on FROM job_postings WHERE id IN ({})",
        placeholders(duplicate_ids.len() + 1, 0)
    );
    let mut all_ids: Vec<&dyn rusqlite::types::ToSql> = vec![canonical_id];
    for id in duplicate_ids {
        all_ids.push(id);
    }

    let mut stmt = conn.prepare(&sql)?;
    let envelopes: Vec<AlsoFoundOn> = stmt
        .query_map(all_ids.as_slice(), |row| row.get::<_, String>(0))?
        .filter_map(|r| r.ok())
        .map(|raw| AlsoFoundOn::parse(Some(&raw)))
        .collect();

    let mut seen: std::collections::HashSet<String> = std::collections::HashSet::new();
    let mut merged: Vec<AlsoFoundOnSource> = Vec::new();
    for envelope in envelopes {
        for source in envelope.sources {
            if !source.source_id.is_empty() && seen.insert(source.source_id.clone()) {
                merged.push(source);
            }
        }
    }

    if !merged.is_empty() {
        conn.execute(
            "UPDATE job_postings SET also_found_on = ?1 WHERE id = ?2",
            params![AlsoFoundOn { sources: merged }.to_json_string(), canonical_id],
        )?;
    }
    Ok(())
}

fn delete_rows(conn: &Connection, duplicate_ids: &[String]) -> Result<usize, AppError> {
    let sql = format!(
        "DELETE FROM job_postings WHERE id IN ({})",
        placeholders(duplicate_ids.len(), 0)
    );
    let dup_params: Vec<&dyn rusqlite::types::ToSql> =
        duplicate_ids.iter().map(|id| id as &dyn rusqlite::types::ToSql).collect();
    Ok(conn.execute(&sql, dup_params.as_slice())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreatePersonaInput, CreatePersonaJob, CreateUserInput};
    use crate::db::repos::{persona_jobs, personas, sources, users};
    use crate::db::DbPool;
    use crate::engine::similarity::description_hash;

    /// Rebuild job_postings without its UNIQUE constraints, simulating the
    /// post-cutover legacy state the merge exists to clean up.
    fn drop_hash_uniqueness(conn: &Connection) {
        conn.execute_batch(
            "PRAGMA foreign_keys = OFF;
             CREATE TABLE jp_legacy AS SELECT * FROM job_postings;
             DROP TABLE job_postings;
             ALTER TABLE jp_legacy RENAME TO job_postings;
             CREATE UNIQUE INDEX idx_jp_legacy_id ON job_postings(id);
             PRAGMA foreign_keys = ON;",
        )
        .unwrap();
    }

    fn insert_raw_posting(
        conn: &Connection,
        source_id: &str,
        company: &str,
        description: &str,
        created_at: &str,
        also_found_on: &str,
    ) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO job_postings
             (id, source_id, job_title, company_name, description, description_hash,
              also_found_on, first_seen_date, is_active, is_quarantined, ghost_score,
              repost_count, created_at, updated_at)
             VALUES (?1, ?2, 'Engineer', ?3, ?4, ?5, ?6, '2026-01-01', 1, 0, 0, 0, ?7, ?7)",
            params![id, source_id, company, description, description_hash(description), also_found_on, created_at],
        )
        .unwrap();
        id
    }

    fn make_persona(pool: &DbPool, name: &str) -> String {
        let conn = pool.get().unwrap();
        let user = users::create(&conn, CreateUserInput {
            email: format!("{}@example.com", uuid::Uuid::new_v4()),
            password_hash: None,
            is_admin: None,
        }).unwrap();
        personas::create(&conn, CreatePersonaInput {
            user_id: user.id,
            full_name: name.into(),
            email: "m@example.com".into(),
            ..Default::default()
        }).unwrap().id
    }

    #[test]
    fn test_merge_keeps_oldest_and_resolves_link_conflicts() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        drop_hash_uniqueness(&conn);

        let source_a = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        let source_b = sources::resolve_source_id(&conn, "RemoteOK").unwrap().unwrap();

        let canonical = insert_raw_posting(
            &conn, &source_a, "Acme Corp", "shared description",
            "2026-01-01T00:00:00+00:00",
            &format!(r#"{{"sources":[{{"source_id":"{source_a}","found_at":"2026-01-01T00:00:00Z"}}]}}"#),
        );
        let duplicate = insert_raw_posting(
            &conn, &source_b, "acme corp ", "shared description",
            "2026-02-01T00:00:00+00:00",
            &format!(r#"{{"sources":[{{"source_id":"{source_b}","found_at":"2026-02-01T00:00:00Z"}}]}}"#),
        );

        // Persona 1 links only the duplicate → gets reassigned.
        // Persona 2 links both → the duplicate link is a conflict, deleted.
        let persona_1 = make_persona(&pool, "Reassignee");
        let persona_2 = make_persona(&pool, "Conflicted");
        for (persona, job) in [
            (&persona_1, &duplicate),
            (&persona_2, &canonical),
            (&persona_2, &duplicate),
        ] {
            persona_jobs::create(
                &conn,
                &CreatePersonaJob {
                    persona_id: persona.clone(),
                    job_posting_id: job.clone(),
                    discovery_method: "scouter".into(),
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        }

        let stats = run_dedup(&mut conn).unwrap();
        assert_eq!(stats.groups_found, 1);
        assert_eq!(stats.groups_merged, 1);
        assert_eq!(stats.duplicates_deleted, 1);
        assert_eq!(stats.persona_jobs_reassigned, 1);
        assert_eq!(stats.persona_jobs_conflicts, 1);

        // The oldest row survives; the duplicate is gone.
        let remaining: Vec<String> = {
            let mut stmt = conn.prepare("SELECT id FROM job_postings").unwrap();
            stmt.query_map([], |row| row.get(0)).unwrap().filter_map(|r| r.ok()).collect()
        };
        assert_eq!(remaining, vec![canonical.clone()]);

        // Both personas end with exactly one link each, to the canonical.
        for persona in [&persona_1, &persona_2] {
            let link = persona_jobs::get_by_persona_and_job(&conn, persona, &canonical, None)
                .unwrap()
                .unwrap();
            assert_eq!(link.job_posting_id, canonical);
        }

        // also_found_on merged, deduplicated by source.
        let merged: String = conn
            .query_row(
                "SELECT also_found_on FROM job_postings WHERE id = ?1",
                params![canonical],
                |row| row.get(0),
            )
            .unwrap();
        let envelope = AlsoFoundOn::parse(Some(&merged));
        assert_eq!(envelope.sources.len(), 2);

        // Hash uniqueness was restored; a second run is a no-op.
        let second = run_dedup(&mut conn).unwrap();
        assert_eq!(second.groups_found, 0);
    }

    #[test]
    fn test_company_mismatch_guard() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        drop_hash_uniqueness(&conn);

        let source = sources::resolve_source_id(&conn, "Adzuna").unwrap().unwrap();
        insert_raw_posting(&conn, &source, "Acme Corp", "collision text",
            "2026-01-01T00:00:00+00:00", r#"{"sources":[]}"#);
        insert_raw_posting(&conn, &source, "Globex Inc", "collision text",
            "2026-02-01T00:00:00+00:00", r#"{"sources":[]}"#);

        let stats = run_dedup(&mut conn).unwrap();
        assert_eq!(stats.groups_found, 1);
        assert_eq!(stats.groups_skipped, 1);
        assert_eq!(stats.groups_merged, 0);

        // Nothing deleted.
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_postings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }
}
