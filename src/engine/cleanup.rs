//! Retention cleanup: orphan PDFs (7 days), resolved change flags
//! (30 days), archived variants and cover letters (180 days), and
//! expired/dismissed non-favorite links (180 days, favorites protected).

use rusqlite::{params, Connection};

use crate::error::AppError;

#[derive(Debug, Default, Clone)]
pub struct CleanupStats {
    pub orphan_pdfs: usize,
    pub resolved_change_flags: usize,
    pub archived_variants: usize,
    pub archived_cover_letters: usize,
    pub expired_links: usize,
}

impl CleanupStats {
    pub fn total(&self) -> usize {
        self.orphan_pdfs
            + self.resolved_change_flags
            + self.archived_variants
            + self.archived_cover_letters
            + self.expired_links
    }
}

fn cutoff(days: i64) -> String {
    (chrono::Utc::now() - chrono::Duration::days(days)).to_rfc3339()
}

/// Delete submitted PDFs not linked to any application, older than 7 days.
pub fn cleanup_orphan_pdfs(conn: &Connection) -> Result<usize, AppError> {
    Ok(conn.execute(
        "DELETE FROM submitted_pdfs WHERE application_id IS NULL AND generated_at < ?1",
        params![cutoff(7)],
    )?)
}

/// Delete change flags resolved more than 30 days ago.
pub fn cleanup_resolved_change_flags(conn: &Connection) -> Result<usize, AppError> {
    Ok(conn.execute(
        "DELETE FROM persona_change_flags
         WHERE resolved = 1 AND resolved_at IS NOT NULL AND resolved_at < ?1",
        params![cutoff(30)],
    )?)
}

/// Hard-delete variants and cover letters archived over 180 days ago.
pub fn cleanup_archived_content(conn: &Connection) -> Result<(usize, usize), AppError> {
    let threshold = cutoff(180);
    let variants = conn.execute(
        "DELETE FROM job_variants
         WHERE status = 'Archived' AND archived_at IS NOT NULL AND archived_at < ?1",
        params![threshold],
    )?;
    let letters = conn.execute(
        "DELETE FROM cover_letters
         WHERE status = 'Archived' AND archived_at IS NOT NULL AND archived_at < ?1",
        params![threshold],
    )?;
    Ok((variants, letters))
}

/// Hard-delete Expired/Dismissed links untouched for 180 days. Favorited
/// links are never deleted.
pub fn cleanup_expired_links(conn: &Connection) -> Result<usize, AppError> {
    Ok(conn.execute(
        "DELETE FROM persona_jobs
         WHERE status IN ('Expired', 'Dismissed')
           AND is_favorite = 0
           AND updated_at < ?1",
        params![cutoff(180)],
    )?)
}

pub fn run_all(conn: &Connection) -> Result<CleanupStats, AppError> {
    let orphan_pdfs = cleanup_orphan_pdfs(conn)?;
    let resolved_change_flags = cleanup_resolved_change_flags(conn)?;
    let (archived_variants, archived_cover_letters) = cleanup_archived_content(conn)?;
    let expired_links = cleanup_expired_links(conn)?;
    Ok(CleanupStats {
        orphan_pdfs,
        resolved_change_flags,
        archived_variants,
        archived_cover_letters,
        expired_links,
    })
}
