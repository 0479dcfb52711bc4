use rusqlite::{params, Connection, Row};

use crate::db::models::{
    AchievementStory, Certification, CreatePersonaInput, CustomNonNegotiable, Education, Persona,
    PersonaEmbedding, Skill, VoiceProfile, WorkHistory, WorkHistoryBullet,
};
use crate::error::AppError;

fn json_vec(row: &Row, col: &str) -> rusqlite::Result<Vec<String>> {
    let raw: String = row.get(col)?;
    Ok(serde_json::from_str(&raw).unwrap_or_default())
}

fn row_to_persona(row: &Row) -> rusqlite::Result<Persona> {
    Ok(Persona {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        full_name: row.get("full_name")?,
        email: row.get("email")?,
        phone: row.get("phone")?,
        home_city: row.get("home_city")?,
        home_state: row.get("home_state")?,
        home_country: row.get("home_country")?,
        linkedin_url: row.get("linkedin_url")?,
        portfolio_url: row.get("portfolio_url")?,
        professional_summary: row.get("professional_summary")?,
        years_experience: row.get("years_experience")?,
        current_role: row.get("current_role")?,
        current_company: row.get("current_company")?,
        target_roles: json_vec(row, "target_roles")?,
        target_skills: json_vec(row, "target_skills")?,
        commutable_cities: json_vec(row, "commutable_cities")?,
        industry_exclusions: json_vec(row, "industry_exclusions")?,
        minimum_base_salary: row.get("minimum_base_salary")?,
        salary_currency: row.get("salary_currency")?,
        remote_preference: row.get("remote_preference")?,
        visa_sponsorship_required: row.get::<_, i64>("visa_sponsorship_required")? != 0,
        stretch_appetite: row.get("stretch_appetite")?,
        minimum_fit_threshold: row.get("minimum_fit_threshold")?,
        auto_draft_threshold: row.get("auto_draft_threshold")?,
        onboarding_complete: row.get::<_, i64>("onboarding_complete")? != 0,
        polling_frequency: row.get("polling_frequency")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<Persona, AppError> {
    conn.query_row("SELECT * FROM personas WHERE id = ?1", params![id], row_to_persona)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Persona {id}")),
            other => AppError::Database(other),
        })
}

/// Fetch a persona only if it belongs to the given user. Tenant isolation:
/// a wrong-owner id behaves exactly like a missing id.
pub fn get_owned(conn: &Connection, id: &str, user_id: &str) -> Result<Option<Persona>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM personas WHERE id = ?1 AND user_id = ?2")?;
    let mut rows = stmt.query_map(params![id, user_id], row_to_persona)?;
    Ok(rows.next().transpose()?)
}

pub fn is_owned_by(conn: &Connection, id: &str, user_id: &str) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM personas WHERE id = ?1 AND user_id = ?2",
        params![id, user_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Personas that completed onboarding, oldest first, capped by `limit`.
pub fn get_onboarded(conn: &Connection, limit: i64) -> Result<Vec<Persona>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM personas WHERE onboarding_complete = 1 ORDER BY created_at LIMIT ?1",
    )?;
    let rows = stmt.query_map(params![limit], row_to_persona)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn create(conn: &Connection, input: CreatePersonaInput) -> Result<Persona, AppError> {
    if input.full_name.trim().is_empty() {
        return Err(AppError::Validation("Full name cannot be empty".into()));
    }
    for threshold in [input.minimum_fit_threshold, input.auto_draft_threshold]
        .into_iter()
        .flatten()
    {
        if !(0..=100).contains(&threshold) {
            return Err(AppError::Validation("Thresholds must be within 0-100".into()));
        }
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let to_json = |v: Option<Vec<String>>| {
        serde_json::to_string(&v.unwrap_or_default()).unwrap_or_else(|_| "[]".into())
    };

    conn.execute(
        "INSERT INTO personas
         (id, user_id, full_name, email, years_experience,
          target_roles, target_skills, commutable_cities, industry_exclusions,
          minimum_base_salary, remote_preference, visa_sponsorship_required,
          minimum_fit_threshold, auto_draft_threshold, onboarding_complete,
          polling_frequency, created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?17)",
        params![
            id,
            input.user_id,
            input.full_name,
            input.email,
            input.years_experience,
            to_json(input.target_roles),
            to_json(input.target_skills),
            to_json(input.commutable_cities),
            to_json(input.industry_exclusions),
            input.minimum_base_salary,
            input.remote_preference.unwrap_or_else(|| "No Preference".into()),
            input.visa_sponsorship_required.unwrap_or(false) as i64,
            input.minimum_fit_threshold.unwrap_or(60),
            input.auto_draft_threshold.unwrap_or(85),
            input.onboarding_complete.unwrap_or(false) as i64,
            input.polling_frequency.unwrap_or_else(|| "daily".into()),
            now,
        ],
    )?;

    get_by_id(conn, &id)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool, AppError> {
    let rows = conn.execute("DELETE FROM personas WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

// ============================================================================
// Children
// ============================================================================

fn row_to_skill(row: &Row) -> rusqlite::Result<Skill> {
    Ok(Skill {
        id: row.get("id")?,
        persona_id: row.get("persona_id")?,
        skill_name: row.get("skill_name")?,
        skill_type: row.get("skill_type")?,
        years_used: row.get("years_used")?,
        created_at: row.get("created_at")?,
    })
}

pub fn get_skills(conn: &Connection, persona_id: &str) -> Result<Vec<Skill>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM persona_skills WHERE persona_id = ?1 ORDER BY skill_name")?;
    let rows = stmt.query_map(params![persona_id], row_to_skill)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn add_skill(
    conn: &Connection,
    persona_id: &str,
    skill_name: &str,
    skill_type: &str,
) -> Result<Skill, AppError> {
    if skill_name.trim().is_empty() {
        return Err(AppError::Validation("Skill name cannot be empty".into()));
    }
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO persona_skills (id, persona_id, skill_name, skill_type, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, persona_id, skill_name.trim(), skill_type, now],
    )?;
    conn.query_row(
        "SELECT * FROM persona_skills WHERE id = ?1",
        params![id],
        row_to_skill,
    )
    .map_err(AppError::Database)
}

pub fn add_work_history(
    conn: &Connection,
    persona_id: &str,
    company: &str,
    title: &str,
    sort_order: i64,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO work_histories (id, persona_id, company, title, sort_order, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, persona_id, company, title, sort_order, now],
    )?;
    Ok(id)
}

pub fn add_work_history_bullet(
    conn: &Connection,
    work_history_id: &str,
    text: &str,
    sort_order: i64,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO work_history_bullets (id, work_history_id, text, sort_order, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, work_history_id, text, sort_order, now],
    )?;
    Ok(id)
}

/// Work histories with their bullets, both in sort order.
pub fn get_work_histories(
    conn: &Connection,
    persona_id: &str,
) -> Result<Vec<WorkHistory>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM work_histories WHERE persona_id = ?1 ORDER BY sort_order, created_at",
    )?;
    let histories: Vec<WorkHistory> = stmt
        .query_map(params![persona_id], |row| {
            Ok(WorkHistory {
                id: row.get("id")?,
                persona_id: row.get("persona_id")?,
                company: row.get("company")?,
                title: row.get("title")?,
                start_date: row.get("start_date")?,
                end_date: row.get("end_date")?,
                sort_order: row.get("sort_order")?,
                bullets: vec![],
                created_at: row.get("created_at")?,
            })
        })?
        .filter_map(|r| r.ok())
        .collect();

    let mut bullet_stmt = conn.prepare(
        "SELECT * FROM work_history_bullets WHERE work_history_id = ?1
         ORDER BY sort_order, created_at",
    )?;
    let mut result = Vec::with_capacity(histories.len());
    for mut history in histories {
        history.bullets = bullet_stmt
            .query_map(params![history.id], |row| {
                Ok(WorkHistoryBullet {
                    id: row.get("id")?,
                    work_history_id: row.get("work_history_id")?,
                    text: row.get("text")?,
                    sort_order: row.get("sort_order")?,
                    created_at: row.get("created_at")?,
                })
            })?
            .filter_map(|r| r.ok())
            .collect();
        result.push(history);
    }
    Ok(result)
}

pub fn add_education(
    conn: &Connection,
    persona_id: &str,
    institution: &str,
    degree: Option<&str>,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO educations (id, persona_id, institution, degree, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, persona_id, institution, degree, now],
    )?;
    Ok(id)
}

pub fn get_educations(conn: &Connection, persona_id: &str) -> Result<Vec<Education>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM educations WHERE persona_id = ?1 ORDER BY created_at")?;
    let rows = stmt.query_map(params![persona_id], |row| {
        Ok(Education {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            institution: row.get("institution")?,
            degree: row.get("degree")?,
            field_of_study: row.get("field_of_study")?,
            graduation_year: row.get("graduation_year")?,
            created_at: row.get("created_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn add_certification(
    conn: &Connection,
    persona_id: &str,
    name: &str,
    issuer: Option<&str>,
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO certifications (id, persona_id, name, issuer, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, persona_id, name, issuer, now],
    )?;
    Ok(id)
}

pub fn get_certifications(
    conn: &Connection,
    persona_id: &str,
) -> Result<Vec<Certification>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM certifications WHERE persona_id = ?1 ORDER BY created_at")?;
    let rows = stmt.query_map(params![persona_id], |row| {
        Ok(Certification {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            name: row.get("name")?,
            issuer: row.get("issuer")?,
            issued_year: row.get("issued_year")?,
            created_at: row.get("created_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_stories(conn: &Connection, persona_id: &str) -> Result<Vec<AchievementStory>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM achievement_stories WHERE persona_id = ?1 ORDER BY created_at",
    )?;
    let rows = stmt.query_map(params![persona_id], |row| {
        Ok(AchievementStory {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            title: row.get("title")?,
            situation: row.get("situation")?,
            action: row.get("action")?,
            result: row.get("result")?,
            skills_demonstrated: json_vec(row, "skills_demonstrated")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn add_story(
    conn: &Connection,
    persona_id: &str,
    title: &str,
    situation: &str,
    action: &str,
    result: &str,
    skills_demonstrated: &[String],
) -> Result<String, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO achievement_stories
         (id, persona_id, title, situation, action, result, skills_demonstrated,
          created_at, updated_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?8)",
        params![
            id,
            persona_id,
            title,
            situation,
            action,
            result,
            serde_json::to_string(skills_demonstrated)?,
            now,
        ],
    )?;
    Ok(id)
}

pub fn get_voice_profile(
    conn: &Connection,
    persona_id: &str,
) -> Result<Option<VoiceProfile>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM voice_profiles WHERE persona_id = ?1")?;
    let mut rows = stmt.query_map(params![persona_id], |row| {
        Ok(VoiceProfile {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            tone: row.get("tone")?,
            formality: row.get("formality")?,
            sample_text: row.get("sample_text")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    })?;
    Ok(rows.next().transpose()?)
}

pub fn get_non_negotiables(
    conn: &Connection,
    persona_id: &str,
) -> Result<Vec<CustomNonNegotiable>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM custom_non_negotiables WHERE persona_id = ?1")?;
    let rows = stmt.query_map(params![persona_id], |row| {
        Ok(CustomNonNegotiable {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            criterion: row.get("criterion")?,
            expected_answer: row.get::<_, i64>("expected_answer")? != 0,
            created_at: row.get("created_at")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Insert or replace a persona embedding for one embedding_type.
pub fn upsert_embedding(
    conn: &Connection,
    persona_id: &str,
    embedding_type: &str,
    vector: &[f32],
    model: &str,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO persona_embeddings (id, persona_id, embedding_type, vector, model, generated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(persona_id, embedding_type)
         DO UPDATE SET vector = excluded.vector, model = excluded.model,
                       generated_at = excluded.generated_at",
        params![
            uuid::Uuid::new_v4().to_string(),
            persona_id,
            embedding_type,
            serde_json::to_string(vector)?,
            model,
            now,
        ],
    )?;
    Ok(())
}

pub fn get_embedding(
    conn: &Connection,
    persona_id: &str,
    embedding_type: &str,
) -> Result<Option<PersonaEmbedding>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM persona_embeddings WHERE persona_id = ?1 AND embedding_type = ?2",
    )?;
    let mut rows = stmt.query_map(params![persona_id, embedding_type], |row| {
        let raw: String = row.get("vector")?;
        Ok(PersonaEmbedding {
            id: row.get("id")?,
            persona_id: row.get("persona_id")?,
            embedding_type: row.get("embedding_type")?,
            vector: serde_json::from_str(&raw).unwrap_or_default(),
            model: row.get("model")?,
            generated_at: row.get("generated_at")?,
        })
    })?;
    Ok(rows.next().transpose()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::repos::users;

    fn make_user(conn: &Connection) -> String {
        users::create(
            conn,
            crate::db::models::CreateUserInput {
                email: format!("{}@example.com", uuid::Uuid::new_v4()),
                password_hash: None,
                is_admin: None,
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn test_create_and_ownership() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user_a = make_user(&conn);
        let user_b = make_user(&conn);

        let persona = create(
            &conn,
            CreatePersonaInput {
                user_id: user_a.clone(),
                full_name: "Jordan Smith".into(),
                email: "jordan@example.com".into(),
                target_skills: Some(vec!["Rust".into(), "SQL".into()]),
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(persona.remote_preference, "No Preference");
        assert_eq!(persona.target_skills, vec!["Rust", "SQL"]);

        // Owner sees it; the other user sees nothing.
        assert!(get_owned(&conn, &persona.id, &user_a).unwrap().is_some());
        assert!(get_owned(&conn, &persona.id, &user_b).unwrap().is_none());
    }

    #[test]
    fn test_duplicate_skill_rejected() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = make_user(&conn);
        let persona = create(
            &conn,
            CreatePersonaInput {
                user_id: user,
                full_name: "Skill Owner".into(),
                email: "s@example.com".into(),
                ..Default::default()
            },
        )
        .unwrap();

        add_skill(&conn, &persona.id, "Rust", "Hard").unwrap();
        let err = add_skill(&conn, &persona.id, "Rust", "Hard").unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_embedding_upsert_replaces() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = make_user(&conn);
        let persona = create(
            &conn,
            CreatePersonaInput {
                user_id: user,
                full_name: "Vec Owner".into(),
                email: "v@example.com".into(),
                ..Default::default()
            },
        )
        .unwrap();

        upsert_embedding(&conn, &persona.id, "hard_skills", &[0.1, 0.2], "embed-1").unwrap();
        upsert_embedding(&conn, &persona.id, "hard_skills", &[0.3, 0.4], "embed-1").unwrap();

        let emb = get_embedding(&conn, &persona.id, "hard_skills").unwrap().unwrap();
        assert_eq!(emb.vector, vec![0.3, 0.4]);
    }

    #[test]
    fn test_work_history_bullets_ordered() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = make_user(&conn);
        let persona = create(
            &conn,
            CreatePersonaInput {
                user_id: user,
                full_name: "History Owner".into(),
                email: "h@example.com".into(),
                ..Default::default()
            },
        )
        .unwrap();

        let history = add_work_history(&conn, &persona.id, "Acme", "Engineer", 0).unwrap();
        add_work_history_bullet(&conn, &history, "Second bullet", 1).unwrap();
        add_work_history_bullet(&conn, &history, "First bullet", 0).unwrap();
        add_education(&conn, &persona.id, "State University", Some("BSc")).unwrap();
        add_certification(&conn, &persona.id, "CKA", Some("CNCF")).unwrap();

        let histories = get_work_histories(&conn, &persona.id).unwrap();
        assert_eq!(histories.len(), 1);
        assert_eq!(histories[0].bullets.len(), 2);
        assert_eq!(histories[0].bullets[0].text, "First bullet");

        assert_eq!(get_educations(&conn, &persona.id).unwrap().len(), 1);
        assert_eq!(get_certifications(&conn, &persona.id).unwrap().len(), 1);
    }

    #[test]
    fn test_user_delete_cascades_to_persona() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();
        let user = make_user(&conn);
        let persona = create(
            &conn,
            CreatePersonaInput {
                user_id: user.clone(),
                full_name: "Cascade Target".into(),
                email: "c@example.com".into(),
                ..Default::default()
            },
        )
        .unwrap();

        users::delete(&conn, &user).unwrap();
        assert!(get_by_id(&conn, &persona.id).is_err());
    }
}
