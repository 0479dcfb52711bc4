use rusqlite::{params, Connection, Row};

use crate::db::models::{CreateUserInput, User};
use crate::error::AppError;

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        email: row.get("email")?,
        password_hash: row.get("password_hash")?,
        email_verified_at: row.get("email_verified_at")?,
        is_admin: row.get::<_, i64>("is_admin")? != 0,
        balance_usd_micros: row.get("balance_usd_micros")?,
        token_invalidated_before: row.get("token_invalidated_before")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get_by_id(conn: &Connection, id: &str) -> Result<User, AppError> {
    conn.query_row("SELECT * FROM users WHERE id = ?1", params![id], row_to_user)
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("User {id}")),
            other => AppError::Database(other),
        })
}

pub fn get_by_email(conn: &Connection, email: &str) -> Result<Option<User>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM users WHERE email = ?1 COLLATE NOCASE")?;
    let mut rows = stmt.query_map(params![email], row_to_user)?;
    Ok(rows.next().transpose()?)
}

pub fn create(conn: &Connection, input: CreateUserInput) -> Result<User, AppError> {
    if input.email.trim().is_empty() || !input.email.contains('@') {
        return Err(AppError::Validation("Invalid email".into()));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO users (id, email, password_hash, is_admin, balance_usd_micros,
                            created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![
            id,
            input.email.trim(),
            input.password_hash,
            input.is_admin.unwrap_or(false) as i64,
            now,
        ],
    )?;
    get_by_id(conn, &id)
}

pub fn set_admin(
    conn: &Connection,
    id: &str,
    is_admin: bool,
    invalidate_tokens: bool,
) -> Result<User, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let rows = if invalidate_tokens {
        conn.execute(
            "UPDATE users SET is_admin = ?1, token_invalidated_before = ?2, updated_at = ?2
             WHERE id = ?3",
            params![is_admin as i64, now, id],
        )?
    } else {
        conn.execute(
            "UPDATE users SET is_admin = ?1, updated_at = ?2 WHERE id = ?3",
            params![is_admin as i64, now, id],
        )?
    };
    if rows == 0 {
        return Err(AppError::NotFound(format!("User {id}")));
    }
    get_by_id(conn, id)
}

pub fn delete(conn: &Connection, id: &str) -> Result<bool, AppError> {
    let rows = conn.execute("DELETE FROM users WHERE id = ?1", params![id])?;
    Ok(rows > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;

    #[test]
    fn test_create_and_fetch() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();

        let user = create(
            &conn,
            CreateUserInput {
                email: "alice@example.com".into(),
                password_hash: Some("hash".into()),
                is_admin: None,
            },
        )
        .unwrap();
        assert!(!user.is_admin);
        assert_eq!(user.balance_usd_micros, 0);

        // Case-insensitive email lookup
        let found = get_by_email(&conn, "ALICE@example.com").unwrap();
        assert_eq!(found.unwrap().id, user.id);
    }

    #[test]
    fn test_duplicate_email_rejected() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();

        let input = CreateUserInput {
            email: "bob@example.com".into(),
            password_hash: None,
            is_admin: None,
        };
        create(&conn, input.clone()).unwrap();
        let err = create(&conn, input).unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[test]
    fn test_set_admin_bumps_token_watermark() {
        let pool = init_test_db().unwrap();
        let conn = pool.get().unwrap();

        let user = create(
            &conn,
            CreateUserInput {
                email: "carol@example.com".into(),
                password_hash: None,
                is_admin: Some(true),
            },
        )
        .unwrap();
        assert!(user.token_invalidated_before.is_none());

        let demoted = set_admin(&conn, &user.id, false, true).unwrap();
        assert!(!demoted.is_admin);
        assert!(demoted.token_invalidated_before.is_some());
    }
}
