//! Usage records, the credit ledger, and the atomic debit path.

use rusqlite::{params, Connection, Row};

use crate::db::models::{CreditTransaction, LlmUsageRecord};
use crate::error::AppError;

fn row_to_usage(row: &Row) -> rusqlite::Result<LlmUsageRecord> {
    Ok(LlmUsageRecord {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        task_type: row.get("task_type")?,
        input_tokens: row.get("input_tokens")?,
        output_tokens: row.get("output_tokens")?,
        raw_cost_usd_micros: row.get("raw_cost_usd_micros")?,
        billed_cost_usd_micros: row.get("billed_cost_usd_micros")?,
        margin_multiplier: row.get("margin_multiplier")?,
        created_at: row.get("created_at")?,
    })
}

fn row_to_transaction(row: &Row) -> rusqlite::Result<CreditTransaction> {
    Ok(CreditTransaction {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        amount_usd_micros: row.get("amount_usd_micros")?,
        transaction_type: row.get("transaction_type")?,
        reference_id: row.get("reference_id")?,
        description: row.get("description")?,
        created_at: row.get("created_at")?,
    })
}

pub fn usage_for_user(conn: &Connection, user_id: &str) -> Result<Vec<LlmUsageRecord>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM llm_usage_records WHERE user_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_usage)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn transactions_for_user(
    conn: &Connection,
    user_id: &str,
) -> Result<Vec<CreditTransaction>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM credit_transactions WHERE user_id = ?1 ORDER BY created_at DESC",
    )?;
    let rows = stmt.query_map(params![user_id], row_to_transaction)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// Ledger sum for a user in micro-USD. Equals the stored balance under the
/// balance-integrity invariant.
pub fn ledger_sum(conn: &Connection, user_id: &str) -> Result<i64, AppError> {
    let sum: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_usd_micros), 0) FROM credit_transactions WHERE user_id = ?1",
        params![user_id],
        |row| row.get(0),
    )?;
    Ok(sum)
}

/// Record a metered call and debit the balance atomically.
///
/// One IMMEDIATE transaction takes the write lock up front, then inserts
/// the usage record, inserts a usage_debit ledger row, and decrements the
/// balance. The balance CHECK constraint keeps it from going negative.
#[allow(clippy::too_many_arguments)]
pub fn record_usage_and_debit(
    conn: &mut Connection,
    user_id: &str,
    provider: &str,
    model: &str,
    task_type: &str,
    input_tokens: i64,
    output_tokens: i64,
    raw_cost_usd_micros: i64,
    billed_cost_usd_micros: i64,
    margin_multiplier: f64,
) -> Result<LlmUsageRecord, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let usage_id = uuid::Uuid::new_v4().to_string();
    let txn_id = uuid::Uuid::new_v4().to_string();

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;

    tx.execute(
        "INSERT INTO llm_usage_records
         (id, user_id, provider, model, task_type, input_tokens, output_tokens,
          raw_cost_usd_micros, billed_cost_usd_micros, margin_multiplier, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            usage_id,
            user_id,
            provider,
            model,
            task_type,
            input_tokens,
            output_tokens,
            raw_cost_usd_micros,
            billed_cost_usd_micros,
            margin_multiplier,
            now,
        ],
    )?;

    tx.execute(
        "INSERT INTO credit_transactions
         (id, user_id, amount_usd_micros, transaction_type, reference_id, description, created_at)
         VALUES (?1, ?2, ?3, 'usage_debit', ?4, ?5, ?6)",
        params![
            txn_id,
            user_id,
            -billed_cost_usd_micros,
            usage_id,
            format!("{provider}/{model} {task_type}"),
            now,
        ],
    )?;

    let updated = tx.execute(
        "UPDATE users SET balance_usd_micros = balance_usd_micros - ?1, updated_at = ?2
         WHERE id = ?3",
        params![billed_cost_usd_micros, now, user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("User {user_id}")));
    }

    tx.commit()?;

    let record = conn.query_row(
        "SELECT * FROM llm_usage_records WHERE id = ?1",
        params![usage_id],
        row_to_usage,
    )?;
    Ok(record)
}

/// Credit a user (purchase, admin grant, refund) atomically with a matching
/// ledger row.
pub fn record_credit(
    conn: &mut Connection,
    user_id: &str,
    amount_usd_micros: i64,
    transaction_type: &str,
    reference_id: Option<&str>,
    description: Option<&str>,
) -> Result<CreditTransaction, AppError> {
    if amount_usd_micros <= 0 {
        return Err(AppError::Validation("Credit amount must be positive".into()));
    }

    let now = chrono::Utc::now().to_rfc3339();
    let txn_id = uuid::Uuid::new_v4().to_string();

    let tx = conn.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
    tx.execute(
        "INSERT INTO credit_transactions
         (id, user_id, amount_usd_micros, transaction_type, reference_id, description, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![txn_id, user_id, amount_usd_micros, transaction_type, reference_id, description, now],
    )?;
    let updated = tx.execute(
        "UPDATE users SET balance_usd_micros = balance_usd_micros + ?1, updated_at = ?2
         WHERE id = ?3",
        params![amount_usd_micros, now, user_id],
    )?;
    if updated == 0 {
        return Err(AppError::NotFound(format!("User {user_id}")));
    }
    tx.commit()?;

    let txn = conn.query_row(
        "SELECT * FROM credit_transactions WHERE id = ?1",
        params![txn_id],
        row_to_transaction,
    )?;
    Ok(txn)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreateUserInput, TXN_ADMIN_GRANT};
    use crate::db::repos::users;

    fn funded_user(conn: &mut Connection, micros: i64) -> String {
        let user = users::create(
            conn,
            CreateUserInput {
                email: format!("{}@example.com", uuid::Uuid::new_v4()),
                password_hash: None,
                is_admin: None,
            },
        )
        .unwrap();
        record_credit(conn, &user.id, micros, TXN_ADMIN_GRANT, None, Some("seed")).unwrap();
        user.id
    }

    #[test]
    fn test_debit_updates_balance_and_ledger() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        // $10.000000
        let user_id = funded_user(&mut conn, 10_000_000);

        // raw 0.0025, billed 0.00325 at margin 1.30
        let record = record_usage_and_debit(
            &mut conn, &user_id, "claude", "m1", "score_rationale",
            1000, 500, 2_500, 3_250, 1.30,
        )
        .unwrap();
        assert_eq!(record.raw_cost_usd_micros, 2_500);
        assert_eq!(record.billed_cost_usd_micros, 3_250);

        let user = users::get_by_id(&conn, &user_id).unwrap();
        // 10.000000 - 0.003250 = 9.996750
        assert_eq!(user.balance_usd_micros, 9_996_750);

        // Ledger row mirrors the debit and the sum matches the balance.
        let txns = transactions_for_user(&conn, &user_id).unwrap();
        let debit = txns.iter().find(|t| t.transaction_type == "usage_debit").unwrap();
        assert_eq!(debit.amount_usd_micros, -3_250);
        assert_eq!(ledger_sum(&conn, &user_id).unwrap(), user.balance_usd_micros);
    }

    #[test]
    fn test_debit_cannot_overdraw() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let user_id = funded_user(&mut conn, 1_000);

        let err = record_usage_and_debit(
            &mut conn, &user_id, "claude", "m1", "cover_letter",
            1000, 1000, 2_000, 2_600, 1.30,
        )
        .unwrap_err();
        assert!(matches!(err, AppError::Database(_)));

        // Transaction rolled back: no usage row, no ledger row, balance intact.
        let user = users::get_by_id(&conn, &user_id).unwrap();
        assert_eq!(user.balance_usd_micros, 1_000);
        assert!(usage_for_user(&conn, &user_id).unwrap().is_empty());
        assert_eq!(ledger_sum(&conn, &user_id).unwrap(), 1_000);
    }

    #[test]
    fn test_user_delete_removes_ledger() {
        let pool = init_test_db().unwrap();
        let mut conn = pool.get().unwrap();
        let user_id = funded_user(&mut conn, 5_000_000);
        record_usage_and_debit(
            &mut conn, &user_id, "openai", "m2", "embedding", 100, 0, 10, 13, 1.30,
        )
        .unwrap();

        users::delete(&conn, &user_id).unwrap();
        assert!(usage_for_user(&conn, &user_id).unwrap().is_empty());
        assert!(transactions_for_user(&conn, &user_id).unwrap().is_empty());
    }
}
