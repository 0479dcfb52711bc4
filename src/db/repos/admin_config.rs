use rusqlite::{params, Connection, Row};

use crate::db::models::{
    ModelRegistryEntry, PricingConfig, PricingConfigView, SystemConfigEntry, TaskRoutingConfig,
    TaskRoutingView, ROUTING_DEFAULT_TASK,
};
use crate::error::AppError;

fn row_to_model(row: &Row) -> rusqlite::Result<ModelRegistryEntry> {
    Ok(ModelRegistryEntry {
        id: row.get("id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        display_name: row.get("display_name")?,
        model_type: row.get("model_type")?,
        is_active: row.get::<_, i64>("is_active")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_pricing(row: &Row) -> rusqlite::Result<PricingConfig> {
    Ok(PricingConfig {
        id: row.get("id")?,
        provider: row.get("provider")?,
        model: row.get("model")?,
        input_cost_per_1k_micros: row.get("input_cost_per_1k_micros")?,
        output_cost_per_1k_micros: row.get("output_cost_per_1k_micros")?,
        margin_multiplier: row.get("margin_multiplier")?,
        effective_date: row.get("effective_date")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_routing(row: &Row) -> rusqlite::Result<TaskRoutingConfig> {
    Ok(TaskRoutingConfig {
        id: row.get("id")?,
        provider: row.get("provider")?,
        task_type: row.get("task_type")?,
        model: row.get("model")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

// ============================================================================
// Model registry
// ============================================================================

pub fn list_models(
    conn: &Connection,
    provider: Option<&str>,
    model_type: Option<&str>,
    is_active: Option<bool>,
) -> Result<Vec<ModelRegistryEntry>, AppError> {
    let mut sql = "SELECT * FROM model_registry WHERE 1=1".to_string();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(p) = provider {
        param_values.push(Box::new(p.to_string()));
        sql.push_str(&format!(" AND provider = ?{}", param_values.len()));
    }
    if let Some(t) = model_type {
        param_values.push(Box::new(t.to_string()));
        sql.push_str(&format!(" AND model_type = ?{}", param_values.len()));
    }
    if let Some(a) = is_active {
        param_values.push(Box::new(a as i64));
        sql.push_str(&format!(" AND is_active = ?{}", param_values.len()));
    }
    sql.push_str(" ORDER BY provider, model");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_model)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_model_by_id(conn: &Connection, id: &str) -> Result<Option<ModelRegistryEntry>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM model_registry WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_model)?;
    Ok(rows.next().transpose()?)
}

pub fn get_model(
    conn: &Connection,
    provider: &str,
    model: &str,
) -> Result<Option<ModelRegistryEntry>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM model_registry WHERE provider = ?1 AND model = ?2")?;
    let mut rows = stmt.query_map(params![provider, model], row_to_model)?;
    Ok(rows.next().transpose()?)
}

pub fn insert_model(
    conn: &Connection,
    provider: &str,
    model: &str,
    display_name: &str,
    model_type: &str,
) -> Result<ModelRegistryEntry, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO model_registry (id, provider, model, display_name, model_type,
                                     is_active, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?6)",
        params![id, provider, model, display_name, model_type, now],
    )?;
    get_model_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("model vanished after insert".into()))
}

pub fn update_model(
    conn: &Connection,
    id: &str,
    display_name: Option<&str>,
    is_active: Option<bool>,
    model_type: Option<&str>,
) -> Result<Option<ModelRegistryEntry>, AppError> {
    if get_model_by_id(conn, id)?.is_none() {
        return Ok(None);
    }
    let now = chrono::Utc::now().to_rfc3339();
    if let Some(name) = display_name {
        conn.execute(
            "UPDATE model_registry SET display_name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now, id],
        )?;
    }
    if let Some(active) = is_active {
        conn.execute(
            "UPDATE model_registry SET is_active = ?1, updated_at = ?2 WHERE id = ?3",
            params![active as i64, now, id],
        )?;
    }
    if let Some(mtype) = model_type {
        conn.execute(
            "UPDATE model_registry SET model_type = ?1, updated_at = ?2 WHERE id = ?3",
            params![mtype, now, id],
        )?;
    }
    get_model_by_id(conn, id)
}

pub fn delete_model(conn: &Connection, id: &str) -> Result<bool, AppError> {
    Ok(conn.execute("DELETE FROM model_registry WHERE id = ?1", params![id])? > 0)
}

// ============================================================================
// Pricing
// ============================================================================

/// Pricing rows ordered (provider, model, effective_date DESC) with the
/// computed is_current flag. For each (provider, model) the first row with
/// effective_date ≤ today is current.
pub fn list_pricing(
    conn: &Connection,
    provider: Option<&str>,
    model: Option<&str>,
    today: &str,
) -> Result<Vec<PricingConfigView>, AppError> {
    let mut sql = "SELECT * FROM pricing_config WHERE 1=1".to_string();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(p) = provider {
        param_values.push(Box::new(p.to_string()));
        sql.push_str(&format!(" AND provider = ?{}", param_values.len()));
    }
    if let Some(m) = model {
        param_values.push(Box::new(m.to_string()));
        sql.push_str(&format!(" AND model = ?{}", param_values.len()));
    }
    sql.push_str(" ORDER BY provider, model, effective_date DESC");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), row_to_pricing)?;
    let pricing: Vec<PricingConfig> = rows.filter_map(|r| r.ok()).collect();

    let mut seen: std::collections::HashSet<(String, String)> = std::collections::HashSet::new();
    Ok(pricing
        .into_iter()
        .map(|row| {
            let key = (row.provider.clone(), row.model.clone());
            let is_current = !seen.contains(&key) && row.effective_date.as_str() <= today;
            if is_current {
                seen.insert(key);
            }
            PricingConfigView { pricing: row, is_current }
        })
        .collect())
}

pub fn get_pricing_by_id(conn: &Connection, id: &str) -> Result<Option<PricingConfig>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM pricing_config WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_pricing)?;
    Ok(rows.next().transpose()?)
}

/// The current pricing row: greatest effective_date ≤ today.
pub fn current_pricing(
    conn: &Connection,
    provider: &str,
    model: &str,
    today: &str,
) -> Result<Option<PricingConfig>, AppError> {
    let mut stmt = conn.prepare(
        "SELECT * FROM pricing_config
         WHERE provider = ?1 AND model = ?2 AND effective_date <= ?3
         ORDER BY effective_date DESC
         LIMIT 1",
    )?;
    let mut rows = stmt.query_map(params![provider, model, today], row_to_pricing)?;
    Ok(rows.next().transpose()?)
}

/// Count current pricing rows for a model other than `exclude_id`.
pub fn count_other_current_pricing(
    conn: &Connection,
    provider: &str,
    model: &str,
    today: &str,
    exclude_id: &str,
) -> Result<i64, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pricing_config
         WHERE provider = ?1 AND model = ?2 AND effective_date <= ?3 AND id != ?4",
        params![provider, model, today, exclude_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

pub fn insert_pricing(
    conn: &Connection,
    provider: &str,
    model: &str,
    input_cost_per_1k_micros: i64,
    output_cost_per_1k_micros: i64,
    margin_multiplier: f64,
    effective_date: &str,
) -> Result<PricingConfig, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO pricing_config
         (id, provider, model, input_cost_per_1k_micros, output_cost_per_1k_micros,
          margin_multiplier, effective_date, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)",
        params![
            id,
            provider,
            model,
            input_cost_per_1k_micros,
            output_cost_per_1k_micros,
            margin_multiplier,
            effective_date,
            now,
        ],
    )?;
    get_pricing_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("pricing vanished after insert".into()))
}

pub fn update_pricing(
    conn: &Connection,
    id: &str,
    input_cost_per_1k_micros: Option<i64>,
    output_cost_per_1k_micros: Option<i64>,
    margin_multiplier: Option<f64>,
) -> Result<Option<PricingConfig>, AppError> {
    if get_pricing_by_id(conn, id)?.is_none() {
        return Ok(None);
    }
    let now = chrono::Utc::now().to_rfc3339();
    if let Some(v) = input_cost_per_1k_micros {
        conn.execute(
            "UPDATE pricing_config SET input_cost_per_1k_micros = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, now, id],
        )?;
    }
    if let Some(v) = output_cost_per_1k_micros {
        conn.execute(
            "UPDATE pricing_config SET output_cost_per_1k_micros = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, now, id],
        )?;
    }
    if let Some(v) = margin_multiplier {
        conn.execute(
            "UPDATE pricing_config SET margin_multiplier = ?1, updated_at = ?2 WHERE id = ?3",
            params![v, now, id],
        )?;
    }
    get_pricing_by_id(conn, id)
}

pub fn delete_pricing(conn: &Connection, id: &str) -> Result<bool, AppError> {
    Ok(conn.execute("DELETE FROM pricing_config WHERE id = ?1", params![id])? > 0)
}

// ============================================================================
// Task routing
// ============================================================================

pub fn list_routing(
    conn: &Connection,
    provider: Option<&str>,
) -> Result<Vec<TaskRoutingView>, AppError> {
    let mut sql = "SELECT r.*, m.display_name AS model_display_name
                   FROM task_routing_config r
                   LEFT JOIN model_registry m
                     ON r.provider = m.provider AND r.model = m.model
                   WHERE 1=1"
        .to_string();
    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();
    if let Some(p) = provider {
        param_values.push(Box::new(p.to_string()));
        sql.push_str(&format!(" AND r.provider = ?{}", param_values.len()));
    }
    sql.push_str(" ORDER BY r.provider, r.task_type");

    let mut stmt = conn.prepare(&sql)?;
    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    let rows = stmt.query_map(params_ref.as_slice(), |row| {
        Ok(TaskRoutingView {
            routing: row_to_routing(row)?,
            model_display_name: row.get("model_display_name")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_routing_by_id(conn: &Connection, id: &str) -> Result<Option<TaskRoutingConfig>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM task_routing_config WHERE id = ?1")?;
    let mut rows = stmt.query_map(params![id], row_to_routing)?;
    Ok(rows.next().transpose()?)
}

pub fn get_routing(
    conn: &Connection,
    provider: &str,
    task_type: &str,
) -> Result<Option<TaskRoutingConfig>, AppError> {
    let mut stmt =
        conn.prepare("SELECT * FROM task_routing_config WHERE provider = ?1 AND task_type = ?2")?;
    let mut rows = stmt.query_map(params![provider, task_type], row_to_routing)?;
    Ok(rows.next().transpose()?)
}

/// Resolve the model bound to (provider, task), falling back to the
/// provider's `_default` row. Ok(None) means no routing is configured —
/// the caller decides what that means; lookup errors always propagate.
pub fn get_model_for_task(
    conn: &Connection,
    provider: &str,
    task_type: &str,
) -> Result<Option<String>, AppError> {
    if let Some(row) = get_routing(conn, provider, task_type)? {
        return Ok(Some(row.model));
    }
    Ok(get_routing(conn, provider, ROUTING_DEFAULT_TASK)?.map(|r| r.model))
}

pub fn routing_references_model(
    conn: &Connection,
    provider: &str,
    model: &str,
) -> Result<bool, AppError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM task_routing_config WHERE provider = ?1 AND model = ?2",
        params![provider, model],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub fn insert_routing(
    conn: &Connection,
    provider: &str,
    task_type: &str,
    model: &str,
) -> Result<TaskRoutingConfig, AppError> {
    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO task_routing_config (id, provider, task_type, model, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
        params![id, provider, task_type, model, now],
    )?;
    get_routing_by_id(conn, &id)?
        .ok_or_else(|| AppError::Internal("routing vanished after insert".into()))
}

pub fn update_routing_model(
    conn: &Connection,
    id: &str,
    model: &str,
) -> Result<Option<TaskRoutingConfig>, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE task_routing_config SET model = ?1, updated_at = ?2 WHERE id = ?3",
        params![model, now, id],
    )?;
    get_routing_by_id(conn, id)
}

pub fn delete_routing(conn: &Connection, id: &str) -> Result<bool, AppError> {
    Ok(conn.execute("DELETE FROM task_routing_config WHERE id = ?1", params![id])? > 0)
}

// ============================================================================
// System config
// ============================================================================

pub fn list_config(conn: &Connection) -> Result<Vec<SystemConfigEntry>, AppError> {
    let mut stmt = conn.prepare("SELECT * FROM system_config ORDER BY key")?;
    let rows = stmt.query_map([], |row| {
        Ok(SystemConfigEntry {
            key: row.get("key")?,
            value: row.get("value")?,
            description: row.get("description")?,
        })
    })?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

pub fn get_config(conn: &Connection, key: &str) -> Result<Option<String>, AppError> {
    let mut stmt = conn.prepare("SELECT value FROM system_config WHERE key = ?1")?;
    let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
    Ok(rows.next().transpose()?)
}

pub fn upsert_config(
    conn: &Connection,
    key: &str,
    value: &str,
    description: Option<&str>,
) -> Result<(), AppError> {
    conn.execute(
        "INSERT INTO system_config (key, value, description)
         VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value,
             description = COALESCE(excluded.description, system_config.description)",
        params![key, value, description],
    )?;
    Ok(())
}

pub fn delete_config(conn: &Connection, key: &str) -> Result<bool, AppError> {
    Ok(conn.execute("DELETE FROM system_config WHERE key = ?1", params![key])? > 0)
}
