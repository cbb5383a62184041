//! SQL layer for the model catalog. Free functions over a connection (or
//! transaction) so the manager can compose them under one lock.

use rusqlite::Connection;
use tiller_runtime::ModelDescriptor;
use uuid::Uuid;

use crate::error::{ModelError, Result};
use crate::types::{ModelConfig, ModelRecord, ModelStatus};

const MODEL_COLUMNS: &str = "id, name, display_name, description, size_bytes, family, format,
    parameter_size, quantization, status, is_default, is_enabled, progress,
    created_at, updated_at, last_used_at";

pub fn row_to_model(row: &rusqlite::Row<'_>) -> rusqlite::Result<ModelRecord> {
    let status: String = row.get(9)?;
    Ok(ModelRecord {
        id: row.get(0)?,
        name: row.get(1)?,
        display_name: row.get(2)?,
        description: row.get(3)?,
        size_bytes: row.get::<_, i64>(4)? as u64,
        family: row.get(5)?,
        format: row.get(6)?,
        parameter_size: row.get(7)?,
        quantization: row.get(8)?,
        status: status.parse().unwrap_or(ModelStatus::Error),
        is_default: row.get::<_, i64>(10)? != 0,
        is_enabled: row.get::<_, i64>(11)? != 0,
        progress: row.get(12)?,
        created_at: row.get(13)?,
        updated_at: row.get(14)?,
        last_used_at: row.get(15)?,
    })
}

pub fn get(conn: &Connection, id: &str) -> Result<ModelRecord> {
    conn.query_row(
        &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
        [id],
        row_to_model,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => ModelError::NotFound(id.to_string()),
        other => other.into(),
    })
}

pub fn get_by_name(conn: &Connection, name: &str) -> Result<Option<ModelRecord>> {
    match conn.query_row(
        &format!("SELECT {MODEL_COLUMNS} FROM models WHERE name = ?1"),
        [name],
        row_to_model,
    ) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// All catalog rows, or only rows usable for generation.
pub fn list(conn: &Connection, available_only: bool) -> Result<Vec<ModelRecord>> {
    let filter = if available_only {
        "WHERE status = 'available' AND is_enabled = 1"
    } else {
        ""
    };
    let mut stmt = conn.prepare(&format!(
        "SELECT {MODEL_COLUMNS} FROM models {filter} ORDER BY name"
    ))?;
    let rows = stmt.query_map([], row_to_model)?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

/// The single usable default model, when one exists.
pub fn default_model(conn: &Connection) -> Result<Option<ModelRecord>> {
    match conn.query_row(
        &format!(
            "SELECT {MODEL_COLUMNS} FROM models
             WHERE is_default = 1 AND status = 'available' AND is_enabled = 1"
        ),
        [],
        row_to_model,
    ) {
        Ok(m) => Ok(Some(m)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Upsert a runtime descriptor. Existing rows keep their `is_default`,
/// `is_enabled`, display name and description; metadata and status are
/// refreshed.
pub fn upsert_descriptor(conn: &Connection, desc: &ModelDescriptor) -> Result<ModelRecord> {
    let now = chrono::Utc::now().to_rfc3339();
    let existing = get_by_name(conn, &desc.name)?;

    match existing {
        Some(row) => {
            conn.execute(
                "UPDATE models
                 SET size_bytes = ?1, family = ?2, format = ?3, parameter_size = ?4,
                     quantization = ?5, status = 'available', progress = NULL, updated_at = ?6
                 WHERE id = ?7",
                rusqlite::params![
                    desc.size_bytes as i64,
                    desc.family,
                    desc.format,
                    desc.parameter_size,
                    desc.quantization,
                    now,
                    row.id
                ],
            )?;
            get(conn, &row.id)
        }
        None => {
            let id = Uuid::now_v7().to_string();
            conn.execute(
                "INSERT INTO models
                 (id, name, display_name, size_bytes, family, format, parameter_size,
                  quantization, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 'available', ?9, ?9)",
                rusqlite::params![
                    id,
                    desc.name,
                    desc.name,
                    desc.size_bytes as i64,
                    desc.family,
                    desc.format,
                    desc.parameter_size,
                    desc.quantization,
                    now
                ],
            )?;
            get(conn, &id)
        }
    }
}

/// Create a fresh row in `downloading` state for a requested pull.
pub fn insert_downloading(
    conn: &Connection,
    name: &str,
    display_name: Option<&str>,
    description: Option<&str>,
) -> Result<ModelRecord> {
    let id = Uuid::now_v7().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO models (id, name, display_name, description, status, progress, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'downloading', 0, ?5, ?5)",
        rusqlite::params![
            id,
            name,
            display_name.unwrap_or(name),
            description.unwrap_or(""),
            now
        ],
    )?;
    get(conn, &id)
}

/// Move an existing row (removed / error) back into `downloading`.
pub fn reset_to_downloading(conn: &Connection, id: &str) -> Result<ModelRecord> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE models SET status = 'downloading', progress = 0, description = '', updated_at = ?1
         WHERE id = ?2",
        rusqlite::params![now, id],
    )?;
    get(conn, id)
}

pub fn set_status(conn: &Connection, id: &str, status: ModelStatus) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    let changed = conn.execute(
        "UPDATE models SET status = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![status.to_string(), now, id],
    )?;
    if changed == 0 {
        return Err(ModelError::NotFound(id.to_string()));
    }
    Ok(())
}

/// Record a download failure on the row: status, reason, frozen progress.
pub fn set_error(conn: &Connection, id: &str, reason: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE models SET status = 'error', description = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![reason, now, id],
    )?;
    Ok(())
}

pub fn set_progress(conn: &Connection, id: &str, progress: f64) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE models SET progress = ?1, updated_at = ?2 WHERE id = ?3",
        rusqlite::params![progress, now, id],
    )?;
    Ok(())
}

/// Mark a finished download: available, full progress, final size.
pub fn set_downloaded(conn: &Connection, id: &str, size_bytes: u64) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE models
         SET status = 'available', progress = 100, size_bytes = ?1, updated_at = ?2
         WHERE id = ?3",
        rusqlite::params![size_bytes as i64, now, id],
    )?;
    Ok(())
}

pub fn delete_rows(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM models WHERE id = ?1", [id])?;
    if changed == 0 {
        return Err(ModelError::NotFound(id.to_string()));
    }
    Ok(())
}

pub fn mark_used(conn: &Connection, name: &str) -> Result<()> {
    let now = chrono::Utc::now().to_rfc3339();
    conn.execute(
        "UPDATE models SET last_used_at = ?1 WHERE name = ?2",
        rusqlite::params![now, name],
    )?;
    Ok(())
}

pub fn get_config(conn: &Connection, model_id: &str) -> Result<ModelConfig> {
    match conn.query_row(
        "SELECT temperature, top_p, top_k, repeat_penalty, context_length, max_tokens, system_prompt
         FROM model_configs WHERE model_id = ?1",
        [model_id],
        |row| {
            Ok(ModelConfig {
                temperature: row.get(0)?,
                top_p: row.get(1)?,
                top_k: row.get::<_, i64>(2)? as u32,
                repeat_penalty: row.get(3)?,
                context_length: row.get::<_, i64>(4)? as u32,
                max_tokens: row.get::<_, i64>(5)? as u32,
                system_prompt: row.get(6)?,
            })
        },
    ) {
        Ok(c) => Ok(c),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(ModelConfig::default()),
        Err(e) => Err(e.into()),
    }
}

pub fn upsert_config(conn: &Connection, model_id: &str, config: &ModelConfig) -> Result<()> {
    conn.execute(
        "INSERT INTO model_configs
         (model_id, temperature, top_p, top_k, repeat_penalty, context_length, max_tokens, system_prompt)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(model_id) DO UPDATE SET
             temperature = excluded.temperature,
             top_p = excluded.top_p,
             top_k = excluded.top_k,
             repeat_penalty = excluded.repeat_penalty,
             context_length = excluded.context_length,
             max_tokens = excluded.max_tokens,
             system_prompt = excluded.system_prompt",
        rusqlite::params![
            model_id,
            config.temperature,
            config.top_p,
            config.top_k,
            config.repeat_penalty,
            config.context_length,
            config.max_tokens,
            config.system_prompt
        ],
    )?;
    Ok(())
}
