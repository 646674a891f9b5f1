//! Chat record queries

use chatrelay_common::{time, Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Persisted text of one completed generation run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub run_id: Uuid,
    pub response: String,
    pub created_at: DateTime<Utc>,
}

/// Insert a chat record.
///
/// Saving the same run twice overwrites the text and keeps the original
/// `created_at`, so repeated saves of identical content are no-ops.
pub async fn save_chat(pool: &SqlitePool, run_id: Uuid, response: &str) -> Result<()> {
    let created_at = time::to_storage_string(&time::now());

    sqlx::query(
        r#"
        INSERT INTO chats (run_id, response, created_at)
        VALUES (?, ?, ?)
        ON CONFLICT(run_id) DO UPDATE SET response = excluded.response
        "#,
    )
    .bind(run_id.to_string())
    .bind(response)
    .bind(created_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// Load one chat record by run id
pub async fn find_chat(pool: &SqlitePool, run_id: Uuid) -> Result<Option<ChatRecord>> {
    let row = sqlx::query("SELECT run_id, response, created_at FROM chats WHERE run_id = ?")
        .bind(run_id.to_string())
        .fetch_optional(pool)
        .await?;

    row.map(|row| record_from_row(&row)).transpose()
}

/// Load all chat records, oldest first
pub async fn list_chats(pool: &SqlitePool) -> Result<Vec<ChatRecord>> {
    let rows = sqlx::query(
        "SELECT run_id, response, created_at FROM chats ORDER BY created_at ASC, run_id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &SqliteRow) -> Result<ChatRecord> {
    let run_id: String = row.get("run_id");
    let run_id = Uuid::parse_str(&run_id)
        .map_err(|e| Error::Internal(format!("Invalid run_id '{}': {}", run_id, e)))?;

    let created_at: String = row.get("created_at");
    let created_at = time::from_storage_string(&created_at)
        .map_err(|e| Error::Internal(format!("Failed to parse created_at: {}", e)))?;

    Ok(ChatRecord {
        run_id,
        response: row.get("response"),
        created_at,
    })
}
