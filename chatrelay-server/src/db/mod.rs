//! Database access layer for chatrelay-server
//!
//! SQLite via sqlx. The `chats` table holds one row per completed run.

use chatrelay_common::Result;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use std::path::Path;

pub mod chats;

pub use chats::ChatRecord;

/// Path value that selects a private in-memory database
pub const MEMORY_DATABASE: &str = ":memory:";

/// Initialize database connection pool and create tables
///
/// Connects with mode=rwc (read, write, create), creating the parent
/// directory if needed. The path `:memory:` opens an in-memory database.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if db_path.as_os_str() == MEMORY_DATABASE {
        return init_memory_pool().await;
    }

    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;

    Ok(pool)
}

/// In-memory database for tests and throwaway runs
///
/// Limited to one connection that is never recycled: every SQLite
/// in-memory connection is a separate database.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create the chats table if it does not exist
async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chats (
            run_id TEXT PRIMARY KEY,
            response TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized (chats)");

    Ok(())
}
