//! Record store adapter
//!
//! The pipeline only needs "save this text under this run id" and "is this
//! run id stored yet". [`ChatStore`] is that contract; [`SqliteChatStore`]
//! is the production implementation over the shared connection pool.

use async_trait::async_trait;
use chatrelay_common::Result;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::db::{self, ChatRecord};

/// Store for completed chat runs
///
/// Implementations must tolerate concurrent calls for different run ids.
#[async_trait]
pub trait ChatStore: Send + Sync {
    /// Persist the full text of a run; re-saving identical content is a no-op
    async fn save(&self, run_id: Uuid, response: &str) -> Result<()>;

    /// Look up a run's record
    async fn find_by_id(&self, run_id: Uuid) -> Result<Option<ChatRecord>>;

    /// All stored records, oldest first
    async fn list(&self) -> Result<Vec<ChatRecord>>;
}

/// [`ChatStore`] backed by SQLite
#[derive(Clone)]
pub struct SqliteChatStore {
    pool: SqlitePool,
}

impl SqliteChatStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatStore for SqliteChatStore {
    async fn save(&self, run_id: Uuid, response: &str) -> Result<()> {
        db::chats::save_chat(&self.pool, run_id, response).await
    }

    async fn find_by_id(&self, run_id: Uuid) -> Result<Option<ChatRecord>> {
        db::chats::find_chat(&self.pool, run_id).await
    }

    async fn list(&self) -> Result<Vec<ChatRecord>> {
        db::chats::list_chats(&self.pool).await
    }
}
