use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use vaxel_core::retrieval::{ComboCacheEntry, FeedbackSignal, ToolOutcome};

pub mod combo_cache;
pub mod feedback;
pub mod memory;

pub use combo_cache::SqlComboCacheRepository;
pub use feedback::SqlFeedbackRepository;
pub use memory::{InMemoryComboCacheRepository, InMemoryFeedbackRepository};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

/// Success/failure counters per (tool, query pattern). `record` has upsert
/// semantics with an atomic increment: concurrent observations for the same
/// pair must all be reflected in the final counters.
#[async_trait]
pub trait FeedbackRepository: Send + Sync {
    async fn record(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
        outcome: ToolOutcome,
    ) -> Result<(), RepositoryError>;

    async fn find(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
    ) -> Result<Option<FeedbackSignal>, RepositoryError>;

    async fn find_for_pattern(
        &self,
        query_pattern_hash: &str,
    ) -> Result<Vec<FeedbackSignal>, RepositoryError>;

    /// Most-recently-updated signals, for snapshot loading at startup.
    async fn most_recent(&self, limit: u32) -> Result<Vec<FeedbackSignal>, RepositoryError>;
}

/// Persisted agent/tool combination cache, unique on `cache_key`.
#[async_trait]
pub trait ComboCacheRepository: Send + Sync {
    async fn find(&self, cache_key: &str) -> Result<Option<ComboCacheEntry>, RepositoryError>;

    /// Insert or replace the resolution for a key. `hit_count` is preserved
    /// when the key already exists.
    async fn save(&self, entry: ComboCacheEntry) -> Result<(), RepositoryError>;

    async fn record_hit(
        &self,
        cache_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;

    /// Delete every entry. Returns the number of rows removed.
    async fn clear(&self) -> Result<u64, RepositoryError>;
}
