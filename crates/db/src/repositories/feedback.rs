use chrono::{DateTime, Utc};
use sqlx::Row;

use vaxel_core::retrieval::{FeedbackSignal, ToolOutcome};

use super::{FeedbackRepository, RepositoryError};
use crate::DbPool;

pub struct SqlFeedbackRepository {
    pool: DbPool,
}

impl SqlFeedbackRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn row_to_signal(row: &sqlx::sqlite::SqliteRow) -> Result<FeedbackSignal, RepositoryError> {
    let tool_id: String =
        row.try_get("tool_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let query_pattern_hash: String =
        row.try_get("query_pattern_hash").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let successes: i64 =
        row.try_get("successes").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let failures: i64 =
        row.try_get("failures").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let updated_at = DateTime::parse_from_rfc3339(&updated_at_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now());

    Ok(FeedbackSignal { tool_id, query_pattern_hash, successes, failures, updated_at })
}

#[async_trait::async_trait]
impl FeedbackRepository for SqlFeedbackRepository {
    async fn record(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
        outcome: ToolOutcome,
    ) -> Result<(), RepositoryError> {
        let (success_delta, failure_delta) = match outcome {
            ToolOutcome::Success => (1i64, 0i64),
            ToolOutcome::Failure => (0i64, 1i64),
        };

        sqlx::query(
            "INSERT INTO retrieval_feedback
                (tool_id, query_pattern_hash, successes, failures, updated_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(tool_id, query_pattern_hash) DO UPDATE SET
                successes = successes + excluded.successes,
                failures = failures + excluded.failures,
                updated_at = excluded.updated_at",
        )
        .bind(tool_id)
        .bind(query_pattern_hash)
        .bind(success_delta)
        .bind(failure_delta)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
    ) -> Result<Option<FeedbackSignal>, RepositoryError> {
        let row = sqlx::query(
            "SELECT tool_id, query_pattern_hash, successes, failures, updated_at
             FROM retrieval_feedback
             WHERE tool_id = ? AND query_pattern_hash = ?",
        )
        .bind(tool_id)
        .bind(query_pattern_hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_signal).transpose()
    }

    async fn find_for_pattern(
        &self,
        query_pattern_hash: &str,
    ) -> Result<Vec<FeedbackSignal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT tool_id, query_pattern_hash, successes, failures, updated_at
             FROM retrieval_feedback
             WHERE query_pattern_hash = ?
             ORDER BY tool_id",
        )
        .bind(query_pattern_hash)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signal).collect::<Result<Vec<_>, _>>()
    }

    async fn most_recent(&self, limit: u32) -> Result<Vec<FeedbackSignal>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT tool_id, query_pattern_hash, successes, failures, updated_at
             FROM retrieval_feedback
             ORDER BY updated_at DESC
             LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_signal).collect::<Result<Vec<_>, _>>()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use vaxel_core::retrieval::{query_pattern_hash, ToolOutcome};

    use super::SqlFeedbackRepository;
    use crate::repositories::FeedbackRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    #[tokio::test]
    async fn record_creates_then_increments() {
        let pool = setup().await;
        let repo = SqlFeedbackRepository::new(pool);
        let hash = query_pattern_hash("vad blir vädret imorgon");

        repo.record("smhi_forecast", &hash, ToolOutcome::Success).await.expect("first record");
        repo.record("smhi_forecast", &hash, ToolOutcome::Success).await.expect("second record");
        repo.record("smhi_forecast", &hash, ToolOutcome::Failure).await.expect("third record");

        let signal = repo.find("smhi_forecast", &hash).await.expect("find").expect("signal");
        assert_eq!(signal.successes, 2);
        assert_eq!(signal.failures, 1);
    }

    #[tokio::test]
    async fn concurrent_records_both_register() {
        let pool = setup().await;
        let repo = Arc::new(SqlFeedbackRepository::new(pool));
        let hash = query_pattern_hash("tågtider stockholm uppsala");

        let first = {
            let repo = repo.clone();
            let hash = hash.clone();
            tokio::spawn(async move {
                repo.record("sl_departures", &hash, ToolOutcome::Success).await
            })
        };
        let second = {
            let repo = repo.clone();
            let hash = hash.clone();
            tokio::spawn(async move {
                repo.record("sl_departures", &hash, ToolOutcome::Success).await
            })
        };

        first.await.expect("join").expect("first record");
        second.await.expect("join").expect("second record");

        let signal = repo.find("sl_departures", &hash).await.expect("find").expect("signal");
        assert_eq!(signal.successes, 2, "no observation may be lost under concurrency");
    }

    #[tokio::test]
    async fn find_for_pattern_returns_all_tools_for_that_pattern() {
        let pool = setup().await;
        let repo = SqlFeedbackRepository::new(pool);
        let hash = query_pattern_hash("visa trafikläget");

        repo.record("trafik_status", &hash, ToolOutcome::Success).await.expect("record");
        repo.record("sl_departures", &hash, ToolOutcome::Failure).await.expect("record");
        repo.record("sl_departures", "other-pattern", ToolOutcome::Success)
            .await
            .expect("record");

        let signals = repo.find_for_pattern(&hash).await.expect("find for pattern");
        assert_eq!(signals.len(), 2);
        assert!(signals.iter().all(|signal| signal.query_pattern_hash == hash));
    }

    #[tokio::test]
    async fn most_recent_orders_by_updated_at() {
        let pool = setup().await;
        let repo = SqlFeedbackRepository::new(pool);

        repo.record("tool_a", "hash-a", ToolOutcome::Success).await.expect("record");
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.record("tool_b", "hash-b", ToolOutcome::Success).await.expect("record");

        let recent = repo.most_recent(1).await.expect("most recent");
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].tool_id, "tool_b");
    }

    #[tokio::test]
    async fn find_returns_none_for_unknown_pair() {
        let pool = setup().await;
        let repo = SqlFeedbackRepository::new(pool);
        let found = repo.find("nope", "missing").await.expect("find");
        assert!(found.is_none());
    }
}
