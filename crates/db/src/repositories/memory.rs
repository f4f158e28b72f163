use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use vaxel_core::retrieval::{ComboCacheEntry, FeedbackSignal, ToolOutcome};

use super::{ComboCacheRepository, FeedbackRepository, RepositoryError};

/// In-memory stand-in for the feedback table, for tests and offline tools.
#[derive(Default)]
pub struct InMemoryFeedbackRepository {
    signals: RwLock<HashMap<(String, String), FeedbackSignal>>,
}

#[async_trait::async_trait]
impl FeedbackRepository for InMemoryFeedbackRepository {
    async fn record(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
        outcome: ToolOutcome,
    ) -> Result<(), RepositoryError> {
        let mut signals = self.signals.write().await;
        let entry = signals
            .entry((tool_id.to_string(), query_pattern_hash.to_string()))
            .or_insert_with(|| FeedbackSignal {
                tool_id: tool_id.to_string(),
                query_pattern_hash: query_pattern_hash.to_string(),
                successes: 0,
                failures: 0,
                updated_at: Utc::now(),
            });
        match outcome {
            ToolOutcome::Success => entry.successes += 1,
            ToolOutcome::Failure => entry.failures += 1,
        }
        entry.updated_at = Utc::now();
        Ok(())
    }

    async fn find(
        &self,
        tool_id: &str,
        query_pattern_hash: &str,
    ) -> Result<Option<FeedbackSignal>, RepositoryError> {
        let signals = self.signals.read().await;
        Ok(signals.get(&(tool_id.to_string(), query_pattern_hash.to_string())).cloned())
    }

    async fn find_for_pattern(
        &self,
        query_pattern_hash: &str,
    ) -> Result<Vec<FeedbackSignal>, RepositoryError> {
        let signals = self.signals.read().await;
        let mut matching: Vec<FeedbackSignal> = signals
            .values()
            .filter(|signal| signal.query_pattern_hash == query_pattern_hash)
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.tool_id.cmp(&b.tool_id));
        Ok(matching)
    }

    async fn most_recent(&self, limit: u32) -> Result<Vec<FeedbackSignal>, RepositoryError> {
        let signals = self.signals.read().await;
        let mut all: Vec<FeedbackSignal> = signals.values().cloned().collect();
        all.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        all.truncate(limit as usize);
        Ok(all)
    }
}

/// In-memory stand-in for the combo cache table.
#[derive(Default)]
pub struct InMemoryComboCacheRepository {
    entries: RwLock<HashMap<String, ComboCacheEntry>>,
}

impl InMemoryComboCacheRepository {
    /// Seed an entry directly, bypassing upsert semantics. Test helper.
    pub async fn insert_raw(&self, entry: ComboCacheEntry) {
        let mut entries = self.entries.write().await;
        entries.insert(entry.cache_key.clone(), entry);
    }
}

#[async_trait::async_trait]
impl ComboCacheRepository for InMemoryComboCacheRepository {
    async fn find(&self, cache_key: &str) -> Result<Option<ComboCacheEntry>, RepositoryError> {
        let entries = self.entries.read().await;
        Ok(entries.get(cache_key).cloned())
    }

    async fn save(&self, mut entry: ComboCacheEntry) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        if let Some(existing) = entries.get(&entry.cache_key) {
            entry.hit_count = existing.hit_count;
        }
        entries.insert(entry.cache_key.clone(), entry);
        Ok(())
    }

    async fn record_hit(
        &self,
        cache_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(cache_key) {
            entry.hit_count += 1;
            entry.last_used_at = at;
        }
        Ok(())
    }

    async fn clear(&self) -> Result<u64, RepositoryError> {
        let mut entries = self.entries.write().await;
        let count = entries.len() as u64;
        entries.clear();
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use vaxel_core::retrieval::{ComboCacheEntry, ToolOutcome};

    use crate::repositories::{
        ComboCacheRepository, FeedbackRepository, InMemoryComboCacheRepository,
        InMemoryFeedbackRepository,
    };

    #[tokio::test]
    async fn in_memory_feedback_counts_match_sql_semantics() {
        let repo = InMemoryFeedbackRepository::default();
        repo.record("smhi_forecast", "hash-1", ToolOutcome::Success).await.expect("record");
        repo.record("smhi_forecast", "hash-1", ToolOutcome::Failure).await.expect("record");

        let signal = repo.find("smhi_forecast", "hash-1").await.expect("find").expect("signal");
        assert_eq!(signal.successes, 1);
        assert_eq!(signal.failures, 1);
    }

    #[tokio::test]
    async fn in_memory_combo_cache_round_trip_and_clear() {
        let repo = InMemoryComboCacheRepository::default();
        let entry = ComboCacheEntry {
            cache_key: "combo-1".to_string(),
            route_hint: "web".to_string(),
            pattern: "web|web".to_string(),
            recent_agents: vec!["web".to_string(), "web".to_string()],
            agents: json!({"worker": "web", "tool_ids": ["web_search"]}),
            hit_count: 0,
            last_used_at: Utc::now(),
            updated_at: Utc::now(),
        };

        repo.save(entry.clone()).await.expect("save");
        repo.record_hit("combo-1", Utc::now()).await.expect("hit");

        let found = repo.find("combo-1").await.expect("find").expect("entry");
        assert_eq!(found.hit_count, 1);

        assert_eq!(repo.clear().await.expect("clear"), 1);
        assert!(repo.find("combo-1").await.expect("find").is_none());
    }
}
