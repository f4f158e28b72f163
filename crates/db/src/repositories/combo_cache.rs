use chrono::{DateTime, Utc};
use sqlx::Row;

use vaxel_core::retrieval::ComboCacheEntry;

use super::{ComboCacheRepository, RepositoryError};
use crate::DbPool;

pub struct SqlComboCacheRepository {
    pool: DbPool,
}

impl SqlComboCacheRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<ComboCacheEntry, RepositoryError> {
    let cache_key: String =
        row.try_get("cache_key").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let route_hint: String =
        row.try_get("route_hint").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let pattern: String =
        row.try_get("pattern").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let recent_agents_str: String =
        row.try_get("recent_agents").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agents_str: String =
        row.try_get("agents").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let hit_count: i64 =
        row.try_get("hit_count").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let last_used_at_str: String =
        row.try_get("last_used_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at_str: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let recent_agents: Vec<String> = serde_json::from_str(&recent_agents_str)
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let agents: serde_json::Value =
        serde_json::from_str(&agents_str).map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ComboCacheEntry {
        cache_key,
        route_hint,
        pattern,
        recent_agents,
        agents,
        hit_count,
        last_used_at: parse_timestamp(&last_used_at_str),
        updated_at: parse_timestamp(&updated_at_str),
    })
}

#[async_trait::async_trait]
impl ComboCacheRepository for SqlComboCacheRepository {
    async fn find(&self, cache_key: &str) -> Result<Option<ComboCacheEntry>, RepositoryError> {
        let row = sqlx::query(
            "SELECT cache_key, route_hint, pattern, recent_agents, agents,
                    hit_count, last_used_at, updated_at
             FROM agent_combo_cache
             WHERE cache_key = ?",
        )
        .bind(cache_key)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_entry).transpose()
    }

    async fn save(&self, entry: ComboCacheEntry) -> Result<(), RepositoryError> {
        let recent_agents = serde_json::to_string(&entry.recent_agents)
            .map_err(|e| RepositoryError::Decode(e.to_string()))?;
        let agents = entry.agents.to_string();

        sqlx::query(
            "INSERT INTO agent_combo_cache
                (cache_key, route_hint, pattern, recent_agents, agents,
                 hit_count, last_used_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(cache_key) DO UPDATE SET
                route_hint = excluded.route_hint,
                pattern = excluded.pattern,
                recent_agents = excluded.recent_agents,
                agents = excluded.agents,
                last_used_at = excluded.last_used_at,
                updated_at = excluded.updated_at",
        )
        .bind(&entry.cache_key)
        .bind(&entry.route_hint)
        .bind(&entry.pattern)
        .bind(&recent_agents)
        .bind(&agents)
        .bind(entry.hit_count)
        .bind(entry.last_used_at.to_rfc3339())
        .bind(entry.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_hit(
        &self,
        cache_key: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "UPDATE agent_combo_cache
             SET hit_count = hit_count + 1, last_used_at = ?
             WHERE cache_key = ?",
        )
        .bind(at.to_rfc3339())
        .bind(cache_key)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM agent_combo_cache").execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
