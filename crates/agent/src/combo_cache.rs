use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use vaxel_core::retrieval::{query_pattern_hash, ComboCacheEntry};
use vaxel_db::repositories::{ComboCacheRepository, RepositoryError};

/// Normalized usage pattern the cache key is derived from.
pub fn usage_pattern(recent_agents: &[String]) -> String {
    recent_agents
        .iter()
        .map(|agent| agent.trim().to_lowercase())
        .collect::<Vec<_>>()
        .join("|")
}

/// Cache key for one (recent usage pattern, route hint) pair. Reuses the
/// normalized stable hash so keys survive restarts.
pub fn combo_cache_key(recent_agents: &[String], route_hint: &str) -> String {
    query_pattern_hash(&format!("{}::{}", usage_pattern(recent_agents), route_hint))
}

/// The payload a cache hit short-circuits to: which worker served the
/// pattern last time and which tools it was handed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedCombo {
    pub worker: String,
    pub tool_ids: Vec<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ComboLookup {
    Hit(ResolvedCombo),
    Miss,
}

#[derive(Clone, Copy, Debug)]
pub struct ComboCacheSettings {
    /// Entries whose `last_used_at` is older than this are treated as
    /// misses.
    pub ttl_secs: u64,
    /// Upper bound on in-memory entries; oldest-used evict first.
    pub capacity: usize,
    pub start_disabled: bool,
}

impl Default for ComboCacheSettings {
    fn default() -> Self {
        Self { ttl_secs: 86_400, capacity: 256, start_disabled: false }
    }
}

struct MemoryEntry {
    combo: ResolvedCombo,
    last_used_at: DateTime<Utc>,
}

#[derive(Default)]
struct MemoryLayer {
    entries: HashMap<String, MemoryEntry>,
    order: VecDeque<String>,
}

impl MemoryLayer {
    fn touch(&mut self, cache_key: &str) {
        self.order.retain(|key| key != cache_key);
        self.order.push_back(cache_key.to_string());
    }

    fn insert(&mut self, cache_key: String, entry: MemoryEntry, capacity: usize) {
        self.entries.insert(cache_key.clone(), entry);
        self.touch(&cache_key);
        while self.entries.len() > capacity {
            let Some(evicted) = self.order.pop_front() else { break };
            self.entries.remove(&evicted);
        }
    }

    fn remove(&mut self, cache_key: &str) {
        self.entries.remove(cache_key);
        self.order.retain(|key| key != cache_key);
    }
}

/// Outcome of an administrative clear, reported per layer. A persisted
/// failure is carried as-is; it is never folded into a fake success.
pub struct ComboClearReport {
    pub memory_entries: usize,
    pub persisted: Result<u64, RepositoryError>,
}

/// Two-layer cache over resolved agent/tool combinations: a bounded
/// in-memory front and the persisted table behind it. Lookups and stores
/// swallow persistence errors (a cache must never fail a dispatch); the
/// administrative surface reports them.
pub struct AgentComboCache {
    repo: Arc<dyn ComboCacheRepository>,
    settings: ComboCacheSettings,
    disabled: AtomicBool,
    memory: Mutex<MemoryLayer>,
}

impl AgentComboCache {
    pub fn new(repo: Arc<dyn ComboCacheRepository>, settings: ComboCacheSettings) -> Self {
        Self {
            repo,
            disabled: AtomicBool::new(settings.start_disabled),
            settings,
            memory: Mutex::new(MemoryLayer::default()),
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::SeqCst)
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.disabled.store(disabled, Ordering::SeqCst);
    }

    fn is_fresh(&self, last_used_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(last_used_at).num_seconds();
        age >= 0 && (age as u64) <= self.settings.ttl_secs
    }

    pub async fn lookup(&self, recent_agents: &[String], route_hint: &str) -> ComboLookup {
        if self.is_disabled() {
            return ComboLookup::Miss;
        }

        let cache_key = combo_cache_key(recent_agents, route_hint);
        let now = Utc::now();

        let memory_hit = {
            let mut memory = self.memory.lock().expect("combo cache lock");
            let freshness =
                memory.entries.get(&cache_key).map(|entry| self.is_fresh(entry.last_used_at, now));
            match freshness {
                Some(true) => {
                    let entry =
                        memory.entries.get_mut(&cache_key).expect("entry present when fresh");
                    entry.last_used_at = now;
                    let combo = entry.combo.clone();
                    memory.touch(&cache_key);
                    Some(combo)
                }
                Some(false) => {
                    memory.remove(&cache_key);
                    None
                }
                None => None,
            }
        };

        if let Some(combo) = memory_hit {
            self.record_hit(&cache_key, now).await;
            debug!(event_name = "dispatch.combo_cache.memory_hit", cache_key = %cache_key, "combo cache hit");
            return ComboLookup::Hit(combo);
        }

        let entry = match self.repo.find(&cache_key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return ComboLookup::Miss,
            Err(error) => {
                warn!(
                    event_name = "dispatch.combo_cache.lookup_error",
                    error = %error,
                    "combo cache lookup failed, treating as miss"
                );
                return ComboLookup::Miss;
            }
        };

        if !self.is_fresh(entry.last_used_at, now) {
            return ComboLookup::Miss;
        }

        let Ok(combo) = serde_json::from_value::<ResolvedCombo>(entry.agents.clone()) else {
            warn!(
                event_name = "dispatch.combo_cache.decode_error",
                cache_key = %cache_key,
                "stored combo payload is unreadable, treating as miss"
            );
            return ComboLookup::Miss;
        };

        {
            let mut memory = self.memory.lock().expect("combo cache lock");
            memory.insert(
                cache_key.clone(),
                MemoryEntry { combo: combo.clone(), last_used_at: now },
                self.settings.capacity,
            );
        }
        self.record_hit(&cache_key, now).await;
        debug!(event_name = "dispatch.combo_cache.persisted_hit", cache_key = %cache_key, "combo cache hit");
        ComboLookup::Hit(combo)
    }

    pub async fn store(&self, recent_agents: &[String], route_hint: &str, combo: ResolvedCombo) {
        if self.is_disabled() {
            return;
        }

        let cache_key = combo_cache_key(recent_agents, route_hint);
        let now = Utc::now();

        {
            let mut memory = self.memory.lock().expect("combo cache lock");
            memory.insert(
                cache_key.clone(),
                MemoryEntry { combo: combo.clone(), last_used_at: now },
                self.settings.capacity,
            );
        }

        let entry = ComboCacheEntry {
            cache_key: cache_key.clone(),
            route_hint: route_hint.to_string(),
            pattern: usage_pattern(recent_agents),
            recent_agents: recent_agents.to_vec(),
            agents: json!(combo),
            hit_count: 0,
            last_used_at: now,
            updated_at: now,
        };

        if let Err(error) = self.repo.save(entry).await {
            warn!(
                event_name = "dispatch.combo_cache.store_error",
                error = %error,
                "combo cache store failed, continuing without persistence"
            );
        }
    }

    async fn record_hit(&self, cache_key: &str, at: DateTime<Utc>) {
        if let Err(error) = self.repo.record_hit(cache_key, at).await {
            warn!(
                event_name = "dispatch.combo_cache.hit_bookkeeping_error",
                error = %error,
                "combo cache hit bookkeeping failed"
            );
        }
    }

    /// Clear the in-memory layer first, then the persisted table. The
    /// persisted result is reported verbatim so a partial clear is visible.
    pub async fn clear(&self) -> ComboClearReport {
        let memory_entries = {
            let mut memory = self.memory.lock().expect("combo cache lock");
            let count = memory.entries.len();
            memory.entries.clear();
            memory.order.clear();
            count
        };

        let persisted = self.repo.clear().await;
        ComboClearReport { memory_entries, persisted }
    }
}
