use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Length of the hex-encoded query pattern hash.
pub const PATTERN_HASH_LEN: usize = 16;

/// Deterministic bucket key for structurally similar queries: lower-cased,
/// whitespace-collapsed text hashed with blake3 and truncated to a fixed
/// length. A pure function of the text, stable across restarts.
pub fn query_pattern_hash(query: &str) -> String {
    let normalized = query.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase();
    let digest = blake3::hash(normalized.as_bytes());
    digest.to_hex().as_str()[..PATTERN_HASH_LEN].to_string()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failure,
}

/// Aggregated success/failure counters for one (tool, query pattern) pair.
/// Counters only ever grow; rows are never deleted by normal operation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FeedbackSignal {
    pub tool_id: String,
    pub query_pattern_hash: String,
    pub successes: i64,
    pub failures: i64,
    pub updated_at: DateTime<Utc>,
}

impl FeedbackSignal {
    pub fn observations(&self) -> i64 {
        self.successes + self.failures
    }

    pub fn success_rate(&self) -> f64 {
        let observations = self.observations();
        if observations <= 0 {
            return 0.0;
        }
        self.successes as f64 / observations as f64
    }

    /// Non-negative ranking bonus. Grows with the success rate and with the
    /// number of observations, damped so a single lucky observation cannot
    /// dominate keyword relevance. A tool with a better historical success
    /// rate therefore never ranks below an otherwise-equal tool that has no
    /// signal at all.
    pub fn ranking_bonus(&self) -> f64 {
        let observations = self.observations() as f64;
        if observations <= 0.0 {
            return 0.0;
        }
        self.success_rate() * observations / (observations + 4.0)
    }
}

/// Persisted resolution of an agent/tool combination, keyed by the usage
/// pattern that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ComboCacheEntry {
    pub cache_key: String,
    pub route_hint: String,
    pub pattern: String,
    pub recent_agents: Vec<String>,
    pub agents: serde_json::Value,
    pub hit_count: i64,
    pub last_used_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::{query_pattern_hash, FeedbackSignal, PATTERN_HASH_LEN};

    fn signal(successes: i64, failures: i64) -> FeedbackSignal {
        FeedbackSignal {
            tool_id: "smhi_forecast".to_string(),
            query_pattern_hash: query_pattern_hash("vad blir vädret imorgon"),
            successes,
            failures,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn pattern_hash_is_stable_and_normalized() {
        let base = query_pattern_hash("Vad blir vädret imorgon?");
        assert_eq!(base.len(), PATTERN_HASH_LEN);
        assert_eq!(base, query_pattern_hash("vad  blir   vädret imorgon?"));
        assert_eq!(base, query_pattern_hash("  VAD BLIR VÄDRET IMORGON?  "));
        assert_ne!(base, query_pattern_hash("vad blir vädret på fredag?"));
    }

    #[test]
    fn success_rate_handles_zero_observations() {
        assert_eq!(signal(0, 0).success_rate(), 0.0);
        assert_eq!(signal(0, 0).ranking_bonus(), 0.0);
    }

    #[test]
    fn ranking_bonus_is_never_negative_and_grows_with_success() {
        let poor = signal(1, 9);
        let good = signal(9, 1);
        assert!(poor.ranking_bonus() >= 0.0);
        assert!(good.ranking_bonus() > poor.ranking_bonus());
    }

    #[test]
    fn ranking_bonus_dampens_sparse_signals() {
        let sparse = signal(1, 0);
        let established = signal(20, 0);
        assert!(sparse.success_rate() == established.success_rate());
        assert!(sparse.ranking_bonus() < established.ranking_bonus());
    }
}
