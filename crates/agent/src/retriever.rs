use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::debug;

use vaxel_core::retrieval::{query_pattern_hash, FeedbackSignal};
use vaxel_db::repositories::{FeedbackRepository, RepositoryError};

use crate::pool::WorkerConfig;
use crate::tools::{ScoredTool, ToolIndex};

/// Ranks and bounds the tool set handed to a worker for one query.
///
/// Primary namespaces are searched first; fallback namespaces are only
/// consulted when the primary search leaves the limit unfilled. Historical
/// feedback for the query's pattern bucket nudges the ranking: the bonus is
/// never negative, so a tool with a good track record cannot rank below an
/// otherwise-equal tool without one. When keyword search leaves slots open,
/// the worker's namespace tools fill them in catalog order so a worker is
/// never handed an empty toolbox.
pub struct SmartRetriever {
    index: ToolIndex,
    feedback: Arc<dyn FeedbackRepository>,
}

impl SmartRetriever {
    pub fn new(index: ToolIndex, feedback: Arc<dyn FeedbackRepository>) -> Self {
        Self { index, feedback }
    }

    pub async fn retrieve(
        &self,
        query: &str,
        worker: &WorkerConfig,
    ) -> Result<Vec<String>, RepositoryError> {
        let pattern_hash = query_pattern_hash(query);
        let signals: HashMap<String, FeedbackSignal> = self
            .feedback
            .find_for_pattern(&pattern_hash)
            .await?
            .into_iter()
            .map(|signal| (signal.tool_id.clone(), signal))
            .collect();

        let mut seen: HashSet<String> = HashSet::new();
        let mut candidates: Vec<ScoredTool> = Vec::new();

        for namespace in &worker.primary_namespaces {
            collect(&mut candidates, &mut seen, self.index.search(namespace, query));
        }
        if candidates.len() < worker.tool_limit {
            for namespace in &worker.fallback_namespaces {
                collect(&mut candidates, &mut seen, self.index.search(namespace, query));
            }
        }
        if candidates.len() < worker.tool_limit {
            for namespace in worker.primary_namespaces.iter().chain(&worker.fallback_namespaces) {
                let padding = self
                    .index
                    .namespace_tools(namespace)
                    .iter()
                    .map(|tool| ScoredTool { tool_id: tool.tool_id.clone(), score: 0.0 });
                collect(&mut candidates, &mut seen, padding);
            }
        }

        for candidate in &mut candidates {
            if let Some(signal) = signals.get(&candidate.tool_id) {
                candidate.score += signal.ranking_bonus();
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.tool_id.cmp(&b.tool_id))
        });
        candidates.truncate(worker.tool_limit);

        let tool_ids: Vec<String> =
            candidates.into_iter().map(|candidate| candidate.tool_id).collect();
        debug!(
            event_name = "dispatch.retrieval.ranked",
            worker = %worker.name,
            pattern_hash = %pattern_hash,
            tool_count = tool_ids.len(),
            "retrieved tools for worker"
        );
        Ok(tool_ids)
    }
}

fn collect(
    candidates: &mut Vec<ScoredTool>,
    seen: &mut HashSet<String>,
    scored: impl IntoIterator<Item = ScoredTool>,
) {
    for tool in scored {
        if seen.insert(tool.tool_id.clone()) {
            candidates.push(tool);
        }
    }
}
