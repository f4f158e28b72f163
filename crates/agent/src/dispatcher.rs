use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use tracing::{info, warn};
use uuid::Uuid;

use vaxel_core::errors::{ApplicationError, DispatchError};
use vaxel_core::resilience::{BreakerRegistry, SlidingWindowRateLimiter};
use vaxel_core::retrieval::{query_pattern_hash, ToolOutcome};
use vaxel_core::routing::{ActionRoute, ContextSignals, KnowledgeRoute, RouteKind};
use vaxel_db::repositories::FeedbackRepository;

use crate::classifier::Classifier;
use crate::combo_cache::{AgentComboCache, ComboLookup, ResolvedCombo};
use crate::graph::{AgentReply, AgentRequest, GraphError};
use crate::pool::LazyWorkerPool;
use crate::retriever::SmartRetriever;

const RECENT_WORKER_WINDOW: usize = 5;
const RETRY_SHORTLY: &str = "I could not reach that service just now. Please try again shortly.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueryKind {
    Action,
    Knowledge,
}

#[derive(Clone, Debug)]
pub struct DispatchRequest {
    pub query: String,
    /// Rate-limit key, typically the channel or user the query came from.
    pub channel_key: String,
    pub kind: QueryKind,
    pub signals: ContextSignals,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed {
        correlation_id: String,
        route: String,
        worker: String,
        tool_ids: Vec<String>,
        reply: AgentReply,
        served_from_cache: bool,
    },
    RateLimited {
        retry_after_secs: u64,
        message: String,
    },
    Unavailable {
        worker: String,
        message: String,
    },
}

pub struct DispatcherParts {
    pub action: Classifier<ActionRoute>,
    pub knowledge: Classifier<KnowledgeRoute>,
    pub pool: LazyWorkerPool,
    pub retriever: SmartRetriever,
    pub feedback: Arc<dyn FeedbackRepository>,
    pub combo_cache: Arc<AgentComboCache>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
}

/// Composition root for one request: rate gate, classification, combo-cache
/// shortcut, worker fetch, retrieval, breaker-gated execution, feedback.
/// Expected conditions (denial, breaker open, worker trouble) come back as
/// outcomes; only infrastructure defects surface as errors.
pub struct Dispatcher {
    action: Classifier<ActionRoute>,
    knowledge: Classifier<KnowledgeRoute>,
    pool: LazyWorkerPool,
    retriever: SmartRetriever,
    feedback: Arc<dyn FeedbackRepository>,
    combo_cache: Arc<AgentComboCache>,
    breakers: Arc<BreakerRegistry>,
    limiter: Arc<SlidingWindowRateLimiter>,
    recent_workers: Mutex<VecDeque<String>>,
}

impl Dispatcher {
    pub fn new(parts: DispatcherParts) -> Self {
        Self {
            action: parts.action,
            knowledge: parts.knowledge,
            pool: parts.pool,
            retriever: parts.retriever,
            feedback: parts.feedback,
            combo_cache: parts.combo_cache,
            breakers: parts.breakers,
            limiter: parts.limiter,
            recent_workers: Mutex::new(VecDeque::new()),
        }
    }

    pub fn pool(&self) -> &LazyWorkerPool {
        &self.pool
    }

    pub fn combo_cache(&self) -> &Arc<AgentComboCache> {
        &self.combo_cache
    }

    pub async fn dispatch(
        &self,
        request: DispatchRequest,
    ) -> Result<DispatchOutcome, ApplicationError> {
        let correlation_id = Uuid::new_v4().to_string();

        let decision = self.limiter.check(&request.channel_key);
        if !decision.allowed {
            info!(
                event_name = "dispatch.rate_limited",
                correlation_id = %correlation_id,
                channel_key = %request.channel_key,
                retry_after_secs = decision.reset_seconds,
                "request denied by rate limiter"
            );
            return Ok(DispatchOutcome::RateLimited {
                retry_after_secs: decision.reset_seconds,
                message: format!(
                    "You are sending requests a little too fast. Try again in {} seconds.",
                    decision.reset_seconds
                ),
            });
        }

        let (route, worker_name) = match request.kind {
            QueryKind::Action => {
                let classification = self.action.classify(&request.query, &request.signals).await;
                (classification.route.as_str(), classification.route.worker_name())
            }
            QueryKind::Knowledge => {
                let classification =
                    self.knowledge.classify(&request.query, &request.signals).await;
                (classification.route.as_str(), classification.route.worker_name())
            }
        };

        let Some(handle) = self
            .pool
            .get(worker_name)
            .await
            .map_err(|error| ApplicationError::Integration(error.to_string()))?
        else {
            return Err(DispatchError::UnknownWorker(route.to_string()).into());
        };

        let breaker = self.breakers.get(&format!("worker.{worker_name}"));
        let breaker_open = !breaker.lock().expect("breaker lock").can_execute();
        if breaker_open {
            info!(
                event_name = "dispatch.breaker_open",
                correlation_id = %correlation_id,
                worker = worker_name,
                "worker breaker is open, degrading"
            );
            return Ok(DispatchOutcome::Unavailable {
                worker: worker_name.to_string(),
                message: RETRY_SHORTLY.to_string(),
            });
        }

        let recent = self.recent_snapshot();
        let (tool_ids, served_from_cache) =
            match self.combo_cache.lookup(&recent, route).await {
                ComboLookup::Hit(combo) if combo.worker == worker_name => {
                    let available = handle.available_tool_ids();
                    let tool_ids: Vec<String> = combo
                        .tool_ids
                        .into_iter()
                        .filter(|tool_id| available.iter().any(|id| id == tool_id))
                        .collect();
                    (tool_ids, true)
                }
                _ => {
                    let config = self
                        .pool
                        .config(worker_name)
                        .ok_or_else(|| DispatchError::UnknownWorker(route.to_string()))?;
                    let tool_ids = self
                        .retriever
                        .retrieve(&request.query, config)
                        .await
                        .map_err(|error| ApplicationError::Persistence(error.to_string()))?;
                    self.combo_cache
                        .store(
                            &recent,
                            route,
                            ResolvedCombo {
                                worker: worker_name.to_string(),
                                tool_ids: tool_ids.clone(),
                            },
                        )
                        .await;
                    (tool_ids, false)
                }
            };

        let agent_request = AgentRequest {
            correlation_id: correlation_id.clone(),
            query: request.query.clone(),
            tool_ids: tool_ids.clone(),
        };

        let pattern_hash = query_pattern_hash(&request.query);
        match handle.graph().invoke(agent_request).await {
            Ok(reply) => {
                breaker.lock().expect("breaker lock").record_success();
                for tool_id in &reply.used_tool_ids {
                    self.record_feedback(tool_id, &pattern_hash, ToolOutcome::Success).await;
                }
                self.remember_worker(worker_name);
                info!(
                    event_name = "dispatch.completed",
                    correlation_id = %correlation_id,
                    route,
                    worker = worker_name,
                    steps = reply.steps,
                    served_from_cache,
                    "dispatch completed"
                );
                Ok(DispatchOutcome::Completed {
                    correlation_id,
                    route: route.to_string(),
                    worker: worker_name.to_string(),
                    tool_ids,
                    reply,
                    served_from_cache,
                })
            }
            Err(error) => {
                breaker.lock().expect("breaker lock").record_failure();
                if let GraphError::Tool { tool_id, .. } = &error {
                    self.record_feedback(tool_id, &pattern_hash, ToolOutcome::Failure).await;
                }
                warn!(
                    event_name = "dispatch.worker_failed",
                    correlation_id = %correlation_id,
                    worker = worker_name,
                    error = %error,
                    "worker invocation failed"
                );
                Ok(DispatchOutcome::Unavailable {
                    worker: worker_name.to_string(),
                    message: RETRY_SHORTLY.to_string(),
                })
            }
        }
    }

    async fn record_feedback(&self, tool_id: &str, pattern_hash: &str, outcome: ToolOutcome) {
        if let Err(error) = self.feedback.record(tool_id, pattern_hash, outcome).await {
            warn!(
                event_name = "dispatch.feedback_error",
                tool_id,
                error = %error,
                "feedback recording failed"
            );
        }
    }

    fn recent_snapshot(&self) -> Vec<String> {
        self.recent_workers.lock().expect("recent workers lock").iter().cloned().collect()
    }

    fn remember_worker(&self, worker_name: &str) {
        let mut recent = self.recent_workers.lock().expect("recent workers lock");
        recent.push_back(worker_name.to_string());
        while recent.len() > RECENT_WORKER_WINDOW {
            recent.pop_front();
        }
    }
}
