use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use vaxel_agent::dispatcher::Dispatcher;
use vaxel_core::resilience::{BreakerRegistry, SlidingWindowRateLimiter};

#[derive(Clone)]
pub struct AdminState {
    pub dispatcher: Arc<Dispatcher>,
    pub breakers: Arc<BreakerRegistry>,
    pub limiter: Arc<SlidingWindowRateLimiter>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct CacheStatusResponse {
    pub disabled: bool,
}

#[derive(Clone, Debug, Deserialize)]
pub struct SetDisabledRequest {
    pub disabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum SubsystemOutcome {
    Cleared { cleared: u64 },
    Failed { error: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ClearResponse {
    pub status: &'static str,
    pub subsystems: BTreeMap<&'static str, SubsystemOutcome>,
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/cache", get(cache_status))
        .route("/admin/cache/disabled", post(set_disabled))
        .route("/admin/cache/clear", post(clear_caches))
        .with_state(state)
}

pub async fn cache_status(State(state): State<AdminState>) -> Json<CacheStatusResponse> {
    Json(CacheStatusResponse { disabled: state.dispatcher.combo_cache().is_disabled() })
}

pub async fn set_disabled(
    State(state): State<AdminState>,
    Json(request): Json<SetDisabledRequest>,
) -> Json<CacheStatusResponse> {
    state.dispatcher.combo_cache().set_disabled(request.disabled);
    info!(
        event_name = "admin.cache.disabled_set",
        disabled = request.disabled,
        "combo cache disabled flag updated"
    );
    Json(CacheStatusResponse { disabled: request.disabled })
}

/// Clears every cache layer and reports per-subsystem results. The
/// in-memory layers clear first; a persisted failure is reported verbatim
/// and does not stop the remaining subsystems.
pub async fn clear_caches(State(state): State<AdminState>) -> Json<ClearResponse> {
    let mut subsystems: BTreeMap<&'static str, SubsystemOutcome> = BTreeMap::new();

    let combo_report = state.dispatcher.combo_cache().clear().await;
    subsystems.insert(
        "memory_combo",
        SubsystemOutcome::Cleared { cleared: combo_report.memory_entries as u64 },
    );
    match combo_report.persisted {
        Ok(cleared) => {
            subsystems.insert("persisted_combo", SubsystemOutcome::Cleared { cleared });
        }
        Err(error) => {
            warn!(
                event_name = "admin.cache.persisted_clear_failed",
                error = %error,
                "persisted combo cache clear failed"
            );
            subsystems
                .insert("persisted_combo", SubsystemOutcome::Failed { error: error.to_string() });
        }
    }

    subsystems.insert(
        "workers",
        SubsystemOutcome::Cleared { cleared: state.dispatcher.pool().clear() as u64 },
    );
    subsystems
        .insert("breakers", SubsystemOutcome::Cleared { cleared: state.breakers.clear() as u64 });
    subsystems.insert(
        "rate_limiter",
        SubsystemOutcome::Cleared { cleared: state.limiter.clear() as u64 },
    );

    let status = if subsystems.values().any(|outcome| matches!(outcome, SubsystemOutcome::Failed { .. }))
    {
        "partial"
    } else {
        "ok"
    };
    info!(event_name = "admin.cache.cleared", status, "cache clear finished");

    Json(ClearResponse { status, subsystems })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::extract::State;
    use axum::Json;

    use vaxel_agent::classifier::{Classifier, DEFAULT_ACTION_PROMPT, DEFAULT_KNOWLEDGE_PROMPT};
    use vaxel_agent::combo_cache::{AgentComboCache, ComboCacheSettings, ResolvedCombo};
    use vaxel_agent::dispatcher::{Dispatcher, DispatcherParts};
    use vaxel_agent::llm::NoopLlmClient;
    use vaxel_agent::pool::{default_worker_configs, CatalogWorkerFactory, LazyWorkerPool};
    use vaxel_agent::retriever::SmartRetriever;
    use vaxel_agent::tools::{ToolCatalog, ToolIndex};
    use vaxel_core::resilience::{
        BreakerConfig, BreakerRegistry, RateLimitConfig, SlidingWindowRateLimiter,
    };
    use vaxel_core::routing::{action_rules, knowledge_rules};
    use vaxel_db::repositories::{InMemoryComboCacheRepository, InMemoryFeedbackRepository};

    use super::{cache_status, clear_caches, set_disabled, AdminState, SetDisabledRequest, SubsystemOutcome};

    fn admin_state() -> AdminState {
        let llm = Arc::new(NoopLlmClient);
        let catalog = ToolCatalog::builtin();
        let feedback = Arc::new(InMemoryFeedbackRepository::default());
        let breakers = Arc::new(BreakerRegistry::new(BreakerConfig::default()));
        let limiter = Arc::new(SlidingWindowRateLimiter::new(RateLimitConfig::default()));
        let combo_cache = Arc::new(AgentComboCache::new(
            Arc::new(InMemoryComboCacheRepository::default()),
            ComboCacheSettings::default(),
        ));

        let dispatcher = Arc::new(Dispatcher::new(DispatcherParts {
            action: Classifier::new(action_rules(), llm.clone(), DEFAULT_ACTION_PROMPT),
            knowledge: Classifier::new(knowledge_rules(true), llm.clone(), DEFAULT_KNOWLEDGE_PROMPT),
            pool: LazyWorkerPool::new(
                default_worker_configs(4),
                Arc::new(CatalogWorkerFactory::new(catalog.clone(), llm, None)),
            ),
            retriever: SmartRetriever::new(ToolIndex::build(&catalog), feedback.clone()),
            feedback,
            combo_cache: combo_cache.clone(),
            breakers: breakers.clone(),
            limiter: limiter.clone(),
        }));

        AdminState { dispatcher, breakers, limiter }
    }

    #[tokio::test]
    async fn disabled_flag_round_trips() {
        let state = admin_state();

        let Json(initial) = cache_status(State(state.clone())).await;
        assert!(!initial.disabled);

        let Json(updated) =
            set_disabled(State(state.clone()), Json(SetDisabledRequest { disabled: true })).await;
        assert!(updated.disabled);

        let Json(current) = cache_status(State(state)).await;
        assert!(current.disabled);
    }

    #[tokio::test]
    async fn clear_reports_every_subsystem() {
        let state = admin_state();

        // Warm a few layers first.
        state.dispatcher.pool().get("travel").await.expect("get").expect("worker");
        state.breakers.get("worker.travel");
        state.limiter.check("channel-1");
        state
            .dispatcher
            .combo_cache()
            .store(
                &["travel".to_string()],
                "travel",
                ResolvedCombo {
                    worker: "travel".to_string(),
                    tool_ids: vec!["smhi_forecast".to_string()],
                },
            )
            .await;

        let Json(response) = clear_caches(State(state.clone())).await;
        assert_eq!(response.status, "ok");

        for subsystem in
            ["memory_combo", "persisted_combo", "workers", "breakers", "rate_limiter"]
        {
            assert!(response.subsystems.contains_key(subsystem), "missing {subsystem}");
        }
        assert_eq!(
            response.subsystems["workers"],
            SubsystemOutcome::Cleared { cleared: 1 },
            "one constructed worker was dropped"
        );
        assert_eq!(response.subsystems["breakers"], SubsystemOutcome::Cleared { cleared: 1 });
        assert_eq!(response.subsystems["rate_limiter"], SubsystemOutcome::Cleared { cleared: 1 });

        assert!(state.breakers.is_empty());
    }
}
