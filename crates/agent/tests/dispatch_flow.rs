//! End-to-end dispatch flow over the composed stack: rule routing, worker
//! construction, tool retrieval, the agent loop, feedback and breakers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use vaxel_agent::classifier::{Classifier, DEFAULT_ACTION_PROMPT, DEFAULT_KNOWLEDGE_PROMPT};
use vaxel_agent::combo_cache::{AgentComboCache, ComboCacheSettings};
use vaxel_agent::dispatcher::{
    DispatchOutcome, DispatchRequest, Dispatcher, DispatcherParts, QueryKind,
};
use vaxel_agent::graph::{GraphError, ToolInvoker};
use vaxel_agent::llm::{LlmClient, LlmError};
use vaxel_agent::pool::{default_worker_configs, CatalogWorkerFactory, LazyWorkerPool};
use vaxel_agent::retriever::SmartRetriever;
use vaxel_agent::tools::{ToolCatalog, ToolIndex};
use vaxel_core::resilience::{
    BreakerConfig, BreakerRegistry, ManualClock, RateLimitConfig, SlidingWindowRateLimiter,
};
use vaxel_core::retrieval::query_pattern_hash;
use vaxel_core::routing::{action_rules, knowledge_rules, ContextSignals};
use vaxel_db::repositories::{
    FeedbackRepository, InMemoryComboCacheRepository, InMemoryFeedbackRepository,
};

/// Deterministic model: asks for the forecast tool until its output shows up
/// in the transcript, then answers. Counts calls so tests can assert the
/// rule tier kept the model out of classification.
struct DeterministicLlm {
    calls: AtomicUsize,
}

#[async_trait]
impl LlmClient for DeterministicLlm {
    async fn complete(&self, _system: &str, user_text: &str) -> Result<String, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if user_text.contains("[smhi_forecast]") {
            Ok("Imorgon blir det sol och 18 grader.".to_string())
        } else if user_text.contains("vädret") {
            Ok("TOOL:smhi_forecast stockholm imorgon".to_string())
        } else {
            Ok("Hej! Vad kan jag hjälpa till med?".to_string())
        }
    }
}

struct SwitchableInvoker {
    failing: AtomicBool,
    invocations: AtomicUsize,
}

#[async_trait]
impl ToolInvoker for SwitchableInvoker {
    async fn invoke(&self, tool_id: &str, _input: &str) -> Result<String, GraphError> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(GraphError::Tool {
                tool_id: tool_id.to_string(),
                message: "upstream timeout".to_string(),
            });
        }
        Ok("18 grader, sol".to_string())
    }
}

struct Stack {
    dispatcher: Dispatcher,
    llm: Arc<DeterministicLlm>,
    invoker: Arc<SwitchableInvoker>,
    feedback: Arc<InMemoryFeedbackRepository>,
    breakers: Arc<BreakerRegistry>,
    clock: Arc<ManualClock>,
}

fn stack() -> Stack {
    let llm = Arc::new(DeterministicLlm { calls: AtomicUsize::new(0) });
    let invoker = Arc::new(SwitchableInvoker {
        failing: AtomicBool::new(false),
        invocations: AtomicUsize::new(0),
    });
    let feedback = Arc::new(InMemoryFeedbackRepository::default());
    let clock = Arc::new(ManualClock::default());
    let breakers = Arc::new(BreakerRegistry::with_clock(
        BreakerConfig { failure_threshold: 3, reset_timeout: Duration::from_secs(60) },
        clock.clone(),
    ));

    let catalog = ToolCatalog::builtin();
    let dispatcher = Dispatcher::new(DispatcherParts {
        action: Classifier::new(action_rules(), llm.clone(), DEFAULT_ACTION_PROMPT),
        knowledge: Classifier::new(knowledge_rules(true), llm.clone(), DEFAULT_KNOWLEDGE_PROMPT),
        pool: LazyWorkerPool::new(
            default_worker_configs(3),
            Arc::new(CatalogWorkerFactory::new(
                catalog.clone(),
                llm.clone(),
                Some(invoker.clone()),
            )),
        ),
        retriever: SmartRetriever::new(ToolIndex::build(&catalog), feedback.clone()),
        feedback: feedback.clone(),
        combo_cache: Arc::new(AgentComboCache::new(
            Arc::new(InMemoryComboCacheRepository::default()),
            ComboCacheSettings::default(),
        )),
        breakers: breakers.clone(),
        limiter: Arc::new(SlidingWindowRateLimiter::new(RateLimitConfig {
            max_requests: 100,
            window_seconds: 60,
        })),
    });

    Stack { dispatcher, llm, invoker, feedback, breakers, clock }
}

fn action_request(query: &str) -> DispatchRequest {
    DispatchRequest {
        query: query.to_string(),
        channel_key: "C123".to_string(),
        kind: QueryKind::Action,
        signals: ContextSignals::default(),
    }
}

#[tokio::test]
async fn greeting_routes_to_default_worker_without_classifier_llm_calls() {
    let stack = stack();

    let outcome = stack.dispatcher.dispatch(action_request("Hej!")).await.expect("dispatch");
    let DispatchOutcome::Completed { route, worker, reply, .. } = outcome else {
        panic!("expected completion");
    };

    assert_eq!(route, "web");
    assert_eq!(worker, "web");
    assert!(reply.text.contains("Hej"));
    // Exactly one model call: the worker answering. Classification used the
    // smalltalk rule.
    assert_eq!(stack.llm.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn url_query_routes_to_web_via_the_url_pattern() {
    let stack = stack();

    let outcome = stack
        .dispatcher
        .dispatch(action_request("kolla https://example.com åt mig"))
        .await
        .expect("dispatch");
    let DispatchOutcome::Completed { route, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(route, "web");
}

#[tokio::test]
async fn weather_query_runs_the_forecast_tool_and_records_success() {
    let stack = stack();

    let outcome = stack
        .dispatcher
        .dispatch(action_request("vad blir vädret imorgon"))
        .await
        .expect("dispatch");
    let DispatchOutcome::Completed { route, worker, reply, .. } = outcome else {
        panic!("expected completion");
    };

    assert_eq!(route, "travel");
    assert_eq!(worker, "travel");
    assert_eq!(reply.used_tool_ids, vec!["smhi_forecast".to_string()]);
    assert!(reply.text.contains("sol"));
    assert_eq!(stack.invoker.invocations.load(Ordering::SeqCst), 1);

    let hash = query_pattern_hash("vad blir vädret imorgon");
    let signal = stack.feedback.find("smhi_forecast", &hash).await.expect("find").expect("signal");
    assert_eq!(signal.successes, 1);
}

#[tokio::test]
async fn breaker_opens_after_failures_and_recovers_after_the_reset_timeout() {
    let stack = stack();
    stack.invoker.failing.store(true, Ordering::SeqCst);

    for _ in 0..3 {
        let outcome = stack
            .dispatcher
            .dispatch(action_request("vad blir vädret imorgon"))
            .await
            .expect("dispatch");
        assert!(matches!(outcome, DispatchOutcome::Unavailable { .. }));
    }
    assert_eq!(stack.invoker.invocations.load(Ordering::SeqCst), 3);

    // Breaker is open now: the worker is skipped entirely.
    let outcome = stack
        .dispatcher
        .dispatch(action_request("vad blir vädret imorgon"))
        .await
        .expect("dispatch");
    assert!(matches!(outcome, DispatchOutcome::Unavailable { .. }));
    assert_eq!(stack.invoker.invocations.load(Ordering::SeqCst), 3, "no call while open");

    let breaker = stack.breakers.get("worker.travel");
    assert!(!breaker.lock().expect("lock").can_execute());

    // After the reset timeout the breaker admits a probe; the tool works
    // again, so the probe succeeds and the breaker closes.
    stack.clock.advance(Duration::from_secs(61));
    stack.invoker.failing.store(false, Ordering::SeqCst);

    let outcome = stack
        .dispatcher
        .dispatch(action_request("vad blir vädret imorgon"))
        .await
        .expect("dispatch");
    assert!(matches!(outcome, DispatchOutcome::Completed { .. }));
    assert!(breaker.lock().expect("lock").can_execute());
}

#[tokio::test]
async fn knowledge_attachment_queries_stay_internal() {
    let stack = stack();

    let outcome = stack
        .dispatcher
        .dispatch(DispatchRequest {
            query: "senaste nyheterna om börsen".to_string(),
            channel_key: "C123".to_string(),
            kind: QueryKind::Knowledge,
            signals: ContextSignals { has_attachments: true, has_mentions: false },
        })
        .await
        .expect("dispatch");

    let DispatchOutcome::Completed { route, worker, .. } = outcome else {
        panic!("expected completion");
    };
    assert_eq!(route, "internal");
    assert_eq!(worker, "internal");
}
