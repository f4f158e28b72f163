use std::sync::Arc;

use tracing::{debug, warn};

use vaxel_core::routing::{ContextSignals, RouteKind, RuleOutcome, RuleRouter};

use crate::llm::LlmClient;

pub const DEFAULT_ACTION_PROMPT: &str = "You route user queries for a conversational assistant. \
     Pick the action category that fits best and reply with exactly one word: \
     web, media, travel, or data.";

pub const DEFAULT_KNOWLEDGE_PROMPT: &str = "You route user queries for a conversational assistant. \
     Pick the knowledge source that fits best and reply with exactly one word: \
     docs, internal, or external.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassificationTier {
    /// A deterministic rule fired; the model was never consulted.
    Rule { category: &'static str },
    /// No rule fired and the model reply contained a known route token.
    LlmFallback,
    /// No rule fired and the model was unavailable, failed, or replied with
    /// no known token. The default route is used.
    DefaultFallback,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification<R> {
    pub route: R,
    pub tier: ClassificationTier,
}

/// Two-tier route classifier: the exhaustive rule tier runs first and the
/// LLM is only consulted when no rule fires. `classify` never fails; every
/// model error maps to the taxonomy's default route.
pub struct Classifier<R: RouteKind> {
    rules: RuleRouter<R>,
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl<R: RouteKind> Classifier<R> {
    pub fn new(rules: RuleRouter<R>, llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self { rules, llm, system_prompt: system_prompt.into() }
    }

    pub async fn classify(&self, query: &str, signals: &ContextSignals) -> Classification<R> {
        if let RuleOutcome::Route { route, category } = self.rules.evaluate(query, signals) {
            debug!(
                event_name = "dispatch.route.rule_match",
                route = route.as_str(),
                category,
                "rule tier classified query"
            );
            return Classification { route, tier: ClassificationTier::Rule { category } };
        }

        match self.llm.complete(&self.system_prompt, query).await {
            Ok(reply) => match R::from_reply_token(&reply) {
                Some(route) => {
                    debug!(
                        event_name = "dispatch.route.llm_fallback",
                        route = route.as_str(),
                        "llm fallback classified query"
                    );
                    Classification { route, tier: ClassificationTier::LlmFallback }
                }
                None => {
                    debug!(
                        event_name = "dispatch.route.llm_no_token",
                        reply = %reply,
                        "llm reply contained no known route token, using default"
                    );
                    self.default_classification()
                }
            },
            Err(error) => {
                warn!(
                    event_name = "dispatch.route.llm_error",
                    error = %error,
                    "llm fallback failed, using default route"
                );
                self.default_classification()
            }
        }
    }

    fn default_classification(&self) -> Classification<R> {
        Classification {
            route: self.rules.default_route(),
            tier: ClassificationTier::DefaultFallback,
        }
    }
}
