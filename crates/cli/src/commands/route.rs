use vaxel_core::config::{AppConfig, LoadOptions};
use vaxel_core::routing::{action_rules, knowledge_rules, ContextSignals, RouteKind, RuleOutcome};

use crate::commands::CommandResult;

/// Offline classification through the deterministic tier only. Useful for
/// checking what a pattern change does without a model in the loop.
pub fn run(query: &str, knowledge: bool) -> CommandResult {
    let allow_external = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config.routing.allow_external_knowledge,
        // No usable config is fine for an offline check; default posture.
        Err(_) => true,
    };

    let (taxonomy, outcome) = if knowledge {
        ("knowledge", describe(knowledge_rules(allow_external), query))
    } else {
        ("action", describe(action_rules(), query))
    };

    CommandResult::success("route", format!("taxonomy={taxonomy} {outcome}"))
}

fn describe<R: RouteKind>(rules: vaxel_core::routing::RuleRouter<R>, query: &str) -> String {
    match rules.evaluate(query, &ContextSignals::default()) {
        RuleOutcome::Route { route, category } => {
            format!("route={} category={category}", route.as_str())
        }
        RuleOutcome::NeedsFallback => format!(
            "route={} category=llm_fallback_required",
            rules.default_route().as_str()
        ),
    }
}
