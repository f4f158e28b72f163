pub mod route;
pub mod rules;

pub use route::{ActionRoute, KnowledgeRoute, RouteKind, UnknownRoute};
pub use rules::{action_rules, knowledge_rules, ContextSignals, RuleOutcome, RuleRouter};
