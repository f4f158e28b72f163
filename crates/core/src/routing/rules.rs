use regex::Regex;

use super::route::{ActionRoute, KnowledgeRoute, RouteKind};

/// Context flags carried alongside the query text. These come from the chat
/// boundary and take precedence over any text pattern.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ContextSignals {
    pub has_attachments: bool,
    pub has_mentions: bool,
}

impl ContextSignals {
    pub fn any(&self) -> bool {
        self.has_attachments || self.has_mentions
    }
}

/// Result of running the deterministic tier. `NeedsFallback` means no rule
/// fired and the caller may consult the LLM tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleOutcome<R> {
    Route { route: R, category: &'static str },
    NeedsFallback,
}

enum Matcher {
    Url(Regex),
    Keywords(&'static [&'static str]),
}

struct PatternCategory<R> {
    name: &'static str,
    route: R,
    matcher: Matcher,
}

/// Rule tier of a classifier: an ordered list of pattern categories with
/// first-match-wins precedence, an optional context-signal override, and a
/// downgrade map applied when a matched route is disabled by configuration.
///
/// The tier is synchronous and pure so it can be tested exhaustively without
/// any model call.
pub struct RuleRouter<R: RouteKind> {
    default_route: R,
    signal_override: Option<R>,
    categories: Vec<PatternCategory<R>>,
    disabled_remap: Vec<(R, R)>,
}

impl<R: RouteKind> RuleRouter<R> {
    pub fn default_route(&self) -> R {
        self.default_route
    }

    /// Run the deterministic tiers, in strict precedence order:
    /// empty query, context signals, pattern categories, disabled-route
    /// downgrade. No rule firing yields `NeedsFallback`.
    pub fn evaluate(&self, query: &str, signals: &ContextSignals) -> RuleOutcome<R> {
        if query.trim().is_empty() {
            return RuleOutcome::Route { route: self.default_route, category: "empty" };
        }

        if signals.any() {
            if let Some(route) = self.signal_override {
                return RuleOutcome::Route { route, category: "context_signal" };
            }
        }

        let normalized = normalize(query);
        let tokens = tokenize(&normalized);

        for category in &self.categories {
            let hit = match &category.matcher {
                Matcher::Url(pattern) => pattern.is_match(query),
                Matcher::Keywords(keywords) => keywords
                    .iter()
                    .any(|keyword| keyword_matches(keyword, &normalized, &tokens)),
            };
            if hit {
                return RuleOutcome::Route {
                    route: self.downgrade(category.route),
                    category: category.name,
                };
            }
        }

        RuleOutcome::NeedsFallback
    }

    fn downgrade(&self, route: R) -> R {
        self.disabled_remap
            .iter()
            .find(|(from, _)| *from == route)
            .map(|(_, to)| *to)
            .unwrap_or(route)
    }
}

fn normalize(query: &str) -> String {
    query.to_lowercase()
}

fn tokenize(normalized: &str) -> Vec<String> {
    normalized
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

/// Single-word keywords match whole tokens; multi-word keywords match as a
/// substring of the normalized text.
fn keyword_matches(keyword: &str, normalized: &str, tokens: &[String]) -> bool {
    if keyword.contains(' ') {
        normalized.contains(keyword)
    } else {
        tokens.iter().any(|token| token == keyword)
    }
}

fn url_pattern() -> Regex {
    Regex::new(r"(?i)\bhttps?://\S+|\bwww\.\S+").expect("url pattern is valid")
}

const SMALLTALK: &[&str] = &[
    "hej", "hejsan", "tja", "tjena", "hallå", "god morgon", "god kväll", "tack",
    "hello", "hi", "hey", "thanks",
];

const MEDIA_KEYWORDS: &[&str] = &[
    "video", "youtube", "film", "serie", "musik", "spotify", "podcast", "spela upp",
    "trailer", "låt",
];

const TRAVEL_KEYWORDS: &[&str] = &[
    "väder", "vädret", "temperatur", "temperaturen", "regn", "snö", "prognos",
    "tåg", "tåget", "buss", "bussen", "pendeltåg", "avgång", "avgångar", "trafik",
    "trafikläget", "försening", "förseningar", "resa", "weather", "forecast",
    "train", "departure",
];

const DATA_KEYWORDS: &[&str] = &[
    "statistik", "medelvärde", "jämför", "diagram", "graf", "antal", "summera",
    "stats", "average", "compare",
];

const DOCS_KEYWORDS: &[&str] = &[
    "dokument", "dokumentet", "fil", "filen", "filer", "pdf", "bilaga", "bilagan",
    "rapport", "rapporten", "document", "file", "attachment", "report",
];

const INTERNAL_KEYWORDS: &[&str] = &[
    "policy", "rutin", "rutiner", "handbok", "handboken", "intranät", "wiki",
    "onboarding",
];

const EXTERNAL_KEYWORDS: &[&str] = &[
    "nyheter", "nyheterna", "senaste", "aktuellt", "just nu", "idag", "börsen",
    "kursen", "news", "latest", "today",
];

/// Build the rule tier for action-style queries. Smalltalk resolves to the
/// default route so greetings never reach the model.
pub fn action_rules() -> RuleRouter<ActionRoute> {
    RuleRouter {
        default_route: ActionRoute::default_route(),
        signal_override: None,
        categories: vec![
            PatternCategory {
                name: "smalltalk",
                route: ActionRoute::default_route(),
                matcher: Matcher::Keywords(SMALLTALK),
            },
            PatternCategory {
                name: "url",
                route: ActionRoute::Web,
                matcher: Matcher::Url(url_pattern()),
            },
            PatternCategory {
                name: "media",
                route: ActionRoute::Media,
                matcher: Matcher::Keywords(MEDIA_KEYWORDS),
            },
            PatternCategory {
                name: "travel",
                route: ActionRoute::Travel,
                matcher: Matcher::Keywords(TRAVEL_KEYWORDS),
            },
            PatternCategory {
                name: "data",
                route: ActionRoute::Data,
                matcher: Matcher::Keywords(DATA_KEYWORDS),
            },
        ],
        disabled_remap: Vec::new(),
    }
}

/// Build the rule tier for knowledge-style queries. Attachments or mentions
/// force the internal route before any pattern runs; when external sources
/// are disabled, external matches downgrade to internal.
pub fn knowledge_rules(allow_external: bool) -> RuleRouter<KnowledgeRoute> {
    let disabled_remap = if allow_external {
        Vec::new()
    } else {
        vec![(KnowledgeRoute::External, KnowledgeRoute::Internal)]
    };

    RuleRouter {
        default_route: KnowledgeRoute::default_route(),
        signal_override: Some(KnowledgeRoute::Internal),
        categories: vec![
            PatternCategory {
                name: "smalltalk",
                route: KnowledgeRoute::default_route(),
                matcher: Matcher::Keywords(SMALLTALK),
            },
            PatternCategory {
                name: "url",
                route: KnowledgeRoute::External,
                matcher: Matcher::Url(url_pattern()),
            },
            PatternCategory {
                name: "docs",
                route: KnowledgeRoute::Docs,
                matcher: Matcher::Keywords(DOCS_KEYWORDS),
            },
            PatternCategory {
                name: "external",
                route: KnowledgeRoute::External,
                matcher: Matcher::Keywords(EXTERNAL_KEYWORDS),
            },
            PatternCategory {
                name: "internal",
                route: KnowledgeRoute::Internal,
                matcher: Matcher::Keywords(INTERNAL_KEYWORDS),
            },
        ],
        disabled_remap,
    }
}
