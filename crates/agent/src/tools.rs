use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Static catalog entry describing one tool. Read-only at runtime; loaded
/// from the builtin set or from a TOML file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub tool_id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub namespace: String,
    pub category: String,
    #[serde(default)]
    pub filter_kind: Option<String>,
    #[serde(default = "default_tool_result_limit")]
    pub default_limit: u32,
    #[serde(default)]
    pub requires_filter: bool,
    #[serde(default)]
    pub fallback_tool_ids: Vec<String>,
}

fn default_tool_result_limit() -> u32 {
    5
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("could not parse tool catalog: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("duplicate tool id `{0}` in catalog")]
    DuplicateToolId(String),
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    tools: Vec<ToolDefinition>,
}

#[derive(Clone, Debug, Default)]
pub struct ToolCatalog {
    tools: Vec<ToolDefinition>,
}

impl ToolCatalog {
    pub fn new(tools: Vec<ToolDefinition>) -> Result<Self, CatalogError> {
        let mut seen = HashSet::new();
        for tool in &tools {
            if !seen.insert(tool.tool_id.clone()) {
                return Err(CatalogError::DuplicateToolId(tool.tool_id.clone()));
            }
        }
        Ok(Self { tools })
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, CatalogError> {
        let file: CatalogFile = toml::from_str(raw)?;
        Self::new(file.tools)
    }

    pub fn get(&self, tool_id: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|tool| tool.tool_id == tool_id)
    }

    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Tool ids belonging to any of the given namespaces, in catalog order.
    pub fn namespace_tool_ids(&self, namespaces: &[String]) -> Vec<String> {
        self.tools
            .iter()
            .filter(|tool| namespaces.iter().any(|namespace| *namespace == tool.namespace))
            .map(|tool| tool.tool_id.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// The catalog that ships with the binary. A deployment can replace it
    /// with a TOML file via `from_toml_str`.
    pub fn builtin() -> Self {
        let tool = |tool_id: &str,
                    name: &str,
                    description: &str,
                    keywords: &[&str],
                    namespace: &str,
                    category: &str| ToolDefinition {
            tool_id: tool_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            keywords: keywords.iter().map(|keyword| keyword.to_string()).collect(),
            namespace: namespace.to_string(),
            category: category.to_string(),
            filter_kind: None,
            default_limit: 5,
            requires_filter: false,
            fallback_tool_ids: Vec::new(),
        };

        let mut tools = vec![
            tool(
                "web_search",
                "Webbsökning",
                "Search the web and return result snippets",
                &["sök", "googla", "hitta", "search"],
                "action.web",
                "search",
            ),
            tool(
                "web_fetch",
                "Hämta sida",
                "Fetch one page and return its readable text",
                &["länk", "sida", "url", "öppna"],
                "action.web",
                "fetch",
            ),
            tool(
                "media_search",
                "Mediasökning",
                "Find videos, music and podcasts",
                &["video", "musik", "podcast", "film", "låt"],
                "action.media",
                "search",
            ),
            tool(
                "smhi_forecast",
                "Väderprognos",
                "Weather forecast for a Swedish location",
                &["väder", "vädret", "prognos", "regn", "temperatur"],
                "action.travel",
                "weather",
            ),
            tool(
                "sl_departures",
                "Avgångar",
                "Upcoming public transport departures for a stop",
                &["tåg", "buss", "avgång", "avgångar", "pendeltåg"],
                "action.travel",
                "transit",
            ),
            tool(
                "trafik_status",
                "Trafikläget",
                "Current road and rail disruptions",
                &["trafik", "trafikläget", "försening", "förseningar", "olycka"],
                "action.travel",
                "transit",
            ),
            tool(
                "stats_summary",
                "Statistiksammanfattning",
                "Summarize a numeric series into key figures",
                &["statistik", "medelvärde", "summera", "antal"],
                "action.data",
                "analytics",
            ),
            tool(
                "stats_compare",
                "Jämförelse",
                "Compare two numeric series",
                &["jämför", "diagram", "graf", "skillnad"],
                "action.data",
                "analytics",
            ),
            tool(
                "docs_search",
                "Dokumentsökning",
                "Search uploaded documents and attachments",
                &["dokument", "fil", "pdf", "bilaga", "rapport"],
                "knowledge.docs",
                "search",
            ),
            tool(
                "kb_search",
                "Kunskapsbas",
                "Search the internal knowledge base",
                &["policy", "rutin", "handbok", "wiki", "intranät"],
                "knowledge.internal",
                "search",
            ),
            tool(
                "note_lookup",
                "Anteckningar",
                "Look up saved notes and reminders",
                &["anteckning", "anteckningar", "påminnelse", "sparat"],
                "knowledge.internal",
                "lookup",
            ),
            tool(
                "news_search",
                "Nyhetssökning",
                "Search current news coverage",
                &["nyheter", "senaste", "aktuellt", "idag"],
                "knowledge.external",
                "search",
            ),
            tool(
                "marketplace_search",
                "Marknadssökning",
                "Search second-hand marketplace listings",
                &["blocket", "annons", "begagnad", "köp", "sälj"],
                "knowledge.external",
                "search",
            ),
        ];

        tools[4].fallback_tool_ids = vec!["trafik_status".to_string()];
        tools[3].filter_kind = Some("location".to_string());
        tools[3].requires_filter = true;
        tools[4].filter_kind = Some("stop".to_string());

        Self { tools }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScoredTool {
    pub tool_id: String,
    pub score: f64,
}

const ID_NAME_WEIGHT: f64 = 3.0;
const KEYWORD_WEIGHT: f64 = 2.0;
const DESCRIPTION_WEIGHT: f64 = 0.5;

/// Namespace-partitioned, keyword-scored view over a catalog.
pub struct ToolIndex {
    by_namespace: HashMap<String, Vec<ToolDefinition>>,
}

impl ToolIndex {
    pub fn build(catalog: &ToolCatalog) -> Self {
        let mut by_namespace: HashMap<String, Vec<ToolDefinition>> = HashMap::new();
        for tool in catalog.tools() {
            by_namespace.entry(tool.namespace.clone()).or_default().push(tool.clone());
        }
        Self { by_namespace }
    }

    pub fn namespace_tools(&self, namespace: &str) -> &[ToolDefinition] {
        self.by_namespace.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Tools in `namespace` with a positive keyword score for `query`,
    /// ordered best-first with ties broken by tool id.
    pub fn search(&self, namespace: &str, query: &str) -> Vec<ScoredTool> {
        let tokens = query_tokens(query);
        let normalized = query.to_lowercase();

        let mut scored: Vec<ScoredTool> = self
            .namespace_tools(namespace)
            .iter()
            .filter_map(|tool| {
                let score = score_tool(tool, &normalized, &tokens);
                (score > 0.0).then(|| ScoredTool { tool_id: tool.tool_id.clone(), score })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal).then_with(|| a.tool_id.cmp(&b.tool_id))
        });
        scored
    }
}

fn query_tokens(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(|character: char| !character.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_string())
        .collect()
}

fn score_tool(tool: &ToolDefinition, normalized_query: &str, tokens: &[String]) -> f64 {
    let mut score = 0.0;

    let id_tokens: Vec<&str> = tool.tool_id.split('_').collect();
    let name_lower = tool.name.to_lowercase();
    for token in tokens {
        if id_tokens.contains(&token.as_str()) || name_lower.split_whitespace().any(|word| word == token) {
            score += ID_NAME_WEIGHT;
        }
    }

    for keyword in &tool.keywords {
        let keyword = keyword.to_lowercase();
        let hit = if keyword.contains(' ') {
            normalized_query.contains(&keyword)
        } else {
            tokens.iter().any(|token| *token == keyword)
        };
        if hit {
            score += KEYWORD_WEIGHT;
        }
    }

    let description_lower = tool.description.to_lowercase();
    for token in tokens {
        if description_lower.split_whitespace().any(|word| word == token.as_str()) {
            score += DESCRIPTION_WEIGHT;
        }
    }

    score
}
