use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Common surface shared by the two route taxonomies so the classifier can
/// be written once over either of them.
pub trait RouteKind:
    Copy + Eq + std::hash::Hash + fmt::Debug + Send + Sync + 'static
{
    fn default_route() -> Self;
    fn as_str(&self) -> &'static str;
    /// All members, in declared order. Order matters for reply-token
    /// matching: the first token found in an LLM reply wins.
    fn all() -> &'static [Self];

    /// Normalize a free-form LLM reply into a route by lower-casing and
    /// substring-matching against the known route tokens.
    fn from_reply_token(reply: &str) -> Option<Self> {
        let normalized = reply.to_lowercase();
        Self::all().iter().copied().find(|route| normalized.contains(route.as_str()))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("unknown route `{value}` (expected one of {expected})")]
pub struct UnknownRoute {
    pub value: String,
    pub expected: &'static str,
}

/// Routes for action-style queries: do something out in the world.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionRoute {
    Web,
    Media,
    Travel,
    Data,
}

/// Routes for knowledge-style queries: find and read something.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KnowledgeRoute {
    Docs,
    Internal,
    External,
}

impl RouteKind for ActionRoute {
    fn default_route() -> Self {
        Self::Web
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Web => "web",
            Self::Media => "media",
            Self::Travel => "travel",
            Self::Data => "data",
        }
    }

    fn all() -> &'static [Self] {
        &[Self::Web, Self::Media, Self::Travel, Self::Data]
    }
}

impl RouteKind for KnowledgeRoute {
    fn default_route() -> Self {
        Self::Internal
    }

    fn as_str(&self) -> &'static str {
        match self {
            Self::Docs => "docs",
            Self::Internal => "internal",
            Self::External => "external",
        }
    }

    fn all() -> &'static [Self] {
        &[Self::Docs, Self::Internal, Self::External]
    }
}

impl ActionRoute {
    /// Name of the worker that serves this route.
    pub fn worker_name(&self) -> &'static str {
        self.as_str()
    }
}

impl KnowledgeRoute {
    pub fn worker_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for ActionRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for KnowledgeRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Historical persisted route values that predate the current enums. The
/// lookup runs before strict parsing; values absent from both the table and
/// the enums are a parse error.
const ACTION_ALIASES: &[(&str, &str)] = &[
    ("google", "web"),
    ("search", "web"),
    ("browse", "web"),
    ("video", "media"),
    ("youtube", "media"),
    ("music", "media"),
    ("weather", "travel"),
    ("transit", "travel"),
    ("commute", "travel"),
    ("stats", "data"),
    ("statistics", "data"),
];

const KNOWLEDGE_ALIASES: &[(&str, &str)] = &[
    ("documents", "docs"),
    ("files", "docs"),
    ("local", "internal"),
    ("kb", "internal"),
    ("knowledge_base", "internal"),
    ("realtime", "external"),
    ("live", "external"),
];

fn normalize_alias(value: &str, table: &[(&str, &str)]) -> String {
    let trimmed = value.trim().to_ascii_lowercase();
    table
        .iter()
        .find(|(old, _)| *old == trimmed)
        .map(|(_, current)| (*current).to_string())
        .unwrap_or(trimmed)
}

impl std::str::FromStr for ActionRoute {
    type Err = UnknownRoute;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_alias(value, ACTION_ALIASES).as_str() {
            "web" => Ok(Self::Web),
            "media" => Ok(Self::Media),
            "travel" => Ok(Self::Travel),
            "data" => Ok(Self::Data),
            _ => Err(UnknownRoute {
                value: value.to_string(),
                expected: "web|media|travel|data",
            }),
        }
    }
}

impl std::str::FromStr for KnowledgeRoute {
    type Err = UnknownRoute;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match normalize_alias(value, KNOWLEDGE_ALIASES).as_str() {
            "docs" => Ok(Self::Docs),
            "internal" => Ok(Self::Internal),
            "external" => Ok(Self::External),
            _ => Err(UnknownRoute {
                value: value.to_string(),
                expected: "docs|internal|external",
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ActionRoute, KnowledgeRoute, RouteKind};

    #[test]
    fn historical_aliases_resolve_to_current_members() {
        assert_eq!("google".parse::<ActionRoute>().expect("alias"), ActionRoute::Web);
        assert_eq!("weather".parse::<ActionRoute>().expect("alias"), ActionRoute::Travel);
        assert_eq!("stats".parse::<ActionRoute>().expect("alias"), ActionRoute::Data);
        assert_eq!("documents".parse::<KnowledgeRoute>().expect("alias"), KnowledgeRoute::Docs);
        assert_eq!("realtime".parse::<KnowledgeRoute>().expect("alias"), KnowledgeRoute::External);
    }

    #[test]
    fn current_members_parse_case_insensitively() {
        assert_eq!(" Media ".parse::<ActionRoute>().expect("member"), ActionRoute::Media);
        assert_eq!("INTERNAL".parse::<KnowledgeRoute>().expect("member"), KnowledgeRoute::Internal);
    }

    #[test]
    fn unknown_values_are_rejected() {
        let error = "teleport".parse::<ActionRoute>().expect_err("unknown");
        assert_eq!(error.value, "teleport");
    }

    #[test]
    fn reply_tokens_match_by_substring() {
        assert_eq!(
            ActionRoute::from_reply_token("The best route here is TRAVEL, clearly."),
            Some(ActionRoute::Travel)
        );
        assert_eq!(
            KnowledgeRoute::from_reply_token("route: external (live sources)"),
            Some(KnowledgeRoute::External)
        );
        assert_eq!(ActionRoute::from_reply_token("no idea"), None);
    }
}
