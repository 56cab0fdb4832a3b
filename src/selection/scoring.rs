//! Relevance scoring of a single tool against a query.
//!
//! The score is additive across independent signals, each capped on its own,
//! and the total is clamped to `[0, max_score]`. An excluded server domain
//! vetoes the tool regardless of every other signal.

use super::{
    SelectionContext, ServerDomain, domain_matches, extract_identifier_keywords, extract_keywords,
    infer_domains,
};
use crate::server_registry::domain::{ServerConfig, ServerId, ToolDefinition};
use serde::{Deserialize, Serialize};

/// Reason recorded for a vetoed tool.
pub const EXCLUDED_REASON: &str = "excluded";

/// Tunable weights and caps of the scoring signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScoringWeights {
    /// Score contributed per keyword unit.
    pub keyword_unit: f64,
    /// Units for an exact keyword match.
    pub exact_match_units: f64,
    /// Units for a substring match in either direction.
    pub partial_match_units: f64,
    /// Cap on the keyword signal.
    pub keyword_cap: f64,
    /// Domain contribution for the top-ranked inferred domain.
    pub domain_base: f64,
    /// Domain contribution lost per rank position.
    pub domain_rank_decay: f64,
    /// Score per server tag equal to a query keyword.
    pub tag_unit: f64,
    /// Cap on the tag signal.
    pub tag_cap: f64,
    /// Flat boost for an explicitly included domain.
    pub include_boost: f64,
    /// Upper bound of the total score.
    pub max_score: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            keyword_unit: 0.1,
            exact_match_units: 1.0,
            partial_match_units: 0.5,
            keyword_cap: 0.5,
            domain_base: 0.3,
            domain_rank_decay: 0.05,
            tag_unit: 0.1,
            tag_cap: 0.2,
            include_boost: 0.2,
            max_score: 1.0,
        }
    }
}

impl ScoringWeights {
    /// Returns the first weight that is negative or not finite, by its
    /// config name.
    #[must_use]
    pub fn invalid_weight(&self) -> Option<(&'static str, f64)> {
        [
            ("keywordUnit", self.keyword_unit),
            ("exactMatchUnits", self.exact_match_units),
            ("partialMatchUnits", self.partial_match_units),
            ("keywordCap", self.keyword_cap),
            ("domainBase", self.domain_base),
            ("domainRankDecay", self.domain_rank_decay),
            ("tagUnit", self.tag_unit),
            ("tagCap", self.tag_cap),
            ("includeBoost", self.include_boost),
            ("maxScore", self.max_score),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite() || *value < 0.0)
    }
}

/// Keywords and domains derived once per selection request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryProfile {
    keywords: Vec<String>,
    inferred_domains: Vec<ServerDomain>,
    include_domains: Vec<ServerDomain>,
    exclude_domains: Vec<ServerDomain>,
}

impl QueryProfile {
    /// Builds the profile for `context`.
    ///
    /// Keywords come from the prompt, then the current file, then the user
    /// intent. Domains are inferred once from the combined list.
    #[must_use]
    pub fn from_context(context: &SelectionContext) -> Self {
        let mut keywords = extract_keywords(context.prompt());
        if let Some(current_file) = context.current_file() {
            keywords.extend(extract_keywords(current_file));
        }
        if let Some(user_intent) = context.user_intent() {
            keywords.extend(extract_keywords(user_intent));
        }

        let inferred_domains = infer_domains(&keywords);
        Self {
            keywords,
            inferred_domains,
            include_domains: context.include_domains().to_vec(),
            exclude_domains: context.exclude_domains().to_vec(),
        }
    }

    /// Returns the query keywords.
    #[must_use]
    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// Returns the inferred domain ranking.
    #[must_use]
    pub fn inferred_domains(&self) -> &[ServerDomain] {
        &self.inferred_domains
    }
}

/// Server attributes the scorer needs.
#[derive(Debug, Clone, Copy)]
pub struct ServerProfile<'a> {
    /// Owning server.
    pub id: &'a ServerId,
    /// Declared domain.
    pub domain: Option<ServerDomain>,
    /// Free-form tags.
    pub tags: &'a [String],
}

impl<'a> From<&'a ServerConfig> for ServerProfile<'a> {
    fn from(config: &'a ServerConfig) -> Self {
        Self {
            id: config.id(),
            domain: config.domain(),
            tags: config.tags(),
        }
    }
}

/// Tool with its relevance score and match explanation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredTool {
    /// Scored tool.
    pub tool: ToolDefinition,
    /// Owning server.
    pub server_id: ServerId,
    /// Score in `[0, 1]` with default weights.
    pub score: f64,
    /// Human-readable match reasons; not used for ranking.
    pub reasons: Vec<String>,
}

/// Extracts the distinct keywords of a tool from its name, title and
/// description.
#[must_use]
pub fn tool_keywords(tool: &ToolDefinition) -> Vec<String> {
    let mut keywords = extract_identifier_keywords(tool.name());
    if let Some(title) = tool.title() {
        keywords.extend(extract_keywords(title));
    }
    if let Some(description) = tool.description() {
        keywords.extend(extract_keywords(description));
    }

    let mut distinct: Vec<String> = Vec::with_capacity(keywords.len());
    for keyword in keywords {
        if !distinct.contains(&keyword) {
            distinct.push(keyword);
        }
    }
    distinct
}

/// Scores `tool` served by `server` against `query`.
///
/// The function is pure; scoring one tool never affects another.
#[must_use]
pub fn score_tool(
    tool: &ToolDefinition,
    server: ServerProfile<'_>,
    query: &QueryProfile,
    weights: &ScoringWeights,
) -> ScoredTool {
    let mut score: f64 = 0.0;
    let mut reasons = Vec::new();

    let keyword_score = keyword_signal(&tool_keywords(tool), &query.keywords, weights);
    if keyword_score > 0.0 {
        score += keyword_score;
        reasons.push(format!("keyword match (+{keyword_score:.2})"));
    }

    if let (Some(domain), Some(rank)) = (
        server.domain,
        domain_matches(server.domain, &query.inferred_domains).rank(),
    ) {
        let domain_score = domain_signal(rank, weights);
        if domain_score > 0.0 {
            score += domain_score;
            reasons.push(format!("domain {domain} ranked {} (+{domain_score:.2})", rank + 1));
        }
    }

    let (tag_score, matched_tags) = tag_signal(server.tags, &query.keywords, weights);
    if tag_score > 0.0 {
        score += tag_score;
        reasons.push(format!("tags {} (+{tag_score:.2})", matched_tags.join(", ")));
    }

    if let Some(domain) = server.domain
        && query.include_domains.contains(&domain)
    {
        score += weights.include_boost;
        reasons.push(format!("included domain {domain} (+{:.2})", weights.include_boost));
    }

    // Must not panic on a negative or NaN ceiling.
    let upper = weights.max_score.max(0.0);
    let mut clamped = score.max(0.0).min(upper);

    if server
        .domain
        .is_some_and(|domain| query.exclude_domains.contains(&domain))
    {
        clamped = 0.0;
        reasons = vec![EXCLUDED_REASON.to_owned()];
    }

    ScoredTool {
        tool: tool.clone(),
        server_id: server.id.clone(),
        score: clamped,
        reasons,
    }
}

fn keyword_signal(
    tool_words: &[String],
    query_keywords: &[String],
    weights: &ScoringWeights,
) -> f64 {
    let mut units: f64 = 0.0;
    for query_keyword in query_keywords {
        for tool_keyword in tool_words {
            if query_keyword == tool_keyword {
                units += weights.exact_match_units;
            } else if query_keyword.contains(tool_keyword.as_str())
                || tool_keyword.contains(query_keyword.as_str())
            {
                units += weights.partial_match_units;
            }
        }
    }
    (units * weights.keyword_unit).min(weights.keyword_cap)
}

fn domain_signal(rank: usize, weights: &ScoringWeights) -> f64 {
    let rank_steps = f64::from(u32::try_from(rank).unwrap_or(u32::MAX));
    (weights.domain_rank_decay.mul_add(-rank_steps, weights.domain_base)).max(0.0)
}

fn tag_signal(
    tags: &[String],
    query_keywords: &[String],
    weights: &ScoringWeights,
) -> (f64, Vec<String>) {
    let matched: Vec<String> = tags
        .iter()
        .filter(|tag| {
            query_keywords
                .iter()
                .any(|keyword| keyword.eq_ignore_ascii_case(tag))
        })
        .cloned()
        .collect();

    let mut score: f64 = 0.0;
    for _ in &matched {
        score += weights.tag_unit;
    }
    (score.min(weights.tag_cap), matched)
}
