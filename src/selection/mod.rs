//! Relevance-based tool selection.
//!
//! Given a natural-language prompt and the tool catalogues cached for many
//! servers, selection picks a small ranked subset:
//!
//! - [`keywords`] turns text into normalized keywords
//! - [`domains`] infers a ranked list of semantic domains from keywords
//! - [`scoring`] scores one tool against the query
//! - [`selector`] scores the whole pool, filters, sorts and truncates
//! - [`cache`] optionally memoizes results per query
//!
//! Selection is synchronous and side-effect free apart from the optional
//! cache; it only reads catalogues that are already cached.

pub mod cache;
pub mod context;
pub mod domains;
pub mod keywords;
pub mod scoring;
pub mod selector;

pub use cache::{CacheStats, DEFAULT_CACHE_MAX_SIZE, DEFAULT_CACHE_TTL, QueryCache};
pub use context::{DEFAULT_MAX_TOOLS, DEFAULT_MIN_SCORE, SelectionContext, SelectionOptions};
pub use domains::{
    DomainMatch, DomainScore, ParseServerDomainError, ServerDomain, domain_matches,
    infer_domains, score_domains,
};
pub use keywords::{extract_identifier_keywords, extract_keywords, is_stop_word};
pub use scoring::{
    EXCLUDED_REASON, QueryProfile, ScoredTool, ScoringWeights, ServerProfile, score_tool,
    tool_keywords,
};
pub use selector::{
    ToolSelector, filter_and_sort_tools, select_tools_for_prompt, select_tools_with_weights,
};
