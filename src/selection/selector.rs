//! Ranked, capped tool selection over cached server catalogues.

use super::{
    QueryCache, QueryProfile, ScoredTool, ScoringWeights, SelectionContext, SelectionOptions,
    ServerProfile, score_tool,
};
use crate::server_registry::{
    domain::ServerState,
    services::{ServerRegistry, ServerRegistryResult, Subscription},
};
use mockable::Clock;
use std::sync::Arc;
use tracing::debug;

/// Selects the most relevant tools for `context` using default weights.
///
/// Only enabled servers whose status is not `error` contribute, and only
/// through their cached tools. Selection never triggers a connection.
#[must_use]
pub fn select_tools_for_prompt<'a>(
    servers: impl IntoIterator<Item = &'a ServerState>,
    context: &SelectionContext,
    options: &SelectionOptions,
) -> Vec<ScoredTool> {
    select_tools_with_weights(servers, context, options, &ScoringWeights::default())
}

/// Selects the most relevant tools for `context` with explicit weights.
#[must_use]
pub fn select_tools_with_weights<'a>(
    servers: impl IntoIterator<Item = &'a ServerState>,
    context: &SelectionContext,
    options: &SelectionOptions,
    weights: &ScoringWeights,
) -> Vec<ScoredTool> {
    let profile = QueryProfile::from_context(context);
    let query = &profile;

    let scored: Vec<ScoredTool> = servers
        .into_iter()
        .filter(|state| state.is_selectable())
        .flat_map(|state| {
            let server = ServerProfile::from(state.config());
            state
                .tools()
                .unwrap_or_default()
                .iter()
                .map(move |tool| score_tool(tool, server, query, weights))
        })
        .collect();

    filter_and_sort_tools(scored, options.min_score, options.max_tools)
}

/// Keeps tools scoring at least `min_score`, sorts them by descending score
/// and truncates to `max_tools`.
///
/// The sort is stable, so ties keep their scoring order.
#[must_use]
pub fn filter_and_sort_tools(
    tools: Vec<ScoredTool>,
    min_score: f64,
    max_tools: usize,
) -> Vec<ScoredTool> {
    let mut kept: Vec<ScoredTool> = tools
        .into_iter()
        .filter(|scored| scored.score >= min_score)
        .collect();
    kept.sort_by(|left, right| right.score.total_cmp(&left.score));
    kept.truncate(max_tools);
    kept
}

/// Tool selector with configurable weights and an optional result cache.
#[derive(Debug, Clone, Default)]
pub struct ToolSelector {
    weights: ScoringWeights,
    options: SelectionOptions,
    cache: Option<Arc<QueryCache<Vec<ScoredTool>>>>,
}

impl ToolSelector {
    /// Creates a selector without a cache.
    #[must_use]
    pub const fn new(weights: ScoringWeights, options: SelectionOptions) -> Self {
        Self {
            weights,
            options,
            cache: None,
        }
    }

    /// Attaches a result cache.
    #[must_use]
    pub fn with_cache(mut self, cache: QueryCache<Vec<ScoredTool>>) -> Self {
        self.cache = Some(Arc::new(cache));
        self
    }

    /// Returns the attached cache, if any.
    #[must_use]
    pub fn cache(&self) -> Option<&QueryCache<Vec<ScoredTool>>> {
        self.cache.as_deref()
    }

    /// Returns the default options.
    #[must_use]
    pub const fn options(&self) -> &SelectionOptions {
        &self.options
    }

    /// Selects tools from `servers` using the selector's default options.
    #[must_use]
    pub fn select<'a>(
        &self,
        servers: impl IntoIterator<Item = &'a ServerState>,
        context: &SelectionContext,
    ) -> Vec<ScoredTool> {
        self.select_with_options(servers, context, &self.options)
    }

    /// Selects tools from `servers` with explicit options.
    ///
    /// Cached results are keyed on the full context and options.
    #[must_use]
    pub fn select_with_options<'a>(
        &self,
        servers: impl IntoIterator<Item = &'a ServerState>,
        context: &SelectionContext,
        options: &SelectionOptions,
    ) -> Vec<ScoredTool> {
        let Some(cache) = &self.cache else {
            return select_tools_with_weights(servers, context, options, &self.weights);
        };

        let key = cache_key(context, options);
        if let Some(cached) = cache.get(&key) {
            debug!(prompt = context.prompt(), "selection served from cache");
            return cached;
        }

        let selected = select_tools_with_weights(servers, context, options, &self.weights);
        cache.insert(key, selected.clone());
        selected
    }

    /// Selects tools from a registry snapshot.
    ///
    /// # Errors
    ///
    /// Returns registry errors when the snapshot cannot be taken.
    pub fn select_from_registry<C>(
        &self,
        registry: &ServerRegistry<C>,
        context: &SelectionContext,
    ) -> ServerRegistryResult<Vec<ScoredTool>>
    where
        C: Clock + Send + Sync + 'static,
    {
        let snapshot = registry.list()?;
        Ok(self.select(&snapshot, context))
    }

    /// Clears the cache whenever `registry` reports a change.
    ///
    /// Returns `None` when the selector has no cache.
    ///
    /// # Errors
    ///
    /// Returns registry errors when the subscription cannot be registered.
    pub fn watch_registry<C>(
        &self,
        registry: &ServerRegistry<C>,
    ) -> ServerRegistryResult<Option<Subscription>>
    where
        C: Clock + Send + Sync + 'static,
    {
        let Some(cache) = self.cache.clone() else {
            return Ok(None);
        };

        let subscription = registry.subscribe(move |event| {
            debug!(event = event.name(), "clearing selection cache");
            cache.clear();
        })?;
        Ok(Some(subscription))
    }
}

fn cache_key(context: &SelectionContext, options: &SelectionOptions) -> String {
    let mut key = context.prompt().to_owned();
    for part in [context.current_file(), context.user_intent()] {
        key.push('\u{1f}');
        key.push_str(part.unwrap_or_default());
    }
    for domains in [context.include_domains(), context.exclude_domains()] {
        key.push('\u{1f}');
        for domain in domains {
            key.push_str(domain.as_str());
            key.push(',');
        }
    }
    key.push('\u{1f}');
    key.push_str(&format!("{}:{}", options.max_tools, options.min_score));
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server_registry::domain::{ServerId, ToolDefinition};
    use rstest::rstest;
    use serde_json::json;

    fn scored(name: &str, score: f64) -> ScoredTool {
        ScoredTool {
            tool: ToolDefinition::new(name, json!({})).expect("valid tool"),
            server_id: ServerId::new("srv").expect("valid id"),
            score,
            reasons: Vec::new(),
        }
    }

    fn names(tools: &[ScoredTool]) -> Vec<&str> {
        tools.iter().map(|scored| scored.tool.name()).collect()
    }

    #[rstest]
    #[case(0.1, 10, vec!["b", "c", "a"])]
    #[case(0.4, 10, vec!["b", "c"])]
    #[case(0.1, 1, vec!["b"])]
    #[case(0.95, 10, vec![])]
    fn filter_and_sort_respects_threshold_and_cap(
        #[case] min_score: f64,
        #[case] max_tools: usize,
        #[case] expected: Vec<&str>,
    ) {
        let tools = vec![
            scored("a", 0.2),
            scored("b", 0.9),
            scored("c", 0.5),
            scored("d", 0.05),
        ];

        let kept = filter_and_sort_tools(tools, min_score, max_tools);

        assert_eq!(names(&kept), expected);
    }

    #[test]
    fn ties_keep_scoring_order() {
        let tools = vec![scored("first", 0.5), scored("second", 0.5), scored("top", 0.7)];

        let kept = filter_and_sort_tools(tools, 0.1, 10);

        assert_eq!(names(&kept), vec!["top", "first", "second"]);
    }

    #[test]
    fn cache_key_distinguishes_options() {
        let context = SelectionContext::new("read file");
        let defaults = SelectionOptions::default();

        assert_ne!(
            cache_key(&context, &defaults),
            cache_key(&context, &defaults.with_max_tools(3))
        );
    }
}
