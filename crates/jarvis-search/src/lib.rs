//! # JARVIS Search — multi-source web search aggregation
//!
//! Fans a query out to a set of public JSON/Atom APIs concurrently, tolerates
//! individual provider failures, and merges the hits into a deduplicated
//! result list plus a capped context string for the chat model.

pub mod providers;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Per-provider request budget.
pub const PROVIDER_TIMEOUT: Duration = Duration::from_secs(4);
/// Maximum number of merged results returned to callers.
pub const MAX_RESULTS: usize = 50;
/// Maximum length of the model-facing context string, in characters.
pub const MAX_CONTEXT_CHARS: usize = 8000;

#[derive(Error, Debug)]
pub enum SearchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Provider error: {0}")]
    Provider(String),
}

/// One search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Provider that produced the hit.
    pub source: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favicon: Option<String>,
}

/// Merged output of one aggregated search.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResult>,
    /// Flattened result text for prompting, capped at `MAX_CONTEXT_CHARS`.
    pub context: String,
}

/// Concurrent multi-provider searcher.
#[derive(Debug, Clone)]
pub struct SearchAggregator {
    client: reqwest::Client,
}

impl SearchAggregator {
    pub fn new() -> Result<Self, SearchError> {
        let client = reqwest::Client::builder()
            .user_agent("jarvis-search/0.1")
            .timeout(PROVIDER_TIMEOUT)
            .build()?;
        Ok(Self { client })
    }

    /// Query every provider concurrently. A provider that fails or times out
    /// contributes nothing; the search itself cannot fail.
    pub async fn search(&self, query: &str) -> SearchResponse {
        let query = query.trim();
        if query.is_empty() {
            return SearchResponse {
                results: Vec::new(),
                context: String::new(),
            };
        }

        let fetches = providers::all(&self.client, query);
        let outcomes = futures::future::join_all(fetches.into_iter().map(
            |(name, fut)| async move {
                match tokio::time::timeout(PROVIDER_TIMEOUT, fut).await {
                    Ok(Ok(results)) => {
                        debug!("search: {} returned {} results", name, results.len());
                        results
                    }
                    Ok(Err(e)) => {
                        warn!("search: {} failed: {}", name, e);
                        Vec::new()
                    }
                    Err(_) => {
                        warn!("search: {} timed out", name);
                        Vec::new()
                    }
                }
            },
        ))
        .await;

        let mut merged: Vec<SearchResult> =
            outcomes.into_iter().flatten().collect();
        merged.extend(providers::direct_links(query));

        let results = dedup_by_url(merged);
        let results: Vec<SearchResult> = results.into_iter().take(MAX_RESULTS).collect();
        let context = build_context(&results);
        SearchResponse { results, context }
    }
}

/// Keep the first occurrence of each URL, preserving arrival order.
fn dedup_by_url(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| !r.url.is_empty() && seen.insert(r.url.clone()))
        .collect()
}

/// Flatten results into prompt context, capped at `MAX_CONTEXT_CHARS`.
fn build_context(results: &[SearchResult]) -> String {
    let mut context = String::new();
    for result in results {
        let entry = if result.snippet.is_empty() {
            format!("[{}] {} ({})\n", result.source, result.title, result.url)
        } else {
            format!(
                "[{}] {}: {} ({})\n",
                result.source, result.title, result.snippet, result.url
            )
        };
        if context.chars().count() + entry.chars().count() > MAX_CONTEXT_CHARS {
            break;
        }
        context.push_str(&entry);
    }
    context
}
