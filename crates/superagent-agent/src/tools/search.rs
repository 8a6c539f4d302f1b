//! Web search tool.
//!
//! Brave, Serper and Tavily need an API key; DuckDuckGo's instant answer API
//! works without one but returns fewer results.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use superagent_config::{SearchProviderKind, SearchToolConfig, secrets};
use superagent_types::ToolResult;

use crate::error::{AgentError, Result};
use crate::tool::{Tool, ToolContext, WebSearchParams};

/// A search backend with its credentials resolved.
#[derive(Clone)]
pub enum SearchProvider {
    Brave { api_key: String },
    Serper { api_key: String },
    Tavily { api_key: String },
    DuckDuckGo,
    /// A keyed provider was selected but no key was found.
    MissingKey { kind: SearchProviderKind },
}

impl SearchProvider {
    /// Resolve the configured provider, reading its key from the environment
    /// first and the config file second.
    pub fn from_config(config: &SearchToolConfig) -> Self {
        let kind = config.provider;
        let key = secrets::resolve_secret(kind.env_var(), config.api_key.as_deref())
            .map(|s| s.value);

        match (kind, key) {
            (SearchProviderKind::DuckDuckGo, _) => Self::DuckDuckGo,
            (SearchProviderKind::Brave, Some(api_key)) => Self::Brave { api_key },
            (SearchProviderKind::Serper, Some(api_key)) => Self::Serper { api_key },
            (SearchProviderKind::Tavily, Some(api_key)) => Self::Tavily { api_key },
            (kind, None) => Self::MissingKey { kind },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Brave { .. } => "brave",
            Self::Serper { .. } => "serper",
            Self::Tavily { .. } => "tavily",
            Self::DuckDuckGo => "duckduckgo",
            Self::MissingKey { .. } => "unconfigured",
        }
    }
}

impl std::fmt::Debug for SearchProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingKey { kind } => f.debug_struct("MissingKey").field("kind", kind).finish(),
            other => f.write_str(other.name()),
        }
    }
}

/// A single search result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// Tool for searching the web.
#[derive(Debug, Clone)]
pub struct WebSearchTool {
    client: Client,
    provider: SearchProvider,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(client: Client, provider: SearchProvider, max_results: usize) -> Self {
        Self {
            client,
            provider,
            max_results: max_results.max(1),
        }
    }

    pub fn provider(&self) -> &SearchProvider {
        &self.provider
    }

    async fn fetch_json(&self, request: reqwest::RequestBuilder, label: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| AgentError::tool(format!("{label} search failed: {e}")))?;

        if !response.status().is_success() {
            return Err(AgentError::tool(format!(
                "{label} search error: {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AgentError::tool(format!("Failed to parse {label} response: {e}")))
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>> {
        match &self.provider {
            SearchProvider::Brave { api_key } => {
                let url = format!(
                    "https://api.search.brave.com/res/v1/web/search?q={}&count={limit}",
                    urlencoding::encode(query)
                );
                let request = self
                    .client
                    .get(url)
                    .header("X-Subscription-Token", api_key)
                    .header("Accept", "application/json");
                Ok(parse_brave(&self.fetch_json(request, "Brave").await?))
            }
            SearchProvider::Serper { api_key } => {
                let request = self
                    .client
                    .post("https://google.serper.dev/search")
                    .header("X-API-KEY", api_key)
                    .json(&json!({ "q": query, "num": limit }));
                Ok(parse_serper(&self.fetch_json(request, "Serper").await?))
            }
            SearchProvider::Tavily { api_key } => {
                let request = self.client.post("https://api.tavily.com/search").json(&json!({
                    "api_key": api_key,
                    "query": query,
                    "max_results": limit
                }));
                Ok(parse_tavily(&self.fetch_json(request, "Tavily").await?))
            }
            SearchProvider::DuckDuckGo => {
                let url = format!(
                    "https://api.duckduckgo.com/?q={}&format=json&no_html=1&skip_disambig=1",
                    urlencoding::encode(query)
                );
                let request = self.client.get(url);
                Ok(parse_duckduckgo(&self.fetch_json(request, "DuckDuckGo").await?, limit))
            }
            SearchProvider::MissingKey { kind } => Err(AgentError::tool(format!(
                "web search provider {kind:?} needs an API key: set {} or [tools.search].api_key",
                kind.env_var().unwrap_or("the provider's key")
            ))),
        }
    }
}

fn collect_results(items: Option<&Vec<Value>>, url_field: &str, snippet_field: &str) -> Vec<SearchResult> {
    items
        .map(|arr| {
            arr.iter()
                .filter_map(|r| {
                    Some(SearchResult {
                        title: r["title"].as_str()?.to_string(),
                        url: r[url_field].as_str()?.to_string(),
                        snippet: r[snippet_field].as_str().unwrap_or("").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn parse_brave(data: &Value) -> Vec<SearchResult> {
    collect_results(data["web"]["results"].as_array(), "url", "description")
}

fn parse_serper(data: &Value) -> Vec<SearchResult> {
    collect_results(data["organic"].as_array(), "link", "snippet")
}

fn parse_tavily(data: &Value) -> Vec<SearchResult> {
    collect_results(data["results"].as_array(), "url", "content")
}

fn parse_duckduckgo(data: &Value, limit: usize) -> Vec<SearchResult> {
    let mut results = Vec::new();

    if let Some(text) = data["AbstractText"].as_str().filter(|t| !t.is_empty()) {
        results.push(SearchResult {
            title: data["Heading"].as_str().unwrap_or("Result").to_string(),
            url: data["AbstractURL"].as_str().unwrap_or("").to_string(),
            snippet: text.to_string(),
        });
    }

    if let Some(topics) = data["RelatedTopics"].as_array() {
        for topic in topics {
            if results.len() >= limit {
                break;
            }
            if let (Some(text), Some(url)) = (topic["Text"].as_str(), topic["FirstURL"].as_str()) {
                let mut title: String = text.chars().take(50).collect();
                if title.len() < text.len() {
                    title.push_str("...");
                }
                results.push(SearchResult {
                    title,
                    url: url.to_string(),
                    snippet: text.to_string(),
                });
            }
        }
    }

    results
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web for information. Returns a list of relevant results with titles, URLs, and snippets."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The search query"
                },
                "max_results": {
                    "type": "integer",
                    "description": "Maximum number of results (1-20)"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let params = WebSearchParams::try_from(params)?;
        let limit = params.max_results.unwrap_or(self.max_results);
        let mut results = self.search(&params.query, limit).await?;
        results.truncate(limit);

        tracing::debug!(
            provider = self.provider.name(),
            count = results.len(),
            "Web search complete"
        );

        Ok(ToolResult::data(json!({
            "query": params.query,
            "provider": self.provider.name(),
            "results": results,
        })))
    }
}
