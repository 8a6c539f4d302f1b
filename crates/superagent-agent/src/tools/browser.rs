//! Browser tool: open a page and return its readable text.
//!
//! When a Chromium-family executable is available the page is rendered by
//! the browser (`--dump-dom`) through the sandboxed executor, so scripts run
//! and the process group is killed on deadline or cancellation. Without one,
//! or when the browser fails to start, the page is fetched over plain HTTP.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde_json::{Value, json};
use superagent_sandbox::{Operation, SandboxExecutor};
use superagent_types::{ToolErrorKind, ToolResult};
use url::Url;

use crate::error::{AgentError, Result};
use crate::tool::{BrowserParams, Tool, ToolContext};

/// Executables tried, in order, when none is configured.
const BROWSER_CANDIDATES: &[&str] = &[
    "chromium",
    "chromium-browser",
    "google-chrome",
    "google-chrome-stable",
];

/// Find a browser on `PATH`.
pub fn discover_browser() -> Option<PathBuf> {
    BROWSER_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
}

/// Text extracted from an HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageContent {
    pub title: Option<String>,
    pub description: Option<String>,
    pub text: String,
}

impl PageContent {
    /// Extract title, meta description and readable text.
    ///
    /// Prefers main content containers and falls back to `<body>`. Text
    /// inside `script`, `style`, `noscript` and `template` is skipped.
    pub fn from_html(html: &str) -> Self {
        let document = Html::parse_document(html);

        let title = select_first(&document, "title")
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty());
        let description = select_first(&document, "meta[name='description']")
            .and_then(|el| el.value().attr("content"))
            .map(|s| s.trim().to_string());

        let mut parts = Vec::new();
        for selector in ["article", "main", "[role='main']", "#content", ".content"] {
            if let Ok(selector) = Selector::parse(selector) {
                parts.extend(
                    document
                        .select(&selector)
                        .map(visible_text)
                        .filter(|t| !t.trim().is_empty()),
                );
            }
            if !parts.is_empty() {
                break;
            }
        }
        if parts.is_empty() {
            parts.extend(select_first(&document, "body").map(visible_text));
        }

        let text = parts
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        Self {
            title,
            description,
            text,
        }
    }
}

fn select_first<'a>(document: &'a Html, selector: &str) -> Option<ElementRef<'a>> {
    let selector = Selector::parse(selector).ok()?;
    document.select(&selector).next()
}

fn visible_text(element: ElementRef<'_>) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|ancestor| {
            ancestor.value().as_element().is_some_and(|el| {
                matches!(el.name(), "script" | "style" | "noscript" | "template")
            })
        });
        if !hidden {
            parts.push(text);
        }
    }
    parts.join(" ")
}

/// Keep at most `max_chars` characters. Returns whether anything was cut.
fn truncate_chars(text: &mut String, max_chars: usize) -> bool {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => {
            text.truncate(byte_index);
            true
        }
        None => false,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Browser Tool
// ─────────────────────────────────────────────────────────────────────────────

/// Opens web pages for the agent.
#[derive(Debug, Clone)]
pub struct BrowserTool {
    client: Client,
    executor: Arc<SandboxExecutor>,
    executable: Option<PathBuf>,
    headless: bool,
    max_chars: usize,
}

enum Rendered {
    Html { html: String, final_url: Url, engine: &'static str },
    Text { text: String, final_url: Url },
}

enum RenderOutcome {
    Rendered(Rendered),
    /// Deadline or cancellation stopped the browser; report as-is.
    Interrupted(ToolResult),
    /// No browser, or it failed to run.
    Unavailable,
}

impl BrowserTool {
    pub fn new(client: Client, executor: Arc<SandboxExecutor>, max_chars: usize) -> Self {
        Self {
            client,
            executor,
            executable: None,
            headless: true,
            max_chars,
        }
    }

    /// Render with this browser executable instead of fetching over HTTP.
    pub fn with_executable(mut self, executable: Option<PathBuf>) -> Self {
        self.executable = executable;
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.headless = headless;
        self
    }

    pub fn headless(&self) -> bool {
        self.headless
    }

    fn browser_args(&self, url: &Url) -> Vec<String> {
        let mut args = Vec::new();
        if self.headless {
            args.push("--headless=new".to_string());
        }
        args.extend(
            [
                "--disable-gpu",
                "--no-sandbox",
                "--no-first-run",
                "--disable-dev-shm-usage",
                "--dump-dom",
            ]
            .map(String::from),
        );
        args.push(url.to_string());
        args
    }

    async fn render(&self, url: &Url, ctx: &ToolContext) -> RenderOutcome {
        let Some(executable) = &self.executable else {
            return RenderOutcome::Unavailable;
        };

        let operation = Operation::command(executable.to_string_lossy(), self.browser_args(url));
        let result = self
            .executor
            .execute(&operation, ctx.deadline, &ctx.cancellation)
            .await;

        match result.error_kind() {
            None => {
                let html = result
                    .data_value()
                    .and_then(|v| v["stdout"].as_str())
                    .unwrap_or_default()
                    .to_string();
                RenderOutcome::Rendered(Rendered::Html {
                    html,
                    final_url: url.clone(),
                    engine: "chromium",
                })
            }
            Some(ToolErrorKind::Timeout | ToolErrorKind::Cancelled) => {
                RenderOutcome::Interrupted(result)
            }
            Some(kind) => {
                tracing::warn!(
                    %kind,
                    error = %result.to_observation(),
                    "Browser render failed, falling back to HTTP fetch"
                );
                RenderOutcome::Unavailable
            }
        }
    }

    async fn fetch(&self, url: &Url) -> Result<Rendered> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| AgentError::tool(format!("Failed to fetch {url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::tool(format!("HTTP {status} fetching {url}")));
        }

        let final_url = response.url().clone();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_none_or(|ct| ct.contains("html"));
        let body = response
            .text()
            .await
            .map_err(|e| AgentError::tool(format!("Failed to read response body: {e}")))?;

        Ok(if is_html {
            Rendered::Html {
                html: body,
                final_url,
                engine: "http",
            }
        } else {
            Rendered::Text {
                text: body,
                final_url,
            }
        })
    }

    fn page_result(&self, rendered: Rendered, max_chars: usize) -> ToolResult {
        let (page, final_url, engine) = match rendered {
            Rendered::Html {
                html,
                final_url,
                engine,
            } => (PageContent::from_html(&html), final_url, engine),
            Rendered::Text { text, final_url } => (
                PageContent {
                    text,
                    ..Default::default()
                },
                final_url,
                "http",
            ),
        };

        let mut text = page.text;
        let truncated = truncate_chars(&mut text, max_chars);

        ToolResult::data(json!({
            "url": final_url.as_str(),
            "title": page.title,
            "description": page.description,
            "text": text,
            "truncated": truncated,
            "rendered_with": engine,
        }))
    }
}

#[async_trait]
impl Tool for BrowserTool {
    fn name(&self) -> &str {
        "browser"
    }

    fn description(&self) -> &str {
        "Open a web page in a browser and return its title and readable text."
    }

    fn parameters(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "Absolute http(s) URL to open"
                },
                "max_chars": {
                    "type": "integer",
                    "description": "Maximum characters of page text to return"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, params: Value, ctx: &ToolContext) -> Result<ToolResult> {
        if ctx.is_cancelled() {
            return Err(AgentError::Cancelled);
        }

        let params = BrowserParams::try_from(params)?;
        let max_chars = params.max_chars.unwrap_or(self.max_chars).min(self.max_chars);

        let rendered = match self.render(&params.url, ctx).await {
            RenderOutcome::Rendered(rendered) => rendered,
            RenderOutcome::Interrupted(result) => return Ok(result),
            RenderOutcome::Unavailable => self.fetch(&params.url).await?,
        };

        Ok(self.page_result(rendered, max_chars))
    }
}
