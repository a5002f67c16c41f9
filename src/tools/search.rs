//! 级联网页搜索
//!
//! 引擎按优先级依次尝试：首个非空成功结果胜出，错误或空结果则落到下一个引擎。
//! 全部失败时返回恰好一条合成的兜底结果（source = "System"）。
//! 成功结果按 link 去重并截断到 5 条。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use crate::config::SearchSection;

/// 单次搜索返回的最大条数
pub const MAX_RESULTS: usize = 5;

const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, thiserror::Error)]
pub enum SearchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(u16),

    #[error("timed out after {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SearchEngine: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError>;
}

/// DuckDuckGo HTML 端点（无需 API key）
pub struct DuckDuckGoEngine {
    client: Client,
    url: String,
}

impl DuckDuckGoEngine {
    pub fn new(client: Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl SearchEngine for DuckDuckGoEngine {
    fn name(&self) -> &'static str {
        "duckduckgo"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let resp = self
            .client
            .get(&self.url)
            .query(&[("q", query)])
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .header(reqwest::header::ACCEPT, "text/html,application/xhtml+xml")
            .header(reqwest::header::ACCEPT_LANGUAGE, "en-US,en;q=0.9")
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }
        let html = resp.text().await?;
        Ok(parse_duckduckgo_html(&html))
    }
}

/// 解析 DuckDuckGo 结果页：`.result` 块内的 `.result__a`（标题 + 链接）与 `.result__snippet`
pub fn parse_duckduckgo_html(html: &str) -> Vec<SearchResult> {
    let (Ok(result_sel), Ok(link_sel), Ok(snippet_sel)) = (
        Selector::parse(".result"),
        Selector::parse(".result__a"),
        Selector::parse(".result__snippet"),
    ) else {
        return Vec::new();
    };

    let document = Html::parse_document(html);
    let mut results = Vec::new();
    for element in document.select(&result_sel) {
        if results.len() >= MAX_RESULTS {
            break;
        }
        let Some(anchor) = element.select(&link_sel).next() else {
            continue;
        };
        let title = anchor.text().collect::<String>().trim().to_string();
        let href = anchor.value().attr("href").unwrap_or("").trim();
        if title.is_empty() || href.is_empty() {
            continue;
        }
        let snippet = element
            .select(&snippet_sel)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
            .unwrap_or_default();

        results.push(SearchResult {
            title,
            link: resolve_duckduckgo_link(href),
            snippet,
            source: "DuckDuckGo".to_string(),
        });
    }
    results
}

/// 结果链接常为跳转地址 `//duckduckgo.com/l/?uddg=<目标>`，取出真实目标
fn resolve_duckduckgo_link(href: &str) -> String {
    let absolute = if href.starts_with("//") {
        format!("https:{}", href)
    } else {
        href.to_string()
    };
    reqwest::Url::parse(&absolute)
        .ok()
        .and_then(|url| {
            url.query_pairs()
                .find(|(k, _)| k == "uddg")
                .map(|(_, v)| v.into_owned())
        })
        .unwrap_or(absolute)
}

/// SearXNG JSON API：依次尝试各实例，首个返回结果的实例胜出
pub struct SearxngEngine {
    client: Client,
    instances: Vec<String>,
    instance_timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct SearxngResponse {
    #[serde(default)]
    results: Vec<SearxngItem>,
}

#[derive(Debug, Deserialize)]
struct SearxngItem {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

impl SearxngEngine {
    pub fn new(client: Client, instances: Vec<String>, instance_timeout: Duration) -> Self {
        Self {
            client,
            instances,
            instance_timeout,
        }
    }

    async fn query_instance(&self, base_url: &str, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        let resp = self
            .client
            .get(base_url)
            .query(&[("q", query), ("format", "json")])
            .header(reqwest::header::USER_AGENT, BROWSER_USER_AGENT)
            .timeout(self.instance_timeout)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(SearchError::Status(resp.status().as_u16()));
        }
        let data: SearxngResponse = resp.json().await?;
        Ok(data
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .take(MAX_RESULTS)
            .map(|r| SearchResult {
                title: r.title,
                link: r.url,
                snippet: r.content,
                source: "SearXNG".to_string(),
            })
            .collect())
    }
}

#[async_trait]
impl SearchEngine for SearxngEngine {
    fn name(&self) -> &'static str {
        "searxng"
    }

    async fn search(&self, query: &str) -> Result<Vec<SearchResult>, SearchError> {
        for instance in &self.instances {
            match self.query_instance(instance, query).await {
                Ok(results) if !results.is_empty() => return Ok(results),
                Ok(_) => tracing::debug!(instance = %instance, "searxng instance returned no results"),
                Err(e) => tracing::debug!(instance = %instance, error = %e, "searxng instance failed"),
            }
        }
        Ok(Vec::new())
    }
}

struct EngineSlot {
    engine: Arc<dyn SearchEngine>,
    timeout: Option<Duration>,
}

/// 级联搜索服务
pub struct WebSearchService {
    engines: Vec<EngineSlot>,
}

impl WebSearchService {
    pub fn new() -> Self {
        Self { engines: Vec::new() }
    }

    /// 追加一个引擎（按追加顺序决定优先级）；timeout 为 None 时不限时
    pub fn with_engine(mut self, engine: Arc<dyn SearchEngine>, timeout: Option<Duration>) -> Self {
        self.engines.push(EngineSlot { engine, timeout });
        self
    }

    /// DuckDuckGo 为主引擎，SearXNG 为受时限约束的备用引擎
    pub fn from_config(client: Client, config: &SearchSection) -> Self {
        Self::new()
            .with_engine(
                Arc::new(DuckDuckGoEngine::new(client.clone(), config.duckduckgo_url.clone())),
                config.primary_timeout_secs.map(Duration::from_secs),
            )
            .with_engine(
                Arc::new(SearxngEngine::new(
                    client,
                    config.searxng_instances.clone(),
                    Duration::from_secs(config.instance_timeout_secs),
                )),
                Some(Duration::from_secs(config.fallback_timeout_secs)),
            )
    }

    pub async fn search(&self, query: &str) -> Vec<SearchResult> {
        tracing::info!(query, "web search");
        for slot in &self.engines {
            let name = slot.engine.name();
            let outcome = match slot.timeout {
                Some(limit) => tokio::time::timeout(limit, slot.engine.search(query))
                    .await
                    .unwrap_or(Err(SearchError::Timeout(limit))),
                None => slot.engine.search(query).await,
            };
            match outcome {
                Ok(results) if !results.is_empty() => {
                    tracing::info!(engine = name, count = results.len(), "search engine succeeded");
                    return dedupe(results);
                }
                Ok(_) => tracing::info!(engine = name, "search engine returned no results"),
                Err(e) => tracing::warn!(engine = name, error = %e, "search engine failed"),
            }
        }
        tracing::warn!(query, "all search engines failed, returning fallback");
        vec![fallback_result(query)]
    }
}

impl Default for WebSearchService {
    fn default() -> Self {
        Self::new()
    }
}

/// 按 link 去重（保留首次出现），截断到 MAX_RESULTS
fn dedupe(results: Vec<SearchResult>) -> Vec<SearchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| seen.insert(r.link.clone()))
        .take(MAX_RESULTS)
        .collect()
}

fn fallback_result(query: &str) -> SearchResult {
    SearchResult {
        title: format!("Search: {}", query),
        link: "https://duckduckgo.com".to_string(),
        snippet: "Real-time results could not be retrieved. Please check your internet connection."
            .to_string(),
        source: "System".to_string(),
    }
}
