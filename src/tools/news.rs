//! 新闻查询（NewsAPI）
//!
//! 有查询词时走 `everything?q=`，无查询词或查询词为 `general` 时走美国头条。

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::NewsSection;
use crate::core::GatewayError;

const BACKEND: &str = "newsapi";
const MAX_ARTICLES: usize = 5;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NewsResult {
    pub title: String,
    pub description: Option<String>,
    pub url: String,
    pub image: Option<String>,
    pub source: String,
    pub published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsApiResponse {
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Article {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: String,
    #[serde(default)]
    url_to_image: Option<String>,
    #[serde(default)]
    source: Option<ArticleSource>,
    #[serde(default)]
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleSource {
    #[serde(default)]
    name: Option<String>,
}

pub struct NewsService {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl NewsService {
    pub fn new(client: Client, config: &NewsSection) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        }
    }

    pub async fn headlines(&self, query: Option<&str>) -> Result<Vec<NewsResult>, GatewayError> {
        let api_key = self
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingCredential {
                backend: BACKEND,
                var: "NEWS_API_KEY",
            })?;

        let topic = query.map(str::trim).filter(|q| !q.is_empty() && *q != "general");
        let builder = match topic {
            Some(q) => self
                .client
                .get(format!("{}/everything", self.base_url))
                .query(&[("q", q)]),
            None => self
                .client
                .get(format!("{}/top-headlines", self.base_url))
                .query(&[("country", "us")]),
        };
        tracing::info!(topic = topic.unwrap_or("top-headlines"), "news lookup");

        let resp = builder
            .header("X-Api-Key", api_key)
            .send()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;
        if !resp.status().is_success() {
            return Err(GatewayError::Upstream {
                backend: BACKEND,
                status: resp.status().as_u16(),
                message: format!("NewsAPI error: {}", resp.status()),
            });
        }
        let data: NewsApiResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;

        Ok(data
            .articles
            .into_iter()
            .take(MAX_ARTICLES)
            .map(|a| NewsResult {
                title: a.title.unwrap_or_default(),
                description: a.description,
                url: a.url,
                image: a.url_to_image,
                source: a.source.and_then(|s| s.name).unwrap_or_default(),
                published_at: a.published_at,
            })
            .collect())
    }
}
