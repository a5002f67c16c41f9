//! 图片检索（Unsplash search/photos）

use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ImagesSection;
use crate::core::GatewayError;

const BACKEND: &str = "unsplash";

/// 未提供查询词时使用的默认主题
pub const DEFAULT_IMAGE_QUERY: &str = "technology";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    pub id: String,
    pub description: Option<String>,
    pub url: String,
    pub thumb: String,
    pub photographer: String,
    pub link: String,
}

#[derive(Debug, Deserialize)]
struct SearchPhotos {
    #[serde(default)]
    results: Vec<Photo>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    id: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    alt_description: Option<String>,
    urls: PhotoUrls,
    user: PhotoUser,
    links: PhotoLinks,
}

#[derive(Debug, Deserialize)]
struct PhotoUrls {
    regular: String,
    small: String,
}

#[derive(Debug, Deserialize)]
struct PhotoUser {
    name: String,
}

#[derive(Debug, Deserialize)]
struct PhotoLinks {
    html: String,
}

pub struct ImageService {
    client: Client,
    base_url: String,
    access_key: Option<String>,
}

impl ImageService {
    pub fn new(client: Client, config: &ImagesSection) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            access_key: config.access_key.clone(),
        }
    }

    pub async fn search(&self, query: Option<&str>) -> Result<Vec<ImageResult>, GatewayError> {
        let access_key = self
            .access_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or(GatewayError::MissingCredential {
                backend: BACKEND,
                var: "UNSPLASH_ACCESS_KEY",
            })?;
        let query = query
            .map(str::trim)
            .filter(|q| !q.is_empty())
            .unwrap_or(DEFAULT_IMAGE_QUERY);
        tracing::info!(query, "image lookup");

        let resp = self
            .client
            .get(format!("{}/search/photos", self.base_url))
            .query(&[("query", query), ("per_page", "5")])
            .header(reqwest::header::AUTHORIZATION, format!("Client-ID {}", access_key))
            .send()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;
        if !resp.status().is_success() {
            return Err(GatewayError::Upstream {
                backend: BACKEND,
                status: resp.status().as_u16(),
                message: format!("Unsplash API error: {}", resp.status()),
            });
        }
        let data: SearchPhotos = resp
            .json()
            .await
            .map_err(|e| GatewayError::http(BACKEND, e))?;

        Ok(data
            .results
            .into_iter()
            .map(|p| ImageResult {
                id: p.id,
                description: p.description.or(p.alt_description),
                url: p.urls.regular,
                thumb: p.urls.small,
                photographer: p.user.name,
                link: p.links.html,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;

    fn service(base_url: &str, key: Option<&str>) -> ImageService {
        ImageService::new(
            Client::new(),
            &ImagesSection {
                base_url: base_url.to_string(),
                access_key: key.map(String::from),
            },
        )
    }

    #[tokio::test]
    async fn test_missing_key() {
        let err = service("http://127.0.0.1:9", None).search(Some("cats")).await.unwrap_err();
        assert!(matches!(err, GatewayError::MissingCredential { var: "UNSPLASH_ACCESS_KEY", .. }));
    }

    #[tokio::test]
    async fn test_default_query_and_projection() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/search/photos")
            .match_query(Matcher::AllOf(vec![
                Matcher::UrlEncoded("query".into(), "technology".into()),
                Matcher::UrlEncoded("per_page".into(), "5".into()),
            ]))
            .match_header("authorization", "Client-ID uk")
            .with_status(200)
            .with_body(
                r#"{"total":1,"results":[{"id":"p1","description":null,"alt_description":"a laptop",
                "urls":{"regular":"https://img/r","small":"https://img/s"},
                "user":{"name":"Ada"},"links":{"html":"https://unsplash.com/p1"}}]}"#,
            )
            .create_async()
            .await;

        let results = service(&server.url(), Some("uk")).search(None).await.unwrap();
        mock.assert_async().await;
        assert_eq!(
            results,
            vec![ImageResult {
                id: "p1".into(),
                description: Some("a laptop".into()),
                url: "https://img/r".into(),
                thumb: "https://img/s".into(),
                photographer: "Ada".into(),
                link: "https://unsplash.com/p1".into(),
            }]
        );
    }
}
