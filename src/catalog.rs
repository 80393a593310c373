//! Read-only clients for the discovery catalog (RAWG) and the community news
//! feed. Nothing here touches the library document.

use std::{env, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::{Datelike, Local};
use once_cell::sync::Lazy;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{CommandError, CommandResult, ErrorCode};

pub const RAWG_ENDPOINT: &str = "https://api.rawg.io/api/games";
pub const NEWS_ENDPOINT: &str = "https://newsapi.org/v2/everything";
pub const DEFAULT_NEWS_PAGE_SIZE: u32 = 12;
const MAX_NEWS_PAGE_SIZE: u32 = 50;
const NEWS_QUERY: &str = "video games OR gaming";

fn env_key(name: &str) -> Option<String> {
    let value = env::var(name).ok()?;
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

static RAWG_API_KEY: Lazy<Option<String>> = Lazy::new(|| env_key("RAWG_API_KEY"));
static NEWS_API_KEY: Lazy<Option<String>> = Lazy::new(|| env_key("NEWS_API_KEY"));

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Discovery {
    pub trending: Vec<Value>,
    pub indie: Vec<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub url_to_image: Option<String>,
    #[serde(default)]
    pub published_at: Option<String>,
    #[serde(default, deserialize_with = "source_name")]
    pub source: Option<String>,
}

fn source_name<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(match value {
        Value::String(name) => Some(name),
        Value::Object(map) => map.get("name").and_then(Value::as_str).map(str::to_string),
        _ => None,
    })
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NewsPage {
    pub articles: Vec<NewsArticle>,
    pub has_more: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsResponse {
    #[serde(default)]
    total_results: u64,
    #[serde(default)]
    articles: Vec<NewsArticle>,
}

#[derive(Debug, Deserialize)]
struct RawgResponse {
    #[serde(default)]
    results: Vec<Value>,
}

#[derive(Clone)]
pub struct CatalogClient {
    client: Client,
    rawg_key: Option<Arc<str>>,
    news_key: Option<Arc<str>>,
    rawg_endpoint: Arc<str>,
    news_endpoint: Arc<str>,
}

impl CatalogClient {
    /// Client using API keys from the environment.
    pub fn from_env(timeout: Duration) -> anyhow::Result<Self> {
        Self::new(timeout, RAWG_API_KEY.clone(), NEWS_API_KEY.clone())
    }

    pub fn new(
        timeout: Duration,
        rawg_key: Option<String>,
        news_key: Option<String>,
    ) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for catalog")?;
        Ok(Self {
            client,
            rawg_key: rawg_key.map(Arc::from),
            news_key: news_key.map(Arc::from),
            rawg_endpoint: Arc::from(RAWG_ENDPOINT),
            news_endpoint: Arc::from(NEWS_ENDPOINT),
        })
    }

    pub fn with_endpoints(mut self, rawg: &str, news: &str) -> Self {
        self.rawg_endpoint = Arc::from(rawg);
        self.news_endpoint = Arc::from(news);
        self
    }

    /// Trending releases of the current year plus well-reviewed indie games,
    /// fetched concurrently.
    pub async fn discovery(&self) -> CommandResult<Discovery> {
        let key = self.rawg_key.as_deref().ok_or_else(|| {
            CommandError::new(ErrorCode::CatalogUnavailable).with_details("RAWG_API_KEY is not set")
        })?;
        let (trending, indie) = discovery_queries(key, Local::now().year());
        let (trending, indie) = tokio::try_join!(
            self.fetch_games(&trending),
            self.fetch_games(&indie)
        )?;
        debug!(trending = trending.len(), indie = indie.len(), "Fetched discovery catalog");
        Ok(Discovery { trending, indie })
    }

    async fn fetch_games(&self, query: &[(&str, String)]) -> CommandResult<Vec<Value>> {
        let failed = |details: String| {
            CommandError::new(ErrorCode::CatalogUnavailable)
                .with_context("discovery")
                .with_details(details)
        };
        let response = self
            .client
            .get(self.rawg_endpoint.as_ref())
            .query(query)
            .send()
            .await
            .map_err(|err| failed(request_failure(&err)))?;
        if !response.status().is_success() {
            return Err(failed(format!("catalog returned {}", response.status())));
        }
        let body: RawgResponse = response
            .json()
            .await
            .map_err(|err| failed(err.to_string()))?;
        Ok(body.results)
    }

    pub async fn community_news(&self, page: u32, page_size: u32) -> CommandResult<NewsPage> {
        let failed = |details: String| {
            CommandError::new(ErrorCode::NewsUnavailable)
                .with_context("community news")
                .with_details(details)
        };
        let key = self
            .news_key
            .as_deref()
            .ok_or_else(|| failed("NEWS_API_KEY is not set".to_string()))?;
        let (page, page_size) = clamp_paging(page, page_size);

        let response = self
            .client
            .get(self.news_endpoint.as_ref())
            .query(&news_query(key, page, page_size))
            .send()
            .await
            .map_err(|err| failed(request_failure(&err)))?;
        if !response.status().is_success() {
            warn!("News feed returned {}", response.status());
            return Err(failed(format!("news feed returned {}", response.status())));
        }
        let body: NewsResponse = response
            .json()
            .await
            .map_err(|err| failed(err.to_string()))?;
        Ok(news_page(body.articles, body.total_results, page, page_size))
    }
}

fn request_failure(err: &reqwest::Error) -> String {
    if err.is_timeout() {
        "request timed out".to_string()
    } else {
        err.to_string()
    }
}

fn discovery_queries(key: &str, year: i32) -> (Vec<(&'static str, String)>, Vec<(&'static str, String)>) {
    let trending = vec![
        ("key", key.to_string()),
        ("page_size", "10".to_string()),
        ("dates", format!("{year}-01-01,{year}-12-31")),
        ("ordering", "-added".to_string()),
    ];
    let indie = vec![
        ("key", key.to_string()),
        ("page_size", "5".to_string()),
        ("genres", "indie".to_string()),
        ("ordering", "-metacritic".to_string()),
        ("metacritic", "70,100".to_string()),
    ];
    (trending, indie)
}

fn clamp_paging(page: u32, page_size: u32) -> (u32, u32) {
    let page_size = if page_size == 0 {
        DEFAULT_NEWS_PAGE_SIZE
    } else {
        page_size.min(MAX_NEWS_PAGE_SIZE)
    };
    (page.max(1), page_size)
}

fn news_query(key: &str, page: u32, page_size: u32) -> Vec<(&'static str, String)> {
    vec![
        ("apiKey", key.to_string()),
        ("q", NEWS_QUERY.to_string()),
        ("language", "en".to_string()),
        ("sortBy", "publishedAt".to_string()),
        ("page", page.to_string()),
        ("pageSize", page_size.to_string()),
    ]
}

fn news_page(articles: Vec<NewsArticle>, total: u64, page: u32, page_size: u32) -> NewsPage {
    let articles: Vec<NewsArticle> = articles
        .into_iter()
        .filter(|article| !article.title.trim().is_empty() && !article.url.trim().is_empty())
        .collect();
    let consumed = u64::from(page) * u64::from(page_size);
    NewsPage {
        has_more: consumed < total,
        articles,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn discovery_queries_target_current_year() {
        let (trending, indie) = discovery_queries("k", 2026);
        assert!(trending.contains(&("dates", "2026-01-01,2026-12-31".to_string())));
        assert!(trending.contains(&("page_size", "10".to_string())));
        assert!(indie.contains(&("metacritic", "70,100".to_string())));
        assert!(indie.contains(&("page_size", "5".to_string())));
    }

    #[test]
    fn paging_is_clamped() {
        assert_eq!(clamp_paging(0, 0), (1, DEFAULT_NEWS_PAGE_SIZE));
        assert_eq!(clamp_paging(3, 500), (3, MAX_NEWS_PAGE_SIZE));
    }

    #[test]
    fn news_page_reports_remaining_results() {
        let raw = json!({
            "totalResults": 30,
            "articles": [
                { "title": "Patch notes", "url": "https://a", "source": { "id": null, "name": "Site" } },
                { "title": "", "url": "https://b" },
            ]
        });
        let body: NewsResponse = serde_json::from_value(raw).unwrap();
        let page = news_page(body.articles, body.total_results, 2, 12);
        assert!(page.has_more);
        assert_eq!(page.articles.len(), 1);
        assert_eq!(page.articles[0].source.as_deref(), Some("Site"));

        let last = news_page(Vec::new(), 30, 3, 12);
        assert!(!last.has_more);
    }

    async fn serve_stub() -> String {
        use axum::{extract::Query, routing::get, Json, Router};
        use std::collections::HashMap;

        let app = Router::new()
            .route(
                "/games",
                get(|Query(query): Query<HashMap<String, String>>| async move {
                    let ordering = query.get("ordering").cloned().unwrap_or_default();
                    Json(json!({ "results": [{ "name": ordering }] }))
                }),
            )
            .route(
                "/news",
                get(|| async {
                    Json(json!({
                        "totalResults": 3,
                        "articles": [
                            { "title": "Launch week", "url": "https://news/1", "source": { "name": "Wire" } },
                            { "title": "  ", "url": "https://news/2" },
                        ]
                    }))
                }),
            )
            .route(
                "/slow",
                get(|| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Json(json!({ "results": [] }))
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn discovery_and_news_read_configured_endpoints() {
        let base = serve_stub().await;
        let client = CatalogClient::new(Duration::from_secs(5), Some("k".into()), Some("k".into()))
            .unwrap()
            .with_endpoints(&format!("{base}/games"), &format!("{base}/news"));

        let discovery = client.discovery().await.unwrap();
        assert_eq!(discovery.trending[0]["name"], "-added");
        assert_eq!(discovery.indie[0]["name"], "-metacritic");

        let page = client.community_news(1, 1).await.unwrap();
        assert_eq!(page.articles.len(), 1);
        assert_eq!(page.articles[0].source.as_deref(), Some("Wire"));
        assert!(page.has_more);
    }

    #[tokio::test]
    async fn slow_catalog_times_out_as_retryable() {
        let base = serve_stub().await;
        let client = CatalogClient::new(Duration::from_millis(200), Some("k".into()), None)
            .unwrap()
            .with_endpoints(&format!("{base}/slow"), &format!("{base}/news"));
        let err = client.discovery().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CatalogUnavailable);
        assert_eq!(err.details, "request timed out");
        assert!(err.retryable);
    }

    #[tokio::test]
    async fn missing_keys_are_reported_with_codes() {
        let client = CatalogClient::new(Duration::from_secs(1), None, None).unwrap();
        let err = client.discovery().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CatalogUnavailable);
        let err = client.community_news(1, 12).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NewsUnavailable);
        assert!(err.retryable);
    }
}
