//! Web search against Tavily or the Google Custom Search JSON API.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hojokin_common::{normalize_url, Config, SearchEngine, SearchHit};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Purpose words crossed with support words to form search queries.
const PURPOSE_WORDS: &[&str] = &["住宅", "土地"];
const SUPPORT_WORDS: &[&str] = &["補助金"];

/// PDFs dominate municipal search results and can't be classified as pages.
const EXCLUDE_FILTER: &str = "-filetype:pdf";

#[async_trait]
pub trait WebSearcher: Send + Sync {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>>;
    fn name(&self) -> &str;
}

pub fn searcher_from_config(config: &Config) -> Box<dyn WebSearcher> {
    match config.search_engine {
        SearchEngine::Tavily => Box::new(TavilySearcher::new(&config.tavily_api_key)),
        SearchEngine::GoogleCse => Box::new(GoogleCseSearcher::new(
            config.google_cse_key.as_deref().unwrap_or_default(),
            config.google_cse_cx.as_deref().unwrap_or_default(),
        )),
    }
}

/// Build the search queries for one municipality.
/// With a known official domain the query is scoped with `site:`; without
/// one the prefecture/city names plus 公式 stand in.
pub fn build_queries(prefecture: &str, city: &str, official_domain: Option<&str>) -> Vec<String> {
    let mut queries = Vec::new();
    for purpose in PURPOSE_WORDS {
        for support in SUPPORT_WORDS {
            let query = match official_domain {
                Some(domain) => format!("{purpose} {support} site:{domain} {EXCLUDE_FILTER}"),
                None => format!("{prefecture} {city} {purpose} {support} 公式 {EXCLUDE_FILTER}"),
            };
            queries.push(query);
        }
    }
    queries
}

/// Run every query for a municipality and return its hits, deduplicated by
/// normalized URL in first-seen order. A failed query is logged and skipped.
pub async fn search_municipality(
    searcher: &dyn WebSearcher,
    prefecture: &str,
    city: &str,
    official_domain: Option<&str>,
    max_results: usize,
    delay: Duration,
) -> Vec<SearchHit> {
    let mut seen = std::collections::HashSet::new();
    let mut hits = Vec::new();

    for query in build_queries(prefecture, city, official_domain) {
        match searcher.search(&query, max_results).await {
            Ok(results) => {
                for hit in results {
                    let key = normalize_url(&hit.url);
                    if !key.is_empty() && seen.insert(key) {
                        hits.push(hit);
                    }
                }
            }
            Err(e) => warn!(query, error = %e, "Search query failed, skipping"),
        }
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    info!(prefecture, city, count = hits.len(), "Municipality search complete");
    hits
}

// --- Tavily ---

pub struct TavilySearcher {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TavilyRequest {
    api_key: String,
    query: String,
    max_results: usize,
    search_depth: String,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    url: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    content: String,
}

impl TavilySearcher {
    pub fn new(api_key: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl WebSearcher for TavilySearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        info!(query, max_results, "Tavily search");

        let request = TavilyRequest {
            api_key: self.api_key.clone(),
            query: query.to_string(),
            max_results,
            search_depth: "basic".to_string(),
        };

        let resp = self
            .client
            .post("https://api.tavily.com/search")
            .json(&request)
            .send()
            .await
            .context("Tavily API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Tavily API error ({status}): {body}");
        }

        let data: TavilyResponse = resp.json().await.context("Failed to parse Tavily response")?;

        let hits: Vec<SearchHit> = data
            .results
            .into_iter()
            .filter(|r| !r.url.is_empty())
            .map(|r| SearchHit {
                url: r.url,
                title: r.title,
                snippet: r.content,
            })
            .collect();

        info!(query, count = hits.len(), "Tavily search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "tavily"
    }
}

// --- Google Custom Search ---

pub struct GoogleCseSearcher {
    api_key: String,
    cx: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct CseResponse {
    #[serde(default)]
    items: Vec<CseItem>,
}

#[derive(Debug, Deserialize)]
struct CseItem {
    #[serde(default)]
    link: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    snippet: String,
}

impl GoogleCseSearcher {
    pub fn new(api_key: &str, cx: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            cx: cx.to_string(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

#[async_trait]
impl WebSearcher for GoogleCseSearcher {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>> {
        info!(query, max_results, "Google CSE search");

        // The API caps num at 10 per request.
        let num = max_results.min(10);

        let resp = self
            .client
            .get("https://www.googleapis.com/customsearch/v1")
            .query(&[
                ("key", self.api_key.as_str()),
                ("cx", self.cx.as_str()),
                ("q", query),
                ("num", &num.to_string()),
            ])
            .send()
            .await
            .context("Google CSE request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Google CSE error ({status}): {body}");
        }

        let data: CseResponse = resp.json().await.context("Failed to parse CSE response")?;

        let hits: Vec<SearchHit> = data
            .items
            .into_iter()
            .filter(|i| !i.link.is_empty())
            .map(|i| SearchHit {
                url: i.link,
                title: i.title,
                snippet: i.snippet,
            })
            .collect();

        info!(query, count = hits.len(), "Google CSE search complete");
        Ok(hits)
    }

    fn name(&self) -> &str {
        "google_cse"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queries_with_domain_use_site_scope() {
        let queries = build_queries("千葉県", "千葉市", Some("www.city.chiba.jp"));
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0], "住宅 補助金 site:www.city.chiba.jp -filetype:pdf");
        assert_eq!(queries[1], "土地 補助金 site:www.city.chiba.jp -filetype:pdf");
    }

    #[test]
    fn queries_without_domain_name_the_municipality() {
        let queries = build_queries("千葉県", "銚子市", None);
        assert_eq!(queries.len(), 2);
        assert!(queries[0].contains("千葉県 銚子市"));
        assert!(queries[0].contains("公式"));
        assert!(queries.iter().all(|q| q.ends_with("-filetype:pdf")));
    }

    struct FixedSearcher {
        hits: Vec<SearchHit>,
        fail: bool,
    }

    #[async_trait]
    impl WebSearcher for FixedSearcher {
        async fn search(&self, _query: &str, _max_results: usize) -> Result<Vec<SearchHit>> {
            if self.fail {
                anyhow::bail!("boom");
            }
            Ok(self.hits.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    fn hit(url: &str) -> SearchHit {
        SearchHit {
            url: url.to_string(),
            title: String::new(),
            snippet: String::new(),
        }
    }

    #[tokio::test]
    async fn municipality_search_dedupes_across_queries() {
        let searcher = FixedSearcher {
            hits: vec![hit("https://a.jp/x"), hit("https://a.jp/x#frag"), hit("https://b.jp/y")],
            fail: false,
        };
        // Two queries, identical hits each time; still two unique URLs.
        let hits = search_municipality(
            &searcher,
            "千葉県",
            "千葉市",
            None,
            10,
            Duration::ZERO,
        )
        .await;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://a.jp/x");
        assert_eq!(hits[1].url, "https://b.jp/y");
    }

    #[tokio::test]
    async fn failing_searcher_yields_empty_not_error() {
        let searcher = FixedSearcher { hits: vec![], fail: true };
        let hits =
            search_municipality(&searcher, "千葉県", "千葉市", None, 10, Duration::ZERO).await;
        assert!(hits.is_empty());
    }
}
