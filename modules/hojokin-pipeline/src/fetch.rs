//! Page fetching: rendered HTML via a Browserless `/content` endpoint when
//! configured, plain HTTP otherwise. A failed rendered fetch falls back to
//! plain HTTP.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hojokin_common::{Config, HojokinError};
use tracing::{info, warn};

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);
const USER_AGENT: &str = "Mozilla/5.0 (compatible; hojokin/0.1)";

#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetch a page's HTML. For rendered fetchers this is the post-script DOM.
    async fn fetch(&self, url: &str) -> Result<String>;
    fn name(&self) -> &str;
}

fn validate_url(url: &str) -> Result<url::Url> {
    let parsed = url::Url::parse(url)
        .map_err(|e| HojokinError::Fetch(format!("Invalid URL {url}: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(HojokinError::Fetch(format!(
            "Only http/https URLs are allowed, got: {}",
            parsed.scheme()
        ))
        .into());
    }
    Ok(parsed)
}

// --- Plain HTTP ---

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to build HTTP client"),
        }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        validate_url(url)?;

        info!(url, fetcher = "http", "Fetching URL");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .context("HTTP request failed")?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("HTTP fetch failed for {url}: status {status}");
        }

        let html = resp.text().await.context("Failed to read response body")?;
        info!(url, fetcher = "http", bytes = html.len(), "Fetched");
        Ok(html)
    }

    fn name(&self) -> &str {
        "http"
    }
}

// --- Browserless (rendered) ---

/// Fetches the fully-rendered DOM through a Browserless-compatible
/// `/content` endpoint, which drives headless Chromium and waits for
/// network idle before serializing.
pub struct BrowserlessFetcher {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl BrowserlessFetcher {
    pub fn new(base_url: &str, token: Option<&str>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(FETCH_TIMEOUT)
                .build()
                .expect("Failed to build HTTP client"),
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.map(String::from),
        }
    }
}

#[async_trait]
impl PageFetcher for BrowserlessFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        validate_url(url)?;

        let mut endpoint = format!("{}/content", self.base_url);
        if let Some(ref token) = self.token {
            endpoint.push_str(&format!("?token={token}"));
        }

        info!(url, fetcher = "browserless", "Fetching rendered URL");

        let body = serde_json::json!({ "url": url, "waitUntil": "networkidle2" });

        let resp = self
            .client
            .post(&endpoint)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .context("Browserless content request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            anyhow::bail!("Browserless error ({status}): {message}");
        }

        let html = resp.text().await.context("Failed to read rendered body")?;
        info!(url, fetcher = "browserless", bytes = html.len(), "Fetched");
        Ok(html)
    }

    fn name(&self) -> &str {
        "browserless"
    }
}

// --- Rendered-with-fallback composite ---

/// Tries the rendered fetcher first, falling back to plain HTTP on failure.
pub struct FallbackFetcher {
    rendered: Option<BrowserlessFetcher>,
    plain: HttpFetcher,
}

impl FallbackFetcher {
    pub fn from_config(config: &Config) -> Self {
        let rendered = config.browserless_url.as_deref().map(|base| {
            info!(base, "Rendered fetching enabled");
            BrowserlessFetcher::new(base, config.browserless_token.as_deref())
        });
        Self {
            rendered,
            plain: HttpFetcher::new(),
        }
    }
}

#[async_trait]
impl PageFetcher for FallbackFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        if let Some(ref rendered) = self.rendered {
            match rendered.fetch(url).await {
                Ok(html) if !html.trim().is_empty() => return Ok(html),
                Ok(_) => warn!(url, "Rendered fetch returned empty DOM, falling back to HTTP"),
                Err(e) => warn!(url, error = %e, "Rendered fetch failed, falling back to HTTP"),
            }
        }
        self.plain.fetch(url).await
    }

    fn name(&self) -> &str {
        if self.rendered.is_some() {
            "browserless+http"
        } else {
            "http"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn non_http_scheme_is_rejected() {
        let fetcher = HttpFetcher::new();
        let err = fetcher.fetch("ftp://example.jp/file").await.unwrap_err();
        assert!(err.to_string().contains("Only http/https"));
    }

    #[tokio::test]
    async fn invalid_url_is_rejected() {
        let fetcher = HttpFetcher::new();
        assert!(fetcher.fetch("not a url").await.is_err());
    }

    #[test]
    fn fallback_name_reflects_configuration() {
        let plain_only = FallbackFetcher {
            rendered: None,
            plain: HttpFetcher::new(),
        };
        assert_eq!(plain_only.name(), "http");

        let with_rendered = FallbackFetcher {
            rendered: Some(BrowserlessFetcher::new("http://localhost:3000", None)),
            plain: HttpFetcher::new(),
        };
        assert_eq!(with_rendered.name(), "browserless+http");
    }
}
