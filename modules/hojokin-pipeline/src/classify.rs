//! Page classification via OpenAI structured output.

use ai_client::OpenAi;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use hojokin_common::{normalize_url, PageCategory, Provenance, UrlRecord};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::debug;

const MAX_SUBSIDY_TITLES: usize = 5;

const CLASSIFICATION_PROMPT: &str = "\
You are an analyst of Japanese municipal subsidy-program web pages.

Classify the page into exactly one category:

1. list_page — a page listing multiple subsidy programs: several program
   titles or links, an index/table-of-contents structure, headings like
   「補助金一覧」「制度一覧」「支援制度」.
2. individual_page — a page describing one specific subsidy program in
   detail: application method (申請方法), eligibility (対象/要件/条件),
   amounts (金額/補助率), or application periods, with the program name in
   the page title or headings.
3. unrelated — a page not related to subsidy programs.

Set confidence between 0.0 and 1.0, explain the judgement briefly in
Japanese (within 200 characters), list up to five subsidy-program titles
found on the page, and summarize the main content in Japanese within 100
characters.";

/// Structured classification of one page.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct ClassificationResponse {
    /// The page kind.
    pub category: PageCategory,
    /// Judgement confidence, 0.0-1.0.
    pub confidence: f32,
    /// Short rationale for the judgement.
    pub rationale: String,
    /// Subsidy-program titles found on the page, at most five.
    pub subsidy_titles: Vec<String>,
    /// The page's title.
    pub page_title: String,
    /// Short summary of the main content.
    pub summary: String,
}

/// Classification seam; lets stages run against a stand-in in tests.
#[async_trait]
pub trait UrlClassifier: Send + Sync {
    async fn classify(&self, url: &str, content: &str) -> Result<ClassificationResponse>;
}

pub struct PageClassifier {
    ai: OpenAi,
}

impl PageClassifier {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            ai: OpenAi::new(api_key, model).with_temperature(0.1),
        }
    }
}

#[async_trait]
impl UrlClassifier for PageClassifier {
    /// Classify one page from its prepared content.
    async fn classify(&self, url: &str, content: &str) -> Result<ClassificationResponse> {
        debug!(url, chars = content.chars().count(), "Classifying page");

        let user = format!("URL: {url}\n\nPage content:\n\n{content}");
        self.ai
            .extract::<ClassificationResponse>(CLASSIFICATION_PROMPT, &user)
            .await
            .with_context(|| format!("Classification failed for {url}"))
    }
}

/// Coerce a model response into a typed record. Out-of-range confidence is
/// clamped and over-long title lists truncated rather than rejected.
pub fn record_from_response(
    url: &str,
    prefecture: &str,
    city: &str,
    provenance: Provenance,
    parent_url: Option<&str>,
    response: ClassificationResponse,
) -> UrlRecord {
    let mut subsidy_titles = response.subsidy_titles;
    subsidy_titles.truncate(MAX_SUBSIDY_TITLES);

    UrlRecord {
        url: normalize_url(url),
        prefecture: prefecture.to_string(),
        city: city.to_string(),
        category: response.category,
        confidence: response.confidence.clamp(0.0, 1.0),
        rationale: response.rationale,
        page_title: response.page_title,
        summary: response.summary,
        subsidy_titles,
        provenance: vec![provenance],
        parent_url: parent_url.map(normalize_url),
        classified_at: Utc::now(),
    }
}
