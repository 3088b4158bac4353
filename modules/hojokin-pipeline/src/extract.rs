//! List-page expansion: pull candidate links out of classified list pages
//! and classify each one, stamping extraction provenance.

use std::collections::HashSet;
use std::time::Duration;

use hojokin_common::{normalize_url, PageCategory, Provenance, UrlRecord};
use tracing::{info, warn};

use crate::classify::{record_from_response, UrlClassifier};
use crate::content::{prepare_for_model, MAX_CLASSIFY_CHARS};
use crate::fetch::PageFetcher;
use crate::links;

pub const DEFAULT_MAX_LINKS_PER_PAGE: usize = 30;

#[derive(Debug, Default)]
pub struct ExtractionOutcome {
    pub records: Vec<UrlRecord>,
    pub list_pages_processed: usize,
    pub links_found: usize,
    pub failures: usize,
}

/// Walk every list page in `records`, extract candidate links, and classify
/// them. Per-page and per-link failures are logged and skipped; the pass
/// always completes. A URL already seen in this pass (or equal to its own
/// list page) is not classified twice.
pub async fn extract_from_list_pages(
    records: &[UrlRecord],
    fetcher: &dyn PageFetcher,
    classifier: &dyn UrlClassifier,
    max_links_per_page: usize,
    delay: Duration,
) -> ExtractionOutcome {
    let list_pages: Vec<&UrlRecord> = records
        .iter()
        .filter(|r| r.category == PageCategory::ListPage)
        .collect();

    let mut outcome = ExtractionOutcome::default();
    let mut seen: HashSet<String> = HashSet::new();

    info!(count = list_pages.len(), "Expanding list pages");

    for list_page in list_pages {
        let html = match fetcher.fetch(&list_page.url).await {
            Ok(html) => html,
            Err(e) => {
                warn!(url = list_page.url.as_str(), error = %e, "List page fetch failed, skipping");
                outcome.failures += 1;
                continue;
            }
        };
        outcome.list_pages_processed += 1;

        let candidates = links::candidate_links(&html, &list_page.url, max_links_per_page);
        info!(
            url = list_page.url.as_str(),
            candidates = candidates.len(),
            "Candidate links extracted"
        );

        for link in candidates {
            let key = normalize_url(&link);
            if key == list_page.url || !seen.insert(key) {
                continue;
            }
            outcome.links_found += 1;

            let child_html = match fetcher.fetch(&link).await {
                Ok(html) => html,
                Err(e) => {
                    warn!(url = link.as_str(), error = %e, "Link fetch failed, skipping");
                    outcome.failures += 1;
                    continue;
                }
            };

            let content = prepare_for_model(&child_html, &link, MAX_CLASSIFY_CHARS);
            if content.is_empty() {
                warn!(url = link.as_str(), "Empty page, skipping");
                outcome.failures += 1;
                continue;
            }

            match classifier.classify(&link, &content).await {
                Ok(response) => {
                    outcome.records.push(record_from_response(
                        &link,
                        &list_page.prefecture,
                        &list_page.city,
                        Provenance::ListExtraction,
                        Some(&list_page.url),
                        response,
                    ));
                }
                Err(e) => {
                    warn!(url = link.as_str(), error = %e, "Classification failed, skipping");
                    outcome.failures += 1;
                }
            }

            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    info!(
        classified = outcome.records.len(),
        failures = outcome.failures,
        "List-page expansion complete"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::ClassificationResponse;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct FixedFetcher {
        pages: HashMap<String, String>,
    }

    #[async_trait]
    impl PageFetcher for FixedFetcher {
        async fn fetch(&self, url: &str) -> Result<String> {
            self.pages
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("no page for {url}"))
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FixedClassifier;

    #[async_trait]
    impl UrlClassifier for FixedClassifier {
        async fn classify(&self, url: &str, _content: &str) -> Result<ClassificationResponse> {
            if url.contains("broken") {
                anyhow::bail!("model unavailable");
            }
            Ok(ClassificationResponse {
                category: PageCategory::IndividualPage,
                confidence: 0.9,
                rationale: String::new(),
                subsidy_titles: vec![],
                page_title: String::new(),
                summary: String::new(),
            })
        }
    }

    fn list_page(url: &str) -> UrlRecord {
        let mut r = UrlRecord::seed(url, "千葉県", "千葉市", Provenance::InitialSearch);
        r.category = PageCategory::ListPage;
        r.confidence = 0.8;
        r
    }

    fn page_body() -> String {
        "<h1>制度</h1><p>概要テキストが十分にある本文です。</p>".to_string()
    }

    #[tokio::test]
    async fn extracts_and_classifies_children_with_parent_stamp() {
        let html = r#"
            <a href="/hojo/a.html">A</a>
            <a href="/hojo/b.html">B</a>
        "#;
        let fetcher = FixedFetcher {
            pages: HashMap::from([
                ("https://example.jp/list".to_string(), html.to_string()),
                ("https://example.jp/hojo/a.html".to_string(), page_body()),
                ("https://example.jp/hojo/b.html".to_string(), page_body()),
            ]),
        };
        let outcome = extract_from_list_pages(
            &[list_page("https://example.jp/list")],
            &fetcher,
            &FixedClassifier,
            10,
            Duration::ZERO,
        )
        .await;

        assert_eq!(outcome.records.len(), 2);
        assert_eq!(outcome.list_pages_processed, 1);
        for record in &outcome.records {
            assert_eq!(record.provenance, vec![Provenance::ListExtraction]);
            assert_eq!(record.parent_url.as_deref(), Some("https://example.jp/list"));
            assert_eq!(record.prefecture, "千葉県");
        }
    }

    #[tokio::test]
    async fn non_list_pages_are_ignored() {
        let fetcher = FixedFetcher { pages: HashMap::new() };
        let mut individual = list_page("https://example.jp/detail");
        individual.category = PageCategory::IndividualPage;

        let outcome = extract_from_list_pages(
            &[individual],
            &fetcher,
            &FixedClassifier,
            10,
            Duration::ZERO,
        )
        .await;
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.list_pages_processed, 0);
    }

    #[tokio::test]
    async fn unfetchable_list_page_is_skipped_not_fatal() {
        let html = r#"<a href="/hojo/a.html">A</a>"#;
        let fetcher = FixedFetcher {
            pages: HashMap::from([
                ("https://ok.jp/list".to_string(), html.to_string()),
                ("https://ok.jp/hojo/a.html".to_string(), page_body()),
            ]),
        };
        let outcome = extract_from_list_pages(
            &[list_page("https://down.jp/list"), list_page("https://ok.jp/list")],
            &fetcher,
            &FixedClassifier,
            10,
            Duration::ZERO,
        )
        .await;

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.failures, 1);
    }

    #[tokio::test]
    async fn classification_failure_skips_only_that_link() {
        let html = r#"
            <a href="/hojo/broken.html">broken</a>
            <a href="/hojo/fine.html">fine</a>
        "#;
        let fetcher = FixedFetcher {
            pages: HashMap::from([
                ("https://example.jp/list".to_string(), html.to_string()),
                ("https://example.jp/hojo/broken.html".to_string(), page_body()),
                ("https://example.jp/hojo/fine.html".to_string(), page_body()),
            ]),
        };
        let outcome = extract_from_list_pages(
            &[list_page("https://example.jp/list")],
            &fetcher,
            &FixedClassifier,
            10,
            Duration::ZERO,
        )
        .await;

        assert_eq!(outcome.records.len(), 1);
        assert!(outcome.records[0].url.ends_with("fine.html"));
        assert_eq!(outcome.failures, 1);
    }

    #[tokio::test]
    async fn repeated_links_across_list_pages_classified_once() {
        let html = r#"<a href="https://example.jp/hojo/shared.html">shared</a>"#;
        let fetcher = FixedFetcher {
            pages: HashMap::from([
                ("https://example.jp/list1".to_string(), html.to_string()),
                ("https://example.jp/list2".to_string(), html.to_string()),
                ("https://example.jp/hojo/shared.html".to_string(), page_body()),
            ]),
        };
        let outcome = extract_from_list_pages(
            &[list_page("https://example.jp/list1"), list_page("https://example.jp/list2")],
            &fetcher,
            &FixedClassifier,
            10,
            Duration::ZERO,
        )
        .await;

        assert_eq!(outcome.records.len(), 1);
    }
}
