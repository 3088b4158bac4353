//! Candidate-link extraction from list-page HTML.
//!
//! Only `href` attributes count as links. Extracted URLs are resolved
//! against the page URL, fragment-stripped, deduplicated, and passed through
//! a subsidy-keyword filter before classification.

use std::sync::LazyLock;

use regex::Regex;

static HREF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"href\s*=\s*["']([^"']+)["']"#).expect("valid regex"));

/// URL substrings that mark a link as subsidy-related.
const INCLUDE_KEYWORDS: &[&str] = &[
    "補助", "助成", "支援", "交付", "給付", "奨励", "制度", "事業", "申請", "募集",
    "subsidy", "grant", "support", "josei", "hojo",
];

/// URL substrings that disqualify a link outright: non-page schemes,
/// file downloads, SNS, and site chrome.
const EXCLUDE_KEYWORDS: &[&str] = &[
    "javascript:", "mailto:", "tel:",
    ".pdf", ".doc", ".xls", ".zip", ".csv",
    "facebook", "twitter", "instagram", "youtube",
    "login", "admin", "search", "sitemap",
    "privacy", "contact", "about", "access",
];

/// Resolve a raw href against a base URL, returning an absolute URL with the
/// fragment stripped.
fn resolve_href(raw: &str, base: Option<&url::Url>) -> Option<String> {
    let mut parsed = if raw.starts_with("http://") || raw.starts_with("https://") {
        url::Url::parse(raw).ok()?
    } else {
        base?.join(raw).ok()?
    };
    parsed.set_fragment(None);
    Some(parsed.to_string())
}

/// Extract all links from raw HTML, resolved and deduplicated.
pub fn extract_links(html: &str, base_url: &str) -> Vec<String> {
    let base = url::Url::parse(base_url).ok();
    let mut seen = std::collections::HashSet::new();
    let mut links = Vec::new();

    for cap in HREF_RE.captures_iter(html) {
        let raw = &cap[1];
        if let Some(resolved) = resolve_href(raw, base.as_ref()) {
            if seen.insert(resolved.clone()) {
                links.push(resolved);
            }
        }
    }

    links
}

/// Filter extracted links down to subsidy-page candidates.
///
/// Excluded links are dropped; the rest are returned keyword matches first
/// (stable order within each group) so a downstream per-page cap keeps the
/// most relevant candidates.
pub fn filter_candidate_links(links: Vec<String>) -> Vec<String> {
    let mut keyword_matches = Vec::new();
    let mut others = Vec::new();

    for link in links {
        let lower = link.to_lowercase();
        if EXCLUDE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
            continue;
        }
        if !lower.starts_with("http") {
            continue;
        }
        if INCLUDE_KEYWORDS.iter().any(|kw| link.contains(kw) || lower.contains(kw)) {
            keyword_matches.push(link);
        } else {
            others.push(link);
        }
    }

    keyword_matches.extend(others);
    keyword_matches
}

/// Extract, filter, and cap candidate links from a list page in one pass.
pub fn candidate_links(html: &str, base_url: &str, max_links: usize) -> Vec<String> {
    let mut candidates = filter_candidate_links(extract_links(html, base_url));
    candidates.truncate(max_links);
    candidates
}
