//! Page-content preparation for model calls.

use spider_transformations::transformation::content::{
    transform_content_input, ReturnFormat, TransformConfig, TransformInput,
};

/// Character budget for classification input. Municipal pages routinely
/// carry hundreds of KB of markup; the classifier only needs the main
/// content, truncated to stay inside the model's context.
pub const MAX_CLASSIFY_CHARS: usize = 50_000;

/// Character budget for detail extraction, which reads the whole program page.
pub const MAX_DETAIL_CHARS: usize = 100_000;

/// Reduce raw HTML to readable main content (markdown) and truncate to
/// `max_chars`. Returns an empty string when nothing readable remains.
pub fn clean_for_model(html: &str, url: &str, max_chars: usize) -> String {
    if html.trim().is_empty() {
        return String::new();
    }

    let parsed_url = url::Url::parse(url).ok();
    let config = TransformConfig {
        readability: true,
        main_content: true,
        return_format: ReturnFormat::Markdown,
        filter_images: true,
        filter_svg: true,
        clean_html: true,
    };
    let input = TransformInput {
        url: parsed_url.as_ref(),
        content: html.as_bytes(),
        screenshot_bytes: None,
        encoding: None,
        selector_config: None,
        ignore_tags: None,
    };

    let text = transform_content_input(input, &config);
    truncate_chars(&text, max_chars)
}

/// Model input for a page: readable main content when extraction finds any,
/// otherwise the raw markup truncated to the same budget. Empty only when
/// the page itself is empty.
pub fn prepare_for_model(html: &str, url: &str, max_chars: usize) -> String {
    let cleaned = clean_for_model(html, url, max_chars);
    if !cleaned.trim().is_empty() {
        return cleaned;
    }
    truncate_chars(html.trim(), max_chars)
}

/// Truncate to at most `max_chars` characters, never splitting a character.
/// Truncated text is marked with a trailing ellipsis.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push('…');
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_unchanged() {
        assert_eq!(truncate_chars("補助金のご案内", 100), "補助金のご案内");
    }

    #[test]
    fn long_text_is_cut_at_char_boundary() {
        let text = "住宅補助金制度".repeat(100);
        let truncated = truncate_chars(&text, 10);
        assert_eq!(truncated.chars().count(), 11); // 10 chars + ellipsis
        assert!(truncated.ends_with('…'));
        assert!(truncated.starts_with("住宅補助金制度住宅補"));
    }

    #[test]
    fn exact_length_is_not_marked_truncated() {
        let text = "abcde";
        assert_eq!(truncate_chars(text, 5), "abcde");
    }

    #[test]
    fn empty_html_cleans_to_empty() {
        assert_eq!(clean_for_model("", "https://example.jp", 100), "");
        assert_eq!(clean_for_model("   ", "https://example.jp", 100), "");
    }

    #[test]
    fn prepare_falls_back_to_raw_markup() {
        // Too small for readability extraction; the raw markup is still usable.
        let html = "<p>補助金</p>";
        let prepared = prepare_for_model(html, "https://example.jp", 100);
        assert!(!prepared.is_empty());
    }

    #[test]
    fn prepare_of_empty_page_is_empty() {
        assert_eq!(prepare_for_model("", "https://example.jp", 100), "");
    }
}
