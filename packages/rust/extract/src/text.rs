//! Visible-text extraction from HTML and snippet building.

use std::sync::LazyLock;

use regex::Regex;
use scraper::Html;

/// Elements whose text never reaches the classifier.
const SKIPPED_TAGS: &[&str] = &[
    "script", "style", "nav", "header", "footer", "noscript", "template",
];

/// Default snippet length in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;

/// Placeholder snippet when there is no text at all.
pub const EMPTY_SNIPPET: &str = "No content available";

static RE_WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// Extract the visible text of an HTML document.
///
/// Text inside script, style, navigation, header and footer elements is
/// dropped. Text nodes are joined with single spaces.
pub fn html_to_text(html: &str) -> String {
    let doc = Html::parse_document(html);

    let mut parts: Vec<&str> = Vec::new();
    for node in doc.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let skipped = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| SKIPPED_TAGS.contains(&el.name()))
        });
        if skipped {
            continue;
        }
        let trimmed = text.trim();
        if !trimmed.is_empty() {
            parts.push(trimmed);
        }
    }

    collapse_whitespace(&parts.join(" "))
}

/// Replace every whitespace run with a single space and trim the ends.
pub fn collapse_whitespace(text: &str) -> String {
    RE_WHITESPACE.replace_all(text.trim(), " ").into_owned()
}

/// Short display excerpt of `text`.
///
/// Whitespace is collapsed. Text longer than `max_chars` is cut, preferably at
/// a word boundary in the last fifth, and suffixed with `...`.
pub fn snippet(text: &str, max_chars: usize) -> String {
    let cleaned = collapse_whitespace(text);
    if cleaned.is_empty() {
        return EMPTY_SNIPPET.to_string();
    }
    if cleaned.chars().count() <= max_chars {
        return cleaned;
    }

    let cut: String = cleaned.chars().take(max_chars).collect();
    let boundary = cut
        .rfind(' ')
        .filter(|&idx| cut[..idx].chars().count() * 5 > max_chars * 4);

    match boundary {
        Some(idx) => format!("{}...", &cut[..idx]),
        None => format!("{cut}..."),
    }
}

/// Truncate to at most `max_chars` characters.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_chrome_and_scripts() {
        let html = r#"<html><head><title>Acme</title><style>body { color: red }</style></head>
            <body>
              <header><a href="/">Home</a></header>
              <nav><ul><li>Pricing</li></ul></nav>
              <main><h1>Welcome to Acme</h1><p>We build   rockets.</p></main>
              <script>trackVisitor();</script>
              <footer>Copyright 2024</footer>
            </body></html>"#;

        let text = html_to_text(html);
        assert_eq!(text, "Acme Welcome to Acme We build rockets.");
    }

    #[test]
    fn empty_document_yields_empty_text() {
        assert_eq!(html_to_text(""), "");
        assert_eq!(html_to_text("<html><body><script>x()</script></body></html>"), "");
    }

    #[test]
    fn snippet_short_text_is_unchanged() {
        assert_eq!(snippet("  Sign in\n\nto your account ", 200), "Sign in to your account");
    }

    #[test]
    fn snippet_empty_text_uses_placeholder() {
        assert_eq!(snippet("   \n ", 200), EMPTY_SNIPPET);
    }

    #[test]
    fn snippet_cuts_at_word_boundary() {
        let text = "word ".repeat(60);
        let s = snippet(&text, 200);
        assert!(s.ends_with("..."));
        let body = s.trim_end_matches("...");
        assert!(body.chars().count() <= 200);
        assert!(body.ends_with("word"));
    }

    #[test]
    fn snippet_hard_cut_without_nearby_space() {
        let text = format!("intro {}", "x".repeat(300));
        let s = snippet(&text, 200);
        assert_eq!(s.chars().count(), 203);
        assert!(s.starts_with("intro x"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
