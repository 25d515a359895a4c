//! Token-budgeted markdown export of search results.
//!
//! Results are rendered one block each, in ranked order, until the next
//! block would push the estimated token count past the budget. The summary
//! footer is always appended and does not count against the budget.

use std::fmt::Write as _;

use crate::{frontmatter, search::SearchResult};

/// Metadata keys shown on a block's metadata line, with their labels.
const METADATA_FIELDS: &[(&str, &str)] = &[
    ("subject", "Subject"),
    ("source", "Source"),
    ("created_at", "Created"),
    ("tags", "Tags"),
];

/// Most URLs listed under a block's sources.
pub const MAX_SOURCES: usize = 5;

/// Estimates how many model tokens a piece of text costs.
pub trait TokenEstimator {
    fn estimate(&self, text: &str) -> usize;
}

/// Four characters per token.
#[derive(Debug, Default, Clone, Copy)]
pub struct CharEstimator;

impl TokenEstimator for CharEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.chars().count() / 4
    }
}

/// A rendered export and the numbers behind its summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextReport {
    pub markdown: String,
    pub total_found: usize,
    pub included: usize,
    /// Estimated tokens of the included result blocks.
    pub estimated_tokens: usize,
}

impl ContextReport {
    pub fn omitted(&self) -> usize {
        self.total_found - self.included
    }
}

/// Render `results` as markdown within `max_tokens`, using [`CharEstimator`].
pub fn format_context(
    results: &[SearchResult],
    query: &str,
    max_tokens: usize,
    include_metadata: bool,
) -> String {
    build_context(&CharEstimator, results, query, max_tokens, include_metadata)
        .markdown
}

/// Render `results` as markdown within `max_tokens` as measured by
/// `estimator`.
pub fn build_context(
    estimator: &dyn TokenEstimator,
    results: &[SearchResult],
    query: &str,
    max_tokens: usize,
    include_metadata: bool,
) -> ContextReport {
    let mut out = String::new();
    let _ = writeln!(out, "# Knowledge Base Context\n");
    let _ = writeln!(out, "**Query:** {query}\n");
    out.push_str("---\n\n");

    let mut used = 0usize;
    let mut included = 0usize;
    for result in results {
        let block = render_block(result, include_metadata);
        let cost = estimator.estimate(&block);
        if used + cost > max_tokens {
            break;
        }
        out.push_str(&block);
        used += cost;
        included += 1;
    }

    let omitted = results.len() - included;
    if omitted > 0 {
        tracing::debug!(included, omitted, max_tokens, "context truncated");
        let _ = writeln!(
            out,
            "*{omitted} more result(s) omitted to stay within the \
             {max_tokens}-token budget.*\n"
        );
    }

    out.push_str("## Summary\n\n");
    let _ = writeln!(out, "- Total results found: {}", results.len());
    let _ = writeln!(out, "- Results included: {included}");
    let _ = writeln!(out, "- Estimated tokens: {used}");

    ContextReport {
        markdown: out,
        total_found: results.len(),
        included,
        estimated_tokens: used,
    }
}

fn render_block(result: &SearchResult, include_metadata: bool) -> String {
    let mut block = String::new();
    let _ = writeln!(block, "## {}. {}\n", result.rank, result.title);
    let _ = writeln!(
        block,
        "**Score:** {:.3} | **ID:** `{}`",
        result.score, result.id
    );

    if include_metadata && let Some(line) = metadata_line(result) {
        let _ = writeln!(block, "{line}");
    }
    block.push('\n');

    let text = result.text.trim();
    if !text.is_empty() {
        let _ = writeln!(block, "{text}\n");
    }

    let sources = source_urls(result);
    if !sources.is_empty() {
        block.push_str("**Sources:**\n");
        for url in sources {
            let _ = writeln!(block, "- {url}");
        }
        block.push('\n');
    }

    block.push_str("---\n\n");
    block
}

fn metadata_line(result: &SearchResult) -> Option<String> {
    let parts: Vec<String> = METADATA_FIELDS
        .iter()
        .filter_map(|(key, label)| {
            let value = result.metadata.get(*key)?;
            let value = if *key == "tags" {
                frontmatter::string_list(value).join(", ")
            } else {
                value.trim().to_string()
            };
            (!value.is_empty()).then(|| format!("{label}: {value}"))
        })
        .collect();

    if parts.is_empty() {
        None
    } else {
        Some(format!("**Metadata:** {}", parts.join(" | ")))
    }
}

/// Up to [`MAX_SOURCES`] URLs from the `urls` list, else the single `url`.
fn source_urls(result: &SearchResult) -> Vec<String> {
    let mut urls = result
        .metadata
        .get("urls")
        .map(|v| frontmatter::string_list(v))
        .unwrap_or_default();
    if urls.is_empty()
        && let Some(url) = result.metadata.get("url")
    {
        urls = frontmatter::string_list(url);
    }
    urls.truncate(MAX_SOURCES);
    urls
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn result(rank: usize, id: &str, text: &str) -> SearchResult {
        SearchResult {
            rank,
            id: id.to_string(),
            score: 1.0 / rank as f32,
            title: format!("Title {id}"),
            text: text.to_string(),
            metadata: BTreeMap::new(),
        }
    }

    fn with_meta(mut r: SearchResult, pairs: &[(&str, &str)]) -> SearchResult {
        for (k, v) in pairs {
            r.metadata.insert(k.to_string(), v.to_string());
        }
        r
    }

    /// Counts one token per character, to make budgets easy to reason about.
    struct PerChar;

    impl TokenEstimator for PerChar {
        fn estimate(&self, text: &str) -> usize {
            text.chars().count()
        }
    }

    #[test]
    fn char_estimator_divides_chars_by_four() {
        assert_eq!(CharEstimator.estimate(""), 0);
        assert_eq!(CharEstimator.estimate("abcdefgh"), 2);
        assert_eq!(CharEstimator.estimate("abc"), 0);
        assert_eq!(CharEstimator.estimate(&"é".repeat(400)), 100);
        assert_eq!(CharEstimator.estimate("日本語の本"), 1);
    }

    #[test]
    fn budget_limits_content_blocks() {
        let results: Vec<_> = (1..=10)
            .map(|i| result(i, &format!("doc{i}"), &"word ".repeat(400)))
            .collect();

        let report = build_context(&CharEstimator, &results, "q", 1000, true);

        assert!(report.estimated_tokens <= 1000);
        assert!(report.included >= 1 && report.included < 10);
        assert_eq!(report.total_found, 10);
        assert_eq!(report.omitted(), 10 - report.included);

        let blocks: usize = results[..report.included]
            .iter()
            .map(|r| CharEstimator.estimate(&render_block(r, true)))
            .sum();
        assert_eq!(blocks, report.estimated_tokens);
        assert!(report.markdown.contains(&format!(
            "{} more result(s) omitted",
            report.omitted()
        )));
    }

    #[test]
    fn everything_fits_without_truncation_note() {
        let results = vec![result(1, "a", "alpha"), result(2, "b", "beta")];
        let report =
            build_context(&CharEstimator, &results, "q", 50_000, true);

        assert_eq!(report.included, 2);
        assert!(!report.markdown.contains("omitted"));
    }

    #[test]
    fn blocks_keep_ranked_order() {
        let results = vec![
            result(1, "zeta", "last alphabetically"),
            result(2, "alpha", "first alphabetically"),
            result(3, "mid", "middle"),
        ];
        let out = format_context(&results, "q", 50_000, false);

        let zeta = out.find("`zeta`").unwrap();
        let alpha = out.find("`alpha`").unwrap();
        let mid = out.find("`mid`").unwrap();
        assert!(zeta < alpha && alpha < mid);
    }

    #[test]
    fn summary_is_always_last() {
        let results = vec![result(1, "a", &"x".repeat(400))];
        let out = format_context(&results, "q", 10, true);

        assert!(out.trim_end().ends_with("- Estimated tokens: 0"));
        assert!(out.contains("- Total results found: 1"));
        assert!(out.contains("- Results included: 0"));

        let empty = format_context(&[], "q", 10, true);
        assert!(empty.contains("- Total results found: 0"));
    }

    #[test]
    fn custom_estimator_changes_budgeting() {
        let results = vec![result(1, "a", "alpha"), result(2, "b", "beta")];
        let one_block = PerChar.estimate(&render_block(&results[0], false));

        let report =
            build_context(&PerChar, &results, "q", one_block, false);
        assert_eq!(report.included, 1);
        assert_eq!(report.estimated_tokens, one_block);
    }

    #[test]
    fn metadata_line_needs_flag_and_known_keys() {
        let tagged = with_meta(
            result(1, "a", "body"),
            &[
                ("source", "twitter"),
                ("tags", r#"["art","nft"]"#),
                ("filepath", "a.md"),
            ],
        );

        let shown = format_context(&[tagged.clone()], "q", 50_000, true);
        assert!(
            shown.contains("**Metadata:** Source: twitter | Tags: art, nft")
        );
        assert!(!shown.contains("a.md"));

        let hidden = format_context(&[tagged], "q", 50_000, false);
        assert!(!hidden.contains("**Metadata:**"));

        let only_path =
            with_meta(result(1, "b", "body"), &[("filepath", "b.md")]);
        let out = format_context(&[only_path], "q", 50_000, true);
        assert!(!out.contains("**Metadata:**"));
    }

    #[test]
    fn sources_are_capped() {
        let urls: Vec<String> =
            (0..8).map(|i| format!("https://example.com/{i}")).collect();
        let encoded = serde_json::to_string(&urls).unwrap();
        let r =
            with_meta(result(1, "a", "body"), &[("urls", encoded.as_str())]);

        let out = format_context(&[r], "q", 50_000, true);
        assert!(out.contains("**Sources:**"));
        assert!(out.contains("https://example.com/4"));
        assert!(!out.contains("https://example.com/5"));
    }

    #[test]
    fn single_url_is_a_source() {
        let r = with_meta(result(1, "a", "body"), &[("url", "https://x.io")]);
        let out = format_context(&[r], "q", 50_000, true);
        assert!(out.contains("**Sources:**\n- https://x.io\n"));
    }
}
