// src/utils/text.rs

//! Text cleanup helpers shared by the extractors and the digest.

use unicode_segmentation::UnicodeSegmentation;

/// Collapse whitespace and trim.
pub fn clean(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max` graphemes, appending an ellipsis when cut.
pub fn truncate(text: &str, max: usize) -> String {
    let graphemes: Vec<&str> = text.graphemes(true).collect();
    if graphemes.len() <= max {
        return text.to_string();
    }
    let mut out: String = graphemes[..max].concat();
    out.truncate(out.trim_end().len());
    out.push('…');
    out
}

/// Case-insensitive check for any of `needles` in `haystack`.
pub fn contains_any(haystack: &str, needles: &[String]) -> bool {
    let haystack = haystack.to_lowercase();
    needles
        .iter()
        .filter(|n| !n.is_empty())
        .any(|n| haystack.contains(&n.to_lowercase()))
}
