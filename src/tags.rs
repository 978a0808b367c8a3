//! Parsing of `[tags]:# (a b c)` directives.

use crate::error::DirectiveError;
use regex::Regex;
use std::sync::LazyLock;

/// Prefix that marks a line as a tags directive.
pub const TAGS_PREFIX: &str = "[tags]:#";

/// Tag that keeps a section in every filtered run.
pub const ALWAYS_TAG: &str = "always";

static TAGS_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[tags\]:#\s*\(\s*([^)]+)\s*\)$").expect("tags directive regex is valid")
});

/// Parse a trimmed tags directive line into its ordered tag list.
///
/// At least one tag is required: `[tags]:# ()` is rejected rather than
/// producing an empty list.
pub fn parse_tags(line: &str) -> Result<Vec<String>, DirectiveError> {
    let invalid = || DirectiveError::InvalidTags {
        line: line.to_string(),
    };
    let captures = TAGS_RE.captures(line).ok_or_else(invalid)?;
    let tags: Vec<String> = captures[1].split_whitespace().map(String::from).collect();
    if tags.is_empty() {
        return Err(invalid());
    }
    Ok(tags)
}

/// Whether the tag list contains the reserved `always` tag.
pub fn has_always_tag(tags: &[String]) -> bool {
    tags.iter().any(|tag| tag == ALWAYS_TAG)
}

/// Whether a section carrying `section_tags` is selected by `requested`.
///
/// An empty request selects everything; otherwise the section must share a
/// tag with the request or carry `always`.
pub fn matches_requested(section_tags: &[String], requested: &[String]) -> bool {
    if requested.is_empty() {
        return true;
    }
    section_tags
        .iter()
        .any(|tag| tag == ALWAYS_TAG || requested.contains(tag))
}
