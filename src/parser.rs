//! Splitting a Markdown document into typed sections and selecting the ones
//! to walk through.

use crate::error::DirectiveError;
use crate::prompt::{PROMPT_PREFIX, parse_prompt};
use crate::tags::{TAGS_PREFIX, has_always_tag, matches_requested, parse_tags};
use regex::Regex;
use std::io::Write;
use std::sync::LazyLock;

/// Delimiter that opens and closes a code fence.
pub const CODE_FENCE: &str = "```";

static HYPHEN_RUNS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("-+").expect("hyphen regex is valid"));

/// What a section holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    /// A `#` heading line followed by the plain lines up to the next boundary.
    Header,
    /// Plain lines that do not follow a heading directly.
    Text,
    /// A fenced code block, fences included.
    Code,
    /// A single `[prompt]:#` directive line.
    Prompt,
}

/// One contiguous, typed chunk of the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub kind: SectionKind,
    /// Raw lines, verbatim.
    pub lines: Vec<String>,
    /// Tags in effect for this chunk.
    pub tags: Vec<String>,
}

impl Section {
    fn new(kind: SectionKind, tags: Vec<String>) -> Self {
        Self {
            kind,
            lines: Vec::new(),
            tags,
        }
    }

    /// Heading text and level for a `Header` section.
    pub fn heading(&self) -> Option<(&str, usize)> {
        match (self.kind, self.lines.first()) {
            (SectionKind::Header, Some(line)) => Some(heading_text(line)),
            _ => None,
        }
    }

    /// Language tag written after the opening fence, if any.
    pub fn fence_language(&self) -> Option<&str> {
        if self.kind != SectionKind::Code {
            return None;
        }
        let language = self.lines.first()?.trim().strip_prefix(CODE_FENCE)?.trim();
        (!language.is_empty()).then_some(language)
    }

    /// Lines between the fences of a `Code` section.
    ///
    /// A block left open at the end of the document has no closing fence to
    /// drop.
    pub fn code_body(&self) -> &[String] {
        if self.kind != SectionKind::Code || self.lines.is_empty() {
            return &[];
        }
        let body = &self.lines[1..];
        match body.last() {
            Some(last) if last.trim().starts_with(CODE_FENCE) => &body[..body.len() - 1],
            _ => body,
        }
    }
}

/// Text and level (number of leading `#`) of a heading line.
pub fn heading_text(line: &str) -> (&str, usize) {
    let trimmed = line.trim();
    let level = trimmed.chars().take_while(|&c| c == '#').count();
    (trimmed.trim_start_matches('#').trim(), level)
}

/// Convert heading text into its Markdown anchor.
///
/// Lowercases, keeps letters, digits, spaces and hyphens, turns spaces into
/// hyphens and collapses repeated hyphens. Normalizing an anchor again
/// returns it unchanged.
pub fn normalize_anchor(heading: &str) -> String {
    let kept: String = heading
        .to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == ' ' || *c == '-')
        .map(|c| if c == ' ' { '-' } else { c })
        .collect();
    HYPHEN_RUNS.replace_all(&kept, "-").into_owned()
}

/// Line-by-line state while cutting the document into sections.
struct Segmenter {
    sections: Vec<Section>,
    current: Section,
    pending_tags: Vec<String>,
    in_code_block: bool,
}

impl Segmenter {
    fn new() -> Self {
        Self {
            sections: Vec::new(),
            current: Section::new(SectionKind::Text, Vec::new()),
            pending_tags: Vec::new(),
            in_code_block: false,
        }
    }

    fn segment(mut self, document: &str) -> Result<Vec<Section>, DirectiveError> {
        for line in document.lines() {
            self.feed(line)?;
        }
        self.flush();
        Ok(self.sections)
    }

    fn feed(&mut self, line: &str) -> Result<(), DirectiveError> {
        let trimmed = line.trim();

        // Tags directives are consumed everywhere, inside fences too.
        if trimmed.starts_with(TAGS_PREFIX) {
            self.pending_tags.extend(parse_tags(trimmed)?);
            self.current.tags = self.pending_tags.clone();
            return Ok(());
        }

        // Everything else inside a fence is snippet body.
        if self.in_code_block {
            self.current.lines.push(line.to_string());
            if trimmed.starts_with(CODE_FENCE) {
                self.in_code_block = false;
                self.start(SectionKind::Text);
            }
            return Ok(());
        }

        if trimmed.starts_with(CODE_FENCE) {
            self.start(SectionKind::Code);
            self.current.lines.push(line.to_string());
            self.in_code_block = true;
            return Ok(());
        }

        if trimmed.starts_with('#') {
            self.start(SectionKind::Header);
            self.current.lines.push(line.to_string());
            self.pending_tags.clear();
            return Ok(());
        }

        if trimmed.starts_with(PROMPT_PREFIX) {
            parse_prompt(trimmed)?;
            self.start(SectionKind::Prompt);
            self.current.lines.push(line.to_string());
            self.start(SectionKind::Text);
            return Ok(());
        }

        self.current.lines.push(line.to_string());
        Ok(())
    }

    /// Flush the current section and open a new one carrying the pending tags.
    fn start(&mut self, kind: SectionKind) {
        let next = Section::new(kind, self.pending_tags.clone());
        let finished = std::mem::replace(&mut self.current, next);
        if !finished.lines.is_empty() {
            self.sections.push(finished);
        }
    }

    fn flush(&mut self) {
        if !self.current.lines.is_empty() {
            let last = std::mem::replace(&mut self.current, Section::new(SectionKind::Text, Vec::new()));
            self.sections.push(last);
        }
    }
}

/// Cut the document into sections without any filtering.
///
/// Fails on the first malformed `[tags]:#` or `[prompt]:#` directive.
pub fn segment_sections(document: &str) -> Result<Vec<Section>, DirectiveError> {
    Segmenter::new().segment(document)
}

/// Keep the sections from the start anchor on that match the requested tags.
///
/// Sections tagged `always` are kept regardless of position or tags, but an
/// anchor that matches no heading yields nothing at all.
pub fn filter_sections(sections: Vec<Section>, start_anchor: &str, tags: &[String]) -> Vec<Section> {
    let mut started = start_anchor.is_empty();
    let mut filtered = Vec::new();
    for section in sections {
        if !started {
            if let Some((text, _)) = section.heading() {
                started = normalize_anchor(text) == start_anchor;
            }
        }
        if has_always_tag(&section.tags) || (started && matches_requested(&section.tags, tags)) {
            filtered.push(section);
        }
    }

    if started {
        filtered
    } else {
        tracing::debug!(anchor = start_anchor, "start anchor matched no heading");
        Vec::new()
    }
}

/// Segment the document and select the sections to walk through.
pub fn parse_sections(
    document: &str,
    start_anchor: &str,
    tags: &[String],
) -> Result<Vec<Section>, DirectiveError> {
    let sections = segment_sections(document)?;
    Ok(filter_sections(sections, start_anchor, tags))
}

/// Write one `- heading (anchor)` line per heading, indented by level.
pub fn print_toc(out: &mut dyn Write, document: &str) -> anyhow::Result<()> {
    for section in segment_sections(document)? {
        if let Some((text, level)) = section.heading() {
            let indent = "  ".repeat(level.saturating_sub(1));
            writeln!(out, "{indent}- {text} ({})", normalize_anchor(text))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MARKDOWN: &str = "# Title
[tags]:# (always)
some content

## Section One

[tags]:# (foo bar)

```bash
echo \"Hello, world!\"
```

### Subsection

[tags]:# (bar)
[prompt]:# (name \"What is your name?\")
";

    fn section(kind: SectionKind, lines: &[&str], tags: &[&str]) -> Section {
        Section {
            kind,
            lines: lines.iter().map(|s| s.to_string()).collect(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn title() -> Section {
        section(SectionKind::Header, &["# Title", "some content", ""], &["always"])
    }

    fn section_one() -> Vec<Section> {
        vec![
            section(SectionKind::Header, &["## Section One", "", ""], &["foo", "bar"]),
            section(
                SectionKind::Code,
                &["```bash", "echo \"Hello, world!\"", "```"],
                &["foo", "bar"],
            ),
            section(SectionKind::Text, &[""], &["foo", "bar"]),
        ]
    }

    fn subsection() -> Vec<Section> {
        vec![
            section(SectionKind::Header, &["### Subsection", ""], &["bar"]),
            section(
                SectionKind::Prompt,
                &["[prompt]:# (name \"What is your name?\")"],
                &["bar"],
            ),
        ]
    }

    fn parse(start: &str, tags: &[&str]) -> Vec<Section> {
        let tags: Vec<String> = tags.iter().map(|s| s.to_string()).collect();
        parse_sections(MARKDOWN, start, &tags).unwrap()
    }

    #[test]
    fn test_empty_document() {
        assert!(parse_sections("", "", &[]).unwrap().is_empty());
        assert!(parse_sections("", "title", &[]).unwrap().is_empty());
        assert!(parse_sections("\n\n", "", &["foo".to_string()]).unwrap().is_empty());
    }

    #[test]
    fn test_all_sections_in_order() {
        let mut expected = vec![title()];
        expected.extend(section_one());
        expected.extend(subsection());
        assert_eq!(parse("", &[]), expected);
    }

    #[test]
    fn test_start_anchor_skips_to_heading() {
        let mut expected = vec![title()];
        expected.extend(subsection());
        assert_eq!(parse("subsection", &[]), expected);
    }

    #[test]
    fn test_requested_tags_select_sections() {
        let mut expected = vec![title()];
        expected.extend(section_one());
        assert_eq!(parse("", &["foo"]), expected);
    }

    #[test]
    fn test_tags_and_start_anchor_combine() {
        let mut expected = vec![title()];
        expected.extend(subsection());
        assert_eq!(parse("subsection", &["bar"]), expected);
        assert_eq!(parse("subsection", &["baz"]), vec![title()]);
    }

    #[test]
    fn test_unknown_anchor_yields_nothing() {
        assert!(parse("baz", &[""]).is_empty());
        assert!(parse("baz", &["baz"]).is_empty());
        assert!(parse("nonexistent", &["always"]).is_empty());
    }

    #[test]
    fn test_always_sections_survive_any_tag_request() {
        for tags in [&[][..], &["foo"][..], &["nope"][..], &["always"][..]] {
            for start in ["", "section-one", "subsection"] {
                let got = parse(start, tags);
                assert_eq!(got.first(), Some(&title()), "start {start:?} tags {tags:?}");
            }
        }
    }

    #[test]
    fn test_tags_do_not_leak_past_a_later_header() {
        let doc = "# One\n[tags]:# (setup)\ntext\n```bash\necho one\n```\n# Two\nmore\n```bash\necho two\n```\nafter\n";
        let sections = segment_sections(doc).unwrap();
        let after_two: Vec<&Section> = sections
            .iter()
            .skip_while(|s| s.lines.first().map(String::as_str) != Some("# Two"))
            .skip(1)
            .collect();
        assert_eq!(after_two.len(), 2);
        for section in after_two {
            assert!(section.tags.is_empty(), "{section:?} inherited stale tags");
        }
        assert_eq!(segment_sections(doc).unwrap()[1].tags, vec!["setup"]);
    }

    #[test]
    fn test_consecutive_tag_directives_accumulate() {
        let doc = "# Head\n[tags]:# (a)\n[tags]:# (b c)\n```sh\ntrue\n```\n";
        let sections = segment_sections(doc).unwrap();
        assert_eq!(sections[0].tags, vec!["a", "b", "c"]);
        assert_eq!(sections[1].tags, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fence_body_is_verbatim() {
        let doc = "```bash\n# not a heading\n[prompt]:# (broken\n```\n";
        let sections = segment_sections(doc).unwrap();
        assert_eq!(sections.len(), 1);
        let code = &sections[0];
        assert_eq!(code.kind, SectionKind::Code);
        assert!(code.tags.is_empty());
        assert_eq!(code.fence_language(), Some("bash"));
        assert_eq!(code.code_body(), ["# not a heading", "[prompt]:# (broken"]);
    }

    #[test]
    fn test_tags_directive_inside_fence_is_consumed() {
        let sections = segment_sections("# H\n```bash\n[tags]:# (x)\necho hi\n```\n").unwrap();
        for section in &sections {
            assert!(
                section.lines.iter().all(|line| !line.trim().starts_with(TAGS_PREFIX)),
                "{section:?} kept a tags directive"
            );
        }
        let code = &sections[1];
        assert_eq!(code.kind, SectionKind::Code);
        assert_eq!(code.lines, ["```bash", "echo hi", "```"]);
        assert_eq!(code.tags, vec!["x"]);
    }

    #[test]
    fn test_unterminated_fence_keeps_its_body() {
        let sections = segment_sections("```\necho hi").unwrap();
        assert_eq!(sections[0].fence_language(), None);
        assert_eq!(sections[0].code_body(), ["echo hi"]);
    }

    #[test]
    fn test_prompt_splits_text() {
        let doc = "before\n[prompt]:# (name \"Name?\")\nafter\n";
        let kinds: Vec<SectionKind> = segment_sections(doc).unwrap().iter().map(|s| s.kind).collect();
        assert_eq!(kinds, vec![SectionKind::Text, SectionKind::Prompt, SectionKind::Text]);
    }

    #[test]
    fn test_malformed_directives_fail_the_parse() {
        let err = parse_sections("# A\n[tags]:# ()\n", "", &[]).unwrap_err();
        assert!(matches!(err, DirectiveError::InvalidTags { .. }));
        let err = parse_sections("# A\n[prompt]:# (name)\n", "", &[]).unwrap_err();
        assert!(matches!(err, DirectiveError::InvalidPrompt { .. }));
    }

    #[test]
    fn test_heading_text_and_level() {
        assert_eq!(heading_text("### Subsection  "), ("Subsection", 3));
        assert_eq!(heading_text("  # Title"), ("Title", 1));
    }

    #[test]
    fn test_anchors() {
        assert_eq!(normalize_anchor("Section One"), "section-one");
        assert_eq!(normalize_anchor("What's new?  (v2.0)"), "whats-new-v20");
        assert_eq!(normalize_anchor("a - b"), "a-b");
        assert_eq!(normalize_anchor("Ünïcode Straße"), "ünïcode-straße");
    }

    #[test]
    fn test_anchor_normalization_is_idempotent() {
        for heading in [
            "Section One",
            "  Leading and trailing  ",
            "Symbols !@#$%^&*() and -- dashes",
            "MiXeD CaSe 123",
            "İstanbul",
            "---",
            "",
        ] {
            let once = normalize_anchor(heading);
            assert_eq!(normalize_anchor(&once), once, "heading {heading:?}");
        }
    }

    #[test]
    fn test_table_of_contents() {
        let doc = "# Title\n## Section One\nSome text.\n### Subsection\nMore text.\n## Section Two\n";
        let mut out = Vec::new();
        print_toc(&mut out, doc).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "- Title (title)\n  - Section One (section-one)\n    - Subsection (subsection)\n  - Section Two (section-two)\n"
        );
    }
}
