use std::time::Duration;

/// How shells are started for each language family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunnerConfig {
    /// Interpreter for `bash` fences; `verify` fences use it too.
    pub bash_program: String,
    /// Interpreter for `sh` and `shell` fences.
    pub sh_program: String,
    /// Upper bound on a single snippet. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            bash_program: "bash".to_string(),
            sh_program: "sh".to_string(),
            timeout: None,
        }
    }
}

/// Which part of the document to walk.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Normalized anchor of the heading to start at; empty starts at the top.
    pub start_anchor: String,
    /// Only sections carrying one of these tags (or `always`) are shown.
    pub tags: Vec<String>,
}

impl RunOptions {
    pub fn new(start_anchor: impl Into<String>, tags: Vec<String>) -> Self {
        Self {
            start_anchor: start_anchor.into(),
            tags,
        }
    }
}

/// Split a comma separated `--tags` value, dropping blanks.
pub fn parse_tag_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|tag| !tag.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_list_parsing() {
        assert!(parse_tag_list("").is_empty());
        assert!(parse_tag_list(" , ").is_empty());
        assert_eq!(parse_tag_list("foo"), vec!["foo"]);
        assert_eq!(parse_tag_list(" foo, bar ,,baz"), vec!["foo", "bar", "baz"]);
    }

    #[test]
    fn test_default_programs() {
        let config = RunnerConfig::default();
        assert_eq!(config.bash_program, "bash");
        assert_eq!(config.sh_program, "sh");
        assert_eq!(config.timeout, None);
    }
}
