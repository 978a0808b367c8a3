//! `[prompt]:#` directives: parsing and resolving operator answers.

use crate::error::DirectiveError;
use crate::io_adapters::Prompter;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Prefix that marks a line as a prompt directive.
pub const PROMPT_PREFIX: &str = "[prompt]:#";

// name, "text", optional [options], optional default, in that order. Names
// are ASCII shell identifiers so that every answer can be exported.
static PROMPT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\[prompt\]:#\s*\(\s*([A-Za-z_][A-Za-z0-9_]*)\s+"([^"]+)"\s*(\[[^\]]*\])?\s*(\S+)?\s*\)$"#)
        .expect("prompt directive regex is valid")
});

/// A question bound to an environment variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    /// Variable that receives the answer.
    pub var_name: String,
    /// Question shown to the operator.
    pub text: String,
    /// Accepted answers; empty means anything goes.
    pub options: Vec<String>,
    /// Answer used when the operator just presses Enter.
    pub default: Option<String>,
}

impl Prompt {
    /// Question as shown to the operator, e.g.
    /// `Pick one (options: a, b) [default: a]: `.
    pub fn message(&self) -> String {
        let mut message = self.text.clone();
        if !self.options.is_empty() {
            message.push_str(&format!(" (options: {})", self.options.join(", ")));
        }
        if let Some(default) = &self.default {
            message.push_str(&format!(" [default: {default}]"));
        }
        message.push_str(": ");
        message
    }

    /// Apply the default to an empty answer and check it against the options.
    pub fn resolve(&self, response: &str) -> Result<String, DirectiveError> {
        let response = match (&self.default, response.is_empty()) {
            (Some(default), true) => default.as_str(),
            _ => response,
        };
        if !self.options.is_empty() && !self.options.iter().any(|opt| opt == response) {
            return Err(DirectiveError::InvalidResponse {
                var: self.var_name.clone(),
                options: self.options.clone(),
            });
        }
        Ok(response.to_string())
    }
}

/// Parse a single trimmed prompt directive line.
pub fn parse_prompt(line: &str) -> Result<Prompt, DirectiveError> {
    let captures = PROMPT_RE
        .captures(line)
        .ok_or_else(|| DirectiveError::InvalidPrompt {
            line: line.to_string(),
        })?;

    let options = captures
        .get(3)
        .map(|group| {
            group
                .as_str()
                .trim_start_matches('[')
                .trim_end_matches(']')
                .split_whitespace()
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();

    Ok(Prompt {
        var_name: captures[1].to_string(),
        text: captures[2].to_string(),
        options,
        default: captures.get(4).map(|group| group.as_str().to_string()),
    })
}

/// Ask every prompt directive in `lines` and collect `name -> answer`.
///
/// Lines that are not prompt directives are ignored. The first malformed
/// directive or rejected answer aborts the whole batch; errors are
/// [`DirectiveError`]s so callers can tell them apart from prompter failures.
pub fn process_prompt<S: AsRef<str>>(
    prompter: &mut dyn Prompter,
    lines: &[S],
) -> anyhow::Result<HashMap<String, String>> {
    let mut answers = HashMap::new();
    for line in lines {
        let line = line.as_ref().trim();
        if !line.starts_with(PROMPT_PREFIX) {
            continue;
        }
        let prompt = parse_prompt(line)?;
        let response = prompter.prompt(&format!("\n{}", prompt.message()))?;
        let value = prompt.resolve(&response)?;
        tracing::debug!(var = %prompt.var_name, "prompt answered");
        answers.insert(prompt.var_name, value);
    }
    Ok(answers)
}
