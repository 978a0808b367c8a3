use std::collections::HashMap;
use std::env as stdenv;
use std::path::PathBuf;

/// Variables and working directory shared by prompt resolution and the
/// shells that run snippets.
///
/// Prompt answers are written here instead of into the process environment;
/// every shell is spawned from this view and kept in sync with it before
/// each snippet.
#[derive(Debug, Clone)]
pub struct Environment {
    /// Variables visible to snippets.
    pub vars: HashMap<String, String>,
    /// Directory new shells start in.
    pub current_dir: PathBuf,
}

impl Environment {
    /// Capture the current process variables and working directory.
    ///
    /// Variables whose name or value is not valid UTF-8 are left out.
    pub fn new() -> Self {
        let current_dir = stdenv::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        let vars = stdenv::vars_os()
            .filter_map(|(key, val)| match (key.into_string(), val.into_string()) {
                (Ok(key), Ok(val)) => Some((key, val)),
                (key, _) => {
                    tracing::debug!(var = ?key, "skipping non UTF-8 environment variable");
                    None
                }
            })
            .collect();
        Self { vars, current_dir }
    }

    /// An environment with no variables, rooted at `current_dir`.
    pub fn empty(current_dir: impl Into<PathBuf>) -> Self {
        Self {
            vars: HashMap::new(),
            current_dir: current_dir.into(),
        }
    }

    pub fn get_var(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// Set or override a variable.
    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// Apply a batch of prompt answers.
    pub fn extend<I, K, V>(&mut self, answers: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, val) in answers {
            self.set_var(key, val);
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
