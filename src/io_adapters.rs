use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::collections::VecDeque;
use std::io::{Result as IoResult, Write};

/// Source of operator answers.
///
/// Every question the walkthrough asks goes through this trait, so the
/// interactive terminal can be swapped for scripted answers in tests.
pub trait Prompter {
    /// Show `message` and return the operator's answer with surrounding
    /// whitespace removed.
    fn prompt(&mut self, message: &str) -> anyhow::Result<String>;
}

/// The operator closed the input (Ctrl-D) or interrupted it (Ctrl-C).
#[derive(Debug, thiserror::Error)]
#[error("input closed")]
pub struct InputClosed;

/// Interactive prompt backed by a rustyline editor.
pub struct ReadlinePrompt {
    editor: DefaultEditor,
}

impl ReadlinePrompt {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
        })
    }
}

impl Prompter for ReadlinePrompt {
    fn prompt(&mut self, message: &str) -> anyhow::Result<String> {
        // rustyline edits a single line; anything before the last newline is
        // printed ahead of it.
        let prompt = match message.rsplit_once('\n') {
            Some((preamble, last)) => {
                println!("{preamble}");
                last
            }
            None => message,
        };
        match self.editor.readline(prompt) {
            Ok(line) => {
                let answer = line.trim().to_string();
                if !answer.is_empty() {
                    self.editor.add_history_entry(answer.as_str())?;
                }
                Ok(answer)
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => Err(InputClosed.into()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Prompter that replays canned answers and records every question.
///
/// Once the answers run out it keeps answering with an empty string, which
/// selects the default of every question.
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    responses: VecDeque<String>,
    messages: Vec<String>,
}

impl ScriptedPrompt {
    pub fn new<I, S>(responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            responses: responses.into_iter().map(Into::into).collect(),
            messages: Vec::new(),
        }
    }

    /// Questions asked so far, in order.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    /// Number of answers not consumed yet.
    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl Prompter for ScriptedPrompt {
    fn prompt(&mut self, message: &str) -> anyhow::Result<String> {
        self.messages.push(message.to_string());
        Ok(self
            .responses
            .pop_front()
            .map(|answer| answer.trim().to_string())
            .unwrap_or_default())
    }
}

/// Writer that copies everything to two destinations, e.g. stdout and a
/// transcript file.
pub struct Tee<A, B> {
    primary: A,
    mirror: B,
}

impl<A: Write, B: Write> Tee<A, B> {
    pub fn new(primary: A, mirror: B) -> Self {
        Self { primary, mirror }
    }

    pub fn into_inner(self) -> (A, B) {
        (self.primary, self.mirror)
    }
}

impl<A: Write, B: Write> Write for Tee<A, B> {
    fn write(&mut self, data: &[u8]) -> IoResult<usize> {
        self.primary.write_all(data)?;
        self.mirror.write_all(data)?;
        Ok(data.len())
    }

    fn flush(&mut self) -> IoResult<()> {
        self.primary.flush()?;
        self.mirror.flush()
    }
}
