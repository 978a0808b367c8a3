//! Interactive Markdown walkthroughs with live shells.
//!
//! A document is cut into typed sections (headings, text, code fences and
//! `[prompt]:#` directives), optionally narrowed to a start heading and a set
//! of `[tags]:#`, and presented one section at a time. Code fences can be run
//! against persistent `bash`/`sh` processes so that state carries over from
//! one snippet to the next; `verify` fences report a Success/Failure verdict
//! from the snippet's exit status instead of its output.
//!
//! The main entry point is [`ReadmeRunner`]. Operator input comes from a
//! [`Prompter`], and everything shown to the operator goes to a plain
//! [`std::io::Write`] sink, so a whole walkthrough can be scripted in tests.

pub mod config;
pub mod env;
pub mod error;
pub mod io_adapters;
mod orchestrator;
pub mod parser;
pub mod prompt;
pub mod runner;
pub mod tags;

/// The walkthrough driver.
///
/// See [`ReadmeRunner::run_markdown`] for the interaction it implements.
pub use orchestrator::ReadmeRunner;

pub use config::{RunOptions, RunnerConfig};
pub use env::Environment;
pub use error::{DirectiveError, RunnerError};
pub use io_adapters::{InputClosed, Prompter, ReadlinePrompt, ScriptedPrompt, Tee};
