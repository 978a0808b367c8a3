use crate::config::{RunOptions, RunnerConfig};
use crate::env::Environment;
use crate::error::DirectiveError;
use crate::io_adapters::Prompter;
use crate::parser::{Section, SectionKind, parse_sections};
use crate::prompt::process_prompt;
use crate::runner::RunnerRegistry;
use anyhow::Context;
use std::io::Write;

const RUN_QUESTION: &str = "\n> Run code? (r=run, s=skip, x=exit) [default s]: ";
const RERUN_QUESTION: &str = "\n> Continue? (r=rerun, s=continue, x=exit) [default s]: ";
const NO_RUNNER_QUESTION: &str =
    "\n> No runner for this language or missing code fence language. Press Enter to continue: ";
const COMPLETE_BANNER: &str = "\n> README complete!";

/// Whether the walkthrough goes on after a section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Where a code block interaction stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CodeState {
    AwaitChoice,
    Running,
    Ran,
}

/// Walks a Markdown document section by section, asking the operator what to
/// do with every code block and prompt.
///
/// The runner owns the [`Environment`] that prompt answers are written to and
/// the [`RunnerRegistry`] whose shells see that environment.
///
/// Example
/// ```
/// use readme_runner::{ReadmeRunner, RunOptions, ScriptedPrompt};
/// let mut runner = ReadmeRunner::default();
/// let mut out = Vec::new();
/// let mut prompt = ScriptedPrompt::new(["exit"]);
/// runner
///     .run_markdown(b"# One\n# Two\n", &RunOptions::default(), &mut out, &mut prompt)
///     .unwrap();
/// assert_eq!(String::from_utf8(out).unwrap(), "# One\n");
/// ```
pub struct ReadmeRunner {
    env: Environment,
    runners: RunnerRegistry,
}

impl ReadmeRunner {
    pub fn new(env: Environment, runners: RunnerRegistry) -> Self {
        Self { env, runners }
    }

    pub fn with_config(config: RunnerConfig) -> Self {
        Self::new(Environment::new(), RunnerRegistry::new(config))
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    /// Walk `document` from the start anchor, showing sections that match the
    /// requested tags.
    ///
    /// Returns normally when the document is finished or the operator types
    /// `exit`; errors are malformed directives and shell failures.
    pub fn run_markdown(
        &mut self,
        document: &[u8],
        options: &RunOptions,
        out: &mut dyn Write,
        prompter: &mut dyn Prompter,
    ) -> anyhow::Result<()> {
        let document = String::from_utf8_lossy(document);
        let sections = parse_sections(&document, &options.start_anchor, &options.tags)?;
        tracing::info!(sections = sections.len(), "walking document");

        for (i, section) in sections.iter().enumerate() {
            let flow = match section.kind {
                SectionKind::Header => {
                    print_lines(out, section)?;
                    match sections.get(i + 1).and_then(Section::heading) {
                        Some((next, _)) => self.confirm_next_heading(out, prompter, next)?,
                        None => Flow::Continue,
                    }
                }
                SectionKind::Code => {
                    print_lines(out, section)?;
                    self.process_code_block(out, prompter, section)?
                }
                SectionKind::Prompt => {
                    self.process_prompt_section(out, prompter, section)?;
                    Flow::Continue
                }
                SectionKind::Text => {
                    print_lines(out, section)?;
                    Flow::Continue
                }
            };
            if flow == Flow::Exit {
                tracing::info!(section = i, "operator exited");
                return Ok(());
            }
        }
        writeln!(out, "{COMPLETE_BANNER}")?;
        Ok(())
    }

    /// Shut down every shell started so far.
    pub fn close(&mut self) -> anyhow::Result<()> {
        self.runners.close().context("close shell runners")
    }

    fn confirm_next_heading(
        &mut self,
        out: &mut dyn Write,
        prompter: &mut dyn Prompter,
        next: &str,
    ) -> anyhow::Result<Flow> {
        let message = format!("\n> Press Enter to continue to [{next}] (or type 'exit'): ");
        if prompter.prompt(&message)?.eq_ignore_ascii_case("exit") {
            return Ok(Flow::Exit);
        }
        writeln!(out)?;
        Ok(Flow::Continue)
    }

    /// Ask until every directive in the section has an accepted answer, then
    /// publish the answers to the environment.
    fn process_prompt_section(
        &mut self,
        out: &mut dyn Write,
        prompter: &mut dyn Prompter,
        section: &Section,
    ) -> anyhow::Result<()> {
        loop {
            match process_prompt(prompter, &section.lines) {
                Ok(answers) => {
                    writeln!(out)?;
                    self.env.extend(answers);
                    return Ok(());
                }
                Err(err) => match err.downcast_ref::<DirectiveError>() {
                    Some(directive_err) => writeln!(out, "{directive_err}")?,
                    None => return Err(err),
                },
            }
        }
    }

    fn process_code_block(
        &mut self,
        out: &mut dyn Write,
        prompter: &mut dyn Prompter,
        section: &Section,
    ) -> anyhow::Result<Flow> {
        let body = section.code_body();
        if body.is_empty() {
            return Ok(Flow::Continue);
        }
        let language = section.fence_language().unwrap_or_default();
        let Some(runner) = self.runners.get(language) else {
            prompter.prompt(NO_RUNNER_QUESTION)?;
            return Ok(Flow::Continue);
        };
        let code = body.join("\n");

        let mut state = CodeState::AwaitChoice;
        loop {
            state = match state {
                CodeState::AwaitChoice => match prompter.prompt(RUN_QUESTION)?.to_lowercase().as_str() {
                    "r" => CodeState::Running,
                    "s" | "" => return Ok(Flow::Continue),
                    "x" => return Ok(Flow::Exit),
                    _ => CodeState::AwaitChoice,
                },
                CodeState::Running => {
                    tracing::debug!(language, lines = body.len(), "running snippet");
                    let output = match runner.run(&code, &self.env) {
                        Ok(output) => output,
                        Err(err) => {
                            write!(out, "\n> Error: {err}\n")?;
                            return Err(err).with_context(|| format!("run {language} snippet"));
                        }
                    };
                    let output = if output.is_empty() {
                        "(no output)\n".to_string()
                    } else {
                        output
                    };
                    write!(out, "\n> Output: {output}")?;
                    CodeState::Ran
                }
                CodeState::Ran => match prompter.prompt(RERUN_QUESTION)?.to_lowercase().as_str() {
                    "s" | "" => return Ok(Flow::Continue),
                    "x" => return Ok(Flow::Exit),
                    _ => CodeState::Running,
                },
            };
        }
    }
}

impl Default for ReadmeRunner {
    fn default() -> Self {
        Self::with_config(RunnerConfig::default())
    }
}

fn print_lines(out: &mut dyn Write, section: &Section) -> std::io::Result<()> {
    writeln!(out, "{}", section.lines.join("\n"))
}
