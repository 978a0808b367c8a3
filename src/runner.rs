//! Persistent shells that run snippets one after another.
//!
//! Every language family gets one long-lived interpreter. A snippet is written
//! to its stdin followed by an `echo` of a unique marker; output is read line by
//! line until the marker comes back. Shell state (working directory, variables,
//! functions) therefore carries over from one snippet to the next.

use crate::config::RunnerConfig;
use crate::env::Environment;
use crate::error::RunnerError;
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

const END_MARKER_PREFIX: &str = "__README_RUNNER_END";
const STATUS_MARKER_PREFIX: &str = "__README_RUNNER_STATUS";
const VERIFY_FUNCTION: &str = "__readme_runner_verify";

/// Something that can execute a snippet and report what it printed.
pub trait CodeRunner {
    /// Run `code` with the variables of `env` visible to it.
    fn run(&mut self, code: &str, env: &Environment) -> Result<String, RunnerError>;

    /// Stop the underlying interpreter, if one was started.
    fn close(&mut self) -> Result<(), RunnerError>;
}

/// Fence languages that share one interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LanguageFamily {
    Bash,
    /// `sh` and `shell`.
    Sh,
    /// Bash snippets whose exit status is the result.
    Verify,
}

impl LanguageFamily {
    /// Family for a fence language; unknown or empty languages have none.
    pub fn from_fence_language(language: &str) -> Option<Self> {
        match language {
            "bash" => Some(LanguageFamily::Bash),
            "sh" | "shell" => Some(LanguageFamily::Sh),
            "verify" => Some(LanguageFamily::Verify),
            _ => None,
        }
    }

    fn program(self, config: &RunnerConfig) -> &str {
        match self {
            LanguageFamily::Bash | LanguageFamily::Verify => &config.bash_program,
            LanguageFamily::Sh => &config.sh_program,
        }
    }

    fn build(self, config: &RunnerConfig) -> Box<dyn CodeRunner> {
        let session = ShellSession::new(self.program(config), config.timeout);
        match self {
            LanguageFamily::Bash | LanguageFamily::Sh => Box::new(StreamingRunner::new(session)),
            LanguageFamily::Verify => Box::new(VerifyRunner::new(session)),
        }
    }
}

/// A running interpreter with piped stdin and a thread forwarding its stdout.
struct ShellProcess {
    child: Child,
    stdin: Option<ChildStdin>,
    lines: Receiver<std::io::Result<String>>,
    reader: Option<JoinHandle<()>>,
}

impl ShellProcess {
    fn spawn(program: &str, env: &Environment) -> Result<Self, RunnerError> {
        let spawn_error = |source| RunnerError::Spawn {
            program: program.to_string(),
            source,
        };
        let mut child = Command::new(program)
            .envs(env.vars.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .current_dir(&env.current_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.kill();
            let _ = child.wait();
            return Err(spawn_error(std::io::Error::other("shell pipes were not captured")));
        };

        let (tx, lines) = mpsc::channel();
        let reader = thread::Builder::new()
            .name(format!("{program}-output"))
            .spawn(move || {
                let mut stdout = BufReader::new(stdout);
                loop {
                    let mut buf = Vec::new();
                    match stdout.read_until(b'\n', &mut buf) {
                        Ok(0) => break,
                        Ok(_) => {
                            let line = String::from_utf8_lossy(&buf);
                            let line = line.trim_end_matches(['\n', '\r']).to_string();
                            if tx.send(Ok(line)).is_err() {
                                break;
                            }
                        }
                        Err(err) => {
                            let _ = tx.send(Err(err));
                            break;
                        }
                    }
                }
            });
        let reader = match reader {
            Ok(handle) => handle,
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_error(err));
            }
        };

        tracing::debug!(program, pid = child.id(), "shell started");
        let mut process = Self {
            child,
            stdin: Some(stdin),
            lines,
            reader: Some(reader),
        };
        // Errors of snippets belong in the captured output.
        process.write("exec 2>&1\n")?;
        Ok(process)
    }

    fn write(&mut self, script: &str) -> Result<(), RunnerError> {
        let io_error = |source| RunnerError::Io {
            context: "write to shell",
            source,
        };
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io_error(std::io::ErrorKind::BrokenPipe.into()))?;
        stdin.write_all(script.as_bytes()).map_err(io_error)?;
        stdin.flush().map_err(io_error)
    }

    /// Next output line, or `None` once the shell closed its output.
    fn next_line(&self, deadline: Option<(Instant, Duration)>) -> Result<Option<String>, RunnerError> {
        let received = match deadline {
            Some((at, limit)) => {
                let remaining = at.saturating_duration_since(Instant::now());
                match self.lines.recv_timeout(remaining) {
                    Ok(received) => Some(received),
                    Err(RecvTimeoutError::Timeout) => {
                        return Err(RunnerError::Timeout { after: limit });
                    }
                    Err(RecvTimeoutError::Disconnected) => None,
                }
            }
            None => self.lines.recv().ok(),
        };
        received.transpose().map_err(|source| RunnerError::Io {
            context: "read from shell",
            source,
        })
    }

    /// Collect output lines up to `marker`, which is not included.
    fn read_until(
        &self,
        marker: &str,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<String, RunnerError> {
        let mut output = String::new();
        loop {
            let Some(line) = self.next_line(deadline)? else {
                return Err(RunnerError::Protocol {
                    expected: marker.to_string(),
                    found: "end of shell output".to_string(),
                });
            };
            if line == marker {
                return Ok(output);
            }
            // Output without a trailing newline runs into the marker.
            if let Some(partial) = line.strip_suffix(marker) {
                output.push_str(partial);
                output.push('\n');
                return Ok(output);
            }
            output.push_str(&line);
            output.push('\n');
        }
    }

    /// Close stdin and wait for the shell to exit on its own.
    fn shutdown(&mut self) -> Result<ExitStatus, RunnerError> {
        drop(self.stdin.take());
        let status = self.child.wait().map_err(|source| RunnerError::Io {
            context: "wait for shell",
            source,
        })?;
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
        Ok(status)
    }
}

impl Drop for ShellProcess {
    fn drop(&mut self) {
        if self.stdin.is_some() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Lazily started interpreter plus the bookkeeping shared by both runners.
pub struct ShellSession {
    program: String,
    timeout: Option<Duration>,
    process: Option<ShellProcess>,
    /// Variable values the running shell has already seen.
    exported: HashMap<String, String>,
    sequence: u64,
}

impl ShellSession {
    pub fn new(program: impl Into<String>, timeout: Option<Duration>) -> Self {
        Self {
            program: program.into(),
            timeout,
            process: None,
            exported: HashMap::new(),
            sequence: 0,
        }
    }

    pub fn is_running(&self) -> bool {
        self.process.is_some()
    }

    fn next_marker(&mut self, prefix: &str) -> String {
        self.sequence += 1;
        format!("{prefix}_{}_{}__", std::process::id(), self.sequence)
    }

    /// `export` lines for variables that changed since the shell last saw them.
    fn sync_script(&mut self, env: &Environment) -> String {
        let mut changed: Vec<(&String, &String)> = env
            .vars
            .iter()
            .filter(|(key, val)| self.exported.get(*key) != Some(*val))
            .collect();
        changed.sort();

        let mut script = String::new();
        for (key, val) in changed {
            if !is_shell_name(key) {
                tracing::warn!(var = %key, "not a valid shell variable name, not exported");
                continue;
            }
            script.push_str(&format!("export {key}={}\n", shell_quote(val)));
            self.exported.insert(key.clone(), val.clone());
        }
        script
    }

    /// Write `script` (built from the two markers) and collect the output up
    /// to the end marker. Returns the output and the process for further reads.
    fn submit<F>(&mut self, env: &Environment, build: F) -> Result<Exchange<'_>, RunnerError>
    where
        F: FnOnce(&str, &str) -> String,
    {
        let process = match self.process.take() {
            Some(process) => process,
            None => {
                let process = ShellProcess::spawn(&self.program, env)?;
                self.exported = env.vars.clone();
                process
            }
        };
        let exports = self.sync_script(env);
        let end_marker = self.next_marker(END_MARKER_PREFIX);
        let status_marker = self.next_marker(STATUS_MARKER_PREFIX);
        let script = format!("{exports}{}", build(&end_marker, &status_marker));
        let deadline = self.timeout.map(|limit| (Instant::now() + limit, limit));

        let process = self.process.insert(process);
        let output = process
            .write(&script)
            .and_then(|()| process.read_until(&end_marker, deadline));
        match output {
            Ok(output) => Ok(Exchange {
                output,
                status_marker,
                deadline,
                session: self,
            }),
            Err(err) => {
                self.discard(&err);
                Err(err)
            }
        }
    }

    /// Forget a shell whose state can no longer be trusted.
    fn discard(&mut self, err: &RunnerError) {
        tracing::warn!(program = %self.program, error = %err, "discarding shell");
        self.process = None;
        self.exported.clear();
    }

    pub fn close(&mut self) -> Result<(), RunnerError> {
        let Some(mut process) = self.process.take() else {
            return Ok(());
        };
        self.exported.clear();
        let status = process.shutdown()?;
        tracing::debug!(program = %self.program, %status, "shell closed");
        Ok(())
    }
}

/// Output of one submitted snippet, with access to the lines that follow it.
struct Exchange<'a> {
    output: String,
    status_marker: String,
    deadline: Option<(Instant, Duration)>,
    session: &'a mut ShellSession,
}

impl Exchange<'_> {
    fn next_line(&mut self) -> Result<Option<String>, RunnerError> {
        let result = match self.session.process.as_ref() {
            Some(process) => process.next_line(self.deadline),
            None => Ok(None),
        };
        if let Err(err) = &result {
            self.session.discard(err);
        }
        result
    }
}

/// Runner for `bash`, `sh` and `shell` fences: returns what the snippet printed.
pub struct StreamingRunner {
    session: ShellSession,
}

impl StreamingRunner {
    pub fn new(session: ShellSession) -> Self {
        Self { session }
    }
}

impl CodeRunner for StreamingRunner {
    fn run(&mut self, code: &str, env: &Environment) -> Result<String, RunnerError> {
        let exchange = self
            .session
            .submit(env, |end_marker, _| format!("{code}\necho {end_marker}\n"))?;
        tracing::debug!(output_bytes = exchange.output.len(), "snippet finished");
        Ok(exchange.output)
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.session.close()
    }
}

/// Runner for `verify` fences: returns a Success or Failure verdict from the
/// snippet's exit status.
///
/// The snippet runs inside a shell function in which `exit` is redefined as
/// `return`, so `exit 1` reports a failure instead of ending the shared shell.
pub struct VerifyRunner {
    session: ShellSession,
}

impl VerifyRunner {
    pub fn new(session: ShellSession) -> Self {
        Self { session }
    }
}

impl CodeRunner for VerifyRunner {
    fn run(&mut self, code: &str, env: &Environment) -> Result<String, RunnerError> {
        // An empty function body is a syntax error.
        let body = if code.trim().is_empty() { ":" } else { code };
        let mut exchange = self.session.submit(env, |end_marker, status_marker| {
            format!(
                "{VERIFY_FUNCTION}() {{\nexit() {{ return \"$@\"; }}\n{body}\n}}\n\
                 {VERIFY_FUNCTION}\n\
                 __readme_runner_status=$?\n\
                 echo {end_marker}\n\
                 echo {status_marker} $__readme_runner_status\n"
            )
        })?;
        tracing::debug!(output = %exchange.output, "verify snippet output");

        let line = exchange.next_line()?;
        let status = match parse_status_line(line.as_deref(), &exchange.status_marker) {
            Ok(status) => status,
            Err(err) => {
                exchange.session.discard(&err);
                return Err(err);
            }
        };
        Ok(verdict(status))
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.session.close()
    }
}

/// Parse `<marker> <status>` as written after a verify snippet.
pub fn parse_status_line(line: Option<&str>, marker: &str) -> Result<i32, RunnerError> {
    let malformed = || RunnerError::Protocol {
        expected: format!("{marker} <status>"),
        found: line.unwrap_or("end of shell output").to_string(),
    };
    let mut parts = line.ok_or_else(malformed)?.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some(found), Some(status), None) if found == marker => {
            status.parse().map_err(|_| malformed())
        }
        _ => Err(malformed()),
    }
}

/// Human readable verdict for a verify snippet's exit status.
pub fn verdict(status: i32) -> String {
    if status == 0 {
        "\x1b[32mSuccess\x1b[0m\n".to_string()
    } else {
        format!("\x1b[31mFailure [command exited with status {status}]\x1b[0m\n")
    }
}

fn is_shell_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c == '_' || c.is_ascii_alphabetic())
        && chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Quote `value` for POSIX shells using single quotes.
fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// One runner per language family, created on first lookup.
pub struct RunnerRegistry {
    config: RunnerConfig,
    runners: HashMap<LanguageFamily, Box<dyn CodeRunner>>,
}

impl RunnerRegistry {
    pub fn new(config: RunnerConfig) -> Self {
        Self {
            config,
            runners: HashMap::new(),
        }
    }

    /// Runner for a fence language, or `None` when nothing can run it.
    ///
    /// The interpreter itself starts on the runner's first `run`.
    pub fn get(&mut self, language: &str) -> Option<&mut dyn CodeRunner> {
        let family = LanguageFamily::from_fence_language(language)?;
        let config = &self.config;
        let runner = self
            .runners
            .entry(family)
            .or_insert_with(|| family.build(config));
        Some(runner.as_mut())
    }

    /// Close every runner, reporting the first failure.
    pub fn close(&mut self) -> Result<(), RunnerError> {
        let mut first_error = None;
        for (family, mut runner) in self.runners.drain() {
            if let Err(err) = runner.close() {
                tracing::warn!(?family, error = %err, "failed to close runner");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for RunnerRegistry {
    fn default() -> Self {
        Self::new(RunnerConfig::default())
    }
}
