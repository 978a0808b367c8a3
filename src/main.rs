use anyhow::Context;
use argh::{EarlyExit, FromArgs};
use readme_runner::parser::print_toc;
use readme_runner::{InputClosed, Prompter, ReadlinePrompt, ReadmeRunner, RunOptions, RunnerConfig, Tee};
use std::fs::{self, OpenOptions};
use std::io::{IsTerminal, Write};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const PROGRAM: &str = "readme-runner";

#[derive(FromArgs, Debug)]
/// walk a Markdown README section by section and run its code blocks
struct Args {
    #[argh(positional)]
    /// the Markdown file to walk through
    readme: String,

    #[argh(switch)]
    /// print the table of contents and exit
    toc: bool,

    #[argh(option, default = "String::new()")]
    /// anchor of the heading to start at, e.g. "getting-started"
    start: String,

    #[argh(option, default = "String::new()")]
    /// comma separated tags; only sections carrying one of them are shown
    tags: String,

    #[argh(option, default = "String::from(\"readme-runner.log\")")]
    /// file the session transcript is appended to
    log: String,

    #[argh(option)]
    /// give up on a snippet after this many seconds
    timeout: Option<u64>,

    #[argh(option, default = "String::from(\"bash\")")]
    /// interpreter for bash and verify blocks
    bash: String,

    #[argh(option, default = "String::from(\"sh\")")]
    /// interpreter for sh blocks
    sh: String,
}

impl Args {
    fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            bash_program: self.bash.clone(),
            sh_program: self.sh.clone(),
            timeout: self.timeout.map(Duration::from_secs),
        }
    }

    fn run_options(&self) -> RunOptions {
        RunOptions::new(self.start.clone(), readme_runner::config::parse_tag_list(&self.tags))
    }
}

fn main() {
    let filter = EnvFilter::try_from_env("README_RUNNER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let args: Vec<&str> = args.iter().map(String::as_str).collect();

    let mut prompter = match ReadlinePrompt::new() {
        Ok(prompter) => prompter,
        Err(err) => {
            eprintln!("Error: failed to open the terminal: {err}");
            std::process::exit(1);
        }
    };
    let code = run_main(&args, &mut prompter, &mut std::io::stdout(), &mut std::io::stderr());
    std::process::exit(code);
}

/// Parse `args` and run the walkthrough, returning the process exit code.
fn run_main(
    args: &[&str],
    prompter: &mut dyn Prompter,
    stdout: &mut dyn Write,
    stderr: &mut dyn Write,
) -> i32 {
    let args = match Args::from_args(&[PROGRAM], args) {
        Ok(args) => args,
        Err(EarlyExit { output, status }) => {
            return match status {
                Ok(()) => {
                    let _ = writeln!(stdout, "{output}");
                    0
                }
                Err(()) => {
                    let _ = writeln!(stderr, "{output}");
                    1
                }
            };
        }
    };

    match run(&args, prompter, stdout) {
        Ok(()) => 0,
        Err(err) if err.downcast_ref::<InputClosed>().is_some() => {
            tracing::info!("input closed, stopping");
            let _ = writeln!(stdout);
            0
        }
        Err(err) => {
            let _ = writeln!(stderr, "Error: {err:#}");
            1
        }
    }
}

fn run(args: &Args, prompter: &mut dyn Prompter, stdout: &mut dyn Write) -> anyhow::Result<()> {
    let document = fs::read(&args.readme).with_context(|| format!("failed to read {}", args.readme))?;

    if args.toc {
        return print_toc(stdout, &String::from_utf8_lossy(&document));
    }

    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&args.log)
        .with_context(|| format!("failed to open log file {}", args.log))?;
    let mut out = Tee::new(stdout, log);

    let mut runner = ReadmeRunner::with_config(args.runner_config());
    let result = runner.run_markdown(&document, &args.run_options(), &mut out, prompter);
    let closed = runner.close();
    out.flush().context("failed to flush output")?;
    result?;
    closed
}

#[cfg(test)]
mod tests {
    use super::*;
    use readme_runner::ScriptedPrompt;
    use std::path::Path;

    struct ClosedInput;

    impl Prompter for ClosedInput {
        fn prompt(&mut self, _message: &str) -> anyhow::Result<String> {
            Err(InputClosed.into())
        }
    }

    fn call(args: &[&str], prompter: &mut dyn Prompter) -> (i32, String, String) {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let code = run_main(args, prompter, &mut stdout, &mut stderr);
        (
            code,
            String::from_utf8(stdout).unwrap(),
            String::from_utf8(stderr).unwrap(),
        )
    }

    fn write_readme(dir: &Path, content: &str) -> String {
        let path = dir.join("README.md");
        fs::write(&path, content).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn test_missing_readme_argument_is_a_usage_error() {
        let (code, stdout, stderr) = call(&[], &mut ScriptedPrompt::default());
        assert_eq!(code, 1);
        assert_eq!(stdout, "");
        assert!(!stderr.is_empty());
    }

    #[test]
    fn test_help_exits_cleanly() {
        let (code, stdout, _) = call(&["--help"], &mut ScriptedPrompt::default());
        assert_eq!(code, 0);
        assert!(stdout.contains("Usage: readme-runner"), "{stdout}");
    }

    #[test]
    fn test_unreadable_readme() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.md");
        let (code, _, stderr) = call(&[path.to_str().unwrap()], &mut ScriptedPrompt::default());
        assert_eq!(code, 1);
        assert!(stderr.starts_with("Error: failed to read"), "{stderr}");
    }

    #[test]
    fn test_prints_table_of_contents() {
        let dir = tempfile::tempdir().unwrap();
        let readme = write_readme(dir.path(), "# Title\ntext\n## Getting Started\n### Step 1!\n");
        let (code, stdout, _) = call(&[readme.as_str(), "--toc"], &mut ScriptedPrompt::default());
        assert_eq!(code, 0);
        assert_eq!(
            stdout,
            "- Title (title)\n  - Getting Started (getting-started)\n    - Step 1! (step-1)\n"
        );
    }

    #[test]
    fn test_walkthrough_is_mirrored_to_log() {
        let dir = tempfile::tempdir().unwrap();
        let readme = write_readme(dir.path(), "# One\nText\n# Two\nMore\n");
        let log = dir.path().join("session.log");
        let mut prompter = ScriptedPrompt::new(["exit"]);
        let (code, stdout, stderr) = call(
            &[readme.as_str(), "--log", log.to_str().unwrap()],
            &mut prompter,
        );
        assert_eq!((code, stderr.as_str()), (0, ""));
        assert_eq!(stdout, "# One\nText\n");
        assert_eq!(fs::read_to_string(&log).unwrap(), stdout);
    }

    #[test]
    fn test_start_and_tags_are_applied() {
        let dir = tempfile::tempdir().unwrap();
        let readme = write_readme(
            dir.path(),
            "# Intro\n## Linux\n[tags]:# (linux)\napt install\n## Mac\n[tags]:# (mac)\nbrew install\n",
        );
        let log = dir.path().join("session.log");
        let (code, stdout, _) = call(
            &[readme.as_str(), "--start", "linux", "--tags", "mac, windows", "--log", log.to_str().unwrap()],
            &mut ScriptedPrompt::default(),
        );
        assert_eq!(code, 0);
        assert_eq!(stdout, "## Mac\nbrew install\n\n> README complete!\n");
    }

    #[test]
    fn test_bad_log_path() {
        let dir = tempfile::tempdir().unwrap();
        let readme = write_readme(dir.path(), "# One\n");
        let log = dir.path().join("no-such-dir").join("session.log");
        let (code, stdout, stderr) = call(
            &[readme.as_str(), "--log", log.to_str().unwrap()],
            &mut ScriptedPrompt::default(),
        );
        assert_eq!(code, 1);
        assert_eq!(stdout, "");
        assert!(stderr.contains("failed to open log file"), "{stderr}");
    }

    #[test]
    fn test_closed_input_ends_quietly() {
        let dir = tempfile::tempdir().unwrap();
        let readme = write_readme(dir.path(), "# One\n# Two\n");
        let log = dir.path().join("session.log");
        let (code, stdout, stderr) = call(&[readme.as_str(), "--log", log.to_str().unwrap()], &mut ClosedInput);
        assert_eq!(code, 0);
        assert_eq!(stdout, "# One\n\n");
        assert_eq!(stderr, "");
    }
}
