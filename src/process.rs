//! External command execution.
//!
//! [`Cmd`] is the single choke point for running external commands. It
//! builds a structured argv (never a shell string), records the command
//! to the [`ActionLog`] before spawning, and applies a [`FailurePolicy`]
//! to non-zero exits. A command that cannot be launched at all is always
//! fatal, regardless of policy.
//!
//! There are no automatic retries anywhere; the only adaptive behavior is
//! the operator-driven [`FailurePolicy::Interactive`] prompt.

use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::BuildError;
use crate::log::ActionLog;

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn handle_sigint(_signal: libc::c_int) {
    INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Install the SIGINT handler. Children spawned afterwards still receive
/// the signal; we survive it and report a clean interruption instead.
pub fn install_interrupt_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

/// Whether the operator has requested the process be killed.
pub fn interrupted() -> bool {
    INTERRUPTED.load(Ordering::SeqCst)
}

/// Stop here if the operator has interrupted the run. Checked before
/// every command spawn and between pipeline stages, so an interrupt
/// that lands while no child is failing still ends the run.
pub fn abort_if_interrupted(log: &mut ActionLog) -> Result<(), BuildError> {
    if interrupted() {
        log.record("User requested process killed.");
        return Err(BuildError::Interrupted);
    }
    Ok(())
}

/// Per-command rule for non-zero exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Propagate the failure and halt the pipeline.
    #[default]
    FailFast,
    /// Log that the error is being ignored and continue.
    ForceContinue,
    /// Ask the operator whether to continue.
    Interactive,
}

/// Result of a fire-and-forget command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmdOutcome {
    /// Command ran and exited zero.
    Completed,
    /// Command exited non-zero but the failure policy suppressed it.
    Suppressed,
}

/// Builder for one external command invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: PathBuf,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
    policy: FailurePolicy,
}

impl Cmd {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
            policy: FailurePolicy::FailFast,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn arg_path(mut self, path: &Path) -> Self {
        self.args.push(path.to_string_lossy().into_owned());
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Set an environment variable on this invocation only.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// The full command line, for logging and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    fn build_command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        if let Some(dir) = &self.cwd {
            command.current_dir(dir);
        }
        for (key, value) in &self.envs {
            command.env(key, value);
        }
        command
    }

    /// Run the command, letting its output pass through to the console.
    pub fn run(self, log: &mut ActionLog) -> Result<CmdOutcome, BuildError> {
        abort_if_interrupted(log)?;
        log.record(format!("Running command: {}", self.command_line()));
        let status = self.build_command().status().map_err(|err| {
            log.record(format!("Unable to launch command: {err}"));
            BuildError::ExecutionStart {
                command: self.command_line(),
                source: err,
            }
        })?;

        if status.success() {
            return Ok(CmdOutcome::Completed);
        }
        self.handle_nonzero(status, log)
    }

    /// Run the command and capture its standard output, trimmed of
    /// trailing whitespace. Standard error passes through. A suppressed
    /// failure yields an empty string.
    pub fn run_capture(self, log: &mut ActionLog) -> Result<String, BuildError> {
        abort_if_interrupted(log)?;
        log.record(format!("Running command: {}", self.command_line()));
        let output = self
            .build_command()
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .output()
            .map_err(|err| {
                log.record(format!("Unable to launch command: {err}"));
                BuildError::ExecutionStart {
                    command: self.command_line(),
                    source: err,
                }
            })?;

        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Ok(stdout.trim_end().to_string());
        }
        self.handle_nonzero(output.status, log)?;
        Ok(String::new())
    }

    fn handle_nonzero(
        &self,
        status: std::process::ExitStatus,
        log: &mut ActionLog,
    ) -> Result<CmdOutcome, BuildError> {
        // The non-zero exit may itself be the signal reaching the child.
        abort_if_interrupted(log)?;

        log.record(format!(
            "Command '{}' failed with {status}",
            self.command_line()
        ));
        match self.policy {
            FailurePolicy::FailFast => Err(BuildError::CommandFailure {
                command: self.command_line(),
                status,
            }),
            FailurePolicy::ForceContinue => {
                log.record("FORCE ENABLED, CONTINUING PAST ERROR.");
                Ok(CmdOutcome::Suppressed)
            }
            FailurePolicy::Interactive => {
                if prompt_continue(log) {
                    Ok(CmdOutcome::Suppressed)
                } else {
                    Err(BuildError::CommandFailure {
                        command: self.command_line(),
                        status,
                    })
                }
            }
        }
    }
}

/// Blocking y/n prompt. Only an explicit `y` continues; any other input,
/// including empty or unreadable input, is a decline.
fn prompt_continue(log: &mut ActionLog) -> bool {
    print!("Continue [y,n]? ");
    let _ = io::stdout().flush();

    let mut line = String::new();
    let _ = io::stdin().lock().read_line(&mut line);
    let approved = parse_choice(&line);
    if approved {
        log.record("User choice presented. User selected true.");
    } else {
        log.record("User choice presented. User selected false.");
    }
    approved
}

fn parse_choice(input: &str) -> bool {
    input.trim().eq_ignore_ascii_case("y")
}
