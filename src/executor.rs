use std::ffi::{OsStr, OsString};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};

use thiserror::Error;
use tracing::debug;

/// Why [`execute`] gave up before a child produced a status.
#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("failed to echo command line: {0}")]
    Echo(#[source] io::Error),

    #[error("failed to spawn: {0}")]
    Spawn(#[source] io::Error),
}

/// One subprocess call: program followed by its arguments, plus any extra
/// environment variables for the child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub envs: Vec<(OsString, OsString)>,
}

impl Invocation {
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    /// Program and arguments as strings, in order.
    pub fn tokens(&self) -> Vec<String> {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|t| t.to_string_lossy().into_owned())
            .collect()
    }

    /// Tokens joined with single spaces, as echoed before execution.
    pub fn command_line(&self) -> String {
        self.tokens().join(" ")
    }
}

/// What a finished child process left behind.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Runs an invocation to completion.
pub trait CommandRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput>;
}

/// Spawns real processes and blocks until they exit. Child output is captured,
/// never forwarded to our stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> io::Result<CommandOutput> {
        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(invocation.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .output()?;
        debug!(
            program = %invocation.program.display(),
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            stderr_bytes = output.stderr.len(),
            "child process exited"
        );
        Ok(CommandOutput {
            status: output.status,
            stdout: output.stdout,
            stderr: output.stderr,
        })
    }
}

/// Run `invocation` through `runner`, first writing its command line to
/// `echo` when one is given.
pub fn execute<R, W>(
    runner: &R,
    invocation: &Invocation,
    echo: Option<&mut W>,
) -> Result<CommandOutput, ExecuteError>
where
    R: CommandRunner + ?Sized,
    W: Write + ?Sized,
{
    if let Some(out) = echo {
        writeln!(out, "{}", invocation.command_line())
            .and_then(|()| out.flush())
            .map_err(ExecuteError::Echo)?;
    }
    runner.run(invocation).map_err(ExecuteError::Spawn)
}
