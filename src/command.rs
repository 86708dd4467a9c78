//! Run external tools as structured invocations
//!
//! Every scientific tool the pipeline depends on is a black box with a fixed command line. An
//! [Invocation] carries the program, its argument list, child-only environment overrides, an
//! optional working directory for the child and optional stdin. Nothing is interpolated into a
//! shell string, so a ligand descriptor or a file name can't change the command that runs.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::{ChildStdin, Command};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("can't start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{command}` exited with {}: {stderr}", exit_label(.exit_code))]
    NonZeroExit {
        command: String,
        exit_code: Option<i32>,
        stderr: String,
    },
    #[error("`{command}` didn't finish within {}s", .limit.as_secs())]
    TimedOut { command: String, limit: Duration },
    #[error("i/o error while running `{command}`: {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "no status (killed by signal)".to_string(),
    }
}

/// A single external process call
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    /// Added on top of the inherited environment of the child only
    pub env: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    pub stdin: Option<String>,
    /// Fail on a non-zero exit (the default). Probes that expect "not found" turn this off.
    pub check: bool,
}

impl Invocation {
    pub fn new(program: impl Into<String>) -> Invocation {
        Invocation { program: program.into(), check: true, ..Default::default() }
    }

    /// Build an invocation from a launcher prefix (e.g. `micromamba run -n env`) and a tool name
    pub fn launched(launcher: &[String], tool: impl Into<String>) -> Invocation {
        match launcher.split_first() {
            Some((program, rest)) => {
                let mut invocation = Invocation::new(program.clone());
                invocation.args.extend(rest.iter().cloned());
                invocation.args.push(tool.into());
                invocation
            }
            None => Invocation::new(tool),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Invocation {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Invocation {
        self.env.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Invocation {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn stdin(mut self, input: impl Into<String>) -> Invocation {
        self.stdin = Some(input.into());
        self
    }

    /// Return non-zero exits to the caller instead of failing
    pub fn tolerate_failure(mut self) -> Invocation {
        self.check = false;
        self
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.is_empty() || arg.contains(char::is_whitespace) {
                write!(f, " {arg:?}")?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

/// Captured result of a finished process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Executes invocations one at a time, optionally bounded by a timeout
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    timeout: Option<Duration>,
}

impl CommandRunner {
    pub fn new() -> CommandRunner {
        CommandRunner { timeout: None }
    }

    pub fn with_timeout(limit: Duration) -> CommandRunner {
        CommandRunner { timeout: Some(limit) }
    }

    pub async fn execute(&self, invocation: &Invocation) -> Result<CommandOutput, ToolError> {
        let command = invocation.to_string();
        info!("Running {command}");

        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(if invocation.stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|source| ToolError::Spawn { command: command.clone(), source })?;

        // stdin is fed while the child runs, so both sit under the same deadline
        let pipe = child.stdin.take();
        let input = invocation.stdin.as_deref();
        let run = async move {
            let (fed, finished) = tokio::join!(feed_stdin(pipe, input), child.wait_with_output());
            fed?;
            finished
        };

        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, run).await.map_err(|_| {
                warn!("Killing `{command}` after {}s", limit.as_secs());
                ToolError::TimedOut { command: command.clone(), limit }
            })?,
            None => run.await,
        };
        let output = finished.map_err(|source| ToolError::Io { command: command.clone(), source })?;

        let result = CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code(),
        };
        if !result.stdout.trim().is_empty() {
            debug!("{}", result.stdout.trim_end());
        }

        if !result.success() {
            if invocation.check {
                warn!("Command failed: {command}");
                warn!("Stderr: {}", result.stderr.trim_end());
                return Err(ToolError::NonZeroExit {
                    command,
                    exit_code: result.exit_code,
                    stderr: result.stderr,
                });
            }
            debug!("Tolerating exit {:?} from {command}", result.exit_code);
        }

        Ok(result)
    }
}

/// Write the whole input and close the pipe
///
/// A child that exits or closes stdin early breaks the pipe; that's not an error here, its exit
/// status and stderr say what went wrong.
async fn feed_stdin(pipe: Option<ChildStdin>, input: Option<&str>) -> io::Result<()> {
    if let (Some(mut pipe), Some(input)) = (pipe, input) {
        match pipe.write_all(input.as_bytes()).await {
            Err(err) if err.kind() == io::ErrorKind::BrokenPipe => {
                debug!("Child closed stdin after reading part of the input");
            }
            other => other?,
        }
        // closing stdin lets `python3 -` start executing
        drop(pipe);
    }
    Ok(())
}
