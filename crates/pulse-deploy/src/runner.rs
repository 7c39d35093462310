// External command execution.
//
// Every docker/aws invocation goes through a `CommandRunner` so workflows
// can be driven by the real process runner, the dry-run printer, or a
// scripted runner in tests.

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::DeployError;

/// A single external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Bytes written to the child's stdin. Never printed.
    pub stdin: Option<Vec<u8>>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, input: Vec<u8>) -> Self {
        self.stdin = Some(input);
        self
    }

    /// True for state lookups whose output later steps depend on.
    pub fn is_lookup(&self) -> bool {
        self.program == "aws" && self.args.get(1).map(String::as_str) == Some("describe-services")
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        if self.stdin.is_some() {
            write!(f, " < <stdin>")?;
        }
        Ok(())
    }
}

/// Captured result of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute `spec` to completion. An `Err` means the process could not be
    /// started; a non-zero exit is reported through `CommandOutput::code`.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError>;
}

/// Run `spec` and turn a non-zero exit into `DeployError::StepFailed`.
pub async fn run_checked(
    runner: &dyn CommandRunner,
    spec: &CommandSpec,
) -> Result<CommandOutput, DeployError> {
    info!("running: {}", spec);
    let output = runner.run(spec).await?;
    if !output.is_success() {
        return Err(DeployError::StepFailed {
            command: spec.to_string(),
            code: output.code,
            stderr: output.stderr.trim().to_string(),
        });
    }
    Ok(output)
}

// ---------------------------------------------------------------------------
// ProcessRunner
// ---------------------------------------------------------------------------

/// Spawns real processes via `tokio::process`.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        let spawn_err = |source: std::io::Error| DeployError::Spawn {
            command: spec.to_string(),
            source,
        };

        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(if spec.stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_err)?;

        if let Some(input) = &spec.stdin {
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input).await.map_err(spawn_err)?;
                // Dropping closes the pipe so the child sees EOF.
                drop(stdin);
            }
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        debug!("{} exited with {:?}", spec.program, output.status.code());

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

// ---------------------------------------------------------------------------
// DryRunRunner
// ---------------------------------------------------------------------------

/// Prints mutating commands instead of running them. Read-only lookups are
/// delegated to `inner` so plans reflect the live state.
pub struct DryRunRunner<R> {
    inner: R,
}

impl<R: CommandRunner> DryRunRunner<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: CommandRunner> CommandRunner for DryRunRunner<R> {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, DeployError> {
        if spec.is_lookup() {
            return self.inner.run(spec).await;
        }
        println!("[dry-run] {spec}");
        Ok(CommandOutput::success(""))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
