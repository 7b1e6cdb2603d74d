//! Uniform "run a command, capture exit code and output" primitive.
//!
//! Every external tool the controller drives (compose, the container
//! runtime, kubectl, openssl, htpasswd) goes through a [`CommandRunner`].
//! The production implementation is [`ProcessRunner`]; tests substitute a
//! scripted double.

pub mod pods;
mod process;

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{ControlError, Result};

pub(crate) use process::signal_group;
pub use process::{ProcessRunner, spawn_in_group};

/// A single subprocess invocation.
///
/// The child inherits the ambient environment with `env` applied on top;
/// the controller's own environment is never modified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
  pub program: String,
  pub args: Vec<String>,
  pub env: BTreeMap<String, String>,
  pub stdin: Option<Vec<u8>>,
  pub capture_stdout: bool,
  pub capture_stderr: bool,
  pub timeout: Option<Duration>,
  pub cwd: Option<PathBuf>,
}

impl CommandRequest {
  pub fn new(program: impl Into<String>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      env: BTreeMap::new(),
      stdin: None,
      capture_stdout: true,
      capture_stderr: true,
      timeout: None,
      cwd: None,
    }
  }

  /// Builds a request from a full argv. Empty argv yields an empty program,
  /// which fails at spawn time.
  pub fn from_argv<I, S>(argv: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let mut iter = argv.into_iter().map(Into::into);
    let program = iter.next().unwrap_or_default();
    Self::new(program).args(iter)
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

  pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
    self.env.insert(key.into(), value.into());
    self
  }

  pub fn envs(mut self, env: &BTreeMap<String, String>) -> Self {
    self.env.extend(env.iter().map(|(k, v)| (k.clone(), v.clone())));
    self
  }

  pub fn stdin(mut self, bytes: impl Into<Vec<u8>>) -> Self {
    self.stdin = Some(bytes.into());
    self
  }

  /// Capture stdout only; stderr is discarded.
  pub fn stdout_only(mut self) -> Self {
    self.capture_stdout = true;
    self.capture_stderr = false;
    self
  }

  /// Capture stderr only; stdout is discarded.
  pub fn stderr_only(mut self) -> Self {
    self.capture_stdout = false;
    self.capture_stderr = true;
    self
  }

  pub fn timeout(mut self, timeout: Duration) -> Self {
    self.timeout = Some(timeout);
    self
  }

  pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
    self.cwd = Some(cwd.into());
    self
  }

  /// Program followed by its arguments.
  pub fn argv(&self) -> Vec<&str> {
    std::iter::once(self.program.as_str())
      .chain(self.args.iter().map(String::as_str))
      .collect()
  }

  /// Printable command line for diagnostics.
  pub fn display(&self) -> String {
    self.argv().join(" ")
  }
}

/// Exit code and captured output of one invocation, or the aggregate of a
/// pod fan-out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecResult {
  pub exit_code: i32,
  pub output_lines: Vec<String>,
}

impl ExecResult {
  pub fn new(exit_code: i32, output_lines: Vec<String>) -> Self {
    Self {
      exit_code,
      output_lines,
    }
  }

  pub fn success(&self) -> bool {
    self.exit_code == 0
  }

  /// Combines per-target results: success iff every part succeeded, output
  /// concatenated in the order given. The exit code is the first non-zero
  /// code encountered.
  pub fn aggregate(parts: impl IntoIterator<Item = ExecResult>) -> Self {
    let mut combined = ExecResult::default();
    for part in parts {
      if combined.exit_code == 0 && part.exit_code != 0 {
        combined.exit_code = part.exit_code;
      }
      combined.output_lines.extend(part.output_lines);
    }
    combined
  }

  /// Lines with surrounding whitespace removed, blanks dropped.
  pub fn non_empty_lines(&self) -> Vec<&str> {
    self
      .output_lines
      .iter()
      .map(|l| l.trim())
      .filter(|l| !l.is_empty())
      .collect()
  }

  /// Converts a non-zero exit into [`ControlError::CommandFailed`].
  pub fn check(self, context: impl Into<String>) -> Result<Self> {
    if self.success() {
      Ok(self)
    } else {
      Err(ControlError::CommandFailed {
        context: context.into(),
        code: self.exit_code,
        output: self.output_lines,
      })
    }
  }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
  /// Runs `request` to completion.
  ///
  /// A non-zero exit is reported in the result, not as an error. Errors are
  /// reserved for failing to spawn and for [`ControlError::TimedOut`].
  async fn run(&self, request: &CommandRequest) -> Result<ExecResult>;
}
