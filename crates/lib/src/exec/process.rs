use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tracing::{debug, trace, warn};

use super::{CommandRequest, CommandRunner, ExecResult};
use crate::error::{ControlError, Result};

/// Runs requests as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
  pub fn new() -> Self {
    Self
  }
}

fn build_command(request: &CommandRequest) -> Command {
  let mut command = Command::new(&request.program);
  command
    .args(&request.args)
    .envs(&request.env)
    // own process group so a timeout can take down grandchildren too
    .process_group(0)
    .kill_on_drop(true)
    .stdin(if request.stdin.is_some() {
      Stdio::piped()
    } else {
      Stdio::null()
    })
    .stdout(if request.capture_stdout {
      Stdio::piped()
    } else {
      Stdio::null()
    })
    .stderr(if request.capture_stderr {
      Stdio::piped()
    } else {
      Stdio::null()
    });
  if let Some(cwd) = &request.cwd {
    command.current_dir(cwd);
  }
  command
}

/// Spawns `request` in its own process group with stdout piped, for callers
/// that consume output as it arrives.
pub fn spawn_in_group(request: &CommandRequest) -> Result<Child> {
  let mut command = build_command(request);
  command.stdout(Stdio::piped());
  debug!(command = %request.display(), "spawning streaming process");
  command.spawn().map_err(|source| ControlError::Spawn {
    command: request.program.clone(),
    source,
  })
}

/// Sends `signal` to the process group led by `pid`.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
  let Ok(raw) = i32::try_from(pid) else {
    return;
  };
  if let Err(e) = killpg(Pid::from_raw(raw), signal) {
    trace!(pid, ?signal, error = %e, "signalling process group failed");
  }
}

async fn read_all<R: AsyncRead + Unpin>(reader: Option<R>) -> Vec<u8> {
  let mut buf = Vec::new();
  if let Some(mut reader) = reader {
    let _ = reader.read_to_end(&mut buf).await;
  }
  buf
}

async fn collect(child: &mut Child, stdin: Option<&[u8]>) -> std::io::Result<(ExitStatus, Vec<u8>, Vec<u8>)> {
  let writer = child.stdin.take();
  let stdout = child.stdout.take();
  let stderr = child.stderr.take();

  let feed = async move {
    if let (Some(mut writer), Some(bytes)) = (writer, stdin) {
      // the child may exit without draining stdin
      if let Err(e) = writer.write_all(bytes).await {
        trace!(error = %e, "writing stdin failed");
      }
    }
  };
  let ((), out, err) = tokio::join!(feed, read_all(stdout), read_all(stderr));
  let status = child.wait().await?;
  Ok((status, out, err))
}

fn exit_code(status: ExitStatus) -> i32 {
  status
    .code()
    .or_else(|| status.signal().map(|s| 128 + s))
    .unwrap_or(-1)
}

fn to_lines(bytes: &[u8]) -> impl Iterator<Item = String> + '_ {
  bytes
    .split(|b| *b == b'\n')
    .map(|line| String::from_utf8_lossy(line.strip_suffix(b"\r").unwrap_or(line)).into_owned())
}

fn output_lines(stdout: &[u8], stderr: &[u8]) -> Vec<String> {
  let mut lines: Vec<String> = Vec::new();
  for stream in [stdout, stderr] {
    let mut part: Vec<String> = to_lines(stream).collect();
    if part.last().is_some_and(String::is_empty) {
      part.pop();
    }
    lines.extend(part);
  }
  lines
}

#[async_trait]
impl CommandRunner for ProcessRunner {
  async fn run(&self, request: &CommandRequest) -> Result<ExecResult> {
    debug!(command = %request.display(), "running");

    let mut child = build_command(request).spawn().map_err(|source| ControlError::Spawn {
      command: request.program.clone(),
      source,
    })?;
    let pid = child.id();
    let stdin = request.stdin.as_deref();

    let outcome = match request.timeout {
      Some(limit) => {
        let timed = tokio::time::timeout(limit, collect(&mut child, stdin)).await;
        let Ok(outcome) = timed else {
          warn!(command = %request.display(), timeout = ?limit, "command timed out, killing process group");
          if let Some(pid) = pid {
            signal_group(pid, Signal::SIGKILL);
          }
          let _ = child.wait().await;
          return Err(ControlError::TimedOut {
            command: request.display(),
            timeout: limit,
          });
        };
        outcome
      }
      None => collect(&mut child, stdin).await,
    };

    let (status, stdout, stderr) = outcome.map_err(|source| ControlError::Spawn {
      command: request.program.clone(),
      source,
    })?;
    let result = ExecResult::new(exit_code(status), output_lines(&stdout, &stderr));
    debug!(command = %request.program, exit_code = result.exit_code, lines = result.output_lines.len(), "finished");
    Ok(result)
  }
}
