//! Follows aggregated service logs and watches for the ready sentinel.

mod format;

use std::io::Write;
use std::sync::LazyLock;
use std::time::Duration;

use nix::sys::signal::Signal;
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use format::{LineFormatter, redact, strip_ansi};

use crate::backend::LogsPlan;
use crate::error::{ControlError, Result};
use crate::exec::{CommandRunner, signal_group, spawn_in_group};

const IDLE_INTERVAL: Duration = Duration::from_millis(500);
const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Logstash reports every pipeline running once ingest is up.
static READY_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r".+Pipelines\s+running\s+\{.*:non_running_pipelines=>\[\]\}").unwrap());

pub fn is_ready_line(line: &str) -> bool {
  READY_RE.is_match(&strip_ansi(line))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorOutcome {
  /// The ready sentinel was seen and the monitor stopped because of it.
  pub ready: bool,
  pub lines: usize,
}

pub struct LogMonitor {
  plan: LogsPlan,
  formatter: LineFormatter,
  stop_on_ready: bool,
  cancel: CancellationToken,
}

impl LogMonitor {
  pub fn new(plan: LogsPlan, formatter: LineFormatter) -> Self {
    Self {
      plan,
      formatter,
      stop_on_ready: false,
      cancel: CancellationToken::new(),
    }
  }

  /// Stop following once the stack reports it is ready.
  pub fn stop_on_ready(mut self, stop: bool) -> Self {
    self.stop_on_ready = stop;
    self
  }

  pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
    self.cancel = cancel;
    self
  }

  pub fn cancellation(&self) -> CancellationToken {
    self.cancel.clone()
  }

  /// Prints the preamble, then follows the log stream into `sink` until it
  /// ends, the token is cancelled, or (when asked) the stack is ready.
  pub async fn run<W: Write>(&self, runner: &dyn CommandRunner, sink: &mut W) -> Result<MonitorOutcome> {
    if let Some(preamble) = &self.plan.preamble {
      let result = runner.run(preamble).await?;
      for line in &result.output_lines {
        emit(sink, line)?;
      }
    }

    let follow = &self.plan.follow;
    let mut child = spawn_in_group(follow)?;
    let stdout = child.stdout.take().ok_or_else(|| ControlError::Spawn {
      command: follow.program.clone(),
      source: std::io::Error::other("stdout not captured"),
    })?;
    let mut outcome = MonitorOutcome::default();

    let followed = self.follow(stdout, sink, &mut outcome).await;
    if let Ok(true) = followed {
      match child.wait().await {
        Ok(status) => debug!(%status, "log follower exited"),
        Err(e) => warn!(error = %e, "waiting for log follower failed"),
      }
    } else {
      terminate(&mut child).await;
    }
    followed.map(|_| outcome)
  }

  /// Copies lines from the follower into `sink`. Returns true when the
  /// stream ended on its own; false when it was cut short.
  async fn follow<R, W>(&self, stdout: R, sink: &mut W, outcome: &mut MonitorOutcome) -> Result<bool>
  where
    R: AsyncRead + Unpin,
    W: Write,
  {
    let mut reader = BufReader::new(stdout);
    // read_until keeps partial input in `buf` across idle timeouts
    let mut buf = Vec::new();

    loop {
      let read = tokio::select! {
        biased;
        () = self.cancel.cancelled() => return Ok(false),
        read = tokio::time::timeout(IDLE_INTERVAL, reader.read_until(b'\n', &mut buf)) => read,
      };
      let exhausted = match read {
        Err(_idle) => continue,
        Ok(Ok(0)) => true,
        Ok(Ok(_)) => false,
        Ok(Err(e)) => {
          warn!(error = %e, "log stream read failed");
          return Ok(false);
        }
      };
      if buf.is_empty() {
        return Ok(exhausted);
      }

      let line = String::from_utf8_lossy(&buf).trim_end_matches(['\n', '\r']).to_string();
      buf.clear();
      if let Some(shown) = self.formatter.format(&line) {
        emit(sink, &shown)?;
        outcome.lines += 1;
      }
      if self.stop_on_ready && is_ready_line(&line) {
        info!("stack reported ready");
        outcome.ready = true;
        self.cancel.cancel();
        return Ok(false);
      }
      if exhausted {
        return Ok(true);
      }
    }
  }
}

fn emit<W: Write>(sink: &mut W, line: &str) -> Result<()> {
  writeln!(sink, "{line}").map_err(|e| ControlError::io("<stdout>", e))
}

/// SIGTERM to the follower's process group, SIGKILL if it is still around
/// after the grace period.
async fn terminate(child: &mut Child) {
  let Some(pid) = child.id() else {
    return;
  };
  signal_group(pid, Signal::SIGTERM);
  match tokio::time::timeout(TERMINATE_GRACE, child.wait()).await {
    Ok(_) => debug!(pid, "log follower terminated"),
    Err(_) => {
      warn!(pid, "log follower ignored SIGTERM, killing");
      signal_group(pid, Signal::SIGKILL);
      let _ = child.wait().await;
    }
  }
}

/// Cancels `token` on SIGINT or SIGTERM. The listener does nothing else.
/// Unix only.
#[cfg(unix)]
pub fn cancel_on_signals(token: CancellationToken) -> JoinHandle<()> {
  tokio::spawn(async move {
    use tokio::signal::unix::{SignalKind, signal};
    let (Ok(mut interrupt), Ok(mut terminate)) = (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) else {
      warn!("unable to install signal handlers");
      return;
    };
    tokio::select! {
      _ = interrupt.recv() => debug!("SIGINT received"),
      _ = terminate.recv() => debug!("SIGTERM received"),
      () = token.cancelled() => return,
    }
    token.cancel();
  })
}
