//! `--logs`, and the log follow that runs after a start.

use std::io::IsTerminal;

use anyhow::Result;

use malctl_lib::backend::{Backend, LogsOptions};
use malctl_lib::exec::CommandRunner;
#[cfg(unix)]
use malctl_lib::logs::cancel_on_signals;
use malctl_lib::logs::{LineFormatter, LogMonitor};

use crate::Cli;

/// Follows logs until the stream ends or is interrupted. With
/// `stop_on_ready` it returns true once the stack reports it is ready.
pub async fn cmd_logs(backend: &dyn Backend, runner: &dyn CommandRunner, cli: &Cli, stop_on_ready: bool) -> Result<bool> {
  let color = std::io::stdout().is_terminal();
  let plan = backend.logs_plan(&LogsOptions {
    services: cli.service.clone(),
    lines: cli.lines,
    color,
  })?;

  let monitor = LogMonitor::new(plan, LineFormatter::new(color)).stop_on_ready(stop_on_ready);
  #[cfg(unix)]
  let signals = cancel_on_signals(monitor.cancellation());
  let mut stdout = std::io::stdout().lock();
  let outcome = monitor.run(runner, &mut stdout).await;
  #[cfg(unix)]
  signals.abort();

  Ok(outcome?.ready)
}
