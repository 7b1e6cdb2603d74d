//! Operation dispatch for one `malctl` invocation.
//!
//! The context is built once (detecting the backend), then each requested
//! operation runs in a fixed order against the same backend.

mod auth;
mod lifecycle;
mod logs;
mod netbox;
mod status;

use std::io::IsTerminal;

use anyhow::{Context, Result, bail};
use tracing::debug;

use malctl_lib::auth::{NonInteractive, Prompter, Provisioner};
use malctl_lib::backend;
use malctl_lib::context::ControlContext;
use malctl_lib::descriptor::envfile;
use malctl_lib::exec::ProcessRunner;
use malctl_lib::lifecycle::LifecycleController;
use malctl_lib::platform;

use crate::Cli;
use crate::prompts::TerminalPrompter;

pub use auth::cmd_auth;
pub use lifecycle::{cmd_start, cmd_stop};
pub use logs::cmd_logs;
pub use netbox::{cmd_backup, cmd_restore};
pub use status::{cmd_status, cmd_urls};

/// Runs every operation requested on the command line.
pub fn run(cli: &Cli) -> Result<()> {
  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(session(cli))
}

async fn session(cli: &Cli) -> Result<()> {
  let runner = ProcessRunner::new();
  let ctx = ControlContext::load(cli.context_options(), &runner).await?;

  if platform::is_elevated() {
    bail!("malctl should not be run as root");
  }

  // every operation reads the .env files the descriptor references
  let synced = envfile::sync_examples(&ctx.layout().env_examples_dir(), ctx.config_dir())?;
  if !synced.is_empty() {
    debug!(files = ?synced, "env files created or extended from templates");
  }

  let backend = backend::from_context(&ctx, &runner);
  let terminal = TerminalPrompter::new();
  let prompter: &dyn Prompter = if cli.auth_noninteractive {
    &NonInteractive
  } else {
    &terminal
  };
  let provisioner = Provisioner::new(&ctx, backend.as_ref(), &runner, prompter, cli.auth_options());
  let mut controller = LifecycleController::new(&ctx, backend.as_ref()).with_provisioner(&provisioner);

  // a declined wipe confirmation ends the run
  if (cli.restart || cli.stop || cli.wipe) && !cmd_stop(&mut controller, cli).await? {
    return Ok(());
  }

  if cli.auth || cli.auth_noninteractive {
    cmd_auth(&provisioner, cli.auth_noninteractive).await?;
  }

  let starting = cli.start || cli.restart;
  if starting {
    let interactive = !cli.auth_noninteractive && std::io::stdin().is_terminal();
    cmd_start(&mut controller, cli, interactive).await?;
  }

  if starting || cli.logs {
    let ready = cmd_logs(backend.as_ref(), &runner, cli, starting && !cli.logs).await?;
    if ready {
      crate::output::print_success("Started Malcolm");
      cmd_urls(backend.as_ref()).await?;
    }
  }

  if cli.status {
    cmd_status(backend.as_ref(), &cli.service).await?;
  }

  if cli.urls {
    cmd_urls(backend.as_ref()).await?;
  }

  if let Some(destination) = &cli.netbox_backup {
    cmd_backup(&ctx, backend.as_ref(), destination).await?;
  }

  if let Some(backup) = &cli.netbox_restore {
    cmd_restore(&ctx, backend.as_ref(), backup, cli.force).await?;
  }

  Ok(())
}
