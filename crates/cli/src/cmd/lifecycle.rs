//! `--start`, `--stop`, `--restart` and `--wipe`.

use anyhow::{Context, Result};

use malctl_lib::lifecycle::{LifecycleController, StartOptions, StopOptions};

use crate::Cli;
use crate::output::{print_success, print_warning};
use crate::prompts::confirm;

fn describe(services: &[String]) -> String {
  if services.is_empty() {
    "Malcolm".to_string()
  } else {
    format!("Malcolm's {} service(s)", services.join(", "))
  }
}

/// Stops (and with `--wipe` clears) the stack. Returns false when the
/// operator declined the wipe.
pub async fn cmd_stop(controller: &mut LifecycleController<'_>, cli: &Cli) -> Result<bool> {
  if cli.wipe
    && !confirm(
      "Stop Malcolm and permanently delete all of its data (logs, PCAP, indices)?",
      cli.force,
    )?
  {
    print_warning("Wipe cancelled, nothing was changed");
    return Ok(false);
  }

  let options = StopOptions {
    services: cli.service.clone(),
    wipe: cli.wipe,
    reclaim_volumes: cli.reclaim_volumes(),
  };
  let what = describe(&options.services);
  let outcome = controller
    .stop(&options)
    .await
    .with_context(|| format!("{what} failed to stop"))?;

  for warning in &outcome.warnings {
    print_warning(warning);
  }
  if cli.wipe {
    print_success(&format!("Stopped {what} and deleted its data"));
  } else {
    print_success(&format!("Stopped {what}"));
  }
  Ok(true)
}

pub async fn cmd_start(controller: &mut LifecycleController<'_>, cli: &Cli, interactive: bool) -> Result<()> {
  let options = StartOptions {
    services: cli.service.clone(),
    interactive,
  };
  let what = describe(&options.services);
  controller
    .start(&options)
    .await
    .with_context(|| format!("{what} failed to start"))?;
  print_success(&format!("Started {what}, waiting for it to become ready"));
  Ok(())
}
