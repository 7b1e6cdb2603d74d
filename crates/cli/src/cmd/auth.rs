//! `--auth` and `--auth-noninteractive`.

use anyhow::{Context, Result};

use malctl_lib::auth::{AuthSelection, Provisioner};

use crate::output::{print_info, print_success};

pub async fn cmd_auth(provisioner: &Provisioner<'_>, non_interactive: bool) -> Result<()> {
  let selection = if non_interactive {
    AuthSelection::All
  } else {
    provisioner.choose()?
  };
  let ran = provisioner
    .run(selection)
    .await
    .context("Authentication setup failed")?;

  if ran.is_empty() {
    print_info("No authentication settings were changed");
  } else {
    let names: Vec<&str> = ran.iter().map(|t| t.name()).collect();
    print_success(&format!("Authentication setup complete: {}", names.join(", ")));
  }
  Ok(())
}
