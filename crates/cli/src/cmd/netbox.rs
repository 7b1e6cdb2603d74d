//! NetBox configuration database backup and restore.

use std::path::Path;

use anyhow::{Context, Result};

use malctl_lib::backend::Backend;
use malctl_lib::backup::NetboxBackup;
use malctl_lib::context::ControlContext;

use crate::output::{print_stat, print_success, print_warning};
use crate::prompts::confirm;

/// An empty `destination` picks the default timestamped name.
pub async fn cmd_backup(ctx: &ControlContext, backend: &dyn Backend, destination: &str) -> Result<()> {
  let destination = (!destination.is_empty()).then(|| Path::new(destination));
  let artifacts = NetboxBackup::new(ctx, backend).backup(destination).await?;

  print_success("NetBox configuration database saved");
  print_stat("database", &artifacts.database.display().to_string());
  if let Some(media) = &artifacts.media {
    print_stat("media", &media.display().to_string());
  }
  Ok(())
}

pub async fn cmd_restore(ctx: &ControlContext, backend: &dyn Backend, backup: &Path, force: bool) -> Result<()> {
  if !confirm(
    &format!(
      "Replace the NetBox configuration database with {}?",
      backup.display()
    ),
    force,
  )? {
    print_warning("Restore cancelled");
    return Ok(());
  }

  NetboxBackup::new(ctx, backend)
    .restore(backup)
    .await
    .with_context(|| format!("Failed to restore {}", backup.display()))?;
  print_success(&format!("NetBox configuration database restored from {}", backup.display()));
  Ok(())
}
