use anyhow::{Context, Result};

use malctl_lib::backend::Backend;

use crate::output::print_access_banner;

pub async fn cmd_status(backend: &dyn Backend, services: &[String]) -> Result<()> {
  let lines = backend
    .status(services)
    .await
    .context("Failed to get Malcolm status")?;
  for line in lines {
    println!("{line}");
  }
  Ok(())
}

pub async fn cmd_urls(backend: &dyn Backend) -> Result<()> {
  let host = backend
    .access_host()
    .await
    .context("Failed to determine the Malcolm address")?;
  print_access_banner(&host);
  Ok(())
}
