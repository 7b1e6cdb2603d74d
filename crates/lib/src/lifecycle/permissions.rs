//! Start-time housekeeping of auth files and marker files in the install
//! tree.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::{ControlError, Result};
use crate::platform::paths::InstallLayout;
use crate::util::{set_mode, touch};

/// Readable by the group the worker processes run under.
pub const SHARED_SECRET_MODE: u32 = 0o640;
/// Owner only.
pub const PRIVATE_SECRET_MODE: u32 = 0o600;

/// Files whose presence is checked by services at startup even when empty.
pub fn touch_markers(layout: &InstallLayout) -> Result<()> {
  touch(&layout.htadmin_metadata())?;
  touch(&layout.opensearch_curlrc("primary"))?;
  touch(&layout.opensearch_curlrc("secondary"))
}

/// Applies owner/group modes to the auth files and every `*.env` under
/// `config_dir`. Missing files are skipped.
pub fn apply(layout: &InstallLayout, config_dir: &Path) -> Result<()> {
  let shared = [layout.htpasswd(), layout.htadmin_config(), layout.htadmin_metadata()];
  let private = [
    layout.ldap_conf(),
    layout.opensearch_curlrc("primary"),
    layout.opensearch_curlrc("secondary"),
  ];

  for (files, mode) in [(&shared[..], SHARED_SECRET_MODE), (&private[..], PRIVATE_SECRET_MODE)] {
    for file in files.iter().filter(|f| f.is_file()) {
      debug!(file = %file.display(), mode = format_args!("{mode:o}"), "setting permissions");
      set_mode(file, mode)?;
    }
  }

  if config_dir.is_dir() {
    for entry in fs::read_dir(config_dir).map_err(|e| ControlError::io(config_dir, e))?.flatten() {
      let path = entry.path();
      if path.is_file() && path.extension().is_some_and(|ext| ext == "env") {
        set_mode(&path, PRIVATE_SECRET_MODE)?;
      }
    }
  }
  Ok(())
}

/// Zeek load files and the stale intel update lock.
pub fn prepare_zeek(layout: &InstallLayout) -> Result<()> {
  touch(&layout.zeek_intel_load())?;
  touch(&layout.zeek_custom_load())?;
  let lock = layout.zeek_intel_lock();
  let removed = if lock.is_dir() {
    fs::remove_dir_all(&lock)
  } else {
    fs::remove_file(&lock)
  };
  match removed {
    Ok(()) => debug!(lock = %lock.display(), "removed stale intel lock"),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
    Err(e) => debug!(lock = %lock.display(), error = %e, "could not remove intel lock"),
  }
  Ok(())
}
