//! Shared filesystem helpers.

use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use crate::error::{ControlError, Result};

#[cfg(test)]
pub mod testutil;

/// Replaces `path` with `contents` in one step.
///
/// Writes to a sibling temp file, applies `mode`, then renames over the
/// target, so readers never observe a partially written file.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32) -> Result<()> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  fs::create_dir_all(dir).map_err(|e| ControlError::io(dir, e))?;

  let mut temp = tempfile::Builder::new()
    .prefix(".malctl-")
    .tempfile_in(dir)
    .map_err(|e| ControlError::io(dir, e))?;
  temp.write_all(contents).map_err(|e| ControlError::io(temp.path(), e))?;
  temp.flush().map_err(|e| ControlError::io(temp.path(), e))?;
  fs::set_permissions(temp.path(), fs::Permissions::from_mode(mode)).map_err(|e| ControlError::io(temp.path(), e))?;
  temp.persist(path).map_err(|e| ControlError::io(path, e.error))?;
  Ok(())
}

/// Creates `path` if missing without altering existing contents.
pub fn touch(path: &Path) -> Result<()> {
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).map_err(|e| ControlError::io(parent, e))?;
  }
  fs::OpenOptions::new()
    .create(true)
    .append(true)
    .open(path)
    .map(drop)
    .map_err(|e| ControlError::io(path, e))
}

pub fn set_mode(path: &Path, mode: u32) -> Result<()> {
  fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|e| ControlError::io(path, e))
}
