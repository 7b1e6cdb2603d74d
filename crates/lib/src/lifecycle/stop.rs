use std::fs;
use std::path::Path;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::bound::{BoundPath, WIPE_PATHS};
use super::{LifecycleController, LifecycleState};
use crate::backend::{Backend, StopOptions, StopOutcome};
use crate::descriptor::BackendMode;
use crate::error::{ControlError, Result};

impl LifecycleController<'_> {
  /// Stops the stack (or the named services), clearing persisted data when
  /// `options.wipe` is set.
  pub async fn stop(&mut self, options: &StopOptions) -> Result<StopOutcome> {
    self.transition(if options.wipe {
      LifecycleState::Wiping
    } else {
      LifecycleState::Stopping
    });

    let result = self.backend.tear_down(options).await;
    let outcome = match result {
      Ok(outcome) => outcome,
      Err(e) => {
        self.transition(LifecycleState::Running);
        return Err(e);
      }
    };
    for warning in &outcome.warnings {
      warn!("{warning}");
    }
    self.transition(LifecycleState::Stopped);

    if options.wipe && options.services.is_empty() {
      match self.backend.mode() {
        BackendMode::Compose => {
          wipe_bound_paths(self.backend, WIPE_PATHS);
          info!("stack stopped and its data cleared");
        }
        BackendMode::Cluster => {
          return Err(ControlError::unsupported_in_mode(
            "wiping persistent volume data (it must be deleted manually)",
            BackendMode::Cluster,
          ));
        }
      }
    }
    Ok(outcome)
  }
}

/// Clears the host directories behind `paths`. Unresolvable entries are
/// skipped and deletion errors are ignored.
pub fn wipe_bound_paths(backend: &dyn Backend, paths: &[BoundPath]) {
  for entry in paths {
    let local = match backend.resolve_bind_path(entry.service, entry.container_path) {
      Ok(Some(local)) if local.is_dir() => local,
      Ok(_) => {
        debug!(service = entry.service, path = entry.container_path, "nothing to wipe");
        continue;
      }
      Err(e) => {
        debug!(service = entry.service, path = entry.container_path, error = %e, "cannot resolve path to wipe");
        continue;
      }
    };

    if entry.delete_files {
      debug!(dir = %local.display(), "deleting files");
      delete_files(&local);
    }
    for rel in entry.relative_dirs {
      let dir = local.join(rel);
      if dir.is_dir() {
        debug!(dir = %dir.display(), "removing directory");
        let _ = fs::remove_dir_all(&dir);
      }
    }
    for rel in entry.clean_empty_dirs {
      let dir = local.join(rel);
      if dir.is_dir() {
        debug!(dir = %dir.display(), "pruning empty directories");
        prune_empty_dirs(&dir);
      }
    }
  }
}

/// Deletes files and symlinks under `root`, keeping directories and
/// anything named `.git*`.
fn delete_files(root: &Path) {
  for entry in WalkDir::new(root).into_iter().filter_map(|e| e.ok()) {
    if entry.file_type().is_dir() || entry.file_name().to_string_lossy().starts_with(".git") {
      continue;
    }
    if let Err(e) = fs::remove_file(entry.path()) {
      debug!(file = %entry.path().display(), error = %e, "could not delete");
    }
  }
}

/// Removes every empty directory below `root`, deepest first. `root`
/// itself is kept.
pub fn prune_empty_dirs(root: &Path) {
  for entry in WalkDir::new(root)
    .min_depth(1)
    .contents_first(true)
    .into_iter()
    .filter_map(|e| e.ok())
    .filter(|e| e.file_type().is_dir())
  {
    // fails harmlessly on directories that still have contents
    let _ = fs::remove_dir(entry.path());
  }
}
