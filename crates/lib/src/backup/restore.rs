use std::fs::{self, File};
use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use tracing::{debug, info, warn};

use super::{NetboxBackup, media_archive_path};
use crate::backend::ExecTarget;
use crate::descriptor::BackendMode;
use crate::error::{ControlError, Result};
use crate::exec::{CommandRequest, ExecResult};

const STAGING_FALLBACK: &str = "/tmp";
const NETBOX_PYTHON: &str = "/opt/netbox/venv/bin/python";
const NETBOX_INIT: &str = "/usr/local/bin/netbox_init.py";

/// Where the backup was staged inside the container and how to remove it.
enum Staging {
  /// Private directory from `mktemp`, removed wholesale.
  Dir(String),
  /// Shared directory; only the staged files themselves are removed.
  Shared { dir: String, files: Vec<String> },
}

impl Staging {
  fn shared() -> Self {
    Staging::Shared {
      dir: STAGING_FALLBACK.to_string(),
      files: Vec::new(),
    }
  }

  fn dir(&self) -> &str {
    match self {
      Staging::Dir(dir) | Staging::Shared { dir, .. } => dir,
    }
  }

  /// Path inside the container for a staged file called `name`.
  fn path(&mut self, name: &str) -> String {
    let path = format!("{}/{name}", self.dir());
    if let Staging::Shared { files, .. } = self {
      if !files.contains(&path) {
        files.push(path.clone());
      }
    }
    path
  }

  fn cleanup(&self) -> CommandRequest {
    match self {
      Staging::Dir(dir) => CommandRequest::new("rm").args(["-rf", dir.as_str()]),
      Staging::Shared { files, .. } => CommandRequest::new("rm").arg("-f").arg("--").args(files),
    }
  }
}

fn file_name(path: &Path) -> String {
  path
    .file_name()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}

fn file_stem(path: &Path) -> String {
  path
    .file_stem()
    .map(|n| n.to_string_lossy().into_owned())
    .unwrap_or_default()
}

fn restore_failed(message: String, result: ExecResult) -> ControlError {
  ControlError::RestoreFailed {
    message,
    output: result.output_lines,
  }
}

fn preload(staged: &str) -> CommandRequest {
  CommandRequest::new(NETBOX_PYTHON).args([NETBOX_INIT, "--preload-backup", staged])
}

impl NetboxBackup<'_> {
  /// Loads a database dump produced by [`NetboxBackup::backup`] into the
  /// running NetBox. The staged copy is removed whether or not the restore
  /// succeeds.
  pub async fn restore(&self, backup: &Path) -> Result<()> {
    self.require_profile("NetBox restore")?;
    if !backup.is_file() {
      return Err(ControlError::RestoreFailed {
        message: format!("backup file {} does not exist", backup.display()),
        output: Vec::new(),
      });
    }

    match self.backend.mode() {
      BackendMode::Compose => self.restore_compose(backup).await,
      BackendMode::Cluster => self.restore_cluster(backup).await,
    }
  }

  async fn restore_compose(&self, backup: &Path) -> Result<()> {
    let target = self.target("netbox", "netbox-container")?;
    let mktemp = CommandRequest::new("mktemp")
      .args(["-d", "-t", "restore.XXXXXXXXXX"])
      .stdout_only();
    let mut staging = match self.backend.exec(&target, &mktemp).await {
      Ok(result) if result.success() && !result.non_empty_lines().is_empty() => {
        Staging::Dir(result.non_empty_lines()[0].to_string())
      }
      Ok(result) => {
        debug!(exit_code = result.exit_code, "mktemp unavailable, staging in {STAGING_FALLBACK}");
        Staging::shared()
      }
      Err(e) => {
        debug!(error = %e, "mktemp unavailable, staging in {STAGING_FALLBACK}");
        Staging::shared()
      }
    };

    let outcome = self.stage_and_load_compose(&target, &mut staging, backup).await;
    self.clean_up(&target, &staging).await;
    outcome
  }

  async fn stage_and_load_compose(&self, target: &ExecTarget, staging: &mut Staging, backup: &Path) -> Result<()> {
    let media = media_archive_path(backup);
    let files = std::iter::once(backup).chain(media.is_file().then_some(media.as_path()));
    for file in files {
      let contents = fs::read(file).map_err(|e| ControlError::io(file, e))?;
      let staged = staging.path(&file_name(file));
      self.stage(target, &staged, contents).await?;
    }

    let staged = staging.path(&file_name(backup));
    self.load(target, &staged, backup).await
  }

  async fn restore_cluster(&self, backup: &Path) -> Result<()> {
    let target = self.target("netbox", "netbox-container")?;
    let mut sql = Vec::new();
    GzDecoder::new(File::open(backup).map_err(|e| ControlError::io(backup, e))?)
      .read_to_end(&mut sql)
      .map_err(|e| ControlError::RestoreFailed {
        message: format!("unable to decompress {}: {e}", backup.display()),
        output: Vec::new(),
      })?;
    let mut staging = Staging::shared();
    let staged = staging.path(&format!("{}.txt", file_stem(backup)));

    let outcome = async {
      self.stage(&target, &staged, sql).await?;
      self.load(&target, &staged, backup).await
    }
    .await;
    self.clean_up(&target, &staging).await;
    outcome
  }

  async fn stage(&self, target: &ExecTarget, staged: &str, contents: Vec<u8>) -> Result<()> {
    let tee = CommandRequest::new("tee").arg(staged).stdin(contents).stderr_only();
    let result = self.backend.exec(target, &tee).await?;
    if !result.success() {
      return Err(restore_failed(
        format!("error {} copying backed-up NetBox file to {staged}", result.exit_code),
        result,
      ));
    }
    debug!(staged, "staged NetBox backup");
    Ok(())
  }

  async fn load(&self, target: &ExecTarget, staged: &str, backup: &Path) -> Result<()> {
    let result = self.backend.exec(target, &preload(staged)).await?;
    if !result.success() {
      return Err(restore_failed(
        format!("error {} restoring NetBox database {}", result.exit_code, file_name(backup)),
        result,
      ));
    }
    info!(backup = %backup.display(), "NetBox database restored");
    Ok(())
  }

  async fn clean_up(&self, target: &ExecTarget, staging: &Staging) {
    match self.backend.exec(target, &staging.cleanup()).await {
      Ok(result) if result.success() => {}
      Ok(result) => warn!(exit_code = result.exit_code, dir = staging.dir(), "failed to remove staged NetBox backup"),
      Err(e) => warn!(error = %e, dir = staging.dir(), "failed to remove staged NetBox backup"),
    }
  }
}
