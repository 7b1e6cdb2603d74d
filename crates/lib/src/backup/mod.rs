//! NetBox configuration database backup and restore.
//!
//! A backup is the `pg_dump` of the NetBox database, gzipped, plus (compose
//! only) a tarball of the NetBox media directory named after it.

mod restore;

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use flate2::Compression;
use flate2::write::GzEncoder;
use tracing::{debug, info};

use crate::backend::{Backend, ExecTarget};
use crate::consts::PROFILE_MALCOLM;
use crate::context::ControlContext;
use crate::descriptor::BackendMode;
use crate::descriptor::envfile;
use crate::error::{ControlError, Result};
use crate::exec::CommandRequest;
use crate::util::{set_mode, write_atomic};

const BACKUP_FILE_MODE: u32 = 0o600;
const MEDIA_PATH: &str = "/opt/netbox/netbox/media";

/// Files produced by [`NetboxBackup::backup`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifacts {
  pub database: PathBuf,
  pub media: Option<PathBuf>,
}

pub fn default_backup_name(now: DateTime<Local>) -> String {
  format!("malcolm_netbox_backup_{}.gz", now.format("%Y%m%d-%H%M%S"))
}

/// `<stem>.media.tar.gz` next to the database dump.
pub fn media_archive_path(database: &Path) -> PathBuf {
  database.with_extension("media.tar.gz")
}

pub struct NetboxBackup<'a> {
  ctx: &'a ControlContext,
  backend: &'a dyn Backend,
}

impl<'a> NetboxBackup<'a> {
  pub fn new(ctx: &'a ControlContext, backend: &'a dyn Backend) -> Self {
    Self { ctx, backend }
  }

  fn require_profile(&self, operation: &str) -> Result<()> {
    if self.ctx.profile() == PROFILE_MALCOLM {
      Ok(())
    } else {
      Err(ControlError::UnsupportedProfile {
        operation: operation.to_string(),
        profile: self.ctx.profile().to_string(),
      })
    }
  }

  /// Exec target for a NetBox service. Compose runs as PUID:PGID, the
  /// cluster backend addresses the named container.
  fn target(&self, service: &str, container: &str) -> Result<ExecTarget> {
    let target = ExecTarget::service(service).container(container);
    Ok(match self.backend.mode() {
      BackendMode::Compose => target.user(envfile::uid_gid(self.ctx.config_dir())?.to_string()),
      BackendMode::Cluster => target,
    })
  }

  /// Dumps the NetBox database to `destination` (default
  /// `malcolm_netbox_backup_<timestamp>.gz` in the current directory).
  /// Nothing is written when the dump fails or is empty.
  pub async fn backup(&self, destination: Option<&Path>) -> Result<BackupArtifacts> {
    self.require_profile("NetBox backup")?;

    let target = self.target("netbox-postgres", "netbox-postgres-container")?.max_pods(1);
    let dump = CommandRequest::new("pg_dump")
      .args(["-U", "netbox", "-d", "netbox"])
      .stdout_only();
    let result = self
      .backend
      .exec(&target, &dump)
      .await
      .map_err(|e| ControlError::BackupFailed {
        message: e.to_string(),
        output: e.output().to_vec(),
      })?;
    if !result.success() || result.non_empty_lines().is_empty() {
      return Err(ControlError::BackupFailed {
        message: format!("pg_dump exited with code {} and {} lines of output", result.exit_code, result.output_lines.len()),
        output: result.output_lines,
      });
    }

    let database = destination
      .map(Path::to_path_buf)
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or_else(|| PathBuf::from(default_backup_name(Local::now())));
    let mut sql = result.output_lines.join("\n");
    sql.push('\n');
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
      .write_all(sql.as_bytes())
      .map_err(|e| ControlError::io(&database, e))?;
    let compressed = encoder.finish().map_err(|e| ControlError::io(&database, e))?;
    write_atomic(&database, &compressed, BACKUP_FILE_MODE)?;
    info!(path = %database.display(), lines = result.output_lines.len(), "NetBox database backed up");

    let media = self.archive_media(&database)?;
    Ok(BackupArtifacts { database, media })
  }

  fn archive_media(&self, database: &Path) -> Result<Option<PathBuf>> {
    let source = match self.backend.resolve_bind_path("netbox", MEDIA_PATH) {
      Ok(Some(dir)) if dir.is_dir() => dir,
      Ok(_) => return Ok(None),
      Err(e) => {
        debug!(error = %e, "NetBox media is not reachable from this host");
        return Ok(None);
      }
    };

    let archive = media_archive_path(database);
    let dir = archive
      .parent()
      .filter(|p| !p.as_os_str().is_empty())
      .unwrap_or_else(|| Path::new("."));
    let temp = tempfile::Builder::new()
      .prefix(".malctl-")
      .tempfile_in(dir)
      .map_err(|e| ControlError::io(dir, e))?;
    let encoder = GzEncoder::new(temp.reopen().map_err(|e| ControlError::io(temp.path(), e))?, Compression::default());
    let mut tarball = tar::Builder::new(encoder);
    tarball
      .append_dir_all(".", &source)
      .map_err(|e| ControlError::io(&source, e))?;
    tarball
      .into_inner()
      .and_then(|gz| gz.finish())
      .map_err(|e| ControlError::io(&archive, e))?;
    set_mode(temp.path(), BACKUP_FILE_MODE)?;
    temp.persist(&archive).map_err(|e| ControlError::io(&archive, e.error))?;
    info!(path = %archive.display(), "NetBox media archived");
    Ok(Some(archive))
  }
}
