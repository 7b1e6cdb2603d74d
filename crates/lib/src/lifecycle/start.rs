use std::fs;

use tracing::{debug, warn};

use super::bound::CREATE_PATHS;
use super::{LifecycleController, LifecycleState, permissions};
use crate::auth::AuthSelection;
use crate::descriptor::BackendMode;
use crate::error::{ControlError, Result};
use crate::keystore::KeystoreOperator;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartOptions {
  /// Start only these services, skipping all preparation.
  pub services: Vec<String>,
  /// Offer auth setup when credentials are missing.
  pub interactive: bool,
}

impl LifecycleController<'_> {
  pub async fn start(&mut self, options: &StartOptions) -> Result<()> {
    self.transition(LifecycleState::Starting);
    match self.start_inner(options).await {
      Ok(()) => {
        self.transition(LifecycleState::Running);
        Ok(())
      }
      Err(e) => {
        self.transition(LifecycleState::Stopped);
        Err(e)
      }
    }
  }

  async fn start_inner(&mut self, options: &StartOptions) -> Result<()> {
    if options.services.is_empty() {
      self.prepare(options.interactive).await?;
    }
    self.backend.bring_up(&options.services).await
  }

  async fn prepare(&self, interactive: bool) -> Result<()> {
    let layout = self.ctx.layout();
    let config_dir = self.ctx.config_dir();

    permissions::touch_markers(layout)?;

    if !layout.auth_files_exist(config_dir) {
      match self.provisioner.filter(|_| interactive) {
        Some(provisioner) => {
          provisioner.run(AuthSelection::All).await?;
        }
        None => debug!("auth files missing and no interactive setup available"),
      }
    }
    if !layout.auth_files_exist(config_dir) {
      return Err(ControlError::AuthMissing);
    }

    if !layout.opensearch_keystore().is_file() {
      let keystore = KeystoreOperator::new(self.backend, self.ctx.verbose());
      let (ok, output) = keystore.create("opensearch", true).await;
      if !ok {
        warn!(?output, "could not create the opensearch keystore");
      }
    }

    permissions::apply(layout, config_dir)?;
    permissions::prepare_zeek(layout)?;

    if self.backend.mode() == BackendMode::Compose {
      self.create_bound_dirs()?;
    }
    Ok(())
  }

  fn create_bound_dirs(&self) -> Result<()> {
    for entry in CREATE_PATHS {
      let Some(local) = self.backend.resolve_bind_path(entry.service, entry.container_path)? else {
        debug!(service = entry.service, path = entry.container_path, "no bind mount, skipping");
        continue;
      };
      for dir in std::iter::once(local.clone()).chain(entry.relative_dirs.iter().map(|rel| local.join(rel))) {
        debug!(dir = %dir.display(), "ensuring directory exists");
        fs::create_dir_all(&dir).map_err(|e| ControlError::io(&dir, e))?;
      }
    }
    Ok(())
  }
}
