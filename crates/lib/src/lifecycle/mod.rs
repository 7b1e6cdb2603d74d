//! Start, stop, wipe and restart of the whole stack or individual services.

pub mod bound;
pub mod permissions;
mod start;
mod stop;
#[cfg(test)]
mod tests;

use std::fmt;

use tracing::info;

use crate::auth::Provisioner;
use crate::backend::Backend;
use crate::context::ControlContext;
use crate::error::Result;

pub use crate::backend::{StopOptions, StopOutcome};
pub use start::StartOptions;
pub use stop::{prune_empty_dirs, wipe_bound_paths};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
  Stopped,
  Starting,
  Running,
  Stopping,
  Wiping,
}

impl fmt::Display for LifecycleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Self::Stopped => "stopped",
      Self::Starting => "starting",
      Self::Running => "running",
      Self::Stopping => "stopping",
      Self::Wiping => "wiping",
    };
    f.write_str(name)
  }
}

pub struct LifecycleController<'a> {
  ctx: &'a ControlContext,
  backend: &'a dyn Backend,
  provisioner: Option<&'a Provisioner<'a>>,
  state: LifecycleState,
}

impl<'a> LifecycleController<'a> {
  pub fn new(ctx: &'a ControlContext, backend: &'a dyn Backend) -> Self {
    Self {
      ctx,
      backend,
      provisioner: None,
      state: LifecycleState::Stopped,
    }
  }

  /// Auth setup to offer when starting interactively without credentials.
  pub fn with_provisioner(mut self, provisioner: &'a Provisioner<'a>) -> Self {
    self.provisioner = Some(provisioner);
    self
  }

  pub fn state(&self) -> LifecycleState {
    self.state
  }

  fn transition(&mut self, next: LifecycleState) {
    info!(from = %self.state, to = %next, mode = %self.backend.mode(), "lifecycle transition");
    self.state = next;
  }

  pub async fn restart(&mut self, stop: &StopOptions, start: &StartOptions) -> Result<StopOutcome> {
    let outcome = self.stop(stop).await?;
    self.start(start).await?;
    Ok(outcome)
  }
}
