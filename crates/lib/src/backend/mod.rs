//! The two deployment substrates behind one operation vocabulary.
//!
//! [`ComposeBackend`] drives a single-host compose runtime; [`ClusterBackend`]
//! drives a Kubernetes namespace through `kubectl`. Everything above this
//! layer talks to `dyn Backend` and never branches on tool syntax.

mod cluster;
mod compose;
pub mod storage;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::context::ControlContext;
use crate::descriptor::BackendMode;
use crate::error::Result;
use crate::exec::{CommandRequest, CommandRunner, ExecResult};
use crate::keystore::KeystoreRequest;

pub use cluster::ClusterBackend;
pub use compose::ComposeBackend;

/// Where an exec lands. Compose honours `user` and `workdir`; the cluster
/// backend honours `container` and `max_pods`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecTarget {
  pub service: String,
  pub container: Option<String>,
  pub user: Option<String>,
  pub workdir: Option<String>,
  pub max_pods: Option<usize>,
}

impl ExecTarget {
  pub fn service(service: impl Into<String>) -> Self {
    Self {
      service: service.into(),
      ..Default::default()
    }
  }

  pub fn container(mut self, container: impl Into<String>) -> Self {
    self.container = Some(container.into());
    self
  }

  pub fn user(mut self, user: impl Into<String>) -> Self {
    self.user = Some(user.into());
    self
  }

  pub fn max_pods(mut self, max: usize) -> Self {
    self.max_pods = Some(max);
    self
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOptions {
  /// Limit the stop to these services; empty means the whole stack.
  pub services: Vec<String>,
  pub wipe: bool,
  /// Cluster only: also delete Retain-policy volumes claimed from the
  /// namespace.
  pub reclaim_volumes: bool,
}

/// Non-fatal problems encountered while tearing down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopOutcome {
  pub warnings: Vec<String>,
}

impl StopOutcome {
  pub fn is_clean(&self) -> bool {
    self.warnings.is_empty()
  }
}

/// Commands that make up a log tail: an optional one-shot preamble whose
/// output is shown first, then the long-running follow command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogsPlan {
  pub preamble: Option<CommandRequest>,
  pub follow: CommandRequest,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogsOptions {
  pub services: Vec<String>,
  /// `None` shows everything.
  pub lines: Option<usize>,
  pub color: bool,
}

#[async_trait]
pub trait Backend: Send + Sync {
  fn mode(&self) -> BackendMode;

  /// Host path backing `container_path` of `service`.
  fn resolve_bind_path(&self, service: &str, container_path: &str) -> Result<Option<PathBuf>>;

  /// Runs `command` inside a running instance of the target service.
  async fn exec(&self, target: &ExecTarget, command: &CommandRequest) -> Result<ExecResult>;

  async fn bring_up(&self, services: &[String]) -> Result<()>;

  async fn tear_down(&self, options: &StopOptions) -> Result<StopOutcome>;

  /// Human-readable status lines.
  async fn status(&self, services: &[String]) -> Result<Vec<String>>;

  /// Host name or address the web interface is reachable at.
  async fn access_host(&self) -> Result<String>;

  fn logs_plan(&self, options: &LogsOptions) -> Result<LogsPlan>;

  /// Host location of a service's keystore file, when the backend exposes
  /// one.
  fn keystore_file(&self, service: &str) -> Result<Option<PathBuf>>;

  /// Runs the service's keystore tool. A non-zero exit is reported in the
  /// result.
  async fn keystore_exec(&self, request: &KeystoreRequest) -> Result<ExecResult>;
}

/// Picks the implementation matching the context's descriptor.
pub fn from_context<'a>(ctx: &'a ControlContext, runner: &'a dyn CommandRunner) -> Box<dyn Backend + 'a> {
  match ctx.mode() {
    BackendMode::Compose => Box::new(ComposeBackend::new(ctx, runner)),
    BackendMode::Cluster => Box::new(ClusterBackend::new(ctx, runner)),
  }
}
