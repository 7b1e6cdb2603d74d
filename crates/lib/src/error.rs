//! Error taxonomy shared by every orchestration component.
//!
//! Fatal outcomes are variants of [`ControlError`] and propagate with `?`.
//! Recoverable outcomes (a keystore `create` against an existing keystore, a
//! failed `rm` after a successful `stop`, scratch cleanup) are reported as
//! values by the component that produced them and never reach this type.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::descriptor::BackendMode;

/// Convenience alias used throughout the crate.
pub type Result<T, E = ControlError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum ControlError {
  /// The declarative file is neither a compose file nor a kubeconfig.
  #[error("{} must be a docker-compose or kubeconfig YAML file: {reason}", path.display())]
  UnsupportedDescriptor { path: PathBuf, reason: String },

  /// The operation has no meaning under the active backend.
  #[error("{operation} is not supported with the {mode} backend")]
  UnsupportedInMode { operation: String, mode: BackendMode },

  /// The operation needs a service that the active profile does not run.
  #[error("{operation} is not supported with the {profile} profile")]
  UnsupportedProfile { operation: String, profile: String },

  /// A pod selector matched nothing.
  #[error("no pods found for service {service} in namespace {namespace}")]
  NoMatchingPods { service: String, namespace: String },

  /// A subprocess outlived its timeout and its process group was killed.
  #[error("command timed out after {timeout:?}: {command}")]
  TimedOut { command: String, timeout: Duration },

  /// A subprocess returned a non-zero exit code the caller treats as fatal.
  #[error("{context} (exit code {code})")]
  CommandFailed {
    context: String,
    code: i32,
    output: Vec<String>,
  },

  #[error("NetBox configuration database backup failed: {message}")]
  BackupFailed { message: String, output: Vec<String> },

  #[error("NetBox configuration database restore failed: {message}")]
  RestoreFailed { message: String, output: Vec<String> },

  #[error("administrator account authentication files are missing, run the auth setup to generate them")]
  AuthMissing,

  #[error("storage objects required by the deployment are not defined in {}: {missing}", dir.display())]
  MissingStorage { dir: PathBuf, missing: String },

  #[error("{tool} is required for {operation}")]
  MissingTool { tool: String, operation: String },

  #[error("keystore error for {service}: {message}")]
  Keystore { service: String, message: String },

  #[error("authentication setup failed: {0}")]
  Auth(String),

  #[error("failed to access {}: {source}", path.display())]
  Io {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to spawn {command}: {source}")]
  Spawn {
    command: String,
    #[source]
    source: std::io::Error,
  },

  #[error("invalid YAML in {}: {source}", path.display())]
  Yaml {
    path: PathBuf,
    #[source]
    source: serde_yaml::Error,
  },

  #[error("invalid JSON from {command}: {source}")]
  Json {
    command: String,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid configuration: {0}")]
  Config(String),
}

impl ControlError {
  pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
    Self::Io {
      path: path.into(),
      source,
    }
  }

  pub fn unsupported_in_mode(operation: impl Into<String>, mode: BackendMode) -> Self {
    Self::UnsupportedInMode {
      operation: operation.into(),
      mode,
    }
  }

  /// Captured subprocess output to show the operator before exiting.
  pub fn output(&self) -> &[String] {
    match self {
      Self::CommandFailed { output, .. } | Self::BackupFailed { output, .. } | Self::RestoreFailed { output, .. } => {
        output
      }
      _ => &[],
    }
  }

  /// Process exit code for this error: the failing subprocess's own code
  /// when there is one, `1` otherwise.
  pub fn exit_code(&self) -> i32 {
    match self {
      Self::CommandFailed { code, .. } if *code != 0 => *code,
      _ => 1,
    }
  }
}
