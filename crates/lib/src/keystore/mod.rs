//! Per-service secure keystore operations (`<svc>-keystore create|add|remove|list`).
//!
//! The backend decides how the keystore tool is reached; this module owns
//! the request shape and the failure policy. Failures never propagate as
//! errors: every operation answers `(success, output)`.

pub mod compose;

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::backend::Backend;

pub fn keystore_bin(service: &str) -> String {
  format!("/usr/share/{service}/bin/{service}-keystore")
}

/// Bind target of the keystore file inside the container.
pub fn persist_target(service: &str) -> String {
  format!("/usr/share/{service}/config/persist/{service}.keystore")
}

/// Working directory for the keystore tool inside the container.
pub fn container_dir(service: &str) -> String {
  format!("/usr/share/{service}/config")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeystoreRequest {
  pub service: String,
  pub drop_privileges: bool,
  pub arguments: Vec<String>,
  pub stdin: Option<Vec<u8>>,
  pub env: BTreeMap<String, String>,
}

impl KeystoreRequest {
  pub fn new<I, S>(service: impl Into<String>, drop_privileges: bool, arguments: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    Self {
      service: service.into(),
      drop_privileges,
      arguments: arguments.into_iter().map(Into::into).collect(),
      stdin: None,
      env: BTreeMap::new(),
    }
  }

  pub fn stdin(mut self, input: impl Into<Vec<u8>>) -> Self {
    self.stdin = Some(input.into());
    self
  }

  fn verb(&self) -> Option<String> {
    self.arguments.first().map(|v| v.to_lowercase())
  }
}

pub struct KeystoreOperator<'a> {
  backend: &'a dyn Backend,
  verbose: bool,
}

impl<'a> KeystoreOperator<'a> {
  pub fn new(backend: &'a dyn Backend, verbose: bool) -> Self {
    Self { backend, verbose }
  }

  /// Runs one keystore command.
  ///
  /// A `create` against an existing keystore or a `remove` of an absent key
  /// fails in the tool, which is the expected idempotent outcome. Those
  /// failures are only logged at debug level when the keystore file already
  /// existed and the run is not verbose. The check cannot tell a real error
  /// on such a call from the benign one, so it may hide genuine failures.
  pub async fn op(&self, request: &KeystoreRequest) -> (bool, Vec<String>) {
    let preexisting = self
      .backend
      .keystore_file(&request.service)
      .ok()
      .flatten()
      .is_some_and(|p| p.is_file());

    let (message, lines) = match self.backend.keystore_exec(request).await {
      Ok(result) if result.success() => return (true, result.output_lines),
      Ok(result) => (
        format!(
          "error processing {} keystore command (exit code {}): {}",
          request.service,
          result.exit_code,
          result.output_lines.join(" ")
        ),
        result.output_lines,
      ),
      Err(e) => (e.to_string(), e.output().to_vec()),
    };

    let expected = matches!(request.verb().as_deref(), Some("create" | "remove"));
    if expected && preexisting && !self.verbose {
      debug!(service = %request.service, %message, "keystore command failed");
    } else {
      warn!(service = %request.service, "{message}");
    }
    (false, lines)
  }

  pub async fn create(&self, service: &str, drop_privileges: bool) -> (bool, Vec<String>) {
    // answer "N" to the overwrite prompt when the keystore already exists
    self
      .op(&KeystoreRequest::new(service, drop_privileges, ["create"]).stdin("N"))
      .await
  }

  pub async fn add(&self, service: &str, key: &str, value: &str) -> (bool, Vec<String>) {
    self
      .op(&KeystoreRequest::new(service, true, ["add", key, "--stdin"]).stdin(value))
      .await
  }

  pub async fn remove(&self, service: &str, key: &str) -> (bool, Vec<String>) {
    self.op(&KeystoreRequest::new(service, true, ["remove", key])).await
  }

  /// Stored key names, with the tool's banner lines filtered out.
  pub async fn list(&self, service: &str) -> (bool, Vec<String>) {
    let (ok, lines) = self.op(&KeystoreRequest::new(service, true, ["list"])).await;
    let keys = lines
      .into_iter()
      .map(|l| l.trim().to_string())
      .filter(|l| {
        let upper = l.to_uppercase();
        !l.is_empty() && !upper.starts_with("WARNING") && !upper.starts_with("KEYSTORE")
      })
      .collect();
    (ok, keys)
  }
}
