//! Declarative file loading and backend detection.
//!
//! The descriptor is either a compose file (single host, containers) or a
//! kubeconfig (cluster, pods). It is parsed once at startup and shared
//! read-only by everything else.

pub mod compose;
pub mod envfile;

use std::fmt;
use std::path::{Path, PathBuf};

use serde_yaml::Value;
use tracing::debug;

use crate::error::{ControlError, Result};

/// Which substrate the descriptor targets. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendMode {
  Compose,
  Cluster,
}

impl BackendMode {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Compose => "docker-compose",
      Self::Cluster => "kubernetes",
    }
  }
}

impl fmt::Display for BackendMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A parsed declarative file together with the backend it targets.
#[derive(Debug, Clone)]
pub struct Descriptor {
  path: PathBuf,
  mode: BackendMode,
  document: Value,
}

impl Descriptor {
  /// Reads and classifies `path`.
  ///
  /// Fails with [`ControlError::UnsupportedDescriptor`] when the file cannot
  /// be read, is not YAML, or matches neither schema.
  pub fn load(path: &Path) -> Result<Self> {
    let unsupported = |reason: String| ControlError::UnsupportedDescriptor {
      path: path.to_path_buf(),
      reason,
    };

    let contents = std::fs::read_to_string(path).map_err(|e| unsupported(e.to_string()))?;
    let document: Value = serde_yaml::from_str(&contents).map_err(|e| unsupported(e.to_string()))?;
    let mode = detect(&document).ok_or_else(|| unsupported("unrecognized schema".to_string()))?;

    debug!(path = %path.display(), %mode, "detected descriptor format");

    Ok(Self {
      path: path.to_path_buf(),
      mode,
      document,
    })
  }

  /// Builds a descriptor from an already parsed document.
  pub fn from_document(path: impl Into<PathBuf>, document: Value) -> Result<Self> {
    let path = path.into();
    let mode = detect(&document).ok_or_else(|| ControlError::UnsupportedDescriptor {
      path: path.clone(),
      reason: "unrecognized schema".to_string(),
    })?;
    Ok(Self { path, mode, document })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Directory relative bind sources are resolved against.
  pub fn base_dir(&self) -> &Path {
    self.path.parent().unwrap_or_else(|| Path::new("."))
  }

  pub fn mode(&self) -> BackendMode {
    self.mode
  }

  pub fn document(&self) -> &Value {
    &self.document
  }

  /// The `services.<name>` mapping of a compose descriptor.
  pub fn service(&self, name: &str) -> Option<&Value> {
    self.document.get("services")?.get(name)
  }
}

/// Classifies a parsed YAML document.
pub fn detect(document: &Value) -> Option<BackendMode> {
  let mapping = document.as_mapping()?;

  if mapping.get("services").is_some_and(Value::is_mapping) {
    return Some(BackendMode::Compose);
  }

  let is_config_kind = mapping.get("kind").and_then(Value::as_str) == Some("Config");
  let has_cluster_lists =
    mapping.get("clusters").is_some_and(Value::is_sequence) && mapping.get("contexts").is_some_and(Value::is_sequence);
  if is_config_kind || has_cluster_lists {
    return Some(BackendMode::Cluster);
  }

  None
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  const COMPOSE: &str = r#"
services:
  opensearch:
    image: ghcr.io/idaholab/malcolm/opensearch:25.01.0
"#;

  const KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
clusters:
  - name: lab
    cluster:
      server: https://10.0.0.1:6443
contexts:
  - name: lab
    context:
      cluster: lab
"#;

  fn write(temp: &TempDir, name: &str, contents: &str) -> PathBuf {
    let path = temp.path().join(name);
    std::fs::write(&path, contents).unwrap();
    path
  }

  #[test]
  fn detects_compose() {
    let temp = TempDir::new().unwrap();
    let descriptor = Descriptor::load(&write(&temp, "docker-compose.yml", COMPOSE)).unwrap();
    assert_eq!(descriptor.mode(), BackendMode::Compose);
    assert!(descriptor.service("opensearch").is_some());
    assert_eq!(descriptor.base_dir(), temp.path());
  }

  #[test]
  fn detects_kubeconfig() {
    let temp = TempDir::new().unwrap();
    let descriptor = Descriptor::load(&write(&temp, "kubeconfig.yml", KUBECONFIG)).unwrap();
    assert_eq!(descriptor.mode(), BackendMode::Cluster);
  }

  #[test]
  fn detects_kubeconfig_without_kind() {
    let doc: Value = serde_yaml::from_str("clusters: []\ncontexts: []\nusers: []\n").unwrap();
    assert_eq!(detect(&doc), Some(BackendMode::Cluster));
  }

  #[test]
  fn rejects_unknown_schemas_without_side_effects() {
    let temp = TempDir::new().unwrap();
    for (name, contents) in [
      ("list.yml", "- a\n- b\n"),
      ("scalar.yml", "just a string\n"),
      ("other.yml", "apiVersion: apps/v1\nkind: Deployment\n"),
      ("services-list.yml", "services:\n  - web\n"),
      ("broken.yml", "services: [unterminated\n"),
    ] {
      let path = write(&temp, name, contents);
      let before: Vec<_> = std::fs::read_dir(temp.path()).unwrap().flatten().map(|e| e.path()).collect();

      let err = Descriptor::load(&path).unwrap_err();
      assert!(
        matches!(err, ControlError::UnsupportedDescriptor { .. }),
        "{name} should be unsupported, got {err:?}"
      );

      let after: Vec<_> = std::fs::read_dir(temp.path()).unwrap().flatten().map(|e| e.path()).collect();
      assert_eq!(before, after);
    }
  }

  #[test]
  fn missing_file_is_unsupported() {
    let err = Descriptor::load(Path::new("/nonexistent/docker-compose.yml")).unwrap_err();
    assert!(matches!(err, ControlError::UnsupportedDescriptor { .. }));
  }
}
