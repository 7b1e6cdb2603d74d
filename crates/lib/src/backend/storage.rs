//! Cluster-side storage preconditions and env-file derived objects.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::descriptor::envfile;
use crate::error::{ControlError, Result};

/// Storage objects that must be declared in the manifest directory before
/// the namespace is brought up.
pub const REQUIRED_VOLUME_OBJECTS: &[(&str, &str)] = &[
  ("pcap-claim", "PersistentVolumeClaim"),
  ("zeek-claim", "PersistentVolumeClaim"),
  ("suricata-claim", "PersistentVolumeClaim"),
  ("config-claim", "PersistentVolumeClaim"),
  ("runtime-logs-claim", "PersistentVolumeClaim"),
  ("opensearch-claim", "PersistentVolumeClaim"),
  ("opensearch-backup-claim", "PersistentVolumeClaim"),
];

/// YAML manifests directly under `dir`, sorted.
pub fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>> {
  let mut files: Vec<PathBuf> = fs::read_dir(dir)
    .map_err(|e| ControlError::io(dir, e))?
    .flatten()
    .map(|e| e.path())
    .filter(|p| {
      p.is_file()
        && p
          .extension()
          .is_some_and(|ext| ext == "yml" || ext == "yaml")
    })
    .collect();
  files.sort();
  Ok(files)
}

/// `(kind, name)` of every object declared under `dir`.
pub fn declared_objects(dir: &Path) -> Result<BTreeSet<(String, String)>> {
  let mut objects = BTreeSet::new();
  for file in manifest_files(dir)? {
    let contents = fs::read_to_string(&file).map_err(|e| ControlError::io(&file, e))?;
    for document in serde_yaml::Deserializer::from_str(&contents) {
      let value = Value::deserialize(document).map_err(|source| ControlError::Yaml {
        path: file.clone(),
        source,
      })?;
      let kind = value.get("kind").and_then(Value::as_str);
      let name = value
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str);
      if let (Some(kind), Some(name)) = (kind, name) {
        objects.insert((kind.to_string(), name.to_string()));
      }
    }
  }
  debug!(dir = %dir.display(), count = objects.len(), "scanned manifests");
  Ok(objects)
}

/// Fails with [`ControlError::MissingStorage`] naming every required object
/// not declared under `dir`, grouped by kind.
pub fn check_storage(dir: &Path) -> Result<()> {
  let declared = declared_objects(dir)?;
  let mut missing: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
  for &(name, kind) in REQUIRED_VOLUME_OBJECTS {
    if !declared.contains(&(kind.to_string(), name.to_string())) {
      missing.entry(kind).or_default().push(name);
    }
  }
  if missing.is_empty() {
    return Ok(());
  }
  let summary = missing
    .iter()
    .map(|(kind, names)| format!("{kind}: {}", names.join(", ")))
    .collect::<Vec<_>>()
    .join("; ");
  Err(ControlError::MissingStorage {
    dir: dir.to_path_buf(),
    missing: summary,
  })
}

pub fn namespace_manifest(namespace: &str) -> String {
  format!("apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {namespace}\n")
}

/// One Secret or ConfigMap per `*.env` file in `config_dir`, as a
/// multi-document YAML stream. Files carrying `K8S_SECRET=True` become
/// Secrets.
pub fn env_manifests(config_dir: &Path, namespace: &str) -> Result<String> {
  let mut files: Vec<PathBuf> = fs::read_dir(config_dir)
    .map_err(|e| ControlError::io(config_dir, e))?
    .flatten()
    .map(|e| e.path())
    .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "env"))
    .collect();
  files.sort();

  let mut documents = Vec::with_capacity(files.len());
  for file in files {
    let Some(stem) = file.file_stem().and_then(|s| s.to_str()) else {
      continue;
    };
    let values = envfile::read_values(&file)?;
    let data: BTreeMap<String, String> = values.iter().cloned().collect();
    let name = format!("{}-env", stem.replace(['_', '.'], "-").to_lowercase());

    let object = if envfile::is_secret(&values) {
      serde_json::json!({
        "apiVersion": "v1",
        "kind": "Secret",
        "type": "Opaque",
        "metadata": { "name": name, "namespace": namespace },
        "stringData": data,
      })
    } else {
      serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": name, "namespace": namespace },
        "data": data,
      })
    };
    let rendered = serde_yaml::to_string(&object).map_err(|source| ControlError::Yaml {
      path: file.clone(),
      source,
    })?;
    documents.push(rendered);
  }
  Ok(documents.join("---\n"))
}
