//! Compose descriptor queries: bind-mount resolution and image lookup.

use std::path::{Component, Path, PathBuf};

use serde_yaml::Value;
use tracing::trace;

use super::Descriptor;

/// One `volumes:` entry of a compose service, reduced to what resolution
/// needs.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Mount {
  source: String,
  target: String,
}

impl Mount {
  /// Parses the short `source:target[:mode]` or long `{type, source, target}`
  /// syntax. Entries without a source (anonymous volumes) are skipped.
  fn parse(entry: &Value) -> Option<Self> {
    match entry {
      Value::String(spec) => {
        let mut parts = spec.splitn(3, ':');
        let source = parts.next()?;
        let target = parts.next()?;
        Some(Self {
          source: source.to_string(),
          target: target.to_string(),
        })
      }
      Value::Mapping(map) => {
        let kind = map.get("type").and_then(Value::as_str).unwrap_or("bind");
        if kind != "bind" {
          return None;
        }
        Some(Self {
          source: map.get("source").and_then(Value::as_str)?.to_string(),
          target: map.get("target").and_then(Value::as_str)?.to_string(),
        })
      }
      _ => None,
    }
  }

  /// Named volumes have no host path.
  fn is_host_path(&self) -> bool {
    self.source.starts_with('/') || self.source.starts_with('.') || self.source.starts_with('~')
  }
}

impl Descriptor {
  /// Host path backing `container_path` inside `service`, or `None` when no
  /// bind mount covers it.
  pub fn bind_source(&self, service: &str, container_path: &str) -> Option<PathBuf> {
    let volumes = self.service(service)?.get("volumes")?.as_sequence()?;
    let wanted = Path::new(container_path);

    let mut best: Option<(usize, PathBuf)> = None;
    for mount in volumes.iter().filter_map(Mount::parse) {
      let target = Path::new(&mount.target);
      let Ok(remainder) = wanted.strip_prefix(target) else {
        continue;
      };
      let depth = target.components().count();
      if best.as_ref().is_some_and(|(d, _)| *d >= depth) {
        continue;
      }
      if !mount.is_host_path() {
        // a named volume shadows anything shallower
        best = Some((depth, PathBuf::new()));
        continue;
      }
      let source = self.host_path(&mount.source);
      let resolved = if remainder.as_os_str().is_empty() {
        source
      } else {
        source.join(remainder)
      };
      best = Some((depth, resolved));
    }

    let (_, path) = best?;
    if path.as_os_str().is_empty() {
      return None;
    }
    let path = normalize(&path);
    trace!(service, container_path, host = %path.display(), "resolved bind mount");
    Some(dunce::canonicalize(&path).unwrap_or(path))
  }

  /// Image reference declared for `service`.
  pub fn service_image(&self, service: &str) -> Option<&str> {
    self.service(service)?.get("image")?.as_str()
  }

  fn host_path(&self, source: &str) -> PathBuf {
    if let Some(rest) = source.strip_prefix('~') {
      let home = std::env::var_os("HOME").map(PathBuf::from).unwrap_or_default();
      return home.join(rest.trim_start_matches('/'));
    }
    let path = Path::new(source);
    if path.is_absolute() {
      path.to_path_buf()
    } else {
      self.base_dir().join(path)
    }
  }
}

/// Lexically resolves `.` and `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
  let mut out = PathBuf::new();
  for component in path.components() {
    match component {
      Component::CurDir => {}
      Component::ParentDir => {
        out.pop();
      }
      other => out.push(other.as_os_str()),
    }
  }
  out
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;
  use tempfile::TempDir;

  fn descriptor(dir: &Path, yaml: &str) -> Descriptor {
    let doc: Value = serde_yaml::from_str(yaml).unwrap();
    Descriptor::from_document(dir.join("docker-compose.yml"), doc).unwrap()
  }

  const COMPOSE: &str = r#"
services:
  opensearch:
    image: ghcr.io/idaholab/malcolm/opensearch:25.01.0
    volumes:
      - ./opensearch:/usr/share/opensearch/config/persist:rw
      - type: bind
        source: ./opensearch-data
        target: /usr/share/opensearch/data
      - opensearch-cache:/var/cache/opensearch
  filebeat:
    volumes:
      - ./zeek-logs:/zeek
      - ./zeek-logs/current:/zeek/current:ro
  upload:
    volumes:
      - /srv/upload:/var/www/upload/server/php/chroot/files
"#;

  #[test]
  fn exact_short_syntax_match() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.bind_source("opensearch", "/usr/share/opensearch/config/persist"),
      Some(temp.path().join("opensearch"))
    );
  }

  #[test]
  fn long_syntax_match() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.bind_source("opensearch", "/usr/share/opensearch/data"),
      Some(temp.path().join("opensearch-data"))
    );
  }

  #[test]
  fn parent_mount_supplies_remainder() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.bind_source("opensearch", "/usr/share/opensearch/config/persist/opensearch.keystore"),
      Some(temp.path().join("opensearch").join("opensearch.keystore"))
    );
  }

  #[test]
  fn deepest_mount_wins() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.bind_source("filebeat", "/zeek/current/conn.log"),
      Some(temp.path().join("zeek-logs").join("current").join("conn.log"))
    );
    assert_eq!(
      d.bind_source("filebeat", "/zeek/processed"),
      Some(temp.path().join("zeek-logs").join("processed"))
    );
  }

  #[test]
  fn named_volumes_and_unknowns_resolve_to_none() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(d.bind_source("opensearch", "/var/cache/opensearch"), None);
    assert_eq!(d.bind_source("opensearch", "/etc"), None);
    assert_eq!(d.bind_source("missing", "/zeek"), None);
  }

  #[test]
  fn absolute_sources_are_kept() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.bind_source("upload", "/var/www/upload/server/php/chroot/files"),
      Some(PathBuf::from("/srv/upload"))
    );
  }

  #[test]
  #[serial]
  fn tilde_expands_to_home() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), "services:\n  zeek:\n    volumes:\n      - ~/pcap:/pcap\n");
    temp_env::with_var("HOME", Some("/home/analyst"), || {
      assert_eq!(d.bind_source("zeek", "/pcap"), Some(PathBuf::from("/home/analyst/pcap")));
    });
  }

  #[test]
  fn existing_paths_are_canonicalized() {
    let temp = TempDir::new().unwrap();
    let real = temp.path().join("real");
    std::fs::create_dir(&real).unwrap();
    std::os::unix::fs::symlink(&real, temp.path().join("link")).unwrap();
    let d = descriptor(temp.path(), "services:\n  redis:\n    volumes:\n      - ./link/../link:/data\n");

    let resolved = d.bind_source("redis", "/data").unwrap();
    assert_eq!(resolved, dunce::canonicalize(&real).unwrap());
    assert_eq!(d.bind_source("redis", "/data"), Some(resolved));
  }

  #[test]
  fn image_lookup() {
    let temp = TempDir::new().unwrap();
    let d = descriptor(temp.path(), COMPOSE);
    assert_eq!(
      d.service_image("opensearch"),
      Some("ghcr.io/idaholab/malcolm/opensearch:25.01.0")
    );
    assert_eq!(d.service_image("filebeat"), None);
  }

  #[test]
  fn normalize_is_lexical() {
    assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
  }
}
