//! Minimal `.env` handling for the files under the config directory.
//!
//! Only what the controller needs: reading `KEY=VALUE` pairs, replacing
//! individual keys while keeping the rest of the file intact, and keeping
//! `*.env` files in step with their `*.env.example` templates.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::consts::{DEFAULT_GID, DEFAULT_UID};
use crate::error::{ControlError, Result};
use crate::util::write_atomic;

/// Mode applied to every env file the controller writes.
pub const ENV_FILE_MODE: u32 = 0o600;

/// Key marking an env file as secret material in cluster mode.
pub const SECRET_MARKER_KEY: &str = "K8S_SECRET";

/// Parses `contents` into ordered `(key, value)` pairs.
pub fn parse(contents: &str) -> Vec<(String, String)> {
  contents.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<(String, String)> {
  let line = line.trim();
  if line.is_empty() || line.starts_with('#') {
    return None;
  }
  let line = line.strip_prefix("export ").unwrap_or(line);
  let (key, value) = line.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  Some((key.to_string(), unquote(value.trim())))
}

fn unquote(value: &str) -> String {
  for quote in ['"', '\''] {
    if value.len() >= 2 && value.starts_with(quote) && value.ends_with(quote) {
      return value[1..value.len() - 1].to_string();
    }
  }
  match value.find(" #") {
    Some(idx) => value[..idx].trim_end().to_string(),
    None => value.to_string(),
  }
}

/// Reads `path`; a missing file yields no values.
pub fn read_values(path: &Path) -> Result<Vec<(String, String)>> {
  match fs::read_to_string(path) {
    Ok(contents) => Ok(parse(&contents)),
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
    Err(e) => Err(ControlError::io(path, e)),
  }
}

pub fn get(values: &[(String, String)], key: &str) -> Option<String> {
  values.iter().rev().find(|(k, _)| k == key).map(|(_, v)| v.clone())
}

/// Sets each `(key, value)` in `path`, replacing existing assignments in
/// place and appending new ones. The file is rewritten atomically.
pub fn set_keys(path: &Path, updates: &[(&str, &str)]) -> Result<()> {
  let existing = match fs::read_to_string(path) {
    Ok(contents) => contents,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
    Err(e) => return Err(ControlError::io(path, e)),
  };

  let mut pending: Vec<(&str, &str)> = updates.to_vec();
  let mut lines: Vec<String> = Vec::new();
  for line in existing.lines() {
    let replaced = parse_line(line).and_then(|(key, _)| {
      let idx = pending.iter().position(|(k, _)| *k == key)?;
      let (k, v) = pending.remove(idx);
      Some(format!("{k}={v}"))
    });
    lines.push(replaced.unwrap_or_else(|| line.to_string()));
  }
  lines.extend(pending.iter().map(|(k, v)| format!("{k}={v}")));

  let mut contents = lines.join("\n");
  contents.push('\n');
  debug!(path = %path.display(), keys = updates.len(), "updating env file");
  write_atomic(path, contents.as_bytes(), ENV_FILE_MODE)
}

/// Writes a whole env file from `values`.
pub fn write_values(path: &Path, values: &[(&str, &str)]) -> Result<()> {
  let mut contents: String = values.iter().map(|(k, v)| format!("{k}={v}\n")).collect();
  if contents.is_empty() {
    contents.push('\n');
  }
  write_atomic(path, contents.as_bytes(), ENV_FILE_MODE)
}

/// Brings `config_dir` in line with the `*.env.example` templates in
/// `examples_dir`.
///
/// Missing env files are copied from their template; keys present in a
/// template but absent from its env file are appended under a comment naming
/// the template. Returns the files that were created or extended.
pub fn sync_examples(examples_dir: &Path, config_dir: &Path) -> Result<Vec<PathBuf>> {
  let mut touched = Vec::new();
  if !examples_dir.is_dir() {
    return Ok(touched);
  }
  fs::create_dir_all(config_dir).map_err(|e| ControlError::io(config_dir, e))?;

  let mut templates: Vec<PathBuf> = fs::read_dir(examples_dir)
    .map_err(|e| ControlError::io(examples_dir, e))?
    .flatten()
    .map(|entry| entry.path())
    .filter(|p| p.is_file() && p.to_string_lossy().ends_with(".env.example"))
    .collect();
  templates.sort();

  for template in templates {
    let Some(name) = template.file_name().and_then(|n| n.to_str()) else {
      continue;
    };
    let env_name = name.trim_end_matches(".example");
    let env_file = config_dir.join(env_name);

    if !env_file.is_file() {
      debug!(file = %env_file.display(), template = name, "creating env file from template");
      fs::copy(&template, &env_file).map_err(|e| ControlError::io(&env_file, e))?;
      touched.push(env_file);
      continue;
    }

    let current = read_values(&env_file)?;
    let mut missing: Vec<(String, String)> = Vec::new();
    for (key, value) in read_values(&template)? {
      if get(&current, &key).is_none() && !missing.iter().any(|(k, _)| *k == key) {
        missing.push((key, value));
      }
    }
    if missing.is_empty() {
      continue;
    }

    debug!(file = %env_file.display(), ?missing, "adding missing variables from template");
    let mut contents = fs::read_to_string(&env_file).map_err(|e| ControlError::io(&env_file, e))?;
    contents.push_str(&format!(
      "\n\n# missing variables created from {name} at {}\n",
      chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    ));
    for (key, value) in &missing {
      contents.push_str(&format!("{key}={value}\n"));
    }
    write_atomic(&env_file, contents.as_bytes(), ENV_FILE_MODE)?;
    touched.push(env_file);
  }

  Ok(touched)
}

/// Container user and group the services run as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UidGid {
  pub uid: u32,
  pub gid: u32,
}

impl Default for UidGid {
  fn default() -> Self {
    Self {
      uid: DEFAULT_UID,
      gid: DEFAULT_GID,
    }
  }
}

impl std::fmt::Display for UidGid {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}:{}", self.uid, self.gid)
  }
}

/// `PUID`/`PGID` from `process.env`, falling back to the defaults.
pub fn uid_gid(config_dir: &Path) -> Result<UidGid> {
  let values = read_values(&config_dir.join("process.env"))?;
  let mut ids = UidGid::default();
  if let Some(uid) = get(&values, "PUID").and_then(|v| v.parse().ok()) {
    ids.uid = uid;
  }
  if let Some(gid) = get(&values, "PGID").and_then(|v| v.parse().ok()) {
    ids.gid = gid;
  }
  Ok(ids)
}

/// Whether an env file should become a Secret rather than a ConfigMap.
pub fn is_secret(values: &[(String, String)]) -> bool {
  get(values, SECRET_MARKER_KEY).is_some_and(|v| v.eq_ignore_ascii_case("true"))
}
