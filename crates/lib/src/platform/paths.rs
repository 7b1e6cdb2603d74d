//! Fixed layout of the installation tree.
//!
//! Every path the controller touches outside of bind mounts is derived from
//! the install root here, so tests can point a [`InstallLayout`] at a temp
//! directory.

use std::path::{Path, PathBuf};

/// Environment variable naming the install root.
pub const INSTALL_DIR_ENV: &str = "MALCOLM_PATH";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallLayout {
  root: PathBuf,
}

impl InstallLayout {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  /// Layout rooted at `$MALCOLM_PATH`, or the current directory.
  pub fn from_env() -> Self {
    let root = std::env::var_os(INSTALL_DIR_ENV)
      .map(PathBuf::from)
      .or_else(|| std::env::current_dir().ok())
      .unwrap_or_else(|| PathBuf::from("."));
    Self::new(root)
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Scratch directory handed to tools through `TMPDIR`, since the system
  /// temp directory may be mounted noexec.
  pub fn tmp_dir(&self) -> PathBuf {
    self.root.join(".tmp")
  }

  pub fn default_descriptor(&self) -> PathBuf {
    self.root.join("docker-compose.yml")
  }

  pub fn default_config_dir(&self) -> PathBuf {
    self.root.join("config")
  }

  /// Directory holding the `*.env.example` templates.
  pub fn env_examples_dir(&self) -> PathBuf {
    self.root.join("config")
  }

  pub fn kubernetes_dir(&self) -> PathBuf {
    self.root.join("kubernetes")
  }

  pub fn nginx_dir(&self) -> PathBuf {
    self.root.join("nginx")
  }

  pub fn htpasswd(&self) -> PathBuf {
    self.nginx_dir().join("htpasswd")
  }

  pub fn ldap_conf(&self) -> PathBuf {
    self.nginx_dir().join("nginx_ldap.conf")
  }

  pub fn ldap_defaults(&self) -> PathBuf {
    self.root.join(".ldap_config_defaults")
  }

  pub fn web_certs_dir(&self) -> PathBuf {
    self.nginx_dir().join("certs")
  }

  pub fn htadmin_config(&self) -> PathBuf {
    self.root.join("htadmin").join("config.ini")
  }

  pub fn htadmin_metadata(&self) -> PathBuf {
    self.root.join("htadmin").join("metadata")
  }

  /// curlrc holding credentials for a remote OpenSearch instance
  /// (`primary` or `secondary`).
  pub fn opensearch_curlrc(&self, instance: &str) -> PathBuf {
    self.root.join(format!(".opensearch.{instance}.curlrc"))
  }

  pub fn opensearch_keystore(&self) -> PathBuf {
    self.root.join("opensearch").join("opensearch.keystore")
  }

  pub fn zeek_intel_load(&self) -> PathBuf {
    self.root.join("zeek").join("intel").join("__load__.zeek")
  }

  pub fn zeek_custom_load(&self) -> PathBuf {
    self.root.join("zeek").join("custom").join("__load__.zeek")
  }

  pub fn zeek_intel_lock(&self) -> PathBuf {
    self.root.join("zeek").join("intel").join("lock")
  }

  pub fn logstash_certs_dir(&self) -> PathBuf {
    self.root.join("logstash").join("certs")
  }

  pub fn filebeat_certs_dir(&self) -> PathBuf {
    self.root.join("filebeat").join("certs")
  }

  /// Search locations for the certificate transfer helper script.
  pub fn tx_rx_script_candidates(&self) -> Vec<PathBuf> {
    vec![
      self.root.join("shared").join("bin").join("tx-rx-secure.sh"),
      PathBuf::from("/usr/local/bin/tx-rx-secure.sh"),
      PathBuf::from("/usr/bin/tx-rx-secure.sh"),
    ]
  }

  /// Files that must all exist before the stack may start.
  pub fn auth_files(&self, config_dir: &Path) -> Vec<PathBuf> {
    vec![
      config_dir.join("auth.env"),
      self.htpasswd(),
      self.ldap_conf(),
      self.web_certs_dir().join("cert.pem"),
      self.web_certs_dir().join("key.pem"),
      self.htadmin_config(),
    ]
  }

  pub fn auth_files_exist(&self, config_dir: &Path) -> bool {
    self.auth_files(config_dir).iter().all(|p| p.is_file())
  }
}
