//! Credential and certificate provisioning.
//!
//! Each [`AuthTask`] writes one family of secret files in the install tree.
//! [`Provisioner::run`] either runs a single task or walks the whole table,
//! asking per task with a default that reflects what is missing on disk.

mod admin;
mod certs;
pub mod prompt;
mod remote;
mod secrets;

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use tracing::{debug, info};

use crate::backend::Backend;
use crate::context::ControlContext;
use crate::error::{ControlError, Result};
use crate::exec::CommandRunner;
use crate::platform::find_in_path;

pub use admin::{rotate_htpasswd, valid_password, valid_username};
pub use certs::ClientBundle;
pub use prompt::{NonInteractive, Prompter};
pub use remote::{Curlrc, escape_curl};
pub use secrets::{is_placeholder, random_secret};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthTask {
  Admin,
  WebCerts,
  FwCerts,
  RemoteOs,
  Email,
  Netbox,
  Arkime,
  TxFwCerts,
}

impl AuthTask {
  pub const ALL: [AuthTask; 8] = [
    Self::Admin,
    Self::WebCerts,
    Self::FwCerts,
    Self::RemoteOs,
    Self::Email,
    Self::Netbox,
    Self::Arkime,
    Self::TxFwCerts,
  ];

  pub fn name(&self) -> &'static str {
    match self {
      Self::Admin => "admin",
      Self::WebCerts => "webcerts",
      Self::FwCerts => "fwcerts",
      Self::RemoteOs => "remoteos",
      Self::Email => "email",
      Self::Netbox => "netbox",
      Self::Arkime => "arkime",
      Self::TxFwCerts => "txfwcerts",
    }
  }

  pub fn description(&self) -> &'static str {
    match self {
      Self::Admin => "Store administrator username/password for local Malcolm access",
      Self::WebCerts => "(Re)generate self-signed certificates for HTTPS access",
      Self::FwCerts => "(Re)generate self-signed certificates for a remote log forwarder",
      Self::RemoteOs => "Configure remote primary or secondary OpenSearch/Elasticsearch instance",
      Self::Email => "Store username/password for OpenSearch Alerting email sender account",
      Self::Netbox => "(Re)generate internal passwords for NetBox",
      Self::Arkime => "Store password hash secret for Arkime viewer cluster",
      Self::TxFwCerts => "Transfer self-signed client certificates to a remote log forwarder",
    }
  }
}

impl fmt::Display for AuthTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

impl FromStr for AuthTask {
  type Err = ControlError;

  fn from_str(s: &str) -> Result<Self> {
    Self::ALL
      .into_iter()
      .find(|t| t.name().eq_ignore_ascii_case(s))
      .ok_or_else(|| ControlError::Auth(format!("unknown auth task: {s}")))
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthSelection {
  /// Walk every available task.
  All,
  Only(AuthTask),
}

/// Values supplied on the command line for unattended setup.
#[derive(Debug, Clone, Default)]
pub struct AuthOptions {
  pub non_interactive: bool,
  pub admin_username: Option<String>,
  /// `openssl passwd -1` hash of the administrator password.
  pub admin_password_openssl: Option<String>,
  /// bcrypt htpasswd hash of the administrator password.
  pub admin_password_htpasswd: Option<String>,
  pub arkime_password: Option<String>,
  pub generate_webcerts: bool,
  pub generate_fwcerts: bool,
  pub generate_netbox_passwords: bool,
}

pub struct Provisioner<'a> {
  ctx: &'a ControlContext,
  backend: &'a dyn Backend,
  runner: &'a dyn CommandRunner,
  prompter: &'a dyn Prompter,
  options: AuthOptions,
}

impl<'a> Provisioner<'a> {
  pub fn new(
    ctx: &'a ControlContext,
    backend: &'a dyn Backend,
    runner: &'a dyn CommandRunner,
    prompter: &'a dyn Prompter,
    options: AuthOptions,
  ) -> Self {
    Self {
      ctx,
      backend,
      runner,
      prompter,
      options,
    }
  }

  /// Tasks offered on this host. Transferring client certificates needs
  /// `croc` and the transfer helper script.
  pub fn available_tasks(&self) -> Vec<AuthTask> {
    let tx_rx = self.tx_rx_script().is_some();
    AuthTask::ALL
      .into_iter()
      .filter(|t| *t != AuthTask::TxFwCerts || tx_rx)
      .collect()
  }

  /// Lets the operator pick `all` or a single task.
  pub fn choose(&self) -> Result<AuthSelection> {
    if self.options.non_interactive {
      return Ok(AuthSelection::All);
    }
    let tasks = self.available_tasks();
    let mut choices = vec![("all", "Configure all authentication-related settings")];
    choices.extend(tasks.iter().map(|t| (t.name(), t.description())));
    let picked = self.prompter.choose("Configure Authentication", &choices)?;
    Ok(match picked.checked_sub(1).and_then(|i| tasks.get(i)) {
      Some(task) => AuthSelection::Only(*task),
      None => AuthSelection::All,
    })
  }

  /// Runs the selected tasks and returns the ones that ran.
  pub async fn run(&self, selection: AuthSelection) -> Result<Vec<AuthTask>> {
    let available = self.available_tasks();
    let tasks = match selection {
      AuthSelection::Only(task) if !available.contains(&task) => {
        return Err(ControlError::Auth(format!("{task} is not available on this host")));
      }
      AuthSelection::Only(task) => vec![task],
      AuthSelection::All => {
        let mut wanted = Vec::new();
        for task in available {
          if self.wants(task)? {
            wanted.push(task);
          }
        }
        wanted
      }
    };

    for task in &tasks {
      info!(task = %task, "running auth setup task");
      self.run_task(*task).await?;
    }
    Ok(tasks)
  }

  async fn run_task(&self, task: AuthTask) -> Result<()> {
    match task {
      AuthTask::Admin => self.admin().await,
      AuthTask::WebCerts => self.webcerts().await,
      AuthTask::FwCerts => self.fwcerts().await,
      AuthTask::RemoteOs => self.remoteos(),
      AuthTask::Email => self.email().await,
      AuthTask::Netbox => self.netbox(),
      AuthTask::Arkime => self.arkime(),
      AuthTask::TxFwCerts => self.txfwcerts().await,
    }
  }

  /// Whether `all` should run `task`. Tasks whose output files are missing
  /// take their default without asking.
  fn wants(&self, task: AuthTask) -> Result<bool> {
    let default = self.task_default(task);
    let missing = self.required_files(task).iter().any(|f| !f.is_file());
    if self.options.non_interactive || missing {
      debug!(task = %task, default, missing, "auth task selected by default");
      return Ok(default);
    }
    self.prompter.yes_no(&format!("{}?", task.description()), default)
  }

  fn task_default(&self, task: AuthTask) -> bool {
    let interactive = !self.options.non_interactive;
    let o = &self.options;
    match task {
      AuthTask::Admin => {
        interactive
          || (o.admin_username.is_some() && o.admin_password_openssl.is_some() && o.admin_password_htpasswd.is_some())
      }
      AuthTask::WebCerts | AuthTask::FwCerts => {
        let flag = if task == AuthTask::WebCerts {
          o.generate_webcerts
        } else {
          o.generate_fwcerts
        };
        interactive || flag || self.required_files(task).iter().any(|f| !f.is_file())
      }
      AuthTask::Netbox => interactive || o.generate_netbox_passwords,
      AuthTask::RemoteOs | AuthTask::Email | AuthTask::Arkime | AuthTask::TxFwCerts => false,
    }
  }

  fn required_files(&self, task: AuthTask) -> Vec<PathBuf> {
    let layout = self.ctx.layout();
    match task {
      AuthTask::WebCerts => vec![layout.web_certs_dir().join("key.pem")],
      AuthTask::FwCerts => vec![
        layout.logstash_certs_dir().join("server.key"),
        layout.filebeat_certs_dir().join("client.key"),
      ],
      _ => Vec::new(),
    }
  }

  fn tx_rx_script(&self) -> Option<PathBuf> {
    find_in_path("croc")?;
    find_in_path("tx-rx-secure.sh").or_else(|| {
      self
        .ctx
        .layout()
        .tx_rx_script_candidates()
        .into_iter()
        .find(|p| p.is_file())
    })
  }
}

#[cfg(test)]
mod tests {
  use super::prompt::scripted::QueuedPrompter;
  use super::*;
  use crate::backend::ComposeBackend;
  use crate::context::{ContainerRuntime, ContextOptions};
  use crate::util::testutil::ScriptedRunner;
  use tempfile::TempDir;

  pub(super) fn context(temp: &TempDir) -> ControlContext {
    std::fs::write(
      temp.path().join("docker-compose.yml"),
      "services:\n  opensearch:\n    image: opensearch\n",
    )
    .unwrap();
    std::fs::create_dir_all(temp.path().join("config")).unwrap();
    ControlContext::new(ContextOptions {
      install_dir: Some(temp.path().to_path_buf()),
      ..Default::default()
    })
    .unwrap()
    .with_runtime(ContainerRuntime::assumed("docker"))
  }

  #[test]
  fn task_names_parse() {
    assert_eq!("webcerts".parse::<AuthTask>().unwrap(), AuthTask::WebCerts);
    assert_eq!("NETBOX".parse::<AuthTask>().unwrap(), AuthTask::Netbox);
    assert!("bogus".parse::<AuthTask>().is_err());
  }

  #[tokio::test]
  async fn non_interactive_all_runs_only_defaulted_tasks() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    let options = AuthOptions {
      non_interactive: true,
      ..Default::default()
    };
    let provisioner = Provisioner::new(&ctx, &backend, &runner, &NonInteractive, options);

    assert!(!provisioner.wants(AuthTask::Admin).unwrap());
    assert!(provisioner.wants(AuthTask::WebCerts).unwrap());
    assert!(provisioner.wants(AuthTask::FwCerts).unwrap());
    assert!(!provisioner.wants(AuthTask::Netbox).unwrap());
    assert!(!provisioner.wants(AuthTask::Email).unwrap());

    let certs = ctx.layout().web_certs_dir();
    std::fs::create_dir_all(&certs).unwrap();
    std::fs::write(certs.join("key.pem"), "k").unwrap();
    assert!(!provisioner.wants(AuthTask::WebCerts).unwrap());
  }

  #[tokio::test]
  async fn admin_defaults_on_when_all_hashes_supplied() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    let options = AuthOptions {
      non_interactive: true,
      admin_username: Some("analyst".into()),
      admin_password_openssl: Some("$1$abc$def".into()),
      admin_password_htpasswd: Some("$2y$05$xyz".into()),
      ..Default::default()
    };
    let provisioner = Provisioner::new(&ctx, &backend, &runner, &NonInteractive, options);
    assert!(provisioner.wants(AuthTask::Admin).unwrap());
  }

  #[tokio::test]
  async fn interactive_asks_when_files_exist() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    let certs = ctx.layout().web_certs_dir();
    std::fs::create_dir_all(&certs).unwrap();
    std::fs::write(certs.join("key.pem"), "k").unwrap();
    let prompter = QueuedPrompter::new(&["n"]);
    let provisioner = Provisioner::new(&ctx, &backend, &runner, &prompter, AuthOptions::default());

    assert!(!provisioner.wants(AuthTask::WebCerts).unwrap());
    assert_eq!(prompter.remaining(), 0);
    // fwcerts outputs are missing, so the default is taken without asking
    assert!(provisioner.wants(AuthTask::FwCerts).unwrap());
  }

  #[tokio::test]
  async fn choose_maps_menu_index_to_task() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    let prompter = QueuedPrompter::new(&["2", "0"]);
    let provisioner = Provisioner::new(&ctx, &backend, &runner, &prompter, AuthOptions::default());

    assert_eq!(provisioner.choose().unwrap(), AuthSelection::Only(AuthTask::WebCerts));
    assert_eq!(provisioner.choose().unwrap(), AuthSelection::All);
  }
}
