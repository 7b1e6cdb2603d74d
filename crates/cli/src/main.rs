mod cmd;
mod output;
mod prompts;

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Result, bail};
use clap::{Parser, builder::PossibleValuesParser};
use tracing_subscriber::EnvFilter;

use malctl_lib::auth::AuthOptions;
use malctl_lib::consts::{DEFAULT_NAMESPACE, PROFILE_HEDGEHOG, PROFILE_MALCOLM};
use malctl_lib::context::ContextOptions;
use malctl_lib::error::ControlError;

use crate::output::print_error;

/// malctl - Malcolm deployment lifecycle control
///
/// Operations are flags so several can run in one invocation. They always run
/// in the same order: stop/wipe, auth setup, start, logs, status, URLs,
/// NetBox backup, NetBox restore.
#[derive(Parser, Debug)]
#[command(name = "malctl")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
  /// Enable verbose output
  #[arg(short, long)]
  verbose: bool,

  /// Deployment descriptor: a docker-compose file or a kubeconfig
  #[arg(short, long, env = "MALCOLM_COMPOSE_FILE", value_name = "FILE")]
  file: Option<PathBuf>,

  /// Directory containing the service .env files
  #[arg(short, long = "environment-dir", env = "MALCOLM_CONFIG_DIR", value_name = "DIR")]
  environment_dir: Option<PathBuf>,

  /// Compose profile to enable (default: from process.env, else malcolm)
  #[arg(short, long, value_parser = PossibleValuesParser::new([PROFILE_MALCOLM, PROFILE_HEDGEHOG]))]
  profile: Option<String>,

  /// Container runtime binary (e.g. docker, podman)
  #[arg(short, long, env = "MALCOLM_CONTAINER_RUNTIME", value_name = "BIN")]
  runtime: Option<String>,

  /// Malcolm installation directory (default: current directory)
  #[arg(long, env = "MALCOLM_PATH", value_name = "DIR")]
  install_dir: Option<PathBuf>,

  /// Don't override TMPDIR for compose commands
  #[arg(long, env = "MALCOLM_NO_TMPDIR_OVERRIDE")]
  no_tmpdir_override: bool,

  /// Start Malcolm
  #[arg(long)]
  start: bool,

  /// Stop and restart Malcolm
  #[arg(long)]
  restart: bool,

  /// Stop Malcolm
  #[arg(long)]
  stop: bool,

  /// Stop Malcolm and delete all data
  #[arg(long)]
  wipe: bool,

  /// Kubernetes namespace
  #[arg(short, long, env = "MALCOLM_NAMESPACE", default_value = DEFAULT_NAMESPACE)]
  namespace: String,

  /// Delete PersistentVolumes with the Retain reclaim policy when stopping (Kubernetes, default)
  #[arg(long = "reclaim-persistent-volume", overrides_with = "no_reclaim_persistent_volume")]
  reclaim_persistent_volume: bool,

  /// Keep PersistentVolumes with the Retain reclaim policy when stopping (Kubernetes)
  #[arg(long = "no-reclaim-persistent-volume", overrides_with = "reclaim_persistent_volume")]
  no_reclaim_persistent_volume: bool,

  /// Configure authentication
  #[arg(long)]
  auth: bool,

  /// Configure authentication without prompting
  #[arg(long = "auth-noninteractive")]
  auth_noninteractive: bool,

  /// Administrator username (unattended auth setup)
  #[arg(long = "auth-admin-username", value_name = "NAME")]
  auth_admin_username: Option<String>,

  /// Administrator password hash from "openssl passwd -1" (unattended auth setup)
  #[arg(long = "auth-admin-password-openssl", value_name = "HASH")]
  auth_admin_password_openssl: Option<String>,

  /// Administrator password hash from "htpasswd -n -B" (unattended auth setup)
  #[arg(long = "auth-admin-password-htpasswd", value_name = "HASH")]
  auth_admin_password_htpasswd: Option<String>,

  /// Arkime password hash secret (unattended auth setup)
  #[arg(long = "auth-arkime-password", value_name = "SECRET")]
  auth_arkime_password: Option<String>,

  /// (Re)generate self-signed certificates for HTTPS access (unattended auth setup)
  #[arg(long = "auth-generate-webcerts")]
  auth_generate_webcerts: bool,

  /// (Re)generate self-signed certificates for a remote log forwarder (unattended auth setup)
  #[arg(long = "auth-generate-fwcerts")]
  auth_generate_fwcerts: bool,

  /// (Re)generate internal passwords for NetBox (unattended auth setup)
  #[arg(long = "auth-generate-netbox-passwords")]
  auth_generate_netbox_passwords: bool,

  /// Tail Malcolm logs
  #[arg(short, long)]
  logs: bool,

  /// Number of log lines to output (default: all)
  #[arg(long, value_name = "N")]
  lines: Option<usize>,

  /// Display status of Malcolm components
  #[arg(long)]
  status: bool,

  /// Display Malcolm URLs
  #[arg(long)]
  urls: bool,

  /// Service(s) to operate on (start, stop, logs, status)
  #[arg(short, long, num_args = 1.., value_name = "NAME")]
  service: Vec<String>,

  /// Back up the NetBox configuration database (default file name if none given)
  #[arg(long = "netbox-backup", num_args = 0..=1, default_missing_value = "", value_name = "FILE")]
  netbox_backup: Option<String>,

  /// Restore the NetBox configuration database from FILE
  #[arg(long = "netbox-restore", value_name = "FILE")]
  netbox_restore: Option<PathBuf>,

  /// Skip confirmation of wipe and restore
  #[arg(long)]
  force: bool,
}

impl Cli {
  /// Applies the operation implied by a symlinked executable name such as
  /// `start` or `netbox-backup`.
  fn imply_from_invocation(&mut self, name: &str) -> Result<()> {
    match name {
      "start" => self.start = true,
      "restart" => self.restart = true,
      "stop" => self.stop = true,
      "wipe" => self.wipe = true,
      "logs" => self.logs = true,
      "status" => self.status = true,
      "netbox-backup" => {
        if self.netbox_backup.is_none() {
          self.netbox_backup = Some(String::new());
        }
      }
      "netbox-restore" => {
        if !self.netbox_restore.as_deref().is_some_and(Path::is_file) {
          bail!("NetBox configuration database file must be specified with --netbox-restore");
        }
      }
      name if name.starts_with("auth") => self.auth = true,
      _ => {}
    }
    Ok(())
  }

  fn reclaim_volumes(&self) -> bool {
    self.reclaim_persistent_volume || !self.no_reclaim_persistent_volume
  }

  fn context_options(&self) -> ContextOptions {
    ContextOptions {
      install_dir: self.install_dir.clone(),
      descriptor: self.file.clone(),
      config_dir: self.environment_dir.clone(),
      profile: self.profile.clone(),
      runtime: self.runtime.clone().filter(|r| !r.is_empty()),
      namespace: Some(self.namespace.clone()),
      no_tmpdir_override: self.no_tmpdir_override,
      verbose: self.verbose,
    }
  }

  fn auth_options(&self) -> AuthOptions {
    AuthOptions {
      non_interactive: self.auth_noninteractive,
      admin_username: self.auth_admin_username.clone(),
      admin_password_openssl: self.auth_admin_password_openssl.clone(),
      admin_password_htpasswd: self.auth_admin_password_htpasswd.clone(),
      arkime_password: self.auth_arkime_password.clone(),
      generate_webcerts: self.auth_generate_webcerts,
      generate_fwcerts: self.auth_generate_fwcerts,
      generate_netbox_passwords: self.auth_generate_netbox_passwords,
    }
  }
}

fn init_tracing(verbose: bool) {
  let filter = if verbose {
    EnvFilter::new("debug")
  } else {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
  };
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .without_time()
    .init();
}

/// Maps a failure to the process exit status: the failing subprocess's own
/// code when one is known, otherwise 1.
fn exit_code_for(err: &anyhow::Error) -> u8 {
  let code = err
    .chain()
    .find_map(|cause| cause.downcast_ref::<ControlError>())
    .map_or(1, ControlError::exit_code);
  u8::try_from(code).ok().filter(|c| *c != 0).unwrap_or(1)
}

fn report(err: &anyhow::Error) {
  print_error(&format!("{err:#}"));
  if let Some(control) = err.chain().find_map(|cause| cause.downcast_ref::<ControlError>()) {
    for line in control.output() {
      eprintln!("{line}");
    }
  }
}

fn main() -> ExitCode {
  let mut cli = Cli::parse();

  let invoked = std::env::args_os().next().unwrap_or_default();
  let name = Path::new(&invoked)
    .file_name()
    .and_then(OsStr::to_str)
    .unwrap_or_default()
    .to_string();
  if let Err(err) = cli.imply_from_invocation(&name) {
    report(&err);
    return ExitCode::from(2);
  }

  init_tracing(cli.verbose);

  match cmd::run(&cli) {
    Ok(()) => ExitCode::SUCCESS,
    Err(err) => {
      report(&err);
      ExitCode::from(exit_code_for(&err))
    }
  }
}
