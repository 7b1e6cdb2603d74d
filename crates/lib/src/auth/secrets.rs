//! Generated service secrets for NetBox and Arkime.

use std::fs;
use std::path::Path;

use rand::Rng;
use tracing::{debug, info};

use super::Provisioner;
use super::prompt::retry;
use crate::descriptor::envfile::{self, ENV_FILE_MODE};
use crate::error::{ControlError, Result};
use crate::util::{set_mode, write_atomic};

const PASSWORD_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_";
const KEY_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789%@<=>?~^_-";

/// Env files and keys holding NetBox's internal credentials.
const NETBOX_SECRETS: &[(&str, &[&str])] = &[
  ("netbox-postgres.env", &["POSTGRES_PASSWORD", "DB_PASSWORD"]),
  ("redis.env", &["REDIS_PASSWORD"]),
  ("netbox-secret.env", &["SECRET_KEY", "SUPERUSER_PASSWORD", "SUPERUSER_API_TOKEN"]),
];

/// `len` characters drawn uniformly from `alphabet`.
pub fn random_secret(alphabet: &[u8], len: usize) -> String {
  let mut rng = rand::rng();
  (0..len)
    .map(|_| char::from(alphabet[rng.random_range(0..alphabet.len())]))
    .collect()
}

/// True for values shipped in the example files: all `x`/`X`, or the
/// default superuser password `admin`.
pub fn is_placeholder(key: &str, value: &str) -> bool {
  value.chars().all(|c| c == 'x' || c == 'X') || (key == "SUPERUSER_PASSWORD" && value == "admin")
}

/// Copies `<name>.example` over `<name>` when only the template exists.
fn seed_from_example(config_dir: &Path, name: &str) -> Result<()> {
  let target = config_dir.join(name);
  let example = config_dir.join(format!("{name}.example"));
  if !target.is_file() && example.is_file() {
    fs::copy(&example, &target).map_err(|e| ControlError::io(&target, e))?;
  }
  Ok(())
}

fn existing_netbox_secrets(config_dir: &Path) -> Result<bool> {
  for (file, keys) in NETBOX_SECRETS {
    let values = envfile::read_values(&config_dir.join(file))?;
    for key in *keys {
      if envfile::get(&values, key).is_some_and(|v| !v.is_empty() && !is_placeholder(key, &v)) {
        debug!(file, key, "found existing NetBox secret");
        return Ok(true);
      }
    }
  }
  Ok(false)
}

impl Provisioner<'_> {
  pub(super) fn netbox(&self) -> Result<()> {
    let config_dir = self.ctx.config_dir();
    if existing_netbox_secrets(config_dir)?
      && !self.prompter.yes_no(
        "Internal passwords for NetBox already exist. Overwriting them will break access to a populated NetBox database. Are you sure?",
        self.options.non_interactive,
      )?
    {
      self.prompter.message("Internal passwords for NetBox were left unmodified.");
      return Ok(());
    }

    let postgres_password = random_secret(PASSWORD_ALPHABET, 24);
    let redis_password = random_secret(PASSWORD_ALPHABET, 24);
    let superuser_password = random_secret(PASSWORD_ALPHABET, 24);
    let superuser_token = random_secret(PASSWORD_ALPHABET, 40);
    let secret_key = random_secret(KEY_ALPHABET, 50);

    envfile::write_values(
      &config_dir.join("netbox-postgres.env"),
      &[
        ("DB_HOST", "netbox-postgres"),
        ("POSTGRES_DB", "netbox"),
        ("DB_NAME", "netbox"),
        ("POSTGRES_USER", "netbox"),
        ("DB_USER", "netbox"),
        ("POSTGRES_PASSWORD", postgres_password.as_str()),
        ("DB_PASSWORD", postgres_password.as_str()),
        ("K8S_SECRET", "True"),
      ],
    )?;
    envfile::write_values(
      &config_dir.join("redis.env"),
      &[
        ("REDIS_HOST", "redis"),
        ("REDIS_CACHE_HOST", "redis-cache"),
        ("REDIS_PASSWORD", redis_password.as_str()),
        ("K8S_SECRET", "True"),
      ],
    )?;

    seed_from_example(config_dir, "netbox-secret.env")?;
    envfile::set_keys(
      &config_dir.join("netbox-secret.env"),
      &[
        ("SECRET_KEY", secret_key.as_str()),
        ("SUPERUSER_PASSWORD", superuser_password.as_str()),
        ("SUPERUSER_API_TOKEN", superuser_token.as_str()),
        ("K8S_SECRET", "True"),
      ],
    )?;
    info!("generated NetBox internal passwords");
    Ok(())
  }

  pub(super) fn arkime(&self) -> Result<()> {
    let password = if self.options.non_interactive {
      self.options.arkime_password.clone()
    } else {
      Some(retry("password hash secret", || {
        let password = self.prompter.ask_password("Arkime password hash secret: ")?;
        let confirm = self.prompter.ask_password("Arkime password hash secret (again): ")?;
        if !password.is_empty() && password == confirm {
          return Ok(Some(password));
        }
        self.prompter.message("Passwords do not match");
        Ok(None)
      })?)
    };

    let config_dir = self.ctx.config_dir();
    seed_from_example(config_dir, "arkime-secret.env")?;
    let env_file = config_dir.join("arkime-secret.env");
    match password {
      Some(password) => envfile::set_keys(&env_file, &[("ARKIME_PASSWORD_SECRET", password.as_str())])?,
      None if env_file.is_file() => set_mode(&env_file, ENV_FILE_MODE)?,
      None => {
        write_atomic(&env_file, b"", ENV_FILE_MODE)?;
      }
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::super::prompt::scripted::QueuedPrompter;
  use super::super::tests::context;
  use super::super::{AuthOptions, AuthSelection, AuthTask, NonInteractive, Prompter};
  use super::*;
  use crate::backend::ComposeBackend;
  use crate::util::testutil::ScriptedRunner;
  use tempfile::TempDir;

  #[test]
  fn placeholders() {
    assert!(is_placeholder("POSTGRES_PASSWORD", "xxxxxxxx"));
    assert!(is_placeholder("SECRET_KEY", "XXXXxxxx"));
    assert!(is_placeholder("SUPERUSER_PASSWORD", "admin"));
    assert!(!is_placeholder("REDIS_PASSWORD", "admin"));
    assert!(!is_placeholder("SECRET_KEY", "xX1"));
  }

  #[test]
  fn random_secret_uses_alphabet() {
    let secret = random_secret(KEY_ALPHABET, 50);
    assert_eq!(secret.len(), 50);
    assert!(secret.bytes().all(|b| KEY_ALPHABET.contains(&b)));
    assert_ne!(random_secret(PASSWORD_ALPHABET, 24), random_secret(PASSWORD_ALPHABET, 24));
  }

  async fn provision(temp: &TempDir, task: AuthTask, prompter: &dyn Prompter, options: AuthOptions) -> Result<()> {
    let ctx = context(temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    let provisioner = Provisioner::new(&ctx, &backend, &runner, prompter, options);
    provisioner.run(AuthSelection::Only(task)).await.map(drop)
  }

  #[tokio::test]
  async fn netbox_generates_over_placeholders() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(
      config.join("netbox-secret.env.example"),
      "SECRET_KEY=xxxxxxxx\nSUPERUSER_NAME=admin\nSUPERUSER_PASSWORD=admin\nSUPERUSER_API_TOKEN=xxxx\n",
    )
    .unwrap();

    provision(&temp, AuthTask::Netbox, &NonInteractive, AuthOptions::default()).await.unwrap();

    let postgres = envfile::read_values(&config.join("netbox-postgres.env")).unwrap();
    let password = envfile::get(&postgres, "POSTGRES_PASSWORD").unwrap();
    assert_eq!(password.len(), 24);
    assert_eq!(envfile::get(&postgres, "DB_PASSWORD"), Some(password));
    assert_eq!(envfile::get(&postgres, "K8S_SECRET").as_deref(), Some("True"));

    let secret = envfile::read_values(&config.join("netbox-secret.env")).unwrap();
    assert_eq!(envfile::get(&secret, "SECRET_KEY").unwrap().len(), 50);
    assert_eq!(envfile::get(&secret, "SUPERUSER_API_TOKEN").unwrap().len(), 40);
    assert_eq!(envfile::get(&secret, "SUPERUSER_NAME").as_deref(), Some("admin"));
    assert!(config.join("redis.env").is_file());
  }

  #[tokio::test]
  async fn netbox_keeps_real_secrets_unless_confirmed() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("redis.env"), "REDIS_PASSWORD=alreadyset\n").unwrap();

    let prompter = QueuedPrompter::new(&["n"]);
    provision(&temp, AuthTask::Netbox, &prompter, AuthOptions::default()).await.unwrap();
    assert_eq!(fs::read_to_string(config.join("redis.env")).unwrap(), "REDIS_PASSWORD=alreadyset\n");
    assert!(!config.join("netbox-postgres.env").exists());
    assert_eq!(
      prompter.messages.lock().unwrap().as_slice(),
      ["Internal passwords for NetBox were left unmodified."]
    );

    let prompter = QueuedPrompter::new(&["y"]);
    provision(&temp, AuthTask::Netbox, &prompter, AuthOptions::default()).await.unwrap();
    assert_ne!(fs::read_to_string(config.join("redis.env")).unwrap(), "REDIS_PASSWORD=alreadyset\n");
  }

  #[tokio::test]
  async fn arkime_secret_is_stored() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("arkime-secret.env.example"), "ARKIME_PASSWORD_SECRET=Malcolm\n").unwrap();

    let prompter = QueuedPrompter::new(&["one", "two", "hunter22", "hunter22"]);
    provision(&temp, AuthTask::Arkime, &prompter, AuthOptions::default()).await.unwrap();

    let values = envfile::read_values(&config.join("arkime-secret.env")).unwrap();
    assert_eq!(envfile::get(&values, "ARKIME_PASSWORD_SECRET").as_deref(), Some("hunter22"));
  }

  #[tokio::test]
  async fn unattended_arkime_without_password_leaves_value() {
    let temp = TempDir::new().unwrap();
    let config = temp.path().join("config");
    fs::create_dir_all(&config).unwrap();
    fs::write(config.join("arkime-secret.env.example"), "ARKIME_PASSWORD_SECRET=Malcolm\n").unwrap();
    let options = AuthOptions {
      non_interactive: true,
      ..Default::default()
    };

    provision(&temp, AuthTask::Arkime, &NonInteractive, options).await.unwrap();

    assert_eq!(
      fs::read_to_string(config.join("arkime-secret.env")).unwrap(),
      "ARKIME_PASSWORD_SECRET=Malcolm\n"
    );
  }
}
