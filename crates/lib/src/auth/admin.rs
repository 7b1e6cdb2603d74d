//! Administrator account: `auth.env`, `htpasswd`, the LDAP sample config and
//! the htadmin config.

use std::fs;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use regex::Regex;
use tracing::{debug, info};

use super::Provisioner;
use super::prompt::retry;
use crate::descriptor::envfile;
use crate::error::{ControlError, Result};
use crate::lifecycle::permissions::{PRIVATE_SECRET_MODE, SHARED_SECRET_MODE};
use crate::util::{touch, write_atomic};

pub const USERNAME_MIN_LEN: usize = 4;
pub const USERNAME_MAX_LEN: usize = 32;
pub const PASSWORD_MIN_LEN: usize = 8;
pub const PASSWORD_MAX_LEN: usize = 128;

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z0-9_\-.]+$").unwrap());

pub fn valid_username(username: &str) -> bool {
  USERNAME_RE.is_match(username) && (USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&username.len())
}

pub fn valid_password(password: &str) -> bool {
  (PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password.chars().count())
}

/// Rebuilds an htpasswd file for `username`.
///
/// With `replacement` (a precomputed hash) the user's entry is written first
/// and any older entry for the same user dropped. When the administrator was
/// renamed, the `previous` user's entry is removed. Other accounts are kept.
pub fn rotate_htpasswd(existing: &str, username: &str, previous: Option<&str>, replacement: Option<&str>) -> String {
  let renamed = previous.filter(|p| *p != username);
  let mut out = String::new();
  if let Some(hash) = replacement {
    out.push_str(&format!("{username}:{hash}\n"));
  }
  for line in existing.lines().filter(|l| !l.trim().is_empty()) {
    let user = line.split(':').next().unwrap_or_default();
    if renamed == Some(user) || (replacement.is_some() && user == username) {
      continue;
    }
    out.push_str(line);
    out.push('\n');
  }
  out
}

fn ldap_conf(defaults: &[(String, String)]) -> String {
  let get = |key: &str, fallback: &str| envfile::get(defaults, key).unwrap_or_else(|| fallback.to_string());
  let proto = get("LDAP_PROTO", "ldap://");
  let host = get("LDAP_HOST", "ds.example.com");
  let port = get("LDAP_PORT", "3268");
  let (uri, group_attr, group_attr_is_dn) = if get("LDAP_SERVER_TYPE", "winldap") == "openldap" {
    ("DC=example,DC=com?uid?sub?(objectClass=posixAccount)", "memberUid", "off")
  } else {
    ("DC=example,DC=com?sAMAccountName?sub?(objectClass=person)", "member", "on")
  };

  format!(
    "# This is a sample configuration for the ldap_server section of nginx.conf.
# Yours will vary depending on how your Active Directory/LDAP server is configured.
# See https://github.com/kvspb/nginx-auth-ldap#available-config-parameters for options.

ldap_server ad_server {{
  url \"{proto}{host}:{port}/{uri}\";

  binddn \"bind_dn\";
  binddn_passwd \"bind_dn_password\";

  group_attribute {group_attr};
  group_attribute_is_dn {group_attr_is_dn};
  require group \"CN=malcolm,OU=groups,DC=example,DC=com\";
  require valid_user;
  satisfy all;
}}

auth_ldap_cache_enabled on;
auth_ldap_cache_expiration_time 10000;
auth_ldap_cache_size 1000;
"
  )
}

fn htadmin_config(username: &str) -> String {
  format!(
    "; HTAdmin config file.

[application]
; Change this to customize your title:
app_title = Malcolm User Management

; htpasswd file
secure_path  = ./auth/htpasswd
; metadata file
metadata_path  = ./config/metadata

; administrator user/password (htpasswd -b -c -B ...)
admin_user = {username}

; username field quality checks
;
min_username_len = {USERNAME_MIN_LEN}
max_username_len = {USERNAME_MAX_LEN}

; Password field quality checks
;
min_password_len = {PASSWORD_MIN_LEN}
max_password_len = {PASSWORD_MAX_LEN}

"
  )
}

impl Provisioner<'_> {
  pub(super) async fn admin(&self) -> Result<()> {
    let layout = self.ctx.layout();
    let non_interactive = self.options.non_interactive;

    let username = retry("administrator username", || {
      let answer = self.prompter.ask(
        &format!(
          "Administrator username (between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters; alphanumeric, _, -, and . allowed)"
        ),
        self.options.admin_username.as_deref(),
      )?;
      Ok(valid_username(&answer).then_some(answer))
    })?;

    let password = if non_interactive {
      None
    } else {
      Some(retry("password", || {
        let password = self.prompter.ask_password(&format!(
          "{username} password (between {PASSWORD_MIN_LEN} and {PASSWORD_MAX_LEN} characters): "
        ))?;
        if !valid_password(&password) {
          return Ok(None);
        }
        let confirm = self.prompter.ask_password(&format!("{username} password (again): "))?;
        Ok((password == confirm).then_some(password))
      })?)
    };

    let auth_env = self.ctx.config_dir().join("auth.env");
    let previous = envfile::get(&envfile::read_values(&auth_env)?, "MALCOLM_USERNAME").filter(|u| !u.is_empty());

    let hash = match &password {
      Some(password) => self.openssl_passwd(password).await?,
      None => self
        .options
        .admin_password_openssl
        .clone()
        .ok_or_else(|| ControlError::Auth("an openssl password hash is required for unattended setup".into()))?,
    };

    let contents = format!(
      "# Malcolm Administrator username and encrypted password for nginx reverse proxy (and upload server's SFTP access)
MALCOLM_USERNAME={username}
MALCOLM_PASSWORD={}
K8S_SECRET=True
",
      STANDARD.encode(hash.as_bytes())
    );
    write_atomic(&auth_env, contents.as_bytes(), PRIVATE_SECRET_MODE)?;
    debug!(path = %auth_env.display(), "wrote administrator credentials");

    let htpasswd = layout.htpasswd();
    if let Some(password) = &password {
      let mut request = self.ctx.tool("htpasswd");
      if !htpasswd.is_file() {
        request = request.arg("-c");
      }
      let request = request
        .args(["-i", "-B"])
        .arg(htpasswd.to_string_lossy())
        .arg(username.as_str())
        .stdin(password.as_bytes());
      self.runner.run(&request).await?.check("unable to generate htpasswd file")?;
    }

    let renamed = previous.as_deref().is_some_and(|p| p != username);
    if renamed || non_interactive {
      let existing = match fs::read_to_string(&htpasswd) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(ControlError::io(&htpasswd, e)),
      };
      let replacement = self
        .options
        .admin_password_htpasswd
        .as_deref()
        .filter(|_| non_interactive);
      let rotated = rotate_htpasswd(&existing, &username, previous.as_deref(), replacement);
      write_atomic(&htpasswd, rotated.as_bytes(), SHARED_SECRET_MODE)?;
    }

    let ldap = layout.ldap_conf();
    if !ldap.is_file() {
      let defaults = envfile::read_values(&layout.ldap_defaults())?;
      write_atomic(&ldap, ldap_conf(&defaults).as_bytes(), PRIVATE_SECRET_MODE)?;
      info!(path = %ldap.display(), "wrote sample LDAP configuration");
    }

    write_atomic(
      &layout.htadmin_config(),
      htadmin_config(&username).as_bytes(),
      SHARED_SECRET_MODE,
    )?;
    touch(&layout.htadmin_metadata())?;

    self
      .prompter
      .message("Additional local accounts can be created at https://localhost/auth/ when Malcolm is running");
    Ok(())
  }

  async fn openssl_passwd(&self, password: &str) -> Result<String> {
    let request = self
      .ctx
      .tool(self.ctx.openssl())
      .args(["passwd", "-1", "-stdin"])
      .stdin(password.as_bytes())
      .stdout_only();
    let result = self.runner.run(&request).await?;
    match result.output_lines.first().map(|l| l.trim()) {
      Some(hash) if result.success() && !hash.is_empty() => Ok(hash.to_string()),
      _ => Err(ControlError::Auth("unable to generate password hash with openssl".into())),
    }
  }
}
