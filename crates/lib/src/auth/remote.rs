//! Credentials for remote OpenSearch instances and the alerting email
//! sender.

use std::fs;
use std::path::Path;

use tracing::{debug, warn};

use super::Provisioner;
use super::prompt::retry;
use crate::error::{ControlError, Result};
use crate::keystore::KeystoreOperator;
use crate::lifecycle::permissions::PRIVATE_SECRET_MODE;
use crate::util::{set_mode, touch, write_atomic};

const INSTANCES: [&str; 2] = ["primary", "secondary"];

/// Escapes a value for a double-quoted curl config string.
pub fn escape_curl(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  for c in value.chars() {
    match c {
      '\\' => out.push_str("\\\\"),
      '"' => out.push_str("\\\""),
      '\t' => out.push_str("\\t"),
      '\n' => out.push_str("\\n"),
      '\r' => out.push_str("\\r"),
      '\x0b' => out.push_str("\\v"),
      c => out.push(c),
    }
  }
  out
}

fn unescape_curl(value: &str) -> String {
  let mut out = String::with_capacity(value.len());
  let mut chars = value.chars();
  while let Some(c) = chars.next() {
    if c != '\\' {
      out.push(c);
      continue;
    }
    match chars.next() {
      Some('t') => out.push('\t'),
      Some('n') => out.push('\n'),
      Some('r') => out.push('\r'),
      Some('v') => out.push('\x0b'),
      Some(other) => out.push(other),
      None => {}
    }
  }
  out
}

/// The `user` entry of a curl config file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Curlrc {
  pub user: Option<String>,
  pub password: Option<String>,
  pub insecure: bool,
}

impl Curlrc {
  pub fn parse(contents: &str) -> Self {
    let mut parsed = Self::default();
    for line in contents.lines().map(str::trim) {
      if line == "insecure" || line == "-k" || line == "--insecure" {
        parsed.insecure = true;
        continue;
      }
      let Some(rest) = line
        .strip_prefix("user")
        .map(|r| r.trim_start().trim_start_matches([':', '=']).trim())
      else {
        continue;
      };
      let value = rest
        .strip_prefix('"')
        .and_then(|r| r.strip_suffix('"'))
        .map(unescape_curl)
        .unwrap_or_else(|| rest.to_string());
      match value.split_once(':') {
        Some((user, password)) => {
          parsed.user = Some(user.to_string());
          parsed.password = Some(password.to_string());
        }
        None => parsed.user = Some(value),
      }
    }
    parsed
  }

  pub fn read(path: &Path) -> Self {
    fs::read_to_string(path).map(|c| Self::parse(&c)).unwrap_or_default()
  }

  pub fn render(&self) -> String {
    let mut out = format!(
      "user: \"{}:{}\"\n",
      escape_curl(self.user.as_deref().unwrap_or_default()),
      escape_curl(self.password.as_deref().unwrap_or_default())
    );
    if self.insecure {
      out.push_str("insecure\n");
    }
    out
  }
}

impl Provisioner<'_> {
  pub(super) fn remoteos(&self) -> Result<()> {
    for instance in INSTANCES {
      let path = self.ctx.layout().opensearch_curlrc(instance);
      let store = self.prompter.yes_no(
        &format!("Store username/password for {instance} remote OpenSearch/Elasticsearch instance?"),
        false,
      )?;
      if store {
        let curlrc = self.ask_remote_credentials(&Curlrc::read(&path))?;
        write_atomic(&path, curlrc.render().as_bytes(), PRIVATE_SECRET_MODE)?;
        debug!(instance, path = %path.display(), "stored remote OpenSearch credentials");
      } else {
        match fs::remove_file(&path) {
          Ok(()) => {}
          Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
          Err(e) => return Err(ControlError::io(&path, e)),
        }
      }
      touch(&path)?;
      set_mode(&path, PRIVATE_SECRET_MODE)?;
    }
    Ok(())
  }

  fn ask_remote_credentials(&self, previous: &Curlrc) -> Result<Curlrc> {
    let user = retry("OpenSearch/Elasticsearch username", || {
      let user = self
        .prompter
        .ask("OpenSearch/Elasticsearch username", previous.user.as_deref())?;
      if !user.is_empty() && !user.contains(':') {
        return Ok(Some(user));
      }
      self
        .prompter
        .message("Username is blank (or contains a colon, which is not allowed)");
      Ok(None)
    })?;

    let password = retry("OpenSearch/Elasticsearch password", || {
      let password = self.prompter.ask_password(&format!("{user} password: "))?;
      if let (true, Some(prev)) = (password.is_empty(), &previous.password) {
        if self
          .prompter
          .yes_no(&format!("Use previously entered password for \"{user}\"?"), true)?
        {
          return Ok(Some(prev.clone()));
        }
      }
      let confirm = self.prompter.ask_password(&format!("{user} password (again): "))?;
      if !password.is_empty() && password == confirm {
        return Ok(Some(password));
      }
      self.prompter.message("Passwords do not match");
      Ok(None)
    })?;

    let verify = self.prompter.yes_no(
      "Require SSL certificate validation for OpenSearch/Elasticsearch communication?",
      false,
    )?;
    Ok(Curlrc {
      user: Some(user),
      password: Some(password),
      insecure: !verify,
    })
  }

  pub(super) async fn email(&self) -> Result<()> {
    let sender = self.prompter.ask("OpenSearch alerting email sender name", None)?;
    let username = retry("email account username", || {
      let username = self.prompter.ask("Email account username", None)?;
      Ok((!username.is_empty()).then_some(username))
    })?;
    let password = retry("email account password", || {
      let password = self.prompter.ask_password(&format!("{username} password: "))?;
      let confirm = self.prompter.ask_password(&format!("{username} password (again): "))?;
      if !password.is_empty() && password == confirm {
        return Ok(Some(password));
      }
      self.prompter.message("Passwords do not match");
      Ok(None)
    })?;

    let username_key = format!("plugins.alerting.destination.email.{sender}.username");
    let password_key = format!("plugins.alerting.destination.email.{sender}.password");
    let keystore = KeystoreOperator::new(self.backend, self.ctx.verbose());
    keystore.create("opensearch", true).await;
    keystore.remove("opensearch", &username_key).await;
    keystore.add("opensearch", &username_key, &username).await;
    keystore.remove("opensearch", &password_key).await;
    keystore.add("opensearch", &password_key, &password).await;

    let (ok, keys) = keystore.list("opensearch").await;
    if ok && keys.contains(&username_key) && keys.contains(&password_key) {
      self
        .prompter
        .message(&format!("Email alert sender account variables stored: {}", keys.join(", ")));
    } else {
      warn!(?keys, "failed to store email alert sender account variables");
      self
        .prompter
        .message(&format!("Failed to store email alert sender account variables:\n{}", keys.join("\n")));
    }
    Ok(())
  }
}
