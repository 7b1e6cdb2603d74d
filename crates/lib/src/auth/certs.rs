//! Self-signed certificates for the web front end and for log forwarders.

use std::fs;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

use super::Provisioner;
use crate::error::{ControlError, Result};
use crate::exec::{CommandRequest, spawn_in_group};

/// Client key, certificate and the CA certificate that signed it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientBundle {
  pub key: PathBuf,
  pub crt: PathBuf,
  pub ca: PathBuf,
}

impl ClientBundle {
  fn is_complete(&self) -> bool {
    self.key.is_file() && self.crt.is_file() && self.ca.is_file()
  }
}

/// Deletes regular files in `dir` whose extension is one of `extensions`.
/// An empty list deletes every file.
fn remove_files(dir: &Path, extensions: &[&str]) -> Result<()> {
  let entries = match fs::read_dir(dir) {
    Ok(entries) => entries,
    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
    Err(e) => return Err(ControlError::io(dir, e)),
  };
  for path in entries.flatten().map(|e| e.path()).filter(|p| p.is_file()) {
    let matches = extensions.is_empty()
      || path
        .extension()
        .is_some_and(|ext| extensions.iter().any(|e| ext == *e));
    if matches {
      debug!(file = %path.display(), "removing old certificate material");
      fs::remove_file(&path).map_err(|e| ControlError::io(&path, e))?;
    }
  }
  Ok(())
}

/// Renames `from` to `to`, copying when they sit on different filesystems.
fn move_file(from: &Path, to: &Path) -> Result<()> {
  if fs::rename(from, to).is_ok() {
    return Ok(());
  }
  fs::copy(from, to).map_err(|e| ControlError::io(to, e))?;
  fs::remove_file(from).map_err(|e| ControlError::io(from, e))
}

impl Provisioner<'_> {
  async fn openssl<I, S>(&self, cwd: &Path, args: I, what: &str) -> Result<()>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let request = self.ctx.tool(self.ctx.openssl()).args(args).cwd(cwd);
    self
      .runner
      .run(&request)
      .await?
      .check(format!("unable to generate {what}"))?;
    Ok(())
  }

  pub(super) async fn webcerts(&self) -> Result<()> {
    let dir = self.ctx.layout().web_certs_dir();
    fs::create_dir_all(&dir).map_err(|e| ControlError::io(&dir, e))?;
    remove_files(&dir, &["pem"])?;

    self
      .openssl(&dir, ["dhparam", "-out", "dhparam.pem", "2048"], "dhparam.pem")
      .await?;
    self
      .openssl(
        &dir,
        [
          "req", "-subj", "/CN=localhost", "-x509", "-newkey", "rsa:4096", "-nodes", "-keyout", "key.pem", "-out",
          "cert.pem", "-days", "3650",
        ],
        "key.pem/cert.pem",
      )
      .await
  }

  /// Scratch directory under the install's `.tmp`, removed on drop.
  fn scratch(&self, prefix: &str) -> Result<tempfile::TempDir> {
    let root = self.ctx.layout().tmp_dir();
    fs::create_dir_all(&root).map_err(|e| ControlError::io(&root, e))?;
    tempfile::Builder::new()
      .prefix(prefix)
      .tempdir_in(&root)
      .map_err(|e| ControlError::io(&root, e))
  }

  pub(super) async fn fwcerts(&self) -> Result<()> {
    let layout = self.ctx.layout();
    let logstash = layout.logstash_certs_dir();
    fs::create_dir_all(&logstash).map_err(|e| ControlError::io(&logstash, e))?;
    remove_files(&logstash, &["srl", "csr", "key", "crt", "pem"])?;
    let server_conf = logstash.join("server.conf").to_string_lossy().into_owned();

    // CSR and serial files stay in scratch
    let scratch = self.scratch("certs.")?;
    let work = scratch.path();

    self.openssl(work, ["genrsa", "-out", "ca.key", "2048"], "ca.key").await?;
    self
      .openssl(
        work,
        [
          "req", "-x509", "-new", "-nodes", "-key", "ca.key", "-sha256", "-days", "9999", "-subj",
          "/C=US/ST=ID/O=sensor/OU=ca", "-out", "ca.crt",
        ],
        "ca.crt",
      )
      .await?;

    self
      .openssl(work, ["genrsa", "-out", "server.key", "2048"], "server.key")
      .await?;
    self
      .openssl(
        work,
        ["req", "-sha512", "-new", "-key", "server.key", "-out", "server.csr", "-config", server_conf.as_str()],
        "server.csr",
      )
      .await?;
    self
      .openssl(
        work,
        [
          "x509", "-days", "3650", "-req", "-sha512", "-in", "server.csr", "-CAcreateserial", "-CA", "ca.crt",
          "-CAkey", "ca.key", "-out", "server.crt", "-extensions", "v3_req", "-extfile", server_conf.as_str(),
        ],
        "server.crt",
      )
      .await?;
    move_file(&work.join("server.key"), &work.join("server.key.pem"))?;
    self
      .openssl(
        work,
        ["pkcs8", "-in", "server.key.pem", "-topk8", "-nocrypt", "-out", "server.key"],
        "server.key",
      )
      .await?;

    for name in ["ca.key", "ca.crt", "server.crt", "server.key", "server.key.pem"] {
      move_file(&work.join(name), &logstash.join(name))?;
    }
    drop(scratch);

    let filebeat = layout.filebeat_certs_dir();
    fs::create_dir_all(&filebeat).map_err(|e| ControlError::io(&filebeat, e))?;
    remove_files(&filebeat, &[])?;
    self.client_bundle(&filebeat).await?;
    Ok(())
  }

  /// Issues a client key/certificate signed by the forwarder CA into
  /// `output_dir`. Intermediate files stay in a scratch directory that is
  /// removed on return.
  pub(super) async fn client_bundle(&self, output_dir: &Path) -> Result<ClientBundle> {
    let logstash = self.ctx.layout().logstash_certs_dir();
    let ca_crt = logstash.join("ca.crt");
    let ca_key = logstash.join("ca.key");
    let client_conf = logstash.join("client.conf");

    let scratch = self.scratch("certs.")?;
    let work = scratch.path();

    self
      .openssl(work, ["genrsa", "-out", "client.key", "2048"], "client.key")
      .await?;
    self
      .openssl(
        work,
        [
          "req".to_string(),
          "-sha512".into(),
          "-new".into(),
          "-key".into(),
          "client.key".into(),
          "-out".into(),
          "client.csr".into(),
          "-config".into(),
          client_conf.to_string_lossy().into_owned(),
        ],
        "client.csr",
      )
      .await?;
    self
      .openssl(
        work,
        [
          "x509".to_string(),
          "-days".into(),
          "3650".into(),
          "-req".into(),
          "-sha512".into(),
          "-in".into(),
          "client.csr".into(),
          "-CAcreateserial".into(),
          "-CA".into(),
          ca_crt.to_string_lossy().into_owned(),
          "-CAkey".into(),
          ca_key.to_string_lossy().into_owned(),
          "-out".into(),
          "client.crt".into(),
          "-extensions".into(),
          "v3_req".into(),
          "-extensions".into(),
          "usr_cert".into(),
          "-extfile".into(),
          client_conf.to_string_lossy().into_owned(),
        ],
        "client.crt",
      )
      .await?;

    let bundle = ClientBundle {
      key: output_dir.join("client.key"),
      crt: output_dir.join("client.crt"),
      ca: output_dir.join("ca.crt"),
    };
    if work != output_dir {
      for (name, dest) in [("client.key", &bundle.key), ("client.crt", &bundle.crt)] {
        let source = work.join(name);
        if source.is_file() {
          move_file(&source, dest)?;
        }
      }
    }
    if ca_crt.is_file() && dunce::canonicalize(&ca_crt).ok() != dunce::canonicalize(&bundle.ca).ok() {
      fs::copy(&ca_crt, &bundle.ca).map_err(|e| ControlError::io(&bundle.ca, e))?;
    }

    if !bundle.is_complete() {
      return Err(ControlError::Auth("unable to generate client key/crt".into()));
    }
    Ok(bundle)
  }

  pub(super) async fn txfwcerts(&self) -> Result<()> {
    let Some(script) = self.tx_rx_script() else {
      return Err(ControlError::MissingTool {
        tool: "croc and tx-rx-secure.sh".into(),
        operation: "transferring forwarder certificates".into(),
      });
    };
    self.prompter.message(
      "Run configure-capture on the remote log forwarder, select \"Configure Forwarding,\" then \"Receive client SSL files...\"",
    );

    let outbox = self.scratch("txcerts.")?;
    let bundle = self.client_bundle(outbox.path()).await?;

    // stderr is folded in so the transfer code reaches the operator
    let script = script.to_string_lossy().into_owned();
    let request = CommandRequest::new("/bin/sh")
      .args(["-c", "exec \"$0\" -t \"$1\" \"$2\" \"$3\" 2>&1"])
      .arg(script.as_str())
      .args([&bundle.ca, &bundle.crt, &bundle.key].map(|p| p.to_string_lossy().into_owned()))
      .envs(&self.ctx.command_env());
    let mut child = spawn_in_group(&request)?;
    if let Some(stdout) = child.stdout.take() {
      let mut lines = BufReader::new(stdout).lines();
      while let Ok(Some(line)) = lines.next_line().await {
        self.prompter.message(line.trim_end());
      }
    }
    let status = child
      .wait()
      .await
      .map_err(|source| ControlError::Spawn { command: script.clone(), source })?;
    if !status.success() {
      return Err(ControlError::CommandFailed {
        context: format!("{script} failed to transfer client certificates"),
        code: status.code().unwrap_or(1),
        output: Vec::new(),
      });
    }
    Ok(())
  }
}
