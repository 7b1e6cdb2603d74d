//! Keystore command assembly for the compose backend.

use std::path::Path;

use super::{KeystoreRequest, container_dir, keystore_bin};
use crate::consts::UID_GID_SETUP_ENTRYPOINT;
use crate::context::ControlContext;
use crate::descriptor::envfile::UidGid;
use crate::exec::CommandRequest;

/// `compose exec` into the running service as PUID:PGID.
pub fn exec_command(ctx: &ControlContext, ids: UidGid, request: &KeystoreRequest) -> CommandRequest {
  let service = request.service.as_str();
  let mut args: Vec<String> = vec!["exec".to_string()];
  if request.stdin.is_some() {
    args.push("-T".to_string());
  }
  args.extend([
    "-u".to_string(),
    ids.to_string(),
    "-w".to_string(),
    container_dir(service),
    service.to_string(),
    keystore_bin(service),
  ]);
  args.extend(request.arguments.iter().cloned());
  finish(ctx.compose(args), request)
}

/// Throwaway `<runtime> run --rm` of the service image with the keystore
/// directory bind-mounted.
///
/// With `drop_privileges` the container starts as root under the image's
/// uid/gid setup entrypoint, which chowns the directory and drops to
/// PUID:PGID before running the keystore tool.
pub fn run_command(
  ctx: &ControlContext,
  ids: UidGid,
  image: &str,
  local_dir: &Path,
  request: &KeystoreRequest,
) -> CommandRequest {
  let service = request.service.as_str();
  let runtime = ctx.runtime();
  let dir = container_dir(service);
  let bin = keystore_bin(service);

  let mut args: Vec<String> = vec!["run".to_string(), "--rm".to_string()];
  if runtime.is_podman() {
    args.extend(["--userns".to_string(), "keep-id".to_string()]);
  }
  if request.stdin.is_some() {
    args.push("-i".to_string());
  }
  args.extend([
    "--entrypoint".to_string(),
    if request.drop_privileges {
      UID_GID_SETUP_ENTRYPOINT.to_string()
    } else {
      bin.clone()
    },
  ]);
  for (key, value) in [
    ("PUID", ids.uid.to_string()),
    ("DEFAULT_UID", ids.uid.to_string()),
    ("PGID", ids.gid.to_string()),
    ("DEFAULT_GID", ids.gid.to_string()),
    ("PUSER_CHOWN", dir.clone()),
  ] {
    args.extend(["--env".to_string(), format!("{key}={value}")]);
  }
  args.extend([
    "-v".to_string(),
    format!("{}:{dir}:rw", local_dir.display()),
    "-w".to_string(),
    dir,
    "-u".to_string(),
    if request.drop_privileges {
      "root".to_string()
    } else {
      ids.to_string()
    },
    image.to_string(),
  ]);
  if request.drop_privileges {
    args.push(bin);
  }
  args.extend(request.arguments.iter().cloned());

  finish(ctx.tool(&runtime.program).args(args), request)
}

fn finish(mut command: CommandRequest, request: &KeystoreRequest) -> CommandRequest {
  command.stdin = request.stdin.clone();
  command.envs(&request.env)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::{ContainerRuntime, ContextOptions};
  use std::path::PathBuf;
  use tempfile::TempDir;

  fn context(temp: &TempDir, runtime: &str) -> ControlContext {
    std::fs::write(temp.path().join("docker-compose.yml"), "services: {}\n").unwrap();
    ControlContext::new(ContextOptions {
      install_dir: Some(temp.path().to_path_buf()),
      no_tmpdir_override: true,
      ..Default::default()
    })
    .unwrap()
    .with_runtime(ContainerRuntime::assumed(runtime))
  }

  fn ids() -> UidGid {
    UidGid { uid: 1000, gid: 1001 }
  }

  #[test]
  fn exec_uses_running_container() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp, "docker");
    let req = KeystoreRequest::new("opensearch", false, ["list"]);

    let cmd = exec_command(&ctx, ids(), &req);
    let argv = cmd.argv();
    let exec = argv.iter().position(|a| *a == "exec").unwrap();
    assert_eq!(
      &argv[exec..],
      [
        "exec",
        "-u",
        "1000:1001",
        "-w",
        "/usr/share/opensearch/config",
        "opensearch",
        "/usr/share/opensearch/bin/opensearch-keystore",
        "list"
      ]
    );
    assert!(cmd.stdin.is_none());
  }

  #[test]
  fn exec_with_stdin_disables_tty() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp, "docker");
    let req = KeystoreRequest::new("opensearch", true, ["add", "key", "--stdin"]).stdin("secret");

    let cmd = exec_command(&ctx, ids(), &req);
    assert!(cmd.argv().windows(2).any(|w| w == ["exec", "-T"]));
    assert_eq!(cmd.stdin.as_deref(), Some(b"secret".as_slice()));
  }

  #[test]
  fn ephemeral_run_dropping_privileges() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp, "docker");
    let req = KeystoreRequest::new("opensearch", true, ["create"]);
    let local = PathBuf::from("/opt/malcolm/opensearch");

    let cmd = run_command(&ctx, ids(), "ghcr.io/idaholab/malcolm/opensearch:25.01.0", &local, &req);
    assert_eq!(
      cmd.argv(),
      [
        "docker",
        "run",
        "--rm",
        "--entrypoint",
        "/usr/local/bin/docker-uid-gid-setup.sh",
        "--env",
        "PUID=1000",
        "--env",
        "DEFAULT_UID=1000",
        "--env",
        "PGID=1001",
        "--env",
        "DEFAULT_GID=1001",
        "--env",
        "PUSER_CHOWN=/usr/share/opensearch/config",
        "-v",
        "/opt/malcolm/opensearch:/usr/share/opensearch/config:rw",
        "-w",
        "/usr/share/opensearch/config",
        "-u",
        "root",
        "ghcr.io/idaholab/malcolm/opensearch:25.01.0",
        "/usr/share/opensearch/bin/opensearch-keystore",
        "create"
      ]
    );
  }

  #[test]
  fn ephemeral_run_without_dropping_privileges_on_podman() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp, "podman");
    let req = KeystoreRequest::new("opensearch", false, ["list"]).stdin("N");
    let local = PathBuf::from("/opt/malcolm/opensearch");

    let cmd = run_command(&ctx, ids(), "opensearch:latest", &local, &req);
    let argv = cmd.argv();
    assert_eq!(&argv[..6], ["podman", "run", "--rm", "--userns", "keep-id", "-i"]);
    assert!(argv.windows(2).any(|w| w == ["--entrypoint", "/usr/share/opensearch/bin/opensearch-keystore"]));
    assert!(argv.windows(2).any(|w| w == ["-u", "1000:1001"]));
    assert_eq!(&argv[argv.len() - 2..], ["opensearch:latest", "list"]);
  }
}
