use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{Backend, ExecTarget, LogsOptions, LogsPlan, StopOptions, StopOutcome};
use crate::consts::COMPOSE_HTTP_TIMEOUT;
use crate::context::ControlContext;
use crate::descriptor::BackendMode;
use crate::descriptor::envfile;
use crate::error::{ControlError, Result};
use crate::exec::{CommandRequest, CommandRunner, ExecResult};
use crate::keystore::{self, KeystoreRequest};
use crate::platform::primary_ip;

/// Single-host backend driving `<runtime> compose`.
pub struct ComposeBackend<'a> {
  ctx: &'a ControlContext,
  runner: &'a dyn CommandRunner,
}

impl<'a> ComposeBackend<'a> {
  pub fn new(ctx: &'a ControlContext, runner: &'a dyn CommandRunner) -> Self {
    Self { ctx, runner }
  }

  async fn is_running(&self, service: &str) -> Result<bool> {
    let ps = self.runner.run(&self.ctx.compose(["ps", "-q", service]).stdout_only()).await?;
    Ok(ps.success() && !ps.non_empty_lines().is_empty())
  }
}

#[async_trait]
impl Backend for ComposeBackend<'_> {
  fn mode(&self) -> BackendMode {
    BackendMode::Compose
  }

  fn resolve_bind_path(&self, service: &str, container_path: &str) -> Result<Option<PathBuf>> {
    Ok(self.ctx.descriptor().bind_source(service, container_path))
  }

  async fn exec(&self, target: &ExecTarget, command: &CommandRequest) -> Result<ExecResult> {
    let mut args: Vec<String> = vec!["exec".to_string(), "-T".to_string()];
    if let Some(user) = &target.user {
      args.extend(["-u".to_string(), user.clone()]);
    }
    if let Some(workdir) = &target.workdir {
      args.extend(["-w".to_string(), workdir.clone()]);
    }
    args.push(target.service.clone());
    args.extend(command.argv().into_iter().map(str::to_string));

    let mut request = self.ctx.compose(args).envs(&command.env);
    request.stdin = command.stdin.clone();
    request.capture_stdout = command.capture_stdout;
    request.capture_stderr = command.capture_stderr;
    request.timeout = command.timeout;
    self.runner.run(&request).await
  }

  async fn bring_up(&self, services: &[String]) -> Result<()> {
    let mut args: Vec<String> = vec!["up".to_string(), "--detach".to_string()];
    if !services.is_empty() {
      args.push("--no-deps".to_string());
      args.extend(services.iter().cloned());
    }
    let request = self.ctx.compose(args).env("COMPOSE_HTTP_TIMEOUT", COMPOSE_HTTP_TIMEOUT);
    self.runner.run(&request).await?.check("failed to start the stack")?;
    info!(?services, "compose stack started");
    Ok(())
  }

  async fn tear_down(&self, options: &StopOptions) -> Result<StopOutcome> {
    let mut outcome = StopOutcome::default();

    if options.services.is_empty() {
      let mut args = vec!["down"];
      if options.wipe {
        args.push("--volumes");
      }
      self.runner.run(&self.ctx.compose(args)).await?.check("failed to stop the stack")?;
      info!(wipe = options.wipe, "compose stack stopped");
      return Ok(outcome);
    }

    let services = options.services.iter().cloned();
    self
      .runner
      .run(&self.ctx.compose(["stop".to_string()].into_iter().chain(services.clone())))
      .await?
      .check(format!("failed to stop {}", options.services.join(", ")))?;
    info!(services = ?options.services, "services stopped");

    let removed = self
      .runner
      .run(&self.ctx.compose(["rm".to_string(), "--force".to_string()].into_iter().chain(services)))
      .await?;
    if !removed.success() {
      outcome.warnings.push(format!(
        "failed to remove {} (exit code {}): {}",
        options.services.join(", "),
        removed.exit_code,
        removed.output_lines.join(" ")
      ));
    }
    Ok(outcome)
  }

  async fn status(&self, services: &[String]) -> Result<Vec<String>> {
    let request = self.ctx.compose(["ps".to_string()].into_iter().chain(services.iter().cloned()));
    Ok(self.runner.run(&request).await?.check("failed to display status")?.output_lines)
  }

  async fn access_host(&self) -> Result<String> {
    Ok(primary_ip().to_string())
  }

  fn logs_plan(&self, options: &LogsOptions) -> Result<LogsPlan> {
    let services = options.services.iter().cloned();
    let preamble = self.ctx.compose(["ps".to_string()].into_iter().chain(services.clone()));
    let tail = options.lines.map_or_else(|| "all".to_string(), |n| n.to_string());
    let follow = self
      .ctx
      .compose(["logs".to_string(), "--tail".to_string(), tail, "-f".to_string()].into_iter().chain(services))
      .env("COMPOSE_HTTP_TIMEOUT", COMPOSE_HTTP_TIMEOUT);
    Ok(LogsPlan {
      preamble: Some(preamble),
      follow,
    })
  }

  fn keystore_file(&self, service: &str) -> Result<Option<PathBuf>> {
    Ok(self.ctx.descriptor().bind_source(service, &keystore::persist_target(service)))
  }

  async fn keystore_exec(&self, request: &KeystoreRequest) -> Result<ExecResult> {
    let service = request.service.as_str();
    let local_keystore = self
      .keystore_file(service)?
      .filter(|p| p.parent().is_some_and(|d| d.is_dir()))
      .ok_or_else(|| ControlError::Keystore {
        service: service.to_string(),
        message: format!(
          "unable to identify a unique keystore file bind mount in {}",
          self.ctx.descriptor().path().display()
        ),
      })?;
    let local_dir = local_keystore
      .parent()
      .map(PathBuf::from)
      .unwrap_or_else(|| local_keystore.clone());
    let ids = envfile::uid_gid(self.ctx.config_dir())?;

    let command = if self.is_running(service).await? {
      debug!(service, "keystore via running container");
      keystore::compose::exec_command(self.ctx, ids, request)
    } else {
      let image = self
        .ctx
        .descriptor()
        .service_image(service)
        .ok_or_else(|| ControlError::Keystore {
          service: service.to_string(),
          message: format!("unable to identify image in {}", self.ctx.descriptor().path().display()),
        })?;
      debug!(service, image, "keystore via ephemeral container");
      keystore::compose::run_command(self.ctx, ids, image, &local_dir, request)
    };

    let mut result = self.runner.run(&command).await?;
    if result.success() && !local_keystore.is_file() {
      result.exit_code = 1;
      result
        .output_lines
        .push(format!("{} was not created", local_keystore.display()));
    }
    Ok(result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::context::{ContainerRuntime, ContextOptions};
  use crate::util::testutil::{ScriptedRunner, argv_contains};
  use tempfile::TempDir;

  const COMPOSE: &str = r#"
services:
  opensearch:
    image: ghcr.io/idaholab/malcolm/opensearch:25.01.0
    volumes:
      - ./opensearch:/usr/share/opensearch/config/persist:rw
  netbox:
    image: ghcr.io/idaholab/malcolm/netbox:25.01.0
"#;

  fn context(temp: &TempDir) -> ControlContext {
    std::fs::write(temp.path().join("docker-compose.yml"), COMPOSE).unwrap();
    ControlContext::new(ContextOptions {
      install_dir: Some(temp.path().to_path_buf()),
      ..Default::default()
    })
    .unwrap()
    .with_runtime(ContainerRuntime::assumed("docker"))
  }

  #[tokio::test]
  async fn bring_up_named_services_skips_dependencies() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    ComposeBackend::new(&ctx, &runner)
      .bring_up(&["netbox".to_string()])
      .await
      .unwrap();

    let requests = runner.requests();
    assert!(argv_contains(&requests[0], &["up", "--detach", "--no-deps", "netbox"]));
    assert_eq!(
      requests[0].env.get("COMPOSE_HTTP_TIMEOUT").map(String::as_str),
      Some("100000000")
    );
    assert!(requests[0].env.contains_key("TMPDIR"));
  }

  #[tokio::test]
  async fn bring_up_failure_carries_exit_code() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new().respond(&["up"], 14, &["port is already allocated"]);
    let err = ComposeBackend::new(&ctx, &runner).bring_up(&[]).await.unwrap_err();
    assert_eq!(err.exit_code(), 14);
    assert_eq!(err.output(), ["port is already allocated".to_string()]);
  }

  #[tokio::test]
  async fn wipe_removes_volumes() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let options = StopOptions {
      wipe: true,
      ..Default::default()
    };
    ComposeBackend::new(&ctx, &runner).tear_down(&options).await.unwrap();
    assert!(argv_contains(&runner.requests()[0], &["down", "--volumes"]));
  }

  #[tokio::test]
  async fn stop_services_then_remove() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new().respond(&["rm", "--force"], 1, &["no such container"]);
    let options = StopOptions {
      services: vec!["netbox".to_string()],
      ..Default::default()
    };

    let outcome = ComposeBackend::new(&ctx, &runner).tear_down(&options).await.unwrap();
    assert_eq!(outcome.warnings.len(), 1);
    assert!(runner.position(&["stop", "netbox"]).unwrap() < runner.position(&["rm", "--force", "netbox"]).unwrap());
  }

  #[tokio::test]
  async fn failed_service_stop_is_fatal_and_skips_removal() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new().respond(&["stop"], 3, &[]);
    let options = StopOptions {
      services: vec!["netbox".to_string()],
      ..Default::default()
    };

    let err = ComposeBackend::new(&ctx, &runner).tear_down(&options).await.unwrap_err();
    assert_eq!(err.exit_code(), 3);
    assert!(runner.position(&["rm"]).is_none());
  }

  #[tokio::test]
  async fn exec_runs_without_tty_as_user() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    ComposeBackend::new(&ctx, &runner)
      .exec(
        &ExecTarget::service("netbox-postgres").user("1000:1000"),
        &CommandRequest::from_argv(["pg_dump", "-U", "netbox", "-d", "netbox"]).stdout_only(),
      )
      .await
      .unwrap();

    let request = &runner.requests()[0];
    assert!(argv_contains(
      request,
      &["exec", "-T", "-u", "1000:1000", "netbox-postgres", "pg_dump", "-U", "netbox", "-d", "netbox"]
    ));
    assert!(!request.capture_stderr);
  }

  #[test]
  fn logs_plan_tails_everything_by_default() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let plan = ComposeBackend::new(&ctx, &runner)
      .logs_plan(&LogsOptions::default())
      .unwrap();
    assert!(argv_contains(plan.preamble.as_ref().unwrap(), &["ps"]));
    assert!(argv_contains(&plan.follow, &["logs", "--tail", "all", "-f"]));

    let plan = ComposeBackend::new(&ctx, &runner)
      .logs_plan(&LogsOptions {
        services: vec!["zeek".to_string()],
        lines: Some(50),
        color: false,
      })
      .unwrap();
    assert!(argv_contains(&plan.follow, &["logs", "--tail", "50", "-f", "zeek"]));
  }

  #[test]
  fn keystore_file_follows_bind_mount() {
    let temp = TempDir::new().unwrap();
    let ctx = context(&temp);
    let runner = ScriptedRunner::new();
    let backend = ComposeBackend::new(&ctx, &runner);
    assert_eq!(
      backend.keystore_file("opensearch").unwrap(),
      Some(temp.path().join("opensearch").join("opensearch.keystore"))
    );
    assert_eq!(backend.keystore_file("netbox").unwrap(), None);
  }
}
