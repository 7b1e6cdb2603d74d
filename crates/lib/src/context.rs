//! Immutable run context, built once at startup and borrowed by every
//! component for the rest of the run.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::consts::{CONTAINER_RUNTIME_KEY, DEFAULT_NAMESPACE, PROFILE_KEY, PROFILE_MALCOLM};
use crate::descriptor::envfile;
use crate::descriptor::{BackendMode, Descriptor};
use crate::error::{ControlError, Result};
use crate::exec::{CommandRequest, CommandRunner};
use crate::platform::find_in_path;
use crate::platform::paths::InstallLayout;

/// Caller-supplied settings; anything left `None` falls back to the env
/// files or built-in defaults.
#[derive(Debug, Clone, Default)]
pub struct ContextOptions {
  pub install_dir: Option<PathBuf>,
  pub descriptor: Option<PathBuf>,
  pub config_dir: Option<PathBuf>,
  pub profile: Option<String>,
  pub runtime: Option<String>,
  pub namespace: Option<String>,
  pub no_tmpdir_override: bool,
  pub verbose: bool,
}

/// Container runtime binary plus the argv prefix that invokes compose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRuntime {
  pub program: String,
  pub compose: Vec<String>,
}

impl ContainerRuntime {
  /// Assumes the `<runtime> compose` plugin without probing for it.
  pub fn assumed(program: impl Into<String>) -> Self {
    let program = program.into();
    Self {
      compose: vec![program.clone(), "compose".to_string()],
      program,
    }
  }

  pub fn is_podman(&self) -> bool {
    Path::new(&self.program)
      .file_name()
      .is_some_and(|n| n.to_string_lossy().starts_with("podman"))
  }

  /// Checks the runtime answers and finds a working compose front end:
  /// the `compose` plugin first, then a standalone `<runtime>-compose`.
  pub async fn detect(program: &str, env: &BTreeMap<String, String>, runner: &dyn CommandRunner) -> Result<Self> {
    let info = runner
      .run(&CommandRequest::new(program).arg("info").envs(env).stdout_only())
      .await?;
    if !info.success() {
      return Err(ControlError::CommandFailed {
        context: format!("{program} info failed, is the container runtime running?"),
        code: info.exit_code,
        output: info.output_lines,
      });
    }

    let plugin = runner
      .run(&CommandRequest::new(program).args(["compose", "version"]).envs(env))
      .await?;
    if plugin.success() {
      debug!(program, "using compose plugin");
      return Ok(Self::assumed(program));
    }

    let standalone = format!("{program}-compose");
    for candidate in [standalone.as_str(), "docker-compose"] {
      if let Some(path) = find_in_path(candidate) {
        debug!(compose = %path.display(), "using standalone compose");
        return Ok(Self {
          program: program.to_string(),
          compose: vec![path.to_string_lossy().into_owned()],
        });
      }
    }

    Err(ControlError::MissingTool {
      tool: format!("{program} compose"),
      operation: "the docker-compose backend".to_string(),
    })
  }
}

#[derive(Debug, Clone)]
pub struct ControlContext {
  layout: InstallLayout,
  descriptor: Descriptor,
  config_dir: PathBuf,
  tmpdir_override: bool,
  profile: String,
  runtime: ContainerRuntime,
  namespace: String,
  openssl: String,
  verbose: bool,
}

impl ControlContext {
  /// Loads the descriptor and resolves settings without probing any tools.
  pub fn new(options: ContextOptions) -> Result<Self> {
    let layout = options
      .install_dir
      .clone()
      .map(InstallLayout::new)
      .unwrap_or_else(InstallLayout::from_env);
    let descriptor_path = options
      .descriptor
      .clone()
      .unwrap_or_else(|| layout.default_descriptor());
    let descriptor = Descriptor::load(&descriptor_path)?;
    let config_dir = options
      .config_dir
      .clone()
      .unwrap_or_else(|| layout.default_config_dir());

    let process_env = envfile::read_values(&config_dir.join("process.env"))?;
    let profile = options
      .profile
      .clone()
      .or_else(|| envfile::get(&process_env, PROFILE_KEY))
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| PROFILE_MALCOLM.to_string());
    let runtime_name = options
      .runtime
      .clone()
      .or_else(|| envfile::get(&process_env, CONTAINER_RUNTIME_KEY))
      .filter(|r| !r.is_empty())
      .unwrap_or_else(|| "docker".to_string());
    let openssl = find_in_path("openssl")
      .map(|p| p.to_string_lossy().into_owned())
      .unwrap_or_else(|| "openssl".to_string());

    Ok(Self {
      layout,
      descriptor,
      config_dir,
      tmpdir_override: !options.no_tmpdir_override,
      profile,
      runtime: ContainerRuntime::assumed(runtime_name),
      namespace: options.namespace.unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
      openssl,
      verbose: options.verbose,
    })
  }

  /// [`ControlContext::new`] followed by container runtime detection when
  /// the descriptor targets compose.
  pub async fn load(options: ContextOptions, runner: &dyn CommandRunner) -> Result<Self> {
    let mut ctx = Self::new(options)?;
    if ctx.tmpdir_override {
      let tmp = ctx.layout.tmp_dir();
      std::fs::create_dir_all(&tmp).map_err(|e| ControlError::io(&tmp, e))?;
    }
    if ctx.mode() == BackendMode::Compose {
      ctx.runtime = ContainerRuntime::detect(&ctx.runtime.program, &ctx.command_env(), runner).await?;
    }
    info!(mode = %ctx.mode(), profile = %ctx.profile, descriptor = %ctx.descriptor.path().display(), "context ready");
    Ok(ctx)
  }

  pub fn with_runtime(mut self, runtime: ContainerRuntime) -> Self {
    self.runtime = runtime;
    self
  }

  pub fn layout(&self) -> &InstallLayout {
    &self.layout
  }

  pub fn descriptor(&self) -> &Descriptor {
    &self.descriptor
  }

  pub fn mode(&self) -> BackendMode {
    self.descriptor.mode()
  }

  pub fn config_dir(&self) -> &Path {
    &self.config_dir
  }

  pub fn profile(&self) -> &str {
    &self.profile
  }

  pub fn runtime(&self) -> &ContainerRuntime {
    &self.runtime
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn openssl(&self) -> &str {
    &self.openssl
  }

  pub fn verbose(&self) -> bool {
    self.verbose
  }

  /// Environment overrides applied to every tool the controller runs.
  pub fn command_env(&self) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    if self.tmpdir_override {
      env.insert(
        "TMPDIR".to_string(),
        self.layout.tmp_dir().to_string_lossy().into_owned(),
      );
    }
    env
  }

  /// `<compose> --profile <profile> -f <descriptor> <args...>`
  pub fn compose<I, S>(&self, args: I) -> CommandRequest
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    CommandRequest::from_argv(self.runtime.compose.iter().cloned())
      .args(["--profile", self.profile.as_str(), "-f"])
      .arg(self.descriptor.path().to_string_lossy())
      .args(args)
      .envs(&self.command_env())
  }

  /// A request for a host tool with the context environment applied.
  pub fn tool(&self, program: impl Into<String>) -> CommandRequest {
    CommandRequest::new(program).envs(&self.command_env())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::util::testutil::ScriptedRunner;
  use tempfile::TempDir;

  fn install(temp: &TempDir) -> ContextOptions {
    std::fs::write(
      temp.path().join("docker-compose.yml"),
      "services:\n  opensearch:\n    image: opensearch\n",
    )
    .unwrap();
    ContextOptions {
      install_dir: Some(temp.path().to_path_buf()),
      ..Default::default()
    }
  }

  #[test]
  fn defaults_come_from_layout_and_process_env() {
    let temp = TempDir::new().unwrap();
    let options = install(&temp);
    std::fs::create_dir_all(temp.path().join("config")).unwrap();
    std::fs::write(
      temp.path().join("config").join("process.env"),
      "MALCOLM_PROFILE=hedgehog\nCONTAINER_RUNTIME=podman\n",
    )
    .unwrap();

    let ctx = ControlContext::new(options).unwrap();
    assert_eq!(ctx.mode(), BackendMode::Compose);
    assert_eq!(ctx.profile(), "hedgehog");
    assert_eq!(ctx.runtime().program, "podman");
    assert!(ctx.runtime().is_podman());
    assert_eq!(ctx.namespace(), "malcolm");
    assert_eq!(ctx.config_dir(), temp.path().join("config"));
  }

  #[test]
  fn explicit_options_win() {
    let temp = TempDir::new().unwrap();
    let mut options = install(&temp);
    options.profile = Some("malcolm".into());
    options.namespace = Some("lab".into());
    let ctx = ControlContext::new(options).unwrap();
    assert_eq!(ctx.profile(), "malcolm");
    assert_eq!(ctx.namespace(), "lab");
  }

  #[test]
  fn tmpdir_override_can_be_disabled() {
    let temp = TempDir::new().unwrap();
    let ctx = ControlContext::new(install(&temp)).unwrap();
    assert_eq!(
      ctx.command_env().get("TMPDIR").map(PathBuf::from),
      Some(temp.path().join(".tmp"))
    );

    let mut options = install(&temp);
    options.no_tmpdir_override = true;
    let ctx = ControlContext::new(options).unwrap();
    assert!(ctx.command_env().is_empty());
  }

  #[test]
  fn compose_command_carries_profile_and_file() {
    let temp = TempDir::new().unwrap();
    let ctx = ControlContext::new(install(&temp)).unwrap();
    let req = ctx.compose(["ps", "-q", "opensearch"]);
    let file = temp.path().join("docker-compose.yml");
    assert_eq!(
      req.argv(),
      [
        "docker",
        "compose",
        "--profile",
        "malcolm",
        "-f",
        file.to_str().unwrap(),
        "ps",
        "-q",
        "opensearch"
      ]
    );
  }

  #[tokio::test]
  async fn load_detects_compose_plugin() {
    let temp = TempDir::new().unwrap();
    let runner = ScriptedRunner::new();
    let ctx = ControlContext::load(install(&temp), &runner).await.unwrap();
    assert_eq!(ctx.runtime().compose, ["docker", "compose"]);
    assert!(temp.path().join(".tmp").is_dir());
    assert_eq!(runner.command_lines()[0], "docker info");
  }

  #[tokio::test]
  async fn load_fails_when_runtime_is_down() {
    let temp = TempDir::new().unwrap();
    let runner = ScriptedRunner::new().respond(&["docker", "info"], 1, &["Cannot connect"]);
    let err = ControlContext::load(install(&temp), &runner).await.unwrap_err();
    assert!(matches!(err, ControlError::CommandFailed { code: 1, .. }));
  }
}
