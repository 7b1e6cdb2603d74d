use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::storage;
use super::{Backend, ExecTarget, LogsOptions, LogsPlan, StopOptions, StopOutcome};
use crate::context::ControlContext;
use crate::descriptor::BackendMode;
use crate::error::{ControlError, Result};
use crate::exec::pods::{Kubectl, ObjectList, ObjectMeta, PodExec, PodTarget};
use crate::exec::{CommandRequest, CommandRunner, ExecResult};
use crate::keystore::{self, KeystoreRequest};
use crate::platform::find_in_path;

/// Kubernetes backend driving `kubectl` against the descriptor kubeconfig.
pub struct ClusterBackend<'a> {
  ctx: &'a ControlContext,
  runner: &'a dyn CommandRunner,
  kubectl: Kubectl,
}

#[derive(Debug, Deserialize)]
struct Node {
  #[serde(default)]
  metadata: ObjectMeta,
  #[serde(default)]
  status: NodeStatus,
}

#[derive(Debug, Default, Deserialize)]
struct NodeStatus {
  #[serde(default)]
  addresses: Vec<NodeAddress>,
}

#[derive(Debug, Deserialize)]
struct NodeAddress {
  #[serde(rename = "type")]
  kind: String,
  address: String,
}

#[derive(Debug, Deserialize)]
struct PersistentVolume {
  #[serde(default)]
  metadata: ObjectMeta,
  #[serde(default)]
  spec: PersistentVolumeSpec,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistentVolumeSpec {
  #[serde(default)]
  persistent_volume_reclaim_policy: Option<String>,
  #[serde(default)]
  claim_ref: Option<ClaimRef>,
}

#[derive(Debug, Deserialize)]
struct ClaimRef {
  #[serde(default)]
  namespace: Option<String>,
}

const CONTROL_PLANE_LABELS: &[&str] = &["node-role.kubernetes.io/control-plane", "node-role.kubernetes.io/master"];

#[derive(Debug, Default)]
struct Addresses {
  external: Vec<String>,
  hostname: Vec<String>,
  internal: Vec<String>,
}

fn addresses<'n>(nodes: impl Iterator<Item = &'n Node>) -> Addresses {
  let mut out = Addresses::default();
  for node in nodes {
    for addr in &node.status.addresses {
      match addr.kind.as_str() {
        "ExternalIP" => out.external.push(addr.address.clone()),
        "Hostname" => out.hostname.push(addr.address.clone()),
        "InternalIP" => out.internal.push(addr.address.clone()),
        _ => {}
      }
    }
  }
  out
}

/// External IP, else hostname, else internal IP, looking at control-plane
/// nodes first and falling back to every node.
fn pick_access_host(nodes: &[Node]) -> String {
  let is_control_plane = |n: &&Node| CONTROL_PLANE_LABELS.iter().any(|l| n.metadata.labels.contains_key(*l));
  let mut addrs = addresses(nodes.iter().filter(is_control_plane));
  if addrs.external.is_empty() && addrs.hostname.is_empty() {
    addrs = addresses(nodes.iter());
  }
  addrs
    .external
    .into_iter()
    .chain(addrs.hostname)
    .chain(addrs.internal)
    .next()
    .unwrap_or_else(|| "<cluster IP>".to_string())
}

impl<'a> ClusterBackend<'a> {
  pub fn new(ctx: &'a ControlContext, runner: &'a dyn CommandRunner) -> Self {
    let kubectl = Kubectl::new(ctx.descriptor().path(), ctx.namespace(), ctx.command_env());
    Self { ctx, runner, kubectl }
  }

  fn pods(&self) -> PodExec<'_> {
    PodExec::new(self.runner, &self.kubectl)
  }

  async fn get_json<T: for<'de> Deserialize<'de>>(&self, request: CommandRequest, context: &str) -> Result<T> {
    let request = request.stdout_only();
    let result = self.runner.run(&request).await?.check(context)?;
    serde_json::from_str(&result.output_lines.join("\n")).map_err(|source| ControlError::Json {
      command: request.display(),
      source,
    })
  }

  async fn apply_stdin(&self, manifest: String, context: &str) -> Result<()> {
    let request = self.kubectl.namespaced(["apply", "-f", "-"]).stdin(manifest);
    self.runner.run(&request).await?.check(context)?;
    Ok(())
  }

  /// Deletes Retain-policy volumes whose claims came from the namespace.
  async fn reclaim_volumes(&self, outcome: &mut StopOutcome) {
    let listing: Result<ObjectList<PersistentVolume>> = self
      .get_json(self.kubectl.command(["get", "pv", "-o", "json"]), "failed to list persistent volumes")
      .await;
    let volumes = match listing {
      Ok(list) => list.items,
      Err(e) => {
        outcome.warnings.push(e.to_string());
        return;
      }
    };

    for volume in volumes {
      let retained = volume.spec.persistent_volume_reclaim_policy.as_deref() == Some("Retain");
      let claimed_here = volume
        .spec
        .claim_ref
        .as_ref()
        .and_then(|c| c.namespace.as_deref())
        == Some(self.kubectl.namespace());
      if !(retained && claimed_here) {
        continue;
      }
      let name = volume.metadata.name;
      match self
        .runner
        .run(&self.kubectl.command(["delete", "pv", name.as_str()]))
        .await
      {
        Ok(result) if result.success() => debug!(volume = %name, "deleted persistent volume"),
        Ok(result) => outcome.warnings.push(format!(
          "failed to delete persistent volume {name}: {}",
          result.output_lines.join(" ")
        )),
        Err(e) => outcome.warnings.push(format!("failed to delete persistent volume {name}: {e}")),
      }
    }
  }
}

#[async_trait]
impl Backend for ClusterBackend<'_> {
  fn mode(&self) -> BackendMode {
    BackendMode::Cluster
  }

  fn resolve_bind_path(&self, _service: &str, _container_path: &str) -> Result<Option<PathBuf>> {
    Err(ControlError::unsupported_in_mode("bind path resolution", BackendMode::Cluster))
  }

  async fn exec(&self, target: &ExecTarget, command: &CommandRequest) -> Result<ExecResult> {
    let pod_target = PodTarget {
      service: target.service.clone(),
      container: target.container.clone(),
      max_pods: target.max_pods,
    };
    self.pods().exec(&pod_target, command).await
  }

  async fn bring_up(&self, services: &[String]) -> Result<()> {
    if !services.is_empty() {
      debug!(?services, "service selection ignored for cluster start");
    }
    let manifests = self.ctx.layout().kubernetes_dir();
    storage::check_storage(&manifests)?;

    self
      .apply_stdin(
        storage::namespace_manifest(self.kubectl.namespace()),
        "failed to create namespace",
      )
      .await?;
    let env_objects = storage::env_manifests(self.ctx.config_dir(), self.kubectl.namespace())?;
    if !env_objects.is_empty() {
      self
        .apply_stdin(env_objects, "failed to create configuration objects")
        .await?;
    }

    let mut args = vec!["apply".to_string()];
    for file in storage::manifest_files(&manifests)? {
      args.extend(["-f".to_string(), file.to_string_lossy().into_owned()]);
    }
    self
      .runner
      .run(&self.kubectl.namespaced(args))
      .await?
      .check("failed to apply manifests")?;
    info!(namespace = self.kubectl.namespace(), "cluster resources applied");
    Ok(())
  }

  async fn tear_down(&self, options: &StopOptions) -> Result<StopOutcome> {
    let mut outcome = StopOutcome::default();
    let namespace = self.kubectl.namespace();
    let result = self
      .runner
      .run(&self.kubectl.command(["delete", "namespace", namespace, "--ignore-not-found"]))
      .await?;
    if result.success() {
      info!(namespace, "namespace deleted");
    } else {
      outcome.warnings.push(format!(
        "failed to delete namespace {namespace}: {}",
        result.output_lines.join(" ")
      ));
    }
    if options.reclaim_volumes {
      self.reclaim_volumes(&mut outcome).await;
    }
    Ok(outcome)
  }

  async fn status(&self, _services: &[String]) -> Result<Vec<String>> {
    let mut lines = Vec::new();
    match self.runner.run(&self.kubectl.command(["get", "nodes", "-o", "wide"])).await {
      Ok(nodes) if nodes.success() => {
        lines.extend(nodes.output_lines);
        lines.push(String::new());
      }
      Ok(nodes) => debug!(output = ?nodes.output_lines, "node status unavailable"),
      Err(e) => debug!(error = %e, "node status unavailable"),
    }
    let pods = self
      .runner
      .run(&self.kubectl.namespaced(["get", "pods", "-o", "wide"]))
      .await?
      .check(format!("failed to get {} status", self.kubectl.namespace()))?;
    lines.extend(pods.output_lines);
    Ok(lines)
  }

  async fn access_host(&self) -> Result<String> {
    let nodes: ObjectList<Node> = self
      .get_json(self.kubectl.command(["get", "nodes", "-o", "json"]), "failed to list nodes")
      .await?;
    Ok(pick_access_host(&nodes.items))
  }

  fn logs_plan(&self, options: &LogsOptions) -> Result<LogsPlan> {
    let stern = find_in_path("stern").ok_or_else(|| ControlError::MissingTool {
      tool: "stern (https://github.com/stern/stern/releases/latest)".to_string(),
      operation: "following logs with the kubernetes backend".to_string(),
    })?;
    let template = if self.ctx.verbose() {
      r#"{{.Namespace}}/{{color .PodColor .PodName}}/{{color .ContainerColor .ContainerName}} | {{.Message}}{{"\n"}}"#
    } else {
      r#"{{color .ContainerColor .ContainerName}} | {{.Message}}{{"\n"}}"#
    };
    let query = match options.services.as_slice() {
      [] => ".*".to_string(),
      [one] => one.clone(),
      many => format!("({})", many.join("|")),
    };
    let follow = self
      .ctx
      .tool(stern.to_string_lossy())
      .arg("--kubeconfig")
      .arg(self.kubectl.kubeconfig().to_string_lossy())
      .args(["--only-log-lines", "--color", if options.color { "auto" } else { "never" }])
      .args(["--template", template])
      .arg("--tail")
      .arg(options.lines.map_or_else(|| "-1".to_string(), |n| n.to_string()))
      .args(["--namespace", self.kubectl.namespace()])
      .arg(query);
    Ok(LogsPlan { preamble: None, follow })
  }

  fn keystore_file(&self, _service: &str) -> Result<Option<PathBuf>> {
    Ok(None)
  }

  async fn keystore_exec(&self, request: &KeystoreRequest) -> Result<ExecResult> {
    let mut command = CommandRequest::new(keystore::keystore_bin(&request.service))
      .args(request.arguments.iter().cloned())
      .envs(&request.env);
    command.stdin = request.stdin.clone();
    let result = self
      .pods()
      .exec(&PodTarget::service(&request.service), &command)
      .await?;
    if !result.success() {
      warn!(service = %request.service, exit_code = result.exit_code, "keystore command failed in at least one pod");
    }
    Ok(result)
  }
}
