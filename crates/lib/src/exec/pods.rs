//! Cluster fan-out: run one command in every pod backing a service.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use super::{CommandRequest, CommandRunner, ExecResult};
use crate::error::{ControlError, Result};

/// Builds `kubectl` invocations bound to one kubeconfig and namespace.
#[derive(Debug, Clone)]
pub struct Kubectl {
  program: String,
  kubeconfig: PathBuf,
  namespace: String,
  env: BTreeMap<String, String>,
}

impl Kubectl {
  pub fn new(kubeconfig: impl Into<PathBuf>, namespace: impl Into<String>, env: BTreeMap<String, String>) -> Self {
    Self {
      program: "kubectl".to_string(),
      kubeconfig: kubeconfig.into(),
      namespace: namespace.into(),
      env,
    }
  }

  pub fn namespace(&self) -> &str {
    &self.namespace
  }

  pub fn kubeconfig(&self) -> &Path {
    &self.kubeconfig
  }

  /// `kubectl --kubeconfig <file> <args...>`
  pub fn command<I, S>(&self, args: I) -> CommandRequest
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    CommandRequest::new(&self.program)
      .arg("--kubeconfig")
      .arg(self.kubeconfig.to_string_lossy())
      .args(args)
      .envs(&self.env)
  }

  /// Same as [`Kubectl::command`] with `-n <namespace>` appended.
  pub fn namespaced<I, S>(&self, args: I) -> CommandRequest
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.command(args).arg("-n").arg(&self.namespace)
  }
}

/// Which pods a fan-out targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodTarget {
  pub service: String,
  pub container: Option<String>,
  pub max_pods: Option<usize>,
}

impl PodTarget {
  pub fn service(service: impl Into<String>) -> Self {
    Self {
      service: service.into(),
      container: None,
      max_pods: None,
    }
  }

  pub fn container(mut self, container: impl Into<String>) -> Self {
    self.container = Some(container.into());
    self
  }

  pub fn max_pods(mut self, max: usize) -> Self {
    self.max_pods = Some(max);
    self
  }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ObjectList<T> {
  #[serde(default = "Vec::new")]
  pub items: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ObjectMeta {
  #[serde(default)]
  pub name: String,
  #[serde(default)]
  pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct Pod {
  #[serde(default)]
  metadata: ObjectMeta,
  #[serde(default)]
  status: PodStatus,
}

#[derive(Debug, Default, Deserialize)]
struct PodStatus {
  #[serde(default)]
  phase: Option<String>,
}

/// Whether `pod` belongs to `service`.
///
/// Pods are named after their workload plus generated suffixes:
/// `<svc>-<ordinal>` for stateful sets, `<svc>[-deployment]-<hash>-<id>` for
/// deployments, where the template hash is up to 10 characters and the id is
/// exactly 5. Plain prefix matching would let `netbox` claim
/// `netbox-postgres-...`, so only those shapes count.
pub fn pod_matches(service: &str, pod: &str) -> bool {
  if pod == service {
    return true;
  }
  let Some(rest) = pod.strip_prefix(service).and_then(|r| r.strip_prefix('-')) else {
    return false;
  };
  if !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit()) {
    return true;
  }
  let rest = rest.strip_prefix("deployment-").unwrap_or(rest);
  match rest.split_once('-') {
    Some((hash, id)) => is_generated(hash, 1..=10) && is_generated(id, 5..=5),
    None => false,
  }
}

fn is_generated(segment: &str, len: RangeInclusive<usize>) -> bool {
  len.contains(&segment.len()) && segment.bytes().all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Executes commands across the pods of a service and aggregates results.
pub struct PodExec<'a> {
  runner: &'a dyn CommandRunner,
  kubectl: &'a Kubectl,
}

impl<'a> PodExec<'a> {
  pub fn new(runner: &'a dyn CommandRunner, kubectl: &'a Kubectl) -> Self {
    Self { runner, kubectl }
  }

  /// Names of live pods in the namespace backing `target`, in listing order.
  pub async fn pods(&self, target: &PodTarget) -> Result<Vec<String>> {
    let request = self.kubectl.namespaced(["get", "pods", "-o", "json"]).stdout_only();
    let listing = self.runner.run(&request).await?.check("failed to list pods")?;
    let list: ObjectList<Pod> =
      serde_json::from_str(&listing.output_lines.join("\n")).map_err(|source| ControlError::Json {
        command: request.display(),
        source,
      })?;

    let mut names: Vec<String> = list
      .items
      .into_iter()
      .filter(|pod| !matches!(pod.status.phase.as_deref(), Some("Succeeded" | "Failed")))
      .map(|pod| pod.metadata.name)
      .filter(|name| pod_matches(&target.service, name))
      .collect();
    if let Some(max) = target.max_pods {
      names.truncate(max);
    }
    Ok(names)
  }

  /// Runs `command` (program, args, stdin and capture flags) in every
  /// matching pod, one after another.
  pub async fn exec(&self, target: &PodTarget, command: &CommandRequest) -> Result<ExecResult> {
    let pods = self.pods(target).await?;
    if pods.is_empty() {
      return Err(ControlError::NoMatchingPods {
        service: target.service.clone(),
        namespace: self.kubectl.namespace().to_string(),
      });
    }

    let mut results = Vec::with_capacity(pods.len());
    for pod in &pods {
      let mut args: Vec<String> = vec!["exec".to_string()];
      if command.stdin.is_some() {
        args.push("-i".to_string());
      }
      args.extend(["-n".to_string(), self.kubectl.namespace().to_string(), pod.clone()]);
      if let Some(container) = &target.container {
        args.extend(["-c".to_string(), container.clone()]);
      }
      args.push("--".to_string());
      args.extend(command.argv().into_iter().map(str::to_string));

      let mut request = self.kubectl.command(args);
      request.stdin = command.stdin.clone();
      request.capture_stdout = command.capture_stdout;
      request.capture_stderr = command.capture_stderr;
      request.timeout = command.timeout;

      let result = self.runner.run(&request).await?;
      debug!(pod, exit_code = result.exit_code, "pod exec finished");
      results.push(result);
    }

    Ok(ExecResult::aggregate(results))
  }
}
