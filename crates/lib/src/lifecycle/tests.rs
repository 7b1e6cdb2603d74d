//! Start/stop/wipe scenarios against a scripted runtime.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use super::*;
use crate::backend::{ClusterBackend, ComposeBackend};
use crate::context::{ContainerRuntime, ContextOptions};
use crate::descriptor::BackendMode;
use crate::error::ControlError;
use crate::exec::ExecResult;
use crate::util::testutil::{ScriptedRunner, argv_contains};

const COMPOSE: &str = r#"
services:
  opensearch:
    image: ghcr.io/idaholab/malcolm/opensearch:25.01.0
    volumes:
      - ./opensearch:/usr/share/opensearch/config/persist
      - ./opensearch-data:/usr/share/opensearch/data
  suricata:
    image: ghcr.io/idaholab/malcolm/suricata:25.01.0
    volumes:
      - ./suricata-logs:/var/log/suricata
  pcap-monitor:
    image: ghcr.io/idaholab/malcolm/pcap-monitor:25.01.0
    volumes:
      - type: bind
        source: ./pcap
        target: /pcap
  redis:
    image: ghcr.io/idaholab/malcolm/redis:25.01.0
    volumes:
      - redis-data:/data
volumes:
  redis-data: {}
"#;

const KUBECONFIG: &str = "apiVersion: v1\nkind: Config\nclusters: []\ncontexts: []\n";

fn compose_context(temp: &TempDir) -> ControlContext {
  fs::write(temp.path().join("docker-compose.yml"), COMPOSE).unwrap();
  fs::create_dir_all(temp.path().join("opensearch")).unwrap();
  ControlContext::new(ContextOptions {
    install_dir: Some(temp.path().to_path_buf()),
    ..Default::default()
  })
  .unwrap()
  .with_runtime(ContainerRuntime::assumed("docker"))
}

fn cluster_context(temp: &TempDir) -> ControlContext {
  let kubeconfig = temp.path().join("kubeconfig.yaml");
  fs::write(&kubeconfig, KUBECONFIG).unwrap();
  ControlContext::new(ContextOptions {
    install_dir: Some(temp.path().to_path_buf()),
    descriptor: Some(kubeconfig),
    ..Default::default()
  })
  .unwrap()
}

fn write_auth_files(ctx: &ControlContext) {
  for file in ctx.layout().auth_files(ctx.config_dir()) {
    fs::create_dir_all(file.parent().unwrap()).unwrap();
    fs::write(&file, "x").unwrap();
  }
}

/// Runtime double whose ephemeral keystore container creates the keystore.
fn runtime(root: &Path) -> ScriptedRunner {
  let keystore = root.join("opensearch").join("opensearch.keystore");
  ScriptedRunner::new().on(
    |r| argv_contains(r, &["run", "--rm"]),
    move |_| {
      fs::write(&keystore, "ks").unwrap();
      Ok(ExecResult::new(0, vec!["Created opensearch keystore".into()]))
    },
  )
}

#[tokio::test]
async fn start_prepares_install_tree_before_bring_up() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  write_auth_files(&ctx);
  let runner = runtime(temp.path());
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  controller.start(&StartOptions::default()).await.unwrap();

  assert_eq!(controller.state(), LifecycleState::Running);
  let keystore = runner.position(&["run", "--rm"]).unwrap();
  let up = runner.position(&["up", "--detach"]).unwrap();
  assert!(keystore < up);
  assert!(ctx.layout().opensearch_keystore().is_file());

  let root = temp.path();
  assert!(root.join("opensearch-data/nodes").is_dir());
  for dir in ["pcap/arkime-live", "pcap/processed", "pcap/upload", "suricata-logs/live"] {
    assert!(root.join(dir).is_dir(), "{dir}");
  }
  assert!(ctx.layout().htadmin_metadata().is_file());
  assert!(ctx.layout().opensearch_curlrc("secondary").is_file());
  assert!(ctx.layout().zeek_intel_load().is_file());

  let up_request = &runner.requests()[up];
  assert_eq!(
    up_request.env.get("COMPOSE_HTTP_TIMEOUT").map(String::as_str),
    Some("100000000")
  );
}

#[tokio::test]
async fn existing_keystore_is_left_alone() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  write_auth_files(&ctx);
  fs::write(ctx.layout().opensearch_keystore(), "ks").unwrap();
  let runner = runtime(temp.path());
  let backend = ComposeBackend::new(&ctx, &runner);

  LifecycleController::new(&ctx, &backend)
    .start(&StartOptions::default())
    .await
    .unwrap();

  assert!(runner.position(&["run", "--rm"]).is_none());
}

#[tokio::test]
async fn start_without_credentials_never_brings_up() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let runner = runtime(temp.path());
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  let err = controller.start(&StartOptions::default()).await.unwrap_err();

  assert!(matches!(err, ControlError::AuthMissing));
  assert_eq!(controller.state(), LifecycleState::Stopped);
  assert!(runner.position(&["up"]).is_none());
}

#[tokio::test]
async fn starting_named_services_skips_preparation() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let runner = runtime(temp.path());
  let backend = ComposeBackend::new(&ctx, &runner);

  LifecycleController::new(&ctx, &backend)
    .start(&StartOptions {
      services: vec!["suricata".into()],
      interactive: false,
    })
    .await
    .unwrap();

  assert_eq!(runner.requests().len(), 1);
  assert!(runner.position(&["up", "--detach", "--no-deps", "suricata"]).is_some());
  assert!(!ctx.layout().htadmin_metadata().exists());
}

#[tokio::test]
async fn failed_bring_up_reports_exit_code() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  write_auth_files(&ctx);
  let runner = runtime(temp.path()).respond(&["up", "--detach"], 14, &["port is already allocated"]);
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  let err = controller.start(&StartOptions::default()).await.unwrap_err();

  assert_eq!(err.exit_code(), 14);
  assert_eq!(err.output(), ["port is already allocated".to_string()]);
  assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn wipe_clears_data_but_keeps_structure() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let root = temp.path();
  fs::create_dir_all(root.join("suricata-logs/old/empty")).unwrap();
  fs::write(root.join("suricata-logs/eve.json"), "{}").unwrap();
  fs::write(root.join("suricata-logs/.gitignore"), "*").unwrap();
  fs::create_dir_all(root.join("opensearch-data/nodes/0")).unwrap();
  fs::write(root.join("opensearch-data/nodes/0/segment"), "x").unwrap();
  fs::create_dir_all(root.join("pcap/processed")).unwrap();
  fs::write(root.join("pcap/processed/a.pcap"), "x").unwrap();
  fs::write(root.join("pcap/b.pcap"), "x").unwrap();
  let runner = ScriptedRunner::new();
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  let outcome = controller
    .stop(&StopOptions {
      wipe: true,
      ..Default::default()
    })
    .await
    .unwrap();

  assert!(outcome.is_clean());
  assert_eq!(controller.state(), LifecycleState::Stopped);
  assert!(runner.position(&["down", "--volumes"]).is_some());

  assert!(root.join("suricata-logs").is_dir());
  assert!(!root.join("suricata-logs/eve.json").exists());
  assert!(root.join("suricata-logs/.gitignore").is_file());
  assert!(!root.join("suricata-logs/old").exists());
  assert!(root.join("opensearch-data").is_dir());
  assert!(!root.join("opensearch-data/nodes").exists());
  assert!(!root.join("pcap/processed").exists());
  assert!(!root.join("pcap/b.pcap").exists());
  assert!(root.join("pcap").is_dir());
}

#[tokio::test]
async fn plain_stop_keeps_data() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let root = temp.path();
  fs::create_dir_all(root.join("suricata-logs")).unwrap();
  fs::write(root.join("suricata-logs/eve.json"), "{}").unwrap();
  let runner = ScriptedRunner::new();
  let backend = ComposeBackend::new(&ctx, &runner);

  LifecycleController::new(&ctx, &backend)
    .stop(&StopOptions::default())
    .await
    .unwrap();

  assert_eq!(runner.command_lines().len(), 1);
  assert!(runner.position(&["down"]).is_some());
  assert!(runner.position(&["--volumes"]).is_none());
  assert!(root.join("suricata-logs/eve.json").is_file());
}

#[tokio::test]
async fn failed_stop_leaves_state_running() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let runner = ScriptedRunner::new().respond(&["down"], 3, &["daemon unreachable"]);
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  let err = controller.stop(&StopOptions::default()).await.unwrap_err();

  assert_eq!(err.exit_code(), 3);
  assert_eq!(controller.state(), LifecycleState::Running);
}

#[tokio::test]
async fn stopping_named_services_tolerates_rm_failure() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  let runner = ScriptedRunner::new().respond(&["rm", "--force"], 1, &["no such container"]);
  let backend = ComposeBackend::new(&ctx, &runner);

  let outcome = LifecycleController::new(&ctx, &backend)
    .stop(&StopOptions {
      services: vec!["suricata".into()],
      ..Default::default()
    })
    .await
    .unwrap();

  assert_eq!(outcome.warnings.len(), 1);
  assert!(runner.position(&["stop", "suricata"]).unwrap() < runner.position(&["rm", "--force", "suricata"]).unwrap());
}

#[tokio::test]
async fn restart_stops_before_starting() {
  let temp = TempDir::new().unwrap();
  let ctx = compose_context(&temp);
  write_auth_files(&ctx);
  let runner = runtime(temp.path());
  let backend = ComposeBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  controller
    .restart(&StopOptions::default(), &StartOptions::default())
    .await
    .unwrap();

  assert!(runner.position(&["down"]).unwrap() < runner.position(&["up", "--detach"]).unwrap());
  assert_eq!(controller.state(), LifecycleState::Running);
}

#[tokio::test]
async fn cluster_wipe_tears_down_then_refuses() {
  let temp = TempDir::new().unwrap();
  let ctx = cluster_context(&temp);
  assert_eq!(ctx.mode(), BackendMode::Cluster);
  let runner = ScriptedRunner::new();
  let backend = ClusterBackend::new(&ctx, &runner);
  let mut controller = LifecycleController::new(&ctx, &backend);

  let err = controller
    .stop(&StopOptions {
      wipe: true,
      ..Default::default()
    })
    .await
    .unwrap_err();

  assert!(matches!(
    err,
    ControlError::UnsupportedInMode {
      mode: BackendMode::Cluster,
      ..
    }
  ));
  assert!(runner.position(&["delete", "namespace", "malcolm"]).is_some());
  assert_eq!(controller.state(), LifecycleState::Stopped);
}

#[tokio::test]
async fn cluster_start_skips_host_directories() {
  let temp = TempDir::new().unwrap();
  let ctx = cluster_context(&temp);
  write_auth_files(&ctx);
  fs::create_dir_all(ctx.layout().opensearch_keystore().parent().unwrap()).unwrap();
  fs::write(ctx.layout().opensearch_keystore(), "ks").unwrap();
  let kubernetes = ctx.layout().kubernetes_dir();
  fs::create_dir_all(&kubernetes).unwrap();
  let claims: String = crate::backend::storage::REQUIRED_VOLUME_OBJECTS
    .iter()
    .map(|(name, kind)| format!("---\napiVersion: v1\nkind: {kind}\nmetadata:\n  name: {name}\n"))
    .collect();
  fs::write(kubernetes.join("01-volumes.yml"), claims).unwrap();
  let runner = ScriptedRunner::new();
  let backend = ClusterBackend::new(&ctx, &runner);

  LifecycleController::new(&ctx, &backend)
    .start(&StartOptions::default())
    .await
    .unwrap();

  assert!(runner.position(&["apply", "-f", "-"]).is_some());
  assert!(!temp.path().join("pcap").exists());
}
