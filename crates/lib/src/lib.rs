//! malctl-lib: lifecycle control for a Malcolm deployment
//!
//! One operation vocabulary over two backends:
//! - `descriptor`: decides whether the deployment file is a compose file or a kubeconfig
//! - `backend`: `ComposeBackend` and `ClusterBackend` behind the `Backend` trait
//! - `lifecycle`: start/stop/wipe/restart with on-disk preparation and cleanup
//! - `keystore`, `auth`: service keystores, credentials and certificates
//! - `backup`: NetBox database backup and restore
//! - `logs`: log following with ready detection

pub mod auth;
pub mod backend;
pub mod backup;
pub mod consts;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod exec;
pub mod keystore;
pub mod lifecycle;
pub mod logs;
pub mod platform;
pub mod util;
