//! Constants shared across the crate.

pub const APP_NAME: &str = "malcolm";

/// Profile that runs the full stack (including the NetBox services).
pub const PROFILE_MALCOLM: &str = "malcolm";
/// Sensor-only profile.
pub const PROFILE_HEDGEHOG: &str = "hedgehog";

/// Keys read from `process.env`.
pub const CONTAINER_RUNTIME_KEY: &str = "CONTAINER_RUNTIME";
pub const PROFILE_KEY: &str = "MALCOLM_PROFILE";

pub const DEFAULT_NAMESPACE: &str = "malcolm";
pub const DEFAULT_UID: u32 = 1000;
pub const DEFAULT_GID: u32 = 1000;

/// Value of `COMPOSE_HTTP_TIMEOUT` for long-running compose invocations, so
/// compose never times out the TTY while following output.
pub const COMPOSE_HTTP_TIMEOUT: &str = "100000000";

/// Entrypoint bundled in the images that drops to PUID:PGID before exec'ing
/// its arguments.
pub const UID_GID_SETUP_ENTRYPOINT: &str = "/usr/local/bin/docker-uid-gid-setup.sh";
