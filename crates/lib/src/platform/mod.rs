//! Host platform helpers: privilege detection, executable lookup and the
//! address the stack is reachable at.

pub mod paths;

use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::path::{Path, PathBuf};

/// Returns true when running with an effective UID of 0.
#[cfg(unix)]
pub fn is_elevated() -> bool {
  nix::unistd::geteuid().is_root() || nix::unistd::getuid().is_root()
}

#[cfg(not(unix))]
pub fn is_elevated() -> bool {
  false
}

/// Searches `PATH` for an executable named `name`.
///
/// Names containing a path separator are checked as-is.
pub fn find_in_path(name: &str) -> Option<PathBuf> {
  let candidate = Path::new(name);
  if candidate.components().count() > 1 {
    return is_executable(candidate).then(|| candidate.to_path_buf());
  }

  let path_var = std::env::var_os("PATH")?;
  std::env::split_paths(&path_var)
    .map(|dir| dir.join(name))
    .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
  use std::os::unix::fs::PermissionsExt;

  path
    .metadata()
    .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
    .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
  path.is_file()
}

/// Primary IPv4 address of this host: the source address the kernel would
/// pick to reach a public address. No packets are sent.
pub fn primary_ip() -> IpAddr {
  UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
    .and_then(|socket| {
      socket.connect((Ipv4Addr::new(10, 254, 254, 254), 1))?;
      socket.local_addr()
    })
    .map(|addr| addr.ip())
    .unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  #[cfg(unix)]
  fn find_in_path_locates_sh() {
    let sh = find_in_path("sh").expect("sh should be on PATH");
    assert!(sh.ends_with("sh"));
  }

  #[test]
  fn find_in_path_missing_binary() {
    assert!(find_in_path("definitely-not-a-real-binary-3f9a").is_none());
  }

  #[test]
  #[cfg(unix)]
  fn find_in_path_accepts_absolute_paths() {
    assert_eq!(find_in_path("/bin/sh"), Some(PathBuf::from("/bin/sh")));
  }
}
