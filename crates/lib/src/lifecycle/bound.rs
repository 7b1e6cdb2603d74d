//! Host directories behind container bind mounts that start prepares and
//! wipe clears.

/// A container path whose host-side directory the controller manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundPath {
  pub service: &'static str,
  pub container_path: &'static str,
  /// Wipe deletes every file under the directory (directories are kept).
  pub delete_files: bool,
  /// Subdirectories created at start and removed wholesale at wipe.
  pub relative_dirs: &'static [&'static str],
  /// Subdirectories pruned of empty directories at wipe (the subdirectory
  /// itself is kept).
  pub clean_empty_dirs: &'static [&'static str],
}

const fn bound(
  service: &'static str,
  container_path: &'static str,
  delete_files: bool,
  relative_dirs: &'static [&'static str],
  clean_empty_dirs: &'static [&'static str],
) -> BoundPath {
  BoundPath {
    service,
    container_path,
    delete_files,
    relative_dirs,
    clean_empty_dirs,
  }
}

/// Directories that must exist before the compose stack starts.
pub const CREATE_PATHS: &[BoundPath] = &[
  bound("file-monitor", "/zeek/logs", false, &[], &[]),
  bound("nginx-proxy", "/var/local/ca-trust", false, &[], &[]),
  bound("netbox", "/opt/netbox/netbox/media", false, &[], &[]),
  bound("netbox-postgres", "/var/lib/postgresql/data", false, &[], &[]),
  bound("redis", "/data", false, &[], &[]),
  bound("opensearch", "/usr/share/opensearch/data", false, &["nodes"], &[]),
  bound("opensearch", "/opt/opensearch/backup", false, &[], &[]),
  bound("pcap-monitor", "/pcap", false, &["arkime-live", "processed", "upload"], &[]),
  bound("suricata", "/var/log/suricata", false, &["live"], &[]),
  bound(
    "upload",
    "/var/www/upload/server/php/chroot/files",
    false,
    &["tmp/spool", "variants"],
    &[],
  ),
  bound("zeek", "/zeek/extract_files", false, &[], &[]),
  bound("zeek", "/zeek/upload", false, &[], &[]),
  bound("zeek", "/opt/zeek/share/zeek/site/custom", false, &[], &[]),
  bound("zeek", "/opt/zeek/share/zeek/site/intel", false, &["Mandiant", "MISP", "STIX"], &[]),
  bound("zeek-live", "/zeek/live", false, &["spool"], &[]),
  bound(
    "filebeat",
    "/zeek",
    false,
    &["processed", "current", "live", "extract_files", "upload"],
    &[],
  ),
];

/// Directories whose data a wipe removes. Entries overlap; the order keeps
/// file deletion ahead of pruning.
pub const WIPE_PATHS: &[BoundPath] = &[
  bound("filebeat", "/zeek", true, &[], &[]),
  bound("file-monitor", "/zeek/logs", true, &[], &[]),
  bound("netbox", "/opt/netbox/netbox/media", true, &[], &["."]),
  bound("netbox-postgres", "/var/lib/postgresql/data", true, &[], &["."]),
  bound("redis", "/data", true, &[], &["."]),
  bound("opensearch", "/usr/share/opensearch/data", true, &["nodes"], &[]),
  bound("pcap-monitor", "/pcap", true, &["arkime-live", "processed", "upload"], &[]),
  bound("suricata", "/var/log/suricata", true, &[], &["."]),
  bound(
    "upload",
    "/var/www/upload/server/php/chroot/files",
    true,
    &["tmp/spool", "variants"],
    &[],
  ),
  bound("zeek", "/zeek/extract_files", true, &[], &[]),
  bound("zeek", "/zeek/upload", true, &[], &[]),
  bound("zeek-live", "/zeek/live", true, &["spool"], &[]),
  bound("filebeat", "/zeek", false, &[], &["processed", "current", "live"]),
];
