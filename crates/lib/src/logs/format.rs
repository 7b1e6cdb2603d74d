//! Per-line cleanup applied to streamed service logs before display.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

const MASK: &str = "********";

static ANSI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]").unwrap());

/// `password=...`, `"secret": "..."`, `token: ...` and friends.
static SECRET_FIELD_RE: LazyLock<Regex> = LazyLock::new(|| {
  Regex::new(r#"(?i)((?:password|passwd|secret|token|api[_-]?key)["']?\s*[:=]\s*["']?)([^\s"',&;]+)"#).unwrap()
});

/// Credentials embedded in a URL authority.
static URL_CREDENTIALS_RE: LazyLock<Regex> =
  LazyLock::new(|| Regex::new(r"(://[^:/@\s]+:)[^@\s/]+@").unwrap());

pub fn strip_ansi(line: &str) -> Cow<'_, str> {
  ANSI_RE.replace_all(line, "")
}

/// Masks secret-looking values. Key names and surrounding punctuation are
/// kept so the line stays readable.
pub fn redact(line: &str) -> Cow<'_, str> {
  let masked = SECRET_FIELD_RE.replace_all(line, |caps: &regex::Captures| format!("{}{MASK}", &caps[1]));
  if !URL_CREDENTIALS_RE.is_match(&masked) {
    return masked;
  }
  let replaced = URL_CREDENTIALS_RE
    .replace_all(&masked, |caps: &regex::Captures| format!("{}{MASK}@", &caps[1]))
    .into_owned();
  Cow::Owned(replaced)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LineFormatter {
  color: bool,
}

impl LineFormatter {
  pub fn new(color: bool) -> Self {
    Self { color }
  }

  /// The display form of a raw log line, or `None` for lines with no
  /// visible content.
  pub fn format(&self, raw: &str) -> Option<String> {
    let raw = raw.trim_end_matches(['\r', '\n']);
    if strip_ansi(raw).trim().is_empty() {
      return None;
    }
    let shown = if self.color { Cow::Borrowed(raw) } else { strip_ansi(raw) };
    Some(redact(&shown).into_owned())
  }
}
