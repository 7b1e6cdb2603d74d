//! CLI output formatting utilities.
//!
//! Colored status messages on a terminal, plain text otherwise.

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

const RULE_WIDTH: usize = 78;

pub fn access_url(host: &str) -> String {
  format!("https://{host}/")
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_access_banner(host: &str) {
  println!();
  println!(
    "{} Malcolm services can be accessed at {}",
    symbols::ARROW.if_supports_color(Stream::Stdout, |s| s.cyan()),
    access_url(host).if_supports_color(Stream::Stdout, |s| s.bold())
  );
  println!("{}", "-".repeat(RULE_WIDTH));
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn access_url_wraps_host() {
    assert_eq!(access_url("192.168.10.5"), "https://192.168.10.5/");
    assert_eq!(access_url("malcolm.example.org"), "https://malcolm.example.org/");
  }
}
