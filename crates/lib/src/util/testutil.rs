//! Test helpers for malctl-lib.
//!
//! [`ScriptedRunner`] stands in for real subprocesses: rules are matched in
//! order against each request and every request is recorded so tests can
//! assert on the exact commands issued.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::Result;
use crate::exec::{CommandRequest, CommandRunner, ExecResult};

/// Returns the shell command and args to execute a shell script.
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

type Matcher = Box<dyn Fn(&CommandRequest) -> bool + Send + Sync>;
type Responder = Box<dyn Fn(&CommandRequest) -> Result<ExecResult> + Send + Sync>;

struct Rule {
  matcher: Matcher,
  responder: Responder,
}

#[derive(Default)]
pub struct ScriptedRunner {
  rules: Vec<Rule>,
  requests: Mutex<Vec<CommandRequest>>,
}

/// True when `needle` appears as a contiguous run within the request argv.
pub fn argv_contains(request: &CommandRequest, needle: &[&str]) -> bool {
  let argv = request.argv();
  needle.is_empty() || argv.windows(needle.len()).any(|w| w == needle)
}

impl ScriptedRunner {
  pub fn new() -> Self {
    Self::default()
  }

  /// Adds a rule with an arbitrary matcher and responder.
  pub fn on<M, R>(mut self, matcher: M, responder: R) -> Self
  where
    M: Fn(&CommandRequest) -> bool + Send + Sync + 'static,
    R: Fn(&CommandRequest) -> Result<ExecResult> + Send + Sync + 'static,
  {
    self.rules.push(Rule {
      matcher: Box::new(matcher),
      responder: Box::new(responder),
    });
    self
  }

  /// Answers requests whose argv contains `needle` with a fixed result.
  pub fn respond(self, needle: &[&str], exit_code: i32, lines: &[&str]) -> Self {
    let needle: Vec<String> = needle.iter().map(|s| s.to_string()).collect();
    let lines: Vec<String> = lines.iter().map(|s| s.to_string()).collect();
    self.on(
      move |req| argv_contains(req, &needle.iter().map(String::as_str).collect::<Vec<_>>()),
      move |_| Ok(ExecResult::new(exit_code, lines.clone())),
    )
  }

  pub fn requests(&self) -> Vec<CommandRequest> {
    self.requests.lock().unwrap().clone()
  }

  /// Recorded requests rendered as command lines.
  pub fn command_lines(&self) -> Vec<String> {
    self.requests().iter().map(CommandRequest::display).collect()
  }

  /// Index of the first recorded request containing `needle`.
  pub fn position(&self, needle: &[&str]) -> Option<usize> {
    self.requests().iter().position(|r| argv_contains(r, needle))
  }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
  async fn run(&self, request: &CommandRequest) -> Result<ExecResult> {
    self.requests.lock().unwrap().push(request.clone());
    for rule in &self.rules {
      if (rule.matcher)(request) {
        return (rule.responder)(request);
      }
    }
    Ok(ExecResult::default())
  }
}
