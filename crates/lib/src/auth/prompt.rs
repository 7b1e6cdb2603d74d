//! Operator interaction seam for the provisioner.
//!
//! The terminal implementation lives in the CLI; [`NonInteractive`] accepts
//! every default without asking.

use tracing::info;

use crate::error::{ControlError, Result};

/// Upper bound on re-asking for a value that fails validation.
pub const MAX_ATTEMPTS: usize = 100;

pub trait Prompter: Send + Sync {
  fn yes_no(&self, question: &str, default: bool) -> Result<bool>;

  /// Free-form answer; an empty reply takes `default` when there is one.
  fn ask(&self, question: &str, default: Option<&str>) -> Result<String>;

  /// Answer read without echo.
  fn ask_password(&self, question: &str) -> Result<String>;

  /// Index into `choices` (`(name, description)` pairs).
  fn choose(&self, title: &str, choices: &[(&str, &str)]) -> Result<usize>;

  fn message(&self, text: &str);
}

/// Takes every default, never reads input.
#[derive(Debug, Clone, Copy, Default)]
pub struct NonInteractive;

impl Prompter for NonInteractive {
  fn yes_no(&self, _question: &str, default: bool) -> Result<bool> {
    Ok(default)
  }

  fn ask(&self, question: &str, default: Option<&str>) -> Result<String> {
    default
      .map(str::to_string)
      .ok_or_else(|| ControlError::Auth(format!("no value supplied for \"{question}\"")))
  }

  fn ask_password(&self, _question: &str) -> Result<String> {
    Ok(String::new())
  }

  fn choose(&self, _title: &str, _choices: &[(&str, &str)]) -> Result<usize> {
    Ok(0)
  }

  fn message(&self, text: &str) {
    info!("{text}");
  }
}

/// Calls `attempt` until it yields a value, giving up after
/// [`MAX_ATTEMPTS`] tries.
pub fn retry<T>(what: &str, mut attempt: impl FnMut() -> Result<Option<T>>) -> Result<T> {
  for _ in 0..MAX_ATTEMPTS {
    if let Some(value) = attempt()? {
      return Ok(value);
    }
  }
  Err(ControlError::Auth(format!("invalid {what}")))
}

#[cfg(test)]
pub(crate) mod scripted {
  use std::collections::VecDeque;
  use std::sync::Mutex;

  use super::*;

  /// Replays queued answers in order. Yes/no questions take their default
  /// once the queue is empty; other questions fail.
  #[derive(Default)]
  pub struct QueuedPrompter {
    answers: Mutex<VecDeque<String>>,
    pub messages: Mutex<Vec<String>>,
  }

  impl QueuedPrompter {
    pub fn new(answers: &[&str]) -> Self {
      Self {
        answers: Mutex::new(answers.iter().map(|a| a.to_string()).collect()),
        messages: Mutex::default(),
      }
    }

    fn next(&self) -> Option<String> {
      self.answers.lock().unwrap().pop_front()
    }

    pub fn remaining(&self) -> usize {
      self.answers.lock().unwrap().len()
    }
  }

  impl Prompter for QueuedPrompter {
    fn yes_no(&self, _question: &str, default: bool) -> Result<bool> {
      Ok(match self.next().as_deref() {
        Some("y") => true,
        Some("n") => false,
        _ => default,
      })
    }

    fn ask(&self, question: &str, default: Option<&str>) -> Result<String> {
      match self.next() {
        Some(answer) if answer.is_empty() => NonInteractive.ask(question, default),
        Some(answer) => Ok(answer),
        None => Err(ControlError::Auth(format!("unexpected question: {question}"))),
      }
    }

    fn ask_password(&self, question: &str) -> Result<String> {
      self
        .next()
        .ok_or_else(|| ControlError::Auth(format!("unexpected question: {question}")))
    }

    fn choose(&self, _title: &str, _choices: &[(&str, &str)]) -> Result<usize> {
      Ok(self.next().and_then(|a| a.parse().ok()).unwrap_or(0))
    }

    fn message(&self, text: &str) {
      self.messages.lock().unwrap().push(text.to_string());
    }
  }
}
