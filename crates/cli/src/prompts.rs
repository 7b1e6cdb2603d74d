use anyhow::{Result, bail};
use std::io::{self, BufRead, IsTerminal, Write};

use malctl_lib::auth::Prompter;
use malctl_lib::error::{ControlError, Result as ControlResult};

pub fn confirm(message: &str, force: bool) -> Result<bool> {
  if force {
    return Ok(true);
  }

  if !io::stdin().is_terminal() || !io::stderr().is_terminal() {
    bail!("Cannot prompt for confirmation in non-interactive mode. Use --force to proceed.");
  }

  write!(io::stderr(), "{} [y/N] ", message)?;
  io::stderr().flush()?;

  let mut input = String::new();
  io::stdin().read_line(&mut input)?;

  Ok(parse_yes_no(&input, false))
}

fn parse_yes_no(input: &str, default: bool) -> bool {
  match input.trim().to_ascii_lowercase().as_str() {
    "y" | "yes" => true,
    "n" | "no" => false,
    _ => default,
  }
}

fn stdin_error(e: io::Error) -> ControlError {
  ControlError::io("<stdin>", e)
}

/// Reads one line from stdin after writing `question` to stderr. End of
/// input is an error so validation loops cannot spin on a closed stdin.
fn read_answer(question: &str) -> ControlResult<String> {
  let mut stderr = io::stderr();
  write!(stderr, "{question}").and_then(|()| stderr.flush()).map_err(stdin_error)?;
  let mut line = String::new();
  let read = io::stdin().lock().read_line(&mut line).map_err(stdin_error)?;
  if read == 0 {
    return Err(ControlError::Auth("no more input available".to_string()));
  }
  Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

/// Terminal echo switched off for the lifetime of the guard.
#[cfg(unix)]
struct EchoOff {
  saved: Option<nix::sys::termios::Termios>,
}

#[cfg(unix)]
impl EchoOff {
  fn new() -> Self {
    use nix::sys::termios::{LocalFlags, SetArg, tcgetattr, tcsetattr};

    let stdin = io::stdin();
    let Ok(saved) = tcgetattr(&stdin) else {
      return Self { saved: None };
    };
    let mut quiet = saved.clone();
    quiet.local_flags.remove(LocalFlags::ECHO);
    match tcsetattr(&stdin, SetArg::TCSANOW, &quiet) {
      Ok(()) => Self { saved: Some(saved) },
      Err(_) => Self { saved: None },
    }
  }
}

#[cfg(unix)]
impl Drop for EchoOff {
  fn drop(&mut self) {
    if let Some(saved) = &self.saved {
      let _ = nix::sys::termios::tcsetattr(io::stdin(), nix::sys::termios::SetArg::TCSANOW, saved);
    }
  }
}

/// Interactive prompts on stdin/stderr.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompter;

impl TerminalPrompter {
  pub fn new() -> Self {
    Self
  }
}

impl Prompter for TerminalPrompter {
  fn yes_no(&self, question: &str, default: bool) -> ControlResult<bool> {
    let hint = if default { "[Y/n]" } else { "[y/N]" };
    let answer = read_answer(&format!("{question} {hint} "))?;
    Ok(parse_yes_no(&answer, default))
  }

  fn ask(&self, question: &str, default: Option<&str>) -> ControlResult<String> {
    let prompt = match default {
      Some(d) if !d.is_empty() => format!("{question} ({d}): "),
      _ => format!("{question}: "),
    };
    let answer = read_answer(&prompt)?;
    Ok(match (answer.trim(), default) {
      ("", Some(d)) => d.to_string(),
      (answer, _) => answer.to_string(),
    })
  }

  fn ask_password(&self, question: &str) -> ControlResult<String> {
    #[cfg(unix)]
    let guard = EchoOff::new();
    let answer = read_answer(question);
    #[cfg(unix)]
    drop(guard);
    eprintln!();
    answer
  }

  fn choose(&self, title: &str, choices: &[(&str, &str)]) -> ControlResult<usize> {
    eprintln!("{title}");
    for (i, (name, description)) in choices.iter().enumerate() {
      eprintln!("  {}) {name:<10} {description}", i + 1);
    }
    malctl_lib::auth::prompt::retry("selection", || {
      let answer = read_answer(&format!("Select 1-{} [1]: ", choices.len()))?;
      let answer = answer.trim();
      if answer.is_empty() {
        return Ok(Some(0));
      }
      let picked = answer
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=choices.len()).contains(n))
        .map(|n| n - 1)
        .or_else(|| choices.iter().position(|(name, _)| name.eq_ignore_ascii_case(answer)));
      if picked.is_none() {
        eprintln!("Invalid selection: {answer}");
      }
      Ok(picked)
    })
  }

  fn message(&self, text: &str) {
    eprintln!("{text}");
  }
}
