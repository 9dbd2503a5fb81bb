//! Asking a human to settle a version conflict.

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
use std::io::{BufRead, Write};

use crate::core::{ConflictPick, ResolveError};

/// Invalid answers tolerated before giving up.
const MAX_ATTEMPTS: usize = 3;

/// A validated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Choice {
    /// Zero-based index into the picks
    pub index: usize,
    /// Persist the pick as a resolution
    pub save: bool,
}

/// Source of answers to conflict prompts.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// Shows the picks and returns the raw answer, `None` when input ended.
    async fn ask(&self, name: &str, picks: &[ConflictPick]) -> Result<Option<String>>;
}

/// Prompts on stderr and reads the answer from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn ask(&self, name: &str, picks: &[ConflictPick]) -> Result<Option<String>> {
        let mut text = format!("{} {name}, please choose one:\n", "Unable to find a suitable version for".yellow());
        for (i, pick) in picks.iter().enumerate() {
            text.push_str(&format!("    {}) {pick}\n", (i + 1).to_string().cyan()));
        }
        text.push_str(&format!("{}\n", "Prefix the choice with ! to persist it".dimmed()));

        tokio::task::spawn_blocking(move || -> Result<Option<String>> {
            let mut stderr = std::io::stderr();
            write!(stderr, "{text}Answer: ")?;
            stderr.flush()?;
            let mut line = String::new();
            let read = std::io::stdin().lock().read_line(&mut line).context("Failed to read answer")?;
            Ok((read > 0).then_some(line))
        })
        .await
        .context("spawn_blocking panicked")?
    }
}

/// Parses an answer: a 1-based number in range, optionally prefixed or
/// suffixed with `!` to persist it.
pub fn parse_choice(answer: &str, count: usize) -> Result<Choice, ResolveError> {
    let answer = answer.trim();
    let save = answer.starts_with('!') || answer.ends_with('!');
    let number = answer.trim_matches('!').trim();
    match number.parse::<usize>() {
        Ok(n) if (1..=count).contains(&n) => Ok(Choice {
            index: n - 1,
            save,
        }),
        _ => Err(ResolveError::PromptFailed {
            reason: format!("invalid choice '{answer}', expected 1 to {count}"),
        }),
    }
}

/// Asks until a valid answer arrives.
pub async fn choose(prompter: &dyn Prompter, name: &str, picks: &[ConflictPick]) -> Result<Choice> {
    let mut last_error = None;
    for _ in 0..MAX_ATTEMPTS {
        let Some(answer) = prompter.ask(name, picks).await? else {
            return Err(ResolveError::PromptFailed {
                reason: format!("no answer given for {name}"),
            }
            .into());
        };
        match parse_choice(&answer, picks.len()) {
            Ok(choice) => return Ok(choice),
            Err(e) => {
                tracing::warn!(target: "manager", "{}", e);
                last_error = Some(e);
            }
        }
    }
    Err(last_error
        .unwrap_or_else(|| ResolveError::PromptFailed {
            reason: format!("no valid answer for {name}"),
        })
        .into())
}
