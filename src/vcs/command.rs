//! Builder for git and svn invocations.
//!
//! Every external VCS process the resolvers start goes through
//! [`VcsCommand`]: it applies the timeout, logs the invocation under the tool's
//! tracing target, maps failures to [`ResolveError`] variants and, when an
//! [`ExecPool`] is attached, waits for a pool permit so that a burst of
//! concurrent fetches does not spawn an unbounded number of processes.
//!
//! ```rust,no_run
//! use pkgplan_cli::vcs::command::{ExecPool, VcsCommand};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = ExecPool::new(4);
//! let output = VcsCommand::git()
//!     .args(["ls-remote", "--tags", "--heads", "https://github.com/jquery/jquery.git"])
//!     .pool(&pool)
//!     .execute()
//!     .await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::constants::COMMAND_TIMEOUT;
use crate::core::ResolveError;

/// Limits how many VCS processes run at once.
#[derive(Clone, Debug)]
pub struct ExecPool {
    permits: Arc<Semaphore>,
}

impl ExecPool {
    pub fn new(size: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size.max(1))),
        }
    }

    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

pub struct VcsCommand {
    tool: &'static str,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env_vars: Vec<(String, String)>,
    timeout_duration: Option<Duration>,
    context: Option<String>,
    pool: Option<ExecPool>,
}

impl VcsCommand {
    fn new(tool: &'static str) -> Self {
        Self {
            tool,
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
            timeout_duration: Some(COMMAND_TIMEOUT),
            context: None,
            pool: None,
        }
    }

    /// A git command. Terminal prompts are disabled so auth failures error out.
    pub fn git() -> Self {
        Self::new("git").env("GIT_TERMINAL_PROMPT", "0")
    }

    /// An svn command, always non-interactive.
    pub fn svn() -> Self {
        Self::new("svn").arg("--non-interactive")
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Set a custom timeout for the command (None for no timeout)
    pub const fn with_timeout(mut self, duration: Option<Duration>) -> Self {
        self.timeout_duration = duration;
        self
    }

    /// Set a context for logging (e.g., the endpoint being resolved)
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn pool(mut self, pool: &ExecPool) -> Self {
        self.pool = Some(pool.clone());
        self
    }

    /// The subcommand, skipping global flags.
    fn operation(&self) -> String {
        self.args
            .iter()
            .find(|a| !a.starts_with('-'))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Execute the command and return the output
    pub async fn execute(self) -> Result<CommandOutput> {
        let _permit = match &self.pool {
            Some(pool) => Some(
                Arc::clone(&pool.permits)
                    .acquire_owned()
                    .await
                    .context("Exec pool closed")?,
            ),
            None => None,
        };

        let start = Instant::now();
        let mut cmd = Command::new(self.tool);
        let mut full_args = Vec::new();
        if let Some(dir) = &self.current_dir {
            if self.tool == "git" {
                full_args.push("-C".to_string());
                full_args.push(dir.display().to_string());
            } else {
                cmd.current_dir(dir);
            }
        }
        full_args.extend(self.args.iter().cloned());
        cmd.args(&full_args);
        for (key, value) in &self.env_vars {
            cmd.env(key, value);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::piped()).stderr(Stdio::piped()).kill_on_drop(true);

        let ctx = self.context.as_deref().unwrap_or("-");
        tracing::debug!(target: "vcs", tool = self.tool, "({}) Executing command: {} {}", ctx, self.tool, full_args.join(" "));

        let output_future = cmd.output();
        let result = match self.timeout_duration {
            Some(duration) => match timeout(duration, output_future).await {
                Ok(result) => result,
                Err(_) => {
                    tracing::warn!(
                        target: "vcs",
                        "Command timed out after {} seconds: {} {}",
                        duration.as_secs(),
                        self.tool,
                        full_args.join(" ")
                    );
                    return Err(ResolveError::CommandTimeout {
                        tool: self.tool.to_string(),
                        operation: self.operation(),
                        secs: duration.as_secs(),
                    }
                    .into());
                }
            },
            None => output_future.await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ResolveError::ToolNotFound {
                    tool: self.tool.to_string(),
                }
                .into());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Failed to execute {} {}", self.tool, full_args.join(" ")));
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        if !output.status.success() {
            tracing::debug!(
                target: "vcs",
                "({}) {} {} failed with exit code {:?}: {}",
                ctx,
                self.tool,
                self.operation(),
                output.status.code(),
                stderr.trim()
            );
            return Err(ResolveError::CommandFailed {
                tool: self.tool.to_string(),
                operation: self.operation(),
                stderr: if stderr.trim().is_empty() { stdout } else { stderr },
            }
            .into());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(target: "vcs::perf", "({}) {} {} took {:.2}s", ctx, self.tool, self.operation(), elapsed.as_secs_f64());
        }

        Ok(CommandOutput {
            stdout,
            stderr,
        })
    }

    /// Execute and return trimmed stdout.
    pub async fn execute_stdout(self) -> Result<String> {
        Ok(self.execute().await?.stdout.trim().to_string())
    }

    /// Execute and discard the output.
    pub async fn execute_success(self) -> Result<()> {
        self.execute().await.map(|_| ())
    }
}
