//! Subprocess execution for the `ip` and `ping` tools

use tokio::process::Command;
use tracing::{debug, info};
use splitns_core::{Error, Result};

/// Captured result of a finished subprocess
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Process exited with status 0
    pub success: bool,
    /// Standard output, lossily decoded
    pub stdout: String,
    /// Standard error, lossily decoded and trimmed
    pub stderr: String,
}

/// How a failed primitive explained itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Target already exists (duplicate address, namespace file, route...)
    Exists,
    /// Target is already gone
    Missing,
    /// Anything else; never tolerated
    Other,
}

impl FailureKind {
    /// Classify the error text printed by iproute2
    #[must_use]
    pub fn classify(stderr: &str) -> Self {
        const EXISTS: [&str; 3] = ["File exists", "already assigned", "already exists"];
        const MISSING: [&str; 4] = [
            "No such file or directory",
            "Cannot find device",
            "does not exist",
            "No such process",
        ];

        if EXISTS.iter().any(|m| stderr.contains(m)) {
            Self::Exists
        } else if MISSING.iter().any(|m| stderr.contains(m)) {
            Self::Missing
        } else {
            Self::Other
        }
    }
}

/// Runs external tools, optionally logging mutations instead of running them
#[derive(Debug, Clone, Default)]
pub struct CommandRunner {
    dry_run: bool,
}

impl CommandRunner {
    /// Create a runner that executes everything
    #[must_use]
    pub const fn new() -> Self {
        Self { dry_run: false }
    }

    /// Create a runner that only executes read-only queries
    #[must_use]
    pub const fn dry_run() -> Self {
        Self { dry_run: true }
    }

    /// Whether mutations are skipped
    #[must_use]
    pub const fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Run a read-only command; always executed
    ///
    /// # Errors
    /// Returns [`Error::Spawn`] if the program cannot be started
    pub async fn query(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        self.execute(program, args).await
    }

    /// Run a command that changes host state
    ///
    /// In dry-run mode the command line is logged and reported as successful.
    ///
    /// # Errors
    /// Returns [`Error::Spawn`] if the program cannot be started
    pub async fn apply(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        if self.dry_run {
            info!(command = %format!("{program} {}", args.join(" ")), "Dry run: skipping");
            return Ok(CommandOutput {
                success: true,
                ..CommandOutput::default()
            });
        }

        self.execute(program, args).await
    }

    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput> {
        debug!(program, args = %args.join(" "), "Running command");

        // A caller timing out drops this future; the child must not outlive it
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: program.to_string(),
                source,
            })?;

        let result = CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };

        if !result.success {
            debug!(program, status = ?output.status, stderr = %result.stderr, "Command failed");
        }

        Ok(result)
    }
}

/// Turn a failed [`CommandOutput`] into [`Error::Command`]
#[must_use]
pub fn command_error(program: &str, args: &[&str], output: &CommandOutput) -> Error {
    Error::Command {
        program: program.to_string(),
        args: args.join(" "),
        stderr: output.stderr.clone(),
    }
}
