// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Evaluator invocation and subprocess supervision.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use nixdex_model::StreamMetadata;

use crate::combine::combine_shard_output;
use crate::error::{Error, FailureKind, Result};
use crate::limits;
use crate::shard::run_sharded;
use crate::source::SourceTree;

/// How the package set is evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvaluationMode {
    /// One invocation against the top-level release expression
    Direct,
    /// Hundreds of bounded per-shard invocations
    Sharded,
}

/// Evaluator invocation settings.
#[derive(Debug, Clone)]
pub struct EvalSettings {
    /// Binary name of the external evaluation tool
    pub binary: String,
    pub repo_url: String,
    pub branch: String,
    /// Target system token, e.g. `x86_64-linux`
    pub system: String,
    pub workers: u32,
    /// Per-worker memory ceiling in MB
    pub max_memory_mb: u32,
    pub mode: EvaluationMode,
    /// Expression file for sharded evaluation, relative to the checkout
    pub shard_expr: PathBuf,
    pub extractor_version: String,
}

impl Default for EvalSettings {
    fn default() -> Self {
        EvalSettings {
            binary: "nix-eval-jobs".to_string(),
            repo_url: "https://github.com/NixOS/nixpkgs.git".to_string(),
            branch: "release-25.05".to_string(),
            system: "x86_64-linux".to_string(),
            workers: 8,
            max_memory_mb: 4096,
            mode: EvaluationMode::Direct,
            shard_expr: PathBuf::from("pkgs/top-level/release-sharded.nix"),
            extractor_version: "nixdex-evaluator-v1".to_string(),
        }
    }
}

/// Result of a full evaluation: the combined JSONL file and its metadata.
pub struct EvalOutput {
    pub jsonl_path: PathBuf,
    pub metadata: StreamMetadata,
    /// Keeps the scratch directory holding the JSONL alive
    _workdir: TempDir,
}

const DIRECT_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// Drives the external evaluator against a cloned source tree.
pub struct Evaluator {
    settings: EvalSettings,
}

impl Evaluator {
    /// Probe for the evaluator binary; fails fast when it is missing.
    pub fn new(settings: EvalSettings) -> Result<Self> {
        if which::which(&settings.binary).is_err() {
            return Err(Error::EvaluatorMissing {
                binary: settings.binary.clone(),
            });
        }
        Ok(Evaluator { settings })
    }

    pub fn settings(&self) -> &EvalSettings {
        &self.settings
    }

    /// Run the configured evaluation mode and combine the output.
    pub async fn evaluate(&self, source: &SourceTree) -> Result<EvalOutput> {
        let workdir = TempDir::with_prefix("nixdex_eval_")
            .map_err(|e| Error::io("failed to create evaluation workdir", e))?;

        let shard_files = match self.settings.mode {
            EvaluationMode::Direct => vec![self.run_direct(source, workdir.path()).await?],
            EvaluationMode::Sharded => run_sharded(self, source, workdir.path()).await?,
        };

        let combined = workdir.path().join("nixpkgs-raw.jsonl");
        let total_packages = combine_shard_output(&shard_files, &combined)?;
        if total_packages == 0 {
            warn!("evaluation produced an empty package set");
        }

        let metadata = StreamMetadata {
            extraction_timestamp: chrono::Utc::now().to_rfc3339(),
            nixpkgs_branch: self.settings.branch.clone(),
            total_packages,
            extractor_version: self.settings.extractor_version.clone(),
        };
        crate::combine::prepend_metadata(&combined, &metadata)?;

        Ok(EvalOutput {
            jsonl_path: combined,
            metadata,
            _workdir: workdir,
        })
    }

    /// Direct mode: single invocation, one JSONL file.
    ///
    /// The evaluator reliably crashes on broken packages but flushes its
    /// stdout first, so a nonzero exit with non-empty output is a
    /// recoverable warning rather than an error.
    async fn run_direct(&self, source: &SourceTree, workdir: &Path) -> Result<PathBuf> {
        let release_nix = source.path.join("pkgs/top-level/release.nix");
        let output_path = workdir.join("direct.jsonl");

        let mut cmd = self.base_command(source);
        cmd.arg(&release_nix);

        limits::raise_limits(limits::STACK_LIMIT_DEFAULT, false);
        info!(expr = %release_nix.display(), "running direct evaluation");
        let outcome = supervise(cmd, &output_path, DIRECT_TIMEOUT).await?;

        let output_size = std::fs::metadata(&output_path)
            .map(|m| m.len())
            .unwrap_or(0);
        match outcome {
            ChildOutcome::Success => Ok(output_path),
            ChildOutcome::Failed { status, stderr_tail } if output_size > 0 => {
                let kind = FailureKind::classify(Some(status), &stderr_tail);
                warn!(
                    kind = kind.as_str(),
                    code = status.code(),
                    "evaluator exited nonzero but produced {output_size} bytes, continuing with partial output"
                );
                Ok(output_path)
            }
            ChildOutcome::Failed { status, stderr_tail } => {
                let kind = FailureKind::classify(Some(status), &stderr_tail);
                Err(Error::EvaluationFailed {
                    reason: format!(
                        "evaluator exited with {status} ({}) and no output",
                        kind.as_str()
                    ),
                })
            }
            ChildOutcome::TimedOut => Err(Error::EvaluationFailed {
                reason: format!(
                    "direct evaluation timed out after {} minutes",
                    DIRECT_TIMEOUT.as_secs() / 60
                ),
            }),
        }
    }

    /// Base command line shared by direct and sharded invocations.
    pub(crate) fn base_command(&self, source: &SourceTree) -> Command {
        let mut cmd = Command::new(&self.settings.binary);
        cmd.args(["--meta", "--show-input-drvs", "--force-recurse", "--impure"])
            .args(["--workers", &self.settings.workers.to_string()])
            .args(["--max-memory-size", &self.settings.max_memory_mb.to_string()])
            .current_dir(&source.path)
            .env("NIXPKGS_ALLOW_UNFREE", "1")
            .env("NIXPKGS_ALLOW_BROKEN", "1");
        cmd
    }
}

/// What happened to a supervised child.
pub(crate) enum ChildOutcome {
    Success,
    Failed {
        status: ExitStatus,
        stderr_tail: String,
    },
    TimedOut,
}

const STDERR_TAIL_LINES: usize = 50;

/// Spawn the command with stdout streamed to `output_path`, stderr
/// drained line-wise into the log, and a wall-clock timeout that kills
/// the whole process group.
pub(crate) async fn supervise(
    mut cmd: Command,
    output_path: &Path,
    timeout: Duration,
) -> Result<ChildOutcome> {
    let stdout_file = std::fs::File::create(output_path)
        .map_err(|e| Error::OutputFile {
            path: output_path.to_path_buf(),
            source: e,
        })?;

    cmd.stdout(Stdio::from(stdout_file))
        .stderr(Stdio::piped())
        .process_group(0)
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .map_err(|e| Error::io("failed to spawn evaluator", e))?;
    let pid = child.id();

    // Drain stderr concurrently, logging each line and keeping a tail for
    // failure classification.
    let stderr = child.stderr.take();
    let stderr_task = tokio::spawn(async move {
        let mut tail: Vec<String> = Vec::new();
        if let Some(stderr) = stderr {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(target: "nixdex_eval::subprocess", "{line}");
                if tail.len() == STDERR_TAIL_LINES {
                    tail.remove(0);
                }
                tail.push(line);
            }
        }
        tail.join("\n")
    });

    let deadline = tokio::time::Instant::now() + timeout;
    let status = tokio::select! {
        result = child.wait() => {
            Some(result.map_err(|e| Error::io("failed to wait for evaluator", e))?)
        }
        _ = tokio::time::sleep_until(deadline) => {
            kill_process_group(pid);
            let _ = child.kill().await;
            None
        }
    };
    let stderr_tail = stderr_task.await.unwrap_or_default();

    match status {
        None => Ok(ChildOutcome::TimedOut),
        Some(status) if status.success() => Ok(ChildOutcome::Success),
        Some(status) => Ok(ChildOutcome::Failed {
            status,
            stderr_tail,
        }),
    }
}

/// SIGKILL the process group rooted at `pid`. The child was spawned with
/// `process_group(0)`, so this reaps evaluator workers too.
fn kill_process_group(pid: Option<u32>) {
    use nix::sys::signal::{Signal, killpg};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}
