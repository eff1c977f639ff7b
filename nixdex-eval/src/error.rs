// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Error types for the evaluation driver.

use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

/// Result type for evaluation driver operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving the external evaluator.
#[derive(Error, Debug)]
pub enum Error {
    /// The evaluator binary is not on PATH
    #[error("evaluator '{binary}' not found on PATH")]
    EvaluatorMissing { binary: String },

    /// Source acquisition failed after all retries
    #[error("failed to clone {url} ({branch}) after {attempts} attempts: {reason}")]
    CloneFailed {
        url: String,
        branch: String,
        attempts: u32,
        reason: String,
    },

    /// Source acquisition hit the clone timeout; not retried
    #[error("clone of {url} timed out after {minutes} minutes")]
    CloneTimeout { url: String, minutes: u64 },

    /// The evaluator produced no usable output
    #[error("evaluation produced no usable output: {reason}")]
    EvaluationFailed { reason: String },

    /// Shard discovery call failed
    #[error("shard discovery failed: {reason}")]
    ShardDiscoveryFailed { reason: String },

    /// More than half of all shards failed; the run is aborted
    #[error("{failed} of {total} shards failed, aborting (systemic failure)")]
    TooManyShardFailures { failed: usize, total: usize },

    /// I/O error with context
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Output file handling error
    #[error("failed to handle output file {path}: {source}")]
    OutputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }
}

/// Categorized evaluator failure, derived from the exit status and the
/// trailing stderr output. Carried into the log for post-mortem only;
/// recovery decisions depend solely on the shard class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    StackOverflow,
    OomKilled,
    AssertionFailure,
    InfiniteRecursion,
    EvaluationAborted,
    Timeout,
    Generic,
}

impl FailureKind {
    /// Classify a nonzero exit.
    pub fn classify(status: Option<ExitStatus>, stderr_tail: &str) -> Self {
        use std::os::unix::process::ExitStatusExt;

        if let Some(status) = status
            && (status.signal() == Some(libc::SIGKILL) || status.code() == Some(137))
        {
            return FailureKind::OomKilled;
        }
        let lowered = stderr_tail.to_lowercase();
        if lowered.contains("stack overflow") || lowered.contains("memory exhausted") {
            FailureKind::StackOverflow
        } else if lowered.contains("killed") || lowered.contains("out of memory") {
            FailureKind::OomKilled
        } else if lowered.contains("assertion") && lowered.contains("failed") {
            FailureKind::AssertionFailure
        } else if lowered.contains("infinite recursion") {
            FailureKind::InfiniteRecursion
        } else if lowered.contains("evaluation aborted") || lowered.contains("aborted") {
            FailureKind::EvaluationAborted
        } else {
            FailureKind::Generic
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::StackOverflow => "stack-overflow",
            FailureKind::OomKilled => "oom-killed",
            FailureKind::AssertionFailure => "assertion-failure",
            FailureKind::InfiniteRecursion => "infinite-recursion",
            FailureKind::EvaluationAborted => "evaluation-aborted",
            FailureKind::Timeout => "timeout",
            FailureKind::Generic => "generic",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stderr_classification() {
        assert_eq!(
            FailureKind::classify(None, "error: stack overflow (possible infinite recursion)"),
            FailureKind::StackOverflow
        );
        assert_eq!(
            FailureKind::classify(None, "error: infinite recursion encountered"),
            FailureKind::InfiniteRecursion
        );
        assert_eq!(
            FailureKind::classify(None, "assertion 'x' failed"),
            FailureKind::AssertionFailure
        );
        assert_eq!(
            FailureKind::classify(None, "child was Killed"),
            FailureKind::OomKilled
        );
        assert_eq!(
            FailureKind::classify(None, "evaluation aborted with message"),
            FailureKind::EvaluationAborted
        );
        assert_eq!(FailureKind::classify(None, "boom"), FailureKind::Generic);
    }
}
