// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Source-tree acquisition: shallow clone of the release branch.

use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::process::Command;
use tracing::{info, warn};

use crate::error::{Error, Result};

const CLONE_TIMEOUT: Duration = Duration::from_secs(20 * 60);
const CLONE_ATTEMPTS: u32 = 3;
const CLONE_BACKOFF: Duration = Duration::from_secs(5);

/// A cloned source tree; the checkout is removed when dropped.
pub struct SourceTree {
    pub path: PathBuf,
    _tempdir: TempDir,
}

/// Shallow-clone `branch` of `url` into a temporary directory.
///
/// Process failures are retried up to 3 times with a fixed 5-second
/// backoff; a timeout aborts immediately.
pub async fn clone_source(url: &str, branch: &str) -> Result<SourceTree> {
    let tempdir = TempDir::with_prefix("nixpkgs_")
        .map_err(|e| Error::io("failed to create clone directory", e))?;
    let checkout = tempdir.path().join("nixpkgs");

    let mut last_error = String::new();
    for attempt in 1..=CLONE_ATTEMPTS {
        info!(url, branch, attempt, "cloning source tree (shallow)");
        let result = tokio::time::timeout(
            CLONE_TIMEOUT,
            Command::new("git")
                .args(["clone", "--depth", "1", "--branch", branch, url])
                .arg(&checkout)
                .output(),
        )
        .await;

        match result {
            Err(_) => {
                return Err(Error::CloneTimeout {
                    url: url.to_string(),
                    minutes: CLONE_TIMEOUT.as_secs() / 60,
                });
            }
            Ok(Err(err)) => {
                last_error = err.to_string();
            }
            Ok(Ok(output)) if output.status.success() => {
                info!(path = %checkout.display(), "clone complete");
                return Ok(SourceTree {
                    path: checkout,
                    _tempdir: tempdir,
                });
            }
            Ok(Ok(output)) => {
                last_error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            }
        }

        if attempt < CLONE_ATTEMPTS {
            warn!(attempt, "clone failed ({last_error}), retrying in 5s");
            // A fresh clone needs an empty target directory
            let _ = tokio::fs::remove_dir_all(&checkout).await;
            tokio::time::sleep(CLONE_BACKOFF).await;
        }
    }

    Err(Error::CloneFailed {
        url: url.to_string(),
        branch: branch.to_string(),
        attempts: CLONE_ATTEMPTS,
        reason: last_error,
    })
}
