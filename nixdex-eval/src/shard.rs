// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Sharded evaluation: priority classes, resource budgets, and the
//! fallback ladder.
//!
//! Shards are subsets of the attribute tree evaluated as independent
//! subprocesses so that one crashing ecosystem (pythonPackages,
//! haskellPackages, ...) cannot take down the whole run. Classes:
//!
//! | class             | timeout | stack  | extras                        |
//! |-------------------|---------|--------|-------------------------------|
//! | grouped           | 3 min   | 16 MiB |                               |
//! | large             | 10 min  | 32 MiB | 8 GiB address space           |
//! | large-problematic | 15 min  | 32 MiB | depth capped at 5, no aliases |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{error, info, warn};

use crate::driver::{ChildOutcome, EvalSettings, Evaluator, supervise};
use crate::error::{Error, FailureKind, Result};
use crate::limits;
use crate::source::SourceTree;

/// Small, fast shards processed first.
const GROUPED_SHARDS: [&str; 4] = ["stdenv", "coreutils", "bash", "gcc"];

/// Shards known to exhaust memory or recurse without a depth cap.
const PROBLEMATIC_SHARDS: [&str; 10] = [
    "pythonPackages",
    "python311Packages",
    "python310Packages",
    "python39Packages",
    "haskellPackages",
    "haskell",
    "nodePackages",
    "nodePackages_latest",
    "rPackages",
    "juliaPackages",
];

const DEPTH_DEFAULT: u32 = 10;
const DEPTH_PROBLEMATIC: u32 = 5;
const DEPTH_FALLBACK: u32 = 3;

/// Priority class of a shard, driving timeout and resource budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShardClass {
    Grouped,
    Large,
    LargeProblematic,
}

impl ShardClass {
    pub fn of(shard: &str) -> Self {
        if GROUPED_SHARDS.contains(&shard) {
            ShardClass::Grouped
        } else if PROBLEMATIC_SHARDS.contains(&shard) {
            ShardClass::LargeProblematic
        } else {
            ShardClass::Large
        }
    }

    pub fn timeout(self) -> Duration {
        match self {
            ShardClass::Grouped => Duration::from_secs(3 * 60),
            ShardClass::Large => Duration::from_secs(10 * 60),
            ShardClass::LargeProblematic => Duration::from_secs(15 * 60),
        }
    }

    pub fn stack_limit(self) -> u64 {
        match self {
            ShardClass::Grouped => limits::STACK_LIMIT_DEFAULT,
            _ => limits::STACK_LIMIT_LARGE,
        }
    }

    pub fn limit_address_space(self) -> bool {
        !matches!(self, ShardClass::Grouped)
    }

    pub fn max_depth(self) -> u32 {
        match self {
            ShardClass::LargeProblematic => DEPTH_PROBLEMATIC,
            _ => DEPTH_DEFAULT,
        }
    }

    /// Alias-following is disabled for problematic shards (alias chains
    /// are a known recursion source there).
    pub fn allow_aliases(self) -> bool {
        !matches!(self, ShardClass::LargeProblematic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ShardClass::Grouped => "grouped",
            ShardClass::Large => "large",
            ShardClass::LargeProblematic => "large-problematic",
        }
    }
}

/// Evaluation plan: shards ordered grouped → large → problematic.
#[derive(Debug, Clone)]
pub struct ShardPlan {
    pub shards: Vec<(String, ShardClass)>,
}

impl ShardPlan {
    pub fn new(mut shards: Vec<String>) -> Self {
        shards.sort_by_key(|s| ShardClass::of(s));
        let shards = shards
            .into_iter()
            .map(|s| {
                let class = ShardClass::of(&s);
                (s, class)
            })
            .collect();
        ShardPlan { shards }
    }

    pub fn len(&self) -> usize {
        self.shards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.is_empty()
    }
}

/// Outcome of one shard attempt, for logging and failure accounting.
#[derive(Debug)]
pub struct ShardOutcome {
    pub shard: String,
    pub class: ShardClass,
    pub failure: Option<FailureKind>,
}

#[derive(Debug, Deserialize)]
struct ShardListing {
    #[serde(rename = "availableShards")]
    available_shards: Vec<String>,
}

/// Discover the shard list by invoking the sharded expression with
/// `shard = null`.
async fn discover_shards(
    evaluator: &Evaluator,
    source: &SourceTree,
    workdir: &Path,
) -> Result<Vec<String>> {
    let settings = evaluator.settings();
    let expr = source.path.join(&settings.shard_expr);
    let listing_path = workdir.join("shards.json");

    let mut cmd = evaluator.base_command(source);
    cmd.args(["--argstr", "system", &settings.system])
        .args(["--arg", "shard", "null"])
        .arg(&expr);

    info!(expr = %expr.display(), "discovering available shards");
    let outcome = supervise(cmd, &listing_path, Duration::from_secs(5 * 60)).await?;
    if !matches!(outcome, ChildOutcome::Success) {
        return Err(Error::ShardDiscoveryFailed {
            reason: "shard listing invocation failed".to_string(),
        });
    }

    let raw = std::fs::read_to_string(&listing_path).map_err(|e| Error::OutputFile {
        path: listing_path.clone(),
        source: e,
    })?;
    let listing: ShardListing =
        serde_json::from_str(raw.trim()).map_err(|e| Error::ShardDiscoveryFailed {
            reason: format!("unparseable shard listing: {e}"),
        })?;
    info!(count = listing.available_shards.len(), "discovered shards");
    Ok(listing.available_shards)
}

/// Run every shard in priority order with the fallback ladder, returning
/// the per-shard JSONL files of the successful ones.
///
/// Aborts with [`Error::TooManyShardFailures`] as soon as failed shards
/// exceed half of the plan; that ratio indicates a systemic problem
/// (broken checkout, broken evaluator) rather than the usual scattered
/// crashes.
pub(crate) async fn run_sharded(
    evaluator: &Evaluator,
    source: &SourceTree,
    workdir: &Path,
) -> Result<Vec<PathBuf>> {
    let shards = discover_shards(evaluator, source, workdir).await?;
    let plan = ShardPlan::new(shards);
    if plan.is_empty() {
        return Err(Error::ShardDiscoveryFailed {
            reason: "shard listing was empty".to_string(),
        });
    }
    info!(total = plan.len(), "processing shards in priority order");

    let total = plan.len();
    let mut successful: Vec<PathBuf> = Vec::new();
    let mut failed: Vec<ShardOutcome> = Vec::new();

    for (i, (shard, class)) in plan.shards.iter().enumerate() {
        info!(
            shard,
            class = class.as_str(),
            "[{}/{total}] processing shard",
            i + 1
        );

        let attempt = run_shard(evaluator, source, workdir, shard, *class, None).await?;
        match attempt {
            Ok(path) => {
                successful.push(path);
                continue;
            }
            Err(kind) if *class != ShardClass::Grouped => {
                // Fallback ladder step 2: conservative depth, no aliases.
                warn!(
                    shard,
                    kind = kind.as_str(),
                    "shard failed, retrying with depth {DEPTH_FALLBACK} and aliases disabled"
                );
                let retry =
                    run_shard(evaluator, source, workdir, shard, *class, Some(DEPTH_FALLBACK))
                        .await?;
                match retry {
                    Ok(path) => {
                        successful.push(path);
                        continue;
                    }
                    Err(kind) => {
                        error!(shard, kind = kind.as_str(), "shard failed after fallback, skipping");
                        failed.push(ShardOutcome {
                            shard: shard.clone(),
                            class: *class,
                            failure: Some(kind),
                        });
                    }
                }
            }
            Err(kind) => {
                error!(shard, kind = kind.as_str(), "shard failed, skipping");
                failed.push(ShardOutcome {
                    shard: shard.clone(),
                    class: *class,
                    failure: Some(kind),
                });
            }
        }

        if failed.len() * 2 > total {
            return Err(Error::TooManyShardFailures {
                failed: failed.len(),
                total,
            });
        }
    }

    info!(
        successful = successful.len(),
        failed = failed.len(),
        "shard processing complete"
    );
    if !failed.is_empty() {
        let names: Vec<&str> = failed.iter().map(|o| o.shard.as_str()).collect();
        warn!("failed shards: {}", names.join(", "));
    }
    Ok(successful)
}

/// One shard invocation; `depth_override` engages the fallback rung.
async fn run_shard(
    evaluator: &Evaluator,
    source: &SourceTree,
    workdir: &Path,
    shard: &str,
    class: ShardClass,
    depth_override: Option<u32>,
) -> Result<std::result::Result<PathBuf, FailureKind>> {
    let settings: &EvalSettings = evaluator.settings();
    let expr = source.path.join(&settings.shard_expr);
    let output_path = workdir.join(format!("shard_{shard}.jsonl"));

    let depth = depth_override.unwrap_or_else(|| class.max_depth());
    let allow_aliases = depth_override.is_none() && class.allow_aliases();

    let mut cmd = evaluator.base_command(source);
    cmd.args(["--argstr", "system", &settings.system])
        .args(["--argstr", "shard", shard])
        .args(["--arg", "maxDepth", &depth.to_string()])
        .args([
            "--arg",
            "allowAliases",
            if allow_aliases { "true" } else { "false" },
        ])
        .arg(&expr);

    limits::raise_limits(class.stack_limit(), class.limit_address_space());

    let started = std::time::Instant::now();
    let outcome = supervise(cmd, &output_path, class.timeout()).await?;
    match outcome {
        ChildOutcome::Success => {
            info!(
                shard,
                elapsed_s = started.elapsed().as_secs(),
                "shard completed"
            );
            Ok(Ok(output_path))
        }
        ChildOutcome::TimedOut => {
            warn!(
                shard,
                timeout_s = class.timeout().as_secs(),
                "shard timed out"
            );
            Ok(Err(FailureKind::Timeout))
        }
        ChildOutcome::Failed { status, stderr_tail } => {
            let kind = FailureKind::classify(Some(status), &stderr_tail);
            warn!(shard, code = status.code(), kind = kind.as_str(), "shard failed");
            Ok(Err(kind))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classes_and_budgets() {
        assert_eq!(ShardClass::of("stdenv"), ShardClass::Grouped);
        assert_eq!(ShardClass::of("haskellPackages"), ShardClass::LargeProblematic);
        assert_eq!(ShardClass::of("zlib"), ShardClass::Large);

        assert_eq!(ShardClass::Grouped.timeout(), Duration::from_secs(180));
        assert_eq!(ShardClass::Large.timeout(), Duration::from_secs(600));
        assert_eq!(
            ShardClass::LargeProblematic.timeout(),
            Duration::from_secs(900)
        );
        assert!(!ShardClass::Grouped.limit_address_space());
        assert!(ShardClass::LargeProblematic.limit_address_space());
        assert_eq!(ShardClass::LargeProblematic.max_depth(), 5);
        assert!(!ShardClass::LargeProblematic.allow_aliases());
        assert!(ShardClass::Large.allow_aliases());
    }

    #[test]
    fn plan_orders_by_priority() {
        let plan = ShardPlan::new(vec![
            "haskellPackages".into(),
            "zlib".into(),
            "stdenv".into(),
            "pythonPackages".into(),
            "gcc".into(),
        ]);
        let classes: Vec<ShardClass> = plan.shards.iter().map(|(_, c)| *c).collect();
        assert_eq!(
            classes,
            vec![
                ShardClass::Grouped,
                ShardClass::Grouped,
                ShardClass::Large,
                ShardClass::LargeProblematic,
                ShardClass::LargeProblematic,
            ]
        );
    }
}
