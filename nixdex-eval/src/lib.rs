// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Driver for the external Nix evaluation tool.
//!
//! Produces a complete JSONL stream of raw package records for a target
//! Nixpkgs revision. The external evaluator is crash-prone on a
//! repository of this size, so the driver supports two strategies:
//!
//! - *direct*: one invocation against the top-level release expression,
//!   recovering partial output when the tool dies after flushing stdout;
//! - *sharded*: hundreds of bounded subprocesses with per-class resource
//!   budgets, a fallback ladder, and categorized failure recovery.

mod combine;
mod driver;
mod error;
mod limits;
mod shard;
mod source;

pub use combine::combine_shard_output;
pub use driver::{EvalOutput, EvalSettings, EvaluationMode, Evaluator};
pub use error::{Error, FailureKind, Result};
pub use shard::{ShardClass, ShardOutcome, ShardPlan};
pub use source::{SourceTree, clone_source};
