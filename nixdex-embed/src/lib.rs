// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Rate-limited embedding client.
//!
//! Drives a remote embedding service under two sliding-window rate
//! limits (requests/minute and tokens/minute) with bounded concurrency,
//! exponential backoff with jitter, and a sustained-throttle circuit
//! breaker. Results are reassembled in input order; per-record failures
//! become `None` entries instead of aborting the batch.

mod batch;
mod client;
mod error;
mod limiter;

pub use batch::{BatchOutcome, EmbedItem, EmbeddingCache, embed_with_cache};
pub use client::{EmbedClient, EmbedSettings};
pub use error::{Error, Result};
pub use limiter::{RateLimiter, estimate_tokens};
