// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Batch embedding with bounded concurrency and incremental reuse.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::client::EmbedClient;
use crate::limiter::estimate_tokens;

/// One batch entry: record id, content hash for cache lookup, and the
/// text to embed.
#[derive(Debug, Clone)]
pub struct EmbedItem {
    pub record_id: String,
    pub content_hash: i64,
    pub text: String,
}

/// `(content_hash -> vector)` cache seeded from a prior artifact.
#[derive(Debug, Default, Clone)]
pub struct EmbeddingCache {
    map: HashMap<i64, Vec<f32>>,
}

impl EmbeddingCache {
    pub fn from_pairs(pairs: impl IntoIterator<Item = (i64, Vec<f32>)>) -> Self {
        EmbeddingCache {
            map: pairs.into_iter().collect(),
        }
    }

    pub fn get(&self, content_hash: i64) -> Option<&Vec<f32>> {
        self.map.get(&content_hash)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Result of a batch run. `vectors` preserves input order; `None`
/// entries are records that failed after retries.
#[derive(Debug)]
pub struct BatchOutcome {
    pub vectors: Vec<(String, Option<Vec<f32>>)>,
    pub reused: usize,
    pub generated: usize,
    pub failed: usize,
}

/// Embed a batch of records, consulting the cache first.
///
/// Cache hits never touch the network. Remote calls run under the
/// client's semaphore with rate-limiter acquisition inside it; results
/// are reassembled in input order regardless of completion order.
/// Cancelling lets in-flight requests finish but starts no new ones.
pub async fn embed_with_cache(
    client: &EmbedClient,
    items: &[EmbedItem],
    cache: &EmbeddingCache,
    cancel: &CancellationToken,
) -> BatchOutcome {
    let total = items.len();
    let mut vectors: Vec<(String, Option<Vec<f32>>)> = items
        .iter()
        .map(|item| (item.record_id.clone(), None))
        .collect();

    // Resolve cache hits up front; only misses are dispatched.
    let mut pending: Vec<usize> = Vec::new();
    let mut reused = 0usize;
    for (i, item) in items.iter().enumerate() {
        match cache.get(item.content_hash) {
            Some(vector) => {
                vectors[i].1 = Some(vector.clone());
                reused += 1;
            }
            None => pending.push(i),
        }
    }
    if reused > 0 {
        info!(reused, total, "reusing embeddings for unchanged packages");
    }
    if pending.is_empty() {
        return BatchOutcome {
            vectors,
            reused,
            generated: 0,
            failed: 0,
        };
    }

    info!(count = pending.len(), "generating embeddings for new/changed texts");
    let concurrency = client.settings().max_concurrent_requests.max(1);
    let semaphore = Semaphore::new(concurrency);
    let next = AtomicUsize::new(0);
    let completed = AtomicUsize::new(0);
    let pending_total = pending.len();
    // 20/40/60/80% progress marks
    let marks: Vec<usize> = (1..5).map(|p| pending_total * p / 5).collect();

    let workers = (0..concurrency.min(pending_total)).map(|_| {
        let pending = &pending;
        let next = &next;
        let completed = &completed;
        let semaphore = &semaphore;
        let marks = &marks;
        let mut pacer = client.limiter.pacer();
        async move {
            let mut produced: Vec<(usize, Option<Vec<f32>>)> = Vec::new();
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let slot = next.fetch_add(1, Ordering::Relaxed);
                if slot >= pending.len() {
                    break;
                }
                let index = pending[slot];
                let item = &items[index];

                let result = {
                    let _permit = semaphore
                        .acquire()
                        .await
                        .expect("embedding semaphore is never closed");
                    pacer.pace().await;
                    client.limiter.acquire(estimate_tokens(&item.text)).await;
                    client.embed_with_retry(&item.text).await
                };
                match result {
                    Ok(vector) => produced.push((index, Some(vector))),
                    Err(err) => {
                        warn!(record = item.record_id, "embedding failed: {err}");
                        produced.push((index, None));
                    }
                }

                let done = completed.fetch_add(1, Ordering::Relaxed) + 1;
                if marks.contains(&done) {
                    info!(
                        "embedding progress: {done}/{pending_total} ({}%)",
                        done * 100 / pending_total
                    );
                }
            }
            produced
        }
    });

    let mut generated = 0usize;
    let mut failed = 0usize;
    for produced in futures::future::join_all(workers).await {
        for (index, result) in produced {
            match &result {
                Some(_) => generated += 1,
                None => failed += 1,
            }
            vectors[index].1 = result;
        }
    }
    // Cancelled entries that never started count as failures too
    let skipped = pending_total - generated - failed;
    if skipped > 0 {
        warn!(skipped, "batch cancelled before all records were dispatched");
    }

    info!(
        generated,
        reused,
        failed = failed + skipped,
        "embedding batch complete"
    );
    BatchOutcome {
        vectors,
        reused,
        generated,
        failed: failed + skipped,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{EmbedClient, EmbedSettings};

    fn client() -> EmbedClient {
        EmbedClient::new(EmbedSettings {
            api_key: "test-key".into(),
            output_dimension: 4,
            ..EmbedSettings::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn full_cache_hit_skips_the_network() {
        let items = vec![
            EmbedItem {
                record_id: "a".into(),
                content_hash: 1,
                text: "alpha".into(),
            },
            EmbedItem {
                record_id: "b".into(),
                content_hash: 2,
                text: "beta".into(),
            },
        ];
        let cache =
            EmbeddingCache::from_pairs([(1, vec![0.1, 0.2, 0.3, 0.4]), (2, vec![0.5; 4])]);
        let cancel = CancellationToken::new();
        // No server is reachable in tests; a remote call would fail, so a
        // clean all-reused outcome proves the cache short-circuits.
        let outcome = embed_with_cache(&client(), &items, &cache, &cancel).await;
        assert_eq!(outcome.reused, 2);
        assert_eq!(outcome.generated, 0);
        assert_eq!(outcome.failed, 0);
        assert_eq!(outcome.vectors[0].0, "a");
        assert_eq!(outcome.vectors[0].1.as_deref(), Some(&[0.1, 0.2, 0.3, 0.4][..]));
    }

    #[tokio::test]
    async fn cancelled_batch_dispatches_nothing() {
        let items = vec![EmbedItem {
            record_id: "a".into(),
            content_hash: 1,
            text: "alpha".into(),
        }];
        let cancel = CancellationToken::new();
        cancel.cancel();
        let outcome = embed_with_cache(&client(), &items, &EmbeddingCache::default(), &cancel).await;
        assert_eq!(outcome.generated, 0);
        assert_eq!(outcome.failed, 1);
        assert!(outcome.vectors[0].1.is_none());
    }
}
