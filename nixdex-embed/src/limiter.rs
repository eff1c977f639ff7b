// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Sliding-window rate limiter.
//!
//! Two windows over the trailing 60 seconds: request count and summed
//! token cost. Both deques live under a single mutex so accounting is
//! race-free; waiters compute the earliest expiry that would satisfy
//! their demand and release the lock while sleeping so they never block
//! other waiters' bookkeeping. Each worker additionally paces itself
//! with a minimum gap of `60s / max_rpm` between its own requests.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::trace;

const WINDOW: Duration = Duration::from_secs(60);

/// Estimate the token cost of a text: `max(chars / 4, word_count)`,
/// at least 1.
pub fn estimate_tokens(text: &str) -> u64 {
    let chars = text.chars().count() as u64;
    let words = text.split_whitespace().count() as u64;
    (chars / 4).max(words).max(1)
}

#[derive(Debug)]
struct Windows {
    requests: VecDeque<Instant>,
    tokens: VecDeque<(Instant, u64)>,
    token_sum: u64,
}

impl Windows {
    fn prune(&mut self, now: Instant) {
        // Early in process lifetime the window reaches before time zero
        let Some(cutoff) = now.checked_sub(WINDOW) else {
            return;
        };
        while let Some(&front) = self.requests.front() {
            if front >= cutoff {
                break;
            }
            self.requests.pop_front();
        }
        while let Some(&(front, cost)) = self.tokens.front() {
            if front >= cutoff {
                break;
            }
            self.token_sum -= cost;
            self.tokens.pop_front();
        }
    }
}

/// Request + token rate limiter shared by all in-flight workers.
#[derive(Debug)]
pub struct RateLimiter {
    max_rpm: usize,
    max_tpm: u64,
    min_gap: Duration,
    windows: Mutex<Windows>,
}

impl RateLimiter {
    pub fn new(max_rpm: usize, max_tpm: u64) -> Self {
        let max_rpm = max_rpm.max(1);
        RateLimiter {
            max_rpm,
            max_tpm,
            min_gap: WINDOW / max_rpm as u32,
            windows: Mutex::new(Windows {
                requests: VecDeque::new(),
                tokens: VecDeque::new(),
                token_sum: 0,
            }),
        }
    }

    /// Per-caller pacer enforcing the minimum inter-request gap.
    pub fn pacer(&self) -> Pacer {
        Pacer {
            min_gap: self.min_gap,
            last: None,
        }
    }

    /// Block until issuing a request of `cost` estimated tokens stays
    /// within both windows, then record it.
    ///
    /// The mutex is held only for bookkeeping; every sleep happens with
    /// the lock released and the state is re-checked afterwards.
    pub async fn acquire(&self, cost: u64) {
        loop {
            let deadline = {
                let mut windows = self.windows.lock().await;
                let now = Instant::now();
                windows.prune(now);

                match self.next_free_slot(&windows, now, cost) {
                    Some(deadline) => deadline,
                    None => {
                        windows.requests.push_back(now);
                        windows.tokens.push_back((now, cost));
                        windows.token_sum += cost;
                        return;
                    }
                }
            };
            trace!("rate limiter sleeping {:?}", deadline - Instant::now());
            tokio::time::sleep_until(deadline).await;
        }
    }

    /// When the demand cannot be satisfied right now, the instant to
    /// sleep until before re-checking; None when it fits immediately.
    fn next_free_slot(&self, windows: &Windows, now: Instant, cost: u64) -> Option<Instant> {
        let over_rpm = windows.requests.len() >= self.max_rpm;
        let over_tpm = windows.token_sum + cost > self.max_tpm;
        if !over_rpm && !over_tpm {
            return None;
        }
        // Earliest expiry that could free enough budget, with a small
        // floor to avoid busy-looping.
        let next_req = windows.requests.front().map(|&t| t + WINDOW);
        let next_tok = windows.tokens.front().map(|&(t, _)| t + WINDOW);
        let earliest = match (next_req, next_tok) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => now + Duration::from_millis(10),
        };
        Some(earliest.max(now + Duration::from_millis(10)))
    }
}

/// Per-caller inter-request pacing. Not shared: each worker owns one.
pub struct Pacer {
    min_gap: Duration,
    last: Option<Instant>,
}

impl Pacer {
    /// Sleep out the remainder of the gap since this caller's previous
    /// request, then mark a new one.
    pub async fn pace(&mut self) {
        if let Some(last) = self.last {
            let free_at = last + self.min_gap;
            if free_at > Instant::now() {
                tokio::time::sleep_until(free_at).await;
            }
        }
        self.last = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_estimate() {
        assert_eq!(estimate_tokens(""), 1);
        // 8 chars / 4 = 2, 1 word
        assert_eq!(estimate_tokens("abcdefgh"), 2);
        // 5 single-char words: word count dominates
        assert_eq!(estimate_tokens("a b c d e"), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn request_window_blocks_third_request() {
        let limiter = RateLimiter::new(2, 1_000_000);
        let start = Instant::now();
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        // Third acquisition must wait until the first expires from the
        // 60-second window.
        limiter.acquire(1).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn token_window_blocks_over_budget() {
        let limiter = RateLimiter::new(1000, 100);
        let start = Instant::now();
        limiter.acquire(60).await;
        limiter.acquire(60).await;
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_spreads_a_single_caller() {
        // 60 rpm -> one second between one caller's requests
        let limiter = RateLimiter::new(60, 1_000_000);
        let mut pacer = limiter.pacer();
        let start = Instant::now();
        pacer.pace().await;
        pacer.pace().await;
        assert!(start.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn window_drains_over_time() {
        let limiter = RateLimiter::new(2, 1_000_000);
        limiter.acquire(1).await;
        limiter.acquire(1).await;
        tokio::time::sleep(Duration::from_secs(61)).await;
        let start = Instant::now();
        limiter.acquire(1).await;
        // Window drained; no extra wait
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
