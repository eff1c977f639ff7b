// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! HTTP client for the per-request embedding endpoint.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::limiter::RateLimiter;

const MAX_RETRIES: u32 = 3;
const BASE_DELAY: Duration = Duration::from_secs(1);
const THROTTLE_BREAK_THRESHOLD: u32 = 5;
const THROTTLE_COOLDOWN: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Embedding client settings; every field maps onto a run-configuration
/// option.
#[derive(Debug, Clone)]
pub struct EmbedSettings {
    /// Service base URL, e.g. `https://generativelanguage.googleapis.com/v1beta`
    pub host: String,
    pub model_id: String,
    pub api_key: String,
    pub output_dimension: usize,
    pub task_type: String,
    pub max_rpm: usize,
    pub max_tpm: u64,
    pub max_concurrent_requests: usize,
}

impl Default for EmbedSettings {
    fn default() -> Self {
        EmbedSettings {
            host: "https://generativelanguage.googleapis.com/v1beta".to_string(),
            model_id: "gemini-embedding-001".to_string(),
            api_key: String::new(),
            output_dimension: 256,
            task_type: "SEMANTIC_SIMILARITY".to_string(),
            max_rpm: 600,
            max_tpm: 300_000,
            max_concurrent_requests: 10,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedRequest<'a> {
    model: String,
    content: Content<'a>,
    task_type: &'a str,
    output_dimensionality: usize,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: [Part<'a>; 1],
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    embedding: Option<Embedding>,
}

#[derive(Deserialize)]
struct Embedding {
    values: Vec<f32>,
}

/// Retrying, rate-limited client for the remote embedding service.
#[derive(Debug)]
pub struct EmbedClient {
    http: reqwest::Client,
    settings: EmbedSettings,
    pub(crate) limiter: RateLimiter,
    /// Consecutive-throttle counter driving the circuit breaker
    throttle_streak: AtomicU32,
}

impl EmbedClient {
    pub fn new(settings: EmbedSettings) -> Result<Self> {
        if settings.api_key.is_empty() {
            return Err(Error::Misconfiguration {
                reason: "embedding API key is not set".to_string(),
            });
        }
        if settings.output_dimension == 0 {
            return Err(Error::Misconfiguration {
                reason: "output dimension must be nonzero".to_string(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Misconfiguration {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        let limiter = RateLimiter::new(settings.max_rpm, settings.max_tpm);
        debug!(
            model = settings.model_id,
            rpm = settings.max_rpm,
            tpm = settings.max_tpm,
            concurrency = settings.max_concurrent_requests,
            dim = settings.output_dimension,
            "initialized embedding client"
        );
        Ok(EmbedClient {
            http,
            settings,
            limiter,
            throttle_streak: AtomicU32::new(0),
        })
    }

    pub fn settings(&self) -> &EmbedSettings {
        &self.settings
    }

    /// Probe the model with a trivial request. The only fatal failure
    /// mode of the client: everything after the probe degrades
    /// per-record instead.
    pub async fn probe(&self) -> Result<()> {
        self.embed_with_retry("test").await.map_err(|e| Error::Unreachable {
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Embed one text with retries, jittered backoff, and the
    /// sustained-throttle circuit breaker.
    pub async fn embed_with_retry(&self, text: &str) -> Result<Vec<f32>> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.embed_once(text).await {
                Ok(vector) => {
                    self.throttle_streak.store(0, Ordering::Relaxed);
                    return Ok(vector);
                }
                Err(err) => {
                    if matches!(err, Error::Throttled) {
                        let streak = self.throttle_streak.fetch_add(1, Ordering::Relaxed) + 1;
                        if streak >= THROTTLE_BREAK_THRESHOLD {
                            warn!(streak, "sustained throttling, cooling down 10s");
                            tokio::time::sleep(THROTTLE_COOLDOWN).await;
                            self.throttle_streak.store(0, Ordering::Relaxed);
                        }
                    }
                    last_err = Some(err);
                    if attempt + 1 < MAX_RETRIES {
                        let delay = BASE_DELAY * 2u32.pow(attempt);
                        let jitter = delay.mul_f64(rand::rng().random_range(0.0..0.25));
                        tokio::time::sleep(delay + jitter).await;
                    }
                }
            }
        }
        Err(last_err.expect("at least one attempt was made"))
    }

    /// One request against `POST <host>/models/<model>:embedContent`.
    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!(
            "{}/models/{}:embedContent",
            self.settings.host.trim_end_matches('/'),
            self.settings.model_id
        );
        let body = EmbedRequest {
            model: format!("models/{}", self.settings.model_id),
            content: Content {
                parts: [Part { text }],
            },
            task_type: &self.settings.task_type,
            output_dimensionality: self.settings.output_dimension,
        };

        let response = self
            .http
            .post(&url)
            .header("x-goog-api-key", &self.settings.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() == 429 {
            warn!("embedding request was throttled");
            return Err(Error::Throttled);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::HttpStatus {
                status: status.as_u16(),
                body: body.chars().take(500).collect(),
            });
        }

        let parsed: EmbedResponse = response.json().await?;
        let values = parsed
            .embedding
            .map(|e| e.values)
            .filter(|v| !v.is_empty())
            .ok_or(Error::EmptyResponse)?;
        if values.len() != self.settings.output_dimension {
            return Err(Error::DimensionMismatch {
                expected: self.settings.output_dimension,
                got: values.len(),
            });
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn construction_requires_api_key() {
        let err = EmbedClient::new(EmbedSettings::default()).unwrap_err();
        assert!(matches!(err, Error::Misconfiguration { .. }));

        let ok = EmbedClient::new(EmbedSettings {
            api_key: "k".into(),
            ..EmbedSettings::default()
        });
        assert!(ok.is_ok());
    }

    #[test]
    fn request_body_shape() {
        let body = EmbedRequest {
            model: "models/gemini-embedding-001".into(),
            content: Content {
                parts: [Part { text: "hello" }],
            },
            task_type: "SEMANTIC_SIMILARITY",
            output_dimensionality: 256,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["content"]["parts"][0]["text"], "hello");
        assert_eq!(json["outputDimensionality"], 256);
        assert_eq!(json["taskType"], "SEMANTIC_SIMILARITY");
    }
}
