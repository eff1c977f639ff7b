// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! S3 operations with retry and bounded-parallel tree transfer.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aws_sdk_s3::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{Delete, ObjectIdentifier};
use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::compress::brotli_compress;
use crate::error::{Error, Result};

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);
/// S3 batch-delete hard limit
const BATCH_DELETE_MAX: usize = 1000;
/// Default brotli quality for JSON payloads
pub const JSON_BROTLI_QUALITY: u32 = 5;

/// Content metadata attached to a blob.
#[derive(Debug, Clone, Default)]
pub struct BlobOptions {
    pub content_type: Option<String>,
    pub content_encoding: Option<String>,
    pub metadata: Vec<(String, String)>,
}

impl BlobOptions {
    pub fn json_brotli() -> Self {
        BlobOptions {
            content_type: Some("application/json".to_string()),
            content_encoding: Some("br".to_string()),
            metadata: Vec::new(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: &str) -> Self {
        self.metadata.push((key.to_string(), value.to_string()));
        self
    }
}

/// One bucket of an S3-compatible object store.
#[derive(Clone)]
pub struct ObjectStore {
    client: aws_sdk_s3::Client,
    bucket: String,
}

impl ObjectStore {
    /// Connect using the environment's credential chain.
    pub async fn connect(bucket: &str) -> Self {
        let config = aws_config::load_from_env().await;
        ObjectStore {
            client: aws_sdk_s3::Client::new(&config),
            bucket: bucket.to_string(),
        }
    }

    /// Wrap an existing client (tests, custom endpoints).
    pub fn with_client(client: aws_sdk_s3::Client, bucket: &str) -> Self {
        ObjectStore {
            client,
            bucket: bucket.to_string(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Upload a blob.
    pub async fn put_blob(&self, key: &str, bytes: Vec<u8>, options: &BlobOptions) -> Result<()> {
        let context = format!("put s3://{}/{key}", self.bucket);
        retry(&context, || {
            let mut request = self
                .client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(bytes.clone().into());
            if let Some(content_type) = &options.content_type {
                request = request.content_type(content_type);
            }
            if let Some(content_encoding) = &options.content_encoding {
                request = request.content_encoding(content_encoding);
            }
            for (k, v) in &options.metadata {
                request = request.metadata(k, v);
            }
            async move { request.send().await.map(|_| ()) }
        })
        .await
    }

    /// Brotli-compress a JSON payload and upload it with matching
    /// content headers.
    pub async fn put_json_brotli(
        &self,
        key: &str,
        json: &[u8],
        quality: u32,
        options: BlobOptions,
    ) -> Result<()> {
        let compressed = brotli_compress(json, quality)?;
        debug!(
            key,
            raw = json.len(),
            compressed = compressed.len(),
            "uploading compressed JSON blob"
        );
        let options = BlobOptions {
            content_type: options.content_type.or_else(|| Some("application/json".into())),
            content_encoding: Some("br".to_string()),
            metadata: options.metadata,
        };
        self.put_blob(key, compressed, &options).await
    }

    /// Download a blob.
    pub async fn get_blob(&self, key: &str) -> Result<Vec<u8>> {
        let context = format!("get s3://{}/{key}", self.bucket);
        let body = retry(&context, || async {
            self.client
                .get_object()
                .bucket(&self.bucket)
                .key(key)
                .send()
                .await
        })
        .await?;
        body.body
            .collect()
            .await
            .map(|data| data.into_bytes().to_vec())
            .map_err(|e| Error::Transient {
                context,
                message: e.to_string(),
            })
    }

    /// List every key under a prefix, paginating as needed.
    pub async fn list_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let context = format!("list s3://{}/{prefix}", self.bucket);
        let mut keys = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let token = continuation.clone();
            let page = retry(&context, || {
                let mut request = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(prefix);
                if let Some(token) = &token {
                    request = request.continuation_token(token);
                }
                async move { request.send().await }
            })
            .await?;
            for object in page.contents() {
                if let Some(key) = object.key() {
                    keys.push(key.to_string());
                }
            }
            match page.next_continuation_token() {
                Some(token) => continuation = Some(token.to_string()),
                None => break,
            }
        }
        Ok(keys)
    }

    /// Delete up to 1000 keys per service call.
    pub async fn batch_delete(&self, keys: &[String]) -> Result<usize> {
        let mut deleted = 0usize;
        for chunk in keys.chunks(BATCH_DELETE_MAX) {
            let context = format!("batch-delete {} keys in {}", chunk.len(), self.bucket);
            let objects: Vec<ObjectIdentifier> = chunk
                .iter()
                .map(|key| {
                    ObjectIdentifier::builder()
                        .key(key)
                        .build()
                        .map_err(|e| Error::Permanent {
                            context: context.clone(),
                            message: e.to_string(),
                        })
                })
                .collect::<Result<_>>()?;
            let delete = Delete::builder()
                .set_objects(Some(objects))
                .build()
                .map_err(|e| Error::Permanent {
                    context: context.clone(),
                    message: e.to_string(),
                })?;
            retry(&context, || {
                let delete = delete.clone();
                async move {
                    self.client
                        .delete_objects()
                        .bucket(&self.bucket)
                        .delete(delete)
                        .send()
                        .await
                }
            })
            .await?;
            deleted += chunk.len();
        }
        Ok(deleted)
    }

    /// Delete everything under a prefix.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        let keys = self.list_prefix(prefix).await?;
        if keys.is_empty() {
            debug!(prefix, "no objects to delete");
            return Ok(0);
        }
        let deleted = self.batch_delete(&keys).await?;
        info!(deleted, prefix, "cleared prefix");
        Ok(deleted)
    }

    /// Upload a local directory tree under a key prefix with bounded
    /// parallelism. Files keep their relative paths.
    pub async fn upload_tree(
        &self,
        local_dir: &Path,
        key_prefix: &str,
        concurrency: usize,
    ) -> Result<usize> {
        let files = walk_files(local_dir)?;
        let total = files.len();
        let prefix = key_prefix.trim_end_matches('/');

        let uploads = futures::stream::iter(files.into_iter().map(|path| {
            let relative = path
                .strip_prefix(local_dir)
                .expect("walked file is under the root")
                .to_string_lossy()
                .replace('\\', "/");
            let key = format!("{prefix}/{relative}");
            async move {
                let bytes = tokio::fs::read(&path).await.map_err(|e| Error::LocalFile {
                    context: "read for upload".to_string(),
                    path: path.clone(),
                    source: e,
                })?;
                self.put_blob(&key, bytes, &BlobOptions::default()).await
            }
        }))
        .buffer_unordered(concurrency.max(1));

        let results: Vec<Result<()>> = uploads.collect().await;
        for result in results {
            result?;
        }
        info!(files = total, prefix = key_prefix, "tree upload complete");
        Ok(total)
    }

    /// Download everything under a key prefix into a local directory.
    pub async fn download_tree(
        &self,
        key_prefix: &str,
        local_dir: &Path,
        concurrency: usize,
    ) -> Result<usize> {
        let prefix = format!("{}/", key_prefix.trim_end_matches('/'));
        let keys = self.list_prefix(&prefix).await?;
        let total = keys.len();

        let downloads = futures::stream::iter(keys.into_iter().map(|key| {
            let relative = key[prefix.len()..].to_string();
            let target = local_dir.join(&relative);
            async move {
                if relative.is_empty() {
                    return Ok(());
                }
                if let Some(parent) = target.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .map_err(|e| Error::LocalFile {
                            context: "create download directory".to_string(),
                            path: parent.to_path_buf(),
                            source: e,
                        })?;
                }
                let bytes = self.get_blob(&key).await?;
                tokio::fs::write(&target, bytes)
                    .await
                    .map_err(|e| Error::LocalFile {
                        context: "write downloaded object".to_string(),
                        path: target.clone(),
                        source: e,
                    })
            }
        }))
        .buffer_unordered(concurrency.max(1));

        let results: Vec<Result<()>> = downloads.collect().await;
        for result in results {
            result?;
        }
        info!(objects = total, prefix = key_prefix, "tree download complete");
        Ok(total)
    }
}

/// Collect all regular files under `root`, recursively.
fn walk_files(root: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| Error::LocalFile {
            context: "read directory".to_string(),
            path: dir.clone(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| Error::LocalFile {
                context: "read directory entry".to_string(),
                path: dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                files.push(path);
            }
        }
    }
    Ok(files)
}

/// Service error codes worth retrying.
const TRANSIENT_CODES: [&str; 5] = [
    "SlowDown",
    "InternalError",
    "RequestTimeout",
    "ServiceUnavailable",
    "ThrottlingException",
];

fn is_transient<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(_) => err
            .code()
            .is_some_and(|code| TRANSIENT_CODES.contains(&code)),
        _ => false,
    }
}

/// Run an SDK call with up to three attempts and exponential backoff on
/// transient failures.
async fn retry<T, E, R, Fut, F>(context: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, SdkError<E, R>>>,
    E: ProvideErrorMetadata + std::fmt::Debug,
    R: std::fmt::Debug,
{
    let mut delay = RETRY_BASE_DELAY;
    let mut attempt = 0;
    loop {
        attempt += 1;
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let transient = is_transient(&err);
                let message = err
                    .message()
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("{err:?}"));
                if transient && attempt < RETRY_ATTEMPTS {
                    warn!("{context} failed ({message}), retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    continue;
                }
                return Err(if transient {
                    Error::Transient {
                        context: context.to_string(),
                        message,
                    }
                } else {
                    Error::Permanent {
                        context: context.to_string(),
                        message,
                    }
                });
            }
        }
    }
}
