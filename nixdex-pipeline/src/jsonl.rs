//! Raw JSONL transport between the two stages.
//!
//! The stream is brotli-compressed in the object store; its first line
//! is a synthetic metadata object, every further line one raw package
//! record. Malformed lines are logged and skipped per the per-record
//! error policy.

use std::path::Path;

use tracing::{info, warn};

use nixdex_model::{RawPackage, StreamMetadata};
use nixdex_object_store::{BlobOptions, JSON_BROTLI_QUALITY, ObjectStore, brotli_decompress};

use crate::error::{PipelineError, Result};

/// Upload the combined JSONL file, brotli-compressed, with its metadata
/// echoed into the object's user metadata.
pub async fn upload_raw_jsonl(
    store: &ObjectStore,
    key: &str,
    jsonl_path: &Path,
    metadata: &StreamMetadata,
) -> Result<()> {
    let raw = tokio::fs::read(jsonl_path)
        .await
        .map_err(|e| PipelineError::io("failed to read combined JSONL", e))?;
    info!(
        key,
        packages = metadata.total_packages,
        mb = format!("{:.2}", raw.len() as f64 / 1024.0 / 1024.0),
        "uploading raw JSONL"
    );
    let options = BlobOptions::json_brotli()
        .with_metadata("extraction-timestamp", &metadata.extraction_timestamp)
        .with_metadata("package-count", &metadata.total_packages.to_string())
        .with_metadata("nixpkgs-branch", &metadata.nixpkgs_branch);
    store
        .put_json_brotli(key, &raw, JSON_BROTLI_QUALITY, options)
        .await?;
    Ok(())
}

/// Download and parse the raw stream. Returns the records and the
/// stream metadata (when the first line carries one).
pub async fn download_raw_jsonl(
    store: &ObjectStore,
    key: &str,
) -> Result<(Vec<RawPackage>, Option<StreamMetadata>)> {
    info!(key, "downloading raw JSONL");
    let compressed = store.get_blob(key).await?;
    let raw = brotli_decompress(&compressed)?;
    info!(
        mb = format!("{:.2}", raw.len() as f64 / 1024.0 / 1024.0),
        "decompressed raw JSONL"
    );
    let text = String::from_utf8_lossy(&raw);
    Ok(parse_raw_stream(&text))
}

/// Parse a raw JSONL stream.
pub fn parse_raw_stream(text: &str) -> (Vec<RawPackage>, Option<StreamMetadata>) {
    let mut metadata = None;
    let mut records = Vec::new();
    let mut malformed = 0usize;

    for (line_no, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        if line_no == 0
            && let Some(parsed) = StreamMetadata::from_jsonl_line(line)
        {
            metadata = Some(parsed);
            continue;
        }
        match serde_json::from_str::<RawPackage>(line) {
            Ok(record) => records.push(record),
            Err(err) => {
                malformed += 1;
                warn!(line = line_no + 1, "skipping malformed record: {err}");
            }
        }
    }

    info!(
        records = records.len(),
        malformed,
        has_metadata = metadata.is_some(),
        "parsed raw stream"
    );
    (records, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_with_metadata_line() {
        let meta = StreamMetadata {
            extraction_timestamp: "2025-06-01T00:00:00Z".into(),
            nixpkgs_branch: "release-25.05".into(),
            total_packages: 1,
            extractor_version: "v1".into(),
        };
        let text = format!(
            "{}\n{}\nnot-json\n",
            meta.to_jsonl_line(),
            r#"{"attrPath":["hello"],"name":"hello-2.12","drvPath":"","inputDrvs":{}}"#
        );
        let (records, parsed_meta) = parse_raw_stream(&text);
        assert_eq!(records.len(), 1);
        assert_eq!(parsed_meta, Some(meta));
    }

    #[test]
    fn metadata_only_stream_is_empty() {
        let meta = StreamMetadata::default();
        let (records, parsed) = parse_raw_stream(&meta.to_jsonl_line());
        assert!(records.is_empty());
        assert!(parsed.is_some());
    }

    #[test]
    fn empty_stream() {
        let (records, parsed) = parse_raw_stream("");
        assert!(records.is_empty());
        assert!(parsed.is_none());
    }
}
