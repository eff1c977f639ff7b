// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Combination of per-shard JSONL output into one stream.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use nixdex_model::{RawPackage, StreamMetadata};

use crate::error::{Error, Result};

/// Concatenate per-shard JSONL files into `output`, deduplicating on
/// `(attrPath joined, name)` and keeping the first occurrence. Lines that
/// fail to parse are logged and skipped. Returns the record count.
pub fn combine_shard_output(shard_files: &[PathBuf], output: &Path) -> Result<usize> {
    let out_file = std::fs::File::create(output).map_err(|e| Error::OutputFile {
        path: output.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(out_file);

    let mut seen: HashSet<(String, String)> = HashSet::new();
    let mut total = 0usize;
    let mut duplicates = 0usize;

    for shard_file in shard_files {
        let file = std::fs::File::open(shard_file).map_err(|e| Error::OutputFile {
            path: shard_file.clone(),
            source: e,
        })?;
        for (line_no, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| Error::io("failed to read shard output", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let record: RawPackage = match serde_json::from_str(&line) {
                Ok(record) => record,
                Err(err) => {
                    warn!(
                        file = %shard_file.display(),
                        line = line_no + 1,
                        "skipping malformed record: {err}"
                    );
                    continue;
                }
            };
            if !seen.insert(record.dedup_key()) {
                duplicates += 1;
                continue;
            }
            writer
                .write_all(line.as_bytes())
                .and_then(|()| writer.write_all(b"\n"))
                .map_err(|e| Error::io("failed to write combined output", e))?;
            total += 1;
        }
    }
    writer
        .flush()
        .map_err(|e| Error::io("failed to flush combined output", e))?;

    info!(
        total,
        duplicates,
        shards = shard_files.len(),
        "combined shard output"
    );
    Ok(total)
}

/// Rewrite `path` with the metadata object as its first line.
pub(crate) fn prepend_metadata(path: &Path, metadata: &StreamMetadata) -> Result<()> {
    let body = std::fs::read(path).map_err(|e| Error::OutputFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let out_file = std::fs::File::create(path).map_err(|e| Error::OutputFile {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut writer = BufWriter::new(out_file);
    writer
        .write_all(metadata.to_jsonl_line().as_bytes())
        .and_then(|()| writer.write_all(b"\n"))
        .and_then(|()| writer.write_all(&body))
        .and_then(|()| writer.flush())
        .map_err(|e| Error::io("failed to prepend stream metadata", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_lines(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n")).unwrap();
        path
    }

    #[test]
    fn combine_dedupes_and_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let a = write_lines(
            dir.path(),
            "a.jsonl",
            &[
                r#"{"attrPath":["hello"],"name":"hello-2.12","drvPath":"/nix/store/a.drv","inputDrvs":{}}"#,
                "not json at all",
                r#"{"attrPath":["zlib"],"name":"zlib-1.3","drvPath":"/nix/store/z.drv","inputDrvs":{}}"#,
            ],
        );
        let b = write_lines(
            dir.path(),
            "b.jsonl",
            &[
                // Duplicate of the first record in a.jsonl
                r#"{"attrPath":["hello"],"name":"hello-2.12","drvPath":"/nix/store/a2.drv","inputDrvs":{}}"#,
                r#"{"attrPath":["jq"],"name":"jq-1.7","drvPath":"/nix/store/j.drv","inputDrvs":{}}"#,
            ],
        );

        let output = dir.path().join("combined.jsonl");
        let total = combine_shard_output(&[a, b], &output).unwrap();
        assert_eq!(total, 3);

        let metadata = StreamMetadata {
            extraction_timestamp: "t".into(),
            nixpkgs_branch: "release-25.05".into(),
            total_packages: total,
            extractor_version: "v1".into(),
        };
        prepend_metadata(&output, &metadata).unwrap();

        let content = std::fs::read_to_string(&output).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert_eq!(StreamMetadata::from_jsonl_line(lines[0]), Some(metadata));
        // First occurrence wins
        assert!(lines[1].contains("/nix/store/a.drv"));
    }

    #[test]
    fn empty_input_yields_empty_stream() {
        let dir = tempfile::tempdir().unwrap();
        let empty = write_lines(dir.path(), "empty.jsonl", &[]);
        let output = dir.path().join("combined.jsonl");
        assert_eq!(combine_shard_output(&[empty], &output).unwrap(), 0);
    }
}
