// SPDX-FileCopyrightText: 2025 The nixdex authors
// SPDX-License-Identifier: MIT

//! Brotli helpers for JSON payload artifacts.

use std::io::Write;

use crate::error::{Error, Result};

const BROTLI_BUFFER: usize = 4096;
/// Window size; 22 is the brotli default
const BROTLI_LGWIN: u32 = 22;

/// Compress `data` at the given quality (5-6 for JSON payloads here).
pub fn brotli_compress(data: &[u8], quality: u32) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    {
        let mut writer =
            brotli::CompressorWriter::new(&mut out, BROTLI_BUFFER, quality, BROTLI_LGWIN);
        writer.write_all(data).map_err(|e| Error::Compression {
            context: "compression".to_string(),
            source: e,
        })?;
        writer.flush().map_err(|e| Error::Compression {
            context: "compression".to_string(),
            source: e,
        })?;
    }
    Ok(out)
}

/// Decompress a brotli payload.
pub fn brotli_decompress(data: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut reader = std::io::Cursor::new(data);
    brotli::BrotliDecompress(&mut reader, &mut out).map_err(|e| Error::Compression {
        context: "decompression".to_string(),
        source: e,
    })?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let payload = br#"{"hello":"world","list":[1,2,3,1,2,3,1,2,3]}"#.repeat(50);
        let compressed = brotli_compress(&payload, 6).unwrap();
        assert!(compressed.len() < payload.len());
        assert_eq!(brotli_decompress(&compressed).unwrap(), payload);
    }

    #[test]
    fn empty_payload() {
        let compressed = brotli_compress(b"", 5).unwrap();
        assert_eq!(brotli_decompress(&compressed).unwrap(), b"");
    }
}
