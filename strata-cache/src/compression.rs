//! zstd framing for the Compressed tier.

use bytes::Bytes;
use strata_core::CacheError;

pub(crate) fn compress(key: &str, raw: &[u8], level: i32) -> Result<Bytes, CacheError> {
    zstd::bulk::compress(raw, level)
        .map(Bytes::from)
        .map_err(|e| CacheError::Compression {
            key: key.to_string(),
            reason: e.to_string(),
        })
}

/// Decompress a frame whose original length is `raw_size`.
pub(crate) fn decompress(key: &str, frame: &[u8], raw_size: usize) -> Result<Bytes, CacheError> {
    let out = zstd::bulk::decompress(frame, raw_size).map_err(|e| CacheError::Compression {
        key: key.to_string(),
        reason: e.to_string(),
    })?;
    if out.len() != raw_size {
        return Err(CacheError::Compression {
            key: key.to_string(),
            reason: format!("decompressed {} bytes, expected {}", out.len(), raw_size),
        });
    }
    Ok(Bytes::from(out))
}
