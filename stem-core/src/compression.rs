//! zlib / gzip helpers for compressed handshake payloads and message bodies.

use std::io::{Read, Write};

use flate2::Compression;
use flate2::read::{GzDecoder, ZlibDecoder};
use flate2::write::ZlibEncoder;

use crate::error::StemError;

fn is_zlib(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0x78 && matches!(data[1], 0x01 | 0x5E | 0x9C | 0xDA)
}

fn is_gzip(data: &[u8]) -> bool {
    data.len() > 2 && data[0] == 0x1F && data[1] == 0x8B
}

/// Returns `true` if `data` starts with a zlib or gzip magic header.
pub fn is_compressed(data: &[u8]) -> bool {
    is_zlib(data) || is_gzip(data)
}

/// Decompress a zlib or gzip payload.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, StemError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let result = if is_gzip(data) {
        GzDecoder::new(data).read_to_end(&mut out)
    } else {
        ZlibDecoder::new(data).read_to_end(&mut out)
    };
    result.map_err(|e| StemError::Compression(e.to_string()))?;
    Ok(out)
}

/// Compress `data` as a zlib stream.
pub fn deflate(data: &[u8]) -> Result<Vec<u8>, StemError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .and_then(|_| encoder.finish())
        .map_err(|e| StemError::Compression(e.to_string()))
}
