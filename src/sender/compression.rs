use base64::prelude::*;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CompressionError {
    #[error("IO error during compression: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("Decompressed payload is not UTF-8: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Gzip-compresses the UTF-8 bytes of `text` and base64-encodes the result.
pub fn compress_and_encode(text: &str) -> Result<String, CompressionError> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(text.len() / 2), Compression::default());
    encoder.write_all(text.as_bytes())?;
    let compressed = encoder.finish()?;

    Ok(BASE64_STANDARD.encode(compressed))
}

/// Inverse of [`compress_and_encode`].
pub fn decode_and_decompress(encoded: &str) -> Result<String, CompressionError> {
    let compressed = BASE64_STANDARD.decode(encoded.trim())?;

    let mut decoder = GzDecoder::new(compressed.as_slice());
    let mut bytes = Vec::new();
    decoder.read_to_end(&mut bytes)?;

    Ok(String::from_utf8(bytes)?)
}
