//! Entropy compression adapter
//!
//! Wraps the external brotli coder behind the narrow interface the codec
//! needs: compress a blob, or expand a blob to an exact byte count. The
//! coder's internals are not this crate's concern.

use std::io::Write;

use brotli::enc::BrotliEncoderParams;
use brotli_decompressor::DecompressorWriter;

use crate::error::{Woff2Error, bail_if, bail_with_msg_if};

/// Brotli quality used for encoding. Matches the reference encoder.
const BROTLI_QUALITY: i32 = 11;

const MAX_WINDOW_BITS: i32 = 24;
const MIN_WINDOW_BITS: i32 = 10;

// Over 14k test fonts the max compression ratio seen to date was ~20.
// >100 suggests a bad uncompressed size.
const MAX_PLAUSIBLE_COMPRESSION_RATIO: f32 = 100.0;

/// Compress `data` into a single brotli stream.
pub(crate) fn compress(data: &[u8]) -> Result<Vec<u8>, Woff2Error> {
    let mut params = BrotliEncoderParams::default();
    params.quality = BROTLI_QUALITY;
    params.lgwin = window_bits(data.len());

    let mut input = data;
    let mut output: Vec<u8> = Vec::with_capacity(data.len() / 2 + 16);
    brotli::BrotliCompress(&mut input, &mut output, &params)
        .map_err(|_| Woff2Error::CompressionFailure)?;

    Ok(output)
}

/// Decompress `compressed`, requiring that it expands to exactly
/// `expected_len` bytes. Any other byte count is a hard failure, never
/// silently truncated or padded.
pub(crate) fn decompress_exact(
    compressed: &[u8],
    expected_len: usize,
) -> Result<Vec<u8>, Woff2Error> {
    // Sanity-check the claimed expansion before doing any work
    let ratio = (expected_len as f32) / (compressed.len().max(1) as f32);
    bail_with_msg_if!(
        ratio > MAX_PLAUSIBLE_COMPRESSION_RATIO,
        "Implausible compression ratio {:.1}",
        ratio
    );

    let mut output: Vec<u8> = Vec::with_capacity(expected_len);
    let mut decompressor = DecompressorWriter::new(&mut output, 4096);
    decompressor
        .write_all(compressed)
        .map_err(|_| Woff2Error::CompressionFailure)?;
    decompressor
        .close()
        .map_err(|_| Woff2Error::CompressionFailure)?;
    drop(decompressor);

    bail_if!(output.len() != expected_len, CompressionFailure);

    Ok(output)
}

/// Brotli window size derived from the input size, capped at the format maximum
fn window_bits(input_len: usize) -> i32 {
    let bits = (usize::BITS - input_len.leading_zeros()) as i32;
    bits.clamp(MIN_WINDOW_BITS, MAX_WINDOW_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip() {
        let data: Vec<u8> = (0..2048u32).map(|i| (i % 251) as u8).collect();
        let compressed = compress(&data).unwrap();
        assert!(compressed.len() < data.len());
        let decompressed = decompress_exact(&compressed, data.len()).unwrap();
        assert_eq!(decompressed, data);
    }

    #[test]
    fn wrong_expected_size_is_a_failure() {
        let data = vec![7u8; 512];
        let compressed = compress(&data).unwrap();
        assert_eq!(
            decompress_exact(&compressed, data.len() + 1),
            Err(Woff2Error::CompressionFailure)
        );
        assert_eq!(
            decompress_exact(&compressed, data.len() - 1),
            Err(Woff2Error::CompressionFailure)
        );
    }

    #[test]
    fn implausible_ratio_is_rejected() {
        let compressed = [0u8; 4];
        assert!(decompress_exact(&compressed, 1 << 20).is_err());
    }
}
