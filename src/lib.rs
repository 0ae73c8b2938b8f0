//! Pure Rust WOFF2 encoder and decoder
//!
//! Converts SFNT fonts (TTF/OTF, single fonts or TrueType collections) into
//! the WOFF2 web font format and back. Decoding a file produced by
//! [`compress_woff2`] yields the original font byte for byte: whenever a
//! WOFF2 preprocessing transform would not reproduce a table exactly, the
//! encoder stores that table untransformed instead.

mod checksum;
mod compress;
mod decompress;
mod entropy;
mod error;
mod sfnt;
mod table_tags;
mod variable_length;
mod woff;

pub use compress::compress_woff2;
pub use decompress::{compute_woff2_final_size, decompress_woff2};
pub use error::Woff2Error;

/// Upper bound on the size of the WOFF2 encoding of an sfnt of `length` bytes.
///
/// Brotli can expand incompressible input slightly, and the WOFF2 header and
/// table directory add a little on top. The margin covers both.
pub fn max_woff2_compressed_size(length: usize) -> usize {
    length + 1024
}

/// Encode an sfnt font into `result`, returning the number of bytes written.
///
/// Fails with [`Woff2Error::CapacityInsufficient`] if `result` is too small;
/// nothing is written to `result` on any failure. Size `result` with
/// [`max_woff2_compressed_size`].
pub fn convert_ttf_to_woff2(data: &[u8], result: &mut [u8]) -> Result<usize, Woff2Error> {
    let woff = compress_woff2(data)?;
    let dest = result
        .get_mut(..woff.len())
        .ok_or(Woff2Error::CapacityInsufficient)?;
    dest.copy_from_slice(&woff);
    Ok(woff.len())
}

/// Decode a WOFF2 font into `result`, returning the number of bytes written.
///
/// Fails with [`Woff2Error::CapacityInsufficient`] if `result` is too small;
/// nothing is written to `result` on any failure. Size `result` with
/// [`compute_woff2_final_size`].
pub fn convert_woff2_to_ttf(data: &[u8], result: &mut [u8]) -> Result<usize, Woff2Error> {
    let sfnt = decompress_woff2(data)?;
    let dest = result
        .get_mut(..sfnt.len())
        .ok_or(Woff2Error::CapacityInsufficient)?;
    dest.copy_from_slice(&sfnt);
    Ok(sfnt.len())
}

// Round a value up to the nearest multiple of 4. Don't round the value in the
// case that rounding up overflows.
//
// Implemented as a macro to make it generic over the type without horrible type bounds
macro_rules! Round4 {
    ($value:expr) => {
        match $value.checked_add(3) {
            Some(value_plus_3) => value_plus_3 & !3,
            None => $value,
        }
    };
}
pub(crate) use Round4;
