//! OpenType table checksums
//!
//! <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#calculating-checksums>

/// The constant the whole-font checksum is subtracted from to produce the
/// `head` table's checkSumAdjustment field.
pub(crate) const CHECKSUM_ADJUSTMENT_BASE: u32 = 0xB1B0AFBA;

/// Byte offset of the checkSumAdjustment field within the 'head' table
pub(crate) const CHECKSUM_ADJUSTMENT_OFFSET: usize = 8;

/// Compute the rolling 32-bit checksum of a byte slice.
///
/// The checksum is the wrapping sum of the data interpreted as big-endian
/// u32 words. A trailing partial word is treated as if zero-padded to 4 bytes.
pub(crate) fn compute_checksum(buf: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    let mut iter = buf.chunks_exact(4);
    for chunk in &mut iter {
        let word = ((chunk[0] as u32) << 24)
            | ((chunk[1] as u32) << 16)
            | ((chunk[2] as u32) << 8)
            | (chunk[3] as u32);
        checksum = checksum.wrapping_add(word);
    }

    // The zero padding doesn't contribute to the sum itself. It only shifts
    // the trailing bytes into their big-endian word positions.
    let word = match iter.remainder() {
        &[a, b, c] => ((a as u32) << 24) | ((b as u32) << 16) | ((c as u32) << 8),
        &[a, b] => ((a as u32) << 24) | ((b as u32) << 16),
        &[a] => (a as u32) << 24,
        _ => 0,
    };

    checksum.wrapping_add(word)
}

#[cfg(test)]
mod tests {
    use super::compute_checksum;

    #[test]
    fn whole_words() {
        assert_eq!(compute_checksum(&[0, 0, 0, 1, 0, 0, 0, 2]), 3);
        assert_eq!(compute_checksum(&[0x12, 0x34, 0x56, 0x78]), 0x12345678);
    }

    #[test]
    fn trailing_bytes_are_zero_padded() {
        assert_eq!(compute_checksum(&[0x12]), 0x12000000);
        assert_eq!(compute_checksum(&[0x12, 0x34]), 0x12340000);
        assert_eq!(compute_checksum(&[0x12, 0x34, 0x56]), 0x12345600);
        assert_eq!(
            compute_checksum(&[0x12, 0x34, 0x56, 0x78, 0x9A]),
            0x12345678u32.wrapping_add(0x9A000000)
        );
    }

    #[test]
    fn sum_wraps() {
        let data = [0xFF, 0xFF, 0xFF, 0xFF, 0x00, 0x00, 0x00, 0x02];
        assert_eq!(compute_checksum(&data), 1);
    }

    #[test]
    fn empty() {
        assert_eq!(compute_checksum(&[]), 0);
    }
}
