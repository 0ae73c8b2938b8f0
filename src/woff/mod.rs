//! WOFF2 container structures and per-table transforms

pub(crate) mod glyf_decoder;
pub(crate) mod glyf_encoder;
pub(crate) mod headers;
pub(crate) mod hmtx_decoder;
pub(crate) mod hmtx_encoder;

/// A single outline point of a simple glyph, with absolute coordinates
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Point {
    pub x: i32,
    pub y: i32,
    pub on_curve: bool,
}

// Simple glyph flag bits
// <https://learn.microsoft.com/en-us/typography/opentype/spec/glyf#simple-glyph-description>
pub(crate) const GLYF_ON_CURVE: u8 = 1 << 0;
pub(crate) const GLYF_X_SHORT: u8 = 1 << 1;
pub(crate) const GLYF_Y_SHORT: u8 = 1 << 2;
pub(crate) const GLYF_REPEAT: u8 = 1 << 3;
pub(crate) const GLYF_THIS_X_IS_SAME: u8 = 1 << 4;
pub(crate) const GLYF_THIS_Y_IS_SAME: u8 = 1 << 5;
pub(crate) const GLYF_OVERLAP_SIMPLE: u8 = 1 << 6;

// Composite glyph flag bits
// <https://learn.microsoft.com/en-us/typography/opentype/spec/glyf#composite-glyph-description>
pub(crate) const FLAG_ARG_1_AND_2_ARE_WORDS: u16 = 1 << 0;
pub(crate) const FLAG_WE_HAVE_A_SCALE: u16 = 1 << 3;
pub(crate) const FLAG_MORE_COMPONENTS: u16 = 1 << 5;
pub(crate) const FLAG_WE_HAVE_AN_X_AND_Y_SCALE: u16 = 1 << 6;
pub(crate) const FLAG_WE_HAVE_A_TWO_BY_TWO: u16 = 1 << 7;
pub(crate) const FLAG_WE_HAVE_INSTRUCTIONS: u16 = 1 << 8;

/// Number of substreams in a transformed glyf table
pub(crate) const NUM_SUB_STREAMS: usize = 7;

/// Bit 0 of the transformed glyf optionFlags field: an overlap-simple
/// bitmap follows the substreams
pub(crate) const FLAG_OVERLAP_SIMPLE_BITMAP: u16 = 1 << 0;

/// Size in bytes of the bitmap with one bit per glyph, padded to a 4-byte boundary
pub(crate) fn bbox_bitmap_size(num_glyphs: u16) -> usize {
    ((num_glyphs as usize + 31) >> 5) << 2
}

/// Size in bytes of the overlap-simple bitmap (one bit per glyph, byte padded)
pub(crate) fn overlap_bitmap_size(num_glyphs: u16) -> usize {
    (num_glyphs as usize + 7) >> 3
}
