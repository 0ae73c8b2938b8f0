//! End-to-end conversion tests over synthetic fonts built from scratch.

use bytes::BufMut;

use woffle::{
    Woff2Error, compress_woff2, compute_woff2_final_size, convert_ttf_to_woff2,
    convert_woff2_to_ttf, decompress_woff2, max_woff2_compressed_size,
};

const TRUETYPE_FLAVOR: u32 = 0x00010000;
const OTTO_FLAVOR: u32 = u32::from_be_bytes(*b"OTTO");

fn checksum(data: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    let mut chunks = data.chunks_exact(4);
    for chunk in &mut chunks {
        sum = sum.wrapping_add(u32::from_be_bytes(chunk.try_into().unwrap()));
    }
    let remainder = chunks.remainder();
    if !remainder.is_empty() {
        let mut last = [0u8; 4];
        last[..remainder.len()].copy_from_slice(remainder);
        sum = sum.wrapping_add(u32::from_be_bytes(last));
    }
    sum
}

fn pad4(len: usize) -> usize {
    (len + 3) & !3
}

/// Serialize a table directory plus padded table data. Tables must be given in
/// sorted tag order with their checkSumAdjustment (if any) zeroed.
fn build_sfnt_directory(flavor: u32, tables: &[([u8; 4], Vec<u8>)], data_start: usize) -> Vec<u8> {
    let num_tables = tables.len() as u16;
    let mut max_pow2: u16 = 0;
    while 1u32 << (max_pow2 + 1) <= num_tables as u32 {
        max_pow2 += 1;
    }
    let search_range = (1u16 << max_pow2) << 4;

    let mut out: Vec<u8> = Vec::new();
    out.put_u32(flavor);
    out.put_u16(num_tables);
    out.put_u16(search_range);
    out.put_u16(max_pow2);
    out.put_u16(num_tables * 16 - search_range);

    let mut offset = data_start;
    for (tag, data) in tables {
        out.extend_from_slice(tag);
        out.put_u32(checksum(data));
        out.put_u32(offset as u32);
        out.put_u32(data.len() as u32);
        offset += pad4(data.len());
    }
    out
}

/// Build a complete single-font TTF/OTF with correct checksums and
/// checkSumAdjustment.
fn build_sfnt(flavor: u32, tables: &[([u8; 4], Vec<u8>)]) -> Vec<u8> {
    let data_start = 12 + 16 * tables.len();
    let mut out = build_sfnt_directory(flavor, tables, data_start);

    let mut head_offset = None;
    for (tag, data) in tables {
        if tag == b"head" {
            head_offset = Some(out.len());
        }
        out.extend_from_slice(data);
        out.resize(pad4(out.len()), 0);
    }

    if let Some(head_offset) = head_offset {
        let adjustment = 0xB1B0AFBAu32.wrapping_sub(checksum(&out));
        out[head_offset + 8..head_offset + 12].copy_from_slice(&adjustment.to_be_bytes());
    }
    out
}

fn head_table(index_to_loc_format: u16) -> Vec<u8> {
    let mut t: Vec<u8> = Vec::with_capacity(54);
    t.put_u32(0x00010000); // version
    t.put_u32(0); // fontRevision
    t.put_u32(0); // checkSumAdjustment, patched once the whole font is built
    t.put_u32(0x5F0F3CF5); // magicNumber
    t.put_u16(0); // flags
    t.put_u16(1000); // unitsPerEm
    t.put_u64(0); // created
    t.put_u64(0); // modified
    t.put_i16(0); // xMin
    t.put_i16(0); // yMin
    t.put_i16(100); // xMax
    t.put_i16(90); // yMax
    t.put_u16(0); // macStyle
    t.put_u16(8); // lowestRecPPEM
    t.put_i16(2); // fontDirectionHint
    t.put_u16(index_to_loc_format);
    t.put_u16(0); // glyphDataFormat
    assert_eq!(t.len(), 54);
    t
}

fn hhea_table(num_hmetrics: u16) -> Vec<u8> {
    let mut t: Vec<u8> = Vec::with_capacity(36);
    t.put_u32(0x00010000); // version
    t.put_i16(800); // ascender
    t.put_i16(-200); // descender
    t.put_i16(0); // lineGap
    t.put_u16(600); // advanceWidthMax
    t.put_i16(0); // minLeftSideBearing
    t.put_i16(0); // minRightSideBearing
    t.put_i16(100); // xMaxExtent
    t.put_i16(1); // caretSlopeRise
    t.put_i16(0); // caretSlopeRun
    t.put_i16(0); // caretOffset
    t.put_u64(0); // reserved
    t.put_i16(0); // metricDataFormat
    t.put_u16(num_hmetrics);
    assert_eq!(t.len(), 36);
    t
}

fn maxp_table(num_glyphs: u16) -> Vec<u8> {
    let mut t: Vec<u8> = Vec::with_capacity(6);
    t.put_u32(0x00005000); // version 0.5
    t.put_u16(num_glyphs);
    t
}

/// One contour, three points: (10,10) on, (100,10) on, (50,90) off.
/// Padded to a 4-byte boundary, bbox matching the points.
fn triangle_glyph() -> Vec<u8> {
    let glyph: Vec<u8> = vec![
        0x00, 0x01, // numberOfContours
        0x00, 0x0A, 0x00, 0x0A, 0x00, 0x64, 0x00, 0x5A, // bbox 10,10,100,90
        0x00, 0x02, // endPtsOfContours
        0x00, 0x00, // instructionLength
        0x37, 0x33, 0x26, // flags
        0x0A, 0x5A, 0x32, // x deltas: 10, 90, -50
        0x0A, 0x50, // y deltas: 10, (same), 80
        0x00, 0x00, // pad
    ];
    assert_eq!(glyph.len(), 24);
    glyph
}

/// One contour, four on-curve points tracing a 50x50 square from the origin
fn square_glyph() -> Vec<u8> {
    let glyph: Vec<u8> = vec![
        0x00, 0x01, // numberOfContours
        0x00, 0x00, 0x00, 0x00, 0x00, 0x32, 0x00, 0x32, // bbox 0,0,50,50
        0x00, 0x03, // endPtsOfContours
        0x00, 0x00, // instructionLength
        0x31, 0x33, 0x35, 0x23, // flags
        0x32, 0x32, // x deltas: (same), 50, (same), -50
        0x32, // y deltas: (same), (same), 50, (same)
        0x00, 0x00, 0x00, // pad
    ];
    assert_eq!(glyph.len(), 24);
    glyph
}

/// A single component referencing glyph 0, untranslated
fn composite_glyph() -> Vec<u8> {
    let glyph: Vec<u8> = vec![
        0xFF, 0xFF, // numberOfContours = -1
        0x00, 0x0A, 0x00, 0x0A, 0x00, 0x64, 0x00, 0x5A, // bbox 10,10,100,90
        0x00, 0x02, // flags: ARGS_ARE_XY_VALUES
        0x00, 0x00, // glyphIndex
        0x00, 0x00, // dx, dy
    ];
    assert_eq!(glyph.len(), 16);
    glyph
}

fn short_loca(glyph_lengths: &[usize]) -> Vec<u8> {
    let mut t: Vec<u8> = Vec::new();
    let mut offset: usize = 0;
    t.put_u16(0);
    for len in glyph_lengths {
        offset += len;
        assert_eq!(offset % 4, 0);
        t.put_u16((offset / 2) as u16);
    }
    t
}

fn hmtx_table(metrics: &[(u16, i16)], trailing_lsbs: &[i16]) -> Vec<u8> {
    let mut t: Vec<u8> = Vec::new();
    for &(advance, lsb) in metrics {
        t.put_u16(advance);
        t.put_i16(lsb);
    }
    for &lsb in trailing_lsbs {
        t.put_i16(lsb);
    }
    t
}

/// Three glyphs (triangle, empty, square), short loca, droppable lsbs
fn simple_test_font() -> Vec<u8> {
    let mut glyf = triangle_glyph();
    glyf.extend_from_slice(&square_glyph());

    build_sfnt(
        TRUETYPE_FLAVOR,
        &[
            (*b"glyf", glyf),
            (*b"head", head_table(0)),
            (*b"hhea", hhea_table(2)),
            (*b"hmtx", hmtx_table(&[(500, 10), (600, 0)], &[0])),
            (*b"loca", short_loca(&[24, 0, 24])),
            (*b"maxp", maxp_table(3)),
        ],
    )
}

#[test]
fn ttf_round_trip_is_byte_identical() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();

    // The first table directory entry should be glyf with the non-null
    // transform: known tag index 10, transform version 0
    assert_eq!(woff[48], 10);

    let restored = decompress_woff2(&woff).unwrap();
    assert_eq!(restored, font);
}

#[test]
fn composite_glyph_round_trip() {
    let mut glyf = triangle_glyph();
    glyf.extend_from_slice(&composite_glyph());

    let font = build_sfnt(
        TRUETYPE_FLAVOR,
        &[
            (*b"glyf", glyf),
            (*b"head", head_table(0)),
            (*b"hhea", hhea_table(2)),
            (*b"hmtx", hmtx_table(&[(500, 10), (600, 0)], &[10])),
            (*b"loca", short_loca(&[24, 0, 16])),
            (*b"maxp", maxp_table(3)),
        ],
    );

    let woff = compress_woff2(&font).unwrap();
    let restored = decompress_woff2(&woff).unwrap();
    assert_eq!(restored, font);
}

#[test]
fn undroppable_lsbs_round_trip() {
    // lsb of glyph 0 differs from its x_min, so the hmtx transform must not
    // apply; the table is carried untransformed and still round-trips
    let mut glyf = triangle_glyph();
    glyf.extend_from_slice(&square_glyph());

    let font = build_sfnt(
        TRUETYPE_FLAVOR,
        &[
            (*b"glyf", glyf),
            (*b"head", head_table(0)),
            (*b"hhea", hhea_table(2)),
            (*b"hmtx", hmtx_table(&[(500, 11), (600, 0)], &[0])),
            (*b"loca", short_loca(&[24, 0, 24])),
            (*b"maxp", maxp_table(3)),
        ],
    );

    let woff = compress_woff2(&font).unwrap();
    let restored = decompress_woff2(&woff).unwrap();
    assert_eq!(restored, font);
}

#[test]
fn cff_font_round_trip() {
    // No glyf table at all: every table takes the null transform
    let font = build_sfnt(
        OTTO_FLAVOR,
        &[
            (*b"CFF ", (0u8..80).collect()),
            (*b"head", head_table(0)),
            (*b"maxp", maxp_table(1)),
        ],
    );

    let woff = compress_woff2(&font).unwrap();
    let restored = decompress_woff2(&woff).unwrap();
    assert_eq!(restored, font);
}

#[test]
fn collection_round_trip() {
    // Two fonts sharing all six tables
    let mut glyf = triangle_glyph();
    glyf.extend_from_slice(&square_glyph());
    let tables = [
        (*b"glyf", glyf),
        (*b"head", head_table(0)),
        (*b"hhea", hhea_table(2)),
        (*b"hmtx", hmtx_table(&[(500, 10), (600, 0)], &[0])),
        (*b"loca", short_loca(&[24, 0, 24])),
        (*b"maxp", maxp_table(3)),
    ];

    // TTC header: 12 bytes + one directory offset per font
    let data_start = 20 + 2 * (12 + 16 * tables.len());
    let directory = build_sfnt_directory(TRUETYPE_FLAVOR, &tables, data_start);

    let mut ttc: Vec<u8> = Vec::new();
    ttc.extend_from_slice(b"ttcf");
    ttc.put_u32(0x00010000);
    ttc.put_u32(2); // numFonts
    ttc.put_u32(20);
    ttc.put_u32(20 + directory.len() as u32);
    ttc.extend_from_slice(&directory);
    ttc.extend_from_slice(&directory);
    let head_offset = ttc.len() + pad4(24 + 24); // head follows glyf
    for (_, data) in &tables {
        ttc.extend_from_slice(data);
        ttc.resize(pad4(ttc.len()), 0);
    }

    let woff = compress_woff2(&ttc).unwrap();
    assert_eq!(compute_woff2_final_size(&woff).unwrap(), ttc.len());
    let restored = decompress_woff2(&woff).unwrap();

    // The reconstruction recomputes checkSumAdjustment; everything else must
    // match the input byte for byte, so compare with the field zeroed out on
    // both sides
    let mut restored_unadjusted = restored.clone();
    restored_unadjusted[head_offset + 8..head_offset + 12].fill(0);
    let mut ttc_unadjusted = ttc.clone();
    ttc_unadjusted[head_offset + 8..head_offset + 12].fill(0);
    assert_eq!(restored_unadjusted, ttc_unadjusted);
    assert_eq!(&restored[..4], b"ttcf");
}

#[test]
fn restored_directory_entries_are_patched() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();
    let restored = decompress_woff2(&woff).unwrap();

    // glyf is the first entry of the sorted directory; its checksum, offset
    // and length fields must carry the real values, not placeholders
    assert_eq!(&restored[12..16], b"glyf");
    let cksum = u32::from_be_bytes(restored[16..20].try_into().unwrap());
    let offset = u32::from_be_bytes(restored[20..24].try_into().unwrap());
    let length = u32::from_be_bytes(restored[24..28].try_into().unwrap());
    assert_ne!(cksum, 0);
    assert_eq!(offset, 108); // directly after the 6-entry directory
    assert_eq!(length, 48);
}

#[test]
fn regenerated_loca_keeps_its_directory_position() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();
    let restored = decompress_woff2(&woff).unwrap();

    // Table data runs glyf, head, hhea, hmtx, loca, maxp. The regenerated
    // loca must land in its sorted slot, not directly behind glyf.
    assert_eq!(&restored[260..268], short_loca(&[24, 0, 24]).as_slice());
}

#[test]
fn sizes_are_bounded_and_exact() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();

    assert!(woff.len() <= max_woff2_compressed_size(font.len()));
    assert_eq!(compute_woff2_final_size(&woff).unwrap(), font.len());
}

#[test]
fn caller_buffers_are_checked_for_capacity() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();

    let mut exact = vec![0u8; woff.len()];
    assert_eq!(convert_ttf_to_woff2(&font, &mut exact), Ok(woff.len()));
    assert_eq!(exact, woff);

    let mut short = vec![0u8; woff.len() - 1];
    assert_eq!(
        convert_ttf_to_woff2(&font, &mut short),
        Err(Woff2Error::CapacityInsufficient)
    );
    // Nothing may be written on failure
    assert!(short.iter().all(|&b| b == 0));

    let mut exact = vec![0u8; font.len()];
    assert_eq!(convert_woff2_to_ttf(&woff, &mut exact), Ok(font.len()));
    assert_eq!(exact, font);

    let mut short = vec![0u8; font.len() - 1];
    assert_eq!(
        convert_woff2_to_ttf(&woff, &mut short),
        Err(Woff2Error::CapacityInsufficient)
    );
    assert!(short.iter().all(|&b| b == 0));
}

#[test]
fn truncated_input_is_rejected() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();

    assert!(decompress_woff2(&woff[..20]).is_err());
    assert!(decompress_woff2(&woff[..47]).is_err());
    assert!(decompress_woff2(&woff[..woff.len() - 4]).is_err());
}

#[test]
fn corrupted_header_fields_are_rejected() {
    let font = simple_test_font();
    let woff = compress_woff2(&font).unwrap();

    // Reserved field must be zero
    let mut corrupt = woff.clone();
    corrupt[14] = 0xFF;
    assert_eq!(decompress_woff2(&corrupt), Err(Woff2Error::Malformed));

    // totalSfntSize must agree with the value derived from the directory
    let mut corrupt = woff.clone();
    corrupt[16..20].copy_from_slice(&0xDEADBEEFu32.to_be_bytes());
    assert_eq!(decompress_woff2(&corrupt), Err(Woff2Error::Malformed));
}

#[test]
fn garbage_input_is_rejected() {
    assert!(compress_woff2(&[0u8; 64]).is_err());
    assert!(decompress_woff2(&[0u8; 64]).is_err());
    assert!(decompress_woff2(b"wOF2").is_err());
}
