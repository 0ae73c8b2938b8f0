//! Forward WOFF2 glyf transform: splits each glyph record of a glyf table
//! into the seven homogeneous substreams, which compress far better than the
//! interleaved per-glyph layout. The loca table is dropped entirely: the
//! decoder regenerates it from reconstructed glyph boundaries.

use bytes::{Buf, BufMut};

use crate::error::{Woff2Error, bail, bail_if, bail_with_msg_if};
use crate::variable_length::BufMutVariableExt as _;
use crate::woff::{
    FLAG_ARG_1_AND_2_ARE_WORDS, FLAG_MORE_COMPONENTS, FLAG_OVERLAP_SIMPLE_BITMAP,
    FLAG_WE_HAVE_A_SCALE, FLAG_WE_HAVE_A_TWO_BY_TWO, FLAG_WE_HAVE_AN_X_AND_Y_SCALE,
    FLAG_WE_HAVE_INSTRUCTIONS, GLYF_ON_CURVE, GLYF_OVERLAP_SIMPLE, GLYF_REPEAT, GLYF_THIS_X_IS_SAME,
    GLYF_THIS_Y_IS_SAME, GLYF_X_SHORT, GLYF_Y_SHORT, NUM_SUB_STREAMS, Point, bbox_bitmap_size,
    overlap_bitmap_size,
};

pub(crate) struct TransformedGlyf {
    /// The transformed glyf table as it appears in the compressed stream.
    /// Subsumes the loca table, whose transformed length is zero.
    pub data: Vec<u8>,
    /// x_min of each glyph's bounding box, for the hmtx transform
    pub x_mins: Vec<i16>,
}

/// Apply the WOFF2 glyf transform to original glyf+loca tables.
///
/// Fails with `Malformed` on any glyph structure the transform cannot
/// represent; the caller is expected to fall back to the null transform.
///
/// <https://www.w3.org/TR/WOFF2/#glyf_table_format>
pub(crate) fn transform_glyf_and_loca(
    glyf: &[u8],
    loca: &[u8],
    index_format: u16,
    num_glyphs: u16,
) -> Result<TransformedGlyf, Woff2Error> {
    bail_if!(index_format > 1);
    let loca_values = parse_loca_table(loca, index_format, num_glyphs)?;
    bail_if!(*loca_values.last().unwrap() as usize != glyf.len());

    let mut encoder = GlyfEncoder::new(num_glyphs);
    for window in loca_values.windows(2) {
        let glyph = glyf
            .get(window[0] as usize..window[1] as usize)
            .ok_or(Woff2Error::Malformed)?;
        encoder.encode_glyph(glyph)?;
    }

    Ok(encoder.finish(index_format))
}

/// Parse a loca table into glyph record boundaries
fn parse_loca_table(
    loca: &[u8],
    index_format: u16,
    num_glyphs: u16,
) -> Result<Vec<u32>, Woff2Error> {
    let entry_size: usize = if index_format != 0 { 4 } else { 2 };
    let num_values = num_glyphs as usize + 1;
    bail_if!(loca.len() != num_values * entry_size);

    let mut input = loca;
    let mut values = Vec::with_capacity(num_values);
    for _ in 0..num_values {
        let value = match index_format {
            0 => (input.try_get_u16()? as u32) * 2,
            _ => input.try_get_u32()?,
        };
        // Glyph boundaries must be non-decreasing
        bail_if!(values.last().is_some_and(|&prev| value < prev));
        values.push(value);
    }
    Ok(values)
}

struct GlyfEncoder {
    n_contour_stream: Vec<u8>,
    n_points_stream: Vec<u8>,
    flag_stream: Vec<u8>,
    glyph_stream: Vec<u8>,
    composite_stream: Vec<u8>,
    bbox_bitmap: Vec<u8>,
    bbox_stream: Vec<u8>,
    instruction_stream: Vec<u8>,
    overlap_bitmap: Vec<u8>,
    any_overlap_bits: bool,

    num_glyphs: u16,
    glyph_index: usize,
    x_mins: Vec<i16>,
}

impl GlyfEncoder {
    fn new(num_glyphs: u16) -> Self {
        Self {
            n_contour_stream: Vec::with_capacity(num_glyphs as usize * 2),
            n_points_stream: Vec::new(),
            flag_stream: Vec::new(),
            glyph_stream: Vec::new(),
            composite_stream: Vec::new(),
            bbox_bitmap: vec![0; bbox_bitmap_size(num_glyphs)],
            bbox_stream: Vec::new(),
            instruction_stream: Vec::new(),
            overlap_bitmap: vec![0; overlap_bitmap_size(num_glyphs)],
            any_overlap_bits: false,
            num_glyphs,
            glyph_index: 0,
            x_mins: Vec::with_capacity(num_glyphs as usize),
        }
    }

    fn set_bbox_bit(&mut self) {
        let i = self.glyph_index;
        self.bbox_bitmap[i >> 3] |= 0x80 >> (i & 7);
    }

    fn set_overlap_bit(&mut self) {
        let i = self.glyph_index;
        self.overlap_bitmap[i >> 3] |= 0x80 >> (i & 7);
        self.any_overlap_bits = true;
    }

    fn encode_glyph(&mut self, glyph: &[u8]) -> Result<(), Woff2Error> {
        if glyph.is_empty() {
            // Empty glyph: record a zero contour count, no bbox
            self.n_contour_stream.put_i16(0);
            self.x_mins.push(0);
            self.glyph_index += 1;
            return Ok(());
        }

        let mut input = glyph;
        let n_contours = input.try_get_i16()?;
        let x_min = input.try_get_i16()?;
        let y_min = input.try_get_i16()?;
        let x_max = input.try_get_i16()?;
        let y_max = input.try_get_i16()?;
        let bbox = [x_min, y_min, x_max, y_max];

        self.n_contour_stream.put_i16(n_contours);
        self.x_mins.push(x_min);

        if n_contours == -1 {
            self.encode_composite_glyph(input, bbox)?;
        } else if n_contours > 0 {
            self.encode_simple_glyph(input, n_contours as usize, bbox)?;
        } else {
            // A non-empty record claiming zero contours cannot be represented:
            // the inverse transform emits nothing for an empty glyph.
            bail!()
        }

        self.glyph_index += 1;
        Ok(())
    }

    fn encode_composite_glyph(
        &mut self,
        mut input: &[u8],
        bbox: [i16; 4],
    ) -> Result<(), Woff2Error> {
        // Composite glyphs always carry an explicit bbox
        self.set_bbox_bit();
        for value in bbox {
            self.bbox_stream.put_i16(value);
        }

        // Copy component records verbatim into the composite stream
        let mut have_instructions = false;
        let mut flags: u16 = FLAG_MORE_COMPONENTS;
        while flags & FLAG_MORE_COMPONENTS != 0 {
            flags = input.try_get_u16()?;
            have_instructions |= (flags & FLAG_WE_HAVE_INSTRUCTIONS) != 0;

            let mut arg_size: usize = 2; // glyph index
            if flags & FLAG_ARG_1_AND_2_ARE_WORDS != 0 {
                arg_size += 4;
            } else {
                arg_size += 2;
            }
            if flags & FLAG_WE_HAVE_A_SCALE != 0 {
                arg_size += 2;
            } else if flags & FLAG_WE_HAVE_AN_X_AND_Y_SCALE != 0 {
                arg_size += 4;
            } else if flags & FLAG_WE_HAVE_A_TWO_BY_TWO != 0 {
                arg_size += 8;
            }
            bail_if!(arg_size > input.remaining());

            self.composite_stream.put_u16(flags);
            let (args, rest) = input.split_at(arg_size);
            self.composite_stream.extend_from_slice(args);
            input = rest;
        }

        if have_instructions {
            let instruction_size = input.try_get_u16()?;
            bail_if!(instruction_size as usize > input.remaining());
            self.glyph_stream.put_variable_255_u16(instruction_size);
            self.instruction_stream
                .extend_from_slice(&input[..instruction_size as usize]);
        }

        Ok(())
    }

    fn encode_simple_glyph(
        &mut self,
        mut input: &[u8],
        n_contours: usize,
        bbox: [i16; 4],
    ) -> Result<(), Woff2Error> {
        // End points of contours give per-contour point counts
        let mut n_points: usize = 0;
        let mut last_end: i32 = -1;
        for _ in 0..n_contours {
            let end_point = input.try_get_u16()? as i32;
            let contour_points = end_point - last_end;
            bail_with_msg_if!(contour_points <= 0, "Non-increasing contour end points");
            self.n_points_stream
                .put_variable_255_u16(contour_points as u16);
            n_points += contour_points as usize;
            last_end = end_point;
        }

        let instruction_size = input.try_get_u16()?;
        bail_if!(instruction_size as usize > input.remaining());
        let (instructions, rest) = input.split_at(instruction_size as usize);
        input = rest;

        let (points, has_overlap_bit) = parse_glyph_points(&mut input, n_points)?;

        if has_overlap_bit {
            self.set_overlap_bit();
        }

        // If the stored bbox matches the one computed from the points it is
        // omitted and the decoder recomputes it. A differing bbox must be
        // carried explicitly or reconstruction would not be byte-identical.
        if bbox != compute_bbox(&points) {
            self.set_bbox_bit();
            for value in bbox {
                self.bbox_stream.put_i16(value);
            }
        }

        store_points(&points, &mut self.flag_stream, &mut self.glyph_stream)?;
        self.glyph_stream.put_variable_255_u16(instruction_size);
        self.instruction_stream.extend_from_slice(instructions);

        Ok(())
    }

    fn finish(self, index_format: u16) -> TransformedGlyf {
        let substreams: [&[u8]; NUM_SUB_STREAMS] = [
            &self.n_contour_stream,
            &self.n_points_stream,
            &self.flag_stream,
            &self.glyph_stream,
            &self.composite_stream,
            // bbox bitmap and bbox values share one substream
            &[],
            &self.instruction_stream,
        ];

        let bbox_substream_len = self.bbox_bitmap.len() + self.bbox_stream.len();
        let total_len: usize = (2 + NUM_SUB_STREAMS) * 4
            + substreams.iter().map(|s| s.len()).sum::<usize>()
            + bbox_substream_len
            + if self.any_overlap_bits {
                self.overlap_bitmap.len()
            } else {
                0
            };

        let mut data: Vec<u8> = Vec::with_capacity(total_len);
        data.put_u16(0); // reserved
        let option_flags: u16 = if self.any_overlap_bits {
            FLAG_OVERLAP_SIMPLE_BITMAP
        } else {
            0
        };
        data.put_u16(option_flags);
        data.put_u16(self.num_glyphs);
        data.put_u16(index_format);

        for (i, substream) in substreams.iter().enumerate() {
            let len = if i == 5 {
                bbox_substream_len
            } else {
                substream.len()
            };
            data.put_u32(len as u32);
        }
        for (i, substream) in substreams.iter().enumerate() {
            if i == 5 {
                data.extend_from_slice(&self.bbox_bitmap);
                data.extend_from_slice(&self.bbox_stream);
            } else {
                data.extend_from_slice(substream);
            }
        }
        if self.any_overlap_bits {
            data.extend_from_slice(&self.overlap_bitmap);
        }

        TransformedGlyf {
            data,
            x_mins: self.x_mins,
        }
    }
}

/// Parse the flags and coordinate arrays of a simple glyph into absolute points.
/// Also reports whether the first point carried the OVERLAP_SIMPLE flag.
fn parse_glyph_points(
    input: &mut &[u8],
    n_points: usize,
) -> Result<(Vec<Point>, bool), Woff2Error> {
    // Expand flag repeats
    let mut flags: Vec<u8> = Vec::with_capacity(n_points);
    while flags.len() < n_points {
        let flag = input.try_get_u8()?;
        flags.push(flag);
        if flag & GLYF_REPEAT != 0 {
            let repeat_count = input.try_get_u8()?;
            bail_if!(flags.len() + repeat_count as usize > n_points);
            for _ in 0..repeat_count {
                flags.push(flag);
            }
        }
    }

    let has_overlap_bit = flags
        .first()
        .is_some_and(|&flag| flag & GLYF_OVERLAP_SIMPLE != 0);

    // x coordinates
    let mut points: Vec<Point> = Vec::with_capacity(n_points);
    let mut x: i32 = 0;
    for &flag in &flags {
        let dx: i32 = if flag & GLYF_X_SHORT != 0 {
            let magnitude = input.try_get_u8()? as i32;
            if flag & GLYF_THIS_X_IS_SAME != 0 {
                magnitude
            } else {
                -magnitude
            }
        } else if flag & GLYF_THIS_X_IS_SAME != 0 {
            0
        } else {
            input.try_get_i16()? as i32
        };
        x += dx;
        points.push(Point {
            x,
            y: 0,
            on_curve: flag & GLYF_ON_CURVE != 0,
        });
    }

    // y coordinates
    let mut y: i32 = 0;
    for (point, &flag) in points.iter_mut().zip(flags.iter()) {
        let dy: i32 = if flag & GLYF_Y_SHORT != 0 {
            let magnitude = input.try_get_u8()? as i32;
            if flag & GLYF_THIS_Y_IS_SAME != 0 {
                magnitude
            } else {
                -magnitude
            }
        } else if flag & GLYF_THIS_Y_IS_SAME != 0 {
            0
        } else {
            input.try_get_i16()? as i32
        };
        y += dy;
        point.y = y;
    }

    Ok((points, has_overlap_bit))
}

fn compute_bbox(points: &[Point]) -> [i16; 4] {
    let mut x_min: i32 = 0;
    let mut y_min: i32 = 0;
    let mut x_max: i32 = 0;
    let mut y_max: i32 = 0;

    if let Some(first) = points.first() {
        x_min = first.x;
        x_max = first.x;
        y_min = first.y;
        y_max = first.y;
    }
    for &Point { x, y, .. } in points.iter().skip(1) {
        x_min = x.min(x_min);
        x_max = x.max(x_max);
        y_min = y.min(y_min);
        y_max = y.max(y_max);
    }

    [x_min as i16, y_min as i16, x_max as i16, y_max as i16]
}

/// Triplet-encode points: one flag byte per point into `flag_stream`, the
/// coordinate data bytes into `glyph_stream`.
///
/// This is the inverse of the decoder's triplet decoding; the encoding is
/// chosen canonically by delta magnitude so decode(encode(points)) == points.
fn store_points(
    points: &[Point],
    flag_stream: &mut Vec<u8>,
    glyph_stream: &mut Vec<u8>,
) -> Result<(), Woff2Error> {
    let mut last_x: i32 = 0;
    let mut last_y: i32 = 0;

    for point in points {
        let dx = point.x - last_x;
        let dy = point.y - last_y;
        let abs_x = dx.unsigned_abs() as i32;
        let abs_y = dy.unsigned_abs() as i32;
        let on_curve_bit: i32 = if point.on_curve { 0 } else { 128 };
        let x_sign_bit: i32 = if dx < 0 { 0 } else { 1 };
        let y_sign_bit: i32 = if dy < 0 { 0 } else { 1 };
        let xy_sign_bits = x_sign_bit + 2 * y_sign_bit;

        if dx == 0 && abs_y < 1280 {
            flag_stream.push((on_curve_bit + ((abs_y & 0xf00) >> 7) + y_sign_bit) as u8);
            glyph_stream.push((abs_y & 0xff) as u8);
        } else if dy == 0 && abs_x < 1280 {
            flag_stream.push((on_curve_bit + 10 + ((abs_x & 0xf00) >> 7) + x_sign_bit) as u8);
            glyph_stream.push((abs_x & 0xff) as u8);
        } else if abs_x < 65 && abs_y < 65 {
            flag_stream.push(
                (on_curve_bit
                    + 20
                    + ((abs_x - 1) & 0x30)
                    + (((abs_y - 1) & 0x30) >> 2)
                    + xy_sign_bits) as u8,
            );
            glyph_stream.push(((((abs_x - 1) & 0xf) << 4) | ((abs_y - 1) & 0xf)) as u8);
        } else if abs_x < 769 && abs_y < 769 {
            flag_stream.push(
                (on_curve_bit
                    + 84
                    + 12 * (((abs_x - 1) & 0x300) >> 8)
                    + (((abs_y - 1) & 0x300) >> 6)
                    + xy_sign_bits) as u8,
            );
            glyph_stream.push(((abs_x - 1) & 0xff) as u8);
            glyph_stream.push(((abs_y - 1) & 0xff) as u8);
        } else if abs_x < 4096 && abs_y < 4096 {
            flag_stream.push((on_curve_bit + 120 + xy_sign_bits) as u8);
            glyph_stream.push((abs_x >> 4) as u8);
            glyph_stream.push((((abs_x & 0xf) << 4) | (abs_y >> 8)) as u8);
            glyph_stream.push((abs_y & 0xff) as u8);
        } else if abs_x < 65536 && abs_y < 65536 {
            flag_stream.push((on_curve_bit + 124 + xy_sign_bits) as u8);
            glyph_stream.push((abs_x >> 8) as u8);
            glyph_stream.push((abs_x & 0xff) as u8);
            glyph_stream.push((abs_y >> 8) as u8);
            glyph_stream.push((abs_y & 0xff) as u8);
        } else {
            // Deltas beyond 16 bits cannot occur in valid glyf data
            bail!()
        }

        last_x = point.x;
        last_y = point.y;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::woff::glyf_decoder;

    #[test]
    fn triplet_encoding_is_invertible() {
        let points = vec![
            Point { x: 0, y: 0, on_curve: true },
            Point { x: 1, y: 1, on_curve: true },
            Point { x: -63, y: 64, on_curve: false },
            Point { x: 700, y: -700, on_curve: true },
            Point { x: 700, y: 500, on_curve: true },
            Point { x: -3000, y: 4000, on_curve: false },
            Point { x: 30000, y: -30000, on_curve: true },
            Point { x: 30000, y: -31279, on_curve: true },
            Point { x: 31279, y: -31279, on_curve: false },
        ];

        let mut flag_stream: Vec<u8> = Vec::new();
        let mut glyph_stream: Vec<u8> = Vec::new();
        store_points(&points, &mut flag_stream, &mut glyph_stream).unwrap();
        assert_eq!(flag_stream.len(), points.len());

        let mut decoded: Vec<Point> = Vec::new();
        let consumed =
            glyf_decoder::decode_triplet(&flag_stream, &glyph_stream, &mut decoded).unwrap();
        assert_eq!(consumed, glyph_stream.len());
        assert_eq!(decoded, points);
    }

    #[test]
    fn loca_boundaries_must_be_monotonic() {
        // Short format: offsets stored divided by two
        let loca: Vec<u8> = [0u16, 4, 2]
            .iter()
            .flat_map(|v| v.to_be_bytes())
            .collect();
        assert!(parse_loca_table(&loca, 0, 2).is_err());
    }

    #[test]
    fn loca_length_must_match_glyph_count() {
        let loca = [0u8; 6];
        assert!(parse_loca_table(&loca, 0, 4).is_err());
        assert!(parse_loca_table(&loca, 0, 2).is_ok());
    }
}
