//! Forward WOFF2 hmtx transform: drops left-side-bearing arrays whose
//! values are fully recomputable from the glyf table's per-glyph x_min
//! values. Lossless only; if any lsb differs from its x_min the affected
//! array is kept.

use bytes::{Buf, BufMut};

use crate::error::{Woff2Error, bail_if};

/// Apply the WOFF2 hmtx transform.
///
/// Returns `None` when the transform does not apply: neither lsb array is
/// droppable, or the table does not have the expected shape. The caller then
/// stores the table with the null transform.
///
/// <https://www.w3.org/TR/WOFF2/#hmtx_table_format>
pub(crate) fn transform_hmtx(
    hmtx: &[u8],
    num_glyphs: u16,
    num_hmetrics: u16,
    x_mins: &[i16],
) -> Result<Option<Vec<u8>>, Woff2Error> {
    if num_hmetrics < 1 || num_hmetrics > num_glyphs || x_mins.len() != num_glyphs as usize {
        return Ok(None);
    }

    let num_glyphs = num_glyphs as usize;
    let num_hmetrics = num_hmetrics as usize;

    // longHorMetric[numberOfHMetrics] then leftSideBearings[numGlyphs - numberOfHMetrics]
    let expected_len = 4 * num_hmetrics + 2 * (num_glyphs - num_hmetrics);
    if hmtx.len() != expected_len {
        return Ok(None);
    }

    let mut input = hmtx;
    let mut advance_widths: Vec<u16> = Vec::with_capacity(num_hmetrics);
    let mut proportional_lsbs: Vec<i16> = Vec::with_capacity(num_hmetrics);
    for _ in 0..num_hmetrics {
        advance_widths.push(input.try_get_u16()?);
        proportional_lsbs.push(input.try_get_i16()?);
    }
    let mut monospace_lsbs: Vec<i16> = Vec::with_capacity(num_glyphs - num_hmetrics);
    for _ in num_hmetrics..num_glyphs {
        monospace_lsbs.push(input.try_get_i16()?);
    }
    bail_if!(input.has_remaining());

    // An empty array has nothing to omit, so its flag bit stays clear
    let can_drop_proportional = !proportional_lsbs.is_empty()
        && proportional_lsbs
            .iter()
            .zip(&x_mins[..num_hmetrics])
            .all(|(lsb, x_min)| lsb == x_min);
    let can_drop_monospace = !monospace_lsbs.is_empty()
        && monospace_lsbs
            .iter()
            .zip(&x_mins[num_hmetrics..])
            .all(|(lsb, x_min)| lsb == x_min);

    // Flag bit set = the corresponding lsb array is omitted
    let flags: u8 = (can_drop_proportional as u8) | ((can_drop_monospace as u8) << 1);
    if flags == 0 {
        return Ok(None);
    }

    let mut out: Vec<u8> = Vec::with_capacity(1 + 2 * num_hmetrics + expected_len);
    out.put_u8(flags);
    for advance in advance_widths {
        out.put_u16(advance);
    }
    if !can_drop_proportional {
        for lsb in proportional_lsbs {
            out.put_i16(lsb);
        }
    }
    if !can_drop_monospace {
        for lsb in monospace_lsbs {
            out.put_i16(lsb);
        }
    }

    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::woff::hmtx_decoder::{decode_hmtx_table, generate_hmtx_table};

    fn build_hmtx(metrics: &[(u16, i16)], trailing_lsbs: &[i16]) -> Vec<u8> {
        let mut out: Vec<u8> = Vec::new();
        for &(advance, lsb) in metrics {
            out.put_u16(advance);
            out.put_i16(lsb);
        }
        for &lsb in trailing_lsbs {
            out.put_i16(lsb);
        }
        out
    }

    #[test]
    fn droppable_lsbs_roundtrip() {
        let x_mins = [10i16, -20, 30];
        let hmtx = build_hmtx(&[(500, 10), (600, -20)], &[30]);

        let transformed = transform_hmtx(&hmtx, 3, 2, &x_mins).unwrap().unwrap();
        // flags byte + two advance widths only
        assert_eq!(transformed.len(), 1 + 4);
        assert_eq!(transformed[0], 0b11);

        let mut input = transformed.as_slice();
        let decoded = decode_hmtx_table(&mut input, 3, 2, &x_mins).unwrap();
        assert_eq!(generate_hmtx_table(&decoded).unwrap(), hmtx);
    }

    #[test]
    fn partially_droppable_lsbs() {
        let x_mins = [10i16, -20, 30];
        // Monospace lsb differs from x_min: only the proportional array drops
        let hmtx = build_hmtx(&[(500, 10), (600, -20)], &[31]);

        let transformed = transform_hmtx(&hmtx, 3, 2, &x_mins).unwrap().unwrap();
        assert_eq!(transformed[0], 0b01);

        let mut input = transformed.as_slice();
        let decoded = decode_hmtx_table(&mut input, 3, 2, &x_mins).unwrap();
        assert_eq!(generate_hmtx_table(&decoded).unwrap(), hmtx);
    }

    #[test]
    fn full_metrics_have_no_monospace_array_to_drop() {
        // numberOfHMetrics == numGlyphs, so there is no trailing lsb array.
        // Only the proportional bit may be set.
        let x_mins = [10i16, -20];
        let hmtx = build_hmtx(&[(500, 10), (600, -20)], &[]);

        let transformed = transform_hmtx(&hmtx, 2, 2, &x_mins).unwrap().unwrap();
        assert_eq!(transformed[0], 0b01);
        assert_eq!(transformed.len(), 1 + 4);

        let mut input = transformed.as_slice();
        let decoded = decode_hmtx_table(&mut input, 2, 2, &x_mins).unwrap();
        assert_eq!(generate_hmtx_table(&decoded).unwrap(), hmtx);
    }

    #[test]
    fn undroppable_lsbs_do_not_transform() {
        let x_mins = [10i16, -20];
        let hmtx = build_hmtx(&[(500, 11), (600, -19)], &[]);
        assert!(transform_hmtx(&hmtx, 2, 2, &x_mins).unwrap().is_none());
    }

    #[test]
    fn wrong_length_does_not_transform() {
        let x_mins = [10i16, -20];
        let hmtx = build_hmtx(&[(500, 10), (600, -20)], &[0]);
        assert!(transform_hmtx(&hmtx, 2, 2, &x_mins).unwrap().is_none());
    }
}
