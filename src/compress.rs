//! SFNT → WOFF2 conversion

use std::collections::HashMap;

use bytes::BufMut;
use font_types::Tag;

use crate::Round4;
use crate::entropy;
use crate::error::{Woff2Error, bail, bail_if};
use crate::sfnt::{SfntFont, SfntInput, sfnt_directory_size};
use crate::table_tags::{GLYF, HEAD, HHEA, HMTX, LOCA, MAXP, TTCF, known_tag_index};
use crate::variable_length::BufMutVariableExt as _;
use crate::woff::glyf_decoder::reconstruct_glyf_and_loca;
use crate::woff::glyf_encoder::{TransformedGlyf, transform_glyf_and_loca};
use crate::woff::headers::{WOFF2_HEADER_SIZE, WOFF2_SIG, is_transformed};
use crate::woff::hmtx_encoder::transform_hmtx;

/// A single entry of the output table directory together with its bytes
/// in the decompressed stream.
struct OutputTable {
    tag: Tag,
    transform_version: u8,
    /// Length of the original (untransformed) table
    orig_length: u32,
    /// The table's bytes as they appear in the decompressed stream. Empty
    /// for a transformed loca table, which carries no data of its own.
    data: Vec<u8>,
}

impl OutputTable {
    fn is_transformed(&self) -> bool {
        // Versions we write are always valid for the tag
        is_transformed(self.tag, self.transform_version).unwrap_or(false)
    }
}

/// Convert an SFNT font (TTF/OTF, single font or collection) into WOFF2.
pub fn compress_woff2(data: &[u8]) -> Result<Vec<u8>, Woff2Error> {
    let sfnt = SfntInput::parse(data)?;

    // Output tables, in stream order. Fonts of a collection that reference the
    // same byte range of the input share a single entry, keyed by (offset, length).
    let mut tables: Vec<OutputTable> = Vec::new();
    let mut table_index_by_src: HashMap<(u32, u32), u16> = HashMap::new();
    // Per font: the indices into `tables` of the tables it references
    let mut font_table_indices: Vec<Vec<u16>> = Vec::with_capacity(sfnt.fonts.len());

    for font in &sfnt.fonts {
        let mut indices: Vec<u16> = Vec::with_capacity(font.tables.len());

        // Set when this font's glyf table was transformed in this pass; the
        // hmtx transform depends on the x_mins recovered alongside it.
        let mut font_glyf: Option<(u16, Vec<i16>)> = None;

        // Records are in sorted tag order, so glyf is visited before hmtx and loca
        for record in &font.tables {
            let src_key = (record.offset, record.length);
            if let Some(&table_idx) = table_index_by_src.get(&src_key) {
                indices.push(table_idx);
                continue;
            }
            bail_if!(tables.len() >= u16::MAX as usize);

            match record.tag {
                t if t == GLYF => {
                    // glyf and loca are encoded as a pair, with their
                    // directory entries kept adjacent
                    let loca_record = *font.table_by_tag(LOCA).ok_or(Woff2Error::Malformed)?;
                    let glyf_data = record.data_as_slice(data)?;
                    let loca_data = loca_record.data_as_slice(data)?;

                    let transformed = checked_glyf_transform(font, data, glyf_data, loca_data);

                    let glyf_idx = tables.len() as u16;
                    match transformed {
                        Some((transformed_glyf, num_glyphs)) => {
                            font_glyf = Some((num_glyphs, transformed_glyf.x_mins));
                            tables.push(OutputTable {
                                tag: GLYF,
                                transform_version: 0,
                                orig_length: record.length,
                                data: transformed_glyf.data,
                            });
                            tables.push(OutputTable {
                                tag: LOCA,
                                transform_version: 0,
                                orig_length: loca_record.length,
                                data: Vec::new(),
                            });
                        }
                        None => {
                            // Null transform for both. Version 3 is the null
                            // transform for glyf and loca specifically.
                            tables.push(OutputTable {
                                tag: GLYF,
                                transform_version: 3,
                                orig_length: record.length,
                                data: glyf_data.to_vec(),
                            });
                            tables.push(OutputTable {
                                tag: LOCA,
                                transform_version: 3,
                                orig_length: loca_record.length,
                                data: loca_data.to_vec(),
                            });
                        }
                    }

                    table_index_by_src.insert(src_key, glyf_idx);
                    table_index_by_src
                        .insert((loca_record.offset, loca_record.length), glyf_idx + 1);
                    indices.push(glyf_idx);
                }
                t if t == LOCA => {
                    // The paired glyf table registers loca ahead of time, so an
                    // unregistered loca means glyf is missing or not shared
                    // consistently with it
                    bail!();
                }
                t if t == HMTX => {
                    let hmtx_data = record.data_as_slice(data)?;
                    let transformed = match (&font_glyf, read_num_hmetrics(font, data)) {
                        (Some((num_glyphs, x_mins)), Some(num_hmetrics)) => {
                            transform_hmtx(hmtx_data, *num_glyphs, num_hmetrics, x_mins)?
                        }
                        _ => None,
                    };

                    let table_idx = tables.len() as u16;
                    tables.push(match transformed {
                        Some(transformed_hmtx) => OutputTable {
                            tag: HMTX,
                            transform_version: 1,
                            orig_length: record.length,
                            data: transformed_hmtx,
                        },
                        None => OutputTable {
                            tag: HMTX,
                            transform_version: 0,
                            orig_length: record.length,
                            data: hmtx_data.to_vec(),
                        },
                    });
                    table_index_by_src.insert(src_key, table_idx);
                    indices.push(table_idx);
                }
                _ => {
                    let table_idx = tables.len() as u16;
                    tables.push(OutputTable {
                        tag: record.tag,
                        transform_version: 0,
                        orig_length: record.length,
                        data: record.data_as_slice(data)?.to_vec(),
                    });
                    table_index_by_src.insert(src_key, table_idx);
                    indices.push(table_idx);
                }
            }
        }

        font_table_indices.push(indices);
    }

    serialize_woff2(&sfnt, &tables, &font_table_indices)
}

/// Transform glyf+loca, keeping the result only if the inverse transform
/// reproduces the source tables byte for byte. Any structure the transform
/// cannot represent losslessly falls back to the null transform.
fn checked_glyf_transform(
    font: &SfntFont,
    data: &[u8],
    glyf_data: &[u8],
    loca_data: &[u8],
) -> Option<(TransformedGlyf, u16)> {
    let num_glyphs = read_table_u16(font, data, MAXP, 4)?;
    let index_format = read_table_u16(font, data, HEAD, 50)?;

    let transformed = transform_glyf_and_loca(glyf_data, loca_data, index_format, num_glyphs).ok()?;
    let reconstructed = reconstruct_glyf_and_loca(&transformed.data).ok()?;
    let identical =
        reconstructed.glyf_table == glyf_data && reconstructed.loca_table == loca_data;

    identical.then_some((transformed, num_glyphs))
}

fn serialize_woff2(
    sfnt: &SfntInput,
    tables: &[OutputTable],
    font_table_indices: &[Vec<u16>],
) -> Result<Vec<u8>, Woff2Error> {
    bail_if!(tables.len() > u16::MAX as usize);

    // Table directory
    let mut directory: Vec<u8> = Vec::new();
    for table in tables {
        let known_index = known_tag_index(table.tag);
        let flags: u8 = known_index.unwrap_or(0x3f) | (table.transform_version << 6);
        directory.put_u8(flags);
        if known_index.is_none() {
            directory.put_u32(u32::from_be_bytes(table.tag.to_be_bytes()));
        }
        directory.put_variable_128_u32(table.orig_length);
        if table.is_transformed() {
            directory.put_variable_128_u32(table.data.len() as u32);
        }
    }

    // Collection directory, for TTC inputs only
    let mut collection: Vec<u8> = Vec::new();
    if let Some(version) = sfnt.collection_version {
        collection.put_u32(version);
        collection.put_variable_255_u16(sfnt.fonts.len() as u16);
        for (font, indices) in sfnt.fonts.iter().zip(font_table_indices) {
            collection.put_variable_255_u16(indices.len() as u16);
            collection.put_u32(u32::from_be_bytes(font.flavor.to_be_bytes()));
            for &table_idx in indices {
                collection.put_variable_255_u16(table_idx);
            }
        }
    }

    // Size of the reconstructed sfnt, including per-table padding. The decoder
    // derives the same value from the table directory and requires the header
    // to agree.
    let collection_header_size = match sfnt.collection_version {
        Some(version) => 12 + 4 * sfnt.fonts.len() + if version == 0x00020000 { 12 } else { 0 },
        None => 0,
    };
    let mut total_sfnt_size: usize = collection_header_size
        + font_table_indices
            .iter()
            .map(|indices| sfnt_directory_size(indices.len()))
            .sum::<usize>();
    for table in tables {
        total_sfnt_size += Round4!(table.orig_length as usize);
    }
    bail_if!(total_sfnt_size > u32::MAX as usize);

    // Concatenate the stream and compress it as a single block
    let stream_len: usize = tables.iter().map(|table| table.data.len()).sum();
    let mut stream: Vec<u8> = Vec::with_capacity(stream_len);
    for table in tables {
        stream.extend_from_slice(&table.data);
    }
    let compressed = entropy::compress(&stream)?;

    // Overall file length, padded to a 4-byte boundary
    let total_length = Round4!(
        WOFF2_HEADER_SIZE + directory.len() + collection.len() + compressed.len()
    );
    bail_if!(total_length > u32::MAX as usize);

    let flavor = match sfnt.is_collection() {
        true => TTCF,
        false => sfnt.fonts[0].flavor,
    };

    let mut out: Vec<u8> = Vec::with_capacity(total_length);
    out.put_u32(u32::from_be_bytes(WOFF2_SIG.to_be_bytes()));
    out.put_u32(u32::from_be_bytes(flavor.to_be_bytes()));
    out.put_u32(total_length as u32);
    out.put_u16(tables.len() as u16);
    out.put_u16(0); // reserved
    out.put_u32(total_sfnt_size as u32);
    out.put_u32(compressed.len() as u32);
    out.put_u16(0); // majorVersion
    out.put_u16(0); // minorVersion
    out.put_u32(0); // metaOffset
    out.put_u32(0); // metaLength
    out.put_u32(0); // metaOrigLength
    out.put_u32(0); // privOffset
    out.put_u32(0); // privLength
    out.extend_from_slice(&directory);
    out.extend_from_slice(&collection);
    out.extend_from_slice(&compressed);
    out.resize(total_length, 0);

    Ok(out)
}

fn read_num_hmetrics(font: &SfntFont, data: &[u8]) -> Option<u16> {
    // numberOfHMetrics is the last field of the 36-byte 'hhea' table
    read_table_u16(font, data, HHEA, 34)
}

/// Read a big-endian u16 field at `offset` within the font's `tag` table
fn read_table_u16(font: &SfntFont, data: &[u8], tag: Tag, offset: usize) -> Option<u16> {
    let table = font.table_by_tag(tag)?.data_as_slice(data).ok()?;
    let bytes: [u8; 2] = table.get(offset..offset + 2)?.try_into().ok()?;
    Some(u16::from_be_bytes(bytes))
}
