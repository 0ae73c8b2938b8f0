//! WOFF2 → SFNT conversion

use bytes::{Buf as _, BufMut};
use font_types::Tag;

use crate::Round4;
use crate::checksum::{CHECKSUM_ADJUSTMENT_BASE, CHECKSUM_ADJUSTMENT_OFFSET, compute_checksum};
use crate::entropy;
use crate::error::{Woff2Error, bail, bail_if, bail_with_msg_if};
use crate::sfnt::write_sfnt_directory_header;
use crate::table_tags::{GLYF, HEAD, HMTX, LOCA};
use crate::woff::glyf_decoder::reconstruct_glyf_and_loca;
use crate::woff::headers::{
    CollectionDirectory, CollectionDirectoryEntry, Woff2FontInfo, Woff2Header, Woff2TableDirectory,
    Woff2TableDirectoryEntry,
};
use crate::woff::hmtx_decoder::{decode_hmtx_table, generate_hmtx_table};

/// Convert a WOFF2 font into the original SFNT (TTF/OTF) bytes.
pub fn decompress_woff2(raw_woff_data: &[u8]) -> Result<Vec<u8>, Woff2Error> {
    // Here we create a new view over `raw_woff_data`. Because we pass `&mut input` to parsing
    // functions, they will mutate the slice (not the data it points to) such that it only
    // includes unparsed data.
    //
    // However `raw_woff_data` will still contain the full data for the WOFF.
    let mut input = raw_woff_data;

    // Parse header, table directory and collection directory
    let header = Woff2Header::parse(&mut input)?;
    let table_directory = Woff2TableDirectory::parse(&mut input, header.num_tables as usize)?;
    let mut collection_directory = if header.is_collection() {
        CollectionDirectory::parse(&mut input, &table_directory)?
    } else {
        CollectionDirectory::generate_for_single_font(header.flavor, &table_directory)
    };

    // Re-order tables in output (OTSpec) order
    collection_directory.sort_tables_within_each_font(&table_directory);
    let num_fonts = collection_directory.fonts.len();

    // Derive the reconstructed size from the directory and require the header
    // to agree before trusting it for buffer sizing.
    let declared_sfnt_size = header.total_sfnt_size as usize;
    let expected_sfnt_size = compute_total_sfnt_size(&header, &table_directory, &collection_directory);
    bail_with_msg_if!(
        declared_sfnt_size != expected_sfnt_size,
        "Declared totalSfntSize {} but directory implies {}",
        declared_sfnt_size,
        expected_sfnt_size
    );

    // Decompress the data stream. It must expand to exactly the concatenation
    // of the transformed tables; any other byte count is a hard failure.
    let compressed_data = input
        .get(0..(header.total_compressed_size as usize))
        .ok_or(Woff2Error::OutOfBounds)?;
    let decompressed_data =
        entropy::decompress_exact(compressed_data, table_directory.total_stream_length())?;

    let mut out: Vec<u8> = Vec::with_capacity(header.total_sfnt_size as usize);

    let mut out_header = generate_header(&header, &table_directory, &collection_directory);
    out.extend_from_slice(&out_header.data);

    // Metadata for tables that have been written. Index corresponds to the table's index
    // within the table directory.
    let mut table_metadata: Vec<Option<TableMetadata>> = vec![None; header.num_tables as usize];
    for i in 0..num_fonts {
        reconstruct_font(
            &decompressed_data,
            &header,
            &table_directory,
            &collection_directory.fonts[i],
            &mut out_header,
            &mut table_metadata,
            &mut out,
            i,
        )?;
    }

    // The computation above already bounds every individual write, so this can
    // only fire on a logic error rather than bad input.
    debug_assert_eq!(out.len(), header.total_sfnt_size as usize);
    bail_if!(out.len() != header.total_sfnt_size as usize);

    Ok(out)
}

/// Parse just enough of a WOFF2 file to learn the exact size of the SFNT it
/// decompresses to, so callers can pre-allocate an output buffer.
pub fn compute_woff2_final_size(raw_woff_data: &[u8]) -> Result<usize, Woff2Error> {
    let mut input = raw_woff_data;
    let header = Woff2Header::parse(&mut input)?;
    Ok(header.total_sfnt_size as usize)
}

/// Total size of the reconstructed sfnt implied by the table directory:
/// headers and table directories, then each table padded to 4 bytes.
fn compute_total_sfnt_size(
    header: &Woff2Header,
    tables: &Woff2TableDirectory,
    collection_directory: &CollectionDirectory,
) -> usize {
    let mut size = collection_directory.collection_header_required_size(header.is_collection())
        + collection_directory.table_directories_required_size();
    for table in &tables.tables {
        size += Round4!(table.orig_length as usize);
    }
    size
}

fn iter_tables_for_font<'a>(
    font_entry: &'a CollectionDirectoryEntry,
    tables: &'a Woff2TableDirectory,
) -> impl Iterator<Item = (usize, &'a Woff2TableDirectoryEntry)> {
    font_entry
        .table_indices
        .iter()
        .map(|table_idx| (*table_idx as usize, &tables[*table_idx as usize]))
}

// Offset/checksum/length fields of the directory entries are written as 0's
// initially and patched once each table has been reconstructed.
#[allow(clippy::too_many_arguments)]
fn reconstruct_font(
    stream: &[u8],
    header: &Woff2Header,
    tables: &Woff2TableDirectory,
    font_entry: &CollectionDirectoryEntry,
    out_header: &mut HeaderData,
    table_metadata: &mut [Option<TableMetadata>],
    out: &mut Vec<u8>,
    font_idx: usize,
) -> Result<(), Woff2Error> {
    let glyf_idx = font_entry.glyf_idx.map(|idx| idx as usize);
    let loca_idx = font_entry.loca_idx.map(|idx| idx as usize);
    let hhea_idx = font_entry.hhea_idx.map(|idx| idx as usize);

    // Check the glyf and loca tables are compatible with each other.
    // 'glyf' without 'loca' doesn't make sense.
    match (glyf_idx, loca_idx) {
        (Some(glyf_idx), Some(loca_idx)) => {
            bail_with_msg_if!(
                tables[glyf_idx].is_transformed() != tables[loca_idx].is_transformed(),
                "Cannot transform just one of glyf/loca"
            );
        }
        (Some(_), None) | (None, Some(_)) => {
            bail_with_msg_if!(true, "Cannot have just one of glyf/loca")
        }
        (None, None) => {}
    }

    let mut font_checksum: u32 = if header.is_collection() {
        out_header.checksum
    } else {
        out_header.font_infos[font_idx].header_checksum
    };

    // Read and store "numberOfHMetrics" from the "hhea" table; used to reconstruct "hmtx"
    let num_hmetrics = match hhea_idx {
        Some(hhea_idx) => {
            let hhea_table = &tables[hhea_idx];
            Some(read_num_hmetrics(hhea_table.data_as_slice(stream)?)?)
        }
        None => None,
    };

    // These are read from "glyf" and then used to reconstruct "hmtx"
    let mut num_glyphs = None;
    let mut x_mins = None;

    // Regenerated alongside "glyf" but written at loca's own position in the
    // sorted table order
    let mut pending_loca: Option<(Vec<u8>, u32)> = None;

    // Iterate over the tables for this font.
    // Note: tables within each font (what we are iterating over here) have already been
    // sorted into alphabetical table tag order.
    for (table_idx, table) in iter_tables_for_font(font_entry, tables) {
        // Check to see if we have already processed and saved metadata for this table.
        // This occurs when a table is reused between fonts in a collection (and has
        // already been written for an earlier font).
        let metadata = if let Some(metadata) = table_metadata[table_idx] {
            // Tables shouldn't be reused within a single font
            bail_if!(font_idx == 0);

            metadata
        }
        // Any table which is stored with the null transform is copied verbatim
        else if !table.is_transformed() {
            let check_sum_adjustment = if table.tag == HEAD {
                bail_if!(table.orig_length < 12);
                let table_data = table.data_as_slice(stream)?;
                let checksum_bytes: [u8; 4] = table_data
                    [CHECKSUM_ADJUSTMENT_OFFSET..CHECKSUM_ADJUSTMENT_OFFSET + 4]
                    .try_into()
                    .unwrap();
                u32::from_be_bytes(checksum_bytes)
            } else {
                0
            };

            let table_data = table.data_as_slice(stream)?;
            let checksum = compute_checksum(table_data).wrapping_sub(check_sum_adjustment);

            let metadata = TableMetadata {
                dst_offset: out.len() as u32,
                dst_length: table.orig_length,
                checksum,
            };
            table_metadata[table_idx] = Some(metadata);

            out.extend_from_slice(table_data);
            out.resize(Round4!(out.len()), 0);

            metadata
        }
        // glyf table (also regenerates the loca table)
        else if table.tag == GLYF {
            let loca_idx =
                loca_idx.expect("We already returned an error if glyf is present but loca isn't");

            // Reconstruct the original glyf and loca tables
            let transformed_glyf_data = table.data_as_slice(stream)?;
            let glyf_and_loca_data = reconstruct_glyf_and_loca(transformed_glyf_data)?;

            // For transformed tables origLength is authoritative: reject
            // reconstructions that don't reproduce the declared lengths.
            // <https://dev.w3.org/webfonts/WOFF2/spec/#conform-mustRejectLoca>
            bail_if!(glyf_and_loca_data.glyf_table.len() != table.orig_length as usize);
            bail_if!(glyf_and_loca_data.loca_table.len() != tables[loca_idx].orig_length as usize);

            // Store num_glyphs and x_mins
            num_glyphs = Some(glyf_and_loca_data.num_glyphs);
            x_mins = Some(glyf_and_loca_data.x_mins);

            // Write glyf table. Loca is held back until its own slot in the
            // sorted iteration so the output keeps the canonical table order.
            let glyf_dest_offset = out.len();
            out.extend_from_slice(&glyf_and_loca_data.glyf_table);
            out.resize(Round4!(out.len()), 0);
            let glyf_metadata = TableMetadata {
                checksum: glyf_and_loca_data.glyf_checksum,
                dst_offset: glyf_dest_offset as u32,
                dst_length: glyf_and_loca_data.glyf_table.len() as u32,
            };
            table_metadata[table_idx] = Some(glyf_metadata);

            pending_loca = Some((glyf_and_loca_data.loca_table, glyf_and_loca_data.loca_checksum));

            glyf_metadata
        }
        // loca table, regenerated earlier while processing glyf (glyf sorts
        // first, so the data is always ready by the time we get here)
        else if table.tag == LOCA {
            let (loca_table, loca_checksum) =
                pending_loca.take().ok_or(Woff2Error::Malformed)?;

            let loca_dest_offset = out.len();
            out.extend_from_slice(&loca_table);
            out.resize(Round4!(out.len()), 0);
            let loca_metadata = TableMetadata {
                checksum: loca_checksum,
                dst_offset: loca_dest_offset as u32,
                dst_length: loca_table.len() as u32,
            };
            table_metadata[table_idx] = Some(loca_metadata);

            loca_metadata
        }
        // hmtx table
        else if table.tag == HMTX {
            // Tables are sorted so all the info we need has been gathered, provided the
            // glyf table of this font was itself transformed.
            let num_glyphs = num_glyphs.ok_or(Woff2Error::Malformed)?;
            let num_hmetrics = num_hmetrics.ok_or(Woff2Error::Malformed)?;
            let x_mins = x_mins.as_ref().ok_or(Woff2Error::Malformed)?;

            // Generate reconstructed hmtx table
            let mut transformed_hmtx_data = table.data_as_slice(stream)?;
            let hmtx_data =
                decode_hmtx_table(&mut transformed_hmtx_data, num_glyphs, num_hmetrics, x_mins)?;
            bail_if!(transformed_hmtx_data.has_remaining());
            let hmtx_table = generate_hmtx_table(&hmtx_data)?;
            bail_if!(hmtx_table.len() != table.orig_length as usize);
            let checksum = compute_checksum(&hmtx_table);

            // Write table to output buffer
            let dest_offset = out.len();
            out.extend_from_slice(&hmtx_table);
            out.resize(Round4!(out.len()), 0);
            let hmtx_metadata = TableMetadata {
                checksum,
                dst_offset: dest_offset as u32,
                dst_length: hmtx_table.len() as u32,
            };
            table_metadata[table_idx] = Some(hmtx_metadata);

            hmtx_metadata
        } else {
            bail!()
        };

        // Update font checksum with the checksum for the table
        font_checksum = font_checksum.wrapping_add(metadata.checksum);

        // Update the table entry with real values. We wrote 0's initially, so also
        // account for the entry's contribution to the font checksum.
        out_header.update_table_entry(out, font_idx, table.tag, metadata);
        font_checksum = font_checksum.wrapping_add(metadata.header_checksum_contribution());
    }

    // Update 'head' checkSumAdjustment. We already treated it as 0 when summing the font.
    //
    // The 'head' table is a special case in checksum calculations, as it includes a
    // checkSumAdjustment field that is calculated and written after the table's checksum is
    // calculated and written into the table directory entry, necessarily invalidating that
    // checksum value.
    //
    // When generating font data, to calculate and write the 'head' table checksum and
    // checkSumAdjustment field, do the following:
    //
    //   1. Set the checkSumAdjustment field to 0.
    //   2. Calculate the checksum for all tables including the 'head' table and enter the
    //      value for each table into the corresponding record in the table directory.
    //   3. Calculate the checksum for the entire font.
    //   4. Subtract that value from 0xB1B0AFBA.
    //   5. Store the result in the 'head' table checkSumAdjustment field.
    //
    // <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#calculating-checksums>
    let checksum_adjustment = CHECKSUM_ADJUSTMENT_BASE.wrapping_sub(font_checksum);
    if let Some(head_table_idx) = font_entry.head_idx {
        let head_table_metadata = &table_metadata[head_table_idx as usize]
            .expect("Every table in the font should have metadata at this point");
        let mut writer =
            &mut out[head_table_metadata.dst_offset as usize + CHECKSUM_ADJUSTMENT_OFFSET..];
        writer.put_u32(checksum_adjustment);
    }

    Ok(())
}

// Get numberOfHMetrics, <https://www.microsoft.com/typography/otspec/hhea.htm>
fn read_num_hmetrics(mut hhea_data: &[u8]) -> Result<u16, Woff2Error> {
    // numberOfHMetrics is the last field of the 36-byte 'hhea' table
    bail_if!(hhea_data.len() < 36);
    hhea_data.advance(34);
    Ok(hhea_data.try_get_u16()?)
}

struct HeaderData {
    data: Vec<u8>,
    checksum: u32,
    font_infos: Vec<Woff2FontInfo>,
}

#[derive(Clone, Copy, Default)]
struct TableMetadata {
    checksum: u32,
    dst_offset: u32,
    dst_length: u32,
}

impl TableMetadata {
    pub fn header_checksum_contribution(&self) -> u32 {
        self.checksum
            .wrapping_add(self.dst_offset)
            .wrapping_add(self.dst_length)
    }
}

impl HeaderData {
    /// Update the table entry with real values. The header sits at the start
    /// of the output buffer, so entry offsets are also output offsets.
    fn update_table_entry(
        &mut self,
        out: &mut [u8],
        font_idx: usize,
        tag: Tag,
        metadata: TableMetadata,
    ) {
        // Write data
        let table_entry_offset = self.font_infos[font_idx].table_entry_by_tag[&tag];
        let mut dest = &mut out[(table_entry_offset + 4)..];
        dest.put_u32(metadata.checksum);
        dest.put_u32(metadata.dst_offset);
        dest.put_u32(metadata.dst_length);

        // Update checksum
        let mut checksum = self.font_infos[font_idx].header_checksum;
        checksum = checksum.wrapping_add(metadata.checksum);
        checksum = checksum.wrapping_add(metadata.dst_offset);
        checksum = checksum.wrapping_add(metadata.dst_length);
        self.font_infos[font_idx].header_checksum = checksum;
    }
}

fn generate_header(
    header: &Woff2Header,
    tables: &Woff2TableDirectory,
    collection_directory: &CollectionDirectory,
) -> HeaderData {
    let num_fonts = collection_directory.fonts.len();
    let size_of_header = collection_directory.collection_header_required_size(header.is_collection())
        + collection_directory.table_directories_required_size();
    let mut output: Vec<u8> = Vec::with_capacity(size_of_header);
    let mut font_infos: Vec<Woff2FontInfo> = vec![Woff2FontInfo::default(); num_fonts];

    let mut checksum: u32 = 0;

    // If TTC: write TTC header
    if header.is_collection() {
        // TTC header
        output.put_u32(u32::from_be_bytes(header.flavor.to_be_bytes())); // TAG TTCTag
        output.put_u32(collection_directory.version); // FIXED Version
        output.put_u32(num_fonts as u32); // ULONG numFonts

        // Write tableDirectoryOffsets
        let first_table_directory_offset = match collection_directory.version {
            0x00010000 => 12 + (4 * num_fonts as u32),
            0x00020000 => 12 + 12 + (4 * num_fonts as u32),
            _ => unreachable!("Only 1.0 and 2.0 are supported versions"),
        };
        let mut table_directory_offset = first_table_directory_offset;
        for font in collection_directory.fonts.iter() {
            output.put_u32(table_directory_offset);
            table_directory_offset += font.table_directory_size() as u32;
        }

        // space for DSIG fields for header v2
        if collection_directory.version == 0x00020000 {
            output.put_u32(0); // ULONG ulDsigTag
            output.put_u32(0); // ULONG ulDsigLength
            output.put_u32(0); // ULONG ulDsigOffset
        }

        checksum = checksum.wrapping_add(compute_checksum(&output));
    }

    // Write table directory(s).
    // If file is a TTC: one per font. Else for a single font: one in total.
    for (font, info) in collection_directory.fonts.iter().zip(font_infos.iter_mut()) {
        let start_offset = output.len();
        write_sfnt_directory_header(&mut output, font.flavor, font.table_indices.len() as u16);

        for &table_index in &font.table_indices {
            let tag = tables[table_index as usize].tag;
            info.table_entry_by_tag.insert(tag, output.len());
            write_empty_directory_entry(&mut output, tag);
        }

        info.header_checksum = compute_checksum(&output[start_offset..]);
        checksum = checksum.wrapping_add(info.header_checksum);
    }

    HeaderData {
        data: output,
        font_infos,
        checksum,
    }
}

// Writes a single table directory entry with zeroed checksum/offset/length
fn write_empty_directory_entry(output: &mut impl BufMut, tag: Tag) {
    output.put_u32(u32::from_be_bytes(tag.to_be_bytes()));
    output.put_u32(0);
    output.put_u32(0);
    output.put_u32(0);
}
