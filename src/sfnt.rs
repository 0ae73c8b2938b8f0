//! SFNT (TTF/OTF) table directory model
//!
//! Parses the table directory of an uncompressed font (or each font of a
//! TrueType collection) for the encode path, and provides the directory
//! header writer shared with the decode path.

use bytes::{Buf, BufMut};
use font_types::Tag;

use crate::error::{Woff2Error, bail, bail_if};
use crate::table_tags::TTCF;
use crate::woff::headers::{SFNT_ENTRY_SIZE, SFNT_HEADER_SIZE};

const TRUETYPE_FLAVOR: Tag = Tag::new(&[0x00, 0x01, 0x00, 0x00]);
const CFF_FLAVOR: Tag = Tag::new(b"OTTO");
const APPLE_TRUETYPE_FLAVOR: Tag = Tag::new(b"true");

/// A single entry of an sfnt table directory
#[derive(Clone, Copy)]
pub(crate) struct SfntTableRecord {
    pub tag: Tag,
    pub checksum: u32,
    /// Byte offset of the table data from the start of the file
    pub offset: u32,
    pub length: u32,
}

impl SfntTableRecord {
    pub fn data_as_slice<'a>(&self, data: &'a [u8]) -> Result<&'a [u8], Woff2Error> {
        let start = self.offset as usize;
        let end = start + self.length as usize;
        data.get(start..end).ok_or(Woff2Error::Malformed)
    }
}

/// The table directory of one font within an sfnt file
pub(crate) struct SfntFont {
    pub flavor: Tag,
    /// Directory records, normalized to sorted tag order
    pub tables: Vec<SfntTableRecord>,
}

impl SfntFont {
    /// Parse the table directory found at `directory_offset` within `data`.
    ///
    /// Validates the sfnt version tag, that every record's data lies within
    /// the file, and that tags are unique. Out-of-order directories are
    /// tolerated and normalized to sorted tag order.
    pub fn parse(data: &[u8], directory_offset: usize) -> Result<Self, Woff2Error> {
        let mut input = data.get(directory_offset..).ok_or(Woff2Error::OutOfBounds)?;

        let flavor = Tag::from_u32(input.try_get_u32()?);
        bail_if!(
            flavor != TRUETYPE_FLAVOR && flavor != CFF_FLAVOR && flavor != APPLE_TRUETYPE_FLAVOR
        );

        let num_tables = input.try_get_u16()?;
        bail_if!(num_tables == 0);
        let _search_range = input.try_get_u16()?;
        let _entry_selector = input.try_get_u16()?;
        let _range_shift = input.try_get_u16()?;

        let mut tables = Vec::with_capacity(num_tables as usize);
        for _ in 0..num_tables {
            let record = SfntTableRecord {
                tag: Tag::from_u32(input.try_get_u32()?),
                checksum: input.try_get_u32()?,
                offset: input.try_get_u32()?,
                length: input.try_get_u32()?,
            };

            // Table data must lie within the file
            let end = (record.offset as usize)
                .checked_add(record.length as usize)
                .ok_or(Woff2Error::Malformed)?;
            bail_if!(end > data.len());

            tables.push(record);
        }

        // Normalize to sorted tag order. Conformant fonts are already sorted;
        // out-of-order directories are tolerated rather than rejected.
        tables.sort_by_key(|record| record.tag);

        // Within a font, tags must be unique
        bail_if!(tables.windows(2).any(|pair| pair[0].tag == pair[1].tag));

        Ok(Self { flavor, tables })
    }

    pub fn table_by_tag(&self, tag: Tag) -> Option<&SfntTableRecord> {
        self.tables
            .binary_search_by_key(&tag, |record| record.tag)
            .ok()
            .map(|idx| &self.tables[idx])
    }
}

/// An sfnt file: either a single font or a TrueType collection
pub(crate) struct SfntInput {
    /// TTC header version, if the input is a collection
    pub collection_version: Option<u32>,
    pub fonts: Vec<SfntFont>,
}

impl SfntInput {
    pub fn parse(data: &[u8]) -> Result<Self, Woff2Error> {
        let mut input = data;
        let first_tag = Tag::from_u32(input.try_get_u32()?);

        if first_tag != TTCF {
            return Ok(Self {
                collection_version: None,
                fonts: vec![SfntFont::parse(data, 0)?],
            });
        }

        // TrueType collection: ttcf tag, version, numFonts, then a table
        // directory offset per font.
        let version = input.try_get_u32()?;
        bail_if!(version != 0x00010000 && version != 0x00020000);
        let num_fonts = input.try_get_u32()?;
        bail_if!(num_fonts == 0 || num_fonts > u16::MAX as u32);

        let mut fonts = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            let directory_offset = input.try_get_u32()? as usize;
            fonts.push(SfntFont::parse(data, directory_offset)?);
        }

        Ok(Self {
            collection_version: Some(version),
            fonts,
        })
    }

    pub fn is_collection(&self) -> bool {
        self.collection_version.is_some()
    }
}

/// Writes an OpenType table directory header
///
/// The searchRange/entrySelector/rangeShift fields are deterministic
/// functions of numTables and are always recomputed, never copied from input.
///
/// <https://learn.microsoft.com/en-us/typography/opentype/spec/otff#table-directory>
pub(crate) fn write_sfnt_directory_header(output: &mut impl BufMut, flavor: Tag, num_tables: u16) {
    let mut max_pow2: u16 = 0;
    while 1u32 << (max_pow2 + 1) <= (num_tables as u32) {
        max_pow2 += 1;
    }
    let entry_selector = max_pow2;
    let search_range: u16 = (1u16 << max_pow2) << 4;
    let range_shift = (((num_tables as u32) << 4) - search_range as u32) as u16;

    output.put_u32(u32::from_be_bytes(flavor.to_be_bytes())); // sfnt version
    output.put_u16(num_tables);
    output.put_u16(search_range);
    output.put_u16(entry_selector);
    output.put_u16(range_shift);
}

/// Size of the sfnt header and table directory for a font with `num_tables` tables
pub(crate) fn sfnt_directory_size(num_tables: usize) -> usize {
    SFNT_HEADER_SIZE + SFNT_ENTRY_SIZE * num_tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Woff2Error;

    fn directory_bytes(records: &[(Tag, u32, u32)], file_len: usize) -> Vec<u8> {
        let mut data: Vec<u8> = Vec::new();
        write_sfnt_directory_header(&mut data, TRUETYPE_FLAVOR, records.len() as u16);
        for &(tag, offset, length) in records {
            data.put_u32(u32::from_be_bytes(tag.to_be_bytes()));
            data.put_u32(0); // checksum
            data.put_u32(offset);
            data.put_u32(length);
        }
        data.resize(file_len, 0);
        data
    }

    #[test]
    fn parse_normalizes_table_order() {
        let records = [
            (Tag::new(b"maxp"), 44, 6),
            (Tag::new(b"head"), 50, 4),
        ];
        let data = directory_bytes(&records, 64);
        let font = SfntFont::parse(&data, 0).unwrap();
        assert_eq!(font.tables[0].tag, Tag::new(b"head"));
        assert_eq!(font.tables[1].tag, Tag::new(b"maxp"));
        assert!(font.table_by_tag(Tag::new(b"maxp")).is_some());
        assert!(font.table_by_tag(Tag::new(b"loca")).is_none());
    }

    #[test]
    fn parse_rejects_duplicate_tags() {
        let records = [
            (Tag::new(b"head"), 44, 4),
            (Tag::new(b"head"), 48, 4),
        ];
        let data = directory_bytes(&records, 64);
        assert!(matches!(
            SfntFont::parse(&data, 0),
            Err(Woff2Error::Malformed)
        ));
    }

    #[test]
    fn parse_rejects_out_of_bounds_table() {
        let records = [(Tag::new(b"head"), 60, 8)];
        let data = directory_bytes(&records, 64);
        assert!(matches!(
            SfntFont::parse(&data, 0),
            Err(Woff2Error::Malformed)
        ));
    }

    #[test]
    fn search_range_fields() {
        // 11 tables: entrySelector=3, searchRange=128, rangeShift=11*16-128=48
        let mut out: Vec<u8> = Vec::new();
        write_sfnt_directory_header(&mut out, TRUETYPE_FLAVOR, 11);
        assert_eq!(&out[4..6], &11u16.to_be_bytes());
        assert_eq!(&out[6..8], &128u16.to_be_bytes());
        assert_eq!(&out[8..10], &3u16.to_be_bytes());
        assert_eq!(&out[10..12], &48u16.to_be_bytes());
    }
}
