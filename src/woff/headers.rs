//! WOFF2 container structures: header, table directory, collection directory

use std::collections::HashMap;

use bytes::Buf;
use font_types::Tag;

use crate::error::{Woff2Error, bail, bail_if, bail_with_msg_if, usize_will_overflow};
use crate::table_tags::{GLYF, HEAD, HHEA, KNOWN_TABLE_TAGS, LOCA, TTCF};
use crate::variable_length::BufVariableExt;

pub const WOFF2_SIG: Tag = Tag::new(b"wOF2");

/// Size of the fixed WOFF2 header in bytes
pub const WOFF2_HEADER_SIZE: usize = 48;

pub const SFNT_HEADER_SIZE: usize = 12;
pub const SFNT_ENTRY_SIZE: usize = 16;

/// Accumulates data we may need to reconstruct a single font.
///
/// For a TTC, we store one per font in the collection.
/// For a single font we store exactly one of these in total.
#[derive(Clone, Default)]
pub(crate) struct Woff2FontInfo {
    /// Map of table tag to the byte offset of that table's entry in the table directory in the output file.
    /// Allows the checksum, offset and length of the table to be written into the table directory once they are known.
    pub table_entry_by_tag: HashMap<Tag, usize>,
    /// Checksum of the output header
    pub header_checksum: u32,
}

/// <https://www.w3.org/TR/WOFF2/#woff20Header>
pub struct Woff2Header {
    /// Always b"wOF2"
    pub signature: Tag,
    /// The "sfnt version" of the input font.
    pub flavor: Tag,
    /// Total size of the WOFF file.
    pub length: u32,
    /// Number of entries in directory of font tables.
    pub num_tables: u16,
    /// Reserved; set to 0.
    pub reserved: u16,
    /// Total size needed for the uncompressed font data, including the sfnt header, directory, and font tables (including padding).
    pub total_sfnt_size: u32,
    /// Total length of the compressed data block.
    pub total_compressed_size: u32,
    /// Major version of the WOFF file.
    pub major_version: u16,
    /// Minor version of the WOFF file.
    pub minor_version: u16,
    /// Offset to metadata block, from beginning of WOFF file.
    pub meta_offset: u32,
    /// Length of compressed metadata block.
    pub meta_length: u32,
    /// Uncompressed size of metadata block.
    pub meta_orig_length: u32,
    /// Offset to private data block, from beginning of WOFF file.
    pub priv_offset: u32,
    /// Length of private data block.
    pub priv_length: u32,
}

impl Woff2Header {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Woff2Error> {
        // Compared as usize: a buffer longer than u32::MAX can never match the
        // header's 32-bit length field, so it must not wrap into a value that does
        let input_len = input.remaining();

        let signature = Tag::from_u32(input.try_get_u32()?);
        bail_if!(signature != WOFF2_SIG);

        let header = Self {
            signature,
            flavor: Tag::from_u32(input.try_get_u32()?),
            length: input.try_get_u32()?,
            num_tables: input.try_get_u16()?,
            reserved: input.try_get_u16()?,
            total_sfnt_size: input.try_get_u32()?,
            total_compressed_size: input.try_get_u32()?,
            major_version: input.try_get_u16()?,
            minor_version: input.try_get_u16()?,
            meta_offset: input.try_get_u32()?,
            meta_length: input.try_get_u32()?,
            meta_orig_length: input.try_get_u32()?,
            priv_offset: input.try_get_u32()?,
            priv_length: input.try_get_u32()?,
        };

        // Validate
        bail_if!(header.length as usize != input_len);
        bail_if!(header.num_tables == 0);
        bail_if!(header.reserved != 0);
        if header.meta_offset != 0 {
            bail_if!(
                header.meta_offset as usize >= input_len
                    || (input_len - header.meta_offset as usize) < header.meta_length as usize
            );
        }
        if header.priv_offset != 0 {
            bail_if!(
                header.priv_offset as usize >= input_len
                    || (input_len - header.priv_offset as usize) < header.priv_length as usize
            );
        }

        Ok(header)
    }

    pub fn is_collection(&self) -> bool {
        self.flavor == TTCF
    }
}

/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
pub struct Woff2TableDirectory {
    pub tables: Vec<Woff2TableDirectoryEntry>,
}

impl std::ops::Index<usize> for Woff2TableDirectory {
    type Output = Woff2TableDirectoryEntry;
    fn index(&self, index: usize) -> &Self::Output {
        &self.tables[index]
    }
}

impl Woff2TableDirectory {
    pub fn parse(input: &mut impl Buf, num_tables: usize) -> Result<Self, Woff2Error> {
        // Tables in the CompressedFontData field of the WOFF are stored directly after each other
        // in the order they are specified in the directory. So we can determine the offset of each
        // table within the decompressed stream by adding up the lengths of the preceding tables.
        //
        // <https://www.w3.org/TR/WOFF2/#table_format>
        let mut offset_in_stream: usize = 0;

        let mut tables = Vec::with_capacity(num_tables);
        for _ in 0..num_tables {
            let mut table = Woff2TableDirectoryEntry::parse(input)?;
            table.woff_offset = offset_in_stream as u32;

            let stream_length = table.stream_length() as usize;
            bail_if!(usize_will_overflow(offset_in_stream, stream_length));
            offset_in_stream += stream_length;

            tables.push(table);
        }

        Ok(Self { tables })
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// Total length of the decompressed stream implied by the directory:
    /// the sum of each table's in-stream length.
    pub fn total_stream_length(&self) -> usize {
        self.tables
            .iter()
            .map(|table| table.stream_length() as usize)
            .sum()
    }
}

/// <https://www.w3.org/TR/WOFF2/#table_dir_format>
pub struct Woff2TableDirectoryEntry {
    /// 4-byte table tag
    pub tag: Tag,
    /// 2-bit preprocessing transform version number from the flags byte
    pub transform_version: u8,
    /// Length of the original (untransformed) table
    pub orig_length: u32, // UIntBase128
    /// Length of the transformed table. Only present on the wire when a
    /// non-null transform applies to this table.
    pub transform_length: Option<u32>, // UIntBase128
    /// Offset of the table within the decompressed data stream. Computed, not on the wire.
    pub woff_offset: u32,
}

impl Woff2TableDirectoryEntry {
    pub fn parse(input: &mut impl Buf) -> Result<Self, Woff2Error> {
        let flags = input.try_get_u8()?;
        let (known_tag, transform_version) = Self::parse_flags(flags);

        // The tag field is only present in the input if flag bits 0-5 are 0x3f
        let tag = match known_tag {
            Some(tag) => tag,
            None => Tag::from_u32(input.try_get_u32()?),
        };

        let transformed = is_transformed(tag, transform_version)?;

        let entry = Self {
            tag,
            transform_version,
            orig_length: input.try_get_variable_128_u32()?,
            transform_length: match transformed {
                true => Some(input.try_get_variable_128_u32()?),
                false => None,
            },
            woff_offset: 0, // Set in Woff2TableDirectory::parse
        };

        // A transformed loca table carries no data of its own: it is
        // regenerated from the reconstructed glyf table.
        // <https://dev.w3.org/webfonts/WOFF2/spec/#conform-transformedLocaMustBeZero>
        bail_if!(entry.tag == LOCA && transformed && entry.transform_length != Some(0));

        Ok(entry)
    }

    /// Parse flags field into "known tag" and "transform version"
    ///
    /// Bits [0..5] contain an index into the "known tag" table, which represents tags
    /// likely to appear in fonts. If the tag is not present in this table, then the value
    /// of this bit field is 63. Bits 6 and 7 indicate the preprocessing transform
    /// version number (0-3) that was applied to the table.
    pub fn parse_flags(flags: u8) -> (Option<Tag>, u8) {
        const TAG_MASK: u8 = 0b00111111;
        const VERSION_MASK: u8 = 0b11000000;
        let tag_bits = flags & TAG_MASK;
        let version = (flags & VERSION_MASK) >> 6;
        let tag = KNOWN_TABLE_TAGS.get(tag_bits as usize).copied();
        (tag, version)
    }

    /// Whether a non-null transform applies to the table
    pub fn is_transformed(&self) -> bool {
        // Unknown versions were already rejected during parsing
        is_transformed(self.tag, self.transform_version).unwrap_or(false)
    }

    /// Length of the table's data within the decompressed stream
    pub fn stream_length(&self) -> u32 {
        self.transform_length.unwrap_or(self.orig_length)
    }

    pub fn data_as_slice<'a>(&self, stream: &'a [u8]) -> Result<&'a [u8], Woff2Error> {
        let start = self.woff_offset as usize;
        let end = start + self.stream_length() as usize;
        stream.get(start..end).ok_or(Woff2Error::OutOfBounds)
    }
}

/// Whether `transform_version` indicates a non-null transform for `tag`.
///
/// For all tables except 'glyf' and 'loca', version 0 is the null transform.
/// For 'glyf' and 'loca' the convention is inverted: version 0 indicates the
/// transform *applies* and version 3 is the null transform. This inversion is
/// a special case of the wire format, not a general rule.
///
/// Versions outside the documented set are malformed; the engine never
/// guesses at an interpretation.
pub(crate) fn is_transformed(tag: Tag, transform_version: u8) -> Result<bool, Woff2Error> {
    match (tag.as_ref(), transform_version) {
        (b"glyf" | b"loca", 0) => Ok(true),
        (b"glyf" | b"loca", 3) => Ok(false),
        (b"glyf" | b"loca", _) => Err(Woff2Error::Malformed),
        (b"hmtx", 1) => Ok(true),
        (_, 0) => Ok(false),
        _ => Err(Woff2Error::Malformed),
    }
}

/// <https://www.w3.org/TR/WOFF2/#collection_dir_format>
pub struct CollectionDirectory {
    /// The Version of the TTC Header in the original font.
    pub version: u32,
    /// One entry per font in the collection
    pub fonts: Vec<CollectionDirectoryEntry>,
}

impl CollectionDirectory {
    pub fn parse(
        input: &mut impl Buf,
        table_directory: &Woff2TableDirectory,
    ) -> Result<Self, Woff2Error> {
        let version = input.try_get_u32()?;
        let num_fonts = input.try_get_variable_255_u16()?;

        bail_if!(version != 0x00010000 && version != 0x00020000);
        bail_if!(num_fonts == 0);

        let mut fonts = Vec::with_capacity(num_fonts as usize);
        for _ in 0..num_fonts {
            fonts.push(CollectionDirectoryEntry::parse(input, table_directory)?);
        }

        Ok(Self { version, fonts })
    }

    /// Generate a fake `CollectionDirectory` for a single font so that we can share
    /// reconstruction logic between collection and single fonts.
    pub fn generate_for_single_font(flavor: Tag, table_directory: &Woff2TableDirectory) -> Self {
        let table_indices: Vec<u16> = (0..(table_directory.len() as u16)).collect();
        let mut head_idx: Option<u16> = None;
        let mut hhea_idx: Option<u16> = None;
        let mut glyf_idx: Option<u16> = None;
        let mut loca_idx: Option<u16> = None;
        for (table_index, table) in table_directory.tables.iter().enumerate() {
            match table.tag {
                t if t == HEAD => head_idx = Some(table_index as u16),
                t if t == HHEA => hhea_idx = Some(table_index as u16),
                t if t == GLYF => glyf_idx = Some(table_index as u16),
                t if t == LOCA => loca_idx = Some(table_index as u16),
                _ => { /* do nothing */ }
            }
        }
        Self {
            version: 0x00010000, // Hardcode: will be ignored
            fonts: vec![CollectionDirectoryEntry {
                flavor,
                table_indices,
                head_idx,
                hhea_idx,
                glyf_idx,
                loca_idx,
            }],
        }
    }

    pub fn sort_tables_within_each_font(&mut self, tables: &Woff2TableDirectory) {
        for font in &mut self.fonts {
            font.table_indices
                .sort_by_cached_key(|idx| tables[*idx as usize].tag);
        }
    }

    /// Size of the collection (TTC) header in the reconstructed sfnt.
    /// Zero when reconstructing a single font.
    /// Ref <http://www.microsoft.com/typography/otspec/otff.htm>, True Type Collections
    pub(crate) fn collection_header_required_size(&self, is_collection: bool) -> usize {
        if !is_collection {
            return 0;
        }
        let mut size: usize = 12 + 4 * self.fonts.len(); // TTCTag, Version, numFonts, OffsetTable[numFonts]
        if self.version == 0x00020000 {
            size += 12; // ulDsig{Tag,Length,Offset}
        }
        size
    }

    /// Combined size of every font's sfnt table directory in the reconstructed file
    pub(crate) fn table_directories_required_size(&self) -> usize {
        (SFNT_HEADER_SIZE * self.fonts.len())
            + self
                .fonts
                .iter()
                .map(|font| SFNT_ENTRY_SIZE * font.table_indices.len())
                .sum::<usize>()
    }
}

/// <https://www.w3.org/TR/WOFF2/#collection_dir_format>
pub struct CollectionDirectoryEntry {
    /// The "sfnt version" of the font
    pub flavor: Tag,
    /// In a TTC file, each font references some subset of the tables in the file.
    /// This field records which tables this particular font references.
    pub table_indices: Vec<u16>, // 255UInt16
    // Cache the indices of specific tables that we want random access to
    pub head_idx: Option<u16>,
    pub hhea_idx: Option<u16>,
    pub glyf_idx: Option<u16>,
    pub loca_idx: Option<u16>,
}

impl CollectionDirectoryEntry {
    pub fn parse(input: &mut impl Buf, tables: &Woff2TableDirectory) -> Result<Self, Woff2Error> {
        let num_tables = input.try_get_variable_255_u16()?;
        let flavor = Tag::from_u32(input.try_get_u32()?);

        bail_if!(num_tables == 0);

        let mut head_idx: Option<u16> = None;
        let mut hhea_idx: Option<u16> = None;
        let mut glyf_idx: Option<u16> = None;
        let mut loca_idx: Option<u16> = None;
        let mut table_indices = Vec::with_capacity(num_tables as usize);
        for _ in 0..num_tables {
            let table_index = input.try_get_variable_255_u16()?;
            bail_if!(table_index as usize >= tables.len());

            match tables[table_index as usize].tag {
                t if t == HEAD => head_idx = Some(table_index),
                t if t == HHEA => hhea_idx = Some(table_index),
                t if t == GLYF => glyf_idx = Some(table_index),
                t if t == LOCA => loca_idx = Some(table_index),
                _ => { /* do nothing */ }
            }

            table_indices.push(table_index);
        }

        // If we have both glyf and loca make sure they are consecutive.
        // Reject if we only have one.
        match (glyf_idx, loca_idx) {
            (Some(glyf_idx), Some(loca_idx)) => {
                bail_with_msg_if!(
                    glyf_idx > loca_idx || loca_idx - glyf_idx != 1,
                    "TTC font has non-consecutive glyf/loca"
                );
            }
            (Some(_), None) | (None, Some(_)) => bail!(),
            (None, None) => {}
        };

        Ok(Self {
            flavor,
            table_indices,
            head_idx,
            hhea_idx,
            glyf_idx,
            loca_idx,
        })
    }

    pub fn num_tables(&self) -> usize {
        self.table_indices.len()
    }

    /// The size required for an sfnt table directory for this font
    pub fn table_directory_size(&self) -> usize {
        SFNT_HEADER_SIZE + (SFNT_ENTRY_SIZE * self.num_tables())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_version_conventions() {
        // glyf/loca: 0 means transformed, 3 means null, 1-2 reserved
        assert_eq!(is_transformed(GLYF, 0), Ok(true));
        assert_eq!(is_transformed(LOCA, 0), Ok(true));
        assert_eq!(is_transformed(GLYF, 3), Ok(false));
        assert_eq!(is_transformed(LOCA, 3), Ok(false));
        assert_eq!(is_transformed(GLYF, 1), Err(Woff2Error::Malformed));
        assert_eq!(is_transformed(GLYF, 2), Err(Woff2Error::Malformed));

        // hmtx: 0 null, 1 transformed
        assert_eq!(is_transformed(Tag::new(b"hmtx"), 0), Ok(false));
        assert_eq!(is_transformed(Tag::new(b"hmtx"), 1), Ok(true));
        assert_eq!(is_transformed(Tag::new(b"hmtx"), 2), Err(Woff2Error::Malformed));

        // everything else: only the null transform exists
        assert_eq!(is_transformed(Tag::new(b"cmap"), 0), Ok(false));
        assert_eq!(is_transformed(Tag::new(b"cmap"), 1), Err(Woff2Error::Malformed));
    }

    #[test]
    fn entry_flag_parsing() {
        // Known tag index 10 = glyf, version bits in bits 6-7
        let (tag, version) = Woff2TableDirectoryEntry::parse_flags(10);
        assert_eq!(tag, Some(GLYF));
        assert_eq!(version, 0);

        let (tag, version) = Woff2TableDirectoryEntry::parse_flags(0x3f | 0b0100_0000);
        assert_eq!(tag, None);
        assert_eq!(version, 1);
    }

    #[test]
    fn truncated_header_is_rejected() {
        let bytes = [b'w', b'O', b'F', b'2', 0, 1];
        let mut input = &bytes[..];
        assert!(Woff2Header::parse(&mut input).is_err());
    }

    #[test]
    fn header_length_must_match_buffer_length() {
        // Bare 48-byte header declaring its own length
        let mut bytes: Vec<u8> = Vec::new();
        bytes.extend_from_slice(b"wOF2");
        bytes.extend_from_slice(&0x00010000u32.to_be_bytes()); // flavor
        bytes.extend_from_slice(&48u32.to_be_bytes()); // length
        bytes.extend_from_slice(&1u16.to_be_bytes()); // numTables
        bytes.resize(48, 0);

        let mut input = &bytes[..];
        assert!(Woff2Header::parse(&mut input).is_ok());

        // Trailing bytes beyond the declared length are rejected
        bytes.push(0);
        let mut input = &bytes[..];
        assert!(matches!(
            Woff2Header::parse(&mut input),
            Err(Woff2Error::Malformed)
        ));
    }
}
