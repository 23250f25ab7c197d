//! Per-version Jet format descriptors.
//!
//! Every structural constant that differs between Jet versions lives in a
//! [`JetFormat`]: page size, maximum database size, header offsets for data
//! pages, index pages, and table definitions, the text charset, and the
//! index-encoding conventions. The descriptor is selected once from the
//! version byte at file offset 20 (0x00 = v3, 0x01 = v4, 0x02 = v5) and
//! injected read-only into every codec.
//!
//! Use [`JetFormat::from_version_byte`] or [`JetFormat::detect`] to select
//! a descriptor; the three concrete descriptors are the statics
//! [`FORMAT_V3`], [`FORMAT_V4`], and [`FORMAT_V5`].

use serde::Serialize;

use crate::jet::constants::*;
use crate::JetError;

/// Jet format generations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum JetVersion {
    /// Access 97. 2 KiB pages, single-byte charset, read-only here.
    V3,
    /// Access 2000-2007. 4 KiB pages, UTF-16LE text.
    V4,
    /// Access 2010+. Like v4 with the newer text sort order.
    V5,
}

/// Charset used for text column storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Charset {
    /// Windows code page 1252 (single byte), used by v3 files.
    Cp1252,
    /// UTF-16 little-endian, used by v4+ files.
    Utf16Le,
}

/// Text index sort orders this engine can encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SortOrder {
    /// "General" collation as written by Access 2000-2007.
    GeneralLegacy,
    /// "General" collation as written by Access 2010+.
    General,
}

impl SortOrder {
    /// On-disk sort order word in the database header.
    pub fn to_word(self) -> u16 {
        match self {
            SortOrder::GeneralLegacy => 0x0409,
            SortOrder::General => 0x040A,
        }
    }

    /// Resolve a header sort order word.
    ///
    /// Orders other than the two General variants exist in the wild but are
    /// not encodable here; they surface as [`JetError::Unsupported`].
    pub fn from_word(word: u16) -> Result<Self, JetError> {
        match word {
            0x0409 => Ok(SortOrder::GeneralLegacy),
            0x040A => Ok(SortOrder::General),
            other => Err(JetError::Unsupported(format!(
                "text sort order 0x{:04X}",
                other
            ))),
        }
    }
}

/// Structural constants for one Jet version.
///
/// All fields are fixed after selection; the engine never mutates a format.
#[derive(Debug)]
pub struct JetFormat {
    /// Format generation.
    pub version: JetVersion,
    /// Version byte stored at file offset 20.
    pub version_byte: u8,
    /// Display name.
    pub name: &'static str,
    /// Page size in bytes (2048 for v3, 4096 for v4+).
    pub page_size: usize,
    /// Largest file this format may address.
    pub max_database_size: u64,
    /// True when this engine can only read the format (v3).
    pub read_only: bool,
    /// Charset for text column bytes.
    pub charset: Charset,
    /// Default text sort order for new indexes.
    pub default_sort_order: SortOrder,
    /// True when fixed-point index keys use the legacy sign-byte
    /// convention (overwrite after complement) instead of the new one.
    pub legacy_numeric_indexes: bool,
    /// True when the paged (multi-page cache) index variant is available.
    pub supports_paged_indexes: bool,

    /// Size in bytes of the row column count field (1 for v3, 2 for v4+).
    pub size_row_column_count: usize,
    /// Offset of the row count on a data page.
    pub offset_data_row_count: usize,
    /// Largest row body a data page accepts.
    pub max_row_size: usize,

    /// Offset of the previous-sibling pointer on an index page.
    pub offset_index_prev_page: usize,
    /// Offset of the entry bitmask on an index page.
    pub offset_index_entry_mask: usize,
    /// Size of the index entry bitmask in bytes.
    pub index_entry_mask_size: usize,

    /// Size of a per-index slot block in the table definition.
    pub size_index_slot: usize,
    /// Size of a column descriptor block in the table definition.
    pub size_column_header: usize,
    /// Spacer before the root page field in an index descriptor block.
    pub skip_before_index_root: usize,
    /// Size of a logical-index block in the table definition.
    pub size_logical_index: usize,
}

/// Serializable summary of a detected format.
#[derive(Debug, Clone, Serialize)]
pub struct FormatInfo {
    /// Format generation.
    pub version: JetVersion,
    /// Display name.
    pub name: String,
    /// Page size in bytes.
    pub page_size: usize,
    /// True when the format is read-only for this engine.
    pub read_only: bool,
    /// Text charset.
    pub charset: Charset,
    /// Default sort order for new text indexes.
    pub default_sort_order: SortOrder,
}

/// Jet 3 (Access 97).
pub static FORMAT_V3: JetFormat = JetFormat {
    version: JetVersion::V3,
    version_byte: 0x00,
    name: "VERSION_3",
    page_size: 2048,
    max_database_size: 1 << 30,
    read_only: true,
    charset: Charset::Cp1252,
    default_sort_order: SortOrder::GeneralLegacy,
    legacy_numeric_indexes: true,
    supports_paged_indexes: false,
    size_row_column_count: 1,
    offset_data_row_count: 0x08,
    max_row_size: 2048 - 0x0A - 2,
    offset_index_prev_page: 0x08,
    offset_index_entry_mask: 0x18,
    // one bit per entry byte: (2048 - 0x18) / 9, rounded up
    index_entry_mask_size: 225,
    size_index_slot: 4,
    size_column_header: 14,
    skip_before_index_root: 0,
    size_logical_index: 10,
};

/// Jet 4 (Access 2000-2007).
pub static FORMAT_V4: JetFormat = JetFormat {
    version: JetVersion::V4,
    version_byte: 0x01,
    name: "VERSION_4",
    page_size: 4096,
    max_database_size: 2 << 30,
    read_only: false,
    charset: Charset::Utf16Le,
    default_sort_order: SortOrder::GeneralLegacy,
    legacy_numeric_indexes: true,
    supports_paged_indexes: true,
    size_row_column_count: 2,
    offset_data_row_count: 0x0C,
    max_row_size: 4096 - 0x0E - 2,
    offset_index_prev_page: 0x0C,
    offset_index_entry_mask: 0x1C,
    // (4096 - 0x1C) / 9, rounded up
    index_entry_mask_size: 452,
    size_index_slot: 8,
    size_column_header: 18,
    skip_before_index_root: 4,
    size_logical_index: 12,
};

/// Jet 5 (Access 2010+). Identical to v4 apart from the text sort order
/// and the new fixed-point index convention.
pub static FORMAT_V5: JetFormat = JetFormat {
    version: JetVersion::V5,
    version_byte: 0x02,
    name: "VERSION_5",
    page_size: 4096,
    max_database_size: 2 << 30,
    read_only: false,
    charset: Charset::Utf16Le,
    default_sort_order: SortOrder::General,
    legacy_numeric_indexes: false,
    supports_paged_indexes: true,
    size_row_column_count: 2,
    offset_data_row_count: 0x0C,
    max_row_size: 4096 - 0x0E - 2,
    offset_index_prev_page: 0x0C,
    offset_index_entry_mask: 0x1C,
    index_entry_mask_size: 452,
    size_index_slot: 8,
    size_column_header: 18,
    skip_before_index_root: 4,
    size_logical_index: 12,
};

impl JetFormat {
    /// Select a format descriptor from the header version byte.
    pub fn from_version_byte(byte: u8) -> Result<&'static JetFormat, JetError> {
        match byte {
            0x00 => Ok(&FORMAT_V3),
            0x01 => Ok(&FORMAT_V4),
            0x02 => Ok(&FORMAT_V5),
            other => Err(JetError::Corrupt(format!(
                "unknown format version byte 0x{:02X}",
                other
            ))),
        }
    }

    /// Detect the format from a database header page.
    ///
    /// Checks the magic bytes and the engine name before trusting the
    /// version byte at [`OFFSET_VERSION`].
    pub fn detect(header: &[u8]) -> Result<&'static JetFormat, JetError> {
        if header.len() < OFFSET_SORT_ORDER + 2 {
            return Err(JetError::Corrupt(format!(
                "header page too short: {} bytes",
                header.len()
            )));
        }
        if header[OFFSET_MAGIC..OFFSET_MAGIC + 2] != HEADER_MAGIC {
            return Err(JetError::Corrupt("bad header magic".to_string()));
        }
        if &header[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + ENGINE_NAME.len()]
            != ENGINE_NAME.as_slice()
        {
            return Err(JetError::Corrupt("unrecognized engine name".to_string()));
        }
        Self::from_version_byte(header[OFFSET_VERSION])
    }

    /// Offset of the row pointer table on a data page.
    pub fn data_row_table_start(&self) -> usize {
        self.offset_data_row_count + 2
    }

    /// Offset of the next-sibling pointer on an index page.
    pub fn offset_index_next_page(&self) -> usize {
        self.offset_index_prev_page + 4
    }

    /// Offset of the child-tail pointer on an index (node) page.
    pub fn offset_index_child_tail(&self) -> usize {
        self.offset_index_prev_page + 8
    }

    /// Offset of the entry prefix length on an index page.
    pub fn offset_index_prefix_len(&self) -> usize {
        self.offset_index_prev_page + 12
    }

    /// Bytes available for prefix + packed entries on an index page.
    pub fn index_entry_area_size(&self) -> usize {
        self.page_size - self.offset_index_entry_mask - self.index_entry_mask_size
    }

    /// Serializable view of this descriptor.
    pub fn info(&self) -> FormatInfo {
        FormatInfo {
            version: self.version,
            name: self.name.to_string(),
            page_size: self.page_size,
            read_only: self.read_only,
            charset: self.charset,
            default_sort_order: self.default_sort_order,
        }
    }
}
