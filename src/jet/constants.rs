//! Jet page and structure constants.
//!
//! Values shared across format versions. Per-version sizes and offsets live
//! in [`crate::jet::format::JetFormat`]; this module keeps the constants
//! that never vary: page type tags, row pointer flag bits, the deallocated
//! page marker, usage map storage codes, and catalog object types.

// ── Page type tags (byte 0 of every page) ───────────────────────────

/// Deallocated or never-written page.
pub const PAGE_TYPE_INVALID: u8 = 0x00;
/// Data page holding table rows.
pub const PAGE_TYPE_DATA: u8 = 0x01;
/// Table definition page (possibly chained).
pub const PAGE_TYPE_TABLE_DEF: u8 = 0x02;
/// Index interior (node) page.
pub const PAGE_TYPE_INDEX_NODE: u8 = 0x03;
/// Index leaf page.
pub const PAGE_TYPE_INDEX_LEAF: u8 = 0x04;
/// Dedicated usage-map bitmap page.
pub const PAGE_TYPE_USAGE_MAP: u8 = 0x05;
/// Long value (memo/OLE overflow) page.
pub const PAGE_TYPE_LONG_VALUE: u8 = 0x06;

/// Marker byte written at offset 1 of every live page.
pub const PAGE_MARKER: u8 = 0x01;

/// Bytes written over the head of a deallocated page: the invalid type tag
/// followed by three sentinel bytes.
pub const DEALLOCATED_MARKER: [u8; 4] = [PAGE_TYPE_INVALID, 0xFF, 0xFF, 0xFF];

// ── Page numbers ────────────────────────────────────────────────────

/// Invalid page number sentinel.
pub const INVALID_PAGE_NUMBER: i32 = -1;
/// Database header page.
pub const PAGE_DB_HEADER: u32 = 0;
/// Page holding the global free-page usage map row.
pub const PAGE_GLOBAL_USAGE_MAP: u32 = 1;
/// Page of the system catalog table definition.
pub const PAGE_SYSTEM_CATALOG: u32 = 2;

// ── Database header fields (page 0) ─────────────────────────────────

/// Offset of the two magic bytes.
pub const OFFSET_MAGIC: usize = 0;
/// The magic bytes at the head of the file.
pub const HEADER_MAGIC: [u8; 2] = [0x00, 0x01];
/// Offset of the engine name string.
pub const OFFSET_ENGINE_NAME: usize = 4;
/// Engine name written into every header (15 bytes + NUL).
pub const ENGINE_NAME: &[u8; 15] = b"Standard Jet DB";
/// Offset of the format version byte.
pub const OFFSET_VERSION: usize = 20;
/// Offset of the creation date (8-byte double, days since 1899-12-30).
pub const OFFSET_CREATION_DATE: usize = 24;
/// Offset of the encryption flags word (non-zero means encrypted).
pub const OFFSET_ENCRYPTION_FLAGS: usize = 32;
/// Offset of the default charset code for text columns.
pub const OFFSET_CHARSET: usize = 36;
/// Offset of the default text sort order word.
pub const OFFSET_SORT_ORDER: usize = 38;

// ── Row pointers (2-byte entries in the data page offset table) ─────

/// Mask extracting the row's byte offset within its page.
pub const ROW_OFFSET_MASK: u16 = 0x1FFF;
/// Row pointer flag: the row has been deleted.
pub const ROW_DELETED_MASK: u16 = 0x8000;
/// Row pointer flag: the bytes at the offset are a forwarding pointer to
/// the row's real location on another page.
pub const ROW_OVERFLOW_MASK: u16 = 0x4000;

// ── Usage maps ──────────────────────────────────────────────────────

/// Usage map stored inline in its row.
pub const USAGE_MAP_INLINE: u8 = 0x00;
/// Usage map stored as a list of dedicated bitmap pages.
pub const USAGE_MAP_REFERENCE: u8 = 0x01;

// ── Long values ─────────────────────────────────────────────────────

/// Long value flag: the bytes follow the pointer inline.
pub const LONG_VALUE_INLINE: u32 = 0x8000_0000;
/// Long value flag: the value occupies a single row on one long-value page.
pub const LONG_VALUE_SINGLE_PAGE: u32 = 0x4000_0000;
/// Mask extracting the value length from the pointer's first word.
pub const LONG_VALUE_LENGTH_MASK: u32 = 0x3FFF_FFFF;
/// Largest value stored inline behind the 12-byte pointer.
pub const LONG_VALUE_MAX_INLINE: usize = 64;

// ── Catalog object types (MSysObjects `Type` column) ────────────────

/// User or system table.
pub const OBJECT_TYPE_TABLE: i16 = 1;
/// Saved query.
pub const OBJECT_TYPE_QUERY: i16 = 5;
/// Relationship definition.
pub const OBJECT_TYPE_RELATIONSHIP: i16 = 8;
/// Container object (e.g. the "Tables" parent).
pub const OBJECT_TYPE_CONTAINER: i16 = 3;

/// Name of the system catalog table on [`PAGE_SYSTEM_CATALOG`].
pub const CATALOG_TABLE_NAME: &str = "MSysObjects";
/// Name of the access-control-entry system table.
pub const ACES_TABLE_NAME: &str = "MSysACEs";
/// Name of the relationships system table.
pub const RELATIONSHIPS_TABLE_NAME: &str = "MSysRelationships";
/// Name of the saved-queries system table.
pub const QUERIES_TABLE_NAME: &str = "MSysQueries";
/// Name of the parent object all tables hang off in the catalog.
pub const TABLES_PARENT_NAME: &str = "Tables";

// ── Table definitions ───────────────────────────────────────────────

/// Table type tag for user tables.
pub const TABLE_TYPE_USER: u8 = 0x4E;
/// Table type tag for system tables.
pub const TABLE_TYPE_SYSTEM: u8 = 0x53;

/// Hard cap on columns per table, all versions.
pub const MAX_COLUMNS_PER_TABLE: usize = 255;
/// Hard cap on name length (chars) for tables and columns.
pub const MAX_NAME_LENGTH: usize = 64;
/// Most columns a single index key may cover.
pub const MAX_INDEX_COLUMNS: usize = 10;

// ── Column flags ────────────────────────────────────────────────────

/// Column stores its value in the fixed-width area.
pub const COLUMN_FLAG_FIXED: u8 = 0x01;
/// Column may hold variable-length data.
pub const COLUMN_FLAG_VARIABLE: u8 = 0x02;
/// Column is assigned from the table's auto-number counter on insert.
pub const COLUMN_FLAG_AUTO_NUMBER: u8 = 0x04;
/// Text column may use the compressed unicode representation.
pub const COLUMN_FLAG_COMPRESSED_UNICODE: u8 = 0x10;

// ── Index flags ─────────────────────────────────────────────────────

/// Logical index enforces uniqueness.
pub const INDEX_FLAG_UNIQUE: u8 = 0x01;
/// Logical index skips rows whose indexed columns are all null.
pub const INDEX_FLAG_IGNORE_NULLS: u8 = 0x02;
/// Logical index is required (nulls rejected).
pub const INDEX_FLAG_REQUIRED: u8 = 0x08;

/// Logical index type: plain index.
pub const INDEX_TYPE_NORMAL: u8 = 0x00;
/// Logical index type: primary key.
pub const INDEX_TYPE_PRIMARY: u8 = 0x01;
/// Logical index type: foreign key reference.
pub const INDEX_TYPE_FOREIGN: u8 = 0x02;
