//! Row layout codec and data-page row pointers.
//!
//! A serialized row is, front to back: the column count (1 byte on v3,
//! 2 bytes on v4+), the fixed-column area, the variable-column data in
//! declaration order, the jump table of variable-column start offsets
//! (written in reverse), the variable-column count, the null/boolean mask
//! (one bit per column; 0 means null-or-false), and the column count again
//! as a trailer.
//!
//! Deserialization trusts the stored counts, not the schema: rows written
//! before columns were added to the table carry fewer columns, and the
//! missing trailing columns read as null.
//!
//! Data pages hold a row count and free-space header, a forward-growing
//! table of 2-byte row pointers, and row bytes packed from the page tail
//! downward, so pointer offsets strictly decrease with the row number.
//! Pointer high bits flag deleted rows and overflow forwarding pointers.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::jet::codec;
use crate::jet::column::Column;
use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::JetError;

// ── Row ids ─────────────────────────────────────────────────────────

/// Identifies a row: page number plus row number on that page.
///
/// The two sentinels [`RowId::FIRST`] and [`RowId::LAST`] sort before and
/// after every real row regardless of their stored fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RowId {
    /// Data page number; negative means not a real page.
    pub page: i32,
    /// Row number within the page.
    pub row: i32,
}

impl RowId {
    /// Sorts before every real row.
    pub const FIRST: RowId = RowId {
        page: INVALID_PAGE_NUMBER,
        row: i32::MIN,
    };
    /// Sorts after every real row.
    pub const LAST: RowId = RowId {
        page: INVALID_PAGE_NUMBER,
        row: i32::MAX,
    };

    /// A real row id.
    pub fn new(page: u32, row: u16) -> Self {
        RowId {
            page: page as i32,
            row: row as i32,
        }
    }

    /// True for ids naming an actual page slot.
    pub fn is_valid(&self) -> bool {
        self.page > INVALID_PAGE_NUMBER && self.row >= 0
    }

    fn rank(&self) -> u8 {
        if *self == RowId::FIRST {
            0
        } else if *self == RowId::LAST {
            2
        } else {
            1
        }
    }
}

impl Ord for RowId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| (self.page, self.row).cmp(&(other.page, other.row)))
    }
}

impl PartialOrd for RowId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Encode a forwarding pointer left behind when an update outgrows its
/// slot: 1-byte row number + 3-byte page number.
pub fn encode_overflow_ptr(row_id: RowId) -> [u8; 4] {
    let mut buf = [0u8; 4];
    buf[0] = row_id.row as u8;
    codec::write_u24_le(&mut buf[1..], row_id.page as u32);
    buf
}

/// Decode a forwarding pointer.
pub fn decode_overflow_ptr(bytes: &[u8]) -> Result<RowId, JetError> {
    if bytes.len() < 4 {
        return Err(JetError::Corrupt("short overflow pointer".to_string()));
    }
    Ok(RowId::new(codec::read_u24_le(&bytes[1..]), bytes[0] as u16))
}

// ── Data page header and row pointers ───────────────────────────────

/// Offset of the free-space short on data/long-value pages.
const OFFSET_FREE_SPACE: usize = 0x02;
/// Offset of the owning table definition page.
const OFFSET_TDEF_PAGE: usize = 0x04;

/// One entry of the row pointer table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowPtr(pub u16);

impl RowPtr {
    /// Byte offset of the row within its page.
    pub fn offset(self) -> usize {
        (self.0 & ROW_OFFSET_MASK) as usize
    }

    /// True when the row has been deleted.
    pub fn is_deleted(self) -> bool {
        self.0 & ROW_DELETED_MASK != 0
    }

    /// True when the bytes at the offset forward to another page.
    pub fn is_overflow(self) -> bool {
        self.0 & ROW_OVERFLOW_MASK != 0
    }

    /// Set the deleted bit.
    pub fn deleted(self) -> Self {
        RowPtr(self.0 | ROW_DELETED_MASK)
    }

    /// Set the overflow bit.
    pub fn overflow(self) -> Self {
        RowPtr(self.0 | ROW_OVERFLOW_MASK)
    }
}

/// Initialize a fresh data (or long-value) page.
pub fn stamp_data_page(buf: &mut [u8], format: &JetFormat, page_type: u8, tdef_page: u32) {
    codec::fill_range(buf, 0, buf.len(), 0);
    buf[0] = page_type;
    buf[1] = PAGE_MARKER;
    let free = format.page_size - format.data_row_table_start();
    LittleEndian::write_u16(&mut buf[OFFSET_FREE_SPACE..], free as u16);
    LittleEndian::write_u32(&mut buf[OFFSET_TDEF_PAGE..], tdef_page);
    LittleEndian::write_u16(&mut buf[format.offset_data_row_count..], 0);
}

/// Free bytes left on a data page.
pub fn data_page_free_space(buf: &[u8]) -> u16 {
    LittleEndian::read_u16(&buf[OFFSET_FREE_SPACE..])
}

/// Owning table definition page of a data page.
pub fn data_page_tdef(buf: &[u8]) -> u32 {
    LittleEndian::read_u32(&buf[OFFSET_TDEF_PAGE..])
}

/// Rows (live or deleted) on a data page.
pub fn data_page_row_count(buf: &[u8], format: &JetFormat) -> u16 {
    LittleEndian::read_u16(&buf[format.offset_data_row_count..])
}

/// Read a row pointer.
pub fn row_ptr(buf: &[u8], format: &JetFormat, row: u16) -> Result<RowPtr, JetError> {
    if row >= data_page_row_count(buf, format) {
        return Err(JetError::Argument(format!(
            "row {} out of range ({} rows on page)",
            row,
            data_page_row_count(buf, format)
        )));
    }
    let at = format.data_row_table_start() + row as usize * 2;
    Ok(RowPtr(LittleEndian::read_u16(&buf[at..])))
}

/// Overwrite a row pointer.
pub fn set_row_ptr(buf: &mut [u8], format: &JetFormat, row: u16, ptr: RowPtr) {
    let at = format.data_row_table_start() + row as usize * 2;
    LittleEndian::write_u16(&mut buf[at..], ptr.0);
}

/// Byte range `[start, end)` of a row's slot, flags ignored.
pub fn row_region(buf: &[u8], format: &JetFormat, row: u16) -> Result<(usize, usize), JetError> {
    let ptr = row_ptr(buf, format, row)?;
    let start = ptr.offset();
    let end = if row == 0 {
        format.page_size
    } else {
        row_ptr(buf, format, row - 1)?.offset()
    };
    if start > end || end > buf.len() {
        return Err(JetError::Corrupt(format!(
            "row {} region {}..{} is inverted or out of page",
            row, start, end
        )));
    }
    Ok((start, end))
}

/// True when `len` more row bytes (plus a pointer) fit on the page.
pub fn page_has_room(buf: &[u8], len: usize) -> bool {
    data_page_free_space(buf) as usize >= len + 2
}

/// Append a row to a data page, returning its row number.
pub fn add_row(buf: &mut [u8], format: &JetFormat, row_bytes: &[u8]) -> Result<u16, JetError> {
    if !page_has_room(buf, row_bytes.len()) {
        return Err(JetError::Argument(format!(
            "row of {} bytes does not fit ({} free)",
            row_bytes.len(),
            data_page_free_space(buf)
        )));
    }
    let count = data_page_row_count(buf, format);
    let prev_start = if count == 0 {
        format.page_size
    } else {
        row_ptr(buf, format, count - 1)?.offset()
    };
    let start = prev_start - row_bytes.len();
    buf[start..prev_start].copy_from_slice(row_bytes);

    LittleEndian::write_u16(&mut buf[format.offset_data_row_count..], count + 1);
    set_row_ptr(buf, format, count, RowPtr(start as u16));
    let free = data_page_free_space(buf) - row_bytes.len() as u16 - 2;
    LittleEndian::write_u16(&mut buf[OFFSET_FREE_SPACE..], free);
    Ok(count)
}

/// Replace one row's bytes, rewriting the page.
///
/// Row regions are delimited by their neighbors' offsets, so changing one
/// row's length means repacking every row. The rewrite also reclaims the
/// space of deleted rows (their pointers keep the deleted bit over an
/// empty region).
pub fn overwrite_row(
    buf: &mut [u8],
    format: &JetFormat,
    row: u16,
    row_bytes: &[u8],
) -> Result<(), JetError> {
    let count = data_page_row_count(buf, format);
    if row >= count {
        return Err(JetError::Argument(format!("row {} out of range", row)));
    }

    let mut rows: Vec<(RowPtr, Vec<u8>)> = Vec::with_capacity(count as usize);
    for r in 0..count {
        let ptr = row_ptr(buf, format, r)?;
        let bytes = if r == row {
            row_bytes.to_vec()
        } else if ptr.is_deleted() {
            Vec::new()
        } else {
            let (start, end) = row_region(buf, format, r)?;
            buf[start..end].to_vec()
        };
        rows.push((ptr, bytes));
    }

    let total: usize = rows.iter().map(|(_, b)| b.len()).sum();
    let table_end = format.data_row_table_start() + count as usize * 2;
    if table_end + total > format.page_size {
        return Err(JetError::Argument(format!(
            "replacement row of {} bytes does not fit on the page",
            row_bytes.len()
        )));
    }

    let page_type = buf[0];
    let tdef = data_page_tdef(buf);
    stamp_data_page(buf, format, page_type, tdef);
    LittleEndian::write_u16(&mut buf[format.offset_data_row_count..], count);

    let mut at = format.page_size;
    for (r, (ptr, bytes)) in rows.iter().enumerate() {
        at -= bytes.len();
        buf[at..at + bytes.len()].copy_from_slice(bytes);
        let flags = ptr.0 & !ROW_OFFSET_MASK;
        set_row_ptr(buf, format, r as u16, RowPtr(flags | at as u16));
    }
    let free = (at - table_end) as u16;
    LittleEndian::write_u16(&mut buf[OFFSET_FREE_SPACE..], free);
    Ok(())
}

// ── Row codec ───────────────────────────────────────────────────────

/// One column's contribution to a row.
#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    /// Null (mask bit clear).
    Null,
    /// Boolean, stored only in the mask.
    Bool(bool),
    /// Encoded column bytes.
    Bytes(Vec<u8>),
}

impl Cell {
    fn mask_bit(&self) -> bool {
        match self {
            Cell::Null => false,
            Cell::Bool(b) => *b,
            Cell::Bytes(_) => true,
        }
    }
}

fn write_count(out: &mut Vec<u8>, format: &JetFormat, count: usize) {
    if format.size_row_column_count == 1 {
        out.push(count as u8);
    } else {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, count as u16);
        out.extend_from_slice(&b);
    }
}

fn read_count(bytes: &[u8], at: usize, format: &JetFormat) -> usize {
    if format.size_row_column_count == 1 {
        bytes[at] as usize
    } else {
        LittleEndian::read_u16(&bytes[at..]) as usize
    }
}

/// Size of the fixed area for a column set.
pub fn fixed_area_size(columns: &[Column]) -> usize {
    columns
        .iter()
        .filter(|c| c.is_fixed())
        .map(|c| c.fixed_offset as usize + c.fixed_size())
        .max()
        .unwrap_or(0)
}

/// Serialize a row.
///
/// `cells` pairs with `columns` by position; boolean columns must use
/// [`Cell::Bool`], others [`Cell::Bytes`] or [`Cell::Null`].
pub fn encode_row(
    columns: &[Column],
    cells: &[Cell],
    format: &JetFormat,
) -> Result<Vec<u8>, JetError> {
    if columns.len() != cells.len() {
        return Err(JetError::Argument(format!(
            "{} cells for {} columns",
            cells.len(),
            columns.len()
        )));
    }

    let count_size = format.size_row_column_count;
    let fixed_size = fixed_area_size(columns);
    let mut out = Vec::with_capacity(count_size + fixed_size + 32);

    write_count(&mut out, format, columns.len());

    // fixed area, null columns left zeroed
    let fixed_base = out.len();
    out.resize(fixed_base + fixed_size, 0);
    for (col, cell) in columns.iter().zip(cells) {
        if !col.is_fixed() {
            continue;
        }
        if let Cell::Bytes(bytes) = cell {
            if bytes.len() != col.fixed_size() {
                return Err(JetError::Argument(format!(
                    "column '{}' encoded to {} bytes, expected {}",
                    col.name,
                    bytes.len(),
                    col.fixed_size()
                )));
            }
            let at = fixed_base + col.fixed_offset as usize;
            out[at..at + bytes.len()].copy_from_slice(bytes);
        }
    }

    // variable data in declaration order
    let mut var_offsets = Vec::new();
    for (col, cell) in columns.iter().zip(cells) {
        if !col.is_variable() {
            continue;
        }
        var_offsets.push(out.len() as u16);
        if let Cell::Bytes(bytes) = cell {
            out.extend_from_slice(bytes);
        }
    }

    // jump table, reversed so offsets descend
    for off in var_offsets.iter().rev() {
        let mut b = [0u8; 2];
        LittleEndian::write_u16(&mut b, *off);
        out.extend_from_slice(&b);
    }
    write_count(&mut out, format, var_offsets.len());

    // null/boolean mask, one bit per column in declaration order
    let mask_size = columns.len().div_ceil(8);
    let mask_base = out.len();
    out.resize(mask_base + mask_size, 0);
    for (i, cell) in cells.iter().enumerate() {
        if cell.mask_bit() {
            out[mask_base + i / 8] |= 1 << (i % 8);
        }
    }

    write_count(&mut out, format, columns.len());

    if out.len() > format.max_row_size {
        return Err(JetError::Argument(format!(
            "row of {} bytes exceeds the {}-byte maximum",
            out.len(),
            format.max_row_size
        )));
    }
    Ok(out)
}

/// Deserialize a row against the current schema.
///
/// Columns beyond the stored counts read as null; the stored
/// variable-column count wins over per-column flags, so rows written
/// before a schema grew stay readable.
pub fn decode_row(
    columns: &[Column],
    bytes: &[u8],
    format: &JetFormat,
) -> Result<Vec<Cell>, JetError> {
    let count_size = format.size_row_column_count;
    if bytes.len() < count_size * 2 {
        return Err(JetError::Corrupt("row shorter than its counts".to_string()));
    }

    let stored_cols = read_count(bytes, 0, format);
    let trailer_cols = read_count(bytes, bytes.len() - count_size, format);
    if stored_cols != trailer_cols {
        return Err(JetError::Corrupt(format!(
            "row column counts disagree: {} vs {}",
            stored_cols, trailer_cols
        )));
    }

    let mask_size = stored_cols.div_ceil(8);
    let mask_end = bytes.len() - count_size;
    let mask_start = mask_end
        .checked_sub(mask_size)
        .ok_or_else(|| JetError::Corrupt("row mask overruns the row".to_string()))?;
    let var_count_at = mask_start
        .checked_sub(count_size)
        .ok_or_else(|| JetError::Corrupt("row var count overruns the row".to_string()))?;
    let stored_vars = read_count(bytes, var_count_at, format);
    let jump_start = var_count_at
        .checked_sub(stored_vars * 2)
        .ok_or_else(|| JetError::Corrupt("row jump table overruns the row".to_string()))?;

    // reversed on disk; recover declaration order
    let mut var_offsets = Vec::with_capacity(stored_vars);
    for i in (0..stored_vars).rev() {
        var_offsets.push(LittleEndian::read_u16(&bytes[jump_start + i * 2..]) as usize);
    }
    for pair in var_offsets.windows(2) {
        if pair[0] > pair[1] {
            return Err(JetError::Corrupt(
                "variable offsets are not ordered".to_string(),
            ));
        }
    }
    if let Some(&first) = var_offsets.first() {
        if first < count_size || *var_offsets.last().unwrap() > jump_start {
            return Err(JetError::Corrupt(
                "variable offsets fall outside the row".to_string(),
            ));
        }
    }

    let mask = &bytes[mask_start..mask_end];
    let bit = |i: usize| mask[i / 8] & (1 << (i % 8)) != 0;

    let mut cells = Vec::with_capacity(columns.len());
    let mut var_ordinal = 0usize;
    for (i, col) in columns.iter().enumerate() {
        if i >= stored_cols {
            // written before this column existed
            cells.push(Cell::Null);
            continue;
        }
        if col.data_type == crate::jet::value::DataType::Boolean {
            cells.push(Cell::Bool(bit(i)));
            continue;
        }
        if col.is_fixed() {
            if !bit(i) {
                cells.push(Cell::Null);
                continue;
            }
            let start = count_size + col.fixed_offset as usize;
            let end = start + col.fixed_size();
            if end > jump_start.min(bytes.len()) {
                return Err(JetError::Corrupt(format!(
                    "fixed column '{}' overruns the row",
                    col.name
                )));
            }
            cells.push(Cell::Bytes(bytes[start..end].to_vec()));
        } else {
            let ordinal = var_ordinal;
            var_ordinal += 1;
            if ordinal >= stored_vars || !bit(i) {
                cells.push(Cell::Null);
                continue;
            }
            let start = var_offsets[ordinal];
            let end = if ordinal + 1 < stored_vars {
                var_offsets[ordinal + 1]
            } else {
                jump_start
            };
            cells.push(Cell::Bytes(bytes[start..end].to_vec()));
        }
    }
    Ok(cells)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::format::{FORMAT_V3, FORMAT_V4};
    use crate::jet::value::DataType;

    fn sample_columns() -> Vec<Column> {
        let mut id = Column::new("Id", DataType::Long);
        id.number = 0;
        id.fixed_offset = 0;
        let mut flag = Column::new("Active", DataType::Boolean);
        flag.number = 1;
        let mut name = Column::new("Name", DataType::Text);
        name.number = 2;
        name.var_index = 0;
        let mut notes = Column::new("Notes", DataType::Binary);
        notes.number = 3;
        notes.var_index = 1;
        vec![id, flag, name, notes]
    }

    #[test]
    fn test_row_id_sentinels_sort_outside_real_rows() {
        let real = RowId::new(5, 3);
        assert!(RowId::FIRST < real);
        assert!(real < RowId::LAST);
        assert!(RowId::FIRST < RowId::LAST);
        assert!(RowId::new(4, 9) < real);
        assert!(real < RowId::new(5, 4));
        assert!(!RowId::FIRST.is_valid());
        assert!(real.is_valid());
    }

    #[test]
    fn test_overflow_ptr_round_trip() {
        let id = RowId::new(0x00ABCDEF, 7);
        assert_eq!(decode_overflow_ptr(&encode_overflow_ptr(id)).unwrap(), id);
    }

    #[test]
    fn test_encode_decode_round_trip() {
        let cols = sample_columns();
        let cells = vec![
            Cell::Bytes(vec![1, 0, 0, 0]),
            Cell::Bool(true),
            Cell::Bytes(b"ab".to_vec()),
            Cell::Null,
        ];
        let bytes = encode_row(&cols, &cells, &FORMAT_V4).unwrap();
        assert_eq!(decode_row(&cols, &bytes, &FORMAT_V4).unwrap(), cells);
    }

    #[test]
    fn test_round_trip_v3_count_width() {
        let cols = sample_columns();
        let cells = vec![
            Cell::Null,
            Cell::Bool(false),
            Cell::Bytes(b"x".to_vec()),
            Cell::Bytes(vec![9, 9]),
        ];
        let bytes = encode_row(&cols, &cells, &FORMAT_V3).unwrap();
        assert_eq!(decode_row(&cols, &bytes, &FORMAT_V3).unwrap(), cells);
    }

    #[test]
    fn test_schema_growth_reads_null() {
        // row written with two columns, schema now has four
        let old_cols: Vec<Column> = sample_columns().into_iter().take(2).collect();
        let bytes = encode_row(
            &old_cols,
            &[Cell::Bytes(vec![7, 0, 0, 0]), Cell::Bool(true)],
            &FORMAT_V4,
        )
        .unwrap();

        let cells = decode_row(&sample_columns(), &bytes, &FORMAT_V4).unwrap();
        assert_eq!(cells[0], Cell::Bytes(vec![7, 0, 0, 0]));
        assert_eq!(cells[1], Cell::Bool(true));
        assert_eq!(cells[2], Cell::Null);
        assert_eq!(cells[3], Cell::Null);
    }

    #[test]
    fn test_var_offsets_descend_on_disk() {
        let cols = sample_columns();
        let cells = vec![
            Cell::Null,
            Cell::Bool(false),
            Cell::Bytes(b"abc".to_vec()),
            Cell::Bytes(b"de".to_vec()),
        ];
        let bytes = encode_row(&cols, &cells, &FORMAT_V4).unwrap();
        // jump table sits before [var_count][mask][trailer]
        let tail = 2 + 1 + 2;
        let second = LittleEndian::read_u16(&bytes[bytes.len() - tail - 4..]);
        let first = LittleEndian::read_u16(&bytes[bytes.len() - tail - 2..]);
        assert!(first < second);
    }

    #[test]
    fn test_data_page_add_and_region() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 99);
        assert_eq!(data_page_tdef(&page), 99);
        assert_eq!(data_page_row_count(&page, format), 0);

        let r0 = add_row(&mut page, format, &[0xAA; 10]).unwrap();
        let r1 = add_row(&mut page, format, &[0xBB; 6]).unwrap();
        assert_eq!((r0, r1), (0, 1));

        let (s0, e0) = row_region(&page, format, 0).unwrap();
        assert_eq!((e0 - s0, e0), (10, format.page_size));
        let (s1, e1) = row_region(&page, format, 1).unwrap();
        assert_eq!(e1, s0);
        assert_eq!(e1 - s1, 6);
        assert_eq!(&page[s1..e1], &[0xBB; 6]);
    }

    #[test]
    fn test_page_free_space_accounting() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 1);
        let before = data_page_free_space(&page);
        add_row(&mut page, format, &[1; 100]).unwrap();
        assert_eq!(data_page_free_space(&page), before - 102);
    }

    #[test]
    fn test_page_rejects_oversized_row() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 1);
        assert!(add_row(&mut page, format, &vec![0u8; format.page_size]).is_err());
    }

    #[test]
    fn test_row_ptr_flags() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 1);
        add_row(&mut page, format, &[1, 2, 3]).unwrap();

        let ptr = row_ptr(&page, format, 0).unwrap();
        assert!(!ptr.is_deleted());
        set_row_ptr(&mut page, format, 0, ptr.deleted());
        assert!(row_ptr(&page, format, 0).unwrap().is_deleted());
        set_row_ptr(&mut page, format, 0, ptr.overflow());
        assert!(row_ptr(&page, format, 0).unwrap().is_overflow());
        // offset survives the flag bits
        assert_eq!(row_ptr(&page, format, 0).unwrap().offset(), ptr.offset());
    }

    #[test]
    fn test_overwrite_row_repacks_page() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 1);
        add_row(&mut page, format, &[0xAA; 10]).unwrap();
        add_row(&mut page, format, &[0xBB; 6]).unwrap();

        overwrite_row(&mut page, format, 0, &[0xCC; 4]).unwrap();
        let (s0, e0) = row_region(&page, format, 0).unwrap();
        assert_eq!(e0 - s0, 4);
        assert_eq!(&page[s0..e0], &[0xCC; 4]);
        // the neighbor keeps its exact bytes and length
        let (s1, e1) = row_region(&page, format, 1).unwrap();
        assert_eq!(e1 - s1, 6);
        assert_eq!(&page[s1..e1], &[0xBB; 6]);
        assert_eq!(e1, s0);
    }

    #[test]
    fn test_overwrite_row_reclaims_deleted_space() {
        let format = &FORMAT_V4;
        let mut page = vec![0u8; format.page_size];
        stamp_data_page(&mut page, format, PAGE_TYPE_DATA, 1);
        add_row(&mut page, format, &[0xAA; 100]).unwrap();
        add_row(&mut page, format, &[0xBB; 6]).unwrap();
        let ptr = row_ptr(&page, format, 0).unwrap();
        set_row_ptr(&mut page, format, 0, ptr.deleted());
        let before = data_page_free_space(&page);

        overwrite_row(&mut page, format, 1, &[0xDD; 6]).unwrap();
        // the 100 deleted bytes came back on the rewrite
        assert!(data_page_free_space(&page) >= before + 100);
        assert!(row_ptr(&page, format, 0).unwrap().is_deleted());
        let (s0, e0) = row_region(&page, format, 0).unwrap();
        assert_eq!(s0, e0);
    }
}
