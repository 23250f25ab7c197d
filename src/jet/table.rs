//! Tables: definition pages and the row lifecycle.
//!
//! A table definition lives on a tdef page, chained across continuation
//! pages when it outgrows one (the logical "tdef buffer"). It carries the
//! row count, the next auto-number, the column and index descriptors, and
//! references to the table's two usage maps: the pages it owns, and the
//! pages with free row space.
//!
//! Row operations go through [`Table::insert_row`], [`Table::update_row`],
//! and [`Table::delete_row`]. Inserts pick a page from the free-space map
//! or allocate a fresh one; updates rewrite in place when the page can
//! still hold the row and otherwise leave a forwarding pointer behind;
//! deletes set the row pointer's deletion bit and reclaim nothing until
//! the page is rewritten. Every mutation advances the table's modification
//! counter, which cursors watch.
//!
//! Failed index maintenance undoes the row-level write before returning,
//! so a policy violation leaves the table unchanged.

use std::collections::HashSet;
use std::rc::Rc;

use byteorder::ByteOrder;
use log::debug;

use crate::jet::codec::{ByteReader, ByteWriter};
use crate::jet::column::Column;
use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::jet::index::{IndexColumn, IndexData, IndexEntry, IndexInfo, IndexVariant};
use crate::jet::index_codec::{self, IndexKey};
use crate::jet::long_value;
use crate::jet::page::PageChannel;
use crate::jet::row::{self, Cell, RowId};
use crate::jet::usage_map::{UsageMap, UsageMapRef};
use crate::jet::value::{DataType, Value};
use crate::JetError;

/// A materialized row: column name and value, in declaration order.
pub type Row = Vec<(String, Value)>;

/// Callback consulted when decoding one column fails. It may substitute a
/// value, log and substitute, or rethrow.
pub type ErrorHandler = Rc<dyn Fn(&Column, &[u8], JetError) -> Result<Value, JetError>>;

/// The default handler rethrows every error.
pub fn rethrowing_error_handler() -> ErrorHandler {
    Rc::new(|_, _, e| Err(e))
}

/// Index requested at table creation.
#[derive(Debug, Clone)]
pub struct IndexSpec {
    /// Index name.
    pub name: String,
    /// Key columns: name and ascending flag.
    pub columns: Vec<(String, bool)>,
    /// `INDEX_TYPE_*` tag.
    pub index_type: u8,
    /// `INDEX_FLAG_*` bits.
    pub flags: u8,
}

impl IndexSpec {
    /// A plain ascending index over one column.
    pub fn simple(name: &str, column: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            columns: vec![(column.to_string(), true)],
            index_type: INDEX_TYPE_NORMAL,
            flags: 0,
        }
    }

    /// A unique ascending index over one column.
    pub fn unique(name: &str, column: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            columns: vec![(column.to_string(), true)],
            index_type: INDEX_TYPE_NORMAL,
            flags: INDEX_FLAG_UNIQUE,
        }
    }

    /// A primary key over one column.
    pub fn primary_key(name: &str, column: &str) -> Self {
        IndexSpec {
            name: name.to_string(),
            columns: vec![(column.to_string(), true)],
            index_type: INDEX_TYPE_PRIMARY,
            flags: INDEX_FLAG_UNIQUE | INDEX_FLAG_REQUIRED,
        }
    }
}

/// Validate a table shape before anything touches the file.
pub fn validate_table_spec(
    name: &str,
    columns: &[Column],
    indexes: &[IndexSpec],
) -> Result<(), JetError> {
    if name.is_empty() || name.chars().count() > MAX_NAME_LENGTH {
        return Err(JetError::Constraint(format!(
            "table name {:?} is empty or longer than {} characters",
            name, MAX_NAME_LENGTH
        )));
    }
    if columns.is_empty() || columns.len() > MAX_COLUMNS_PER_TABLE {
        return Err(JetError::Constraint(format!(
            "{} columns (the limit is {})",
            columns.len(),
            MAX_COLUMNS_PER_TABLE
        )));
    }
    let mut seen = HashSet::new();
    let mut auto_numbers = 0;
    for col in columns {
        if col.name.is_empty() || col.name.chars().count() > MAX_NAME_LENGTH {
            return Err(JetError::Constraint(format!(
                "column name {:?} is empty or too long",
                col.name
            )));
        }
        if !seen.insert(col.name.to_lowercase()) {
            return Err(JetError::Constraint(format!(
                "duplicate column name {:?}",
                col.name
            )));
        }
        if col.is_auto_number() {
            if !col.data_type.is_numeric() {
                return Err(JetError::Constraint(format!(
                    "auto-number column {:?} is not numeric",
                    col.name
                )));
            }
            auto_numbers += 1;
        }
    }
    if auto_numbers > 1 {
        return Err(JetError::Constraint(
            "more than one auto-number column".to_string(),
        ));
    }
    for spec in indexes {
        if spec.columns.is_empty() || spec.columns.len() > MAX_INDEX_COLUMNS {
            return Err(JetError::Constraint(format!(
                "index {:?} keys {} columns (the limit is {})",
                spec.name,
                spec.columns.len(),
                MAX_INDEX_COLUMNS
            )));
        }
        for (col_name, _) in &spec.columns {
            if !columns
                .iter()
                .any(|c| c.name.eq_ignore_ascii_case(col_name))
            {
                return Err(JetError::Argument(format!(
                    "index {:?} references unknown column {:?}",
                    spec.name, col_name
                )));
            }
        }
    }
    Ok(())
}

/// One open table.
pub struct Table {
    /// Table name.
    pub name: String,
    tdef_page: u32,
    format: &'static JetFormat,
    table_type: u8,
    columns: Vec<Column>,
    indexes: Vec<IndexInfo>,
    index_datas: Vec<IndexData>,
    owned_pages: UsageMap,
    free_space_pages: UsageMap,
    row_count: u32,
    next_auto_number: i32,
    max_columns: u16,
    modification_count: u32,
    error_handler: Option<ErrorHandler>,
    default_error_handler: ErrorHandler,
}

impl Table {
    // ── construction ────────────────────────────────────────────────

    /// Open a table from its definition page.
    pub fn read(
        channel: &mut PageChannel,
        tdef_page: u32,
        variant: IndexVariant,
        default_error_handler: ErrorHandler,
    ) -> Result<Table, JetError> {
        let format = channel.format();
        let buffer = read_tdef_buffer(channel, tdef_page)?;
        let mut r = ByteReader::new(&buffer);

        let _total_len = r.u32_le()?;
        let _signature = r.u32_le()?;
        let row_count = r.u32_le()?;
        let next_auto_number = r.i32_le()?;
        let table_type = r.u8()?;
        let name = read_name(&mut r, format)?;
        let max_columns = r.u16_le()?;
        let _var_columns = r.u16_le()?;
        let column_count = r.u16_le()? as usize;
        let index_slot_count = r.u32_le()? as usize;
        let index_data_count = r.u32_le()? as usize;
        let used_ref = UsageMapRef::from_bytes(r.bytes(4)?)?;
        let free_ref = UsageMapRef::from_bytes(r.bytes(4)?)?;

        // per-slot row counts are rebuilt on write; skip them here
        r.skip(format.size_index_slot * index_data_count);

        let mut columns = Vec::with_capacity(column_count);
        for _ in 0..column_count {
            columns.push(read_column(&mut r, format)?);
        }
        for col in &mut columns {
            col.name = read_name(&mut r, format)?;
        }

        let mut index_datas = Vec::with_capacity(index_data_count);
        for _ in 0..index_data_count {
            index_datas.push(read_index_data(&mut r, format, tdef_page, &columns, variant)?);
        }
        let mut indexes = Vec::with_capacity(index_slot_count);
        for _ in 0..index_slot_count {
            indexes.push(read_logical_index(&mut r, format)?);
        }
        for idx in &mut indexes {
            idx.name = read_name(&mut r, format)?;
        }
        // keep foreign keys at the tail
        indexes.sort_by_key(|i| i.is_foreign_key());

        let owned_pages = UsageMap::read(channel, used_ref, false)?;
        let free_space_pages = UsageMap::read(channel, free_ref, false)?;

        Ok(Table {
            name,
            tdef_page,
            format,
            table_type,
            columns,
            indexes,
            index_datas,
            owned_pages,
            free_space_pages,
            row_count,
            next_auto_number,
            max_columns,
            modification_count: 0,
            error_handler: None,
            default_error_handler,
        })
    }

    /// Create a table on an already-allocated tdef page.
    ///
    /// Callers run [`validate_table_spec`] first; this writes the usage-map
    /// holder page, the index root pages, and the definition itself.
    #[allow(clippy::too_many_arguments)]
    pub fn create(
        channel: &mut PageChannel,
        name: &str,
        tdef_page: u32,
        mut columns: Vec<Column>,
        index_specs: &[IndexSpec],
        table_type: u8,
        variant: IndexVariant,
        default_error_handler: ErrorHandler,
    ) -> Result<Table, JetError> {
        let format = channel.format();

        // assign numbers and placement offsets in declaration order
        let mut fixed_offset = 0u16;
        let mut var_index = 0u16;
        for (i, col) in columns.iter_mut().enumerate() {
            col.number = i as u16;
            col.sort_order = format.default_sort_order;
            if col.is_fixed() {
                col.fixed_offset = fixed_offset;
                fixed_offset += col.fixed_size() as u16;
            } else {
                col.var_index = var_index;
                var_index += 1;
            }
        }

        // blank the definition page first so a reused page cannot pass for
        // an old continuation chain
        let mut tdef_buf = channel.new_page_buffer();
        tdef_buf[0] = PAGE_TYPE_TABLE_DEF;
        tdef_buf[1] = PAGE_MARKER;
        byteorder::LittleEndian::write_i32(&mut tdef_buf[4..8], INVALID_PAGE_NUMBER);
        channel.write_page(tdef_page, &tdef_buf)?;

        // both usage maps live as rows on one fresh data page; the page is
        // stamped with owner 0 so row scans can tell it from row storage
        let map_page = channel.allocate_page()?;
        let mut buf = channel.new_page_buffer();
        row::stamp_data_page(&mut buf, format, PAGE_TYPE_DATA, 0);
        row::add_row(&mut buf, format, &UsageMap::new_inline_row(format, 0, false))?;
        row::add_row(&mut buf, format, &UsageMap::new_inline_row(format, 0, false))?;
        channel.write_page(map_page, &buf)?;
        let used_ref = UsageMapRef::new(map_page, 0);
        let free_ref = UsageMapRef::new(map_page, 1);

        let owned_pages = UsageMap::read(channel, used_ref, false)?;
        let free_space_pages = UsageMap::read(channel, free_ref, false)?;

        let mut index_datas = Vec::new();
        let mut indexes = Vec::new();
        for (n, spec) in index_specs.iter().enumerate() {
            let mut index_columns = Vec::with_capacity(spec.columns.len());
            for (col_name, ascending) in &spec.columns {
                let column_index = columns
                    .iter()
                    .position(|c| c.name.eq_ignore_ascii_case(col_name))
                    .ok_or_else(|| {
                        JetError::Argument(format!(
                            "index {:?} references unknown column {:?}",
                            spec.name, col_name
                        ))
                    })?;
                index_columns.push(IndexColumn {
                    column_index,
                    column_number: columns[column_index].number,
                    ascending: *ascending,
                });
            }
            index_datas.push(IndexData::create(
                channel,
                n as u8,
                tdef_page,
                index_columns,
                variant,
            )?);
            indexes.push(IndexInfo {
                name: spec.name.clone(),
                index_number: n as u8,
                index_data_number: n as u8,
                index_type: spec.index_type,
                flags: spec.flags,
            });
        }
        indexes.sort_by_key(|i| i.is_foreign_key());

        let mut table = Table {
            name: name.to_string(),
            tdef_page,
            format,
            table_type,
            columns,
            indexes,
            index_datas,
            owned_pages,
            free_space_pages,
            row_count: 0,
            next_auto_number: 1,
            max_columns: MAX_COLUMNS_PER_TABLE as u16,
            modification_count: 0,
            error_handler: None,
            default_error_handler,
        };
        table.owned_pages.add_page(channel, map_page)?;
        for i in 0..table.index_datas.len() {
            let root = table.index_datas[i].root_page;
            table.owned_pages.add_page(channel, root)?;
        }
        table.persist_tdef(channel)?;
        debug!("created table {:?} at tdef page {}", name, tdef_page);
        Ok(table)
    }

    // ── introspection ───────────────────────────────────────────────

    /// The definition page of this table.
    pub fn tdef_page(&self) -> u32 {
        self.tdef_page
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Logical indexes, foreign keys last.
    pub fn indexes(&self) -> &[IndexInfo] {
        &self.indexes
    }

    /// Live rows in the table.
    pub fn row_count(&self) -> u32 {
        self.row_count
    }

    /// The format this table was opened under.
    pub fn format(&self) -> &'static JetFormat {
        self.format
    }

    /// True for system tables.
    pub fn is_system(&self) -> bool {
        self.table_type == TABLE_TYPE_SYSTEM
    }

    /// Monotonic counter advanced by every structural change.
    pub fn modification_count(&self) -> u32 {
        self.modification_count
    }

    /// The owned-pages map (shared by scan cursors).
    pub fn owned_pages(&self) -> &UsageMap {
        &self.owned_pages
    }

    /// Position of a column by case-insensitive name.
    pub fn column_index(&self, name: &str) -> Result<usize, JetError> {
        self.columns
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                JetError::Argument(format!("no column {:?} in table {:?}", name, self.name))
            })
    }

    /// A logical index by case-insensitive name.
    pub fn index(&self, name: &str) -> Option<&IndexInfo> {
        self.indexes
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
    }

    /// Physical data backing a logical index.
    pub fn index_data(&mut self, info_name: &str) -> Result<&mut IndexData, JetError> {
        let data_number = self
            .index(info_name)
            .map(|i| i.index_data_number)
            .ok_or_else(|| {
                JetError::Argument(format!(
                    "no index {:?} on table {:?}",
                    info_name, self.name
                ))
            })?;
        self.index_datas
            .iter_mut()
            .find(|d| d.number == data_number)
            .ok_or_else(|| {
                JetError::Corrupt(format!(
                    "logical index {:?} references missing index data {}",
                    info_name, data_number
                ))
            })
    }

    /// Table-scoped error handler override.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.error_handler = handler;
    }

    /// The handler in effect at table scope.
    pub fn effective_error_handler(&self) -> ErrorHandler {
        self.error_handler
            .clone()
            .unwrap_or_else(|| self.default_error_handler.clone())
    }

    // ── index entry plumbing ────────────────────────────────────────

    /// Encode the index entry for `values` under index data `data_idx`.
    fn make_entry(
        &self,
        data_idx: usize,
        values: &[Value],
        row_id: RowId,
    ) -> Result<IndexEntry, JetError> {
        let mut bytes = Vec::new();
        for ic in &self.index_datas[data_idx].columns {
            let col = &self.columns[ic.column_index];
            index_codec::write_key(
                &mut bytes,
                col,
                &IndexKey::Value(&values[ic.column_index]),
                ic.ascending,
                self.format,
            )?;
        }
        Ok(IndexEntry::new(bytes, row_id))
    }

    /// The byte pattern of an all-null entry under index data `data_idx`.
    fn null_entry_bytes(&self, data_idx: usize) -> Result<Vec<u8>, JetError> {
        let mut bytes = Vec::new();
        for ic in &self.index_datas[data_idx].columns {
            let col = &self.columns[ic.column_index];
            index_codec::write_key(
                &mut bytes,
                col,
                &IndexKey::Value(&Value::Null),
                ic.ascending,
                self.format,
            )?;
        }
        Ok(bytes)
    }

    fn index_policy(&self, data_idx: usize) -> (bool, bool) {
        let number = self.index_datas[data_idx].number;
        let mut unique = false;
        let mut all_ignore_nulls = true;
        let mut any = false;
        for info in &self.indexes {
            if info.index_data_number == number {
                any = true;
                unique |= info.is_unique();
                all_ignore_nulls &= info.should_ignore_nulls();
            }
        }
        (unique, any && all_ignore_nulls)
    }

    fn add_index_entries(
        &mut self,
        channel: &mut PageChannel,
        values: &[Value],
        row_id: RowId,
    ) -> Result<(), JetError> {
        for data_idx in 0..self.index_datas.len() {
            let (unique, ignore_nulls) = self.index_policy(data_idx);
            let entry = self.make_entry(data_idx, values, row_id)?;
            let null_bytes = self.null_entry_bytes(data_idx)?;
            if ignore_nulls && entry.bytes == null_bytes {
                continue;
            }
            let result = self.index_datas[data_idx]
                .insert_entry(channel, entry, unique, &null_bytes);
            if let Err(e) = result {
                // roll back the entries already added for this row
                for undo_idx in (0..data_idx).rev() {
                    let undo = self.make_entry(undo_idx, values, row_id)?;
                    let _ = self.index_datas[undo_idx].remove_entry(channel, &undo);
                    let _ = self.index_datas[undo_idx].update(channel);
                }
                return Err(e);
            }
        }
        for data in &mut self.index_datas {
            data.update(channel)?;
        }
        Ok(())
    }

    fn remove_index_entries(
        &mut self,
        channel: &mut PageChannel,
        values: &[Value],
        row_id: RowId,
    ) -> Result<(), JetError> {
        for data_idx in 0..self.index_datas.len() {
            let entry = self.make_entry(data_idx, values, row_id)?;
            self.index_datas[data_idx].remove_entry(channel, &entry)?;
            self.index_datas[data_idx].update(channel)?;
        }
        Ok(())
    }

    // ── row lifecycle ───────────────────────────────────────────────

    fn encode_cells(
        &mut self,
        channel: &mut PageChannel,
        values: &[Value],
    ) -> Result<Vec<Cell>, JetError> {
        let mut cells = Vec::with_capacity(self.columns.len());
        for (col, value) in self.columns.iter().zip(values) {
            let cell = match value {
                Value::Null => {
                    if col.data_type == DataType::Boolean {
                        Cell::Bool(false)
                    } else {
                        Cell::Null
                    }
                }
                Value::Bool(b) if col.data_type == DataType::Boolean => Cell::Bool(*b),
                other => {
                    let bytes = col.encode_value(other, self.format)?;
                    if col.data_type.is_long_value() {
                        Cell::Bytes(long_value::write_long_value(
                            channel,
                            &mut self.owned_pages,
                            self.tdef_page,
                            &bytes,
                        )?)
                    } else {
                        Cell::Bytes(bytes)
                    }
                }
            };
            cells.push(cell);
        }
        Ok(cells)
    }

    /// Fill auto-number columns of `values` from the counter, advancing it.
    fn apply_auto_numbers(&mut self, values: &mut [Value]) {
        for (i, col) in self.columns.iter().enumerate() {
            if !col.is_auto_number() {
                continue;
            }
            match &values[i] {
                Value::Null => {
                    values[i] = Value::Long(self.next_auto_number);
                    self.next_auto_number += 1;
                }
                Value::Long(v) if *v >= self.next_auto_number => {
                    // explicit value: keep the counter ahead of it
                    self.next_auto_number = *v + 1;
                }
                _ => {}
            }
        }
    }

    /// Find a page with room for `len` more bytes, or stamp a fresh one.
    fn pick_page(&mut self, channel: &mut PageChannel, len: usize) -> Result<(u32, Vec<u8>), JetError> {
        let mut buf = channel.new_page_buffer();
        for candidate in self.free_space_pages.pages() {
            channel.read_page(candidate, &mut buf)?;
            if buf[0] == PAGE_TYPE_DATA
                && row::data_page_tdef(&buf) == self.tdef_page
                && row::page_has_room(&buf, len)
            {
                return Ok((candidate, buf));
            }
            // stale free-space listing
            self.free_space_pages.remove_page(channel, candidate)?;
        }
        let page = channel.allocate_page()?;
        row::stamp_data_page(&mut buf, self.format, PAGE_TYPE_DATA, self.tdef_page);
        self.owned_pages.add_page(channel, page)?;
        self.free_space_pages.add_page(channel, page)?;
        debug!("table {:?} claimed data page {}", self.name, page);
        Ok((page, buf))
    }

    /// Insert a row. Returns its row id.
    pub fn insert_row(
        &mut self,
        channel: &mut PageChannel,
        values: &[Value],
    ) -> Result<RowId, JetError> {
        if values.len() != self.columns.len() {
            return Err(JetError::Argument(format!(
                "{} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let saved_auto = self.next_auto_number;
        let mut values = values.to_vec();
        self.apply_auto_numbers(&mut values);

        let cells = self.encode_cells(channel, &values)?;
        let row_bytes = row::encode_row(&self.columns, &cells, self.format)?;

        let (page_number, mut buf) = self.pick_page(channel, row_bytes.len())?;
        let row_number = row::add_row(&mut buf, self.format, &row_bytes)?;
        channel.write_page(page_number, &buf)?;
        if !row::page_has_room(&buf, 16) {
            self.free_space_pages.remove_page(channel, page_number)?;
        }
        let row_id = RowId::new(page_number, row_number);

        if let Err(e) = self.add_index_entries(channel, &values, row_id) {
            // undo the row write so the table is unchanged
            channel.read_page(page_number, &mut buf)?;
            let ptr = row::row_ptr(&buf, self.format, row_number)?;
            row::set_row_ptr(&mut buf, self.format, row_number, ptr.deleted());
            channel.write_page(page_number, &buf)?;
            self.next_auto_number = saved_auto;
            self.persist_tdef(channel)?;
            return Err(e);
        }

        self.row_count += 1;
        self.modification_count += 1;
        self.persist_tdef(channel)?;
        Ok(row_id)
    }

    /// Follow overflow forwarding to a row's real location. Returns the
    /// final page number, row number, and the page buffer.
    fn resolve_row(
        &self,
        channel: &mut PageChannel,
        row_id: RowId,
    ) -> Result<(u32, u16, Vec<u8>), JetError> {
        if !row_id.is_valid() {
            return Err(JetError::Argument(format!("row id {:?} is not valid", row_id)));
        }
        let mut page_number = row_id.page as u32;
        let mut row_number = row_id.row as u16;
        let mut buf = channel.new_page_buffer();
        let mut guard = channel.page_count() as usize + 1;
        loop {
            channel.read_page(page_number, &mut buf)?;
            if crate::jet::codec::matches_range(&buf, 0, &DEALLOCATED_MARKER) {
                return Err(JetError::Corrupt(format!(
                    "row {:?} resolves to deallocated page {}",
                    row_id, page_number
                )));
            }
            if buf[0] != PAGE_TYPE_DATA {
                return Err(JetError::Corrupt(format!(
                    "row {:?} resolves to page {} of type 0x{:02X}",
                    row_id, page_number, buf[0]
                )));
            }
            let ptr = row::row_ptr(&buf, self.format, row_number)?;
            if ptr.is_deleted() {
                return Err(JetError::Argument(format!("row {:?} is deleted", row_id)));
            }
            if !ptr.is_overflow() {
                return Ok((page_number, row_number, buf));
            }
            let (start, end) = row::row_region(&buf, self.format, row_number)?;
            let fwd = row::decode_overflow_ptr(&buf[start..end])?;
            page_number = fwd.page as u32;
            row_number = fwd.row as u16;
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("overflow pointer chain loops".to_string()));
            }
        }
    }

    /// Decode one cell through the scoped error handler chain.
    fn decode_cell(
        &self,
        channel: &mut PageChannel,
        col: &Column,
        cell: &Cell,
        handler: &ErrorHandler,
    ) -> Result<Value, JetError> {
        let attempt = |channel: &mut PageChannel| -> Result<Value, JetError> {
            Ok(match cell {
                Cell::Null => Value::Null,
                Cell::Bool(b) => Value::Bool(*b),
                Cell::Bytes(bytes) => {
                    if col.data_type.is_long_value() {
                        let resolved = long_value::read_long_value(channel, bytes)?;
                        col.decode_value(&resolved, self.format)?
                    } else {
                        col.decode_value(bytes, self.format)?
                    }
                }
            })
        };
        match attempt(channel) {
            Ok(v) => Ok(v),
            Err(e) => {
                let raw: &[u8] = match cell {
                    Cell::Bytes(b) => b,
                    _ => &[],
                };
                handler(col, raw, e)
            }
        }
    }

    /// Read a row by id, optionally projecting a set of column names.
    pub fn read_row(
        &self,
        channel: &mut PageChannel,
        row_id: RowId,
        projection: Option<&HashSet<String>>,
        handler: &ErrorHandler,
    ) -> Result<Row, JetError> {
        let (_, row_number, buf) = self.resolve_row(channel, row_id)?;
        let (start, end) = row::row_region(&buf, self.format, row_number)?;
        let cells = row::decode_row(&self.columns, &buf[start..end], self.format)?;

        let mut out = Vec::new();
        for (col, cell) in self.columns.iter().zip(&cells) {
            if let Some(wanted) = projection {
                if !wanted.iter().any(|w| w.eq_ignore_ascii_case(&col.name)) {
                    continue;
                }
            }
            out.push((
                col.name.clone(),
                self.decode_cell(channel, col, cell, handler)?,
            ));
        }
        Ok(out)
    }

    /// Current values of a row as a value vector in column order.
    fn read_values(&self, channel: &mut PageChannel, row_id: RowId) -> Result<Vec<Value>, JetError> {
        let handler = self.effective_error_handler();
        let row = self.read_row(channel, row_id, None, &handler)?;
        Ok(row.into_iter().map(|(_, v)| v).collect())
    }

    /// Delete a row: set the deletion bit and drop its index entries.
    /// Space is reclaimed when the page is next rewritten.
    pub fn delete_row(&mut self, channel: &mut PageChannel, row_id: RowId) -> Result<(), JetError> {
        let values = self.read_values(channel, row_id)?;
        let (page_number, row_number, mut buf) = self.resolve_row(channel, row_id)?;

        self.remove_index_entries(channel, &values, row_id)?;

        let ptr = row::row_ptr(&buf, self.format, row_number)?;
        row::set_row_ptr(&mut buf, self.format, row_number, ptr.deleted());
        channel.write_page(page_number, &buf)?;
        // the slot's bytes are dead weight now; the page has room again
        self.free_space_pages.add_page(channel, page_number)?;

        self.row_count = self.row_count.saturating_sub(1);
        self.modification_count += 1;
        self.persist_tdef(channel)?;
        Ok(())
    }

    /// Update a row in place when the page still has room, else relocate
    /// the bytes and leave a forwarding pointer in the old slot.
    pub fn update_row(
        &mut self,
        channel: &mut PageChannel,
        row_id: RowId,
        values: &[Value],
    ) -> Result<(), JetError> {
        if values.len() != self.columns.len() {
            return Err(JetError::Argument(format!(
                "{} values for {} columns",
                values.len(),
                self.columns.len()
            )));
        }
        let old_values = self.read_values(channel, row_id)?;
        let (page_number, row_number, mut buf) = self.resolve_row(channel, row_id)?;

        let cells = self.encode_cells(channel, values)?;
        let row_bytes = row::encode_row(&self.columns, &cells, self.format)?;

        let (start, end) = row::row_region(&buf, self.format, row_number)?;
        let slack = (end - start) + row::data_page_free_space(&buf) as usize;
        if row_bytes.len() <= slack {
            row::overwrite_row(&mut buf, self.format, row_number, &row_bytes)?;
            channel.write_page(page_number, &buf)?;
        } else {
            // relocate, then forward the old slot
            let (new_page, mut new_buf) = self.pick_page(channel, row_bytes.len())?;
            let new_row = row::add_row(&mut new_buf, self.format, &row_bytes)?;
            channel.write_page(new_page, &new_buf)?;

            channel.read_page(page_number, &mut buf)?;
            let fwd = row::encode_overflow_ptr(RowId::new(new_page, new_row));
            row::overwrite_row(&mut buf, self.format, row_number, &fwd)?;
            let ptr = row::row_ptr(&buf, self.format, row_number)?;
            row::set_row_ptr(&mut buf, self.format, row_number, ptr.overflow());
            channel.write_page(page_number, &buf)?;
        }

        self.remove_index_entries(channel, &old_values, row_id)?;
        if let Err(e) = self.add_index_entries(channel, values, row_id) {
            // put the old entries back before surfacing the failure
            self.add_index_entries(channel, &old_values, row_id)?;
            return Err(e);
        }

        self.modification_count += 1;
        self.persist_tdef(channel)?;
        Ok(())
    }

    // ── definition persistence ──────────────────────────────────────

    /// Serialize the definition and rewrite the tdef chain.
    pub fn persist_tdef(&mut self, channel: &mut PageChannel) -> Result<(), JetError> {
        let def = TableDefinition {
            name: &self.name,
            table_type: self.table_type,
            row_count: self.row_count,
            next_auto_number: self.next_auto_number,
            max_columns: self.max_columns,
            columns: &self.columns,
            indexes: &self.indexes,
            index_datas: &self.index_datas,
            owned_ref: self.owned_pages.map_ref(),
            free_ref: self.free_space_pages.map_ref(),
        };
        let bytes = serialize_tdef(&def, self.format)?;
        write_tdef_buffer(channel, self.tdef_page, &bytes)
    }
}

/// Borrowed view of everything a serialized table definition carries.
pub struct TableDefinition<'a> {
    /// Table name.
    pub name: &'a str,
    /// `TABLE_TYPE_*` tag.
    pub table_type: u8,
    /// Live row count.
    pub row_count: u32,
    /// Next auto-number value.
    pub next_auto_number: i32,
    /// Column slots available.
    pub max_columns: u16,
    /// Columns in declaration order.
    pub columns: &'a [Column],
    /// Logical indexes.
    pub indexes: &'a [IndexInfo],
    /// Physical index data.
    pub index_datas: &'a [IndexData],
    /// Reference to the owned-pages map row.
    pub owned_ref: UsageMapRef,
    /// Reference to the free-space-pages map row.
    pub free_ref: UsageMapRef,
}

/// Serialize a logical tdef buffer.
pub fn serialize_tdef(def: &TableDefinition<'_>, format: &JetFormat) -> Result<Vec<u8>, JetError> {
    let mut w = ByteWriter::with_capacity(256);
    w.u32_le(0); // total length, patched below
    w.u32_le(0);
    w.u32_le(def.row_count);
    w.i32_le(def.next_auto_number);
    w.u8(def.table_type);
    write_name(&mut w, def.name, format)?;
    w.u16_le(def.max_columns);
    w.u16_le(def.columns.iter().filter(|c| c.is_variable()).count() as u16);
    w.u16_le(def.columns.len() as u16);
    w.u32_le(def.indexes.len() as u32);
    w.u32_le(def.index_datas.len() as u32);
    w.bytes(&def.owned_ref.to_bytes());
    w.bytes(&def.free_ref.to_bytes());

    for _ in def.index_datas {
        w.u32_le(0); // per-slot row count, informational
        if format.size_index_slot > 4 {
            w.fill(format.size_index_slot - 4, 0);
        }
    }
    for col in def.columns {
        write_column(&mut w, col, format);
    }
    for col in def.columns {
        write_name(&mut w, &col.name, format)?;
    }
    for data in def.index_datas {
        write_index_data(&mut w, data, format);
    }
    for idx in def.indexes {
        write_logical_index(&mut w, idx, format);
    }
    for idx in def.indexes {
        write_name(&mut w, &idx.name, format)?;
    }

    let total = w.len() as u32;
    let mut len_bytes = [0u8; 4];
    byteorder::LittleEndian::write_u32(&mut len_bytes, total);
    w.patch(0, &len_bytes);
    Ok(w.into_bytes())
}

impl Table {
    /// Physical index data by stored number.
    pub(crate) fn index_data_by_number(&mut self, number: u8) -> Option<&mut IndexData> {
        self.index_datas.iter_mut().find(|d| d.number == number)
    }

    /// Encode the leading key columns of a logical index from `values`
    /// (one value per key column, in index order). Used to build cursor
    /// bounds and seek positions.
    pub fn index_entry_prefix(
        &self,
        index_name: &str,
        values: &[Value],
    ) -> Result<Vec<u8>, JetError> {
        let data_number = self
            .index(index_name)
            .map(|i| i.index_data_number)
            .ok_or_else(|| {
                JetError::Argument(format!(
                    "no index {:?} on table {:?}",
                    index_name, self.name
                ))
            })?;
        let data = self
            .index_datas
            .iter()
            .find(|d| d.number == data_number)
            .ok_or_else(|| {
                JetError::Corrupt(format!("missing index data {}", data_number))
            })?;
        if values.len() > data.columns.len() {
            return Err(JetError::Argument(format!(
                "{} values for a {}-column index key",
                values.len(),
                data.columns.len()
            )));
        }
        let mut bytes = Vec::new();
        for (ic, value) in data.columns.iter().zip(values) {
            let col = &self.columns[ic.column_index];
            index_codec::write_key(&mut bytes, col, &IndexKey::Value(value), ic.ascending, self.format)?;
        }
        Ok(bytes)
    }

    /// Names of a logical index's key columns, in key order.
    pub fn index_column_names(&self, index_name: &str) -> Result<Vec<String>, JetError> {
        let data_number = self
            .index(index_name)
            .map(|i| i.index_data_number)
            .ok_or_else(|| {
                JetError::Argument(format!(
                    "no index {:?} on table {:?}",
                    index_name, self.name
                ))
            })?;
        let data = self
            .index_datas
            .iter()
            .find(|d| d.number == data_number)
            .ok_or_else(|| {
                JetError::Corrupt(format!("missing index data {}", data_number))
            })?;
        Ok(data
            .columns
            .iter()
            .map(|ic| self.columns[ic.column_index].name.clone())
            .collect())
    }
}

/// A table paired with the page channel it reads and writes through.
///
/// The borrow is split out of the database handle, so several cursors can
/// work the same table: each operation borrows the pair only for its call.
pub struct TableHandle<'a> {
    /// The table.
    pub table: &'a mut Table,
    /// The channel carrying its I/O.
    pub channel: &'a mut PageChannel,
}

impl<'a> TableHandle<'a> {
    /// Pair a table with a channel.
    pub fn new(table: &'a mut Table, channel: &'a mut PageChannel) -> Self {
        TableHandle { table, channel }
    }

    /// A table-scan cursor over this table.
    pub fn cursor(&self) -> crate::jet::cursor::Cursor {
        crate::jet::cursor::Cursor::table_scan(self.table)
    }

    /// An index-driven cursor over this table.
    pub fn index_cursor(&mut self, index_name: &str) -> Result<crate::jet::cursor::Cursor, JetError> {
        crate::jet::cursor::Cursor::index_scan(self.table, index_name)
    }

    /// See [`Table::insert_row`].
    pub fn insert_row(&mut self, values: &[Value]) -> Result<RowId, JetError> {
        self.table.insert_row(self.channel, values)
    }

    /// See [`Table::update_row`].
    pub fn update_row(&mut self, row_id: RowId, values: &[Value]) -> Result<(), JetError> {
        self.table.update_row(self.channel, row_id, values)
    }

    /// See [`Table::delete_row`].
    pub fn delete_row(&mut self, row_id: RowId) -> Result<(), JetError> {
        self.table.delete_row(self.channel, row_id)
    }

    /// Columns in declaration order.
    pub fn columns(&self) -> &[Column] {
        self.table.columns()
    }

    /// Live rows in the table.
    pub fn row_count(&self) -> u32 {
        self.table.row_count()
    }
}

// ── tdef buffer chain ───────────────────────────────────────────────

/// Content bytes available on one tdef page.
fn tdef_page_capacity(format: &JetFormat) -> usize {
    format.page_size - 8
}

/// Read the logical tdef buffer, following the continuation chain.
pub fn read_tdef_buffer(channel: &mut PageChannel, tdef_page: u32) -> Result<Vec<u8>, JetError> {
    let format = channel.format();
    let mut buf = channel.new_page_buffer();
    channel.read_page(tdef_page, &mut buf)?;
    if buf[0] != PAGE_TYPE_TABLE_DEF {
        return Err(JetError::Corrupt(format!(
            "page {} has type 0x{:02X}, expected a table definition",
            tdef_page, buf[0]
        )));
    }

    let total = byteorder::LittleEndian::read_u32(&buf[8..]) as usize;
    if total < 4 {
        return Err(JetError::Corrupt("table definition shorter than its length".to_string()));
    }
    let mut out = Vec::with_capacity(total);
    let capacity = tdef_page_capacity(format);
    out.extend_from_slice(&buf[8..8 + capacity.min(total)]);

    let mut guard = channel.page_count() as usize + 1;
    let mut next = byteorder::LittleEndian::read_i32(&buf[4..]);
    while out.len() < total {
        if next <= INVALID_PAGE_NUMBER || next == 0 {
            return Err(JetError::Corrupt(
                "table definition chain ends before its length".to_string(),
            ));
        }
        channel.read_page(next as u32, &mut buf)?;
        if buf[0] != PAGE_TYPE_TABLE_DEF {
            return Err(JetError::Corrupt(
                "table definition continuation has the wrong type".to_string(),
            ));
        }
        let take = capacity.min(total - out.len());
        out.extend_from_slice(&buf[8..8 + take]);
        next = byteorder::LittleEndian::read_i32(&buf[4..]);
        guard -= 1;
        if guard == 0 {
            return Err(JetError::Corrupt("table definition chain loops".to_string()));
        }
    }
    out.truncate(total);
    Ok(out)
}

/// Write the logical tdef buffer across its page chain, allocating
/// continuation pages as the definition grows.
pub fn write_tdef_buffer(
    channel: &mut PageChannel,
    tdef_page: u32,
    bytes: &[u8],
) -> Result<(), JetError> {
    let format = channel.format();
    let capacity = tdef_page_capacity(format);
    let mut buf = channel.new_page_buffer();

    // keep existing continuation pages where the chain already reaches
    let mut existing_next: i32 = {
        match channel.read_page(tdef_page, &mut buf) {
            Ok(()) if buf[0] == PAGE_TYPE_TABLE_DEF => {
                byteorder::LittleEndian::read_i32(&buf[4..])
            }
            _ => INVALID_PAGE_NUMBER,
        }
    };

    let mut page_number = tdef_page;
    let mut written = 0usize;
    loop {
        let take = capacity.min(bytes.len() - written);
        let need_next = written + take < bytes.len();
        let next_page: i32 = if !need_next {
            INVALID_PAGE_NUMBER
        } else if existing_next > INVALID_PAGE_NUMBER && existing_next != 0 {
            existing_next
        } else {
            channel.allocate_page()? as i32
        };

        for b in buf.iter_mut() {
            *b = 0;
        }
        buf[0] = PAGE_TYPE_TABLE_DEF;
        buf[1] = PAGE_MARKER;
        byteorder::LittleEndian::write_i32(&mut buf[4..8], next_page);
        buf[8..8 + take].copy_from_slice(&bytes[written..written + take]);
        channel.write_page(page_number, &buf)?;

        written += take;
        if !need_next {
            return Ok(());
        }
        // look ahead at the old chain before we overwrite the link
        existing_next = {
            let mut peek = channel.new_page_buffer();
            match channel.read_page(next_page as u32, &mut peek) {
                Ok(()) if peek[0] == PAGE_TYPE_TABLE_DEF => {
                    byteorder::LittleEndian::read_i32(&peek[4..])
                }
                _ => INVALID_PAGE_NUMBER,
            }
        };
        page_number = next_page as u32;
    }
}

// ── descriptor codecs ───────────────────────────────────────────────

fn read_name(r: &mut ByteReader<'_>, format: &JetFormat) -> Result<String, JetError> {
    use crate::jet::column::decode_text;
    let len = if format.size_row_column_count == 1 {
        r.u8()? as usize
    } else {
        r.u16_le()? as usize
    };
    decode_text(r.bytes(len)?, format.charset)
}

fn write_name(w: &mut ByteWriter, name: &str, format: &JetFormat) -> Result<(), JetError> {
    use crate::jet::column::encode_text;
    let bytes = encode_text(name, format.charset, false)?;
    if format.size_row_column_count == 1 {
        w.u8(bytes.len() as u8);
    } else {
        w.u16_le(bytes.len() as u16);
    }
    w.bytes(&bytes);
    Ok(())
}

fn read_column(r: &mut ByteReader<'_>, format: &JetFormat) -> Result<Column, JetError> {
    use crate::jet::format::SortOrder;
    let data_type = DataType::from_u8(r.u8()?)?;
    let flags = r.u8()?;
    let number = r.u16_le()?;
    let var_index = r.u16_le()?;
    let precision = r.u8()?;
    let scale = r.u8()?;
    let sort_order = SortOrder::from_word(r.u16_le()?)?;
    if format.size_column_header > 14 {
        r.skip(format.size_column_header - 14);
    }
    let fixed_offset = r.u16_le()?;
    let length = r.u16_le()?;
    Ok(Column {
        name: String::new(),
        number,
        data_type,
        flags,
        precision,
        scale,
        fixed_offset,
        var_index,
        length,
        sort_order,
    })
}

fn write_column(w: &mut ByteWriter, col: &Column, format: &JetFormat) {
    w.u8(col.data_type.to_u8());
    w.u8(col.flags);
    w.u16_le(col.number);
    w.u16_le(col.var_index);
    w.u8(col.precision);
    w.u8(col.scale);
    w.u16_le(col.sort_order.to_word());
    if format.size_column_header > 14 {
        w.fill(format.size_column_header - 14, 0);
    }
    w.u16_le(col.fixed_offset);
    w.u16_le(col.length);
}

fn read_index_data(
    r: &mut ByteReader<'_>,
    format: &JetFormat,
    tdef_page: u32,
    columns: &[Column],
    variant: IndexVariant,
) -> Result<IndexData, JetError> {
    let number = r.u8()?;
    let key_count = r.u8()? as usize;
    let mut index_columns = Vec::with_capacity(key_count);
    for slot in 0..MAX_INDEX_COLUMNS {
        let column_number = r.u16_le()?;
        let ascending = r.u8()? != 0;
        if slot < key_count {
            let column_index = columns
                .iter()
                .position(|c| c.number == column_number)
                .ok_or_else(|| {
                    JetError::Corrupt(format!(
                        "index data {} keys unknown column {}",
                        number, column_number
                    ))
                })?;
            index_columns.push(IndexColumn {
                column_index,
                column_number,
                ascending,
            });
        }
    }
    if format.skip_before_index_root > 0 {
        r.skip(format.skip_before_index_root);
    }
    let root_page = r.u32_le()?;
    let _unused = r.u8()?;
    Ok(IndexData::new(number, root_page, tdef_page, index_columns, variant))
}

fn write_index_data(w: &mut ByteWriter, data: &IndexData, format: &JetFormat) {
    w.u8(data.number);
    w.u8(data.columns.len() as u8);
    for slot in 0..MAX_INDEX_COLUMNS {
        match data.columns.get(slot) {
            Some(ic) => {
                w.u16_le(ic.column_number);
                w.u8(if ic.ascending { 1 } else { 0 });
            }
            None => {
                w.u16_le(0xFFFF);
                w.u8(0);
            }
        }
    }
    if format.skip_before_index_root > 0 {
        w.fill(format.skip_before_index_root, 0);
    }
    w.u32_le(data.root_page);
    w.u8(0);
}

fn read_logical_index(r: &mut ByteReader<'_>, format: &JetFormat) -> Result<IndexInfo, JetError> {
    let index_number = r.u8()?;
    let index_data_number = r.u8()?;
    let index_type = r.u8()?;
    let flags = r.u8()?;
    let _relationship = r.u32_le()?;
    r.skip(format.size_logical_index - 8);
    Ok(IndexInfo {
        name: String::new(),
        index_number,
        index_data_number,
        index_type,
        flags,
    })
}

fn write_logical_index(w: &mut ByteWriter, idx: &IndexInfo, format: &JetFormat) {
    w.u8(idx.index_number);
    w.u8(idx.index_data_number);
    w.u8(idx.index_type);
    w.u8(idx.flags);
    w.u32_le(0);
    w.fill(format.size_logical_index - 8, 0);
}

// ── row state ───────────────────────────────────────────────────────

/// Per-cursor scratch: the cursor-scoped error handler override and the
/// cached last row, invalidated by the table's modification counter.
pub struct RowState {
    table_modification_count: u32,
    cached: Option<(RowId, Row)>,
    /// Cursor-scope error handler; `None` falls through to the table.
    pub error_handler: Option<ErrorHandler>,
}

impl RowState {
    /// Fresh state bound to the table's current counter.
    pub fn new(table: &Table) -> Self {
        RowState {
            table_modification_count: table.modification_count(),
            cached: None,
            error_handler: None,
        }
    }

    /// Drop cached data when the table moved underneath us.
    pub fn sync(&mut self, table: &Table) {
        if self.table_modification_count != table.modification_count() {
            self.table_modification_count = table.modification_count();
            self.cached = None;
        }
    }

    /// The handler in effect at cursor scope.
    pub fn effective_error_handler(&self, table: &Table) -> ErrorHandler {
        self.error_handler
            .clone()
            .unwrap_or_else(|| table.effective_error_handler())
    }

    /// Read a row through the cache.
    pub fn read_row(
        &mut self,
        table: &Table,
        channel: &mut PageChannel,
        row_id: RowId,
        projection: Option<&HashSet<String>>,
    ) -> Result<Row, JetError> {
        self.sync(table);
        if projection.is_none() {
            if let Some((cached_id, row)) = &self.cached {
                if *cached_id == row_id {
                    return Ok(row.clone());
                }
            }
        }
        let handler = self.effective_error_handler(table);
        let row = table.read_row(channel, row_id, projection, &handler)?;
        if projection.is_none() {
            self.cached = Some((row_id, row.clone()));
        }
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::format::FORMAT_V4;
    use std::io::Write as IoWrite;
    use tempfile::NamedTempFile;

    fn test_channel() -> (NamedTempFile, PageChannel) {
        let format = &FORMAT_V4;
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; 4 * format.page_size]).unwrap();
        tmp.flush().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        (tmp, PageChannel::new(file, format, false, false, None).unwrap())
    }

    fn people_columns() -> Vec<Column> {
        vec![
            Column::new("Id", DataType::Long),
            Column::new("Name", DataType::Text),
            Column::new("Active", DataType::Boolean),
        ]
    }

    fn create_people(channel: &mut PageChannel, indexes: &[IndexSpec]) -> Table {
        let tdef = channel.allocate_page().unwrap();
        Table::create(
            channel,
            "People",
            tdef,
            people_columns(),
            indexes,
            TABLE_TYPE_USER,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap()
    }

    fn row3(id: i32, name: &str, active: bool) -> Vec<Value> {
        vec![
            Value::Long(id),
            Value::Text(name.to_string()),
            Value::Bool(active),
        ]
    }

    #[test]
    fn test_validate_rejects_too_many_columns() {
        let columns: Vec<Column> = (0..256)
            .map(|i| Column::new(&format!("c{}", i), DataType::Long))
            .collect();
        assert!(matches!(
            validate_table_spec("T", &columns, &[]),
            Err(JetError::Constraint(_))
        ));
        let ok: Vec<Column> = (0..255)
            .map(|i| Column::new(&format!("c{}", i), DataType::Long))
            .collect();
        validate_table_spec("T", &ok, &[]).unwrap();
    }

    #[test]
    fn test_validate_rejects_duplicate_names() {
        let columns = vec![
            Column::new("Id", DataType::Long),
            Column::new("id", DataType::Text),
        ];
        assert!(matches!(
            validate_table_spec("T", &columns, &[]),
            Err(JetError::Constraint(_))
        ));
    }

    #[test]
    fn test_create_and_reopen_round_trips_schema() {
        let (_tmp, mut ch) = test_channel();
        let table = create_people(&mut ch, &[IndexSpec::primary_key("PK", "Id")]);
        let tdef = table.tdef_page();
        drop(table);

        let table = Table::read(
            &mut ch,
            tdef,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap();
        assert_eq!(table.name, "People");
        assert_eq!(table.columns().len(), 3);
        assert_eq!(table.columns()[0].name, "Id");
        assert_eq!(table.columns()[1].data_type, DataType::Text);
        assert_eq!(table.indexes().len(), 1);
        assert!(table.indexes()[0].is_primary_key());
        assert_eq!(table.row_count(), 0);
    }

    #[test]
    fn test_insert_and_read_row() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let id = table.insert_row(&mut ch, &row3(7, "Alice", true)).unwrap();
        assert_eq!(table.row_count(), 1);

        let handler = table.effective_error_handler();
        let row = table.read_row(&mut ch, id, None, &handler).unwrap();
        assert_eq!(row[0], ("Id".to_string(), Value::Long(7)));
        assert_eq!(row[1], ("Name".to_string(), Value::Text("Alice".to_string())));
        assert_eq!(row[2], ("Active".to_string(), Value::Bool(true)));
    }

    #[test]
    fn test_projection_filters_columns() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let id = table.insert_row(&mut ch, &row3(1, "Bob", false)).unwrap();

        let mut wanted = HashSet::new();
        wanted.insert("name".to_string());
        let handler = table.effective_error_handler();
        let row = table.read_row(&mut ch, id, Some(&wanted), &handler).unwrap();
        assert_eq!(row.len(), 1);
        assert_eq!(row[0].0, "Name");
    }

    #[test]
    fn test_auto_number_assignment() {
        let (_tmp, mut ch) = test_channel();
        let tdef = ch.allocate_page().unwrap();
        let columns = vec![
            Column::new("Id", DataType::Long).with_auto_number(),
            Column::new("Name", DataType::Text),
        ];
        let mut table = Table::create(
            &mut ch,
            "Seq",
            tdef,
            columns,
            &[],
            TABLE_TYPE_USER,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap();

        let a = table
            .insert_row(&mut ch, &[Value::Null, Value::Text("x".into())])
            .unwrap();
        let b = table
            .insert_row(&mut ch, &[Value::Null, Value::Text("y".into())])
            .unwrap();
        let handler = table.effective_error_handler();
        assert_eq!(
            table.read_row(&mut ch, a, None, &handler).unwrap()[0].1,
            Value::Long(1)
        );
        assert_eq!(
            table.read_row(&mut ch, b, None, &handler).unwrap()[0].1,
            Value::Long(2)
        );
    }

    #[test]
    fn test_unique_index_rejects_duplicate_and_leaves_table_clean() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[IndexSpec::unique("IdIdx", "Id")]);

        table.insert_row(&mut ch, &row3(7, "ALICE", true)).unwrap();
        let err = table.insert_row(&mut ch, &row3(7, "alice", false));
        assert!(matches!(err, Err(JetError::Constraint(_))));

        // exactly the first row remains
        assert_eq!(table.row_count(), 1);
        let mut found = 0;
        for page in table.owned_pages().pages() {
            let mut buf = ch.new_page_buffer();
            ch.read_page(page, &mut buf).unwrap();
            if buf[0] != PAGE_TYPE_DATA || row::data_page_tdef(&buf) != table.tdef_page() {
                continue;
            }
            for r in 0..row::data_page_row_count(&buf, table.format()) {
                if !row::row_ptr(&buf, table.format(), r).unwrap().is_deleted() {
                    found += 1;
                }
            }
        }
        assert_eq!(found, 1);
    }

    #[test]
    fn test_delete_marks_row_and_updates_count() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let id = table.insert_row(&mut ch, &row3(1, "A", true)).unwrap();
        table.insert_row(&mut ch, &row3(2, "B", true)).unwrap();

        table.delete_row(&mut ch, id).unwrap();
        assert_eq!(table.row_count(), 1);
        let handler = table.effective_error_handler();
        assert!(matches!(
            table.read_row(&mut ch, id, None, &handler),
            Err(JetError::Argument(_))
        ));
    }

    #[test]
    fn test_update_in_place_and_relocated() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let id = table.insert_row(&mut ch, &row3(1, "short", true)).unwrap();

        // same size: stays put
        table
            .update_row(&mut ch, id, &row3(1, "shrt2", true))
            .unwrap();
        let handler = table.effective_error_handler();
        let row = table.read_row(&mut ch, id, None, &handler).unwrap();
        assert_eq!(row[1].1, Value::Text("shrt2".to_string()));

        // fill the page so growth forces relocation
        while row::page_has_room(
            &{
                let mut buf = ch.new_page_buffer();
                ch.read_page(id.page as u32, &mut buf).unwrap();
                buf
            },
            64,
        ) {
            table.insert_row(&mut ch, &row3(9, "filler-filler-filler", false)).unwrap();
        }
        let big = "x".repeat(120);
        table
            .update_row(&mut ch, id, &row3(1, &big, true))
            .unwrap();
        let row = table.read_row(&mut ch, id, None, &handler).unwrap();
        assert_eq!(row[1].1, Value::Text(big));
        // the original slot now forwards
        let mut buf = ch.new_page_buffer();
        ch.read_page(id.page as u32, &mut buf).unwrap();
        assert!(row::row_ptr(&buf, table.format(), id.row as u16)
            .unwrap()
            .is_overflow());
    }

    #[test]
    fn test_memo_round_trips_through_long_values() {
        let (_tmp, mut ch) = test_channel();
        let tdef = ch.allocate_page().unwrap();
        let columns = vec![
            Column::new("Id", DataType::Long),
            Column::new("Notes", DataType::Memo),
        ];
        let mut table = Table::create(
            &mut ch,
            "Docs",
            tdef,
            columns,
            &[],
            TABLE_TYPE_USER,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap();

        let long_text = "lorem ".repeat(1000);
        let id = table
            .insert_row(
                &mut ch,
                &[Value::Long(1), Value::Text(long_text.clone())],
            )
            .unwrap();
        let handler = table.effective_error_handler();
        let row = table.read_row(&mut ch, id, None, &handler).unwrap();
        assert_eq!(row[1].1, Value::Text(long_text));
    }

    #[test]
    fn test_error_handler_substitutes_value() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let id = table.insert_row(&mut ch, &row3(5, "Eve", true)).unwrap();

        // corrupt the Name cell by writing odd-length unicode bytes
        let (page, row_number, mut buf) = table.resolve_row(&mut ch, id).unwrap();
        let (start, end) = row::row_region(&buf, table.format(), row_number).unwrap();
        let cells = row::decode_row(table.columns(), &buf[start..end], table.format()).unwrap();
        // rebuild the row with a broken Name cell
        let mut bad_cells = cells.clone();
        bad_cells[1] = Cell::Bytes(vec![0x41, 0x00, 0x42]);
        let bad = row::encode_row(table.columns(), &bad_cells, table.format()).unwrap();
        row::overwrite_row(&mut buf, table.format(), row_number, &bad).unwrap();
        ch.write_page(page, &buf).unwrap();

        let handler = table.effective_error_handler();
        assert!(table.read_row(&mut ch, id, None, &handler).is_err());

        let substituting: ErrorHandler =
            Rc::new(|_, _, _| Ok(Value::Text("<unreadable>".to_string())));
        let row = table.read_row(&mut ch, id, None, &substituting).unwrap();
        assert_eq!(row[1].1, Value::Text("<unreadable>".to_string()));
    }

    #[test]
    fn test_tdef_chain_spans_pages() {
        let (_tmp, mut ch) = test_channel();
        let tdef = ch.allocate_page().unwrap();
        // enough columns to outgrow one 4K page
        let columns: Vec<Column> = (0..200)
            .map(|i| Column::new(&format!("column_number_{:03}", i), DataType::Long))
            .collect();
        let table = Table::create(
            &mut ch,
            "Wide",
            tdef,
            columns,
            &[],
            TABLE_TYPE_USER,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap();
        drop(table);

        let table = Table::read(
            &mut ch,
            tdef,
            IndexVariant::Paged,
            rethrowing_error_handler(),
        )
        .unwrap();
        assert_eq!(table.columns().len(), 200);
        assert_eq!(table.columns()[199].name, "column_number_199");
    }

    #[test]
    fn test_owned_pages_match_scanned_rows() {
        let (_tmp, mut ch) = test_channel();
        let mut table = create_people(&mut ch, &[]);
        let mut inserted = Vec::new();
        for i in 0..120 {
            inserted.push(
                table
                    .insert_row(&mut ch, &row3(i, &format!("row-{}", i), i % 2 == 0))
                    .unwrap(),
            );
        }
        // scanning the owned pages finds exactly the inserted row ids
        let mut scanned = Vec::new();
        for page in table.owned_pages().pages() {
            let mut buf = ch.new_page_buffer();
            ch.read_page(page, &mut buf).unwrap();
            if buf[0] != PAGE_TYPE_DATA || row::data_page_tdef(&buf) != table.tdef_page() {
                continue;
            }
            for r in 0..row::data_page_row_count(&buf, table.format()) {
                let ptr = row::row_ptr(&buf, table.format(), r).unwrap();
                if !ptr.is_deleted() && !ptr.is_overflow() {
                    scanned.push(RowId::new(page, r));
                }
            }
        }
        let expected: HashSet<RowId> = inserted.iter().copied().collect();
        let got: HashSet<RowId> = scanned.iter().copied().collect();
        assert_eq!(got, expected);
        assert_eq!(scanned.len(), inserted.len());
    }
}
