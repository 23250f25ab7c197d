//! Cursors over tables.
//!
//! A [`Cursor`] is a pair of positions (current and previous) plus an
//! identity token, a per-cursor [`RowState`], and a column-matcher
//! strategy. Two traversal variants exist: a table scan walking the
//! owned-pages map, and an index-driven cursor wrapping an
//! [`IndexEntryCursor`] with optional start/end bounds, each inclusive or
//! exclusive independently.
//!
//! Cursors never hold a borrow of the table between calls; every move
//! takes the [`TableHandle`] pairing the table with its page channel, so
//! any number of cursors can interleave over one table. Structural changes
//! are noticed through the table's and index's modification counters: the
//! next move realigns from the recorded position and continues, which is
//! what keeps iteration well-defined while the same handle mutates the
//! table (scenario: delete the current row through one cursor, keep
//! iterating on another).
//!
//! `find_first_row` always starts from the beginning; on an index cursor
//! whose key starts with the pattern columns it seeks through the index
//! first, and in every case the rows it returns are re-checked against the
//! full pattern.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};

use log::debug;

use crate::jet::constants::*;
use crate::jet::index::{EntryCursorState, IndexEntry, IndexEntryCursor};
use crate::jet::page::PageChannel;
use crate::jet::row::{self, RowId};
use crate::jet::table::{ErrorHandler, Row, RowState, Table, TableHandle};
use crate::jet::usage_map::UsageMapCursor;
use crate::jet::value::Value;
use crate::JetError;

static NEXT_CURSOR_ID: AtomicU32 = AtomicU32::new(1);

/// How `find_first_row` compares a row's value against the pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMatcher {
    /// Plain equality.
    #[default]
    Exact,
    /// Text compares case-insensitively; other types compare exactly.
    CaseInsensitive,
}

impl ColumnMatcher {
    fn matches(&self, found: &Value, pattern: &Value) -> bool {
        match (self, found, pattern) {
            (ColumnMatcher::CaseInsensitive, Value::Text(a), Value::Text(b)) => {
                // fold through the collation tables, so accents disappear
                // along with case, matching how the text index compares
                use crate::jet::format::SortOrder;
                use crate::jet::index_codes::fold_text;
                match (
                    fold_text(a, SortOrder::GeneralLegacy),
                    fold_text(b, SortOrder::GeneralLegacy),
                ) {
                    (Ok(fa), Ok(fb)) => fa == fb,
                    _ => a.to_lowercase() == b.to_lowercase(),
                }
            }
            _ => found == pattern,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum ScanPos {
    BeforeFirst,
    AfterLast,
    At { page: u32, row: u16 },
}

#[derive(Debug)]
enum Variant {
    TableScan {
        page_cursor: UsageMapCursor,
        current: ScanPos,
        previous: ScanPos,
    },
    Index {
        /// Stored number of the backing index data.
        data_number: u8,
        entry_cursor: IndexEntryCursor,
    },
}

/// Saved cursor position, produced by [`Cursor::savepoint`].
///
/// Restores only reposition the cursor; they do not replay mutations.
#[derive(Debug, Clone)]
pub struct Savepoint {
    cursor_id: u32,
    state: SavedState,
}

#[derive(Debug, Clone)]
enum SavedState {
    Scan {
        current: ScanPos,
        previous: ScanPos,
        page_cursor: UsageMapCursor,
    },
    Index(EntryCursorState),
}

/// A traversal position over one table.
pub struct Cursor {
    id: u32,
    variant: Variant,
    row_state: RowState,
    matcher: ColumnMatcher,
}

impl Cursor {
    /// A cursor scanning the table's owned pages in page order.
    pub fn table_scan(table: &Table) -> Cursor {
        Cursor {
            id: NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed),
            variant: Variant::TableScan {
                page_cursor: table.owned_pages().cursor(),
                current: ScanPos::BeforeFirst,
                previous: ScanPos::BeforeFirst,
            },
            row_state: RowState::new(table),
            matcher: ColumnMatcher::default(),
        }
    }

    /// A cursor traversing in the order of a logical index.
    pub fn index_scan(table: &mut Table, index_name: &str) -> Result<Cursor, JetError> {
        Self::index_range(table, index_name, None, None)
    }

    /// An index cursor bounded by start/end key prefixes.
    ///
    /// Each bound is `(values, inclusive)` over the index's leading key
    /// columns. An exclusive start is modeled as "the first entry past the
    /// given bytes with the LAST row id sentinel"; an inclusive start uses
    /// FIRST, and the end bounds mirror that.
    pub fn index_range(
        table: &mut Table,
        index_name: &str,
        start: Option<(&[Value], bool)>,
        end: Option<(&[Value], bool)>,
    ) -> Result<Cursor, JetError> {
        let data_number = table
            .index(index_name)
            .map(|i| i.index_data_number)
            .ok_or_else(|| {
                JetError::Argument(format!(
                    "no index {:?} on table {:?}",
                    index_name, table.name
                ))
            })?;

        let make_bound = |values: &[Value], row_id: RowId| -> Result<IndexEntry, JetError> {
            Ok(IndexEntry::new(
                table.index_entry_prefix(index_name, values)?,
                row_id,
            ))
        };
        let first_bound = match start {
            None => None,
            Some((values, inclusive)) => Some(make_bound(
                values,
                if inclusive { RowId::FIRST } else { RowId::LAST },
            )?),
        };
        let last_bound = match end {
            None => None,
            Some((values, inclusive)) => Some(make_bound(
                values,
                if inclusive { RowId::LAST } else { RowId::FIRST },
            )?),
        };

        let data = table
            .index_data_by_number(data_number)
            .ok_or_else(|| {
                JetError::Corrupt(format!("missing index data {}", data_number))
            })?;
        let entry_cursor = data.cursor_between(first_bound, last_bound);
        let row_state = RowState::new(table);
        Ok(Cursor {
            id: NEXT_CURSOR_ID.fetch_add(1, Ordering::Relaxed),
            variant: Variant::Index {
                data_number,
                entry_cursor,
            },
            row_state,
            matcher: ColumnMatcher::default(),
        })
    }

    /// This cursor's identity token.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Choose the matcher used by the find operations.
    pub fn set_column_matcher(&mut self, matcher: ColumnMatcher) {
        self.matcher = matcher;
    }

    /// Cursor-scoped error handler; `None` reverts to the table's, which
    /// reverts to the database's.
    pub fn set_error_handler(&mut self, handler: Option<ErrorHandler>) {
        self.row_state.error_handler = handler;
    }

    /// Reset ahead of the first row.
    pub fn before_first(&mut self) {
        match &mut self.variant {
            Variant::TableScan {
                page_cursor,
                current,
                previous,
            } => {
                page_cursor.before_first();
                *current = ScanPos::BeforeFirst;
                *previous = ScanPos::BeforeFirst;
            }
            Variant::Index { entry_cursor, .. } => entry_cursor.before_first(),
        }
    }

    /// Reset past the last row.
    pub fn after_last(&mut self) {
        match &mut self.variant {
            Variant::TableScan {
                page_cursor,
                current,
                previous,
            } => {
                page_cursor.after_last();
                *current = ScanPos::AfterLast;
                *previous = ScanPos::AfterLast;
            }
            Variant::Index { entry_cursor, .. } => entry_cursor.after_last(),
        }
    }

    /// The row the cursor is on, if any.
    pub fn current_row_id(&self) -> Option<RowId> {
        match &self.variant {
            Variant::TableScan { current, .. } => match current {
                ScanPos::At { page, row } => Some(RowId::new(*page, *row)),
                _ => None,
            },
            Variant::Index { entry_cursor, .. } => entry_cursor.current_row_id(),
        }
    }

    // ── movement ────────────────────────────────────────────────────

    /// True when a data page belongs to this table's row storage.
    fn is_row_page(table: &Table, buf: &[u8]) -> bool {
        buf[0] == PAGE_TYPE_DATA && row::data_page_tdef(buf) == table.tdef_page()
    }

    /// Advance to the next live row slot on the scan.
    fn scan_next(h: &mut TableHandle<'_>, page_cursor: &mut UsageMapCursor, pos: &ScanPos) -> Result<ScanPos, JetError> {
        let table = &mut *h.table;
        let channel = &mut *h.channel;
        let mut buf = channel.new_page_buffer();

        let (mut page, mut next_row) = match pos {
            ScanPos::AfterLast => return Ok(ScanPos::AfterLast),
            ScanPos::BeforeFirst => {
                page_cursor.before_first();
                match page_cursor.next_page(table.owned_pages()) {
                    Some(p) => (p, 0u16),
                    None => return Ok(ScanPos::AfterLast),
                }
            }
            ScanPos::At { page, row } => (*page, *row + 1),
        };

        loop {
            channel.read_page(page, &mut buf)?;
            if Self::is_row_page(table, &buf) {
                let count = row::data_page_row_count(&buf, table.format());
                while next_row < count {
                    let ptr = row::row_ptr(&buf, table.format(), next_row)?;
                    if !ptr.is_deleted() && !ptr.is_overflow() {
                        return Ok(ScanPos::At {
                            page,
                            row: next_row,
                        });
                    }
                    next_row += 1;
                }
            }
            match page_cursor.next_page(table.owned_pages()) {
                Some(p) => {
                    page = p;
                    next_row = 0;
                }
                None => return Ok(ScanPos::AfterLast),
            }
        }
    }

    /// Step back to the previous live row slot on the scan.
    fn scan_prev(h: &mut TableHandle<'_>, page_cursor: &mut UsageMapCursor, pos: &ScanPos) -> Result<ScanPos, JetError> {
        let table = &mut *h.table;
        let channel = &mut *h.channel;
        let mut buf = channel.new_page_buffer();

        let (mut page, mut at_row) = match pos {
            ScanPos::BeforeFirst => return Ok(ScanPos::BeforeFirst),
            ScanPos::AfterLast => {
                page_cursor.after_last();
                match page_cursor.prev_page(table.owned_pages()) {
                    Some(p) => (p, u16::MAX),
                    None => return Ok(ScanPos::BeforeFirst),
                }
            }
            ScanPos::At { page, row } => (*page, *row),
        };

        loop {
            channel.read_page(page, &mut buf)?;
            if Self::is_row_page(table, &buf) {
                let count = row::data_page_row_count(&buf, table.format());
                let mut candidate = at_row.min(count);
                while candidate > 0 {
                    candidate -= 1;
                    let ptr = row::row_ptr(&buf, table.format(), candidate)?;
                    if !ptr.is_deleted() && !ptr.is_overflow() {
                        return Ok(ScanPos::At {
                            page,
                            row: candidate,
                        });
                    }
                }
            }
            match page_cursor.prev_page(table.owned_pages()) {
                Some(p) => {
                    page = p;
                    at_row = u16::MAX;
                }
                None => return Ok(ScanPos::BeforeFirst),
            }
        }
    }

    /// Move forward one row. Returns false at the end.
    pub fn move_to_next_row(&mut self, h: &mut TableHandle<'_>) -> Result<bool, JetError> {
        self.row_state.sync(h.table);
        match &mut self.variant {
            Variant::TableScan {
                page_cursor,
                current,
                previous,
            } => {
                let next = Self::scan_next(h, page_cursor, current)?;
                *previous = std::mem::replace(current, next);
                Ok(!matches!(current, ScanPos::AfterLast))
            }
            Variant::Index {
                data_number,
                entry_cursor,
            } => {
                let data = h
                    .table
                    .index_data_by_number(*data_number)
                    .ok_or_else(|| {
                        JetError::Corrupt(format!("missing index data {}", data_number))
                    })?;
                Ok(entry_cursor.next_entry(data, h.channel)?.is_some())
            }
        }
    }

    /// Move back one row. Returns false at the start.
    pub fn move_to_previous_row(&mut self, h: &mut TableHandle<'_>) -> Result<bool, JetError> {
        self.row_state.sync(h.table);
        match &mut self.variant {
            Variant::TableScan {
                page_cursor,
                current,
                previous,
            } => {
                let prev = Self::scan_prev(h, page_cursor, current)?;
                *previous = std::mem::replace(current, prev);
                Ok(!matches!(current, ScanPos::BeforeFirst))
            }
            Variant::Index {
                data_number,
                entry_cursor,
            } => {
                let data = h
                    .table
                    .index_data_by_number(*data_number)
                    .ok_or_else(|| {
                        JetError::Corrupt(format!("missing index data {}", data_number))
                    })?;
                Ok(entry_cursor.previous_entry(data, h.channel)?.is_some())
            }
        }
    }

    /// Read the row under the cursor, optionally projected to a column
    /// name set.
    pub fn current_row(
        &mut self,
        h: &mut TableHandle<'_>,
        projection: Option<&HashSet<String>>,
    ) -> Result<Row, JetError> {
        let row_id = self.current_row_id().ok_or_else(|| {
            JetError::Argument("cursor is not on a row".to_string())
        })?;
        self.row_state.read_row(h.table, h.channel, row_id, projection)
    }

    /// Delete the row under the cursor. The position stays on the dead
    /// slot, so the next forward move lands on the row after it.
    pub fn delete_current_row(&mut self, h: &mut TableHandle<'_>) -> Result<(), JetError> {
        let row_id = self.current_row_id().ok_or_else(|| {
            JetError::Argument("cursor is not on a row".to_string())
        })?;
        h.table.delete_row(h.channel, row_id)
    }

    /// Replace the row under the cursor.
    pub fn update_current_row(
        &mut self,
        h: &mut TableHandle<'_>,
        values: &[Value],
    ) -> Result<(), JetError> {
        let row_id = self.current_row_id().ok_or_else(|| {
            JetError::Argument("cursor is not on a row".to_string())
        })?;
        h.table.update_row(h.channel, row_id, values)
    }

    /// Overwrite one column of the row under the cursor.
    pub fn set_current_value(
        &mut self,
        h: &mut TableHandle<'_>,
        column: &str,
        value: Value,
    ) -> Result<(), JetError> {
        let row_id = self.current_row_id().ok_or_else(|| {
            JetError::Argument("cursor is not on a row".to_string())
        })?;
        let idx = h.table.column_index(column)?;
        let row = self.row_state.read_row(h.table, h.channel, row_id, None)?;
        let mut values: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
        values[idx] = value;
        h.table.update_row(h.channel, row_id, &values)
    }

    // ── find ────────────────────────────────────────────────────────

    /// From the start, land on the first row whose `column` matches
    /// `value` under the cursor's matcher. Returns false when no row does.
    pub fn find_first_row(
        &mut self,
        h: &mut TableHandle<'_>,
        column: &str,
        value: &Value,
    ) -> Result<bool, JetError> {
        self.find_first_row_pattern(h, &[(column.to_string(), value.clone())])
    }

    /// From the start, land on the first row matching every column of
    /// `pattern`.
    ///
    /// An index cursor whose key starts with the pattern columns (in
    /// order) seeks through the index to the pattern's key prefix first;
    /// the full pattern is verified on the rows either way.
    pub fn find_first_row_pattern(
        &mut self,
        h: &mut TableHandle<'_>,
        pattern: &[(String, Value)],
    ) -> Result<bool, JetError> {
        for (name, _) in pattern {
            h.table.column_index(name)?;
        }
        self.before_first();

        if let Variant::Index { data_number, .. } = &self.variant {
            let index_name = h
                .table
                .indexes()
                .iter()
                .find(|i| i.index_data_number == *data_number)
                .map(|i| i.name.clone());
            if let Some(index_name) = index_name {
                let key_names = h.table.index_column_names(&index_name)?;
                let is_prefix = pattern.len() <= key_names.len()
                    && pattern
                        .iter()
                        .zip(&key_names)
                        .all(|((name, _), key)| name.eq_ignore_ascii_case(key));
                // seeking only helps the exact matcher; a case fold can
                // diverge from the stored key bytes
                if is_prefix && self.matcher == ColumnMatcher::Exact {
                    let values: Vec<Value> =
                        pattern.iter().map(|(_, v)| v.clone()).collect();
                    let bytes = h.table.index_entry_prefix(&index_name, &values)?;
                    let target = IndexEntry::new(bytes, RowId::FIRST);
                    if let Variant::Index {
                        data_number,
                        entry_cursor,
                    } = &mut self.variant
                    {
                        let data = h
                            .table
                            .index_data_by_number(*data_number)
                            .ok_or_else(|| {
                                JetError::Corrupt(format!(
                                    "missing index data {}",
                                    data_number
                                ))
                            })?;
                        entry_cursor.before_entry(data, h.channel, &target)?;
                    }
                    debug!("find seeks through index {:?}", index_name);
                }
            }
        }

        // post-filter in all cases
        while self.move_to_next_row(h)? {
            let row = self.current_row(h, None)?;
            let all_match = pattern.iter().all(|(name, wanted)| {
                row.iter()
                    .find(|(col, _)| col.eq_ignore_ascii_case(name))
                    .map(|(_, found)| self.matcher.matches(found, wanted))
                    .unwrap_or(false)
            });
            if all_match {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── savepoints ──────────────────────────────────────────────────

    /// Capture the current position pair.
    pub fn savepoint(&self) -> Savepoint {
        let state = match &self.variant {
            Variant::TableScan {
                page_cursor,
                current,
                previous,
            } => SavedState::Scan {
                current: current.clone(),
                previous: previous.clone(),
                page_cursor: page_cursor.clone(),
            },
            Variant::Index { entry_cursor, .. } => SavedState::Index(entry_cursor.save()),
        };
        Savepoint {
            cursor_id: self.id,
            state,
        }
    }

    /// Reposition to a savepoint taken from this cursor.
    pub fn restore_savepoint(&mut self, savepoint: Savepoint) -> Result<(), JetError> {
        if savepoint.cursor_id != self.id {
            return Err(JetError::Argument(format!(
                "savepoint belongs to cursor {}, not {}",
                savepoint.cursor_id, self.id
            )));
        }
        match (&mut self.variant, savepoint.state) {
            (
                Variant::TableScan {
                    page_cursor,
                    current,
                    previous,
                },
                SavedState::Scan {
                    current: saved_current,
                    previous: saved_previous,
                    page_cursor: saved_cursor,
                },
            ) => {
                *current = saved_current;
                *previous = saved_previous;
                *page_cursor = saved_cursor;
            }
            (Variant::Index { entry_cursor, .. }, SavedState::Index(state)) => {
                entry_cursor.restore(state);
            }
            _ => {
                return Err(JetError::Argument(
                    "savepoint does not match the cursor variant".to_string(),
                ))
            }
        }
        Ok(())
    }

    /// A lazy row iterator that advances this cursor.
    pub fn iter<'c, 'h, 'a>(&'c mut self, h: &'h mut TableHandle<'a>) -> RowIter<'c, 'h, 'a> {
        RowIter { cursor: self, handle: h }
    }
}

/// Iterator over a cursor's remaining rows.
///
/// Each `next` advances the cursor and reads the row; [`RowIter::remove`]
/// deletes the row most recently returned, and iteration continues from
/// the deleted position.
pub struct RowIter<'c, 'h, 'a> {
    cursor: &'c mut Cursor,
    handle: &'h mut TableHandle<'a>,
}

impl RowIter<'_, '_, '_> {
    /// Delete the row most recently returned by `next`.
    pub fn remove(&mut self) -> Result<(), JetError> {
        self.cursor.delete_current_row(self.handle)
    }
}

impl Iterator for RowIter<'_, '_, '_> {
    type Item = Result<Row, JetError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.cursor.move_to_next_row(self.handle) {
            Ok(false) => None,
            Ok(true) => Some(self.cursor.current_row(self.handle, None)),
            Err(e) => Some(Err(e)),
        }
    }
}
