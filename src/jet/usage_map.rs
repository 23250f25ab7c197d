//! Page usage bitmaps.
//!
//! A usage map records a set of page numbers: the pages a table owns, the
//! pages with free row space, or the database's global free-page pool. Two
//! storage shapes share one type:
//!
//! - **inline**: the bits live directly in the map's backing row, after a
//!   type byte and a 4-byte start page;
//! - **reference**: the backing row lists dedicated bitmap pages, each
//!   covering `(page_size - 4) * 8` pages.
//!
//! An inline map whose range overflows is promoted in place to a reference
//! map (the backing row keeps its length, so the rewrite is local).
//!
//! The **global** flavor wraps inline storage with an inverted tail: every
//! page number at or past the end of the covered range is implicitly
//! present. That is how free-page tracking survives file growth without
//! rewriting the map; removing one of those implicit pages re-bases the
//! window over the growth frontier.
//!
//! [`UsageMapCursor`] walks the map in either direction and carries the
//! map's modification counter so dependent cursors can detect structural
//! change.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::jet::codec;
use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::jet::page::PageChannel;
use crate::jet::row;
use crate::JetError;

/// Backing row size for per-table usage maps.
const TABLE_MAP_ROW_SIZE: usize = 128;

/// Location of a usage map's backing row: 1-byte row number plus a 3-byte
/// page number, as stored in table definitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsageMapRef {
    /// Data page holding the backing row.
    pub page: u32,
    /// Row number of the backing row.
    pub row: u8,
}

impl UsageMapRef {
    /// A reference to `row` on `page`.
    pub fn new(page: u32, row: u8) -> Self {
        UsageMapRef { page, row }
    }

    /// Parse the stored 4-byte form.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, JetError> {
        if bytes.len() < 4 {
            return Err(JetError::Corrupt("short usage map reference".to_string()));
        }
        Ok(UsageMapRef {
            row: bytes[0],
            page: codec::read_u24_le(&bytes[1..]),
        })
    }

    /// The stored 4-byte form.
    pub fn to_bytes(self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out[0] = self.row;
        codec::write_u24_le(&mut out[1..], self.page);
        out
    }
}

#[derive(Debug)]
enum Storage {
    Inline {
        start_page: u32,
    },
    Reference {
        /// One slot per listed bitmap page; `INVALID_PAGE_NUMBER` until the
        /// slot's page is allocated.
        map_pages: Vec<i32>,
    },
}

/// A page-number bitmap backed by a row in the database.
#[derive(Debug)]
pub struct UsageMap {
    map_ref: UsageMapRef,
    storage: Storage,
    row_len: usize,
    /// In-memory mirror of every bitmap byte this map addresses.
    bits: Vec<u8>,
    global: bool,
    modification_count: u32,
}

fn bytes_per_map_page(format: &JetFormat) -> usize {
    format.page_size - 4
}

impl UsageMap {
    /// Build the backing row bytes of a fresh, empty inline map.
    ///
    /// Global maps get the largest row the format allows so the covered
    /// window is wide; table maps use a small fixed row.
    pub fn new_inline_row(format: &JetFormat, start_page: u32, global: bool) -> Vec<u8> {
        let row_len = if global {
            format.max_row_size
        } else {
            TABLE_MAP_ROW_SIZE
        };
        let mut out = vec![0u8; row_len];
        out[0] = USAGE_MAP_INLINE;
        LittleEndian::write_u32(&mut out[1..], start_page);
        out
    }

    /// Load a usage map from its backing row.
    pub fn read(
        channel: &mut PageChannel,
        map_ref: UsageMapRef,
        global: bool,
    ) -> Result<UsageMap, JetError> {
        let format = channel.format();
        let mut buf = channel.new_page_buffer();
        channel.read_page(map_ref.page, &mut buf)?;
        let (start, end) = row::row_region(&buf, format, map_ref.row as u16)?;
        let row_bytes = &buf[start..end];
        if row_bytes.is_empty() {
            return Err(JetError::Corrupt("empty usage map row".to_string()));
        }

        let row_len = row_bytes.len();
        match row_bytes[0] {
            USAGE_MAP_INLINE => {
                if row_len < 5 {
                    return Err(JetError::Corrupt(format!(
                        "inline usage map row of {} bytes",
                        row_len
                    )));
                }
                let start_page = LittleEndian::read_u32(&row_bytes[1..]);
                Ok(UsageMap {
                    map_ref,
                    storage: Storage::Inline { start_page },
                    row_len,
                    bits: row_bytes[5..].to_vec(),
                    global,
                    modification_count: 0,
                })
            }
            USAGE_MAP_REFERENCE => {
                let slots = (row_len - 1) / 4;
                let mut map_pages = Vec::with_capacity(slots);
                for i in 0..slots {
                    map_pages.push(LittleEndian::read_i32(&row_bytes[1 + i * 4..]));
                }
                let per_page = bytes_per_map_page(format);
                let mut bits = vec![0u8; slots * per_page];
                let mut page_buf = channel.new_page_buffer();
                for (i, &map_page) in map_pages.iter().enumerate() {
                    if map_page <= INVALID_PAGE_NUMBER || map_page == 0 {
                        continue;
                    }
                    channel.read_page(map_page as u32, &mut page_buf)?;
                    if page_buf[0] != PAGE_TYPE_USAGE_MAP {
                        return Err(JetError::Corrupt(format!(
                            "usage map page {} has type 0x{:02X}",
                            map_page, page_buf[0]
                        )));
                    }
                    bits[i * per_page..(i + 1) * per_page].copy_from_slice(&page_buf[4..]);
                }
                Ok(UsageMap {
                    map_ref,
                    storage: Storage::Reference { map_pages },
                    row_len,
                    bits,
                    global,
                    modification_count: 0,
                })
            }
            other => Err(JetError::Corrupt(format!(
                "unknown usage map type 0x{:02X}",
                other
            ))),
        }
    }

    /// Monotonic counter advanced by every mutation.
    pub fn modification_count(&self) -> u32 {
        self.modification_count
    }

    /// Where this map's backing row lives.
    pub fn map_ref(&self) -> UsageMapRef {
        self.map_ref
    }

    /// First page of the covered window.
    fn range_start(&self) -> u32 {
        match &self.storage {
            Storage::Inline { start_page } => *start_page,
            Storage::Reference { .. } => 0,
        }
    }

    /// One past the last page of the covered window.
    fn range_end(&self) -> u64 {
        self.range_start() as u64 + self.bits.len() as u64 * 8
    }

    fn bit(&self, page: u32) -> bool {
        let idx = (page - self.range_start()) as usize;
        self.bits[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set_bit(&mut self, page: u32, on: bool) {
        let idx = (page - self.range_start()) as usize;
        if on {
            self.bits[idx / 8] |= 1 << (idx % 8);
        } else {
            self.bits[idx / 8] &= !(1 << (idx % 8));
        }
    }

    fn in_range(&self, page: u32) -> bool {
        (page as u64) >= self.range_start() as u64 && (page as u64) < self.range_end()
    }

    /// True when `page` is in the map.
    pub fn contains(&self, page: u32) -> bool {
        if self.in_range(page) {
            self.bit(page)
        } else {
            // the global map's tail is implicitly present
            self.global && page as u64 >= self.range_end()
        }
    }

    /// Number of explicitly set pages.
    pub fn page_count(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// The set pages, ascending. Implicit global tail pages are not
    /// materialized here.
    pub fn pages(&self) -> Vec<u32> {
        let start = self.range_start();
        let mut out = Vec::new();
        for (i, byte) in self.bits.iter().enumerate() {
            if *byte == 0 {
                continue;
            }
            for b in 0..8 {
                if byte & (1 << b) != 0 {
                    out.push(start + (i * 8 + b) as u32);
                }
            }
        }
        out
    }

    /// Add a page to the map.
    pub fn add_page(&mut self, channel: &mut PageChannel, page: u32) -> Result<(), JetError> {
        if !self.in_range(page) {
            if self.global {
                if page as u64 >= self.range_end() {
                    // implicitly present already
                    return Ok(());
                }
                // below a re-based window: the page is simply never
                // reused; losing it is cheaper than widening the row
                debug!("global usage map dropped page {} below its window", page);
                return Ok(());
            }
            self.promote_to_reference(channel, page)?;
        }
        if !self.in_range(page) {
            return Err(JetError::Argument(format!(
                "page {} is outside the usage map",
                page
            )));
        }
        self.set_bit(page, true);
        self.modification_count += 1;
        self.persist_bit(channel, page)
    }

    /// Remove a page from the map. Absent pages are ignored.
    pub fn remove_page(&mut self, channel: &mut PageChannel, page: u32) -> Result<(), JetError> {
        if !self.in_range(page) {
            if self.global && page as u64 >= self.range_end() {
                // an implicit page is leaving the tail: slide the window up
                self.rebase_global(channel, page)?;
            } else {
                return Ok(());
            }
        }
        self.set_bit(page, false);
        self.modification_count += 1;
        self.persist_bit(channel, page)
    }

    /// A cursor positioned before the first page.
    pub fn cursor(&self) -> UsageMapCursor {
        UsageMapCursor {
            modification_count: self.modification_count,
            position: Position::BeforeFirst,
        }
    }

    // ── persistence ─────────────────────────────────────────────────

    fn write_backing_row(
        &self,
        channel: &mut PageChannel,
        row_bytes: &[u8],
    ) -> Result<(), JetError> {
        let format = channel.format();
        let mut buf = channel.new_page_buffer();
        channel.read_page(self.map_ref.page, &mut buf)?;
        let (start, end) = row::row_region(&buf, format, self.map_ref.row as u16)?;
        if end - start != row_bytes.len() {
            return Err(JetError::Corrupt(format!(
                "usage map row is {} bytes, expected {}",
                end - start,
                row_bytes.len()
            )));
        }
        buf[start..end].copy_from_slice(row_bytes);
        channel.write_page(self.map_ref.page, &buf)
    }

    fn inline_row_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.row_len];
        out[0] = USAGE_MAP_INLINE;
        LittleEndian::write_u32(&mut out[1..], self.range_start());
        out[5..].copy_from_slice(&self.bits);
        out
    }

    fn reference_row_bytes(&self, map_pages: &[i32]) -> Vec<u8> {
        let mut out = vec![0u8; self.row_len];
        out[0] = USAGE_MAP_REFERENCE;
        for (i, page) in map_pages.iter().enumerate() {
            LittleEndian::write_i32(&mut out[1 + i * 4..], *page);
        }
        out
    }

    /// Write the storage touched by a change to `page`'s bit.
    fn persist_bit(&mut self, channel: &mut PageChannel, page: u32) -> Result<(), JetError> {
        match &self.storage {
            Storage::Inline { .. } => {
                let row = self.inline_row_bytes();
                self.write_backing_row(channel, &row)
            }
            Storage::Reference { map_pages } => {
                let format = channel.format();
                let per_page = bytes_per_map_page(format);
                let slot = page as usize / (per_page * 8);
                let map_page = map_pages[slot];
                if map_page <= 0 {
                    return Err(JetError::Corrupt(format!(
                        "usage map slot {} has no bitmap page",
                        slot
                    )));
                }
                let mut buf = channel.new_page_buffer();
                channel.read_page(map_page as u32, &mut buf)?;
                buf[4..].copy_from_slice(&self.bits[slot * per_page..(slot + 1) * per_page]);
                channel.write_page(map_page as u32, &buf)
            }
        }
    }

    /// Convert an inline map to reference storage so `page` becomes
    /// addressable. The backing row keeps its length; every listed bitmap
    /// page needed for current or requested bits is allocated now.
    fn promote_to_reference(
        &mut self,
        channel: &mut PageChannel,
        page: u32,
    ) -> Result<(), JetError> {
        let format = channel.format();
        let per_page = bytes_per_map_page(format);
        let slots = (self.row_len - 1) / 4;
        let max_page = slots as u64 * per_page as u64 * 8;
        if page as u64 >= max_page {
            return Err(JetError::Argument(format!(
                "page {} exceeds the {}-slot reference map capacity",
                page, slots
            )));
        }

        let old_pages = self.pages();
        let mut map_pages = vec![INVALID_PAGE_NUMBER; slots];
        let mut bits = vec![0u8; slots * per_page];

        let mut needed_slots: Vec<usize> = old_pages
            .iter()
            .map(|p| *p as usize / (per_page * 8))
            .collect();
        needed_slots.push(page as usize / (per_page * 8));
        needed_slots.sort_unstable();
        needed_slots.dedup();

        let mut page_buf = channel.new_page_buffer();
        for slot in needed_slots {
            let new_page = channel.allocate_page()?;
            let page_buf_len = page_buf.len();
            codec::fill_range(&mut page_buf, 0, page_buf_len, 0);
            page_buf[0] = PAGE_TYPE_USAGE_MAP;
            page_buf[1] = PAGE_MARKER;
            channel.write_page(new_page, &page_buf)?;
            map_pages[slot] = new_page as i32;
        }
        for p in &old_pages {
            let idx = *p as usize;
            bits[idx / 8] |= 1 << (idx % 8);
        }

        debug!(
            "promoted usage map at {:?} to reference storage for page {}",
            self.map_ref, page
        );
        self.storage = Storage::Reference {
            map_pages: map_pages.clone(),
        };
        self.bits = bits;
        let row = self.reference_row_bytes(&map_pages);
        self.write_backing_row(channel, &row)?;
        // rewrite every populated bitmap page
        for slot in 0..slots {
            let map_page = map_pages[slot];
            if map_page <= 0 {
                continue;
            }
            let mut buf = channel.new_page_buffer();
            channel.read_page(map_page as u32, &mut buf)?;
            buf[4..].copy_from_slice(&self.bits[slot * per_page..(slot + 1) * per_page]);
            channel.write_page(map_page as u32, &buf)?;
        }
        Ok(())
    }

    /// Slide a global map's window forward so `page` falls inside it.
    ///
    /// Pages entering the window from the implicit tail materialize as set
    /// bits; pages dropped below the new start leave the map.
    fn rebase_global(&mut self, channel: &mut PageChannel, page: u32) -> Result<(), JetError> {
        let capacity = self.bits.len() * 8;
        let old_start = self.range_start();
        let old_end = self.range_end();
        let new_start = (page as u64 + 1).saturating_sub(capacity as u64) as u32;

        let mut new_bits = vec![0u8; self.bits.len()];
        for idx in 0..capacity {
            let p = new_start as u64 + idx as u64;
            let on = if p >= old_end {
                true // was implicitly present
            } else if p >= old_start as u64 {
                self.bit(p as u32)
            } else {
                false
            };
            if on {
                new_bits[idx / 8] |= 1 << (idx % 8);
            }
        }

        debug!(
            "rebased global usage map window {} -> {} for page {}",
            old_start, new_start, page
        );
        self.bits = new_bits;
        self.storage = Storage::Inline {
            start_page: new_start,
        };
        let row = self.inline_row_bytes();
        self.write_backing_row(channel, &row)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    BeforeFirst,
    At(u32),
    AfterLast,
}

/// Bidirectional iterator over a usage map's set pages.
///
/// The cursor snapshots the map's modification counter; a mismatch on the
/// next move re-snapshots and continues from the current page number, which
/// stays meaningful across any bitmap mutation.
#[derive(Debug, Clone)]
pub struct UsageMapCursor {
    modification_count: u32,
    position: Position,
}

impl UsageMapCursor {
    /// Reposition before the first page.
    pub fn before_first(&mut self) {
        self.position = Position::BeforeFirst;
    }

    /// Reposition after the last page.
    pub fn after_last(&mut self) {
        self.position = Position::AfterLast;
    }

    /// True when the map has changed since this cursor last moved.
    pub fn is_stale(&self, map: &UsageMap) -> bool {
        self.modification_count != map.modification_count
    }

    fn sync(&mut self, map: &UsageMap) {
        if self.is_stale(map) {
            self.modification_count = map.modification_count;
        }
    }

    /// Advance to the next set page.
    pub fn next_page(&mut self, map: &UsageMap) -> Option<u32> {
        self.sync(map);
        let start_from = match self.position {
            Position::BeforeFirst => 0u64,
            Position::At(p) => p as u64 + 1,
            Position::AfterLast => return None,
        };
        let begin = start_from.max(map.range_start() as u64);
        for p in begin..map.range_end() {
            if map.bit(p as u32) {
                self.position = Position::At(p as u32);
                return Some(p as u32);
            }
        }
        self.position = Position::AfterLast;
        None
    }

    /// Step back to the previous set page.
    pub fn prev_page(&mut self, map: &UsageMap) -> Option<u32> {
        self.sync(map);
        let end_at = match self.position {
            Position::BeforeFirst => return None,
            Position::At(p) => p as u64,
            Position::AfterLast => map.range_end(),
        };
        let mut p = end_at;
        while p > map.range_start() as u64 {
            p -= 1;
            if map.bit(p as u32) {
                self.position = Position::At(p as u32);
                return Some(p as u32);
            }
        }
        self.position = Position::BeforeFirst;
        None
    }
}
