//! B-tree index pages, entries, and the entry cursor.
//!
//! An index is one or more pages forming a B-tree: leaf pages (type 0x04)
//! hold the sorted entries, node pages (type 0x03) hold the first entry of
//! each child next to its page pointer, plus a child-tail pointer at the
//! rightmost edge. Sibling pages are doubly linked per level.
//!
//! Entries are prefix-compressed per page: the byte sequence shared by
//! every entry is stored once at the head of the entry area (inside the
//! first entry, which is written in full), and later entries store only
//! their suffix. The entry bitmask ahead of the area has one bit per
//! *logical* entry byte; a set bit marks the last byte of an entry, which
//! is how the reader recovers per-entry lengths.
//!
//! Cached pages live in an arena keyed by page number; page-to-page
//! references are page numbers, never pointers. Two variants share the
//! type: the *simple* variant reads everything into memory on first use
//! and becomes read-only when it sees more than one leaf; the *paged*
//! variant loads pages on demand, marks them modified on mutation, and
//! flushes modified pages on [`IndexData::update`].
//!
//! Page splits and parent-key rewrites are not performed; operations that
//! would need them fail with [`JetError::Unsupported`] before touching the
//! file.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::Serialize;

use crate::jet::codec;
use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::jet::page::PageChannel;
use crate::jet::row::RowId;
use crate::JetError;

/// One column of an index key.
#[derive(Debug, Clone, Serialize)]
pub struct IndexColumn {
    /// Position of the column in the table's column list.
    pub column_index: usize,
    /// Stored column number.
    pub column_number: u16,
    /// Sort direction.
    pub ascending: bool,
}

/// A logical index: presentation flags over a physical page set.
///
/// Several logical indexes may share one [`IndexData`] (a primary key and
/// a foreign key over the same columns, for instance); foreign keys are
/// kept at the tail of a table's index list so the primary-key-capable
/// index stays first.
#[derive(Debug, Clone, Serialize)]
pub struct IndexInfo {
    /// Index name.
    pub name: String,
    /// Stored index number.
    pub index_number: u8,
    /// Number of the [`IndexData`] backing this index.
    pub index_data_number: u8,
    /// `INDEX_TYPE_*` tag.
    pub index_type: u8,
    /// `INDEX_FLAG_*` bits.
    pub flags: u8,
}

impl IndexInfo {
    /// True when two rows may not share this index's key bytes.
    pub fn is_unique(&self) -> bool {
        self.flags & INDEX_FLAG_UNIQUE != 0 || self.index_type == INDEX_TYPE_PRIMARY
    }

    /// True when all-null keys stay out of the index.
    pub fn should_ignore_nulls(&self) -> bool {
        self.flags & INDEX_FLAG_IGNORE_NULLS != 0
    }

    /// True for the table's primary key.
    pub fn is_primary_key(&self) -> bool {
        self.index_type == INDEX_TYPE_PRIMARY
    }

    /// True for foreign-key indexes.
    pub fn is_foreign_key(&self) -> bool {
        self.index_type == INDEX_TYPE_FOREIGN
    }
}

/// Size of the row id trailing a leaf entry (3-byte page + 1-byte row).
const ENTRY_ROW_ID_SIZE: usize = 4;
/// Extra bytes trailing a node entry (the 3-byte child page).
const ENTRY_SUB_PAGE_SIZE: usize = 3;

/// One index entry: encoded column keys plus a row id, and on node pages
/// the child page the entry describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexEntry {
    /// Concatenated per-column key bytes.
    pub bytes: Vec<u8>,
    /// Row the entry points at (leaf), or the first row id of the child
    /// (node).
    pub row_id: RowId,
    /// Child page (node entries only).
    pub sub_page: i32,
}

impl IndexEntry {
    /// A leaf entry.
    pub fn new(bytes: Vec<u8>, row_id: RowId) -> Self {
        IndexEntry {
            bytes,
            row_id,
            sub_page: INVALID_PAGE_NUMBER,
        }
    }

    /// Ordering ignores the child pointer: bytes first, row id as the tie
    /// break. The row id sentinels give "before any equal key" / "after
    /// any equal key" positions.
    fn cmp_entry(&self, other: &IndexEntry) -> std::cmp::Ordering {
        self.bytes
            .cmp(&other.bytes)
            .then_with(|| self.row_id.cmp(&other.row_id))
    }

    fn serialized_len(&self, leaf: bool) -> usize {
        self.bytes.len()
            + ENTRY_ROW_ID_SIZE
            + if leaf { 0 } else { ENTRY_SUB_PAGE_SIZE }
    }

    fn serialize(&self, leaf: bool, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.bytes);
        let mut rid = [0u8; ENTRY_ROW_ID_SIZE];
        codec::write_u24_be(&mut rid[..3], self.row_id.page as u32);
        rid[3] = self.row_id.row as u8;
        out.extend_from_slice(&rid);
        if !leaf {
            let mut sub = [0u8; ENTRY_SUB_PAGE_SIZE];
            codec::write_u24_be(&mut sub, self.sub_page as u32);
            out.extend_from_slice(&sub);
        }
    }

    fn deserialize(bytes: &[u8], leaf: bool) -> Result<IndexEntry, JetError> {
        let trailer = ENTRY_ROW_ID_SIZE + if leaf { 0 } else { ENTRY_SUB_PAGE_SIZE };
        if bytes.len() < trailer {
            return Err(JetError::Corrupt("index entry shorter than its trailer".to_string()));
        }
        let key_len = bytes.len() - trailer;
        let rid = &bytes[key_len..key_len + ENTRY_ROW_ID_SIZE];
        let row_id = RowId::new(codec::read_u24_be(&rid[..3]), rid[3] as u16);
        let sub_page = if leaf {
            INVALID_PAGE_NUMBER
        } else {
            codec::read_u24_be(&bytes[key_len + ENTRY_ROW_ID_SIZE..]) as i32
        };
        Ok(IndexEntry {
            bytes: bytes[..key_len].to_vec(),
            row_id,
            sub_page,
        })
    }
}

/// A cached index page.
#[derive(Debug, Clone)]
pub struct IndexPage {
    /// Page number in the file.
    pub page_number: u32,
    /// Leaf or node.
    pub leaf: bool,
    /// Previous sibling at this level.
    pub prev_page: i32,
    /// Next sibling at this level.
    pub next_page: i32,
    /// Rightmost child (node pages).
    pub child_tail_page: i32,
    /// Decompressed entries, sorted.
    pub entries: Vec<IndexEntry>,
    /// True when the page needs writing back.
    pub modified: bool,
}

impl IndexPage {
    fn empty_leaf(page_number: u32) -> Self {
        IndexPage {
            page_number,
            leaf: true,
            prev_page: INVALID_PAGE_NUMBER,
            next_page: INVALID_PAGE_NUMBER,
            child_tail_page: INVALID_PAGE_NUMBER,
            entries: Vec::new(),
            modified: false,
        }
    }
}

/// Parse an index page buffer.
pub fn parse_index_page(
    buf: &[u8],
    format: &JetFormat,
    page_number: u32,
) -> Result<IndexPage, JetError> {
    let leaf = match buf[0] {
        PAGE_TYPE_INDEX_LEAF => true,
        PAGE_TYPE_INDEX_NODE => false,
        other => {
            return Err(JetError::Corrupt(format!(
                "page {} has type 0x{:02X}, expected an index page",
                page_number, other
            )))
        }
    };
    let prev_page = LittleEndian::read_i32(&buf[format.offset_index_prev_page..]);
    let next_page = LittleEndian::read_i32(&buf[format.offset_index_next_page()..]);
    let child_tail_page = LittleEndian::read_i32(&buf[format.offset_index_child_tail()..]);
    let prefix_len = LittleEndian::read_u16(&buf[format.offset_index_prefix_len()..]) as usize;

    let mask_start = format.offset_index_entry_mask;
    let mask = &buf[mask_start..mask_start + format.index_entry_mask_size];
    let area_start = mask_start + format.index_entry_mask_size;

    let mut entries = Vec::new();
    let mut logical_start = 0usize;
    let mut stored_at = area_start;
    let mut prefix: Vec<u8> = Vec::new();
    for bit in 0..format.index_entry_mask_size * 8 {
        if mask[bit / 8] & (1 << (bit % 8)) == 0 {
            continue;
        }
        let logical_len = bit + 1 - logical_start;
        let first = entries.is_empty();
        if !first && logical_len < prefix_len {
            return Err(JetError::Corrupt(format!(
                "index entry shorter than the page prefix on page {}",
                page_number
            )));
        }
        let stored_len = if first { logical_len } else { logical_len - prefix_len };
        if stored_at + stored_len > buf.len() {
            return Err(JetError::Corrupt(format!(
                "index entry overruns page {}",
                page_number
            )));
        }
        let mut full = Vec::with_capacity(logical_len);
        if first {
            full.extend_from_slice(&buf[stored_at..stored_at + stored_len]);
            prefix = full[..prefix_len.min(full.len())].to_vec();
        } else {
            full.extend_from_slice(&prefix);
            full.extend_from_slice(&buf[stored_at..stored_at + stored_len]);
        }
        stored_at += stored_len;
        logical_start = bit + 1;
        entries.push(IndexEntry::deserialize(&full, leaf)?);
    }

    // entries must arrive sorted; anything else is corruption
    for pair in entries.windows(2) {
        if pair[0].cmp_entry(&pair[1]) == std::cmp::Ordering::Greater {
            return Err(JetError::Corrupt(format!(
                "index entries out of order on page {}",
                page_number
            )));
        }
    }

    Ok(IndexPage {
        page_number,
        leaf,
        prev_page,
        next_page,
        child_tail_page,
        entries,
        modified: false,
    })
}

/// Serialize an index page into a fresh page buffer.
pub fn write_index_page(
    page: &IndexPage,
    format: &JetFormat,
    tdef_page: u32,
) -> Result<Vec<u8>, JetError> {
    let mut buf = vec![0u8; format.page_size];
    buf[0] = if page.leaf {
        PAGE_TYPE_INDEX_LEAF
    } else {
        PAGE_TYPE_INDEX_NODE
    };
    buf[1] = PAGE_MARKER;
    LittleEndian::write_u32(&mut buf[4..], tdef_page);
    LittleEndian::write_i32(&mut buf[format.offset_index_prev_page..], page.prev_page);
    LittleEndian::write_i32(&mut buf[format.offset_index_next_page()..], page.next_page);
    LittleEndian::write_i32(&mut buf[format.offset_index_child_tail()..], page.child_tail_page);

    let serialized: Vec<Vec<u8>> = page
        .entries
        .iter()
        .map(|e| {
            let mut v = Vec::with_capacity(e.serialized_len(page.leaf));
            e.serialize(page.leaf, &mut v);
            v
        })
        .collect();

    // entries are sorted, so the page-wide shared prefix is the common
    // prefix of the first and last
    let prefix_len = match (serialized.first(), serialized.last()) {
        (Some(first), Some(last)) if serialized.len() > 1 => first
            .iter()
            .zip(last.iter())
            .take_while(|(a, b)| a == b)
            .count(),
        _ => 0,
    };
    LittleEndian::write_u16(&mut buf[format.offset_index_prefix_len()..], prefix_len as u16);

    let logical_total: usize = serialized.iter().map(|e| e.len()).sum();
    let stored_total: usize = logical_total - prefix_len * serialized.len().saturating_sub(1);
    if logical_total > format.index_entry_mask_size * 8
        || stored_total > format.index_entry_area_size()
    {
        return Err(JetError::Unsupported(
            "index entries exceed one page; page splitting is not supported".to_string(),
        ));
    }

    let mask_start = format.offset_index_entry_mask;
    let area_start = mask_start + format.index_entry_mask_size;
    let mut logical_pos = 0usize;
    let mut stored_at = area_start;
    for (i, full) in serialized.iter().enumerate() {
        logical_pos += full.len();
        let bit = logical_pos - 1;
        buf[mask_start + bit / 8] |= 1 << (bit % 8);
        let stored = if i == 0 { &full[..] } else { &full[prefix_len..] };
        buf[stored_at..stored_at + stored.len()].copy_from_slice(stored);
        stored_at += stored.len();
    }

    let free = format.page_size - stored_at;
    LittleEndian::write_u16(&mut buf[2..], free as u16);
    Ok(buf)
}

/// Which storage strategy an [`IndexData`] uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexVariant {
    /// Everything in memory on first use; read-only past one leaf.
    Simple,
    /// Pages cached on demand, flushed on update.
    Paged,
}

/// The physical half of an index: its page set and entry operations.
#[derive(Debug)]
pub struct IndexData {
    /// Stored index data number.
    pub number: u8,
    /// Root page of the tree.
    pub root_page: u32,
    /// Key columns in order.
    pub columns: Vec<IndexColumn>,
    /// Owning table definition page.
    tdef_page: u32,
    variant: IndexVariant,
    pages: HashMap<u32, IndexPage>,
    initialized: bool,
    read_only: bool,
    modification_count: u32,
}

impl IndexData {
    /// Wrap an existing tree rooted at `root_page`.
    pub fn new(
        number: u8,
        root_page: u32,
        tdef_page: u32,
        columns: Vec<IndexColumn>,
        variant: IndexVariant,
    ) -> Self {
        IndexData {
            number,
            root_page,
            columns,
            tdef_page,
            variant,
            pages: HashMap::new(),
            initialized: false,
            read_only: false,
            modification_count: 0,
        }
    }

    /// Allocate and stamp an empty root leaf for a brand-new index.
    pub fn create(
        channel: &mut PageChannel,
        number: u8,
        tdef_page: u32,
        columns: Vec<IndexColumn>,
        variant: IndexVariant,
    ) -> Result<Self, JetError> {
        let root_page = channel.allocate_page()?;
        let page = IndexPage::empty_leaf(root_page);
        let buf = write_index_page(&page, channel.format(), tdef_page)?;
        channel.write_page(root_page, &buf)?;
        let mut data = IndexData::new(number, root_page, tdef_page, columns, variant);
        data.pages.insert(root_page, page);
        data.initialized = true;
        Ok(data)
    }

    /// Monotonic counter advanced by every mutation.
    pub fn modification_count(&self) -> u32 {
        self.modification_count
    }

    /// True when the simple variant saw a tree it cannot write.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Parse pages on first use. The simple variant reads the whole tree
    /// now and collapses it to one in-memory leaf; the paged variant only
    /// touches the root.
    pub fn initialize(&mut self, channel: &mut PageChannel) -> Result<(), JetError> {
        if self.initialized {
            return Ok(());
        }
        match self.variant {
            IndexVariant::Paged => {
                self.load_page(channel, self.root_page)?;
            }
            IndexVariant::Simple => {
                let mut leaf = self.leftmost_leaf_from_disk(channel)?;
                if leaf.next_page > INVALID_PAGE_NUMBER {
                    // more than one leaf: merge in memory, refuse writes
                    debug!(
                        "index data {} has multiple leaves; simple variant goes read-only",
                        self.number
                    );
                    self.read_only = true;
                    let mut merged = leaf.entries.clone();
                    let mut next = leaf.next_page;
                    let mut guard = channel.page_count() as usize + 1;
                    while next > INVALID_PAGE_NUMBER {
                        let sibling = self.read_page_from_disk(channel, next as u32)?;
                        merged.extend(sibling.entries.iter().cloned());
                        next = sibling.next_page;
                        guard -= 1;
                        if guard == 0 {
                            return Err(JetError::Corrupt(
                                "index leaf chain loops".to_string(),
                            ));
                        }
                    }
                    leaf = IndexPage::empty_leaf(self.root_page);
                    leaf.entries = merged;
                } else {
                    leaf.page_number = self.root_page;
                }
                self.pages.clear();
                self.pages.insert(self.root_page, leaf);
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn read_page_from_disk(
        &self,
        channel: &mut PageChannel,
        page_number: u32,
    ) -> Result<IndexPage, JetError> {
        let mut buf = channel.new_page_buffer();
        channel.read_page(page_number, &mut buf)?;
        parse_index_page(&buf, channel.format(), page_number)
    }

    fn leftmost_leaf_from_disk(&self, channel: &mut PageChannel) -> Result<IndexPage, JetError> {
        let mut page = self.read_page_from_disk(channel, self.root_page)?;
        let mut guard = channel.page_count() as usize + 1;
        while !page.leaf {
            let child = page
                .entries
                .first()
                .map(|e| e.sub_page)
                .filter(|p| *p > INVALID_PAGE_NUMBER)
                .or_else(|| Some(page.child_tail_page).filter(|p| *p > INVALID_PAGE_NUMBER))
                .ok_or_else(|| {
                    JetError::Corrupt(format!("index node {} has no children", page.page_number))
                })?;
            page = self.read_page_from_disk(channel, child as u32)?;
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("index tree does not reach a leaf".to_string()));
            }
        }
        Ok(page)
    }

    fn load_page(&mut self, channel: &mut PageChannel, page_number: u32) -> Result<(), JetError> {
        if self.pages.contains_key(&page_number) {
            return Ok(());
        }
        let page = self.read_page_from_disk(channel, page_number)?;
        self.pages.insert(page_number, page);
        Ok(())
    }

    fn page(&self, page_number: u32) -> &IndexPage {
        &self.pages[&page_number]
    }

    /// Descend from the root to the leaf that should hold `entry`.
    /// Returns the leaf page number and the node path above it.
    fn find_leaf(
        &mut self,
        channel: &mut PageChannel,
        entry: &IndexEntry,
    ) -> Result<(u32, Vec<u32>), JetError> {
        self.initialize(channel)?;
        let mut path = Vec::new();
        let mut current = self.root_page;
        let mut guard = channel.page_count() as usize + 1;
        loop {
            self.load_page(channel, current)?;
            let page = self.page(current);
            if page.leaf {
                return Ok((current, path));
            }
            // first/last shortcut, binary search in between
            let child = if page.entries.is_empty() {
                page.child_tail_page
            } else if entry.cmp_entry(&page.entries[0]) == std::cmp::Ordering::Less {
                page.entries[0].sub_page
            } else if entry.cmp_entry(page.entries.last().unwrap()) != std::cmp::Ordering::Less {
                if page.child_tail_page > INVALID_PAGE_NUMBER {
                    page.child_tail_page
                } else {
                    page.entries.last().unwrap().sub_page
                }
            } else {
                let idx = page
                    .entries
                    .partition_point(|e| e.cmp_entry(entry) != std::cmp::Ordering::Greater);
                page.entries[idx - 1].sub_page
            };
            if child <= INVALID_PAGE_NUMBER {
                return Err(JetError::Corrupt(format!(
                    "index node {} points nowhere",
                    current
                )));
            }
            path.push(current);
            current = child as u32;
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("index descent does not terminate".to_string()));
            }
        }
    }

    /// Locate `entry`'s position: leaf page, index within the leaf (the
    /// insertion point when absent), and whether the match is exact.
    pub fn locate(
        &mut self,
        channel: &mut PageChannel,
        entry: &IndexEntry,
    ) -> Result<(u32, usize, bool), JetError> {
        let (leaf, _) = self.find_leaf(channel, entry)?;
        let page = self.page(leaf);
        let idx = page
            .entries
            .partition_point(|e| e.cmp_entry(entry) == std::cmp::Ordering::Less);
        let exact = idx < page.entries.len()
            && page.entries[idx].cmp_entry(entry) == std::cmp::Ordering::Equal;
        Ok((leaf, idx, exact))
    }

    fn check_writable(&self) -> Result<(), JetError> {
        if self.read_only {
            return Err(JetError::Unsupported(
                "index data went read-only (multiple leaves in the simple variant)".to_string(),
            ));
        }
        Ok(())
    }

    /// Insert an entry per the index policy.
    ///
    /// `enforce_unique` rejects an equal-bytes neighbor unless one side is
    /// the all-null entry pattern in `null_bytes`.
    pub fn insert_entry(
        &mut self,
        channel: &mut PageChannel,
        entry: IndexEntry,
        enforce_unique: bool,
        null_bytes: &[u8],
    ) -> Result<(), JetError> {
        self.check_writable()?;
        let (leaf, idx, exact) = self.locate(channel, &entry)?;
        if exact {
            return Err(JetError::Constraint(format!(
                "index entry for row {:?} already present",
                entry.row_id
            )));
        }

        if enforce_unique && entry.bytes != null_bytes {
            let page = self.page(leaf);
            let equal_neighbor = (idx > 0 && page.entries[idx - 1].bytes == entry.bytes)
                || (idx < page.entries.len() && page.entries[idx].bytes == entry.bytes);
            if equal_neighbor {
                return Err(JetError::Constraint(
                    "uniqueness violation on index insert".to_string(),
                ));
            }
        }

        // a non-root leaf's first entry is mirrored in its parent; moving
        // it would mean rewriting the parent, which this engine does not do
        if leaf != self.root_page && idx == 0 {
            return Err(JetError::Unsupported(
                "insert would change a non-root leaf's first entry".to_string(),
            ));
        }

        {
            let page = self.pages.get_mut(&leaf).unwrap();
            page.entries.insert(idx, entry);
            page.modified = true;
        }
        // fail before keeping the oversize page if it cannot serialize
        let page = self.page(leaf).clone();
        if let Err(e) = write_index_page(&page, channel.format(), self.tdef_page) {
            let page = self.pages.get_mut(&leaf).unwrap();
            page.entries.remove(idx);
            return Err(e);
        }
        self.modification_count += 1;
        Ok(())
    }

    /// Remove an entry.
    ///
    /// When the exact entry is absent (a caller reconstructing keys from a
    /// partial row), falls back to scanning the leaf level for the row id.
    pub fn remove_entry(
        &mut self,
        channel: &mut PageChannel,
        entry: &IndexEntry,
    ) -> Result<bool, JetError> {
        self.check_writable()?;
        let (mut leaf, mut idx, exact) = self.locate(channel, entry)?;
        if !exact {
            match self.scan_for_row_id(channel, entry.row_id)? {
                Some((page, at)) => {
                    leaf = page;
                    idx = at;
                }
                None => return Ok(false),
            }
        }

        let now_empty;
        {
            let page = self.pages.get_mut(&leaf).unwrap();
            if idx == 0 && leaf != self.root_page && page.entries.len() > 1 {
                return Err(JetError::Unsupported(
                    "remove would change a non-root leaf's first entry".to_string(),
                ));
            }
            page.entries.remove(idx);
            page.modified = true;
            now_empty = page.entries.is_empty();
        }
        self.modification_count += 1;

        if now_empty && leaf != self.root_page {
            self.collapse_empty_leaf(channel, leaf)?;
        }
        Ok(true)
    }

    /// Unlink an emptied leaf from its siblings and parent, then hand the
    /// page back to the free pool.
    fn collapse_empty_leaf(&mut self, channel: &mut PageChannel, leaf: u32) -> Result<(), JetError> {
        let (prev, next) = {
            let page = self.page(leaf);
            (page.prev_page, page.next_page)
        };
        if prev > INVALID_PAGE_NUMBER {
            self.load_page(channel, prev as u32)?;
            let p = self.pages.get_mut(&(prev as u32)).unwrap();
            p.next_page = next;
            p.modified = true;
        }
        if next > INVALID_PAGE_NUMBER {
            self.load_page(channel, next as u32)?;
            let p = self.pages.get_mut(&(next as u32)).unwrap();
            p.prev_page = prev;
            p.modified = true;
        }

        // drop the parent's entry for this child
        let parent = self.find_parent(channel, leaf)?;
        if let Some(parent) = parent {
            let p = self.pages.get_mut(&parent).unwrap();
            let before = p.entries.len();
            p.entries.retain(|e| e.sub_page != leaf as i32);
            if p.entries.len() != before {
                p.modified = true;
            }
            if p.child_tail_page == leaf as i32 {
                p.child_tail_page = p
                    .entries
                    .last()
                    .map(|e| e.sub_page)
                    .unwrap_or(INVALID_PAGE_NUMBER);
                p.modified = true;
            }
            if p.entries.is_empty() {
                return Err(JetError::Unsupported(
                    "emptying an index level is not supported".to_string(),
                ));
            }
        }

        self.pages.remove(&leaf);
        channel.deallocate_page(leaf)?;
        debug!("collapsed empty index leaf {}", leaf);
        Ok(())
    }

    /// Find the node referencing `target` as a child.
    fn find_parent(
        &mut self,
        channel: &mut PageChannel,
        target: u32,
    ) -> Result<Option<u32>, JetError> {
        let mut stack = vec![self.root_page];
        let mut guard = channel.page_count() as usize + 1;
        while let Some(page_number) = stack.pop() {
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("index tree loops".to_string()));
            }
            self.load_page(channel, page_number)?;
            let page = self.page(page_number);
            if page.leaf {
                continue;
            }
            if page.child_tail_page == target as i32
                || page.entries.iter().any(|e| e.sub_page == target as i32)
            {
                return Ok(Some(page_number));
            }
            for e in &page.entries {
                if e.sub_page > INVALID_PAGE_NUMBER {
                    stack.push(e.sub_page as u32);
                }
            }
            // the tail pointer usually duplicates the last listed child
            let last_child = page.entries.last().map(|e| e.sub_page);
            if page.child_tail_page > INVALID_PAGE_NUMBER
                && Some(page.child_tail_page) != last_child
            {
                stack.push(page.child_tail_page as u32);
            }
        }
        Ok(None)
    }

    /// Walk the leaf level for `row_id`, left to right.
    fn scan_for_row_id(
        &mut self,
        channel: &mut PageChannel,
        row_id: RowId,
    ) -> Result<Option<(u32, usize)>, JetError> {
        let probe = IndexEntry::new(Vec::new(), RowId::FIRST);
        let (mut leaf, _) = self.find_leaf(channel, &probe)?;
        let mut guard = channel.page_count() as usize + 1;
        loop {
            let page = self.page(leaf);
            if let Some(idx) = page.entries.iter().position(|e| e.row_id == row_id) {
                return Ok(Some((leaf, idx)));
            }
            let next = page.next_page;
            if next <= INVALID_PAGE_NUMBER {
                return Ok(None);
            }
            self.load_page(channel, next as u32)?;
            leaf = next as u32;
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("index leaf chain loops".to_string()));
            }
        }
    }

    /// Flush modified pages.
    pub fn update(&mut self, channel: &mut PageChannel) -> Result<(), JetError> {
        let format = channel.format();
        let dirty: Vec<u32> = self
            .pages
            .iter()
            .filter(|(_, p)| p.modified)
            .map(|(n, _)| *n)
            .collect();
        for page_number in dirty {
            let buf = {
                let page = self.page(page_number);
                write_index_page(page, format, self.tdef_page)?
            };
            channel.write_page(page_number, &buf)?;
            self.pages.get_mut(&page_number).unwrap().modified = false;
        }
        Ok(())
    }

    /// A cursor over the whole index.
    pub fn cursor(&self) -> IndexEntryCursor {
        IndexEntryCursor::new(self.modification_count, None, None)
    }

    /// A cursor bounded by two exclusive entries.
    pub fn cursor_between(
        &self,
        first: Option<IndexEntry>,
        last: Option<IndexEntry>,
    ) -> IndexEntryCursor {
        IndexEntryCursor::new(self.modification_count, first, last)
    }

    fn first_leaf(&mut self, channel: &mut PageChannel) -> Result<u32, JetError> {
        let probe = IndexEntry::new(Vec::new(), RowId::FIRST);
        Ok(self.find_leaf(channel, &probe)?.0)
    }

    fn last_leaf(&mut self, channel: &mut PageChannel) -> Result<u32, JetError> {
        self.initialize(channel)?;
        let mut current = self.root_page;
        let mut guard = channel.page_count() as usize + 1;
        loop {
            self.load_page(channel, current)?;
            let page = self.page(current);
            if page.leaf {
                return Ok(current);
            }
            let child = if page.child_tail_page > INVALID_PAGE_NUMBER {
                page.child_tail_page
            } else {
                page.entries
                    .last()
                    .map(|e| e.sub_page)
                    .unwrap_or(INVALID_PAGE_NUMBER)
            };
            if child <= INVALID_PAGE_NUMBER {
                return Err(JetError::Corrupt(format!(
                    "index node {} points nowhere",
                    current
                )));
            }
            current = child as u32;
            guard -= 1;
            if guard == 0 {
                return Err(JetError::Corrupt("index descent does not terminate".to_string()));
            }
        }
    }
}

/// Position of an entry cursor.
#[derive(Debug, Clone, PartialEq)]
enum EntryPos {
    BeforeFirst,
    AfterLast,
    /// On (or logically just before, when `between`) the entry at `idx`.
    At {
        page: u32,
        idx: usize,
        entry: IndexEntry,
        between: bool,
    },
}

/// An ordered stream over the leaf entries of one [`IndexData`], between
/// two exclusive bounds.
///
/// The cursor stores the entry value alongside its location; when the
/// index's modification counter moves, the next operation re-locates that
/// value against the current tree. A missed search sets the *between*
/// flag: the recorded index is the insertion point, so a forward move
/// returns the entry at that index and a backward move the one before it.
#[derive(Debug, Clone)]
pub struct IndexEntryCursor {
    first_bound: Option<IndexEntry>,
    last_bound: Option<IndexEntry>,
    current: EntryPos,
    previous: EntryPos,
    modification_count: u32,
}

/// A reusable snapshot of a cursor's position pair.
#[derive(Debug, Clone)]
pub struct EntryCursorState {
    current: EntryPos,
    previous: EntryPos,
}

impl IndexEntryCursor {
    fn new(
        modification_count: u32,
        first_bound: Option<IndexEntry>,
        last_bound: Option<IndexEntry>,
    ) -> Self {
        IndexEntryCursor {
            first_bound,
            last_bound,
            current: EntryPos::BeforeFirst,
            previous: EntryPos::BeforeFirst,
            modification_count,
        }
    }

    /// Reset ahead of the first entry.
    pub fn before_first(&mut self) {
        self.current = EntryPos::BeforeFirst;
        self.previous = EntryPos::BeforeFirst;
    }

    /// Reset past the last entry.
    pub fn after_last(&mut self) {
        self.current = EntryPos::AfterLast;
        self.previous = EntryPos::AfterLast;
    }

    /// Row id of the entry the cursor is on, if it is on one.
    pub fn current_row_id(&self) -> Option<RowId> {
        match &self.current {
            EntryPos::At { entry, between, .. } if !between => Some(entry.row_id),
            _ => None,
        }
    }

    /// Capture the position pair for a later [`IndexEntryCursor::restore`].
    pub fn save(&self) -> EntryCursorState {
        EntryCursorState {
            current: self.current.clone(),
            previous: self.previous.clone(),
        }
    }

    /// Re-adopt a saved position pair.
    pub fn restore(&mut self, state: EntryCursorState) {
        self.current = state.current;
        self.previous = state.previous;
    }

    /// Position so the next forward move returns the first entry at or
    /// after `entry`.
    pub fn before_entry(
        &mut self,
        index: &mut IndexData,
        channel: &mut PageChannel,
        entry: &IndexEntry,
    ) -> Result<(), JetError> {
        let (page, idx, _) = index.locate(channel, entry)?;
        self.modification_count = index.modification_count();
        self.previous = self.current.clone();
        self.current = EntryPos::At {
            page,
            idx,
            entry: entry.clone(),
            between: true,
        };
        Ok(())
    }

    fn realign(
        &mut self,
        index: &mut IndexData,
        channel: &mut PageChannel,
    ) -> Result<(), JetError> {
        if self.modification_count == index.modification_count() {
            return Ok(());
        }
        for pos in [&mut self.current, &mut self.previous] {
            if let EntryPos::At { entry, .. } = pos {
                let target = entry.clone();
                let (page, idx, exact) = index.locate(channel, &target)?;
                *pos = EntryPos::At {
                    page,
                    idx,
                    entry: target,
                    between: !exact,
                };
            }
        }
        self.modification_count = index.modification_count();
        Ok(())
    }

    /// True when `entry` has passed the upper bound (forward stop).
    fn past_last_bound(&self, entry: &IndexEntry) -> bool {
        match &self.last_bound {
            Some(last) => entry.cmp_entry(last) != std::cmp::Ordering::Less,
            None => false,
        }
    }

    /// True when `entry` has passed the lower bound (backward stop).
    fn past_first_bound(&self, entry: &IndexEntry) -> bool {
        match &self.first_bound {
            Some(first) => entry.cmp_entry(first) != std::cmp::Ordering::Greater,
            None => false,
        }
    }

    /// Advance and return the next entry, or `None` at the end.
    pub fn next_entry(
        &mut self,
        index: &mut IndexData,
        channel: &mut PageChannel,
    ) -> Result<Option<IndexEntry>, JetError> {
        self.realign(index, channel)?;
        index.initialize(channel)?;

        let (mut page, mut idx) = match &self.current {
            EntryPos::AfterLast => return Ok(None),
            EntryPos::BeforeFirst => match &self.first_bound {
                // the bound's sentinel row id puts the insertion point
                // strictly past every entry at or below it
                Some(bound) => {
                    let (p, i, _) = index.locate(channel, bound)?;
                    (p, i)
                }
                None => (index.first_leaf(channel)?, 0),
            },
            EntryPos::At {
                page, idx, between, ..
            } => {
                // between means the recorded index is the next entry itself
                if *between {
                    (*page, *idx)
                } else {
                    (*page, *idx + 1)
                }
            }
        };

        loop {
            index.load_page(channel, page)?;
            let p = index.page(page);
            if idx < p.entries.len() {
                let entry = p.entries[idx].clone();
                if self.past_last_bound(&entry) {
                    self.previous = self.current.clone();
                    self.current = EntryPos::AfterLast;
                    return Ok(None);
                }
                self.previous = std::mem::replace(
                    &mut self.current,
                    EntryPos::At {
                        page,
                        idx,
                        entry: entry.clone(),
                        between: false,
                    },
                );
                return Ok(Some(entry));
            }
            if p.next_page <= INVALID_PAGE_NUMBER {
                self.previous = self.current.clone();
                self.current = EntryPos::AfterLast;
                return Ok(None);
            }
            page = p.next_page as u32;
            idx = 0;
        }
    }

    /// Step back and return the previous entry, or `None` at the start.
    pub fn previous_entry(
        &mut self,
        index: &mut IndexData,
        channel: &mut PageChannel,
    ) -> Result<Option<IndexEntry>, JetError> {
        self.realign(index, channel)?;
        index.initialize(channel)?;

        let (mut page, mut idx) = match &self.current {
            EntryPos::BeforeFirst => return Ok(None),
            EntryPos::AfterLast => match &self.last_bound {
                Some(bound) => {
                    let (p, i, _) = index.locate(channel, bound)?;
                    (p, i)
                }
                None => {
                    let leaf = index.last_leaf(channel)?;
                    let len = index.page(leaf).entries.len();
                    (leaf, len)
                }
            },
            // between or not, backward moves to the entry before the index
            EntryPos::At { page, idx, .. } => (*page, *idx),
        };

        loop {
            index.load_page(channel, page)?;
            let p = index.page(page);
            if idx > 0 {
                let entry = p.entries[idx - 1].clone();
                if self.past_first_bound(&entry) {
                    self.previous = self.current.clone();
                    self.current = EntryPos::BeforeFirst;
                    return Ok(None);
                }
                self.previous = std::mem::replace(
                    &mut self.current,
                    EntryPos::At {
                        page,
                        idx: idx - 1,
                        entry: entry.clone(),
                        between: false,
                    },
                );
                return Ok(Some(entry));
            }
            if p.prev_page <= INVALID_PAGE_NUMBER {
                self.previous = self.current.clone();
                self.current = EntryPos::BeforeFirst;
                return Ok(None);
            }
            page = p.prev_page as u32;
            idx = index.page(page).entries.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::format::FORMAT_V4;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_channel(pages: usize) -> (NamedTempFile, PageChannel) {
        let format = &FORMAT_V4;
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; pages * format.page_size]).unwrap();
        tmp.flush().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        (tmp, PageChannel::new(file, format, false, false, None).unwrap())
    }

    fn entry(key: &[u8], page: u32, row: u16) -> IndexEntry {
        IndexEntry::new(key.to_vec(), RowId::new(page, row))
    }

    fn fresh_index(channel: &mut PageChannel, variant: IndexVariant) -> IndexData {
        IndexData::create(channel, 0, 10, Vec::new(), variant).unwrap()
    }

    #[test]
    fn test_page_round_trip_with_prefix() {
        let format = &FORMAT_V4;
        let mut page = IndexPage::empty_leaf(5);
        page.entries = vec![
            entry(b"alpha-one", 3, 0),
            entry(b"alpha-two", 3, 1),
            entry(b"alpha-zed", 4, 0),
        ];
        let buf = write_index_page(&page, format, 10).unwrap();
        // shared prefix "alpha-" is stored once
        assert_eq!(LittleEndian::read_u16(&buf[format.offset_index_prefix_len()..]), 6);
        let back = parse_index_page(&buf, format, 5).unwrap();
        assert!(back.leaf);
        assert_eq!(back.entries, page.entries);
    }

    #[test]
    fn test_node_page_round_trip() {
        let format = &FORMAT_V4;
        let mut page = IndexPage::empty_leaf(2);
        page.leaf = false;
        page.child_tail_page = 9;
        let mut first = entry(b"m", 7, 0);
        first.sub_page = 8;
        let mut second = entry(b"t", 7, 5);
        second.sub_page = 9;
        page.entries = vec![first, second];
        let buf = write_index_page(&page, format, 10).unwrap();
        let back = parse_index_page(&buf, format, 2).unwrap();
        assert!(!back.leaf);
        assert_eq!(back.child_tail_page, 9);
        assert_eq!(back.entries[0].sub_page, 8);
        assert_eq!(back.entries[1].sub_page, 9);
    }

    #[test]
    fn test_unsorted_page_is_corrupt() {
        let format = &FORMAT_V4;
        let mut page = IndexPage::empty_leaf(5);
        page.entries = vec![entry(b"b", 3, 0), entry(b"a", 3, 1)];
        let buf = write_index_page(&page, format, 10).unwrap();
        assert!(matches!(
            parse_index_page(&buf, format, 5),
            Err(JetError::Corrupt(_))
        ));
    }

    #[test]
    fn test_insert_keeps_order_and_persists() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"m" as &[u8], 1u16), (b"a", 2), (b"z", 3), (b"f", 4)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        idx.update(&mut ch).unwrap();

        // reload from disk through a fresh object
        let mut again = IndexData::new(0, idx.root_page, 10, Vec::new(), IndexVariant::Paged);
        let mut cur = again.cursor();
        let mut keys = Vec::new();
        while let Some(e) = cur.next_entry(&mut again, &mut ch).unwrap() {
            keys.push(e.bytes);
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"f".to_vec(), b"m".to_vec(), b"z".to_vec()]);
    }

    #[test]
    fn test_duplicate_row_refused() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        idx.insert_entry(&mut ch, entry(b"k", 4, 1), false, &[]).unwrap();
        assert!(matches!(
            idx.insert_entry(&mut ch, entry(b"k", 4, 1), false, &[]),
            Err(JetError::Constraint(_))
        ));
    }

    #[test]
    fn test_uniqueness_violation() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        idx.insert_entry(&mut ch, entry(b"k", 4, 1), true, &[0x00]).unwrap();
        // same bytes, different row
        assert!(matches!(
            idx.insert_entry(&mut ch, entry(b"k", 4, 2), true, &[0x00]),
            Err(JetError::Constraint(_))
        ));
        // null entries are exempt
        idx.insert_entry(&mut ch, entry(&[0x00], 4, 3), true, &[0x00]).unwrap();
        idx.insert_entry(&mut ch, entry(&[0x00], 4, 4), true, &[0x00]).unwrap();
    }

    #[test]
    fn test_remove_by_row_id_fallback() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        idx.insert_entry(&mut ch, entry(b"a", 4, 1), false, &[]).unwrap();
        idx.insert_entry(&mut ch, entry(b"b", 4, 2), false, &[]).unwrap();
        // wrong bytes, right row id
        let removed = idx
            .remove_entry(&mut ch, &entry(b"zzz", 4, 2))
            .unwrap();
        assert!(removed);
        let mut cur = idx.cursor();
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"a".to_vec());
        assert!(cur.next_entry(&mut idx, &mut ch).unwrap().is_none());
    }

    #[test]
    fn test_cursor_bounds_are_exclusive() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"a" as &[u8], 1u16), (b"b", 2), (b"c", 3), (b"d", 4)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        // (a..d): "first above a with any row id", "below d entirely"
        let first = IndexEntry {
            bytes: b"a".to_vec(),
            row_id: RowId::LAST,
            sub_page: INVALID_PAGE_NUMBER,
        };
        let last = IndexEntry {
            bytes: b"d".to_vec(),
            row_id: RowId::FIRST,
            sub_page: INVALID_PAGE_NUMBER,
        };
        let mut cur = idx.cursor_between(Some(first), Some(last));
        let mut keys = Vec::new();
        while let Some(e) = cur.next_entry(&mut idx, &mut ch).unwrap() {
            keys.push(e.bytes);
        }
        assert_eq!(keys, vec![b"b".to_vec(), b"c".to_vec()]);
    }

    #[test]
    fn test_cursor_reverse_traversal() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"a" as &[u8], 1u16), (b"b", 2), (b"c", 3)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        let mut cur = idx.cursor();
        cur.after_last();
        let mut keys = Vec::new();
        while let Some(e) = cur.previous_entry(&mut idx, &mut ch).unwrap() {
            keys.push(e.bytes);
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn test_before_entry_lands_on_first_at_or_after() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"a" as &[u8], 1u16), (b"c", 2), (b"e", 3)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        let mut cur = idx.cursor();
        // miss: lands between, forward returns the insertion-point entry
        cur.before_entry(&mut idx, &mut ch, &entry(b"b", 0, 0)).unwrap();
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"c".to_vec());
        // and backward from the between position returns the one before
        cur.before_entry(&mut idx, &mut ch, &entry(b"b", 0, 0)).unwrap();
        let got = cur.previous_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"a".to_vec());
    }

    #[test]
    fn test_cursor_realigns_after_mutation() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"b" as &[u8], 1u16), (b"d", 2)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        let mut cur = idx.cursor();
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"b".to_vec());

        // concurrent insert ahead of the cursor
        idx.insert_entry(&mut ch, entry(b"c", 4, 3), false, &[]).unwrap();
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"c".to_vec());
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"d".to_vec());

        // removal of the current entry realigns to the between position
        idx.remove_entry(&mut ch, &entry(b"d", 4, 2)).unwrap();
        assert!(cur.next_entry(&mut idx, &mut ch).unwrap().is_none());
    }

    #[test]
    fn test_savepoint_restore() {
        let (_tmp, mut ch) = test_channel(2);
        let mut idx = fresh_index(&mut ch, IndexVariant::Paged);
        for (key, row) in [(b"a" as &[u8], 1u16), (b"b", 2), (b"c", 3)] {
            idx.insert_entry(&mut ch, entry(key, 4, row), false, &[]).unwrap();
        }
        let mut cur = idx.cursor();
        cur.next_entry(&mut idx, &mut ch).unwrap();
        let saved = cur.save();
        cur.next_entry(&mut idx, &mut ch).unwrap();
        cur.next_entry(&mut idx, &mut ch).unwrap();
        cur.restore(saved);
        let got = cur.next_entry(&mut idx, &mut ch).unwrap().unwrap();
        assert_eq!(got.bytes, b"b".to_vec());
    }

    /// Build a two-leaf tree by hand: a node root over two sibling leaves.
    fn build_two_leaf_tree(channel: &mut PageChannel) -> u32 {
        let format = &FORMAT_V4;
        let root = channel.allocate_page().unwrap();
        let left = channel.allocate_page().unwrap();
        let right = channel.allocate_page().unwrap();

        let mut left_page = IndexPage::empty_leaf(left);
        left_page.entries = vec![entry(b"a", 4, 1), entry(b"b", 4, 2)];
        left_page.next_page = right as i32;
        let mut right_page = IndexPage::empty_leaf(right);
        right_page.entries = vec![entry(b"m", 4, 3), entry(b"z", 4, 4)];
        right_page.prev_page = left as i32;

        let mut root_page = IndexPage::empty_leaf(root);
        root_page.leaf = false;
        root_page.child_tail_page = right as i32;
        let mut e_left = entry(b"a", 4, 1);
        e_left.sub_page = left as i32;
        let mut e_right = entry(b"m", 4, 3);
        e_right.sub_page = right as i32;
        root_page.entries = vec![e_left, e_right];

        for (n, p) in [(left, &left_page), (right, &right_page), (root, &root_page)] {
            let buf = write_index_page(p, format, 10).unwrap();
            channel.write_page(n, &buf).unwrap();
        }
        root
    }

    #[test]
    fn test_paged_reads_multi_level_tree() {
        let (_tmp, mut ch) = test_channel(2);
        let root = build_two_leaf_tree(&mut ch);
        let mut idx = IndexData::new(0, root, 10, Vec::new(), IndexVariant::Paged);
        let mut cur = idx.cursor();
        let mut keys = Vec::new();
        while let Some(e) = cur.next_entry(&mut idx, &mut ch).unwrap() {
            keys.push(e.bytes);
        }
        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"b".to_vec(), b"m".to_vec(), b"z".to_vec()]
        );
    }

    #[test]
    fn test_simple_goes_read_only_on_multiple_leaves() {
        let (_tmp, mut ch) = test_channel(2);
        let root = build_two_leaf_tree(&mut ch);
        let mut idx = IndexData::new(0, root, 10, Vec::new(), IndexVariant::Simple);
        idx.initialize(&mut ch).unwrap();
        assert!(idx.is_read_only());

        // reads still see every entry
        let mut cur = idx.cursor();
        let mut count = 0;
        while cur.next_entry(&mut idx, &mut ch).unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 4);

        // writes are refused
        assert!(matches!(
            idx.insert_entry(&mut ch, entry(b"q", 4, 9), false, &[]),
            Err(JetError::Unsupported(_))
        ));
    }

    #[test]
    fn test_emptied_leaf_collapses_out_of_the_tree() {
        let (_tmp, mut ch) = test_channel(2);
        let root = build_two_leaf_tree(&mut ch);
        let mut idx = IndexData::new(0, root, 10, Vec::new(), IndexVariant::Paged);

        // drain the right leaf back to front
        assert!(idx.remove_entry(&mut ch, &entry(b"z", 4, 4)).unwrap());
        assert!(idx.remove_entry(&mut ch, &entry(b"m", 4, 3)).unwrap());
        idx.update(&mut ch).unwrap();

        // the left leaf is unlinked from its dead sibling
        let mut cur = idx.cursor();
        let mut keys = Vec::new();
        while let Some(e) = cur.next_entry(&mut idx, &mut ch).unwrap() {
            keys.push(e.bytes);
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec()]);

        // the freed page carries the deallocated marker
        let right = root + 2;
        let mut buf = ch.new_page_buffer();
        ch.read_page(right, &mut buf).unwrap();
        assert_eq!(&buf[..4], &DEALLOCATED_MARKER);
    }

    #[test]
    fn test_insert_at_non_root_leaf_head_unsupported() {
        let (_tmp, mut ch) = test_channel(2);
        let root = build_two_leaf_tree(&mut ch);
        let mut idx = IndexData::new(0, root, 10, Vec::new(), IndexVariant::Paged);
        // "1" belongs at the head of the left leaf (before "a"), which
        // would invalidate the parent's first-key copy
        assert!(matches!(
            idx.insert_entry(&mut ch, entry(b"1", 4, 9), false, &[]),
            Err(JetError::Unsupported(_))
        ));
        // mid-leaf inserts work fine
        idx.insert_entry(&mut ch, entry(b"k", 4, 8), false, &[]).unwrap();
        idx.insert_entry(&mut ch, entry(b"p", 4, 9), false, &[]).unwrap();
    }
}
