//! Memo/OLE long value storage.
//!
//! Values of the long value types are represented in the row by a 12-byte
//! pointer: a length word carrying two flag bits, a row id, and a reserved
//! word. Three storage shapes exist, and the writer always picks the
//! smallest that fits:
//!
//! - values up to 64 bytes follow the pointer inline,
//! - larger values that fit one page occupy a single row on a long-value
//!   page,
//! - anything bigger is chained: each long-value row begins with the row id
//!   of the next chunk, and the reader concatenates until the terminating
//!   null pointer.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;

use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::jet::page::PageChannel;
use crate::jet::row::{self, RowId};
use crate::jet::usage_map::UsageMap;
use crate::JetError;

/// Size of the pointer ahead of every long value.
pub const LONG_VALUE_HEADER_SIZE: usize = 12;

fn encode_row_id_word(row_id: RowId) -> u32 {
    ((row_id.page as u32) << 8) | (row_id.row as u32 & 0xFF)
}

fn decode_row_id_word(word: u32) -> RowId {
    RowId::new(word >> 8, (word & 0xFF) as u16)
}

/// Bytes a single long-value row can carry in a chain (the first word of
/// the row is the next-chunk pointer).
fn chain_chunk_capacity(format: &JetFormat) -> usize {
    format.max_row_size - 4
}

fn stamp_long_value_page(channel: &mut PageChannel, tdef_page: u32) -> Result<(u32, Vec<u8>), JetError> {
    let page_number = channel.allocate_page()?;
    let mut buf = channel.new_page_buffer();
    row::stamp_data_page(&mut buf, channel.format(), PAGE_TYPE_LONG_VALUE, tdef_page);
    Ok((page_number, buf))
}

/// Store a long value, returning the bytes to place in the row's variable
/// area (the 12-byte pointer, plus the value itself when inlined).
///
/// Pages allocated for the value are added to the table's owned-pages map.
pub fn write_long_value(
    channel: &mut PageChannel,
    owned_pages: &mut UsageMap,
    tdef_page: u32,
    bytes: &[u8],
) -> Result<Vec<u8>, JetError> {
    let format = channel.format();
    let len = bytes.len() as u32;
    if len & !LONG_VALUE_LENGTH_MASK != 0 {
        return Err(JetError::Argument(format!(
            "long value of {} bytes exceeds the representable length",
            bytes.len()
        )));
    }

    let mut out = Vec::with_capacity(LONG_VALUE_HEADER_SIZE + bytes.len().min(64));

    if bytes.len() <= LONG_VALUE_MAX_INLINE {
        let mut hdr = [0u8; LONG_VALUE_HEADER_SIZE];
        LittleEndian::write_u32(&mut hdr[0..], len | LONG_VALUE_INLINE);
        out.extend_from_slice(&hdr);
        out.extend_from_slice(bytes);
        return Ok(out);
    }

    if bytes.len() <= format.max_row_size {
        let (page_number, mut buf) = stamp_long_value_page(channel, tdef_page)?;
        let row_number = row::add_row(&mut buf, format, bytes)?;
        channel.write_page(page_number, &buf)?;
        owned_pages.add_page(channel, page_number)?;

        let mut hdr = [0u8; LONG_VALUE_HEADER_SIZE];
        LittleEndian::write_u32(&mut hdr[0..], len | LONG_VALUE_SINGLE_PAGE);
        LittleEndian::write_u32(
            &mut hdr[4..],
            encode_row_id_word(RowId::new(page_number, row_number)),
        );
        out.extend_from_slice(&hdr);
        return Ok(out);
    }

    // chained: write chunks back to front so each knows its successor
    let capacity = chain_chunk_capacity(format);
    let chunks: Vec<&[u8]> = bytes.chunks(capacity).collect();
    let mut next = RowId::new(0, 0); // null pointer word
    let mut next_word = 0u32;
    for chunk in chunks.iter().rev() {
        let (page_number, mut buf) = stamp_long_value_page(channel, tdef_page)?;
        let mut row_bytes = Vec::with_capacity(4 + chunk.len());
        let mut w = [0u8; 4];
        LittleEndian::write_u32(&mut w, next_word);
        row_bytes.extend_from_slice(&w);
        row_bytes.extend_from_slice(chunk);
        let row_number = row::add_row(&mut buf, format, &row_bytes)?;
        channel.write_page(page_number, &buf)?;
        owned_pages.add_page(channel, page_number)?;
        next = RowId::new(page_number, row_number);
        next_word = encode_row_id_word(next);
    }
    debug!("wrote {}-byte long value chain starting at {:?}", len, next);

    let mut hdr = [0u8; LONG_VALUE_HEADER_SIZE];
    LittleEndian::write_u32(&mut hdr[0..], len);
    LittleEndian::write_u32(&mut hdr[4..], next_word);
    out.extend_from_slice(&hdr);
    Ok(out)
}

/// Resolve a long value from the bytes stored in the row's variable area.
pub fn read_long_value(channel: &mut PageChannel, col_bytes: &[u8]) -> Result<Vec<u8>, JetError> {
    if col_bytes.len() < LONG_VALUE_HEADER_SIZE {
        return Err(JetError::Corrupt(format!(
            "long value pointer of {} bytes",
            col_bytes.len()
        )));
    }
    let word0 = LittleEndian::read_u32(&col_bytes[0..]);
    let len = (word0 & LONG_VALUE_LENGTH_MASK) as usize;

    if word0 & LONG_VALUE_INLINE != 0 {
        let inline = &col_bytes[LONG_VALUE_HEADER_SIZE..];
        if inline.len() < len {
            return Err(JetError::Corrupt(format!(
                "inline long value holds {} of {} bytes",
                inline.len(),
                len
            )));
        }
        return Ok(inline[..len].to_vec());
    }

    let format = channel.format();
    let row_id = decode_row_id_word(LittleEndian::read_u32(&col_bytes[4..]));
    let mut buf = channel.new_page_buffer();

    if word0 & LONG_VALUE_SINGLE_PAGE != 0 {
        channel.read_page(row_id.page as u32, &mut buf)?;
        check_long_value_page(&buf)?;
        let (start, end) = row::row_region(&buf, format, row_id.row as u16)?;
        if end - start < len {
            return Err(JetError::Corrupt(format!(
                "long value row holds {} of {} bytes",
                end - start,
                len
            )));
        }
        return Ok(buf[start..start + len].to_vec());
    }

    // chain; bound the walk by the page count so a pointer loop cannot spin
    let mut out = Vec::with_capacity(len);
    let mut current = row_id;
    let max_chunks = channel.page_count() as usize + 1;
    for _ in 0..max_chunks {
        channel.read_page(current.page as u32, &mut buf)?;
        check_long_value_page(&buf)?;
        let (start, end) = row::row_region(&buf, format, current.row as u16)?;
        if end - start < 4 {
            return Err(JetError::Corrupt("short long value chunk".to_string()));
        }
        let next_word = LittleEndian::read_u32(&buf[start..]);
        let take = (len - out.len()).min(end - start - 4);
        out.extend_from_slice(&buf[start + 4..start + 4 + take]);
        if out.len() >= len {
            return Ok(out);
        }
        if next_word == 0 {
            return Err(JetError::Corrupt(format!(
                "long value chain ended after {} of {} bytes",
                out.len(),
                len
            )));
        }
        current = decode_row_id_word(next_word);
    }
    Err(JetError::Corrupt("long value chain does not terminate".to_string()))
}

fn check_long_value_page(buf: &[u8]) -> Result<(), JetError> {
    if buf[0] != PAGE_TYPE_LONG_VALUE {
        return Err(JetError::Corrupt(format!(
            "expected a long value page, found type 0x{:02X}",
            buf[0]
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::format::FORMAT_V4;
    use crate::jet::usage_map::UsageMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn test_channel() -> (NamedTempFile, PageChannel, UsageMap) {
        let format = &FORMAT_V4;
        let mut tmp = NamedTempFile::new().unwrap();
        // page 0 unused, page 1 holds the map row
        tmp.write_all(&vec![0u8; 2 * format.page_size]).unwrap();
        tmp.flush().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let mut channel = PageChannel::new(file, format, false, false, None).unwrap();

        let mut buf = channel.new_page_buffer();
        row::stamp_data_page(&mut buf, format, PAGE_TYPE_DATA, 0);
        let map_row = UsageMap::new_inline_row(format, 0, false);
        row::add_row(&mut buf, format, &map_row).unwrap();
        channel.write_page(1, &buf).unwrap();
        let map = UsageMap::read(&mut channel, crate::jet::usage_map::UsageMapRef::new(1, 0), false)
            .unwrap();
        (tmp, channel, map)
    }

    #[test]
    fn test_inline_round_trip() {
        let (_tmp, mut ch, mut owned) = test_channel();
        let value = vec![0x5A; 64];
        let col = write_long_value(&mut ch, &mut owned, 0, &value).unwrap();
        assert_eq!(col.len(), LONG_VALUE_HEADER_SIZE + 64);
        assert_eq!(read_long_value(&mut ch, &col).unwrap(), value);
        // no pages were allocated
        assert_eq!(ch.page_count(), 2);
    }

    #[test]
    fn test_single_page_round_trip() {
        let (_tmp, mut ch, mut owned) = test_channel();
        let value: Vec<u8> = (0..500u32).map(|i| (i % 251) as u8).collect();
        let col = write_long_value(&mut ch, &mut owned, 7, &value).unwrap();
        assert_eq!(col.len(), LONG_VALUE_HEADER_SIZE);
        assert_eq!(ch.page_count(), 3);
        assert!(owned.contains(2));
        assert_eq!(read_long_value(&mut ch, &col).unwrap(), value);
    }

    #[test]
    fn test_chained_round_trip() {
        let (_tmp, mut ch, mut owned) = test_channel();
        let len = FORMAT_V4.max_row_size * 2 + 100;
        let value: Vec<u8> = (0..len as u32).map(|i| (i % 249) as u8).collect();
        let col = write_long_value(&mut ch, &mut owned, 7, &value).unwrap();
        assert_eq!(col.len(), LONG_VALUE_HEADER_SIZE);
        // three chunks, three pages
        assert_eq!(ch.page_count(), 5);
        assert_eq!(read_long_value(&mut ch, &col).unwrap(), value);
    }

    #[test]
    fn test_wrong_page_type_is_corrupt() {
        let (_tmp, mut ch, mut owned) = test_channel();
        let value = vec![1u8; 500];
        let col = write_long_value(&mut ch, &mut owned, 0, &value).unwrap();
        // clobber the long value page's type byte
        let mut buf = ch.new_page_buffer();
        ch.read_page(2, &mut buf).unwrap();
        buf[0] = PAGE_TYPE_DATA;
        ch.write_page(2, &buf).unwrap();
        assert!(matches!(
            read_long_value(&mut ch, &col),
            Err(JetError::Corrupt(_))
        ));
    }
}
