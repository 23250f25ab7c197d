//! Fixed-size page I/O over the database file.
//!
//! [`PageChannel`] is the single point every byte passes through: it reads
//! pages into caller-provided buffers, writes whole pages or sub-ranges,
//! grows the file one page at a time, and stamps deallocated pages with the
//! invalid marker. Writes honor the `auto_sync` policy chosen at open time:
//! either every write is flushed before returning, or flushing is deferred
//! to [`PageChannel::flush`] / [`PageChannel::close`].
//!
//! A channel refuses to write past the format's maximum database size and
//! reports [`JetError::DatabaseFull`] before any bytes are emitted.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use log::debug;

use crate::jet::constants::*;
use crate::jet::format::JetFormat;
use crate::jet::usage_map::UsageMap;
use crate::JetError;

/// Per-page transform applied between the file and the engine.
///
/// The default database configuration installs no codec; encrypted files
/// supply one through the database's codec provider.
pub trait PageCodec {
    /// Decode a page just read from the file, in place.
    fn decode_page(&self, page: &mut [u8], page_number: u32) -> Result<(), JetError>;
    /// Encode a page about to be written to the file, in place.
    fn encode_page(&self, page: &mut [u8], page_number: u32) -> Result<(), JetError>;
}

/// Channel for fixed-size page reads and writes.
pub struct PageChannel {
    file: Option<File>,
    format: &'static JetFormat,
    page_count: u32,
    auto_sync: bool,
    read_only: bool,
    codec: Option<Box<dyn PageCodec>>,
    /// Free-page pool consulted by allocation and fed by deallocation.
    /// Installed once the database's global usage map row is readable.
    global_free: Option<UsageMap>,
}

impl PageChannel {
    /// Wrap an open file whose length is already a whole number of pages.
    pub fn new(
        file: File,
        format: &'static JetFormat,
        auto_sync: bool,
        read_only: bool,
        codec: Option<Box<dyn PageCodec>>,
    ) -> Result<Self, JetError> {
        let file_size = file
            .metadata()
            .map_err(|e| JetError::Io(format!("Cannot stat database file: {}", e)))?
            .len();

        if file_size % format.page_size as u64 != 0 {
            return Err(JetError::Corrupt(format!(
                "file length {} is not a multiple of the page size {}",
                file_size, format.page_size
            )));
        }

        Ok(PageChannel {
            file: Some(file),
            format,
            page_count: (file_size / format.page_size as u64) as u32,
            auto_sync,
            read_only: read_only || format.read_only,
            codec,
            global_free: None,
        })
    }

    /// Install the database's global free-page map. Until this is called,
    /// allocation always extends the file and deallocation only stamps the
    /// invalid marker.
    pub fn set_global_free_map(&mut self, map: UsageMap) {
        self.global_free = Some(map);
    }

    /// The format this channel was opened with.
    pub fn format(&self) -> &'static JetFormat {
        self.format
    }

    /// Page size in bytes.
    pub fn page_size(&self) -> usize {
        self.format.page_size
    }

    /// Number of pages currently in the file.
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// True when every write is refused.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// A fresh zeroed buffer of one page.
    pub fn new_page_buffer(&self) -> Vec<u8> {
        vec![0u8; self.format.page_size]
    }

    fn file_mut(&mut self) -> Result<&mut File, JetError> {
        self.file.as_mut().ok_or(JetError::Closed)
    }

    fn check_page_number(&self, page_number: u32) -> Result<(), JetError> {
        if page_number as i32 <= INVALID_PAGE_NUMBER || page_number >= self.page_count {
            return Err(JetError::Argument(format!(
                "page {} out of range (database has {} pages)",
                page_number, self.page_count
            )));
        }
        Ok(())
    }

    fn check_writable(&self) -> Result<(), JetError> {
        if self.file.is_none() {
            return Err(JetError::Closed);
        }
        if self.read_only {
            return Err(JetError::Unsupported("read-only format".to_string()));
        }
        Ok(())
    }

    /// Read page `page_number` into `buf` (must be exactly one page long).
    pub fn read_page(&mut self, page_number: u32, buf: &mut [u8]) -> Result<(), JetError> {
        self.check_page_number(page_number)?;
        let page_size = self.format.page_size;
        if buf.len() != page_size {
            return Err(JetError::Argument(format!(
                "page buffer is {} bytes, expected {}",
                buf.len(),
                page_size
            )));
        }

        let offset = page_number as u64 * page_size as u64;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| JetError::Io(format!("Cannot seek to page {}: {}", page_number, e)))?;
        file.read_exact(buf)
            .map_err(|e| JetError::Io(format!("Cannot read page {}: {}", page_number, e)))?;

        if let Some(codec) = &self.codec {
            codec.decode_page(buf, page_number)?;
        }
        Ok(())
    }

    /// Write a whole page.
    pub fn write_page(&mut self, page_number: u32, buf: &[u8]) -> Result<(), JetError> {
        self.write_page_at(page_number, 0, buf)
    }

    /// Write `buf` at `offset` within page `page_number`.
    ///
    /// Sub-page writes bypass the page codec; callers that installed a
    /// codec must write whole pages.
    pub fn write_page_at(
        &mut self,
        page_number: u32,
        offset: usize,
        buf: &[u8],
    ) -> Result<(), JetError> {
        self.check_writable()?;
        self.check_page_number(page_number)?;
        let page_size = self.format.page_size;
        if offset + buf.len() > page_size {
            return Err(JetError::Argument(format!(
                "write of {} bytes at offset {} exceeds the page size",
                buf.len(),
                offset
            )));
        }

        let end = page_number as u64 * page_size as u64 + (offset + buf.len()) as u64;
        if end > self.format.max_database_size {
            return Err(JetError::DatabaseFull(format!(
                "write past the {}-byte maximum",
                self.format.max_database_size
            )));
        }

        let encoded;
        let data: &[u8] = if offset == 0 && buf.len() == page_size {
            if let Some(codec) = &self.codec {
                let mut tmp = buf.to_vec();
                codec.encode_page(&mut tmp, page_number)?;
                encoded = tmp;
                &encoded
            } else {
                buf
            }
        } else {
            if self.codec.is_some() {
                return Err(JetError::Argument(
                    "sub-page writes are not valid with a page codec installed".to_string(),
                ));
            }
            buf
        };

        let file_offset = page_number as u64 * page_size as u64 + offset as u64;
        let auto_sync = self.auto_sync;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(file_offset))
            .map_err(|e| JetError::Io(format!("Cannot seek to page {}: {}", page_number, e)))?;
        file.write_all(data)
            .map_err(|e| JetError::Io(format!("Cannot write page {}: {}", page_number, e)))?;
        if auto_sync {
            file.sync_data()
                .map_err(|e| JetError::Io(format!("Cannot sync page {}: {}", page_number, e)))?;
        }
        Ok(())
    }

    /// Allocate a page: reuse one from the global free-page pool when
    /// possible, otherwise extend the file by one page. Returns the page
    /// number; the contents are undefined until the caller stamps them.
    ///
    /// The extension writes a single byte at the end of the new page so the
    /// file actually grows.
    pub fn allocate_page(&mut self) -> Result<u32, JetError> {
        self.check_writable()?;
        if let Some(mut map) = self.global_free.take() {
            let reusable = map
                .pages()
                .into_iter()
                .find(|&p| p > PAGE_SYSTEM_CATALOG && p < self.page_count);
            let result = match reusable {
                Some(page) => map.remove_page(self, page).map(|_| Some(page)),
                None => Ok(None),
            };
            self.global_free = Some(map);
            if let Some(page) = result? {
                debug!("reused free page {}", page);
                return Ok(page);
            }
        }
        let page_size = self.format.page_size;
        let new_number = self.page_count;
        let new_end = (new_number as u64 + 1) * page_size as u64;
        if new_end > self.format.max_database_size {
            return Err(JetError::DatabaseFull(format!(
                "cannot grow past the {}-byte maximum",
                self.format.max_database_size
            )));
        }

        let auto_sync = self.auto_sync;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(new_end - 1))
            .map_err(|e| JetError::Io(format!("Cannot seek for page allocation: {}", e)))?;
        file.write_all(&[0u8])
            .map_err(|e| JetError::Io(format!("Cannot extend file: {}", e)))?;
        if auto_sync {
            file.sync_data()
                .map_err(|e| JetError::Io(format!("Cannot sync extension: {}", e)))?;
        }

        self.page_count += 1;
        debug!("allocated page {}", new_number);
        Ok(new_number)
    }

    /// Overwrite the head of a page with the deallocated marker.
    ///
    /// Most callers want [`PageChannel::deallocate_page`], which also
    /// returns the page to the global free map.
    pub fn invalidate_page(&mut self, page_number: u32) -> Result<(), JetError> {
        self.write_page_at(page_number, 0, &DEALLOCATED_MARKER)
    }

    /// Deallocate a page: stamp the invalid marker and hand the page back
    /// to the global free-page pool.
    pub fn deallocate_page(&mut self, page_number: u32) -> Result<(), JetError> {
        self.invalidate_page(page_number)?;
        if let Some(mut map) = self.global_free.take() {
            let result = map.add_page(self, page_number);
            self.global_free = Some(map);
            result?;
        }
        debug!("deallocated page {}", page_number);
        Ok(())
    }

    /// Force all outstanding writes to disk.
    pub fn flush(&mut self) -> Result<(), JetError> {
        self.file_mut()?
            .sync_all()
            .map_err(|e| JetError::Io(format!("Cannot flush database file: {}", e)))
    }

    /// Flush and release the underlying file. Further operations return
    /// [`JetError::Closed`].
    pub fn close(&mut self) -> Result<(), JetError> {
        if self.file.is_some() {
            // a read-only channel has nothing to flush
            if !self.read_only {
                self.flush()?;
            }
            self.file = None;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::format::{FORMAT_V3, FORMAT_V4};
    use std::io::Write as IoWrite;
    use tempfile::NamedTempFile;

    fn open_channel(pages: usize, format: &'static JetFormat) -> (NamedTempFile, PageChannel) {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&vec![0u8; pages * format.page_size]).unwrap();
        tmp.flush().unwrap();
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(tmp.path())
            .unwrap();
        let channel = PageChannel::new(file, format, true, false, None).unwrap();
        (tmp, channel)
    }

    #[test]
    fn test_rejects_partial_page_file() {
        let mut tmp = NamedTempFile::new().unwrap();
        tmp.write_all(&[0u8; 100]).unwrap();
        tmp.flush().unwrap();
        let file = File::open(tmp.path()).unwrap();
        assert!(matches!(
            PageChannel::new(file, &FORMAT_V4, true, true, None),
            Err(JetError::Corrupt(_))
        ));
    }

    #[test]
    fn test_write_read_round_trip() {
        let (_tmp, mut ch) = open_channel(3, &FORMAT_V4);
        let mut page = ch.new_page_buffer();
        page[0] = PAGE_TYPE_DATA;
        page[100] = 0xAB;
        ch.write_page(1, &page).unwrap();

        let mut back = ch.new_page_buffer();
        ch.read_page(1, &mut back).unwrap();
        assert_eq!(back, page);
    }

    #[test]
    fn test_read_out_of_range() {
        let (_tmp, mut ch) = open_channel(2, &FORMAT_V4);
        let mut buf = ch.new_page_buffer();
        assert!(ch.read_page(5, &mut buf).is_err());
    }

    #[test]
    fn test_allocate_extends_file() {
        let (tmp, mut ch) = open_channel(2, &FORMAT_V4);
        let new_page = ch.allocate_page().unwrap();
        assert_eq!(new_page, 2);
        assert_eq!(ch.page_count(), 3);
        let len = std::fs::metadata(tmp.path()).unwrap().len();
        assert_eq!(len, 3 * FORMAT_V4.page_size as u64);
    }

    #[test]
    fn test_sub_page_write() {
        let (_tmp, mut ch) = open_channel(2, &FORMAT_V4);
        ch.write_page_at(1, 10, &[1, 2, 3]).unwrap();
        let mut buf = ch.new_page_buffer();
        ch.read_page(1, &mut buf).unwrap();
        assert_eq!(&buf[10..13], &[1, 2, 3]);
        assert_eq!(buf[9], 0);
        assert_eq!(buf[13], 0);
    }

    #[test]
    fn test_invalidate_page_stamps_marker() {
        let (_tmp, mut ch) = open_channel(2, &FORMAT_V4);
        let mut page = ch.new_page_buffer();
        page[0] = PAGE_TYPE_DATA;
        page[1] = PAGE_MARKER;
        page[2] = 0x77;
        page[3] = 0x77;
        ch.write_page(1, &page).unwrap();

        ch.invalidate_page(1).unwrap();
        let mut back = ch.new_page_buffer();
        ch.read_page(1, &mut back).unwrap();
        assert_eq!(&back[..4], &DEALLOCATED_MARKER);
        // rest of the page is untouched
        assert_eq!(back[100], page[100]);
    }

    #[test]
    fn test_v3_channel_is_read_only() {
        let (_tmp, mut ch) = open_channel(2, &FORMAT_V3);
        assert!(ch.is_read_only());
        let page = ch.new_page_buffer();
        assert!(matches!(
            ch.write_page(1, &page),
            Err(JetError::Unsupported(_))
        ));
        // reads still work
        let mut buf = ch.new_page_buffer();
        ch.read_page(1, &mut buf).unwrap();
    }

    #[test]
    fn test_deallocate_then_reuse() {
        use crate::jet::row;
        use crate::jet::usage_map::UsageMapRef;

        let (_tmp, mut ch) = open_channel(4, &FORMAT_V4);
        // install a global free map backed by a row on page 1
        let mut buf = ch.new_page_buffer();
        row::stamp_data_page(&mut buf, &FORMAT_V4, PAGE_TYPE_DATA, 0);
        row::add_row(&mut buf, &FORMAT_V4, &UsageMap::new_inline_row(&FORMAT_V4, 0, true)).unwrap();
        ch.write_page(1, &buf).unwrap();
        let map = UsageMap::read(&mut ch, UsageMapRef::new(1, 0), true).unwrap();
        ch.set_global_free_map(map);

        ch.deallocate_page(3).unwrap();
        let mut back = ch.new_page_buffer();
        ch.read_page(3, &mut back).unwrap();
        assert_eq!(&back[..4], &DEALLOCATED_MARKER);

        // the freed page is preferred over growing the file
        assert_eq!(ch.allocate_page().unwrap(), 3);
        assert_eq!(ch.page_count(), 4);
        // nothing left to reuse: the file grows
        assert_eq!(ch.allocate_page().unwrap(), 4);
        assert_eq!(ch.page_count(), 5);
    }

    #[test]
    fn test_closed_channel_errors() {
        let (_tmp, mut ch) = open_channel(2, &FORMAT_V4);
        ch.close().unwrap();
        let mut buf = vec![0u8; FORMAT_V4.page_size];
        assert!(matches!(ch.read_page(1, &mut buf), Err(JetError::Closed)));
        assert!(matches!(ch.allocate_page(), Err(JetError::Closed)));
    }
}
