//! The database handle.
//!
//! [`Database::open`] reads the header page, selects the format from the
//! version byte, consults the codec provider about encryption, installs
//! the global free-page map, and bootstraps the catalog from page 2.
//! Every failure along the way releases the file handle (the `File` is
//! dropped with the error).
//!
//! [`Database::create`] builds a new, empty database: header page, global
//! free-page map, and the system tables (`MSysObjects`, `MSysACEs`,
//! `MSysQueries`, `MSysRelationships`) created through the same machinery
//! user tables use.
//!
//! A handle is single-threaded; callers needing parallel access open
//! independent handles and accept last-writer-wins semantics. Cursors stay
//! consistent against same-handle mutation through modification counters,
//! not locks.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::rc::Rc;

use byteorder::{ByteOrder, LittleEndian};
use chrono::FixedOffset;
use log::debug;

use crate::jet::catalog::{self, Catalog, Relationship};
use crate::jet::column::Column;
use crate::jet::constants::*;
use crate::jet::format::{Charset, FormatInfo, JetFormat, JetVersion};
use crate::jet::index::IndexVariant;
use crate::jet::page::{PageChannel, PageCodec};
use crate::jet::table::{
    rethrowing_error_handler, validate_table_spec, ErrorHandler, IndexSpec, Table, TableHandle,
};
use crate::jet::usage_map::{UsageMap, UsageMapRef};
use crate::jet::value::{datetime_to_days, Value};
use crate::JetError;

/// Supplies the per-page transform for encrypted databases.
pub trait CodecProvider {
    /// Inspect the raw header page and return the codec to install, or
    /// `None` for plain page I/O.
    fn codec_for(&self, header: &[u8]) -> Result<Option<Box<dyn PageCodec>>, JetError>;
}

/// The default provider: plain I/O for unencrypted files, a loud failure
/// for anything with the encryption flag set.
pub struct DefaultCodecProvider;

impl CodecProvider for DefaultCodecProvider {
    fn codec_for(&self, header: &[u8]) -> Result<Option<Box<dyn PageCodec>>, JetError> {
        if header.len() >= OFFSET_ENCRYPTION_FLAGS + 4 {
            let flags = LittleEndian::read_u32(&header[OFFSET_ENCRYPTION_FLAGS..]);
            if flags != 0 {
                return Err(JetError::Unsupported(format!(
                    "encrypted database (flags 0x{:08X}) without a codec provider",
                    flags
                )));
            }
        }
        Ok(None)
    }
}

/// Open options for a database handle. These are the recognized options;
/// there are no others.
#[derive(Clone)]
pub struct DatabaseConfig {
    /// Refuse writes. Auto-promoted to true when the file is not writable.
    pub read_only: bool,
    /// Flush every write before returning (default true).
    pub auto_sync: bool,
    /// Charset override for text columns; `None` takes the format default.
    pub charset: Option<Charset>,
    /// Timezone used by date interpretation in higher layers; `None` takes
    /// the system default.
    pub timezone: Option<FixedOffset>,
    /// Codec provider for encrypted files.
    pub codec_provider: Rc<dyn CodecProvider>,
    /// Use the paged index variant (default true); false restricts every
    /// index to the single-page simple variant.
    pub use_big_index: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            read_only: false,
            auto_sync: true,
            charset: None,
            timezone: None,
            codec_provider: Rc::new(DefaultCodecProvider),
            use_big_index: true,
        }
    }
}

/// An open database.
pub struct Database {
    channel: PageChannel,
    format: &'static JetFormat,
    catalog_table: Table,
    catalog: Catalog,
    tables: HashMap<String, Table>,
    default_error_handler: ErrorHandler,
    use_big_index: bool,
    charset: Charset,
    timezone: Option<FixedOffset>,
}

impl Database {
    fn index_variant(use_big_index: bool, format: &JetFormat) -> IndexVariant {
        if use_big_index && format.supports_paged_indexes {
            IndexVariant::Paged
        } else {
            IndexVariant::Simple
        }
    }

    /// Open an existing database file.
    pub fn open<P: AsRef<Path>>(path: P, config: DatabaseConfig) -> Result<Database, JetError> {
        let path = path.as_ref();
        let (mut file, read_only) = if config.read_only {
            (open_file(path, false)?, true)
        } else {
            // auto-promote to read-only when the file is not writable
            match open_file(path, true) {
                Ok(f) => (f, false),
                Err(_) => (open_file(path, false)?, true),
            }
        };

        // the format must be known before the first page-sized read
        let mut header = [0u8; 64];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut header))
            .map_err(|e| JetError::Io(format!("Cannot read database header: {}", e)))?;
        let format = JetFormat::detect(&header)?;

        // a full header page for the codec provider's inspection
        let mut header_page = vec![0u8; format.page_size];
        file.seek(SeekFrom::Start(0))
            .and_then(|_| file.read_exact(&mut header_page))
            .map_err(|e| JetError::Io(format!("Cannot read header page: {}", e)))?;
        let codec = config.codec_provider.codec_for(&header_page)?;

        let mut channel = PageChannel::new(file, format, config.auto_sync, read_only, codec)?;

        if !channel.is_read_only() {
            let map = UsageMap::read(
                &mut channel,
                UsageMapRef::new(PAGE_GLOBAL_USAGE_MAP, 0),
                true,
            )?;
            channel.set_global_free_map(map);
        }

        let default_error_handler = rethrowing_error_handler();
        let variant = Self::index_variant(config.use_big_index, format);
        let mut catalog_table = Table::read(
            &mut channel,
            PAGE_SYSTEM_CATALOG,
            variant,
            default_error_handler.clone(),
        )?;
        let catalog = Catalog::scan(&mut catalog_table, &mut channel)?;
        debug!(
            "opened {:?}: {} catalog objects, format {}",
            path,
            catalog.entries.len(),
            format.name
        );

        Ok(Database {
            channel,
            format,
            catalog_table,
            catalog,
            tables: HashMap::new(),
            default_error_handler,
            use_big_index: config.use_big_index,
            charset: config.charset.unwrap_or(format.charset),
            timezone: config.timezone,
        })
    }

    /// Create a new, empty database file.
    pub fn create<P: AsRef<Path>>(
        path: P,
        version: JetVersion,
        config: DatabaseConfig,
    ) -> Result<Database, JetError> {
        let format: &'static JetFormat = match version {
            JetVersion::V3 => {
                return Err(JetError::Unsupported(
                    "cannot create files in the read-only v3 format".to_string(),
                ))
            }
            JetVersion::V4 => &crate::jet::format::FORMAT_V4,
            JetVersion::V5 => &crate::jet::format::FORMAT_V5,
        };

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path.as_ref())
            .map_err(|e| {
                JetError::Io(format!("Cannot create {}: {}", path.as_ref().display(), e))
            })?;
        let mut channel = PageChannel::new(file, format, config.auto_sync, false, None)?;

        let now = chrono::Local::now().naive_local();

        // page 0: the header
        let header_page = channel.allocate_page()?;
        let mut buf = channel.new_page_buffer();
        buf[OFFSET_MAGIC..OFFSET_MAGIC + 2].copy_from_slice(&HEADER_MAGIC);
        buf[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + ENGINE_NAME.len()].copy_from_slice(ENGINE_NAME);
        buf[OFFSET_VERSION] = format.version_byte;
        LittleEndian::write_f64(&mut buf[OFFSET_CREATION_DATE..], datetime_to_days(now));
        LittleEndian::write_u32(&mut buf[OFFSET_ENCRYPTION_FLAGS..], 0);
        LittleEndian::write_u16(&mut buf[OFFSET_CHARSET..], 1252);
        LittleEndian::write_u16(&mut buf[OFFSET_SORT_ORDER..], format.default_sort_order.to_word());
        channel.write_page(header_page, &buf)?;

        // page 1: the global free-page map
        let map_page = channel.allocate_page()?;
        crate::jet::row::stamp_data_page(&mut buf, format, PAGE_TYPE_DATA, 0);
        crate::jet::row::add_row(&mut buf, format, &UsageMap::new_inline_row(format, 0, true))?;
        channel.write_page(map_page, &buf)?;
        let global = UsageMap::read(&mut channel, UsageMapRef::new(map_page, 0), true)?;
        channel.set_global_free_map(global);

        // page 2: the catalog table
        let catalog_page = channel.allocate_page()?;
        if catalog_page != PAGE_SYSTEM_CATALOG {
            return Err(JetError::Corrupt(format!(
                "catalog landed on page {}",
                catalog_page
            )));
        }
        let default_error_handler = rethrowing_error_handler();
        let variant = Self::index_variant(config.use_big_index, format);
        let mut catalog_table = Table::create(
            &mut channel,
            CATALOG_TABLE_NAME,
            catalog_page,
            catalog::catalog_columns(),
            &[IndexSpec::primary_key("PrimaryKey", "Id")],
            TABLE_TYPE_SYSTEM,
            variant,
            default_error_handler.clone(),
        )?;

        // seed the directory: the Tables parent, then the catalog itself
        catalog_table.insert_row(
            &mut channel,
            &catalog::catalog_row(0, TABLES_PARENT_NAME, OBJECT_TYPE_CONTAINER, 0, now),
        )?;
        let catalog_scan = Catalog::scan(&mut catalog_table, &mut channel)?;
        let tables_parent_id = catalog_scan.tables_parent_id;
        catalog_table.insert_row(
            &mut channel,
            &catalog::catalog_row(
                tables_parent_id,
                CATALOG_TABLE_NAME,
                OBJECT_TYPE_TABLE,
                catalog_page,
                now,
            ),
        )?;

        let mut db = Database {
            channel,
            format,
            catalog_table,
            catalog: Catalog::default(),
            tables: HashMap::new(),
            default_error_handler,
            use_big_index: config.use_big_index,
            charset: config.charset.unwrap_or(format.charset),
            timezone: config.timezone,
        };
        db.catalog = Catalog::scan(&mut db.catalog_table, &mut db.channel)?;

        // the rest of the system complement
        db.create_table_impl(ACES_TABLE_NAME, catalog::aces_columns(), &[], TABLE_TYPE_SYSTEM)?;
        db.create_table_impl(
            QUERIES_TABLE_NAME,
            catalog::queries_columns(),
            &[],
            TABLE_TYPE_SYSTEM,
        )?;
        db.create_table_impl(
            RELATIONSHIPS_TABLE_NAME,
            catalog::relationships_columns(),
            &[],
            TABLE_TYPE_SYSTEM,
        )?;

        // default access entries on the Tables parent, mirrored onto every
        // new table; the bytes are opaque to this engine
        {
            let parent_id = db.catalog.tables_parent_id;
            let mut aces = db.table(ACES_TABLE_NAME)?;
            aces.insert_row(&[
                Value::Long(parent_id),
                Value::Binary(vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01]),
                Value::Binary(vec![0xFF, 0x0F]),
                Value::Bool(true),
            ])?;
        }

        db.flush()?;
        debug!("created database at {:?}", path.as_ref());
        Ok(db)
    }

    // ── introspection ───────────────────────────────────────────────

    /// The detected format.
    pub fn format_info(&self) -> FormatInfo {
        self.format.info()
    }

    /// Charset in effect for this handle.
    pub fn charset(&self) -> Charset {
        self.charset
    }

    /// Timezone supplied at open time, if any.
    pub fn timezone(&self) -> Option<FixedOffset> {
        self.timezone
    }

    /// True when every write is refused.
    pub fn is_read_only(&self) -> bool {
        self.channel.is_read_only()
    }

    /// Names of the user tables.
    pub fn table_names(&self) -> Vec<String> {
        self.catalog.user_table_names()
    }

    /// Names of the saved queries.
    pub fn query_names(&self) -> Vec<String> {
        self.catalog.query_names()
    }

    /// The scanned catalog.
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Database-scope error handler for column decode failures. Tables and
    /// cursors opened from this handle fall through to it.
    pub fn set_default_error_handler(&mut self, handler: ErrorHandler) {
        self.default_error_handler = handler;
    }

    /// Resolved relationships between tables.
    pub fn relationships(&mut self) -> Result<Vec<Relationship>, JetError> {
        self.materialize(RELATIONSHIPS_TABLE_NAME)?;
        let table = self
            .tables
            .get_mut(&RELATIONSHIPS_TABLE_NAME.to_lowercase())
            .ok_or_else(|| {
                JetError::Corrupt("relationships table vanished after load".to_string())
            })?;
        catalog::resolve_relationships(table, &mut self.channel)
    }

    // ── tables ──────────────────────────────────────────────────────

    fn materialize(&mut self, name: &str) -> Result<(), JetError> {
        let key = name.to_lowercase();
        if self.tables.contains_key(&key) || key == CATALOG_TABLE_NAME.to_lowercase() {
            return Ok(());
        }
        let tdef_page = self.catalog.table_page(name).ok_or_else(|| {
            JetError::Argument(format!("no table {:?} in the catalog", name))
        })?;
        let table = Table::read(
            &mut self.channel,
            tdef_page,
            Self::index_variant(self.use_big_index, self.format),
            self.default_error_handler.clone(),
        )?;
        debug!("materialized table {:?} from page {}", name, tdef_page);
        self.tables.insert(key, table);
        Ok(())
    }

    /// A handle on a table, materializing it on first access.
    pub fn table(&mut self, name: &str) -> Result<TableHandle<'_>, JetError> {
        self.materialize(name)?;
        let key = name.to_lowercase();
        if key == CATALOG_TABLE_NAME.to_lowercase() {
            return Ok(TableHandle::new(&mut self.catalog_table, &mut self.channel));
        }
        let Database {
            channel, tables, ..
        } = self;
        let table = tables
            .get_mut(&key)
            .ok_or_else(|| JetError::Argument(format!("no table {:?} in the catalog", name)))?;
        Ok(TableHandle::new(table, channel))
    }

    /// Create a user table with the given columns and indexes.
    pub fn create_table(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        indexes: &[IndexSpec],
    ) -> Result<(), JetError> {
        self.create_table_impl(name, columns, indexes, TABLE_TYPE_USER)
    }

    fn create_table_impl(
        &mut self,
        name: &str,
        columns: Vec<Column>,
        indexes: &[IndexSpec],
        table_type: u8,
    ) -> Result<(), JetError> {
        // every check precedes the first allocation, so a refused create
        // leaves the file length untouched
        validate_table_spec(name, &columns, indexes)?;
        if self.catalog.find(name, OBJECT_TYPE_TABLE).is_some() {
            return Err(JetError::Constraint(format!(
                "table {:?} already exists",
                name
            )));
        }

        let tdef_page = self.channel.allocate_page()?;
        let table = Table::create(
            &mut self.channel,
            name,
            tdef_page,
            columns,
            indexes,
            table_type,
            Self::index_variant(self.use_big_index, self.format),
            self.default_error_handler.clone(),
        )?;

        let now = chrono::Local::now().naive_local();
        let row_id = self.catalog_table.insert_row(
            &mut self.channel,
            &catalog::catalog_row(
                self.catalog.tables_parent_id,
                name,
                OBJECT_TYPE_TABLE,
                tdef_page,
                now,
            ),
        )?;
        let handler = self.default_error_handler.clone();
        let new_id = self
            .catalog_table
            .read_row(&mut self.channel, row_id, None, &handler)?
            .into_iter()
            .find(|(n, _)| n == "Id")
            .and_then(|(_, v)| v.as_i32())
            .ok_or_else(|| JetError::Corrupt("catalog row lost its id".to_string()))?;

        self.mirror_parent_aces(new_id)?;

        self.catalog = Catalog::scan(&mut self.catalog_table, &mut self.channel)?;
        self.tables.insert(name.to_lowercase(), table);
        Ok(())
    }

    /// Copy the Tables parent's access entries onto a new object.
    fn mirror_parent_aces(&mut self, object_id: i32) -> Result<(), JetError> {
        if self.catalog.table_page(ACES_TABLE_NAME).is_none() {
            // bootstrap: the ACE table itself is still being created
            return Ok(());
        }
        let parent_id = self.catalog.tables_parent_id;
        let mut mirrored = Vec::new();
        {
            let mut aces = self.table(ACES_TABLE_NAME)?;
            let mut cursor = aces.cursor();
            while cursor.move_to_next_row(&mut aces)? {
                let row = cursor.current_row(&mut aces, None)?;
                let object = row.iter().find(|(n, _)| n == "ObjectId");
                if matches!(object, Some((_, Value::Long(id))) if *id == parent_id) {
                    let mut copy: Vec<Value> = row.into_iter().map(|(_, v)| v).collect();
                    copy[0] = Value::Long(object_id);
                    mirrored.push(copy);
                }
            }
        }
        let mut aces = self.table(ACES_TABLE_NAME)?;
        for values in mirrored {
            aces.insert_row(&values)?;
        }
        Ok(())
    }

    // ── lifecycle ───────────────────────────────────────────────────

    /// Force outstanding writes to disk.
    pub fn flush(&mut self) -> Result<(), JetError> {
        if self.channel.is_read_only() {
            return Ok(());
        }
        self.channel.flush()
    }

    /// Flush and release the file. Further operations fail with
    /// [`JetError::Closed`].
    pub fn close(&mut self) -> Result<(), JetError> {
        self.channel.close()
    }
}

fn open_file(path: &Path, writable: bool) -> Result<File, JetError> {
    OpenOptions::new()
        .read(true)
        .write(writable)
        .open(path)
        .map_err(|e| JetError::Io(format!("Cannot open {}: {}", path.display(), e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jet::value::DataType;
    use tempfile::TempDir;

    fn db_path(dir: &TempDir) -> std::path::PathBuf {
        dir.path().join("test.mdb")
    }

    #[test]
    fn test_create_then_open_round_trips_catalog() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        {
            let mut db =
                Database::create(&path, JetVersion::V4, DatabaseConfig::default()).unwrap();
            assert!(db.table_names().is_empty());
            db.close().unwrap();
        }
        let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
        assert_eq!(db.format_info().page_size, 4096);
        assert!(db.table_names().is_empty());
        // system complement is present
        for name in [
            CATALOG_TABLE_NAME,
            ACES_TABLE_NAME,
            QUERIES_TABLE_NAME,
            RELATIONSHIPS_TABLE_NAME,
        ] {
            assert!(db.catalog().table_page(name).is_some(), "missing {}", name);
        }
        db.close().unwrap();
    }

    #[test]
    fn test_create_table_and_reopen() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        {
            let mut db =
                Database::create(&path, JetVersion::V4, DatabaseConfig::default()).unwrap();
            db.create_table(
                "People",
                vec![
                    Column::new("Id", DataType::Long),
                    Column::new("Name", DataType::Text),
                ],
                &[IndexSpec::unique("ById", "Id")],
            )
            .unwrap();
            let mut people = db.table("People").unwrap();
            people
                .insert_row(&[Value::Long(1), Value::Text("Ada".into())])
                .unwrap();
            db.close().unwrap();
        }

        let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
        assert_eq!(db.table_names(), vec!["People".to_string()]);
        let mut people = db.table("People").unwrap();
        assert_eq!(people.row_count(), 1);
        let mut cursor = people.cursor();
        assert!(cursor.move_to_next_row(&mut people).unwrap());
        let row = cursor.current_row(&mut people, None).unwrap();
        assert_eq!(row[1].1, Value::Text("Ada".into()));
    }

    #[test]
    fn test_duplicate_table_name_refused() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::create(db_path(&dir), JetVersion::V4, DatabaseConfig::default())
            .unwrap();
        db.create_table("T", vec![Column::new("A", DataType::Long)], &[])
            .unwrap();
        assert!(matches!(
            db.create_table("t", vec![Column::new("A", DataType::Long)], &[]),
            Err(JetError::Constraint(_))
        ));
    }

    #[test]
    fn test_new_table_inherits_parent_aces() {
        let dir = TempDir::new().unwrap();
        let mut db = Database::create(db_path(&dir), JetVersion::V4, DatabaseConfig::default())
            .unwrap();
        db.create_table("T", vec![Column::new("A", DataType::Long)], &[])
            .unwrap();

        let entry_id = db.catalog().find("T", OBJECT_TYPE_TABLE).unwrap().id;
        let mut aces = db.table(ACES_TABLE_NAME).unwrap();
        let mut cursor = aces.cursor();
        let mut found = false;
        while cursor.move_to_next_row(&mut aces).unwrap() {
            let row = cursor.current_row(&mut aces, None).unwrap();
            if matches!(&row[0].1, Value::Long(id) if *id == entry_id) {
                found = true;
            }
        }
        assert!(found, "no mirrored access entry for the new table");
    }

    #[test]
    fn test_encrypted_header_is_refused() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        {
            let mut db =
                Database::create(&path, JetVersion::V4, DatabaseConfig::default()).unwrap();
            db.close().unwrap();
        }
        // set the encryption flag by hand
        {
            use std::io::Write;
            let mut f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(OFFSET_ENCRYPTION_FLAGS as u64)).unwrap();
            f.write_all(&[0x01, 0x00, 0x00, 0x00]).unwrap();
        }
        assert!(matches!(
            Database::open(&path, DatabaseConfig::default()),
            Err(JetError::Unsupported(_))
        ));
    }

    #[test]
    fn test_failed_open_releases_file() {
        let dir = TempDir::new().unwrap();
        let path = db_path(&dir);
        {
            let mut db =
                Database::create(&path, JetVersion::V4, DatabaseConfig::default()).unwrap();
            db.close().unwrap();
        }
        // break the catalog page so open fails mid-bootstrap
        {
            use std::io::Write;
            let mut f = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            f.seek(SeekFrom::Start(2 * 4096)).unwrap();
            f.write_all(&[0x09]).unwrap();
        }
        assert!(Database::open(&path, DatabaseConfig::default()).is_err());
        // the handle was released: the file can be reopened for writing
        let reopened = OpenOptions::new().read(true).write(true).open(&path);
        assert!(reopened.is_ok());
        // and removed
        std::fs::remove_file(&path).unwrap();
    }
}
