//! Microsoft Access (Jet) database file engine.
//!
//! The `jetdb` crate provides Rust types and functions for reading and
//! writing Access database files (`.mdb`) built on the Jet storage format,
//! versions 3 (Access 97), 4 (Access 2000-2007), and 5 (Access 2010+).
//!
//! The crate is a storage engine, not a SQL processor: it exposes tables,
//! columns, indexes, relationships, and saved-query metadata over the
//! paginated file format, and leaves query languages, import/export, and
//! network surfaces to higher layers.
//!
//! # Quick example
//!
//! ```no_run
//! use jetdb::jet::database::{Database, DatabaseConfig};
//!
//! // Open a database (format version is auto-detected from the header)
//! let mut db = Database::open("northwind.mdb", DatabaseConfig::default()).unwrap();
//!
//! // Iterate a table
//! let mut people = db.table("People").unwrap();
//! let mut cursor = people.cursor();
//! while cursor.move_to_next_row(&mut people).unwrap() {
//!     let row = cursor.current_row(&mut people, None).unwrap();
//!     println!("{:?}", row);
//! }
//! ```
//!
//! ## Key entry points
//!
//! | Type / Function | Purpose |
//! |-----------------|---------|
//! | [`Database`](jet::database::Database) | Open or create `.mdb` files, enumerate objects |
//! | [`Table`](jet::table::Table) | Row insert/update/delete, schema introspection |
//! | [`Cursor`](jet::cursor::Cursor) | Table-scan and index-driven traversal |
//! | [`JetFormat`](jet::format::JetFormat) | Per-version format constants and offsets |
//! | [`Value`](jet::value::Value) | Typed column values |
//!
//! ## Module overview
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`jet::format`] | Format descriptors per Jet version |
//! | [`jet::codec`] | Endian-aware byte primitives (incl. 3-byte page numbers) |
//! | [`jet::page`] | Fixed-size page read/write/allocate over the file |
//! | [`jet::usage_map`] | Owned/free page bitmaps (inline, multi-page, global) |
//! | [`jet::value`] | Column data types and values |
//! | [`jet::column`] | Column descriptors and per-type value codecs |
//! | [`jet::row`] | Row layout codec and data-page row pointers |
//! | [`jet::long_value`] | Memo/OLE long value pointers and page chains |
//! | [`jet::table`] | Table definitions and the row lifecycle |
//! | [`jet::index`] | B-tree index pages, entry cursor, insert/remove |
//! | [`jet::index_codec`] | Index entry byte encoding for non-text types |
//! | [`jet::index_codes`] | Text collation entry encoding (General / General-Legacy) |
//! | [`jet::cursor`] | Cursors, savepoints, find, iteration |
//! | [`jet::catalog`] | System catalog, object directory, relationships |
//! | [`jet::database`] | Database handle, configuration, codec provider |

pub mod jet;

use thiserror::Error;

/// Errors returned by `jetdb` operations.
#[derive(Error, Debug)]
pub enum JetError {
    /// An I/O error occurred (file open, read, seek, or write failure).
    #[error("I/O error: {0}")]
    Io(String),

    /// The file contents violate the format (bad version byte, unexpected
    /// page type, out-of-range offsets, unsorted index entries).
    #[error("Corrupt database: {0}")]
    Corrupt(String),

    /// An invalid argument was supplied (unknown column, bad page number,
    /// value out of range for its column type).
    #[error("Invalid argument: {0}")]
    Argument(String),

    /// A policy violation at a mutation boundary (uniqueness breach,
    /// null in a required column, name/column-count limits). The database
    /// is left unchanged.
    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// The operation is recognized but not supported by this build or this
    /// file (encrypted database without a codec, unsupported sort order,
    /// index page split, writes to a read-only format).
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// A write would grow the file past the format's maximum database size.
    #[error("Database full: {0}")]
    DatabaseFull(String),

    /// The database handle has been closed.
    #[error("Database is closed")]
    Closed,
}
