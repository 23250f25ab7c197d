//! The system catalog.
//!
//! Every persisted object (tables, saved queries, relationships,
//! containers) has a row in `MSysObjects`, itself an ordinary table whose
//! definition sits on the well-known page 2. The catalog scan collects
//! (id, name, parent, type, definition page) for each object, finds the
//! "Tables" parent container new tables hang off, and locates the other
//! system tables by name: `MSysACEs` (access control entries, preserved
//! but not interpreted), `MSysRelationships`, and `MSysQueries`.
//!
//! Tables are materialized lazily: the catalog only records definition
//! page numbers, and a table object is built the first time someone asks
//! for it.

use serde::Serialize;

use crate::jet::column::Column;
use crate::jet::constants::*;
use crate::jet::page::PageChannel;
use crate::jet::table::{Table, TableHandle};
use crate::jet::value::{DataType, Value};
use crate::JetError;

/// One object listed in `MSysObjects`.
#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    /// Object id.
    pub id: i32,
    /// Object name.
    pub name: String,
    /// Id of the parent object.
    pub parent_id: i32,
    /// `OBJECT_TYPE_*` tag.
    pub object_type: i16,
    /// Definition page for table objects.
    pub tdef_page: u32,
    /// Raw flag bits.
    pub flags: i32,
}

/// The scanned object directory.
#[derive(Debug, Default)]
pub struct Catalog {
    /// All catalog rows.
    pub entries: Vec<CatalogEntry>,
    /// Id of the "Tables" parent container.
    pub tables_parent_id: i32,
}

impl Catalog {
    /// Scan the catalog table into an object directory.
    pub fn scan(table: &mut Table, channel: &mut PageChannel) -> Result<Catalog, JetError> {
        let mut entries = Vec::new();
        let mut h = TableHandle::new(table, channel);
        let mut cursor = h.cursor();
        while cursor.move_to_next_row(&mut h)? {
            let row = cursor.current_row(&mut h, None)?;
            let mut entry = CatalogEntry {
                id: 0,
                name: String::new(),
                parent_id: 0,
                object_type: 0,
                tdef_page: 0,
                flags: 0,
            };
            for (name, value) in row {
                match (name.as_str(), value) {
                    ("Id", Value::Long(v)) => entry.id = v,
                    ("Name", Value::Text(v)) => entry.name = v,
                    ("ParentId", Value::Long(v)) => entry.parent_id = v,
                    ("Type", Value::Int(v)) => entry.object_type = v,
                    ("DefPage", Value::Long(v)) => entry.tdef_page = v as u32,
                    ("Flags", Value::Long(v)) => entry.flags = v,
                    _ => {}
                }
            }
            if entry.name.is_empty() {
                return Err(JetError::Corrupt("catalog row with no name".to_string()));
            }
            entries.push(entry);
        }

        let tables_parent_id = entries
            .iter()
            .find(|e| {
                e.object_type == OBJECT_TYPE_CONTAINER && e.name.eq_ignore_ascii_case(TABLES_PARENT_NAME)
            })
            .map(|e| e.id)
            .ok_or_else(|| {
                JetError::Corrupt(format!("catalog has no {:?} parent", TABLES_PARENT_NAME))
            })?;

        Ok(Catalog {
            entries,
            tables_parent_id,
        })
    }

    /// Look up an object by name and type.
    pub fn find(&self, name: &str, object_type: i16) -> Option<&CatalogEntry> {
        self.entries
            .iter()
            .find(|e| e.object_type == object_type && e.name.eq_ignore_ascii_case(name))
    }

    /// Definition page of a table object.
    pub fn table_page(&self, name: &str) -> Option<u32> {
        self.find(name, OBJECT_TYPE_TABLE).map(|e| e.tdef_page)
    }

    /// Names of user tables (system tables carry the `MSys` prefix).
    pub fn user_table_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.object_type == OBJECT_TYPE_TABLE && !e.name.starts_with("MSys"))
            .map(|e| e.name.clone())
            .collect()
    }

    /// Names of saved queries.
    pub fn query_names(&self) -> Vec<String> {
        self.entries
            .iter()
            .filter(|e| e.object_type == OBJECT_TYPE_QUERY)
            .map(|e| e.name.clone())
            .collect()
    }
}

/// Column set of `MSysObjects`.
pub fn catalog_columns() -> Vec<Column> {
    vec![
        Column::new("Id", DataType::Long).with_auto_number(),
        Column::new("ParentId", DataType::Long),
        Column::new("Name", DataType::Text),
        Column::new("Type", DataType::Int),
        Column::new("Flags", DataType::Long),
        Column::new("DefPage", DataType::Long),
        Column::new("DateCreate", DataType::ShortDateTime),
        Column::new("DateUpdate", DataType::ShortDateTime),
    ]
}

/// Column set of `MSysACEs`.
pub fn aces_columns() -> Vec<Column> {
    vec![
        Column::new("ObjectId", DataType::Long),
        Column::new("SID", DataType::Binary),
        Column::new("ACM", DataType::Binary),
        Column::new("FInheritable", DataType::Boolean),
    ]
}

/// Column set of `MSysRelationships`.
pub fn relationships_columns() -> Vec<Column> {
    vec![
        Column::new("szRelationship", DataType::Text),
        Column::new("szObject", DataType::Text),
        Column::new("szColumn", DataType::Text),
        Column::new("szReferencedObject", DataType::Text),
        Column::new("szReferencedColumn", DataType::Text),
        Column::new("ccolumn", DataType::Int),
        Column::new("icolumn", DataType::Int),
        Column::new("grbit", DataType::Long),
    ]
}

/// Column set of `MSysQueries`.
pub fn queries_columns() -> Vec<Column> {
    vec![
        Column::new("ObjectId", DataType::Long),
        Column::new("Attribute", DataType::Byte),
        Column::new("Expression", DataType::Memo),
        Column::new("Flag", DataType::Int),
        Column::new("Name1", DataType::Text),
        Column::new("Name2", DataType::Text),
        Column::new("Order", DataType::Long),
    ]
}

/// Values for a new catalog row.
pub fn catalog_row(
    parent_id: i32,
    name: &str,
    object_type: i16,
    tdef_page: u32,
    now: chrono::NaiveDateTime,
) -> Vec<Value> {
    vec![
        Value::Null, // auto-number id
        Value::Long(parent_id),
        Value::Text(name.to_string()),
        Value::Int(object_type),
        Value::Long(0),
        Value::Long(tdef_page as i32),
        Value::DateTime(now),
        Value::DateTime(now),
    ]
}

// ── relationships ───────────────────────────────────────────────────

/// Relationship flag: one-to-one join.
pub const REL_FLAG_ONE_TO_ONE: i32 = 0x0000_0001;
/// Relationship flag: referential integrity not enforced.
pub const REL_FLAG_NO_INTEGRITY: i32 = 0x0000_0002;
/// Relationship flag: updates cascade.
pub const REL_FLAG_CASCADE_UPDATES: i32 = 0x0000_0100;
/// Relationship flag: deletes cascade.
pub const REL_FLAG_CASCADE_DELETES: i32 = 0x0000_1000;
/// Relationship flag: left outer join.
pub const REL_FLAG_LEFT_OUTER: i32 = 0x0100_0000;
/// Relationship flag: right outer join.
pub const REL_FLAG_RIGHT_OUTER: i32 = 0x0200_0000;

/// A resolved relationship between two tables.
#[derive(Debug, Clone, Serialize)]
pub struct Relationship {
    /// Relationship name.
    pub name: String,
    /// Referencing table.
    pub from_table: String,
    /// Referencing columns, in key order.
    pub from_columns: Vec<String>,
    /// Referenced table.
    pub to_table: String,
    /// Referenced columns, in key order.
    pub to_columns: Vec<String>,
    /// Raw `grbit` flags.
    pub flags: i32,
}

impl Relationship {
    /// True for one-to-one relationships.
    pub fn is_one_to_one(&self) -> bool {
        self.flags & REL_FLAG_ONE_TO_ONE != 0
    }

    /// True when referential integrity is enforced.
    pub fn has_integrity(&self) -> bool {
        self.flags & REL_FLAG_NO_INTEGRITY == 0
    }

    /// True when updates cascade from the referenced table.
    pub fn cascades_updates(&self) -> bool {
        self.flags & REL_FLAG_CASCADE_UPDATES != 0
    }

    /// True when deletes cascade from the referenced table.
    pub fn cascades_deletes(&self) -> bool {
        self.flags & REL_FLAG_CASCADE_DELETES != 0
    }
}

/// Parse `MSysRelationships` rows into resolved relationships.
///
/// Each row describes one column pair; rows sharing a relationship name
/// are collated in `icolumn` order.
pub fn resolve_relationships(
    table: &mut Table,
    channel: &mut PageChannel,
) -> Result<Vec<Relationship>, JetError> {
    struct Pair {
        icolumn: i16,
        from_column: String,
        to_column: String,
    }
    let mut grouped: Vec<(Relationship, Vec<Pair>)> = Vec::new();

    let mut h = TableHandle::new(table, channel);
    let mut cursor = h.cursor();
    while cursor.move_to_next_row(&mut h)? {
        let row = cursor.current_row(&mut h, None)?;
        let get_text = |key: &str| {
            row.iter()
                .find(|(n, _)| n == key)
                .and_then(|(_, v)| v.as_text())
                .unwrap_or("")
                .to_string()
        };
        let get_int = |key: &str| match row.iter().find(|(n, _)| n == key) {
            Some((_, Value::Int(v))) => *v,
            _ => 0,
        };
        let get_long = |key: &str| match row.iter().find(|(n, _)| n == key) {
            Some((_, Value::Long(v))) => *v,
            _ => 0,
        };

        let name = get_text("szRelationship");
        let pair = Pair {
            icolumn: get_int("icolumn"),
            from_column: get_text("szColumn"),
            to_column: get_text("szReferencedColumn"),
        };
        match grouped.iter_mut().find(|(r, _)| r.name == name) {
            Some((_, pairs)) => pairs.push(pair),
            None => {
                grouped.push((
                    Relationship {
                        name,
                        from_table: get_text("szObject"),
                        from_columns: Vec::new(),
                        to_table: get_text("szReferencedObject"),
                        to_columns: Vec::new(),
                        flags: get_long("grbit"),
                    },
                    vec![pair],
                ));
            }
        }
    }

    let mut out = Vec::new();
    for (mut rel, mut pairs) in grouped {
        pairs.sort_by_key(|p| p.icolumn);
        for pair in pairs {
            rel.from_columns.push(pair.from_column);
            rel.to_columns.push(pair.to_column);
        }
        out.push(rel);
    }
    Ok(out)
}
