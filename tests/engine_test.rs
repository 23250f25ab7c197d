//! End-to-end scenarios for the storage engine.
//!
//! These tests build real database files through the public API (and, for
//! the read-only v3 format, by composing pages with the serialization
//! helpers), then run the full open/scan/mutate pipeline against them.

use std::collections::HashSet;
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use tempfile::TempDir;

use jetdb::jet::catalog;
use jetdb::jet::column::Column;
use jetdb::jet::constants::*;
use jetdb::jet::cursor::{ColumnMatcher, Cursor};
use jetdb::jet::database::{Database, DatabaseConfig};
use jetdb::jet::format::{JetVersion, FORMAT_V3};
use jetdb::jet::row;
use jetdb::jet::table::{serialize_tdef, IndexSpec, TableDefinition};
use jetdb::jet::usage_map::{UsageMap, UsageMapRef};
use jetdb::jet::value::{DataType, Value};
use jetdb::JetError;

fn people_columns() -> Vec<Column> {
    vec![
        Column::new("Id", DataType::Long),
        Column::new("Name", DataType::Text),
    ]
}

fn new_db(dir: &TempDir, name: &str) -> (std::path::PathBuf, Database) {
    let path = dir.path().join(name);
    let db = Database::create(&path, JetVersion::V4, DatabaseConfig::default()).unwrap();
    (path, db)
}

// ── Scenario A: open a file and iterate a known table ───────────────

#[test]
fn scenario_a_open_and_iterate_known_rows() {
    let dir = TempDir::new().unwrap();
    let (path, mut db) = new_db(&dir, "a.mdb");
    db.create_table("People", people_columns(), &[]).unwrap();
    let expected = vec![(1, "Ann"), (2, "Ben"), (3, "Cleo")];
    {
        let mut people = db.table("People").unwrap();
        for (id, name) in &expected {
            people
                .insert_row(&[Value::Long(*id), Value::Text(name.to_string())])
                .unwrap();
        }
        db.close().unwrap();
    }

    let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
    assert_eq!(db.table_names(), vec!["People".to_string()]);
    let mut people = db.table("People").unwrap();
    let mut cursor = people.cursor();
    let mut got = Vec::new();
    while cursor.move_to_next_row(&mut people).unwrap() {
        let row = cursor.current_row(&mut people, None).unwrap();
        match (&row[0].1, &row[1].1) {
            (Value::Long(id), Value::Text(name)) => got.push((*id, name.clone())),
            other => panic!("unexpected row {:?}", other),
        }
    }
    let expected: Vec<(i32, String)> = expected
        .into_iter()
        .map(|(id, name)| (id, name.to_string()))
        .collect();
    assert_eq!(got, expected);
}

// ── Scenario B: unique index rejects the second insert ──────────────

#[test]
fn scenario_b_unique_violation_leaves_one_row() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "b.mdb");
    db.create_table("People", people_columns(), &[IndexSpec::unique("ById", "Id")])
        .unwrap();
    let mut people = db.table("People").unwrap();

    people
        .insert_row(&[Value::Long(7), Value::Text("ALICE".into())])
        .unwrap();
    let second = people.insert_row(&[Value::Long(7), Value::Text("alice".into())]);
    assert!(matches!(second, Err(JetError::Constraint(_))));

    let mut cursor = people.cursor();
    let mut matching = 0;
    while cursor.move_to_next_row(&mut people).unwrap() {
        let row = cursor.current_row(&mut people, None).unwrap();
        if row[0].1 == Value::Long(7) {
            matching += 1;
            assert_eq!(row[1].1, Value::Text("ALICE".into()));
        }
    }
    assert_eq!(matching, 1);
}

// ── Scenario C: case/accent folding in the text index ───────────────

#[test]
fn scenario_c_folded_keys_share_inline_bytes() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "c.mdb");
    db.create_table(
        "People",
        people_columns(),
        &[IndexSpec::simple("ByName", "Name")],
    )
    .unwrap();
    let mut people = db.table("People").unwrap();
    let id_cafe_accent = people
        .insert_row(&[Value::Long(1), Value::Text("caf\u{E9}".into())])
        .unwrap();
    let id_cafe_upper = people
        .insert_row(&[Value::Long(2), Value::Text("Cafe".into())])
        .unwrap();
    assert_ne!(id_cafe_accent, id_cafe_upper);

    // the encoded keys agree through the inline stream and end marker,
    // and diverge in the extra-byte stream
    let k1 = people
        .table
        .index_entry_prefix("ByName", &[Value::Text("caf\u{E9}".into())])
        .unwrap();
    let k2 = people
        .table
        .index_entry_prefix("ByName", &[Value::Text("Cafe".into())])
        .unwrap();
    let inline_len = 1 + 4 + 1; // entry flag, four folded chars, end marker
    assert_eq!(&k1[..inline_len], &k2[..inline_len]);
    assert_ne!(k1, k2);

    // a case-insensitive find matches both, in insertion order
    let mut cursor = people.index_cursor("ByName").unwrap();
    cursor.set_column_matcher(ColumnMatcher::CaseInsensitive);
    assert!(cursor
        .find_first_row(&mut people, "Name", &Value::Text("CAFE".into()))
        .unwrap());
    let first = cursor.current_row(&mut people, None).unwrap();
    assert_eq!(first[0].1, Value::Long(1));

    let mut second_id = None;
    while cursor.move_to_next_row(&mut people).unwrap() {
        let row = cursor.current_row(&mut people, None).unwrap();
        if let (Value::Long(id), Value::Text(name)) = (&row[0].1, &row[1].1) {
            if name.eq_ignore_ascii_case("cafe") || name.to_lowercase() == "caf\u{E9}" {
                second_id = Some(*id);
                break;
            }
        }
    }
    assert_eq!(second_id, Some(2));
}

// ── Scenario D: delete during iteration ─────────────────────────────

#[test]
fn scenario_d_remove_mid_iteration_advances_by_one() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "d.mdb");
    db.create_table("People", people_columns(), &[]).unwrap();
    let mut people = db.table("People").unwrap();
    for i in 1..=5 {
        people
            .insert_row(&[Value::Long(i), Value::Text(format!("p{}", i))])
            .unwrap();
    }

    let mut cursor = people.cursor();
    let mut iter = cursor.iter(&mut people);
    assert_eq!(iter.next().unwrap().unwrap()[0].1, Value::Long(1));
    assert_eq!(iter.next().unwrap().unwrap()[0].1, Value::Long(2));
    iter.remove().unwrap();
    // one step forward relative to the deleted position
    assert_eq!(iter.next().unwrap().unwrap()[0].1, Value::Long(3));
    assert_eq!(iter.next().unwrap().unwrap()[0].1, Value::Long(4));
    assert_eq!(iter.next().unwrap().unwrap()[0].1, Value::Long(5));
    assert!(iter.next().is_none());
}

// ── Scenario E: the v3 format opens read-only ───────────────────────

/// Compose a minimal v3 database by hand: header, global map, and a
/// catalog holding only the Tables parent and the catalog itself.
fn build_v3_fixture(path: &std::path::Path) {
    let format = &FORMAT_V3;
    let ps = format.page_size;
    let now = chrono::NaiveDate::from_ymd_opt(2002, 3, 4)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();

    // page 0: header
    let mut p0 = vec![0u8; ps];
    p0[..2].copy_from_slice(&HEADER_MAGIC);
    p0[OFFSET_ENGINE_NAME..OFFSET_ENGINE_NAME + ENGINE_NAME.len()].copy_from_slice(ENGINE_NAME);
    p0[OFFSET_VERSION] = format.version_byte;
    LittleEndian::write_u32(&mut p0[OFFSET_ENCRYPTION_FLAGS..], 0);
    LittleEndian::write_u16(&mut p0[OFFSET_SORT_ORDER..], 0x0409);

    // page 1: global free-page map
    let mut p1 = vec![0u8; ps];
    row::stamp_data_page(&mut p1, format, PAGE_TYPE_DATA, 0);
    row::add_row(&mut p1, format, &UsageMap::new_inline_row(format, 0, true)).unwrap();

    // catalog columns with v3 layout offsets assigned by hand
    let mut columns = catalog::catalog_columns();
    let mut fixed_offset = 0u16;
    let mut var_index = 0u16;
    for (i, col) in columns.iter_mut().enumerate() {
        col.number = i as u16;
        if col.is_fixed() {
            col.fixed_offset = fixed_offset;
            fixed_offset += col.fixed_size() as u16;
        } else {
            col.var_index = var_index;
            var_index += 1;
        }
    }

    // page 3: usage map holder for the catalog (owned {3,4}, free {4})
    let mut p3 = vec![0u8; ps];
    row::stamp_data_page(&mut p3, format, PAGE_TYPE_DATA, 0);
    let mut owned_row = UsageMap::new_inline_row(format, 0, false);
    owned_row[5] = 0b0001_1000;
    row::add_row(&mut p3, format, &owned_row).unwrap();
    let mut free_row = UsageMap::new_inline_row(format, 0, false);
    free_row[5] = 0b0001_0000;
    row::add_row(&mut p3, format, &free_row).unwrap();

    // page 4: the two catalog rows
    let mut p4 = vec![0u8; ps];
    row::stamp_data_page(&mut p4, format, PAGE_TYPE_DATA, PAGE_SYSTEM_CATALOG);
    for (id, values) in [
        (1, catalog::catalog_row(0, TABLES_PARENT_NAME, OBJECT_TYPE_CONTAINER, 0, now)),
        (
            2,
            catalog::catalog_row(1, CATALOG_TABLE_NAME, OBJECT_TYPE_TABLE, PAGE_SYSTEM_CATALOG, now),
        ),
    ] {
        let cells: Vec<row::Cell> = columns
            .iter()
            .zip(&values)
            .map(|(col, v)| {
                // the auto-number id slot arrives null; the fixture fills it
                let concrete = match v {
                    Value::Null => Value::Long(id),
                    other => other.clone(),
                };
                row::Cell::Bytes(col.encode_value(&concrete, format).unwrap())
            })
            .collect();
        let bytes = row::encode_row(&columns, &cells, format).unwrap();
        row::add_row(&mut p4, format, &bytes).unwrap();
    }

    // page 2: the catalog definition
    let def = TableDefinition {
        name: CATALOG_TABLE_NAME,
        table_type: TABLE_TYPE_SYSTEM,
        row_count: 2,
        next_auto_number: 3,
        max_columns: MAX_COLUMNS_PER_TABLE as u16,
        columns: &columns,
        indexes: &[],
        index_datas: &[],
        owned_ref: UsageMapRef::new(3, 0),
        free_ref: UsageMapRef::new(3, 1),
    };
    let tdef_bytes = serialize_tdef(&def, format).unwrap();
    assert!(tdef_bytes.len() <= ps - 8, "fixture tdef must fit one page");
    let mut p2 = vec![0u8; ps];
    p2[0] = PAGE_TYPE_TABLE_DEF;
    p2[1] = PAGE_MARKER;
    LittleEndian::write_i32(&mut p2[4..8], INVALID_PAGE_NUMBER);
    p2[8..8 + tdef_bytes.len()].copy_from_slice(&tdef_bytes);

    let mut f = std::fs::File::create(path).unwrap();
    for page in [&p0, &p1, &p2, &p3, &p4] {
        f.write_all(page).unwrap();
    }
    f.flush().unwrap();
}

#[test]
fn scenario_e_v3_reads_succeed_writes_fail() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.mdb");
    build_v3_fixture(&path);

    let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
    assert!(db.is_read_only());
    assert_eq!(db.format_info().page_size, 2048);
    assert!(db.table_names().is_empty());

    // reads work: the catalog rows are there
    let mut cat = db.table(CATALOG_TABLE_NAME).unwrap();
    let mut cursor = cat.cursor();
    let mut names = Vec::new();
    while cursor.move_to_next_row(&mut cat).unwrap() {
        let row = cursor.current_row(&mut cat, None).unwrap();
        if let Value::Text(name) = &row[2].1 {
            names.push(name.clone());
        }
    }
    assert_eq!(
        names,
        vec![TABLES_PARENT_NAME.to_string(), CATALOG_TABLE_NAME.to_string()]
    );

    // writes surface the read-only-format condition
    let err = db.create_table("New", people_columns(), &[]);
    assert!(matches!(err, Err(JetError::Unsupported(_))));
    let err = cat_insert_probe(&mut db);
    assert!(matches!(err, Err(JetError::Unsupported(_))));
}

fn cat_insert_probe(db: &mut Database) -> Result<(), JetError> {
    let now = chrono::NaiveDate::from_ymd_opt(2002, 3, 4)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    let mut cat = db.table(CATALOG_TABLE_NAME)?;
    cat.insert_row(&catalog::catalog_row(1, "Probe", OBJECT_TYPE_TABLE, 9, now))
        .map(|_| ())
}

// ── Scenario F: the column-count limit ──────────────────────────────

#[test]
fn scenario_f_column_limit_leaves_file_untouched() {
    let dir = TempDir::new().unwrap();
    let (path, mut db) = new_db(&dir, "f.mdb");

    let wide: Vec<Column> = (0..255)
        .map(|i| Column::new(&format!("c{}", i), DataType::Long))
        .collect();
    db.create_table("Wide", wide, &[]).unwrap();
    db.flush().unwrap();

    let size_before = std::fs::metadata(&path).unwrap().len();
    let too_wide: Vec<Column> = (0..256)
        .map(|i| Column::new(&format!("c{}", i), DataType::Long))
        .collect();
    let err = db.create_table("TooWide", too_wide, &[]);
    assert!(matches!(err, Err(JetError::Constraint(_))));
    db.flush().unwrap();
    assert_eq!(std::fs::metadata(&path).unwrap().len(), size_before);
}

// ── Modification-counter convergence ────────────────────────────────

#[test]
fn concurrent_insert_converges_without_skips_or_repeats() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "conv.mdb");
    db.create_table("People", people_columns(), &[]).unwrap();
    let mut people = db.table("People").unwrap();
    for i in 1..=20 {
        people
            .insert_row(&[Value::Long(i), Value::Text("x".into())])
            .unwrap();
    }

    let mut walker = people.cursor();
    let mut seen = Vec::new();
    // read half, mutate through a second cursor path, then continue
    for _ in 0..10 {
        assert!(walker.move_to_next_row(&mut people).unwrap());
        match walker.current_row(&mut people, None).unwrap()[0].1 {
            Value::Long(v) => seen.push(v),
            _ => unreachable!(),
        }
    }
    people
        .insert_row(&[Value::Long(21), Value::Text("x".into())])
        .unwrap();
    while walker.move_to_next_row(&mut people).unwrap() {
        match walker.current_row(&mut people, None).unwrap()[0].1 {
            Value::Long(v) => seen.push(v),
            _ => unreachable!(),
        }
    }

    let expected: Vec<i32> = (1..=21).collect();
    assert_eq!(seen, expected);
}

// ── Index-driven range and find across a reopen ─────────────────────

#[test]
fn index_range_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let (path, mut db) = new_db(&dir, "range.mdb");
    db.create_table("People", people_columns(), &[IndexSpec::simple("ById", "Id")])
        .unwrap();
    {
        let mut people = db.table("People").unwrap();
        for i in [5, 1, 9, 3, 7] {
            people
                .insert_row(&[Value::Long(i), Value::Text(format!("p{}", i))])
                .unwrap();
        }
        db.close().unwrap();
    }

    let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
    let mut people = db.table("People").unwrap();
    let mut cursor = Cursor::index_range(
        people.table,
        "ById",
        Some((&[Value::Long(3)], true)),
        Some((&[Value::Long(7)], true)),
    )
    .unwrap();
    let mut got = Vec::new();
    while cursor.move_to_next_row(&mut people).unwrap() {
        match cursor.current_row(&mut people, None).unwrap()[0].1 {
            Value::Long(v) => got.push(v),
            _ => unreachable!(),
        }
    }
    assert_eq!(got, vec![3, 5, 7]);
}

// ── Relationships round trip ────────────────────────────────────────

#[test]
fn relationships_resolve_from_system_rows() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "rel.mdb");
    {
        let mut rels = db.table(RELATIONSHIPS_TABLE_NAME).unwrap();
        for (icolumn, from_col, to_col) in [(0i16, "CustomerId", "Id"), (1, "Region", "Region")] {
            rels.insert_row(&[
                Value::Text("OrdersCustomers".into()),
                Value::Text("Orders".into()),
                Value::Text(from_col.into()),
                Value::Text("Customers".into()),
                Value::Text(to_col.into()),
                Value::Int(2),
                Value::Int(icolumn),
                Value::Long(catalog::REL_FLAG_CASCADE_DELETES),
            ])
            .unwrap();
        }
    }

    let rels = db.relationships().unwrap();
    assert_eq!(rels.len(), 1);
    let rel = &rels[0];
    assert_eq!(rel.name, "OrdersCustomers");
    assert_eq!(rel.from_table, "Orders");
    assert_eq!(rel.to_table, "Customers");
    assert_eq!(rel.from_columns, vec!["CustomerId", "Region"]);
    assert_eq!(rel.to_columns, vec!["Id", "Region"]);
    assert!(rel.cascades_deletes());
    assert!(rel.has_integrity());
}

// ── Memo content through a reopen ───────────────────────────────────

#[test]
fn long_values_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let (path, mut db) = new_db(&dir, "memo.mdb");
    db.create_table(
        "Docs",
        vec![
            Column::new("Id", DataType::Long),
            Column::new("Body", DataType::Memo),
        ],
        &[],
    )
    .unwrap();
    let body = "paragraph ".repeat(2000);
    {
        let mut docs = db.table("Docs").unwrap();
        docs.insert_row(&[Value::Long(1), Value::Text(body.clone())])
            .unwrap();
        db.close().unwrap();
    }

    let mut db = Database::open(&path, DatabaseConfig::default()).unwrap();
    let mut docs = db.table("Docs").unwrap();
    let mut cursor = docs.cursor();
    assert!(cursor.move_to_next_row(&mut docs).unwrap());
    assert_eq!(
        cursor.current_row(&mut docs, None).unwrap()[1].1,
        Value::Text(body)
    );
}

// ── Projection set on reads ─────────────────────────────────────────

#[test]
fn projection_restricts_returned_columns() {
    let dir = TempDir::new().unwrap();
    let (_path, mut db) = new_db(&dir, "proj.mdb");
    db.create_table("People", people_columns(), &[]).unwrap();
    let mut people = db.table("People").unwrap();
    people
        .insert_row(&[Value::Long(1), Value::Text("only-name".into())])
        .unwrap();

    let mut wanted = HashSet::new();
    wanted.insert("Name".to_string());
    let mut cursor = people.cursor();
    assert!(cursor.move_to_next_row(&mut people).unwrap());
    let row = cursor.current_row(&mut people, Some(&wanted)).unwrap();
    assert_eq!(row.len(), 1);
    assert_eq!(row[0].1, Value::Text("only-name".into()));
}
