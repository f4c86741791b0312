use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::thread;
use std::time::Duration;

use super::*;
use crate::file::{FileHeader, HEADER_SLOT_SIZE};
use crate::record::{
    ColumnDef, DataType, LinkPolicy, RecordError, RowKey, Schema, TableSchema, Timestamp, Value,
};
use tempfile::TempDir;

fn setup_test_dir() -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("test.tdb");
    (temp_dir, path)
}

fn item_schema(version: u64) -> Schema {
    Schema::new(version).with_table(TableSchema::new(
        "Item",
        vec![
            ColumnDef::new("name", DataType::String),
            ColumnDef::new("qty", DataType::Int),
        ],
    ))
}

fn add_item(db: &Database, name: &str, qty: i64) -> RowKey {
    db.write(|txn| txn.create_row("Item", vec![Value::from(name), Value::Int(qty)]))
        .unwrap()
}

fn pet_schema() -> Schema {
    Schema::new(1)
        .with_table(TableSchema::new("Person", vec![ColumnDef::new("name", DataType::String)]))
        .with_table(TableSchema::new(
            "Dog",
            vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::link("owner", "Person"),
            ],
        ))
        .with_table(TableSchema::new(
            "Collar",
            vec![ColumnDef::link("dog", "Dog").on_delete(LinkPolicy::Cascade)],
        ))
        .with_table(TableSchema::new(
            "Vet",
            vec![ColumnDef::link("patient", "Dog").on_delete(LinkPolicy::Forbid)],
        ))
        .with_table(TableSchema::new("Pack", vec![ColumnDef::link_list("dogs", "Dog")]))
        .with_table(TableSchema::new(
            "License",
            vec![ColumnDef::link("dog", "Dog").required()],
        ))
}

#[test]
fn test_create_write_and_reopen() {
    let (_temp, path) = setup_test_dir();
    {
        let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
        assert_eq!(db.path(), Some(path.as_path()));
        add_item(&db, "apple", 3);
        add_item(&db, "pear", 5);
    }

    let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    let read = db.begin_read();
    assert_eq!(read.row_count("Item").unwrap(), 2);
    assert_eq!(read.schema().version(), 1);
    let names: Vec<Value> = read
        .keys("Item")
        .unwrap()
        .into_iter()
        .map(|k| read.get("Item", k, "name").unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("apple"), Value::from("pear")]);
}

#[test]
fn test_value_types_survive_reopen() {
    let (_temp, path) = setup_test_dir();
    let schema = Schema::new(1).with_table(TableSchema::new(
        "Thing",
        vec![
            ColumnDef::new("i", DataType::Int),
            ColumnDef::new("b", DataType::Bool),
            ColumnDef::new("f", DataType::Float),
            ColumnDef::new("d", DataType::Double),
            ColumnDef::new("s", DataType::String),
            ColumnDef::new("long", DataType::String),
            ColumnDef::new("bin", DataType::Binary),
            ColumnDef::new("ts", DataType::Timestamp),
            ColumnDef::new("opt", DataType::Int).nullable(),
            ColumnDef::link("next", "Thing"),
            ColumnDef::link_list("all", "Thing"),
        ],
    ));

    let first_values = vec![
        Value::Int(-42),
        Value::Bool(true),
        Value::Float(1.5),
        Value::Double(-2.25),
        Value::from("héllo"),
        Value::from("x".repeat(5000)),
        Value::Binary((0..=255).collect()),
        Value::Timestamp(Timestamp::new(1_700_000_000, 123)),
        Value::Null,
        Value::Null,
        Value::LinkList(Vec::new()),
    ];
    let (first, second_values) = {
        let db = Database::open(Config::new(&path).with_schema(schema.clone())).unwrap();
        let first = db.write(|txn| txn.create_row("Thing", first_values.clone())).unwrap();
        let second_values = vec![
            Value::Int(i64::MAX),
            Value::Bool(false),
            Value::Float(0.0),
            Value::Double(f64::MIN_POSITIVE),
            Value::from(""),
            Value::from(""),
            Value::Binary(Vec::new()),
            Value::Timestamp(Timestamp::new(-5, 0)),
            Value::Int(7),
            Value::Link(first),
            Value::LinkList(vec![first]),
        ];
        db.write(|txn| txn.create_row("Thing", second_values.clone())).unwrap();
        (first, second_values)
    };

    let db = Database::open(Config::new(&path).with_schema(schema)).unwrap();
    let read = db.begin_read();
    let keys = read.keys("Thing").unwrap();
    assert_eq!(keys.len(), 2);
    assert_eq!(keys[0], first);
    assert_eq!(read.row("Thing", keys[0]).unwrap().values(), first_values.as_slice());
    assert_eq!(read.row("Thing", keys[1]).unwrap().values(), second_values.as_slice());
    assert_eq!(read.link_list("Thing", keys[1], "all").unwrap(), vec![first]);
}

#[test]
fn test_typed_handles() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let key = add_item(&db, "apple", 3);

    let qty = db.latest().column_handle::<i64>("Item", "qty").unwrap();
    assert_eq!(db.latest().get_typed(&qty, key).unwrap(), 3);
    db.write(|txn| txn.set_typed(&qty, key, 10)).unwrap();
    assert_eq!(db.latest().get_typed(&qty, key).unwrap(), 10);

    // The handle type is checked once, when it is resolved
    assert!(db.latest().column_handle::<String>("Item", "qty").is_err());
    assert!(db.latest().column_handle::<i64>("Item", "missing").is_err());
}

#[test]
fn test_typed_handle_goes_stale_after_column_removal() {
    let schema = Schema::new(1).with_table(TableSchema::new(
        "Note",
        vec![
            ColumnDef::new("a", DataType::String),
            ColumnDef::new("b", DataType::String),
            ColumnDef::new("c", DataType::String),
        ],
    ));
    let db = Database::open(Config::in_memory().with_schema(schema)).unwrap();
    let key = db
        .write(|txn| txn.create_row("Note", vec![Value::from("a0"), Value::from("b0"), Value::from("c0")]))
        .unwrap();
    let b = db.latest().column_handle::<String>("Note", "b").unwrap();

    db.write(|txn| txn.remove_column("Note", "a")).unwrap();

    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.set_typed(&b, key, "through-b".to_string()),
        Err(DatabaseError::Record(RecordError::ColumnNotFound { .. }))
    ));
    txn.rollback().unwrap();
    assert!(matches!(
        db.latest().get_typed(&b, key),
        Err(DatabaseError::Record(RecordError::ColumnNotFound { .. }))
    ));
    assert_eq!(db.latest().get("Note", key, "c").unwrap(), Value::from("c0"));

    // Resolving again finds the column at its new position
    let b = db.latest().column_handle::<String>("Note", "b").unwrap();
    db.write(|txn| txn.set_typed(&b, key, "through-b".to_string())).unwrap();
    assert_eq!(db.latest().get("Note", key, "b").unwrap(), Value::from("through-b"));
    assert_eq!(db.latest().get("Note", key, "c").unwrap(), Value::from("c0"));
}

#[test]
fn test_type_and_null_checks() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let key = add_item(&db, "apple", 3);

    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.set("Item", key, "qty", "three"),
        Err(DatabaseError::Record(RecordError::TypeMismatch { .. }))
    ));
    assert!(matches!(
        txn.set("Item", key, "qty", Value::Null),
        Err(DatabaseError::Record(RecordError::NullConstraintViolation(_)))
    ));
    assert!(matches!(
        txn.set("Item", key, "weight", 1),
        Err(DatabaseError::Record(RecordError::ColumnNotFound { .. }))
    ));
    assert!(matches!(
        txn.insert_row("Missing"),
        Err(DatabaseError::Record(RecordError::TableNotFound(_)))
    ));
    txn.rollback().unwrap();
    assert_eq!(db.latest().get("Item", key, "qty").unwrap(), Value::Int(3));
}

#[test]
fn test_commit_publishes_new_version() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let before = db.latest_version();

    let mut txn = db.begin_write().unwrap();
    assert_eq!(txn.base_version(), before);
    let key = txn.insert_row("Item").unwrap();
    txn.set("Item", key, "name", "pending").unwrap();

    // Uncommitted changes are visible to the writer only
    assert_eq!(txn.row_count("Item").unwrap(), 1);
    assert_eq!(db.begin_read().row_count("Item").unwrap(), 0);

    let version = txn.commit().unwrap();
    assert!(version > before);
    assert_eq!(txn.state(), TransactionState::Committed);
    assert_eq!(db.latest_version(), version);
    assert_eq!(db.begin_read().row_count("Item").unwrap(), 1);
}

#[test]
fn test_empty_commit_keeps_version() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let before = db.latest_version();
    let mut txn = db.begin_write().unwrap();
    assert_eq!(txn.commit().unwrap(), before);
    assert_eq!(db.latest_version(), before);
}

#[test]
fn test_rollback_and_closed_transaction() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let before = db.latest_version();

    let mut txn = db.begin_write().unwrap();
    txn.insert_row("Item").unwrap();
    txn.rollback().unwrap();
    assert_eq!(txn.state(), TransactionState::RolledBack);
    assert!(matches!(txn.insert_row("Item"), Err(DatabaseError::NotInTransaction)));
    assert!(matches!(txn.commit(), Err(DatabaseError::NotInTransaction)));
    assert!(matches!(txn.rollback(), Err(DatabaseError::NotInTransaction)));
    assert_eq!(db.latest_version(), before);
    assert_eq!(db.latest().row_count("Item").unwrap(), 0);

    let mut txn = db.begin_write().unwrap();
    txn.insert_row("Item").unwrap();
    txn.commit().unwrap();
    assert!(matches!(txn.insert_row("Item"), Err(DatabaseError::NotInTransaction)));
}

#[test]
fn test_drop_aborts_and_releases_writer() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    {
        let mut txn = db.begin_write().unwrap();
        txn.insert_row("Item").unwrap();
    }
    assert_eq!(db.latest().row_count("Item").unwrap(), 0);

    // The slot is free again
    let mut txn = db.try_begin_write().unwrap();
    txn.insert_row("Item").unwrap();
    txn.commit().unwrap();
    assert_eq!(db.latest().row_count("Item").unwrap(), 1);
}

#[test]
fn test_write_closure_rolls_back_on_error() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let result: DatabaseResult<()> = db.write(|txn| {
        txn.insert_row("Item")?;
        Err(DatabaseError::InvalidConfig("abandon".to_string()))
    });
    assert!(result.is_err());
    assert_eq!(db.latest().row_count("Item").unwrap(), 0);
}

#[test]
fn test_single_writer() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let txn = db.begin_write().unwrap();
    assert!(matches!(db.try_begin_write(), Err(DatabaseError::WouldBlock)));
    drop(txn);
    assert!(db.try_begin_write().is_ok());
}

#[test]
fn test_writer_timeout() {
    let config = Config::in_memory()
        .with_schema(item_schema(1))
        .with_writer_timeout(Duration::from_millis(50));
    let db = Database::open(config).unwrap();
    let _txn = db.begin_write().unwrap();

    let other = db.clone();
    let waited = thread::spawn(move || other.begin_write().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(waited, Err(DatabaseError::WouldBlock)));

    // Compaction needs the slot too
    assert!(matches!(db.compact(), Err(DatabaseError::WouldBlock)));
}

#[test]
fn test_blocked_writer_sees_previous_commit() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let mut first = db.begin_write().unwrap();
    first.create_row("Item", vec![Value::from("first"), Value::Int(1)]).unwrap();

    let (started_tx, started_rx) = channel();
    let other = db.clone();
    let second = thread::spawn(move || {
        started_tx.send(()).unwrap();
        let mut txn = other.begin_write().unwrap();
        let base = txn.base_version();
        let seen = txn.row_count("Item").unwrap();
        txn.create_row("Item", vec![Value::from("second"), Value::Int(2)]).unwrap();
        txn.commit().unwrap();
        (base, seen)
    });

    started_rx.recv().unwrap();
    thread::sleep(Duration::from_millis(20));
    let committed = first.commit().unwrap();

    let (base, seen) = second.join().unwrap();
    assert_eq!(base, committed);
    assert_eq!(seen, 1);
    assert_eq!(db.latest().row_count("Item").unwrap(), 2);
}

#[test]
fn test_snapshot_stable_under_commits() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let key = add_item(&db, "pinned", 1);
    let read = db.begin_read();
    let version = read.version();

    let (committed_tx, committed_rx) = channel();
    let (checked_tx, checked_rx) = channel::<()>();
    let writer = {
        let db = db.clone();
        thread::spawn(move || {
            for i in 0..100 {
                db.write(|txn| {
                    txn.set("Item", key, "qty", i)?;
                    txn.create_row("Item", vec![Value::from("more"), Value::Int(i)])
                })
                .unwrap();
                committed_tx.send(db.latest_version()).unwrap();
                checked_rx.recv().unwrap();
            }
        })
    };

    // Check the pinned snapshot after every commit, before the next one
    let mut last = version;
    for i in 0..100 {
        let committed = committed_rx.recv().unwrap();
        assert!(committed > last);
        last = committed;
        assert_eq!(db.latest().get("Item", key, "qty").unwrap(), Value::Int(i));
        assert_eq!(read.version(), version);
        assert_eq!(read.row_count("Item").unwrap(), 1);
        assert_eq!(read.get("Item", key, "qty").unwrap(), Value::Int(1));
        checked_tx.send(()).unwrap();
    }
    writer.join().unwrap();

    assert_eq!(read.row_count("Item").unwrap(), 1);
    assert_eq!(db.latest().row_count("Item").unwrap(), 101);
    assert_eq!(db.latest().get("Item", key, "qty").unwrap(), Value::Int(99));
}

#[test]
fn test_begin_read_at_retained_version() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    add_item(&db, "a", 1);
    let pinned = db.begin_read();
    let old = pinned.version();
    add_item(&db, "b", 2);
    add_item(&db, "c", 3);

    let again = db.begin_read_at(old).unwrap();
    assert_eq!(again.version(), old);
    assert_eq!(again.row_count("Item").unwrap(), 1);
    let latest = db.begin_read_at(db.latest_version()).unwrap();
    assert_eq!(latest.row_count("Item").unwrap(), 3);

    // Once nothing pins it, an old version goes away
    pinned.close();
    drop(again);
    for i in 0..3 {
        db.wait_for_notifications();
        add_item(&db, "more", i);
    }
    assert!(matches!(
        db.begin_read_at(old),
        Err(DatabaseError::File(crate::file::FileError::VersionUnavailable(_)))
    ));
}

#[test]
fn test_crash_before_publish_keeps_previous_version() {
    let (_temp, path) = setup_test_dir();
    let committed = {
        let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
        add_item(&db, "kept", 1);
        let committed = db.latest_version();

        db.store().fail_next_publish();
        let result = db.write(|txn| txn.create_row("Item", vec![Value::from("lost"), Value::Int(2)]));
        assert!(matches!(result, Err(DatabaseError::CommitFailed(_))));
        assert_eq!(db.latest_version(), committed);
        assert_eq!(db.latest().row_count("Item").unwrap(), 1);
        committed
    };

    let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    assert_eq!(db.latest_version(), committed);
    let read = db.begin_read();
    assert_eq!(read.row_count("Item").unwrap(), 1);
    let key = read.keys("Item").unwrap()[0];
    assert_eq!(read.get("Item", key, "name").unwrap(), Value::from("kept"));

    // The file is still writable
    add_item(&db, "after", 3);
    assert_eq!(db.latest().row_count("Item").unwrap(), 2);
}

#[test]
fn test_out_of_space_keeps_previous_version() {
    let schema = Schema::new(1).with_table(TableSchema::new(
        "Blob",
        vec![ColumnDef::new("data", DataType::Binary)],
    ));
    let db = Database::open(
        Config::in_memory()
            .with_schema(schema)
            .with_max_file_size(512 * 1024),
    )
    .unwrap();
    let before = db.latest_version();

    let result = db.write(|txn| txn.create_row("Blob", vec![Value::Binary(vec![7; 2 * 1024 * 1024])]));
    let Err(err) = result else {
        panic!("oversized commit succeeded");
    };
    assert!(matches!(
        err,
        DatabaseError::File(crate::file::FileError::OutOfSpace { .. })
            | DatabaseError::Record(RecordError::File(crate::file::FileError::OutOfSpace { .. }))
    ));
    assert_eq!(db.latest_version(), before);

    db.write(|txn| txn.create_row("Blob", vec![Value::Binary(vec![1, 2, 3])]))
        .unwrap();
    assert_eq!(db.latest().row_count("Blob").unwrap(), 1);
}

fn corrupt_newest_root(path: &Path) {
    let mut bytes = std::fs::read(path).unwrap();
    let newest = [
        FileHeader::decode(&bytes[..HEADER_SLOT_SIZE]),
        FileHeader::decode(&bytes[HEADER_SLOT_SIZE..HEADER_SLOT_SIZE * 2]),
    ]
    .into_iter()
    .flatten()
    .max_by_key(|h| h.version)
    .unwrap();
    let root = newest.root.unwrap();
    let at = root.page as usize * newest.page_size as usize + 12;
    bytes[at] ^= 0xff;
    std::fs::write(path, bytes).unwrap();
}

#[test]
fn test_open_with_recovery() {
    let (_temp, path) = setup_test_dir();
    let previous = {
        let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
        add_item(&db, "a", 1);
        let previous = db.latest_version();
        add_item(&db, "b", 2);
        previous
    };
    corrupt_newest_root(&path);

    let err = Database::open(Config::new(&path)).unwrap_err();
    assert!(err.is_corruption());

    let db = Database::open_with_recovery(Config::new(&path)).unwrap();
    assert_eq!(db.latest_version(), previous);
    assert_eq!(db.latest().row_count("Item").unwrap(), 1);
}

#[test]
fn test_invalid_config() {
    let bad_page = Database::open(Config::in_memory().with_page_size(1000));
    assert!(matches!(bad_page, Err(DatabaseError::InvalidConfig(_))));

    let small_page = Database::open(Config::in_memory().with_page_size(512));
    assert!(matches!(small_page, Err(DatabaseError::InvalidConfig(_))));

    let no_cache = Database::open(Config::in_memory().with_cache_size(0));
    assert!(matches!(no_cache, Err(DatabaseError::InvalidConfig(_))));

    let memory_read_only = Database::open(Config::in_memory().read_only());
    assert!(matches!(memory_read_only, Err(DatabaseError::InvalidConfig(_))));

    let dangling = Schema::new(1).with_table(TableSchema::new(
        "Dog",
        vec![ColumnDef::link("owner", "Nobody")],
    ));
    let result = Database::open(Config::in_memory().with_schema(dangling));
    assert!(matches!(result, Err(DatabaseError::Record(RecordError::InvalidSchema(_)))));
}

#[test]
fn test_read_only() {
    let (_temp, path) = setup_test_dir();
    let missing = Database::open(Config::new(&path).read_only());
    assert!(matches!(
        missing,
        Err(DatabaseError::File(crate::file::FileError::FileNotFound(_)))
    ));

    {
        let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
        add_item(&db, "a", 1);
    }
    let db = Database::open(Config::new(&path).with_schema(item_schema(1)).read_only()).unwrap();
    assert_eq!(db.latest().row_count("Item").unwrap(), 1);
    assert!(matches!(db.begin_write(), Err(DatabaseError::ReadOnly)));
    assert!(matches!(db.compact(), Err(DatabaseError::ReadOnly)));
}

#[test]
fn test_primary_keys() {
    let schema = Schema::new(1).with_table(
        TableSchema::new(
            "User",
            vec![
                ColumnDef::new("email", DataType::String),
                ColumnDef::new("age", DataType::Int),
            ],
        )
        .with_primary_key("email"),
    );
    let db = Database::open(Config::in_memory().with_schema(schema)).unwrap();
    let ann = db
        .write(|txn| txn.insert_row_with_primary_key("User", "ann@example.com"))
        .unwrap();
    assert_eq!(
        db.latest().find_by_primary_key("User", "ann@example.com").unwrap(),
        Some(ann)
    );
    assert_eq!(db.latest().find_by_primary_key("User", "bob@example.com").unwrap(), None);

    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.insert_row_with_primary_key("User", "ann@example.com"),
        Err(DatabaseError::Record(RecordError::DuplicatePrimaryKey { .. }))
    ));
    assert!(matches!(
        txn.insert_row("User"),
        Err(DatabaseError::Record(RecordError::PrimaryKeyRequired(_)))
    ));
    assert!(matches!(
        txn.set("User", ann, "email", "new@example.com"),
        Err(DatabaseError::Record(RecordError::PrimaryKeyImmutable(_)))
    ));
    txn.set("User", ann, "age", 30).unwrap();
    txn.commit().unwrap();

    // A deleted key can be used again
    db.write(|txn| txn.delete_row("User", ann)).unwrap();
    let again = db
        .write(|txn| txn.insert_row_with_primary_key("User", "ann@example.com"))
        .unwrap();
    assert_ne!(again, ann);

    assert!(matches!(
        db.latest().find_by_primary_key("Missing", 1),
        Err(DatabaseError::Record(RecordError::TableNotFound(_)))
    ));
}

#[test]
fn test_insert_or_update_by_primary_key() {
    let schema = Schema::new(1)
        .with_table(
            TableSchema::new(
                "User",
                vec![
                    ColumnDef::new("email", DataType::String),
                    ColumnDef::new("age", DataType::Int),
                    ColumnDef::new("city", DataType::String),
                ],
            )
            .with_primary_key("email"),
        )
        .with_table(TableSchema::new("Log", vec![ColumnDef::new("line", DataType::String)]));
    let db = Database::open(Config::in_memory().with_schema(schema)).unwrap();
    let row = |email: &str, age: i64, city: &str| vec![Value::from(email), Value::Int(age), Value::from(city)];

    let ann = db.write(|txn| txn.insert_or_update("User", row("ann", 30, "Oslo"))).unwrap();
    let bob = db.write(|txn| txn.insert_or_update("User", row("bob", 40, "Rome"))).unwrap();
    assert_ne!(ann, bob);

    let updated = db.write(|txn| txn.insert_or_update("User", row("ann", 31, "Oslo"))).unwrap();
    assert_eq!(updated, ann);
    let read = db.begin_read();
    assert_eq!(read.row_count("User").unwrap(), 2);
    assert_eq!(read.row("User", ann).unwrap().values(), row("ann", 31, "Oslo").as_slice());
    assert_eq!(read.row("User", bob).unwrap().values(), row("bob", 40, "Rome").as_slice());

    // Writing identical values changes nothing
    let before = db.latest_version();
    db.write(|txn| txn.insert_or_update("User", row("ann", 31, "Oslo"))).unwrap();
    assert_eq!(db.latest_version(), before);

    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.insert_or_update("Log", vec![Value::from("x")]),
        Err(DatabaseError::Record(RecordError::InvalidSchema(_)))
    ));
    assert!(matches!(
        txn.insert_or_update("User", vec![Value::from("ann"), Value::Int(1)]),
        Err(DatabaseError::Record(RecordError::InvalidSchema(_)))
    ));
    assert!(matches!(
        txn.insert_or_update("User", vec![Value::from("ann"), Value::from("old"), Value::from("Oslo")]),
        Err(DatabaseError::Record(RecordError::TypeMismatch { .. }))
    ));
    txn.rollback().unwrap();
    assert_eq!(db.latest().get("User", ann, "age").unwrap(), Value::Int(31));
}

#[test]
fn test_row_keys_are_stable() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let a = add_item(&db, "a", 1);
    let b = add_item(&db, "b", 2);
    db.write(|txn| txn.delete_row("Item", a)).unwrap();
    let c = add_item(&db, "c", 3);

    assert!(c > b);
    let read = db.begin_read();
    assert!(!read.is_valid("Item", a));
    assert_eq!(read.keys("Item").unwrap(), vec![b, c]);
    assert!(matches!(
        read.get("Item", a, "name"),
        Err(DatabaseError::Record(RecordError::InvalidRowKey { .. }))
    ));
    assert!(matches!(
        db.write(|txn| txn.delete_row("Item", a)),
        Err(DatabaseError::Record(RecordError::InvalidRowKey { .. }))
    ));
}

#[test]
fn test_links_and_backlinks() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let (ann, rex) = db
        .write(|txn| {
            let ann = txn.create_row("Person", vec![Value::from("ann")])?;
            let rex = txn.create_row("Dog", vec![Value::from("rex"), Value::Link(ann)])?;
            let pack = txn.insert_row("Pack")?;
            txn.add_link("Pack", pack, "dogs", rex)?;
            txn.create_row("Collar", vec![Value::Link(rex)])?;
            Ok((ann, rex))
        })
        .unwrap();

    let read = db.begin_read();
    let backlinks = read.backlinks("Dog", rex).unwrap();
    let mut sources: Vec<(&str, &str)> = backlinks
        .iter()
        .map(|b| (b.table.as_str(), b.column.as_str()))
        .collect();
    sources.sort();
    assert_eq!(sources, vec![("Collar", "dog"), ("Pack", "dogs")]);
    assert_eq!(read.backlinks("Person", ann).unwrap().len(), 1);

    // Links must point at live rows of the right table
    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.set("Dog", rex, "owner", Value::Link(RowKey(99))),
        Err(DatabaseError::Record(RecordError::InvalidLink { .. }))
    ));
    let pack = txn.keys("Pack").unwrap()[0];
    assert!(txn.remove_link("Pack", pack, "dogs", rex).unwrap());
    assert!(!txn.remove_link("Pack", pack, "dogs", rex).unwrap());
    assert!(txn.link_list("Pack", pack, "dogs").unwrap().is_empty());
}

#[test]
fn test_delete_nullifies_links() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let (ann, rex, pack) = db
        .write(|txn| {
            let ann = txn.create_row("Person", vec![Value::from("ann")])?;
            let rex = txn.create_row("Dog", vec![Value::from("rex"), Value::Link(ann)])?;
            let fido = txn.create_row("Dog", vec![Value::from("fido"), Value::Null])?;
            let pack = txn.create_row("Pack", vec![Value::LinkList(vec![rex, fido, rex])])?;
            Ok((ann, rex, pack))
        })
        .unwrap();

    db.write(|txn| txn.delete_row("Person", ann)).unwrap();
    assert_eq!(db.latest().get("Dog", rex, "owner").unwrap(), Value::Null);

    db.write(|txn| txn.delete_row("Dog", rex)).unwrap();
    let remaining = db.latest().link_list("Pack", pack, "dogs").unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(!remaining.contains(&rex));
}

#[test]
fn test_delete_cascades() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let rex = db
        .write(|txn| {
            let rex = txn.create_row("Dog", vec![Value::from("rex"), Value::Null])?;
            txn.create_row("Collar", vec![Value::Link(rex)])?;
            txn.create_row("Collar", vec![Value::Link(rex)])?;
            txn.create_row("Collar", vec![Value::Null])?;
            Ok(rex)
        })
        .unwrap();

    db.write(|txn| txn.delete_row("Dog", rex)).unwrap();
    let read = db.begin_read();
    assert_eq!(read.row_count("Dog").unwrap(), 0);
    assert_eq!(read.row_count("Collar").unwrap(), 1);
}

#[test]
fn test_delete_forbidden_while_linked() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let (rex, vet) = db
        .write(|txn| {
            let rex = txn.create_row("Dog", vec![Value::from("rex"), Value::Null])?;
            let vet = txn.create_row("Vet", vec![Value::Link(rex)])?;
            Ok((rex, vet))
        })
        .unwrap();

    let result = db.write(|txn| txn.delete_row("Dog", rex));
    assert!(matches!(
        result,
        Err(DatabaseError::Record(RecordError::LinkViolation { .. }))
    ));
    assert!(db.latest().is_valid("Dog", rex));

    db.write(|txn| {
        txn.set("Vet", vet, "patient", Value::Null)?;
        txn.delete_row("Dog", rex)
    })
    .unwrap();
    assert!(!db.latest().is_valid("Dog", rex));
}

#[test]
fn test_required_links() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let rex = db
        .write(|txn| txn.create_row("Dog", vec![Value::from("rex"), Value::Null]))
        .unwrap();

    // Unset at commit time
    let result = db.write(|txn| txn.insert_row("License"));
    assert!(matches!(
        result,
        Err(DatabaseError::Record(RecordError::NullConstraintViolation(_)))
    ));
    assert_eq!(db.latest().row_count("License").unwrap(), 0);

    let license = db
        .write(|txn| {
            let license = txn.insert_row("License")?;
            txn.set("License", license, "dog", Value::Link(rex))?;
            Ok(license)
        })
        .unwrap();

    // Nullifying a required link is not possible
    assert!(matches!(
        db.write(|txn| txn.delete_row("Dog", rex)),
        Err(DatabaseError::Record(RecordError::LinkViolation { .. }))
    ));
    db.write(|txn| {
        txn.delete_row("License", license)?;
        txn.delete_row("Dog", rex)
    })
    .unwrap();
}

#[test]
fn test_clear_table() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    db.write(|txn| {
        for name in ["rex", "fido", "spot"] {
            let dog = txn.create_row("Dog", vec![Value::from(name), Value::Null])?;
            txn.create_row("Collar", vec![Value::Link(dog)])?;
        }
        Ok(())
    })
    .unwrap();

    db.write(|txn| txn.clear_table("Dog")).unwrap();
    let read = db.begin_read();
    assert_eq!(read.row_count("Dog").unwrap(), 0);
    assert_eq!(read.row_count("Collar").unwrap(), 0);
}

#[test]
fn test_schema_changes_in_transaction() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let key = add_item(&db, "a", 1);

    db.write(|txn| {
        txn.add_column("Item", ColumnDef::new("price", DataType::Double))?;
        txn.rename_column("Item", "qty", "count")?;
        txn.add_index("Item", "name")?;
        txn.add_table(TableSchema::new("Tag", vec![ColumnDef::new("label", DataType::String)]))?;
        Ok(())
    })
    .unwrap();

    let read = db.begin_read();
    assert_eq!(read.get("Item", key, "price").unwrap(), Value::Double(0.0));
    assert_eq!(read.get("Item", key, "count").unwrap(), Value::Int(1));
    assert!(read.table_schema("Item").unwrap().columns()[0].indexed);
    assert!(read.table_names().contains(&"Tag"));

    let mut txn = db.begin_write().unwrap();
    assert!(matches!(
        txn.add_column("Item", ColumnDef::new("name", DataType::String)),
        Err(DatabaseError::Record(RecordError::DuplicateColumn { .. }))
    ));
    assert!(matches!(
        txn.add_index("Item", "price"),
        Err(DatabaseError::Record(RecordError::NotIndexable { .. }))
    ));
    txn.remove_column("Item", "price").unwrap();
    txn.remove_index("Item", "name").unwrap();
    txn.remove_table("Tag").unwrap();
    txn.commit().unwrap();

    let read = db.begin_read();
    assert_eq!(read.table_schema("Item").unwrap().column_count(), 2);
    assert!(!read.table_names().contains(&"Tag"));
}

#[test]
fn test_remove_linked_table_fails() {
    let db = Database::open(Config::in_memory().with_schema(pet_schema())).unwrap();
    let result = db.write(|txn| txn.remove_table("Person"));
    assert!(matches!(result, Err(DatabaseError::Record(RecordError::InvalidSchema(_)))));
    assert!(db.latest().table_names().contains(&"Person"));
}

fn person_v1() -> Schema {
    Schema::new(1).with_table(TableSchema::new(
        "Person",
        vec![ColumnDef::new("name", DataType::String)],
    ))
}

fn person_v2() -> Schema {
    Schema::new(2)
        .with_table(TableSchema::new(
            "Person",
            vec![
                ColumnDef::new("name", DataType::String),
                ColumnDef::new("age", DataType::Int),
            ],
        ))
        .with_table(TableSchema::new("Toy", vec![ColumnDef::new("label", DataType::String)]))
}

fn seed_people(path: &Path) {
    let db = Database::open(Config::new(path).with_schema(person_v1())).unwrap();
    db.write(|txn| {
        txn.create_row("Person", vec![Value::from("ann")])?;
        txn.create_row("Person", vec![Value::from("bob")])?;
        Ok(())
    })
    .unwrap();
}

#[test]
fn test_schema_mismatch_without_migration() {
    let (_temp, path) = setup_test_dir();
    seed_people(&path);

    let result = Database::open(Config::new(&path).with_schema(person_v2()));
    assert!(matches!(result, Err(DatabaseError::SchemaMismatch(_))));

    // Same version, different layout
    let mut same_version = person_v2();
    same_version.set_version(1);
    let result = Database::open(Config::new(&path).with_schema(same_version));
    assert!(matches!(result, Err(DatabaseError::SchemaMismatch(_))));

    let older = Schema::new(0).with_table(person_v1().tables()[0].clone());
    let result = Database::open(Config::new(&path).with_schema(older));
    assert!(matches!(result, Err(DatabaseError::SchemaMismatch(_))));

    // Nothing was changed by the failed opens
    let db = Database::open(Config::new(&path).with_schema(person_v1())).unwrap();
    assert_eq!(db.latest().row_count("Person").unwrap(), 2);
}

#[test]
fn test_migration_runs_once() {
    let (_temp, path) = setup_test_dir();
    seed_people(&path);

    let calls = Arc::new(Mutex::new(Vec::new()));
    let config = {
        let calls = Arc::clone(&calls);
        Config::new(&path)
            .with_schema(person_v2())
            .with_migration(move |txn, old, new| {
                calls.lock().push((old, new));
                txn.add_column("Person", ColumnDef::new("age", DataType::Int))?;
                for key in txn.keys("Person")? {
                    txn.set("Person", key, "age", 30)?;
                }
                Ok(())
            })
    };

    {
        let db = Database::open(config.clone()).unwrap();
        let read = db.begin_read();
        assert_eq!(read.schema().version(), 2);
        // Tables the migration did not create are added
        assert!(read.table_names().contains(&"Toy"));
        for key in read.keys("Person").unwrap() {
            assert_eq!(read.get("Person", key, "age").unwrap(), Value::Int(30));
        }
    }
    let db = Database::open(config).unwrap();
    assert_eq!(db.latest().row_count("Person").unwrap(), 2);
    assert_eq!(*calls.lock(), vec![(1, 2)]);
}

#[test]
fn test_failed_migration_keeps_old_schema() {
    let (_temp, path) = setup_test_dir();
    seed_people(&path);

    let config = Config::new(&path)
        .with_schema(person_v2())
        .with_migration(|txn, _, _| {
            txn.add_column("Person", ColumnDef::new("age", DataType::Int))?;
            Err(DatabaseError::InvalidConfig("not today".to_string()))
        });
    assert!(matches!(Database::open(config), Err(DatabaseError::MigrationFailed(_))));

    // A migration that leaves the wrong layout behind is rejected too
    let config = Config::new(&path)
        .with_schema(person_v2())
        .with_migration(|_, _, _| Ok(()));
    assert!(matches!(Database::open(config), Err(DatabaseError::SchemaMismatch(_))));

    let db = Database::open(Config::new(&path).with_schema(person_v1())).unwrap();
    assert_eq!(db.latest().schema().version(), 1);
    assert_eq!(db.latest().row_count("Person").unwrap(), 2);
}

#[test]
fn test_delete_if_migration_needed() {
    let (_temp, path) = setup_test_dir();
    seed_people(&path);

    // Matching schema keeps the data
    let db = Database::open(
        Config::new(&path)
            .with_schema(person_v1())
            .delete_if_migration_needed(),
    )
    .unwrap();
    assert_eq!(db.latest().row_count("Person").unwrap(), 2);
    drop(db);

    let db = Database::open(
        Config::new(&path)
            .with_schema(person_v2())
            .delete_if_migration_needed(),
    )
    .unwrap();
    let read = db.begin_read();
    assert_eq!(read.schema().version(), 2);
    assert_eq!(read.row_count("Person").unwrap(), 0);
    assert!(read.table_names().contains(&"Toy"));
}

#[test]
fn test_compact_shrinks_file() {
    let (_temp, path) = setup_test_dir();
    let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    let kept = add_item(&db, "kept", 1);
    db.write(|txn| {
        let filler = "f".repeat(2000);
        for i in 0..300 {
            txn.create_row("Item", vec![Value::from(filler.as_str()), Value::Int(i)])?;
        }
        Ok(())
    })
    .unwrap();
    db.write(|txn| {
        for key in txn.keys("Item")? {
            if key != kept {
                txn.delete_row("Item", key)?;
            }
        }
        Ok(())
    })
    .unwrap();
    add_item(&db, "after", 2);

    let pinned = db.begin_read();
    let version = db.latest_version();
    let before = db.store().file_size().unwrap();
    db.compact().unwrap();
    let after = db.store().file_size().unwrap();
    assert!(after < before, "compaction grew the file: {} -> {}", before, after);
    assert!(db.latest_version() > version);

    // Readers keep their version across the switch
    assert_eq!(pinned.row_count("Item").unwrap(), 2);
    assert_eq!(pinned.get("Item", kept, "name").unwrap(), Value::from("kept"));

    add_item(&db, "post", 3);
    drop(pinned);
    drop(db);

    let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    let read = db.begin_read();
    assert_eq!(read.row_count("Item").unwrap(), 3);
    assert_eq!(read.get("Item", kept, "name").unwrap(), Value::from("kept"));
}

#[test]
fn test_compact_on_open() {
    let (_temp, path) = setup_test_dir();
    {
        let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
        db.write(|txn| {
            let filler = "f".repeat(2000);
            for i in 0..100 {
                txn.create_row("Item", vec![Value::from(filler.as_str()), Value::Int(i)])?;
            }
            Ok(())
        })
        .unwrap();
        db.write(|txn| txn.clear_table("Item")).unwrap();
    }
    let before = std::fs::metadata(&path).unwrap().len();

    let seen = Arc::new(Mutex::new(None));
    let config = {
        let seen = Arc::clone(&seen);
        Config::new(&path)
            .with_schema(item_schema(1))
            .with_compact_on_open(move |file_bytes, used_bytes| {
                *seen.lock() = Some((file_bytes, used_bytes));
                true
            })
    };
    let db = Database::open(config).unwrap();
    let (file_bytes, used_bytes) = seen.lock().unwrap();
    assert_eq!(file_bytes, before);
    assert!(used_bytes <= file_bytes);
    assert!(db.store().file_size().unwrap() < before);
    assert_eq!(db.latest().row_count("Item").unwrap(), 0);
}

#[test]
fn test_write_copy_to() {
    let (temp, path) = setup_test_dir();
    let db = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    add_item(&db, "a", 1);
    add_item(&db, "b", 2);

    let copy_path = temp.path().join("copy.tdb");
    db.write_copy_to(&copy_path).unwrap();
    drop(db);

    let copy = Database::open(Config::new(&copy_path).with_schema(item_schema(1))).unwrap();
    let read = copy.begin_read();
    assert_eq!(read.row_count("Item").unwrap(), 2);
    let keys = read.keys("Item").unwrap();
    assert_eq!(read.get("Item", keys[0], "name").unwrap(), Value::from("a"));
    assert_eq!(read.get("Item", keys[1], "qty").unwrap(), Value::Int(2));

    // The copy is an ordinary, writable database
    add_item(&copy, "c", 3);
    drop(read);
    drop(copy);
    let copy = Database::open(Config::new(&copy_path).with_schema(item_schema(1))).unwrap();
    assert_eq!(copy.latest().row_count("Item").unwrap(), 3);
    let original = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    assert_eq!(original.latest().row_count("Item").unwrap(), 2);
}

#[test]
fn test_refresh_adopts_other_handle() {
    let (_temp, path) = setup_test_dir();
    let first = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    let second = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();

    add_item(&first, "a", 1);
    assert_eq!(second.latest().row_count("Item").unwrap(), 0);
    assert!(second.refresh().unwrap());
    assert_eq!(second.latest().row_count("Item").unwrap(), 1);
    assert!(!second.refresh().unwrap());

    // Starting a write picks up the other handle's commits first
    add_item(&first, "b", 2);
    let txn = second.begin_write().unwrap();
    assert_eq!(txn.row_count("Item").unwrap(), 2);
}

#[test]
fn test_write_after_partial_refresh_sees_adopted_version() {
    let (_temp, path) = setup_test_dir();
    let first = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    let second = Database::open(Config::new(&path).with_schema(item_schema(1))).unwrap();
    add_item(&first, "a", 1);

    // The store adopts the new header before any snapshot is published
    assert!(second.store().refresh().unwrap().is_some());
    assert_eq!(second.latest().row_count("Item").unwrap(), 0);

    let mut txn = second.begin_write().unwrap();
    assert_eq!(txn.base_version(), first.latest_version());
    assert_eq!(txn.row_count("Item").unwrap(), 1);
    txn.create_row("Item", vec![Value::from("b"), Value::Int(2)]).unwrap();
    txn.commit().unwrap();

    assert!(first.refresh().unwrap());
    let read = first.begin_read();
    assert_eq!(read.row_count("Item").unwrap(), 2);
    let names: Vec<Value> = read
        .keys("Item")
        .unwrap()
        .into_iter()
        .map(|k| read.get("Item", k, "name").unwrap())
        .collect();
    assert_eq!(names, vec![Value::from("a"), Value::from("b")]);
}

#[test]
fn test_publish_never_moves_backwards() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    let old = db.latest();
    add_item(&db, "a", 1);
    let current = db.latest_version();

    db.shared.publish(old, None);
    assert_eq!(db.latest_version(), current);
    assert_eq!(db.latest().row_count("Item").unwrap(), 1);
}

#[test]
fn test_stats() {
    let db = Database::open(Config::in_memory().with_schema(item_schema(1))).unwrap();
    add_item(&db, "a", 1);
    let stats = db.stats();
    assert_eq!(stats.version, db.latest_version());
    assert_eq!(stats.page_size, crate::file::DEFAULT_PAGE_SIZE);
    assert!(stats.page_count > 1);
    assert!(stats.pinned_versions >= 1);
}
