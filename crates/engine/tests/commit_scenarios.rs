//! End-to-end commit scenarios over in-memory databases.

use lattice_core::{
    ColumnInfo, ConstraintInfo, ConstraintKind, Error, SqlType, TableInfo, Value, ViolationKind,
};
use lattice_engine::{Database, DatabaseBuilder, DatabaseConfig, TriggerDef, TriggerOn};
use std::sync::Arc;
use std::time::Duration;

fn items_info(db: &Database) -> TableInfo {
    TableInfo::new(
        db.object_name("app.items"),
        vec![
            ColumnInfo::new("id", SqlType::Integer).not_null(),
            ColumnInfo::new("name", SqlType::varchar()),
        ],
        vec![ConstraintInfo::new(
            "pk_items",
            ConstraintKind::PrimaryKey {
                columns: vec!["id".into()],
            },
        )],
    )
    .unwrap()
}

fn simple_info(db: &Database, name: &str) -> TableInfo {
    TableInfo::new(
        db.object_name(name),
        vec![ColumnInfo::new("x", SqlType::Integer)],
        vec![],
    )
    .unwrap()
}

fn with_items(db: &Arc<Database>) {
    let mut s = db.session("setup");
    s.begin_transaction().unwrap();
    s.create_table(items_info(db)).unwrap();
    s.commit().unwrap();
}

fn int(v: i64) -> Option<Value> {
    Some(Value::Integer(v))
}

fn text(v: &str) -> Option<Value> {
    Some(Value::String(v.into()))
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

#[test]
fn concurrent_inserts_without_clash_both_commit() {
    init_tracing();
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut t1 = db.session("t1");
    let mut t2 = db.session("t2");
    t1.begin_transaction().unwrap();
    t2.begin_transaction().unwrap();

    t1.insert("app.items", vec![int(1), text("a")]).unwrap();
    t2.insert("app.items", vec![int(2), text("b")]).unwrap();

    t1.commit().unwrap();
    t2.commit().unwrap();

    let mut reader = db.session("r");
    reader.begin_transaction().unwrap();
    assert_eq!(reader.scan("app.items").unwrap().len(), 2);
    reader.commit().unwrap();
}

#[test]
fn concurrent_updates_of_one_row_second_commit_fails() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut setup = db.session("setup");
    setup.begin_transaction().unwrap();
    let row = setup.insert("app.items", vec![int(1), text("x")]).unwrap();
    setup.commit().unwrap();

    let mut t1 = db.session("t1");
    let mut t2 = db.session("t2");
    t1.begin_transaction().unwrap();
    t2.begin_transaction().unwrap();

    t1.update(
        "app.items",
        row.row,
        vec![Value::Integer(1), Value::String("ten".into())],
    )
    .unwrap();
    t2.update(
        "app.items",
        row.row,
        vec![Value::Integer(1), Value::String("twenty".into())],
    )
    .unwrap();

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    match &err {
        Error::RowRemoveConflict { row: r, .. } => assert_eq!(*r, row.row),
        other => panic!("expected row conflict, got {other}"),
    }
    assert!(err.is_commit_conflict());

    let mut reader = db.session("r");
    reader.begin_transaction().unwrap();
    let rows = reader.scan("app.items").unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].1[1], Value::String("ten".into()));
    reader.commit().unwrap();
}

#[test]
fn dirty_select_rejects_the_reader_commit() {
    let db = DatabaseBuilder::new()
        .config(DatabaseConfig {
            error_on_dirty_select: true,
            ..DatabaseConfig::default()
        })
        .open()
        .unwrap();
    with_items(&db);
    {
        let mut s = db.session("setup");
        s.begin_transaction().unwrap();
        s.create_table(simple_info(&db, "app.u")).unwrap();
        s.commit().unwrap();
    }

    // T1 reads items and writes u.
    let mut t1 = db.session("t1");
    t1.begin_transaction().unwrap();
    let _ = t1.scan("app.items").unwrap();
    t1.insert("app.u", vec![int(1)]).unwrap();

    // T2 inserts into items and commits first.
    let mut t2 = db.session("t2");
    t2.begin_transaction().unwrap();
    t2.insert("app.items", vec![int(9), text("dirty")]).unwrap();
    t2.commit().unwrap();

    let err = t1.commit().unwrap_err();
    assert!(matches!(err, Error::DirtySelect { table } if table.contains("items")));
}

#[test]
fn ddl_namespace_clash_second_create_fails() {
    let db = Database::in_memory().unwrap();

    let mut t1 = db.session("t1");
    let mut t2 = db.session("t2");
    t1.begin_transaction().unwrap();
    t2.begin_transaction().unwrap();

    t1.create_table(simple_info(&db, "app.a")).unwrap();
    t2.create_table(simple_info(&db, "app.a")).unwrap();

    t1.commit().unwrap();
    let err = t2.commit().unwrap_err();
    assert!(matches!(
        err,
        Error::ObjectDuplicated {
            action: "created",
            ..
        }
    ));

    // The winner's table exists.
    let mut reader = db.session("r");
    reader.begin_transaction().unwrap();
    assert!(reader.scan("app.a").unwrap().is_empty());
    reader.commit().unwrap();
}

#[test]
fn deferred_fk_violation_surfaces_at_commit_only() {
    let db = Database::in_memory().unwrap();

    let mut s = db.session("setup");
    s.begin_transaction().unwrap();
    s.create_table(
        TableInfo::new(
            db.object_name("app.parent"),
            vec![ColumnInfo::new("pk", SqlType::Integer).not_null()],
            vec![ConstraintInfo::new(
                "pk_parent",
                ConstraintKind::PrimaryKey {
                    columns: vec!["pk".into()],
                },
            )],
        )
        .unwrap(),
    )
    .unwrap();
    s.create_table(
        TableInfo::new(
            db.object_name("app.child"),
            vec![ColumnInfo::new("parent_pk", SqlType::Integer)],
            vec![ConstraintInfo::new(
                "fk_child_parent",
                ConstraintKind::ForeignKey {
                    columns: vec!["parent_pk".into()],
                    ref_table: db.object_name("app.parent"),
                    ref_columns: vec!["pk".into()],
                },
            )
            .deferred()],
        )
        .unwrap(),
    )
    .unwrap();
    s.commit().unwrap();

    let mut tx = db.session("t");
    tx.begin_transaction().unwrap();
    // The orphan insert itself succeeds (deferred constraint)...
    tx.insert("app.child", vec![int(5)]).unwrap();
    // ...the commit rejects it because parent pk=5 is absent.
    let err = tx.commit().unwrap_err();
    assert!(matches!(
        err,
        Error::ConstraintViolation {
            kind: ViolationKind::ForeignKey,
            ..
        }
    ));

    // With the parent present the same flow commits.
    let mut ok = db.session("t");
    ok.begin_transaction().unwrap();
    ok.insert("app.parent", vec![int(5)]).unwrap();
    ok.insert("app.child", vec![int(5)]).unwrap();
    ok.commit().unwrap();
}

#[test]
fn rollback_leaves_no_trace() {
    let db = Database::in_memory().unwrap();
    with_items(&db);
    let commit_id_before = db.current_commit_id();

    let mut tx = db.session("t");
    tx.begin_transaction().unwrap();
    tx.insert("app.items", vec![int(1), text("ghost")]).unwrap();
    tx.create_table(simple_info(&db, "app.ghost_table")).unwrap();
    tx.rollback().unwrap();

    assert_eq!(db.current_commit_id(), commit_id_before);
    let mut reader = db.session("r");
    reader.begin_transaction().unwrap();
    assert!(reader.scan("app.items").unwrap().is_empty());
    assert!(reader.scan("app.ghost_table").is_err());
    reader.commit().unwrap();
}

#[test]
fn snapshot_isolation_reader_sees_begin_state() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut reader = db.session("r");
    reader.begin_transaction().unwrap();
    assert!(reader.scan("app.items").unwrap().is_empty());

    let mut writer = db.session("w");
    writer.begin_transaction().unwrap();
    writer.insert("app.items", vec![int(1), text("new")]).unwrap();
    writer.commit().unwrap();

    // The reader's snapshot predates the commit.
    assert!(reader.scan("app.items").unwrap().is_empty());
    reader.commit().unwrap();

    // A fresh transaction sees it.
    let mut fresh = db.session("r");
    fresh.begin_transaction().unwrap();
    assert_eq!(fresh.scan("app.items").unwrap().len(), 1);
    fresh.commit().unwrap();
}

#[test]
fn immediate_fk_fails_inside_the_statement() {
    let db = Database::in_memory().unwrap();
    let mut s = db.session("setup");
    s.begin_transaction().unwrap();
    s.create_table(
        TableInfo::new(
            db.object_name("app.parent"),
            vec![ColumnInfo::new("pk", SqlType::Integer).not_null()],
            vec![ConstraintInfo::new(
                "pk_parent",
                ConstraintKind::PrimaryKey {
                    columns: vec!["pk".into()],
                },
            )],
        )
        .unwrap(),
    )
    .unwrap();
    s.create_table(
        TableInfo::new(
            db.object_name("app.child"),
            vec![ColumnInfo::new("parent_pk", SqlType::Integer)],
            vec![ConstraintInfo::new(
                "fk_child_parent",
                ConstraintKind::ForeignKey {
                    columns: vec!["parent_pk".into()],
                    ref_table: db.object_name("app.parent"),
                    ref_columns: vec!["pk".into()],
                },
            )],
        )
        .unwrap(),
    )
    .unwrap();
    s.commit().unwrap();

    let mut tx = db.session("t");
    tx.begin_transaction().unwrap();
    let err = tx.insert("app.child", vec![int(7)]).unwrap_err();
    assert!(matches!(
        err,
        Error::ConstraintViolation {
            kind: ViolationKind::ForeignKey,
            ..
        }
    ));
    tx.rollback().unwrap();
}

#[test]
fn altered_constraints_revalidate_the_whole_table() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut s = db.session("setup");
    s.begin_transaction().unwrap();
    s.insert("app.items", vec![int(1), text("dup")]).unwrap();
    s.insert("app.items", vec![int(2), text("dup")]).unwrap();
    s.commit().unwrap();

    // Adding a UNIQUE(name) constraint must fail: existing rows collide.
    let mut alter = db.session("ddl");
    alter.begin_transaction().unwrap();
    alter
        .alter_table_constraints(
            "app.items",
            vec![
                ConstraintInfo::new(
                    "pk_items",
                    ConstraintKind::PrimaryKey {
                        columns: vec!["id".into()],
                    },
                ),
                ConstraintInfo::new(
                    "u_name",
                    ConstraintKind::Unique {
                        columns: vec!["name".into()],
                    },
                ),
            ],
        )
        .unwrap();
    let err = alter.commit().unwrap_err();
    assert!(matches!(
        err,
        Error::ConstraintViolation {
            kind: ViolationKind::Unique,
            ..
        }
    ));
}

#[test]
fn drop_table_conflicts_with_concurrent_writer() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut writer = db.session("w");
    writer.begin_transaction().unwrap();
    writer.insert("app.items", vec![int(1), text("a")]).unwrap();

    let mut dropper = db.session("d");
    dropper.begin_transaction().unwrap();
    dropper.drop_table("app.items").unwrap();
    dropper.commit().unwrap();

    let err = writer.commit().unwrap_err();
    assert!(matches!(err, Error::NonCommittedConflict { .. }));
}

#[test]
fn post_commit_events_fire_after_publish() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let table_changes = db.events().subscribe_table_changes();
    let schema_changes = db.events().subscribe_schema_changes();

    let mut tx = db.session("t");
    tx.begin_transaction().unwrap();
    tx.insert("app.items", vec![int(1), text("a")]).unwrap();
    tx.create_table(simple_info(&db, "app.extra")).unwrap();
    let commit_id = tx.commit().unwrap();

    let change = table_changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(change.commit_id, commit_id);
    assert_eq!(change.added.len(), 1);
    assert!(change.removed.is_empty());

    let schema = schema_changes.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(schema.name, db.object_name("app.extra"));
}

#[test]
fn triggers_run_on_matching_changes() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let db = Database::in_memory().unwrap();
    with_items(&db);

    let fired = Arc::new(AtomicUsize::new(0));
    let def = TriggerDef {
        name: db.object_name("app.trg_items"),
        table: db.object_name("app.items"),
        on: TriggerOn::Insert,
    };
    {
        let mut s = db.session("ddl");
        s.begin_transaction().unwrap();
        s.create_trigger(def.clone()).unwrap();
        s.commit().unwrap();
    }
    {
        let fired = fired.clone();
        db.events().register_trigger(def, move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
        });
    }

    let mut tx = db.session("t");
    tx.begin_transaction().unwrap();
    tx.insert("app.items", vec![int(1), text("a")]).unwrap();
    tx.commit().unwrap();

    // The dispatch worker is asynchronous; poll briefly.
    let deadline = std::time::Instant::now() + Duration::from_secs(2);
    while fired.load(Ordering::SeqCst) == 0 && std::time::Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // Events never fire for rolled-back work.
    let mut rb = db.session("t");
    rb.begin_transaction().unwrap();
    rb.insert("app.items", vec![int(2), text("b")]).unwrap();
    rb.rollback().unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(fired.load(Ordering::SeqCst), 1);
}

#[test]
fn conflicting_commit_is_retryable() {
    let db = Database::in_memory().unwrap();
    with_items(&db);

    let mut setup = db.session("setup");
    setup.begin_transaction().unwrap();
    let row = setup.insert("app.items", vec![int(1), text("v0")]).unwrap();
    setup.commit().unwrap();

    let mut loser = db.session("loser");
    loser.begin_transaction().unwrap();
    loser
        .update(
            "app.items",
            row.row,
            vec![Value::Integer(1), Value::String("loser".into())],
        )
        .unwrap();

    let mut winner = db.session("winner");
    winner.begin_transaction().unwrap();
    let winner_row = winner
        .update(
            "app.items",
            row.row,
            vec![Value::Integer(1), Value::String("winner".into())],
        )
        .unwrap();
    winner.commit().unwrap();

    let err = loser.commit().unwrap_err();
    assert!(err.is_commit_conflict());

    // Retry against the fresh state succeeds.
    loser.begin_transaction().unwrap();
    loser
        .update(
            "app.items",
            winner_row.row,
            vec![Value::Integer(1), Value::String("retried".into())],
        )
        .unwrap();
    loser.commit().unwrap();
}
