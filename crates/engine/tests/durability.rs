//! Durability and recovery over on-disk databases.

use lattice_core::{ColumnInfo, ConstraintInfo, ConstraintKind, SqlType, TableInfo, Value};
use lattice_engine::Database;
use tempfile::tempdir;

fn int(v: i64) -> Option<Value> {
    Some(Value::Integer(v))
}

fn text(v: &str) -> Option<Value> {
    Some(Value::String(v.into()))
}

#[test]
fn committed_data_survives_reopen() {
    let dir = tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let mut s = db.session("app");
        s.begin_transaction().unwrap();
        s.create_table(
            TableInfo::new(
                db.object_name("app.orders"),
                vec![
                    ColumnInfo::new("id", SqlType::Integer).identity(),
                    ColumnInfo::new("item", SqlType::varchar()).not_null(),
                ],
                vec![ConstraintInfo::new(
                    "pk_orders",
                    ConstraintKind::PrimaryKey {
                        columns: vec!["id".into()],
                    },
                )],
            )
            .unwrap(),
        )
        .unwrap();
        s.insert("app.orders", vec![None, text("apples")]).unwrap();
        s.insert("app.orders", vec![None, text("pears")]).unwrap();
        s.commit().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    let rows = s.scan("app.orders").unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].1[1], Value::String("apples".into()));
    s.commit().unwrap();

    // Identity continues past the reloaded high-water mark.
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    let r = s.insert("app.orders", vec![None, text("plums")]).unwrap();
    s.commit().unwrap();
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    let rows = s.scan("app.orders").unwrap();
    let last = rows.iter().find(|(n, _)| *n == r.row).unwrap();
    assert_eq!(last.1[0], Value::Integer(3));
    s.commit().unwrap();
}

#[test]
fn uncommitted_work_is_gone_after_reopen() {
    let dir = tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let mut s = db.session("app");
        s.begin_transaction().unwrap();
        s.create_table(
            TableInfo::new(
                db.object_name("app.t"),
                vec![ColumnInfo::new("x", SqlType::Integer)],
                vec![],
            )
            .unwrap(),
        )
        .unwrap();
        s.commit().unwrap();

        // Staged but never committed: the store never flushes it, so a
        // crash (or this close) discards it.
        let mut dying = db.session("app");
        dying.begin_transaction().unwrap();
        dying.insert("app.t", vec![int(1)]).unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    assert!(s.scan("app.t").unwrap().is_empty());
    s.commit().unwrap();
}

#[test]
fn dropped_table_is_reclaimed_across_reopen() {
    let dir = tempdir().unwrap();

    {
        let db = Database::open(dir.path()).unwrap();
        let mut s = db.session("app");
        s.begin_transaction().unwrap();
        s.create_table(
            TableInfo::new(
                db.object_name("app.doomed"),
                vec![ColumnInfo::new("x", SqlType::Integer)],
                vec![],
            )
            .unwrap(),
        )
        .unwrap();
        s.commit().unwrap();

        s.begin_transaction().unwrap();
        s.drop_table("app.doomed").unwrap();
        s.commit().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    assert!(s.scan("app.doomed").is_err());
    s.commit().unwrap();

    // The name is reusable: nothing lingers in the visible or delete
    // lists.
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    s.create_table(
        TableInfo::new(
            db.object_name("app.doomed"),
            vec![ColumnInfo::new("y", SqlType::Integer)],
            vec![],
        )
        .unwrap(),
    )
    .unwrap();
    s.commit().unwrap();
}

#[test]
fn table_ids_stay_monotonic_across_reopen() {
    let dir = tempdir().unwrap();

    let first_id;
    {
        let db = Database::open(dir.path()).unwrap();
        let mut s = db.session("app");
        s.begin_transaction().unwrap();
        first_id = s
            .create_table(
                TableInfo::new(
                    db.object_name("app.a"),
                    vec![ColumnInfo::new("x", SqlType::Integer)],
                    vec![],
                )
                .unwrap(),
            )
            .unwrap();
        s.commit().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let mut s = db.session("app");
    s.begin_transaction().unwrap();
    let second_id = s
        .create_table(
            TableInfo::new(
                db.object_name("app.b"),
                vec![ColumnInfo::new("x", SqlType::Integer)],
                vec![],
            )
            .unwrap(),
        )
        .unwrap();
    s.commit().unwrap();
    assert!(second_id > first_id);
}

#[test]
fn catalog_objects_survive_reopen() {
    use lattice_core::ObjectType;
    use lattice_engine::SequenceDef;

    let dir = tempdir().unwrap();
    {
        let db = Database::open(dir.path()).unwrap();
        let mut s = db.session("app");
        s.begin_transaction().unwrap();
        s.create_sequence(SequenceDef::simple(db.object_name("app.s"))).unwrap();
        s.commit().unwrap();
        assert_eq!(s.next_sequence_value("app.s").unwrap(), 1);
    }

    let db = Database::open(dir.path()).unwrap();
    assert!(db
        .catalog()
        .contains(ObjectType::Sequence, &db.object_name("app.s")));
    let mut s = db.session("app");
    // The consumed value is not reissued.
    assert_eq!(s.next_sequence_value("app.s").unwrap(), 2);
}
