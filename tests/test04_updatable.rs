use sql_driver_core::prelude::*;
use sql_driver_core::results::{RowStatus, TupleId};
use sql_driver_core::test_utils::{FakeServer, init_tracing, test_params};

fn open(server: &FakeServer, rows: usize) -> Session {
    init_tracing();
    server.seed_numbers("t", rows);
    Session::open(test_params(), server).unwrap()
}

fn updatable(fetch: usize) -> CursorOptions {
    CursorOptions::default()
        .fetch_size(fetch)
        .scrollable()
        .updatable()
}

fn next_label(rs: &mut ResultSet) -> Option<String> {
    rs.advance_row()
        .unwrap()
        .map(|row| row.text("label").unwrap().to_string())
}

#[test]
fn local_update_is_seen_when_scrolling_back() {
    let server = FakeServer::new();
    let session = open(&server, 6);

    let mut rs = session
        .declare_cursor("SELECT id, label FROM t", updatable(2))
        .unwrap();
    assert!(server.commands()[0].contains("SELECT id, label, ctid FROM t"));
    assert_eq!(rs.columns().names(), vec!["id", "label"]);
    assert!(rs.is_updatable());

    assert_eq!(next_label(&mut rs).as_deref(), Some("row 1"));
    assert_eq!(next_label(&mut rs).as_deref(), Some("row 2"));
    rs.register_update(1, vec![Cell::text("2"), Cell::text("changed")])
        .unwrap();
    assert_eq!(rs.keyset_entry(1).unwrap().status, RowStatus::Updated);
    assert!(rs.has_pending_edits());

    // past the cached window and back
    assert_eq!(next_label(&mut rs).as_deref(), Some("row 3"));
    assert_eq!(next_label(&mut rs).as_deref(), Some("row 4"));
    assert_eq!(next_label(&mut rs).as_deref(), Some("row 5"));
    rs.reposition(FetchDirection::Absolute(2));
    assert_eq!(next_label(&mut rs).as_deref(), Some("changed"));
    assert_eq!(rs.position(), Some(1));
}

#[test]
fn keyset_records_tuple_ids() {
    let server = FakeServer::new();
    let session = open(&server, 3);

    let mut rs = session
        .declare_cursor("SELECT * FROM t", updatable(5))
        .unwrap();
    next_label(&mut rs);
    let entry = rs.keyset_entry(0).unwrap();
    assert_eq!(entry.tuple, Some(TupleId { block: 0, offset: 1 }));
    assert_eq!(entry.status, RowStatus::Clean);
    // the hidden identity column never reaches the caller
    assert_eq!(rs.current_row().unwrap().len(), 2);
    assert!(rs.current_row().unwrap().get("ctid").is_none());
}

#[test]
fn deleted_rows_are_skipped_and_inserted_rows_follow_the_server_rows() {
    let server = FakeServer::new();
    let session = open(&server, 5);

    let mut rs = session
        .declare_cursor("SELECT id, label FROM t", updatable(2))
        .unwrap();
    assert_eq!(next_label(&mut rs).as_deref(), Some("row 1"));
    rs.register_delete(1).unwrap();
    rs.register_delete(2).unwrap();
    rs.register_insert(vec![Cell::text("6"), Cell::text("added")])
        .unwrap();

    let mut rest = Vec::new();
    while let Some(label) = next_label(&mut rs) {
        rest.push(label);
    }
    assert_eq!(rest, ["row 4", "row 5", "added"]);
    assert_eq!(rs.total_rows(), Some(6));
    assert!(rs.keyset_entry(1).unwrap().is_deleted());
}

#[test]
fn read_only_results_reject_edits() {
    let server = FakeServer::new();
    let session = open(&server, 2);

    let mut rs = session
        .declare_cursor("SELECT id, label FROM t", CursorOptions::default())
        .unwrap();
    next_label(&mut rs);
    assert!(!rs.is_updatable());
    let err = rs
        .register_update(0, vec![Cell::text("1"), Cell::text("x")])
        .unwrap_err();
    assert!(matches!(err, DriverError::Cursor(_)));

    let mut editable = session
        .declare_cursor("SELECT id, label FROM t", updatable(2))
        .unwrap();
    let err = editable
        .register_update(0, vec![Cell::text("1")])
        .unwrap_err();
    assert!(matches!(err, DriverError::Execution(_)));
}
