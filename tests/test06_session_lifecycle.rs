use sql_driver_core::prelude::*;
use sql_driver_core::session::TableInfo;
use sql_driver_core::test_utils::{Fault, FakeServer, init_tracing, test_params};
use sql_driver_core::{ColumnDescriptor, TransportError};

fn open(server: &FakeServer) -> Session {
    init_tracing();
    Session::open(test_params(), server).unwrap()
}

#[test]
fn version_comes_from_startup_parameters_or_a_probe() {
    let server = FakeServer::new().with_version("15.4");
    let session = open(&server);
    assert_eq!(session.server_version().unwrap().to_string(), "15.4");
    assert_eq!(server.count_statements("SHOW"), 0);

    let server = FakeServer::new()
        .with_version("9.6.24")
        .without_version_parameter();
    let session = open(&server);
    let version = session.server_version().unwrap();
    assert_eq!((version.major, version.minor), (9, 6));
    assert_eq!(server.count_statements("SHOW server_version"), 1);
    assert!(session.last_error().is_none());
}

#[test]
fn servers_without_savepoints_roll_back_the_whole_block() {
    let server = FakeServer::new().with_version("7.4");
    server.seed_numbers("t", 1);
    let session = open(&server);

    let err = session
        .submit(
            QueryRequest::new("INSERT INTO t VALUES (1, 'dup')")
                .flags(QueryFlags::GO_INTO_TRANSACTION | QueryFlags::ROLLBACK_ON_ERROR),
        )
        .unwrap_err();
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(server.count_statements("SAVEPOINT"), 0);
    assert!(!session.in_transaction());
}

#[test]
fn bad_parameters_and_refused_connections() {
    init_tracing();
    let server = FakeServer::new();
    let params = ConnectionParams::builder("", "testing", "tester").finish();
    let err = Session::open(params, &server).unwrap_err();
    assert!(matches!(err, DriverError::Config(_)));
    assert_eq!(server.connections(), 0);

    server.refuse_connections(true);
    let err = Session::open(test_params(), &server).unwrap_err();
    assert!(matches!(err, DriverError::Transport(TransportError::Connect(_))));
    assert_eq!(err.kind(), ErrorKind::TransportFatal);
}

#[test]
fn dropped_connection_kills_the_session_and_its_cursors() {
    let server = FakeServer::new();
    server.seed_numbers("t", 5);
    let session = open(&server);
    let mut rs = session
        .declare_cursor("SELECT id FROM t", CursorOptions::default().fetch_size(2))
        .unwrap();

    server.inject_fault(Fault::DropConnection);
    let err = session.execute("SELECT 1").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::TransportFatal);
    assert_eq!(session.status(), SessionStatus::Dead);
    assert!(!session.in_transaction());
    assert_eq!(
        session.last_error().map(|e| e.kind),
        Some(ErrorKind::TransportFatal)
    );

    let err = session.execute("SELECT 1").unwrap_err();
    assert!(matches!(err, DriverError::ConnectionDead(_)));

    // cached rows stay readable, the next fetch fails
    assert!(rs.advance_row().unwrap().is_some());
    assert!(rs.advance_row().unwrap().is_some());
    assert!(rs.advance_row().is_err());
}

#[test]
fn fatal_server_error_is_session_fatal() {
    let server = FakeServer::new();
    let session = open(&server);

    server.inject_fault(Fault::Fatal);
    let err = session.execute("SELECT 1").unwrap_err();
    assert!(matches!(err, DriverError::ServerFatal(_)));
    assert_eq!(err.sqlstate(), Some("57P01"));
    assert_eq!(session.status(), SessionStatus::Dead);
}

#[test]
fn scripted_statement_failures_leave_the_session_usable() {
    let server = FakeServer::new();
    let session = open(&server);

    server.inject_fault(Fault::FailMatching {
        pattern: "forbidden".to_string(),
        sqlstate: "42501".to_string(),
        message: "permission denied".to_string(),
    });
    let err = session.execute("SELECT 'forbidden'").unwrap_err();
    assert_eq!(err.sqlstate(), Some("42501"));
    assert!(session.execute("SELECT 'forbidden'").is_err());
    server.clear_faults();
    assert!(session.execute("SELECT 'forbidden'").is_ok());
}

#[test]
fn close_in_a_failed_transaction_is_deferred() {
    let server = FakeServer::new();
    server.seed_numbers("t", 5);
    let mut params = test_params();
    params.error_rollback = ErrorRollback::Nop;
    let session = Session::open(params, &server).unwrap();
    session.set_autocommit(false).unwrap();

    let mut rs = session
        .declare_cursor("SELECT id FROM t", CursorOptions::default().fetch_size(2))
        .unwrap();
    rs.advance_row().unwrap();
    assert!(session.execute("SELECT 1/0").is_err());
    assert!(session.in_error_transaction());

    drop(rs);
    assert_eq!(session.pending_discard_count(), 1);
    assert_eq!(session.open_cursor_count(), 1);
    assert_eq!(server.count_statements("CLOSE"), 0);

    session.rollback().unwrap();
    session.execute("SELECT 1").unwrap();
    assert_eq!(session.pending_discard_count(), 0);
    assert_eq!(session.open_cursor_count(), 0);
    // the rollback already destroyed the cursor
    assert_eq!(server.count_statements("CLOSE"), 0);
}

#[test]
fn dropped_result_closes_its_cursor() {
    let server = FakeServer::new();
    server.seed_numbers("t", 5);
    let session = open(&server);

    let rs = session
        .declare_cursor("SELECT id FROM t", CursorOptions::default().fetch_size(2))
        .unwrap();
    assert_eq!(server.open_cursors(), vec!["SQL_CUR1".to_string()]);
    drop(rs);
    assert!(server.open_cursors().is_empty());
    assert_eq!(session.pending_discard_count(), 0);
    assert!(!session.in_transaction());
}

#[test]
fn statements_and_descriptors_are_tracked() {
    let server = FakeServer::new();
    let session = open(&server);

    let stmt = session.allocate_statement().unwrap();
    let other = session.allocate_statement().unwrap();
    assert_ne!(stmt.handle(), other.handle());
    assert_eq!(session.statement_count(), 2);

    stmt.allocate_descriptor().unwrap();
    session.allocate_descriptor(Some(&stmt)).unwrap();
    let loose = session.allocate_descriptor(None).unwrap();
    assert_eq!(session.descriptor_count(), 3);

    stmt.free();
    assert_eq!(session.statement_count(), 1);
    assert_eq!(session.descriptor_count(), 1);

    session.free_descriptor(loose).unwrap();
    let err = session.free_descriptor(loose).unwrap_err();
    assert!(matches!(err, DriverError::InvalidHandle(_)));
    assert_eq!(session.descriptor_count(), 0);
}

#[test]
fn close_invalidates_everything_and_is_idempotent() {
    let server = FakeServer::new();
    server.seed_numbers("t", 5);
    let session = open(&server);
    let mut stmt = session.allocate_statement().unwrap();
    let mut rs = session
        .declare_cursor("SELECT id FROM t", CursorOptions::default().fetch_size(2))
        .unwrap();

    session.close();
    session.close();
    assert_eq!(session.status(), SessionStatus::NotConnected);
    assert_eq!(session.statement_count(), 0);
    assert_eq!(session.open_cursor_count(), 0);
    assert!(server.open_cursors().is_empty());

    assert!(matches!(
        stmt.execute("SELECT 1").unwrap_err(),
        DriverError::NotConnected
    ));
    assert!(matches!(
        session.allocate_statement().unwrap_err(),
        DriverError::NotConnected
    ));
    assert!(matches!(
        session.execute("SELECT 1").unwrap_err(),
        DriverError::NotConnected
    ));
    rs.advance_row().unwrap();
    rs.advance_row().unwrap();
    assert!(rs.advance_row().is_err());
    rs.close_cursor().unwrap();
    rs.close_cursor().unwrap();
}

#[test]
fn table_metadata_is_cached_until_the_schema_changes() {
    let server = FakeServer::new();
    let session = open(&server);

    let info = session.cache_table_info(
        TableInfo::new("users", vec![ColumnDescriptor::new("id", 23)]).with_schema("public"),
    );
    assert_eq!(info.qualified_name(), "public.users");
    let first_access = session.table_last_access("public.users").unwrap();
    let cached = session.table_info("public.users").unwrap();
    assert_eq!(cached.columns.len(), 1);
    assert!(session.table_last_access("public.users").unwrap() >= first_access);
    assert_eq!(session.cached_table_count(), 1);

    session.execute("CREATE TABLE audit (id int)").unwrap();
    assert_eq!(session.cached_table_count(), 0);
    assert!(session.table_info("public.users").is_none());
}
