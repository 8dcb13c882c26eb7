use sql_driver_core::prelude::*;
use sql_driver_core::test_utils::{FakeServer, init_tracing, test_params};

fn open(server: &FakeServer) -> Session {
    init_tracing();
    Session::open(test_params(), server).unwrap()
}

fn ids(rs: &mut ResultSet) -> Vec<String> {
    let mut out = Vec::new();
    while let Some(row) = rs.advance_row().unwrap() {
        out.push(row.text("id").unwrap().to_string());
    }
    out
}

#[test]
fn every_row_once_then_end_of_data() {
    let server = FakeServer::new();
    server.seed_numbers("t", 5);
    let session = open(&server);

    let mut chain = session.execute("SELECT id, label FROM t").unwrap();
    let rs = chain.first_mut().unwrap();
    assert_eq!(rs.status(), ResultStatus::TuplesOk);
    assert!(!rs.is_incremental());
    assert_eq!(rs.total_rows(), Some(5));

    assert_eq!(ids(rs), ["1", "2", "3", "4", "5"]);
    assert!(rs.advance_row().unwrap().is_none());
    assert!(rs.current_row().is_none());
}

#[test]
fn empty_result_ends_immediately_without_fetching() {
    let server = FakeServer::new();
    server.create_table("empty", &[("id", 23)], None);
    let session = open(&server);

    let mut chain = session.execute("SELECT id FROM empty").unwrap();
    let rs = chain.first_mut().unwrap();
    assert_eq!(rs.status(), ResultStatus::TuplesOk);
    assert_eq!(rs.columns().names(), vec!["id"]);
    assert!(rs.advance_row().unwrap().is_none());
    assert!(rs.advance_row().unwrap().is_none());
    assert_eq!(server.count_statements("FETCH"), 0);
    assert_eq!(server.count_statements("DECLARE"), 0);
}

#[test]
fn multi_statement_text_yields_a_chain() {
    let server = FakeServer::new();
    let session = open(&server);

    let chain = session
        .execute("SELECT 1; SELECT 'a' AS name; CREATE TABLE u (id int)")
        .unwrap();
    assert_eq!(chain.len(), 3);
    let second = chain.get(1).unwrap();
    let row = &second.cached_rows()[0];
    assert_eq!(row.text("name"), Some("a"));
    assert_eq!(row.get_by_index(0).and_then(Cell::as_str), Some("a"));
    assert_eq!(chain.last().unwrap().status(), ResultStatus::CommandOk);
    assert!(chain.last().unwrap().tag().unwrap().is("CREATE TABLE"));
}

#[test]
fn failure_truncates_the_chain_after_the_error() {
    let server = FakeServer::new();
    let session = open(&server);

    let err = session.execute("SELECT 1; SELECT 1/0; SELECT 2").unwrap_err();
    assert_eq!(err.sqlstate(), Some("22012"));
    let DriverError::Statement { partial, .. } = err else {
        panic!("expected a statement error");
    };
    assert_eq!(partial.len(), 2);
    assert_eq!(partial.get(0).unwrap().status(), ResultStatus::TuplesOk);
    assert!(partial.get(1).unwrap().is_error());
    // the session stays usable
    assert_eq!(session.execute("SELECT 2").unwrap().len(), 1);
}

#[test]
fn empty_text_reports_an_empty_query() {
    let server = FakeServer::new();
    let session = open(&server);

    let chain = session.execute("  ; -- nothing here").unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain.first().unwrap().status(), ResultStatus::EmptyQuery);
}

#[test]
fn copy_is_refused_with_an_error_result() {
    let server = FakeServer::new();
    server.seed_numbers("t", 1);
    let session = open(&server);

    let err = session.execute("COPY t FROM STDIN").unwrap_err();
    let DriverError::Statement { partial, .. } = err else {
        panic!("expected a statement error");
    };
    assert_eq!(partial.first().unwrap().status(), ResultStatus::CopyRejected);
    assert_eq!(session.status(), SessionStatus::Connected);
    assert_eq!(session.execute("SELECT 1").unwrap().len(), 1);
}

#[test]
fn reused_result_is_refilled_in_place() {
    let server = FakeServer::new();
    server.seed_numbers("t", 2);
    let session = open(&server);

    let mut rs = session
        .execute("SELECT id FROM t")
        .unwrap()
        .into_iter()
        .next()
        .unwrap();
    assert_eq!(ids(&mut rs), ["1", "2"]);

    session.execute("INSERT INTO t VALUES (3, 'three')").unwrap();
    let chain = session
        .submit(QueryRequest::new("SELECT id FROM t").reuse(&mut rs))
        .unwrap();
    assert!(chain.first().unwrap().cached_rows().is_empty());
    assert_eq!(rs.tag().map(ToString::to_string).as_deref(), Some("SELECT 3"));
    assert_eq!(ids(&mut rs), ["1", "2", "3"]);
}

#[test]
fn notices_ride_along_with_results() {
    let server = FakeServer::new();
    let session = open(&server);

    let chain = session.execute("DROP TABLE IF EXISTS missing").unwrap();
    let notices: Vec<_> = chain.notices().collect();
    assert_eq!(notices.len(), 1);
    assert!(notices[0].message.contains("does not exist"));
}
