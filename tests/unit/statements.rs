use pretty_assertions::assert_eq;
use querydesk::classify::{classify, prepare_for_execution, statement_at_cursor, StatementKind};

#[test]
fn classification_ignores_leading_comments_and_whitespace() {
    let cases = [
        ("select * from t", StatementKind::Select),
        ("-- comment\n  SELECT 1", StatementKind::Select),
        ("/* block\ncomment */ insert into t values (1)", StatementKind::Insert),
        ("  UPDATE t SET x = 1", StatementKind::Update),
        ("delete from t where id = 1", StatementKind::Delete),
        ("explain select * from t", StatementKind::Explain { analyze: false }),
        ("EXPLAIN ANALYZE select * from t", StatementKind::Explain { analyze: true }),
    ];
    for (sql, expected) in cases {
        assert_eq!(classify(sql), expected, "classifying {sql:?}");
    }
}

#[test]
fn ddl_surfaces_its_keyword() {
    match classify("CREATE TABLE t (id int)") {
        StatementKind::Ddl(keyword) => assert_eq!(keyword, "CREATE"),
        other => panic!("expected DDL, got {other:?}"),
    }
    match classify("drop index idx_t") {
        StatementKind::Ddl(keyword) => assert_eq!(keyword, "DROP"),
        other => panic!("expected DDL, got {other:?}"),
    }
}

#[test]
fn cursor_selects_its_statement_in_a_multi_statement_buffer() {
    let buffer = "select 1;\nselect 2;\nselect 3;";
    assert_eq!(statement_at_cursor(buffer, 0).as_deref(), Some("select 1"));
    assert_eq!(statement_at_cursor(buffer, 12).as_deref(), Some("select 2"));
    assert_eq!(statement_at_cursor(buffer, buffer.len()).as_deref(), Some("select 3"));
}

#[test]
fn single_statement_is_found_regardless_of_cursor() {
    assert_eq!(statement_at_cursor("select * from t", 999).as_deref(), Some("select * from t"));
}

#[test]
fn augmentation_applies_only_to_bare_selects() {
    let select = StatementKind::Select;
    assert_eq!(prepare_for_execution("select * from t", &select, 200, 0), "select * from t LIMIT 200;");
    assert_eq!(prepare_for_execution("select * from t", &select, 200, 400), "select * from t LIMIT 200 OFFSET 400;");

    // An existing clause wins.
    assert_eq!(prepare_for_execution("select * from t limit 5", &select, 200, 0), "select * from t limit 5;");
    // Limit 0 disables augmentation.
    assert_eq!(prepare_for_execution("select * from t", &select, 0, 0), "select * from t;");
    // Non-select statements are never touched.
    assert_eq!(prepare_for_execution("update t set x = 1", &StatementKind::Update, 200, 0), "update t set x = 1;");
}

#[test]
fn prepared_text_ends_with_exactly_one_semicolon() {
    let select = StatementKind::Select;
    for input in ["select 1", "select 1;", "select 1 ; "] {
        let prepared = prepare_for_execution(input, &select, 0, 0);
        assert!(prepared.ends_with(';'), "{prepared:?}");
        assert!(!prepared.ends_with(";;"), "{prepared:?}");
    }
}
