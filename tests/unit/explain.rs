use pretty_assertions::assert_eq;
use querydesk::{
    classify::{strip_explain, with_explain, with_explain_analyze},
    plan::parse_plan,
};

#[test]
fn wrapping_adds_the_json_format_option_once() {
    assert_eq!(with_explain("select * from t"), "EXPLAIN (FORMAT JSON) select * from t");
    assert_eq!(with_explain("EXPLAIN (FORMAT JSON) select * from t"), "EXPLAIN (FORMAT JSON) select * from t");
}

#[test]
fn analyze_joins_an_existing_options_list() {
    assert_eq!(with_explain_analyze("select 1"), "EXPLAIN (ANALYZE, FORMAT JSON) select 1");
    assert_eq!(with_explain_analyze("EXPLAIN (FORMAT JSON) select 1"), "EXPLAIN (FORMAT JSON, ANALYZE) select 1");
    assert_eq!(with_explain_analyze("EXPLAIN (ANALYZE, FORMAT JSON) select 1"), "EXPLAIN (ANALYZE, FORMAT JSON) select 1");
}

#[test]
fn stripping_recovers_the_bare_statement() {
    assert_eq!(strip_explain("EXPLAIN (ANALYZE, FORMAT JSON) select 1"), "select 1");
    assert_eq!(strip_explain("explain analyze select 1"), "select 1");
    assert_eq!(strip_explain("select 1"), "select 1");
}

#[test]
fn wrap_then_parse_round_trip() {
    // The payload a backend would return for the wrapped statement.
    let payload = r#"[{
        "Plan": {
            "Node Type": "Seq Scan",
            "Total Cost": 15.0,
            "Plan Rows": 100,
            "Actual Total Time": 2.5,
            "Actual Rows": 97
        },
        "Execution Time": 3.1
    }]"#;

    let wrapped = with_explain_analyze("select * from t");
    assert!(wrapped.starts_with("EXPLAIN (ANALYZE"));

    let tree = parse_plan(payload).expect("well-formed payload");
    assert_eq!(tree.root.node_type, "Seq Scan");
    assert_eq!(tree.root.exclusive_time_ms, Some(2.5));
    assert_eq!(tree.execution_time_ms, Some(3.1));
}
