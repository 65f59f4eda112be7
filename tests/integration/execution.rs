use std::time::Duration;

use pretty_assertions::assert_eq;
use querydesk::{
    config::Config,
    coordinator::TabStatus,
    history::{ExecutionStatus, HistoryStore},
};

use crate::test_utils::{run_to_completion, test_descriptor, test_workspace, test_workspace_with_config, ScriptedFactory};

#[tokio::test]
async fn select_is_augmented_and_lands_in_a_grid() {
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, mut rx, history) = test_workspace(factory);
    let tab = workspace.add_tab();

    workspace.execute(tab, &test_descriptor(), "select * from users", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    // The dispatched text carries the default page clause.
    assert_eq!(journal.lock().unwrap().as_slice(), ["CONNECT", "EXECUTE select * from users LIMIT 200;"]);

    let state = workspace.tab(tab).unwrap();
    assert_eq!(state.status, TabStatus::Succeeded);
    let grid = state.grid.as_ref().expect("select builds a grid");
    assert_eq!(grid.row_count(), 2);
    // Two rows against a 200-row page: no further pages.
    assert!(!state.has_more);

    let entries = history.get_history("test-connection").await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].status, ExecutionStatus::Success);
    assert_eq!(entries[0].query, "select * from users");
    assert_eq!(entries[0].row_count, 2);
}

#[tokio::test]
async fn backend_errors_come_back_verbatim() {
    let factory = ScriptedFactory::new().failing_with("relation \"userz\" does not exist");
    let (mut workspace, mut rx, history) = test_workspace(factory);
    let tab = workspace.add_tab();

    workspace.execute(tab, &test_descriptor(), "select * from userz", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    let state = workspace.tab(tab).unwrap();
    assert_eq!(state.status, TabStatus::Failed);
    assert_eq!(state.last_error.as_deref(), Some("relation \"userz\" does not exist"));
    assert!(state.grid.is_none());

    let entries = history.get_history("test-connection").await.unwrap();
    assert_eq!(entries[0].status, ExecutionStatus::Failure);
}

#[tokio::test]
async fn dml_reports_affected_rows_without_a_grid() {
    let factory = ScriptedFactory::new().with_affected(3);
    let journal = factory.journal();
    let (mut workspace, mut rx, history) = test_workspace(factory);
    let tab = workspace.add_tab();

    workspace.execute(tab, &test_descriptor(), "update users set active = true", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    // No page clause on a non-select.
    assert_eq!(journal.lock().unwrap()[1], "EXECUTE update users set active = true;");

    let state = workspace.tab(tab).unwrap();
    assert_eq!(state.status, TabStatus::Succeeded);
    assert!(state.grid.is_none());

    let entries = history.get_history("test-connection").await.unwrap();
    assert_eq!(entries[0].row_count, 3);
}

#[tokio::test]
async fn tabs_run_independently_and_cancel_all_stops_them() {
    let factory = ScriptedFactory::new().with_delay(Duration::from_millis(500));
    let (mut workspace, mut rx, _history) = test_workspace(factory);
    let tab_a = workspace.add_tab();
    let tab_b = workspace.add_tab();

    workspace.execute(tab_a, &test_descriptor(), "select * from a", 0).unwrap();
    workspace.execute(tab_b, &test_descriptor(), "select * from b", 0).unwrap();
    assert!(workspace.any_running());

    workspace.cancel_all();
    run_to_completion(&mut workspace, &mut rx).await;
    run_to_completion(&mut workspace, &mut rx).await;

    assert_eq!(workspace.tab(tab_a).unwrap().status, TabStatus::Cancelled);
    assert_eq!(workspace.tab(tab_b).unwrap().status, TabStatus::Cancelled);
    assert!(!workspace.any_running());
}

#[tokio::test]
async fn timed_out_query_is_recorded_distinctly_from_failure() {
    let config = Config { query_timeout_ms: 40, ..Config::default() };
    let factory = ScriptedFactory::new().with_delay(Duration::from_millis(400));
    let (mut workspace, mut rx, history) = test_workspace_with_config(factory, config);
    let tab = workspace.add_tab();

    workspace.execute(tab, &test_descriptor(), "select pg_sleep(10)", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    assert_eq!(workspace.tab(tab).unwrap().status, TabStatus::TimedOut);
    let entries = history.get_history("test-connection").await.unwrap();
    assert_eq!(entries[0].status, ExecutionStatus::TimedOut);
}

#[tokio::test]
async fn paging_follows_a_full_first_page() {
    let config = Config { default_limit: 2, ..Config::default() };
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, mut rx, _history) = test_workspace_with_config(factory, config);
    let tab = workspace.add_tab();

    workspace.execute(tab, &test_descriptor(), "select * from users", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;
    // The scripted backend returns exactly two rows: a full page.
    assert!(workspace.tab(tab).unwrap().has_more);

    workspace.next_page(tab).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    let journal = journal.lock().unwrap();
    assert_eq!(journal[1], "EXECUTE select * from users LIMIT 2;");
    assert_eq!(journal[3], "EXECUTE select * from users LIMIT 2 OFFSET 2;");
}
