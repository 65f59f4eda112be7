use pretty_assertions::assert_eq;
use querydesk::adapter::ColumnMeta;

use crate::test_utils::{run_to_completion, test_descriptor, test_workspace, ScriptedFactory};

async fn workspace_with_grid(
    factory: ScriptedFactory,
) -> (querydesk::coordinator::Workspace, querydesk::event::TabId) {
    let (mut workspace, mut rx, _history) = test_workspace(factory);
    let tab = workspace.add_tab();
    workspace.execute(tab, &test_descriptor(), "select * from users", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;
    assert!(workspace.tab(tab).unwrap().grid.is_some());
    (workspace, tab)
}

#[tokio::test]
async fn editing_a_cell_saves_one_keyed_update() {
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, tab) = workspace_with_grid(factory).await;

    let grid = workspace.tab_mut(tab).unwrap().grid.as_mut().unwrap();
    grid.set_cell(0, 1, Some("Alicia".to_string()));

    let report = workspace.save_grid_changes(tab).await.unwrap();
    assert_eq!(report.updated, 1);
    assert!(report.errors.is_empty());

    let journal = journal.lock().unwrap();
    assert_eq!(journal.last().unwrap(), "UPDATE users SET name=Alicia WHERE id=7 AND name WAS Alice");

    // The saved cell is clean again.
    let grid = workspace.tab(tab).unwrap().grid.as_ref().unwrap();
    assert!(!grid.is_dirty(0, 1));
}

#[tokio::test]
async fn saving_without_changes_never_connects() {
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, tab) = workspace_with_grid(factory).await;

    let connects_before = journal.lock().unwrap().iter().filter(|e| *e == "CONNECT").count();
    let report = workspace.save_grid_changes(tab).await.unwrap();
    let connects_after = journal.lock().unwrap().iter().filter(|e| *e == "CONNECT").count();

    assert_eq!(report.summary(), "No changes to save");
    assert_eq!(connects_before, connects_after);
}

#[tokio::test]
async fn a_vanished_row_surfaces_as_a_stale_edit() {
    let factory = ScriptedFactory::new().with_mutation_affected(0);
    let (mut workspace, tab) = workspace_with_grid(factory).await;

    let grid = workspace.tab_mut(tab).unwrap().grid.as_mut().unwrap();
    grid.set_cell(1, 1, Some("Robert".to_string()));

    let report = workspace.save_grid_changes(tab).await.unwrap();
    assert_eq!(report.updated, 0);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].1.to_string().contains("no longer matches"));

    // The edit stays pending for the user to retry or revert.
    let grid = workspace.tab(tab).unwrap().grid.as_ref().unwrap();
    assert!(grid.is_dirty(1, 1));
}

#[tokio::test]
async fn deleting_selected_rows_runs_highest_index_first() {
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, tab) = workspace_with_grid(factory).await;

    let report = workspace.delete_grid_rows(tab, &[0, 1]).await.unwrap();
    assert_eq!(report.deleted, 2);

    let journal = journal.lock().unwrap();
    let deletes: Vec<&String> = journal.iter().filter(|e| e.starts_with("DELETE")).collect();
    assert_eq!(deletes, ["DELETE users WHERE id=8", "DELETE users WHERE id=7"]);
    assert_eq!(workspace.tab(tab).unwrap().grid.as_ref().unwrap().row_count(), 0);
}

#[tokio::test]
async fn new_row_is_inserted_with_empty_cells_as_null() {
    let factory = ScriptedFactory::new();
    let journal = factory.journal();
    let (mut workspace, tab) = workspace_with_grid(factory).await;

    let grid = workspace.tab_mut(tab).unwrap().grid.as_mut().unwrap();
    let row = grid.append_blank_row().unwrap();
    grid.set_cell(row, 0, Some("9".to_string()));
    grid.set_cell(row, 1, Some("Carol".to_string()));

    let report = workspace.save_grid_changes(tab).await.unwrap();
    assert!(report.inserted);

    let journal = journal.lock().unwrap();
    assert!(journal.iter().any(|e| e == "INSERT users (id=9, name=Carol)"));
}

#[tokio::test]
async fn catalog_refresh_overrides_the_heuristic_key() {
    let factory = ScriptedFactory::new()
        .with_result(&["identifier", "code"], vec![vec![Some("x".to_string()), Some("c1".to_string())]])
        .with_catalog(vec![
            ColumnMeta {
                name: "identifier".to_string(),
                data_type: "text".to_string(),
                is_nullable: true,
                is_primary_key: false,
            },
            ColumnMeta {
                name: "code".to_string(),
                data_type: "text".to_string(),
                is_nullable: false,
                is_primary_key: true,
            },
        ]);
    let (mut workspace, mut rx, _history) = test_workspace(factory);
    let tab = workspace.add_tab();
    workspace.execute(tab, &test_descriptor(), "select * from items", 0).unwrap();
    run_to_completion(&mut workspace, &mut rx).await;

    workspace.refresh_grid_metadata(tab).await.unwrap();

    let grid = workspace.tab(tab).unwrap().grid.as_ref().unwrap();
    let key = grid.row(0).unwrap().key.clone().unwrap();
    assert_eq!(key.pk_column, "code");
    assert_eq!(key.pk_value, "c1");
}
