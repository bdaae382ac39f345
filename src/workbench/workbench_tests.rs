use super::*;
use crate::db::query::{ExecuteResult, MultiResult};
use crate::db::{BuiltinDialect, SessionRegistry, SqlDialect};
use crate::test_support::{rows, settle, FakePool, MemoryScriptStore, Reply};
use tokio::sync::mpsc::UnboundedReceiver;

fn profile() -> ConnectionProfile {
    ConnectionProfile::new("local", "app", "secret", "db.local", 3306)
}

fn workbench(pool: &Arc<FakePool>) -> (Workbench, UnboundedReceiver<WorkbenchEvent>) {
    let session = Arc::new(SessionManager::new(
        pool.clone(),
        Arc::new(SessionRegistry::new()),
        SqlDialect::MySql,
    ));
    let (events, rx) = EventSink::channel();
    let workbench = Workbench::new(
        session,
        Arc::new(BuiltinDialect),
        MemoryScriptStore::new(),
        WorkbenchOptions::default(),
        events,
    );
    (workbench, rx)
}

async fn connected(pool: &Arc<FakePool>) -> (Workbench, UnboundedReceiver<WorkbenchEvent>) {
    let (workbench, rx) = workbench(pool);
    assert!(workbench.connect(&profile(), None).await);
    (workbench, rx)
}

fn drain(rx: &mut UnboundedReceiver<WorkbenchEvent>) -> Vec<WorkbenchEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn completed(outcome: Option<RunOutcome>) -> RunSummary {
    match outcome {
        Some(RunOutcome::Completed(summary)) => summary,
        other => panic!("expected a completed run, got {:?}", other),
    }
}

fn kinds(workbench: &Workbench) -> Vec<ResultKind> {
    workbench.result_tabs().iter().map(|tab| tab.kind()).collect()
}

#[tokio::test]
async fn test_execute_requires_connection() {
    let pool = FakePool::new();
    let (workbench, _rx) = workbench(&pool);
    workbench.buffer().set_text("SELECT 1");

    assert_eq!(workbench.execute().await, None);

    assert_eq!(workbench.status().as_deref(), Some("Not connected to database"));
    assert!(workbench.result_tabs().is_empty());
    assert_eq!(pool.count_calls("query"), 0);
}

#[tokio::test]
async fn test_empty_script_reports_no_query() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;

    workbench.buffer().set_text("   \n\t");
    assert_eq!(workbench.execute().await, None);
    assert_eq!(workbench.status().as_deref(), Some("No SQL to execute"));

    workbench.buffer().set_text("-- just a note\n/* and a block */");
    assert_eq!(workbench.execute().await, None);
    assert_eq!(workbench.status().as_deref(), Some("No SQL to execute"));

    assert!(workbench.result_tabs().is_empty());
    assert!(!workbench.results_expanded());
}

#[tokio::test]
async fn test_whitespace_selection_reports_no_query() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("    SELECT 1");
    workbench.buffer().select(0, 3);

    assert_eq!(workbench.execute().await, None);

    assert_eq!(workbench.status().as_deref(), Some("No SQL to execute"));
    assert_eq!(pool.count_calls("query"), 0);
}

#[tokio::test]
async fn test_mixed_batch_produces_tabs_in_order() {
    let pool = FakePool::new();
    pool.reply("SELECT 1", Reply::Rows(rows(&["1"], &[&["1"]])));
    pool.reply(
        "INSERT INTO t VALUES (1)",
        Reply::Update(ExecuteResult {
            affected_rows: 1,
            last_insert_id: Some(7),
        }),
    );
    pool.reply(
        "CALL p()",
        Reply::Multi(MultiResult {
            result_sets: vec![
                rows(&["a"], &[&["x"]]),
                rows(&["b"], &[&["y"], &["z"]]),
            ],
            affected_rows: 0,
            last_insert_id: None,
        }),
    );
    let (workbench, mut rx) = connected(&pool).await;
    drain(&mut rx);
    workbench
        .buffer()
        .set_text("SELECT 1; INSERT INTO t VALUES (1); CALL p();");

    let summary = completed(workbench.execute().await);

    assert_eq!(summary.statement_count, 3);
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.error_count, 0);
    assert_eq!(
        kinds(&workbench),
        vec![
            ResultKind::Query,
            ResultKind::Update,
            ResultKind::Query,
            ResultKind::Query
        ]
    );
    let titles: Vec<String> = workbench
        .result_tabs()
        .into_iter()
        .map(|tab| tab.title)
        .collect();
    assert_eq!(
        titles,
        vec![
            "Query 1 (1 row)",
            "Update 2 (1 row affected)",
            "Result 1 (1 row)",
            "Result 2 (2 rows)"
        ]
    );
    let last = workbench.result_tabs().last().map(|tab| tab.id);
    assert_eq!(workbench.active_result().map(|tab| tab.id), last);
    assert!(workbench.results_expanded());
    assert_eq!(workbench.status(), Some(summary.message()));

    let events = drain(&mut rx);
    assert_eq!(
        events.first(),
        Some(&WorkbenchEvent::RunStarted { statement_count: 3 })
    );
    assert!(matches!(
        events.last(),
        Some(WorkbenchEvent::RunFinished(RunOutcome::Completed(_)))
    ));
}

#[tokio::test]
async fn test_typo_yields_single_error_tab() {
    let pool = FakePool::new();
    pool.reply(
        "SELEC 1",
        Reply::Fail("You have an error in your SQL syntax".to_string()),
    );
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("SELEC 1;");

    let summary = completed(workbench.execute().await);

    assert_eq!((summary.success_count, summary.error_count), (0, 1));
    let tabs = workbench.result_tabs();
    assert_eq!(tabs.len(), 1);
    assert_eq!(tabs[0].kind(), ResultKind::Error);
    assert_eq!(tabs[0].source_sql, "SELEC 1");
    assert_eq!(
        tabs[0].payload,
        ResultPayload::Error {
            message: "You have an error in your SQL syntax".to_string()
        }
    );
}

#[tokio::test]
async fn test_failing_statement_does_not_stop_batch() {
    let pool = FakePool::new();
    pool.reply("DELETE FROM locked", Reply::Fail("lock wait timeout".to_string()));
    let (workbench, _rx) = connected(&pool).await;
    workbench
        .buffer()
        .set_text("SELECT 1;\nDELETE FROM locked;\nUPDATE t SET a = 1;");

    let summary = completed(workbench.execute().await);

    assert_eq!(summary.statement_count, 3);
    assert_eq!((summary.success_count, summary.error_count), (2, 1));
    assert_eq!(
        kinds(&workbench),
        vec![ResultKind::Query, ResultKind::Error, ResultKind::Update]
    );
    assert_eq!(pool.count_calls("execute UPDATE t SET a = 1"), 1);
}

#[tokio::test]
async fn test_comment_only_segments_are_skipped() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench
        .buffer()
        .set_text("-- load data\nSELECT 1; -- trailing note");

    let summary = completed(workbench.execute().await);

    assert_eq!(summary.statement_count, 1);
    assert_eq!(workbench.result_tabs().len(), 1);
    assert_eq!(pool.count_calls("query SELECT 1"), 1);
}

#[tokio::test]
async fn test_use_statement_switches_database() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("USE sales;");

    let summary = completed(workbench.execute().await);

    assert_eq!(summary.success_count, 1);
    assert_eq!(kinds(&workbench), vec![ResultKind::Update]);
    assert_eq!(workbench.session().current_database().as_deref(), Some("sales"));
    assert_eq!(
        workbench
            .session()
            .registry()
            .last_used_database("local")
            .as_deref(),
        Some("sales")
    );
    assert_eq!(pool.count_calls("execute USE"), 1);
    assert_eq!(pool.count_calls("set_database sales"), 1);
}

#[tokio::test]
async fn test_failed_use_keeps_previous_database() {
    let pool = FakePool::new();
    pool.reply("USE nowhere", Reply::Fail("Unknown database 'nowhere'".to_string()));
    let (workbench, _rx) = workbench(&pool);
    assert!(workbench.connect(&profile(), Some("sales")).await);
    workbench.buffer().set_text("USE nowhere");

    let summary = completed(workbench.execute().await);

    assert_eq!(summary.error_count, 1);
    assert_eq!(workbench.session().current_database().as_deref(), Some("sales"));
    assert_eq!(pool.count_calls("set_database"), 0);
}

#[tokio::test]
async fn test_teardown_during_run_discards_results() {
    let pool = FakePool::new();
    let (workbench, mut rx) = connected(&pool).await;
    workbench.buffer().set_text("SELECT 1; SELECT 2;");
    let gate = pool.hold("statement");

    let (outcome, _) = tokio::join!(workbench.execute(), async {
        settle().await;
        workbench.close().await;
        gate.notify_one();
    });

    assert_eq!(outcome, Some(RunOutcome::Discarded));
    assert!(workbench.result_tabs().is_empty());
    assert_eq!(pool.count_calls("query SELECT 2"), 0);
    assert_eq!(pool.open_slots(), 0);
    assert!(drain(&mut rx).contains(&WorkbenchEvent::RunFinished(RunOutcome::Discarded)));
}

#[tokio::test]
async fn test_reconnect_during_run_discards_results() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("SELECT 1;");
    let gate = pool.hold("statement");

    let (outcome, reconnected) = tokio::join!(workbench.execute(), async {
        settle().await;
        let reconnected = workbench.connect(&profile(), None).await;
        gate.notify_one();
        reconnected
    });

    assert!(reconnected);
    assert_eq!(outcome, Some(RunOutcome::Discarded));
    assert!(workbench.result_tabs().is_empty());
    assert_eq!(pool.max_open_slots(), 1);
}

#[tokio::test]
async fn test_concurrent_execute_is_refused() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("SELECT 1;");
    let gate = pool.hold("statement");

    let (first, (second, status)) = tokio::join!(workbench.execute(), async {
        settle().await;
        let second = workbench.execute().await;
        let status = workbench.status();
        gate.notify_one();
        (second, status)
    });

    assert_eq!(completed(first).success_count, 1);
    assert_eq!(second, None);
    assert_eq!(status.as_deref(), Some("A query is already running"));
    assert_eq!(pool.count_calls("query SELECT 1"), 1);
}

#[tokio::test]
async fn test_explain_wraps_first_statement() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("SELECT * FROM t;\nSELECT 2;");

    let summary = completed(workbench.explain().await);

    assert_eq!(summary.statement_count, 1);
    assert_eq!(pool.count_calls("query EXPLAIN SELECT * FROM t"), 1);
    assert_eq!(kinds(&workbench), vec![ResultKind::Query]);
}

#[tokio::test]
async fn test_format_rewrites_effective_text() {
    let pool = FakePool::new();
    let (workbench, _rx) = workbench(&pool);
    workbench.buffer().set_text("select a from t where x = 1 and y = 2");

    workbench.format();

    assert_eq!(
        workbench.buffer().text(),
        "SELECT a\nFROM t\nWHERE x = 1\n  AND y = 2;"
    );
    assert_eq!(workbench.status().as_deref(), Some("Formatted SQL"));
}

#[tokio::test]
async fn test_transaction_controls() {
    let pool = FakePool::new();
    let (workbench, mut rx) = connected(&pool).await;

    workbench.set_transaction_mode(TransactionMode::Manual).await;
    assert!(drain(&mut rx).contains(&WorkbenchEvent::TransactionModeChanged(
        TransactionMode::Manual
    )));
    assert_eq!(workbench.session().transaction_mode(), TransactionMode::Manual);

    workbench.commit().await;
    assert_eq!(workbench.status().as_deref(), Some("Transaction committed"));
    workbench.rollback().await;
    assert_eq!(workbench.status().as_deref(), Some("Transaction rolled back"));
    assert_eq!(pool.count_calls("execute SET autocommit = 0"), 1);
}

#[tokio::test]
async fn test_result_tab_management() {
    let pool = FakePool::new();
    let (workbench, _rx) = connected(&pool).await;
    workbench.buffer().set_text("SELECT 1; SELECT 2;");
    completed(workbench.execute().await);

    let tabs = workbench.result_tabs();
    assert!(workbench.close_result_tab(tabs[1].id));
    assert_eq!(workbench.active_result().map(|tab| tab.id), Some(tabs[0].id));

    workbench.clear_results();
    assert!(workbench.result_tabs().is_empty());
    assert!(workbench.active_result().is_none());
    assert!(workbench.session().is_connected());
}

#[tokio::test]
async fn test_save_without_destination_is_cancelled() {
    let pool = FakePool::new();
    let (workbench, _rx) = workbench(&pool);
    workbench.buffer().set_text("SELECT 1");

    workbench.save().await;

    assert_eq!(workbench.status().as_deref(), Some("Save cancelled"));
    assert!(workbench.buffer().is_modified());
}

#[tokio::test]
async fn test_serve_handles_commands_in_order() {
    let pool = FakePool::new();
    let (workbench, _rx) = workbench(&pool);
    let workbench = Arc::new(workbench);
    let (tx, commands) = mpsc::channel(8);
    let server = tokio::spawn(workbench.clone().serve(commands));

    tx.send(WorkbenchCommand::Connect {
        profile: Box::new(profile()),
        database: None,
    })
    .await
    .unwrap();
    tx.send(WorkbenchCommand::SetText("SELECT 1; SELECT 2;".to_string()))
        .await
        .unwrap();
    tx.send(WorkbenchCommand::Execute).await.unwrap();
    let (flushed_tx, flushed_rx) = tokio::sync::oneshot::channel();
    tx.send(WorkbenchCommand::Flush(flushed_tx)).await.unwrap();
    flushed_rx.await.unwrap();

    assert_eq!(workbench.result_tabs().len(), 2);

    tx.send(WorkbenchCommand::Close).await.unwrap();
    server.await.unwrap();
    assert!(workbench.session().is_closed());
    assert_eq!(pool.open_slots(), 0);
}
