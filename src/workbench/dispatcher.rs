use chrono::Local;
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::db::query::{
    MultiResult, ScriptSplitter, Statement, StatementClassifier, StatementKind,
};
use crate::db::{DialectService, SessionIdentity, SessionManager};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::utils::lock_or_recover;
use crate::workbench::events::{EventSink, RunOutcome, RunSummary, WorkbenchEvent};
use crate::workbench::render::{affected_label, row_count_label};
use crate::workbench::result_tabs::{ResultPayload, ResultTabRegistry};

/// Runs one batch of statements against the session and files every outcome
/// as a result tab. Borrowed from the owning workbench for a single run.
pub struct ExecutionDispatcher<'a> {
    pub session: &'a SessionManager,
    pub dialect: &'a dyn DialectService,
    pub results: &'a Mutex<ResultTabRegistry>,
    pub events: &'a EventSink,
}

impl ExecutionDispatcher<'_> {
    /// Split `text` into the statements a run would execute.
    pub fn prepare(&self, text: &str) -> WorkbenchResult<Vec<Statement>> {
        if !self.session.is_connected() {
            return Err(WorkbenchError::NoActiveConnection);
        }
        if text.trim().is_empty() {
            return Err(WorkbenchError::NoQuery);
        }

        let statements: Vec<Statement> = self
            .dialect
            .split_statements(text, self.session.dialect())
            .iter()
            .map(|raw| ScriptSplitter::strip_leading_comments(raw))
            .filter(|cleaned| !cleaned.trim().is_empty())
            .enumerate()
            .map(|(index, cleaned)| Statement::new(index, cleaned))
            .collect();

        if statements.is_empty() {
            return Err(WorkbenchError::NoQuery);
        }
        Ok(statements)
    }

    pub async fn run(&self, text: &str) -> WorkbenchResult<RunOutcome> {
        let statements = self.prepare(text)?;
        Ok(self.run_prepared(statements).await)
    }

    pub async fn run_prepared(&self, statements: Vec<Statement>) -> RunOutcome {
        let identity = self.session.identity();
        let started = Instant::now();
        let statement_count = statements.len();
        let mut success_count = 0usize;
        let mut error_count = 0usize;

        lock_or_recover(self.results, "result tabs").set_expanded(true);
        self.events.emit(WorkbenchEvent::RunStarted { statement_count });
        info!("Executing {statement_count} statement(s) on tab {}", identity.tab_id);

        for statement in &statements {
            let Some(kind) = StatementClassifier::classify(&statement.text) else {
                continue;
            };
            debug!("Statement {} classified as {kind:?}", statement.index + 1);

            let outcome = self.dispatch(identity, kind, statement).await;
            if !self.session.is_current(identity) {
                return self.discard(statement);
            }

            let success = match outcome {
                Ok(tabs) => {
                    for (title, payload) in tabs {
                        self.append(title, payload, &statement.text);
                    }
                    if let Some(database) = ScriptSplitter::use_directive_target(&statement.text) {
                        let switched = self.session.apply_database_switch(identity, &database).await;
                        if !self.session.is_current(identity) {
                            return self.discard(statement);
                        }
                        if let Err(err) = switched {
                            warn!("Could not record database switch to {database}: {err}");
                        }
                    }
                    success_count += 1;
                    true
                }
                Err(err) => {
                    let message = err.to_string();
                    warn!("Statement {} failed: {message}", statement.index + 1);
                    self.append(
                        format!("Error {}", statement.index + 1),
                        ResultPayload::Error { message },
                        &statement.text,
                    );
                    error_count += 1;
                    false
                }
            };

            self.events.emit(WorkbenchEvent::StatementFinished {
                index: statement.index,
                kind,
                success,
            });
        }

        let summary = RunSummary {
            statement_count,
            success_count,
            error_count,
            elapsed: started.elapsed(),
            finished_at: Local::now(),
        };
        info!("{}", summary.message());
        self.events.status(summary.message());
        let outcome = RunOutcome::Completed(summary);
        self.events.emit(WorkbenchEvent::RunFinished(outcome.clone()));
        outcome
    }

    fn discard(&self, statement: &Statement) -> RunOutcome {
        info!(
            "Session changed during statement {}; discarding the rest of the run",
            statement.index + 1
        );
        self.events.emit(WorkbenchEvent::RunFinished(RunOutcome::Discarded));
        RunOutcome::Discarded
    }

    fn append(&self, title: String, payload: ResultPayload, source_sql: &str) {
        let (id, kind) = {
            let mut results = lock_or_recover(self.results, "result tabs");
            let id = results.append(title.clone(), payload, source_sql);
            let kind = results.get(id).map(|tab| tab.kind());
            (id, kind)
        };
        if let Some(kind) = kind {
            self.events
                .emit(WorkbenchEvent::ResultAppended { id, kind, title });
        }
    }

    async fn dispatch(
        &self,
        identity: SessionIdentity,
        kind: StatementKind,
        statement: &Statement,
    ) -> WorkbenchResult<Vec<(String, ResultPayload)>> {
        let ordinal = statement.index + 1;
        match kind {
            StatementKind::Query => {
                let rows = self.session.query(identity, &statement.text).await?;
                let title = format!("Query {ordinal} ({})", row_count_label(rows.row_count()));
                Ok(vec![(title, ResultPayload::RowSet(rows))])
            }
            StatementKind::Update => {
                let result = self.session.execute(identity, &statement.text).await?;
                Ok(vec![(
                    format!("Update {ordinal} ({})", affected_label(result.affected_rows)),
                    ResultPayload::Update {
                        affected_rows: result.affected_rows,
                        last_insert_id: result.last_insert_id,
                    },
                )])
            }
            StatementKind::ProcedureCall => {
                let result = self.session.query_multi(identity, &statement.text).await?;
                Ok(Self::procedure_tabs(ordinal, result))
            }
        }
    }

    fn procedure_tabs(ordinal: usize, result: MultiResult) -> Vec<(String, ResultPayload)> {
        let MultiResult {
            result_sets,
            affected_rows,
            last_insert_id,
        } = result;

        match result_sets.len() {
            0 => vec![(
                format!("Call {ordinal} ({})", affected_label(affected_rows)),
                ResultPayload::Update {
                    affected_rows,
                    last_insert_id,
                },
            )],
            1 => result_sets
                .into_iter()
                .map(|rows| {
                    (
                        format!("Call {ordinal} ({})", row_count_label(rows.row_count())),
                        ResultPayload::RowSet(rows),
                    )
                })
                .collect(),
            _ => result_sets
                .into_iter()
                .enumerate()
                .map(|(i, rows)| {
                    (
                        format!("Result {} ({})", i + 1, row_count_label(rows.row_count())),
                        ResultPayload::RowSet(rows),
                    )
                })
                .collect(),
        }
    }
}
