//! Headless workbench tab: script buffer, session and result tabs behind the
//! operations a host UI calls.

pub mod dispatcher;
pub mod events;
pub mod render;
pub mod result_tabs;
pub mod script_buffer;

pub use dispatcher::ExecutionDispatcher;
pub use events::*;
pub use result_tabs::*;
pub use script_buffer::*;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::db::query::Statement;
use crate::db::{ConnectionProfile, DialectService, SessionManager, TransactionMode};
use crate::error::WorkbenchError;
use crate::utils::lock_or_recover;

#[derive(Debug, Clone, Copy)]
pub struct WorkbenchOptions {
    pub autosave: AutosaveSettings,
    pub max_cell_display_chars: usize,
}

impl Default for WorkbenchOptions {
    fn default() -> Self {
        Self {
            autosave: AutosaveSettings::default(),
            max_cell_display_chars: 60,
        }
    }
}

/// Clears the running flag when the guarded operation ends.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// One workbench tab. Operations never return errors; failures become status
/// lines and error result tabs.
pub struct Workbench {
    session: Arc<SessionManager>,
    dialect: Arc<dyn DialectService>,
    results: Mutex<ResultTabRegistry>,
    buffer: ScriptBuffer,
    events: EventSink,
    running: AtomicBool,
    max_cell_display_chars: usize,
}

impl Workbench {
    pub fn new(
        session: Arc<SessionManager>,
        dialect: Arc<dyn DialectService>,
        store: Arc<dyn ScriptStore>,
        options: WorkbenchOptions,
        events: EventSink,
    ) -> Self {
        Self {
            session,
            dialect,
            results: Mutex::new(ResultTabRegistry::new()),
            buffer: ScriptBuffer::new(store, options.autosave, events.clone()),
            events,
            running: AtomicBool::new(false),
            max_cell_display_chars: options.max_cell_display_chars,
        }
    }

    pub fn session(&self) -> &Arc<SessionManager> {
        &self.session
    }

    pub fn buffer(&self) -> &ScriptBuffer {
        &self.buffer
    }

    pub fn status(&self) -> Option<String> {
        self.events.last_status()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn result_tabs(&self) -> Vec<ResultTab> {
        lock_or_recover(&self.results, "result tabs").tabs().to_vec()
    }

    pub fn active_result(&self) -> Option<ResultTab> {
        lock_or_recover(&self.results, "result tabs").active().cloned()
    }

    pub fn results_expanded(&self) -> bool {
        lock_or_recover(&self.results, "result tabs").is_expanded()
    }

    pub fn render_active(&self) -> Option<String> {
        self.active_result()
            .map(|tab| render::render_tab(&tab, self.max_cell_display_chars))
    }

    pub fn render_all(&self) -> String {
        let tabs = self.result_tabs();
        let mut out = String::new();
        for tab in &tabs {
            out.push_str(&format!("== {} ==\n", tab.title));
            out.push_str(&render::render_tab(tab, self.max_cell_display_chars));
            out.push('\n');
        }
        out
    }

    fn report(&self, err: &WorkbenchError) {
        debug!("Workbench status: {err}");
        self.events.status(err.to_string());
    }

    fn begin_work(&self) -> Option<RunGuard<'_>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.report(&WorkbenchError::QueryAlreadyRunning);
            return None;
        }
        Some(RunGuard(&self.running))
    }

    fn dispatcher(&self) -> ExecutionDispatcher<'_> {
        ExecutionDispatcher {
            session: &self.session,
            dialect: self.dialect.as_ref(),
            results: &self.results,
            events: &self.events,
        }
    }

    /// Run the selection, or the whole script when nothing is selected.
    pub async fn execute(&self) -> Option<RunOutcome> {
        let _guard = self.begin_work()?;
        let text = self.buffer.effective_text();
        match self.dispatcher().run(&text).await {
            Ok(outcome) => Some(outcome),
            Err(err) => {
                self.report(&err);
                None
            }
        }
    }

    /// Show the plan of the first statement of the effective text.
    pub async fn explain(&self) -> Option<RunOutcome> {
        let _guard = self.begin_work()?;
        let dispatcher = self.dispatcher();
        let text = self.buffer.effective_text();
        let first = match dispatcher.prepare(&text) {
            Ok(statements) => statements.into_iter().next()?,
            Err(err) => {
                self.report(&err);
                return None;
            }
        };
        let explain_sql = self.session.dialect().explain_sql(&first.text);
        Some(
            dispatcher
                .run_prepared(vec![Statement::new(0, explain_sql)])
                .await,
        )
    }

    pub async fn save(&self) {
        match self.buffer.save().await {
            Ok(SaveOutcome::Saved(path)) => {
                self.events.status(format!("Saved {}", path.display()));
                self.events.emit(WorkbenchEvent::ScriptSaved(path));
            }
            Ok(SaveOutcome::Cancelled) => self.events.status("Save cancelled"),
            Err(err) => self.report(&err),
        }
    }

    pub fn format(&self) {
        let text = self.buffer.effective_text();
        if text.trim().is_empty() {
            self.report(&WorkbenchError::NoQuery);
            return;
        }
        let formatted = self.dialect.format_sql(&text, self.session.dialect());
        self.buffer.replace_effective_text(&formatted);
        self.events.status("Formatted SQL");
    }

    pub fn clear(&self) {
        self.buffer.clear();
    }

    pub fn insert_snippet(&self, snippet: &str) {
        self.buffer.insert_snippet(snippet);
    }

    pub async fn set_transaction_mode(&self, mode: TransactionMode) {
        let Some(_guard) = self.begin_work() else {
            return;
        };
        match self.session.set_transaction_mode(mode).await {
            Ok(()) => {
                self.events.emit(WorkbenchEvent::TransactionModeChanged(mode));
                self.events.status(format!("Transaction mode: {mode}"));
            }
            Err(err) => self.report(&err),
        }
    }

    pub async fn commit(&self) {
        let Some(_guard) = self.begin_work() else {
            return;
        };
        match self.session.commit().await {
            Ok(()) => self.events.status("Transaction committed"),
            Err(err) => self.report(&err),
        }
    }

    pub async fn rollback(&self) {
        let Some(_guard) = self.begin_work() else {
            return;
        };
        match self.session.rollback().await {
            Ok(()) => self.events.status("Transaction rolled back"),
            Err(err) => self.report(&err),
        }
    }

    pub fn close_result_tab(&self, id: ResultTabId) -> bool {
        lock_or_recover(&self.results, "result tabs").close(id)
    }

    pub fn activate_result_tab(&self, id: ResultTabId) -> bool {
        lock_or_recover(&self.results, "result tabs").activate(id)
    }

    pub fn clear_results(&self) {
        lock_or_recover(&self.results, "result tabs").clear_all();
    }

    pub async fn connect(&self, profile: &ConnectionProfile, database: Option<&str>) -> bool {
        match self.session.connect(profile, database).await {
            Ok(session) => {
                self.events
                    .emit(WorkbenchEvent::ConnectionChanged(ConnectionStatus::Connected {
                        profile: profile.name.clone(),
                        database: session.current_database.clone(),
                    }));
                self.events
                    .status(format!("Connected to {}", profile.display_string()));
                true
            }
            Err(err) => {
                self.events
                    .emit(WorkbenchEvent::ConnectionChanged(ConnectionStatus::Failed(
                        err.to_string(),
                    )));
                self.report(&err);
                false
            }
        }
    }

    pub async fn disconnect(&self) {
        self.session.disconnect().await;
        self.events
            .emit(WorkbenchEvent::ConnectionChanged(ConnectionStatus::Disconnected));
        self.events.status("Disconnected");
    }

    pub async fn switch_database(&self, database: &str) {
        match self.session.switch_database(database).await {
            Ok(true) => {
                let profile = self
                    .session
                    .current_session()
                    .map(|session| session.profile.name)
                    .unwrap_or_default();
                self.events
                    .emit(WorkbenchEvent::ConnectionChanged(ConnectionStatus::Connected {
                        profile,
                        database: Some(database.to_string()),
                    }));
                self.events.status(format!("Using database {database}"));
            }
            Ok(false) => self.report(&WorkbenchError::NoActiveConnection),
            Err(err) => self.report(&err),
        }
    }

    pub async fn open_script(&self, path: &Path) {
        match self.buffer.open(path).await {
            Ok(()) => self.events.status(format!("Opened {}", path.display())),
            Err(err) => self.report(&err),
        }
    }

    /// Tab teardown: release the session, stop autosave, drop results.
    pub async fn close(&self) {
        self.session.shutdown().await;
        self.buffer.shutdown();
        self.clear_results();
        info!("Workbench tab {} closed", self.session.tab_id());
    }

    async fn handle(&self, command: WorkbenchCommand) -> bool {
        match command {
            WorkbenchCommand::Execute => {
                self.execute().await;
            }
            WorkbenchCommand::Explain => {
                self.explain().await;
            }
            WorkbenchCommand::Save => self.save().await,
            WorkbenchCommand::Format => self.format(),
            WorkbenchCommand::Clear => self.clear(),
            WorkbenchCommand::InsertSnippet(snippet) => self.insert_snippet(&snippet),
            WorkbenchCommand::SetText(text) => self.buffer.set_text(&text),
            WorkbenchCommand::Select(start, end) => self.buffer.select(start, end),
            WorkbenchCommand::SetTransactionMode(mode) => self.set_transaction_mode(mode).await,
            WorkbenchCommand::Commit => self.commit().await,
            WorkbenchCommand::Rollback => self.rollback().await,
            WorkbenchCommand::CloseResultTab(id) => {
                self.close_result_tab(id);
            }
            WorkbenchCommand::ClearResults => self.clear_results(),
            WorkbenchCommand::Connect { profile, database } => {
                self.connect(&profile, database.as_deref()).await;
            }
            WorkbenchCommand::Disconnect => self.disconnect().await,
            WorkbenchCommand::SwitchDatabase(database) => self.switch_database(&database).await,
            WorkbenchCommand::OpenScript(path) => self.open_script(&path).await,
            WorkbenchCommand::Flush(reply) => {
                let _ = reply.send(());
            }
            WorkbenchCommand::Close => {
                self.close().await;
                return false;
            }
        }
        true
    }

    /// Serve host commands in arrival order until `Close` or the sender is
    /// dropped. Teardown also happens when the channel closes.
    pub async fn serve(self: Arc<Self>, mut commands: mpsc::Receiver<WorkbenchCommand>) {
        while let Some(command) = commands.recv().await {
            if !self.handle(command).await {
                return;
            }
        }
        self.close().await;
    }
}

#[cfg(test)]
mod workbench_tests;
