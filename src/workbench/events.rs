use chrono::{DateTime, Local};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};

use crate::db::query::StatementKind;
use crate::db::{ConnectionProfile, TransactionMode};
use crate::utils::lock_or_recover;
use crate::workbench::result_tabs::{ResultKind, ResultTabId};

/// Final accounting of one execution run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub statement_count: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub elapsed: Duration,
    pub finished_at: DateTime<Local>,
}

impl RunSummary {
    /// The single status line reported at the end of a run.
    pub fn message(&self) -> String {
        format!(
            "Executed {} statement(s): {} succeeded, {} failed in {:.3}s",
            self.statement_count,
            self.success_count,
            self.error_count,
            self.elapsed.as_secs_f64()
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// The owning session changed mid-run; later results were dropped.
    Discarded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected {
        profile: String,
        database: Option<String>,
    },
    Disconnected,
    Failed(String),
}

/// Notifications sent to the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkbenchEvent {
    RunStarted {
        statement_count: usize,
    },
    StatementFinished {
        index: usize,
        kind: StatementKind,
        success: bool,
    },
    ResultAppended {
        id: ResultTabId,
        kind: ResultKind,
        title: String,
    },
    RunFinished(RunOutcome),
    Status(String),
    ConnectionChanged(ConnectionStatus),
    TransactionModeChanged(TransactionMode),
    ScriptSaved(PathBuf),
}

/// Requests a host can send instead of calling `Workbench` methods directly.
#[derive(Debug)]
pub enum WorkbenchCommand {
    Execute,
    Explain,
    Save,
    Format,
    Clear,
    InsertSnippet(String),
    SetText(String),
    Select(usize, usize),
    SetTransactionMode(TransactionMode),
    Commit,
    Rollback,
    CloseResultTab(ResultTabId),
    ClearResults,
    Connect {
        profile: Box<ConnectionProfile>,
        database: Option<String>,
    },
    Disconnect,
    SwitchDatabase(String),
    OpenScript(PathBuf),
    /// Replies once every earlier command has been handled.
    Flush(oneshot::Sender<()>),
    Close,
}

/// Optional event channel plus the latest status line. Sends after the host
/// hung up are dropped.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<WorkbenchEvent>>,
    last_status: Arc<Mutex<Option<String>>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<WorkbenchEvent>) -> Self {
        Self {
            tx: Some(tx),
            last_status: Arc::default(),
        }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkbenchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: WorkbenchEvent) {
        if let WorkbenchEvent::Status(message) = &event {
            *lock_or_recover(&self.last_status, "status line") = Some(message.clone());
        }
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn status(&self, message: impl Into<String>) {
        self.emit(WorkbenchEvent::Status(message.into()));
    }

    pub fn last_status(&self) -> Option<String> {
        lock_or_recover(&self.last_status, "status line").clone()
    }
}
