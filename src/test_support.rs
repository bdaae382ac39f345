//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

use crate::db::pool::{ConnectionId, PoolError, PoolId, PoolResult, PoolService};
use crate::db::query::{ColumnInfo, ExecuteResult, MultiResult, RowSet};
use crate::db::ConnectionProfile;
use crate::workbench::ScriptStore;

#[derive(Debug, Clone)]
pub(crate) enum Reply {
    Rows(RowSet),
    Update(ExecuteResult),
    Multi(MultiResult),
    Fail(String),
}

#[derive(Default)]
struct FakeState {
    next_id: u64,
    open_pools: HashSet<PoolId>,
    open_slots: HashSet<(PoolId, ConnectionId)>,
    max_open_slots: usize,
    calls: Vec<String>,
    replies: HashMap<String, Reply>,
    fail_create: Option<String>,
    fail_get_connection: Option<String>,
    gates: HashMap<&'static str, Arc<Notify>>,
}

/// Scripted `PoolService`. Replies are keyed by exact statement text; unknown
/// statements succeed with empty results.
#[derive(Default)]
pub(crate) struct FakePool {
    state: Mutex<FakeState>,
}

pub(crate) fn rows(columns: &[&str], data: &[&[&str]]) -> RowSet {
    RowSet::new(
        columns.iter().map(|c| ColumnInfo::new(c, "VARCHAR")).collect(),
        data.iter()
            .map(|row| row.iter().map(|v| Some(v.to_string())).collect())
            .collect(),
    )
}

impl FakePool {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn reply(&self, sql: &str, reply: Reply) {
        self.state.lock().unwrap().replies.insert(sql.to_string(), reply);
    }

    pub(crate) fn fail_create(&self, message: &str) {
        self.state.lock().unwrap().fail_create = Some(message.to_string());
    }

    pub(crate) fn fail_get_connection(&self, message: &str) {
        self.state.lock().unwrap().fail_get_connection = Some(message.to_string());
    }

    /// The next call to `operation` ("create" or "statement") parks until the
    /// returned handle is notified.
    pub(crate) fn hold(&self, operation: &'static str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.state
            .lock()
            .unwrap()
            .gates
            .insert(operation, notify.clone());
        notify
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub(crate) fn count_calls(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    pub(crate) fn open_slots(&self) -> usize {
        self.state.lock().unwrap().open_slots.len()
    }

    pub(crate) fn open_pools(&self) -> usize {
        self.state.lock().unwrap().open_pools.len()
    }

    pub(crate) fn max_open_slots(&self) -> usize {
        self.state.lock().unwrap().max_open_slots
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    async fn pass_gate(&self, operation: &'static str) {
        let gate = self.state.lock().unwrap().gates.remove(operation);
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }

    fn check_slot(&self, pool: PoolId, connection: ConnectionId) -> PoolResult<()> {
        if self.state.lock().unwrap().open_slots.contains(&(pool, connection)) {
            Ok(())
        } else {
            Err(PoolError::UnknownConnection(pool, connection))
        }
    }

    fn scripted(&self, sql: &str) -> Option<Reply> {
        self.state.lock().unwrap().replies.get(sql).cloned()
    }
}

#[async_trait]
impl PoolService for FakePool {
    async fn create(&self, profile: &ConnectionProfile) -> PoolResult<PoolId> {
        self.record(format!("create {}", profile.name));
        self.pass_gate("create").await;
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_create.clone() {
            return Err(PoolError::Database(message));
        }
        state.next_id += 1;
        let id = PoolId(state.next_id);
        state.open_pools.insert(id);
        Ok(id)
    }

    async fn get_connection(
        &self,
        pool: PoolId,
        initial_database: Option<&str>,
    ) -> PoolResult<ConnectionId> {
        self.record(format!(
            "get_connection {}",
            initial_database.unwrap_or("-")
        ));
        let mut state = self.state.lock().unwrap();
        if let Some(message) = state.fail_get_connection.clone() {
            return Err(PoolError::Database(message));
        }
        if !state.open_pools.contains(&pool) {
            return Err(PoolError::UnknownPool(pool));
        }
        state.next_id += 1;
        let id = ConnectionId(state.next_id);
        state.open_slots.insert((pool, id));
        state.max_open_slots = state.max_open_slots.max(state.open_slots.len());
        Ok(id)
    }

    async fn release_connection(&self, pool: PoolId, connection: ConnectionId) -> PoolResult<()> {
        self.record(format!("release {connection}"));
        self.state
            .lock()
            .unwrap()
            .open_slots
            .remove(&(pool, connection));
        Ok(())
    }

    async fn close(&self, pool: PoolId) -> PoolResult<()> {
        self.record(format!("close {pool}"));
        let mut state = self.state.lock().unwrap();
        state.open_pools.remove(&pool);
        state.open_slots.retain(|(p, _)| *p != pool);
        Ok(())
    }

    async fn close_all(&self) -> PoolResult<()> {
        self.record("close_all".to_string());
        let mut state = self.state.lock().unwrap();
        state.open_pools.clear();
        state.open_slots.clear();
        Ok(())
    }

    async fn execute(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<ExecuteResult> {
        self.record(format!("execute {sql}"));
        self.pass_gate("statement").await;
        self.check_slot(pool, connection)?;
        match self.scripted(sql) {
            Some(Reply::Update(result)) => Ok(result),
            Some(Reply::Fail(message)) => Err(PoolError::Database(message)),
            _ => Ok(ExecuteResult::default()),
        }
    }

    async fn query(&self, pool: PoolId, connection: ConnectionId, sql: &str) -> PoolResult<RowSet> {
        self.record(format!("query {sql}"));
        self.pass_gate("statement").await;
        self.check_slot(pool, connection)?;
        match self.scripted(sql) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(message)) => Err(PoolError::Database(message)),
            _ => Ok(RowSet::default()),
        }
    }

    async fn query_multi(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<MultiResult> {
        self.record(format!("query_multi {sql}"));
        self.pass_gate("statement").await;
        self.check_slot(pool, connection)?;
        match self.scripted(sql) {
            Some(Reply::Multi(result)) => Ok(result),
            Some(Reply::Fail(message)) => Err(PoolError::Database(message)),
            _ => Ok(MultiResult::default()),
        }
    }

    async fn set_database(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        database: &str,
    ) -> PoolResult<()> {
        self.record(format!("set_database {database}"));
        self.check_slot(pool, connection)
    }
}

/// `ScriptStore` over a map of paths; `choose_save_path` answers from a
/// preset choice.
#[derive(Default)]
pub(crate) struct MemoryScriptStore {
    files: Mutex<HashMap<PathBuf, String>>,
    choice: Mutex<Option<PathBuf>>,
    fail_writes: Mutex<Option<String>>,
    writes: Mutex<usize>,
}

impl MemoryScriptStore {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn choose(&self, path: Option<&str>) {
        *self.choice.lock().unwrap() = path.map(PathBuf::from);
    }

    pub(crate) fn fail_writes(&self, message: Option<&str>) {
        *self.fail_writes.lock().unwrap() = message.map(str::to_string);
    }

    pub(crate) fn insert(&self, path: &str, contents: &str) {
        self.files
            .lock()
            .unwrap()
            .insert(PathBuf::from(path), contents.to_string());
    }

    pub(crate) fn contents(&self, path: &str) -> Option<String> {
        self.files.lock().unwrap().get(Path::new(path)).cloned()
    }

    pub(crate) fn write_count(&self) -> usize {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ScriptStore for MemoryScriptStore {
    async fn choose_save_path(&self, _suggested: Option<&Path>) -> std::io::Result<Option<PathBuf>> {
        Ok(self.choice.lock().unwrap().clone())
    }

    async fn write(&self, path: &Path, contents: &str) -> std::io::Result<()> {
        if let Some(message) = self.fail_writes.lock().unwrap().clone() {
            return Err(std::io::Error::new(std::io::ErrorKind::PermissionDenied, message));
        }
        *self.writes.lock().unwrap() += 1;
        self.files
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), contents.to_string());
        Ok(())
    }

    async fn read(&self, path: &Path) -> std::io::Result<String> {
        self.files
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such script"))
    }
}

/// Let spawned tasks and parked futures make progress.
pub(crate) async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
