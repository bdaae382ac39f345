use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::db::pool::{ConnectionId, PoolId, PoolService};
use crate::db::query::{ExecuteResult, MultiResult, RowSet};
use crate::db::{ConnectionProfile, SqlDialect};
use crate::error::{WorkbenchError, WorkbenchResult};
use crate::utils::lock_or_recover;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionMode {
    #[default]
    Auto,
    Manual,
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionMode::Auto => write!(f, "auto-commit"),
            TransactionMode::Manual => write!(f, "manual commit"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Captured at the start of any async work; a mismatch afterwards means the
/// session was replaced or torn down while the work was suspended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionIdentity {
    pub tab_id: u64,
    pub epoch: u64,
}

/// One live pool slot. The profile copy carries no password.
#[derive(Debug, Clone)]
pub struct Session {
    pub pool_id: PoolId,
    pub connection_id: ConnectionId,
    pub profile: ConnectionProfile,
    pub current_database: Option<String>,
}

type ConnectKey = (u64, String, Option<String>);
type ConnectOutcome = Option<Result<Session, String>>;

/// Process-scoped session bookkeeping shared by every workbench tab.
pub struct SessionRegistry {
    next_tab: AtomicU64,
    last_used: Mutex<HashMap<String, String>>,
    in_flight: Mutex<HashMap<ConnectKey, watch::Receiver<ConnectOutcome>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            next_tab: AtomicU64::new(1),
            last_used: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    pub fn allocate_tab_id(&self) -> u64 {
        self.next_tab.fetch_add(1, Ordering::Relaxed)
    }

    pub fn last_used_database(&self, profile_name: &str) -> Option<String> {
        lock_or_recover(&self.last_used, "last used database")
            .get(profile_name)
            .cloned()
    }

    pub fn remember_database(&self, profile_name: &str, database: &str) {
        lock_or_recover(&self.last_used, "last used database")
            .insert(profile_name.to_string(), database.to_string());
    }

    pub fn in_flight_count(&self) -> usize {
        lock_or_recover(&self.in_flight, "in-flight connects").len()
    }

    /// Forget everything; called once at application shutdown.
    pub fn clear(&self) {
        lock_or_recover(&self.last_used, "last used database").clear();
        lock_or_recover(&self.in_flight, "in-flight connects").clear();
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the in-flight entry when the leading connect finishes or is dropped.
struct InFlightGuard<'a> {
    registry: &'a SessionRegistry,
    key: ConnectKey,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        lock_or_recover(&self.registry.in_flight, "in-flight connects").remove(&self.key);
    }
}

enum ConnectRole {
    Leader(watch::Sender<ConnectOutcome>),
    Follower(watch::Receiver<ConnectOutcome>),
}

struct SessionSlot {
    state: SessionState,
    session: Option<Session>,
    epoch: u64,
    closed: bool,
    last_error: Option<String>,
    transaction_mode: TransactionMode,
}

/// Lifecycle of the single pooled connection owned by one workbench tab.
pub struct SessionManager {
    tab_id: u64,
    dialect: SqlDialect,
    pool: Arc<dyn PoolService>,
    registry: Arc<SessionRegistry>,
    slot: Mutex<SessionSlot>,
    connect_gate: AsyncMutex<()>,
}

impl SessionManager {
    pub fn new(
        pool: Arc<dyn PoolService>,
        registry: Arc<SessionRegistry>,
        dialect: SqlDialect,
    ) -> Self {
        let tab_id = registry.allocate_tab_id();
        Self {
            tab_id,
            dialect,
            pool,
            registry,
            slot: Mutex::new(SessionSlot {
                state: SessionState::Disconnected,
                session: None,
                epoch: 0,
                closed: false,
                last_error: None,
                transaction_mode: TransactionMode::Auto,
            }),
            connect_gate: AsyncMutex::new(()),
        }
    }

    fn lock_slot(&self) -> std::sync::MutexGuard<'_, SessionSlot> {
        lock_or_recover(&self.slot, "session slot")
    }

    pub fn tab_id(&self) -> u64 {
        self.tab_id
    }

    pub fn dialect(&self) -> SqlDialect {
        self.dialect
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn state(&self) -> SessionState {
        self.lock_slot().state
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    pub fn current_session(&self) -> Option<Session> {
        self.lock_slot().session.clone()
    }

    pub fn current_database(&self) -> Option<String> {
        self.lock_slot()
            .session
            .as_ref()
            .and_then(|session| session.current_database.clone())
    }

    pub fn last_error(&self) -> Option<String> {
        self.lock_slot().last_error.clone()
    }

    pub fn transaction_mode(&self) -> TransactionMode {
        self.lock_slot().transaction_mode
    }

    pub fn identity(&self) -> SessionIdentity {
        SessionIdentity {
            tab_id: self.tab_id,
            epoch: self.lock_slot().epoch,
        }
    }

    /// True while `identity` still names the live session of an open tab.
    pub fn is_current(&self, identity: SessionIdentity) -> bool {
        let slot = self.lock_slot();
        !slot.closed && identity.tab_id == self.tab_id && identity.epoch == slot.epoch
    }

    pub fn is_closed(&self) -> bool {
        self.lock_slot().closed
    }

    /// Open a session for `profile`, replacing any current one. A concurrent
    /// call for the same profile and database joins the attempt in flight.
    pub async fn connect(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> WorkbenchResult<Session> {
        let key: ConnectKey = (
            self.tab_id,
            profile.name.clone(),
            database.map(str::to_string),
        );

        let role = {
            let mut in_flight = lock_or_recover(&self.registry.in_flight, "in-flight connects");
            match in_flight.get(&key) {
                Some(rx) => ConnectRole::Follower(rx.clone()),
                None => {
                    let (tx, rx) = watch::channel(None);
                    in_flight.insert(key.clone(), rx);
                    ConnectRole::Leader(tx)
                }
            }
        };

        match role {
            ConnectRole::Follower(rx) => {
                debug!("Joining in-flight connect to {} on tab {}", profile.name, self.tab_id);
                Self::await_in_flight(rx).await
            }
            ConnectRole::Leader(tx) => {
                let _guard = InFlightGuard {
                    registry: &self.registry,
                    key,
                };
                let outcome = self.connect_exclusive(profile, database).await;
                tx.send_replace(Some(outcome.clone().map_err(|err| match err {
                    WorkbenchError::ConnectionFailed(message) => message,
                    other => other.to_string(),
                })));
                outcome
            }
        }
    }

    async fn await_in_flight(mut rx: watch::Receiver<ConnectOutcome>) -> WorkbenchResult<Session> {
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(value) => (*value).clone(),
            Err(_) => None,
        };
        match outcome {
            Some(Ok(session)) => Ok(session),
            Some(Err(message)) => Err(WorkbenchError::ConnectionFailed(message)),
            None => Err(WorkbenchError::ConnectionFailed(
                "connection attempt was cancelled".to_string(),
            )),
        }
    }

    async fn connect_exclusive(
        &self,
        profile: &ConnectionProfile,
        database: Option<&str>,
    ) -> WorkbenchResult<Session> {
        let _gate = self.connect_gate.lock().await;
        if self.is_closed() {
            return Err(WorkbenchError::ConnectionFailed(
                "workbench tab is closed".to_string(),
            ));
        }

        // The old slot goes before anything new is requested.
        self.release_current().await;

        {
            let mut slot = self.lock_slot();
            slot.state = SessionState::Connecting;
            slot.last_error = None;
        }

        let target = database
            .map(str::to_string)
            .or_else(|| self.registry.last_used_database(&profile.name));
        info!(
            "Connecting tab {} to {} (database: {})",
            self.tab_id,
            profile.display_string(),
            target.as_deref().unwrap_or("<default>")
        );

        let session = match self.open_session(profile, target.as_deref()).await {
            Ok(session) => session,
            Err(message) => {
                warn!("Connection to {} failed: {message}", profile.name);
                let mut slot = self.lock_slot();
                slot.state = SessionState::Disconnected;
                slot.last_error = Some(message.clone());
                return Err(WorkbenchError::ConnectionFailed(message));
            }
        };

        let stored = {
            let mut slot = self.lock_slot();
            if slot.closed {
                false
            } else {
                slot.session = Some(session.clone());
                slot.state = SessionState::Connected;
                slot.transaction_mode = TransactionMode::Auto;
                slot.epoch += 1;
                true
            }
        };

        if !stored {
            debug!("Tab {} closed while connecting; releasing new slot", self.tab_id);
            self.release_slot(session.pool_id, session.connection_id).await;
            return Err(WorkbenchError::ConnectionFailed(
                "workbench tab was closed while connecting".to_string(),
            ));
        }

        if let Some(database) = &session.current_database {
            self.registry.remember_database(&profile.name, database);
        }
        info!(
            "Tab {} connected ({} / {})",
            self.tab_id, session.pool_id, session.connection_id
        );
        Ok(session)
    }

    /// Create pool, get connection, apply the database. Anything acquired is
    /// released again before an error is returned.
    async fn open_session(
        &self,
        profile: &ConnectionProfile,
        target: Option<&str>,
    ) -> Result<Session, String> {
        let pool_id = self
            .pool
            .create(profile)
            .await
            .map_err(|err| err.to_string())?;

        let connection_id = match self.pool.get_connection(pool_id, target).await {
            Ok(id) => id,
            Err(err) => {
                self.close_pool(pool_id).await;
                return Err(err.to_string());
            }
        };

        if let Some(database) = target {
            let use_sql = self.dialect.use_database_sql(database);
            if let Err(err) = self.pool.execute(pool_id, connection_id, &use_sql).await {
                self.release_slot(pool_id, connection_id).await;
                return Err(err.to_string());
            }
        }

        Ok(Session {
            pool_id,
            connection_id,
            profile: profile.redacted(),
            current_database: target.map(str::to_string),
        })
    }

    async fn close_pool(&self, pool_id: PoolId) {
        if let Err(err) = self.pool.close(pool_id).await {
            warn!("Failed to close {pool_id}: {err}");
        }
    }

    async fn release_slot(&self, pool_id: PoolId, connection_id: ConnectionId) {
        if let Err(err) = self.pool.release_connection(pool_id, connection_id).await {
            warn!("Failed to release {connection_id} from {pool_id}: {err}");
        }
        self.close_pool(pool_id).await;
    }

    /// Detach the current session, if any, and hand its slot back.
    async fn release_current(&self) {
        let previous = {
            let mut slot = self.lock_slot();
            let previous = slot.session.take();
            slot.state = SessionState::Disconnected;
            if previous.is_some() {
                slot.epoch += 1;
            }
            previous
        };
        if let Some(session) = previous {
            debug!(
                "Releasing {} / {} for tab {}",
                session.pool_id, session.connection_id, self.tab_id
            );
            self.release_slot(session.pool_id, session.connection_id).await;
        }
    }

    pub async fn disconnect(&self) {
        let _gate = self.connect_gate.lock().await;
        self.release_current().await;
        info!("Tab {} disconnected", self.tab_id);
    }

    /// Tab teardown. Does not wait for an in-flight connect; that attempt
    /// releases its own slot when it sees the closed flag.
    pub async fn shutdown(&self) {
        {
            let mut slot = self.lock_slot();
            if slot.closed {
                return;
            }
            slot.closed = true;
            slot.epoch += 1;
        }
        self.release_current().await;
        debug!("Tab {} shut down", self.tab_id);
    }

    fn live_slot(&self, identity: SessionIdentity) -> WorkbenchResult<(PoolId, ConnectionId)> {
        let slot = self.lock_slot();
        if slot.closed || identity.tab_id != self.tab_id || identity.epoch != slot.epoch {
            return Err(WorkbenchError::SessionChanged);
        }
        slot.session
            .as_ref()
            .map(|session| (session.pool_id, session.connection_id))
            .ok_or(WorkbenchError::NoActiveConnection)
    }

    pub async fn execute(&self, identity: SessionIdentity, sql: &str) -> WorkbenchResult<ExecuteResult> {
        let (pool_id, connection_id) = self.live_slot(identity)?;
        debug!("execute on {connection_id}: {sql}");
        self.pool
            .execute(pool_id, connection_id, sql)
            .await
            .map_err(|err| WorkbenchError::StatementExecutionFailed(err.to_string()))
    }

    pub async fn query(&self, identity: SessionIdentity, sql: &str) -> WorkbenchResult<RowSet> {
        let (pool_id, connection_id) = self.live_slot(identity)?;
        debug!("query on {connection_id}: {sql}");
        self.pool
            .query(pool_id, connection_id, sql)
            .await
            .map_err(|err| WorkbenchError::StatementExecutionFailed(err.to_string()))
    }

    pub async fn query_multi(
        &self,
        identity: SessionIdentity,
        sql: &str,
    ) -> WorkbenchResult<MultiResult> {
        let (pool_id, connection_id) = self.live_slot(identity)?;
        debug!("query_multi on {connection_id}: {sql}");
        self.pool
            .query_multi(pool_id, connection_id, sql)
            .await
            .map_err(|err| WorkbenchError::StatementExecutionFailed(err.to_string()))
    }

    /// Record a database change that already succeeded on the connection.
    pub async fn apply_database_switch(
        &self,
        identity: SessionIdentity,
        database: &str,
    ) -> WorkbenchResult<()> {
        let (pool_id, connection_id, profile_name) = {
            let mut slot = self.lock_slot();
            if slot.closed || identity.epoch != slot.epoch {
                return Err(WorkbenchError::SessionChanged);
            }
            let session = slot
                .session
                .as_mut()
                .ok_or(WorkbenchError::NoActiveConnection)?;
            session.current_database = Some(database.to_string());
            (
                session.pool_id,
                session.connection_id,
                session.profile.name.clone(),
            )
        };

        self.registry.remember_database(&profile_name, database);
        if let Err(err) = self.pool.set_database(pool_id, connection_id, database).await {
            warn!("Pool bookkeeping for database {database} failed: {err}");
        }
        info!("Tab {} switched to database {database}", self.tab_id);
        Ok(())
    }

    /// Returns `Ok(false)` without doing anything when not connected.
    pub async fn switch_database(&self, database: &str) -> WorkbenchResult<bool> {
        if !self.is_connected() {
            return Ok(false);
        }
        let identity = self.identity();
        self.execute(identity, &self.dialect.use_database_sql(database))
            .await?;
        self.apply_database_switch(identity, database).await?;
        Ok(true)
    }

    pub async fn set_transaction_mode(&self, mode: TransactionMode) -> WorkbenchResult<()> {
        let identity = self.identity();
        let sql = self.dialect.autocommit_sql(mode == TransactionMode::Auto);
        self.execute(identity, &sql).await?;

        let mut slot = self.lock_slot();
        if slot.epoch != identity.epoch {
            return Err(WorkbenchError::SessionChanged);
        }
        slot.transaction_mode = mode;
        info!("Tab {} transaction mode: {mode}", self.tab_id);
        Ok(())
    }

    pub async fn commit(&self) -> WorkbenchResult<()> {
        self.execute(self.identity(), "COMMIT").await.map(|_| ())
    }

    pub async fn rollback(&self) -> WorkbenchResult<()> {
        self.execute(self.identity(), "ROLLBACK").await.map(|_| ())
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod session_tests;
