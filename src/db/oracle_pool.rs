use async_trait::async_trait;
use oracle::sql_type::RefCursor;
use oracle::{Connection, Error as OracleError, ResultSet, Row};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::db::pool::{ConnectionId, PoolError, PoolId, PoolResult, PoolService};
use crate::db::query::{ColumnInfo, ExecuteResult, MultiResult, RowSet, ScriptSplitter};
use crate::db::{ConnectionProfile, SqlDialect};
use crate::utils::lock_or_recover;

impl From<OracleError> for PoolError {
    fn from(err: OracleError) -> Self {
        PoolError::Database(err.to_string())
    }
}

type SharedConnection = Arc<Mutex<Connection>>;

struct OraclePool {
    profile: ConnectionProfile,
    connections: HashMap<ConnectionId, SharedConnection>,
    schemas: HashMap<ConnectionId, String>,
}

/// What a workbench statement means once it reaches an Oracle session.
#[derive(Debug, PartialEq, Eq)]
enum OracleCommand {
    Sql(String),
    UseSchema(String),
    AutoCommit(bool),
    Commit,
    Rollback,
}

/// `PoolService` backed by the `oracle` crate. Each pool remembers the
/// profile it was created from and hands out dedicated connections; calls run
/// on the blocking thread pool.
pub struct OraclePoolService {
    next_id: AtomicU64,
    pools: Mutex<HashMap<PoolId, OraclePool>>,
}

impl OraclePoolService {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pools: Mutex::new(HashMap::new()),
        }
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn lookup(
        &self,
        pool: PoolId,
        connection: ConnectionId,
    ) -> PoolResult<(SharedConnection, ConnectionProfile, Option<String>)> {
        let pools = lock_or_recover(&self.pools, "oracle pool table");
        let entry = pools.get(&pool).ok_or(PoolError::UnknownPool(pool))?;
        let handle = entry
            .connections
            .get(&connection)
            .cloned()
            .ok_or(PoolError::UnknownConnection(pool, connection))?;
        let schema = entry.schemas.get(&connection).cloned();
        Ok((handle, entry.profile.clone(), schema))
    }

    async fn run_blocking<T, F>(work: F) -> PoolResult<T>
    where
        F: FnOnce() -> PoolResult<T> + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(work)
            .await
            .map_err(|err| PoolError::Worker(err.to_string()))?
    }

    fn open_connection(
        profile: &ConnectionProfile,
        schema: Option<&str>,
    ) -> Result<Connection, OracleError> {
        let connection = Connection::connect(
            &profile.username,
            &profile.password,
            Self::connect_target(profile),
        )?;
        Self::apply_default_session_settings(&connection);
        connection.set_call_timeout(profile.query_timeout())?;
        if let Some(schema) = schema {
            connection.execute(&SqlDialect::Oracle.use_database_sql(schema), &[])?;
        }
        Ok(connection)
    }

    /// Easy Connect string, with the profile's connect timeout appended.
    fn connect_target(profile: &ConnectionProfile) -> String {
        let target = profile.connection_string();
        match profile.connect_timeout() {
            Some(timeout) => format!("{target}?connect_timeout={}", timeout.as_secs()),
            None => target,
        }
    }

    fn apply_default_session_settings(conn: &Connection) {
        let statements = [
            "ALTER SESSION SET NLS_TIMESTAMP_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
            "ALTER SESSION SET NLS_DATE_FORMAT = 'yyyy-mm-dd hh24:mi:ss'",
        ];
        for statement in statements {
            if let Err(err) = conn.execute(statement, &[]) {
                warn!("Failed to apply default session setting `{statement}`: {err}");
            }
        }
    }

    /// Reopen a dead connection in place when the profile asks for it.
    fn ensure_alive(
        conn: &mut Connection,
        profile: &ConnectionProfile,
        schema: Option<&str>,
    ) -> PoolResult<()> {
        if !profile.auto_reconnect || conn.ping().is_ok() {
            return Ok(());
        }
        info!("Connection for profile {} was lost; reconnecting", profile.name);
        *conn = Self::open_connection(profile, schema)?;
        Ok(())
    }

    fn interpret(sql: &str) -> OracleCommand {
        let cleaned = ScriptSplitter::strip_leading_comments(sql);
        if let Some(schema) = ScriptSplitter::use_directive_target(&cleaned) {
            return OracleCommand::UseSchema(schema);
        }

        let upper = cleaned.to_uppercase().replace('=', " = ");
        let words: Vec<&str> = upper
            .trim_end_matches(';')
            .split_whitespace()
            .collect();
        match words.as_slice() {
            ["SET", "AUTOCOMMIT", "ON"] | ["SET", "AUTOCOMMIT", "=", "1"] => {
                return OracleCommand::AutoCommit(true)
            }
            ["SET", "AUTOCOMMIT", "OFF"] | ["SET", "AUTOCOMMIT", "=", "0"] => {
                return OracleCommand::AutoCommit(false)
            }
            ["COMMIT"] | ["COMMIT", "WORK"] => return OracleCommand::Commit,
            ["ROLLBACK"] | ["ROLLBACK", "WORK"] => return OracleCommand::Rollback,
            _ => {}
        }

        OracleCommand::Sql(Self::clean_statement(&cleaned))
    }

    /// Drop the trailing `;` except on PL/SQL units, which need it.
    fn clean_statement(sql: &str) -> String {
        let trimmed = sql.trim();
        if ScriptSplitter::is_plsql_unit(trimmed) {
            trimmed.to_string()
        } else {
            trimmed.trim_end_matches(';').trim_end().to_string()
        }
    }

    /// `CALL p(1)` becomes `BEGIN p(1); END;` so implicit results can be read.
    fn call_as_block(sql: &str) -> String {
        let cleaned = Self::clean_statement(&ScriptSplitter::strip_leading_comments(sql));
        if ScriptSplitter::is_plsql_unit(&cleaned) {
            return cleaned;
        }
        let body = match cleaned.split_once(char::is_whitespace) {
            Some((keyword, rest)) if keyword.eq_ignore_ascii_case("CALL") => rest.trim(),
            _ => cleaned.as_str(),
        };
        format!("BEGIN {body}; END;")
    }

    fn explain_target(sql: &str) -> Option<String> {
        let cleaned = Self::clean_statement(&ScriptSplitter::strip_leading_comments(sql));
        let upper = cleaned.to_uppercase();
        let prefix = "EXPLAIN PLAN FOR ";
        if !upper.starts_with(prefix) {
            return None;
        }
        cleaned.get(prefix.len()..).map(|rest| rest.trim().to_string())
    }

    fn collect_rows(result_set: ResultSet<'_, Row>) -> Result<RowSet, OracleError> {
        let columns: Vec<ColumnInfo> = result_set
            .column_info()
            .iter()
            .map(|col| ColumnInfo {
                name: col.name().to_string(),
                data_type: format!("{:?}", col.oracle_type()),
            })
            .collect();

        let mut rows = Vec::new();
        for row_result in result_set {
            let row: Row = row_result?;
            let mut cells = Vec::with_capacity(columns.len());
            for i in 0..columns.len() {
                cells.push(Self::cell_text(row.get::<_, Option<String>>(i)));
            }
            rows.push(cells);
        }
        Ok(RowSet::new(columns, rows))
    }

    /// Cells that cannot be read as text show an error marker instead of NULL.
    fn cell_text<E: std::fmt::Display>(value: Result<Option<String>, E>) -> Option<String> {
        match value {
            Ok(text) => text,
            Err(err) => {
                debug!("Cell conversion failed: {err}");
                Some(format!("<error: {err}>"))
            }
        }
    }

    fn fetch_rows(conn: &Connection, sql: &str) -> Result<RowSet, OracleError> {
        let mut stmt = conn.statement(sql).build()?;
        let result_set = stmt.query(&[])?;
        Self::collect_rows(result_set)
    }

    fn drain_cursor(cursor: &mut RefCursor) -> Result<RowSet, OracleError> {
        let result_set = cursor.query()?;
        Self::collect_rows(result_set)
    }

    fn explain_plan(conn: &Connection, target: &str) -> Result<RowSet, OracleError> {
        conn.execute(&format!("EXPLAIN PLAN FOR {target}"), &[])?;
        Self::fetch_rows(
            conn,
            "SELECT plan_table_output FROM TABLE(DBMS_XPLAN.DISPLAY('PLAN_TABLE', NULL, 'ALL'))",
        )
    }
}

impl Default for OraclePoolService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PoolService for OraclePoolService {
    async fn create(&self, profile: &ConnectionProfile) -> PoolResult<PoolId> {
        let id = PoolId(self.allocate_id());
        lock_or_recover(&self.pools, "oracle pool table").insert(
            id,
            OraclePool {
                profile: profile.clone(),
                connections: HashMap::new(),
                schemas: HashMap::new(),
            },
        );
        debug!("Created {id} for profile {}", profile.name);
        Ok(id)
    }

    async fn get_connection(
        &self,
        pool: PoolId,
        initial_database: Option<&str>,
    ) -> PoolResult<ConnectionId> {
        let profile = lock_or_recover(&self.pools, "oracle pool table")
            .get(&pool)
            .map(|entry| entry.profile.clone())
            .ok_or(PoolError::UnknownPool(pool))?;
        let schema = initial_database.map(str::to_string);
        let schema_for_open = schema.clone();
        let connection = Self::run_blocking(move || {
            Ok(Self::open_connection(&profile, schema_for_open.as_deref())?)
        })
        .await?;

        let id = ConnectionId(self.allocate_id());
        let mut pools = lock_or_recover(&self.pools, "oracle pool table");
        // The pool may have been closed while the connection was opening.
        let entry = pools.get_mut(&pool).ok_or(PoolError::UnknownPool(pool))?;
        entry.connections.insert(id, Arc::new(Mutex::new(connection)));
        if let Some(schema) = schema {
            entry.schemas.insert(id, schema);
        }
        debug!("Opened {id} in {pool}");
        Ok(id)
    }

    async fn release_connection(&self, pool: PoolId, connection: ConnectionId) -> PoolResult<()> {
        let mut pools = lock_or_recover(&self.pools, "oracle pool table");
        if let Some(entry) = pools.get_mut(&pool) {
            entry.schemas.remove(&connection);
            if entry.connections.remove(&connection).is_some() {
                debug!("Released {connection} from {pool}");
            }
        }
        Ok(())
    }

    async fn close(&self, pool: PoolId) -> PoolResult<()> {
        if lock_or_recover(&self.pools, "oracle pool table")
            .remove(&pool)
            .is_some()
        {
            debug!("Closed {pool}");
        }
        Ok(())
    }

    async fn close_all(&self) -> PoolResult<()> {
        let mut pools = lock_or_recover(&self.pools, "oracle pool table");
        let count = pools.len();
        pools.clear();
        if count > 0 {
            info!("Closed {count} Oracle pool(s)");
        }
        Ok(())
    }

    async fn execute(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<ExecuteResult> {
        let (handle, profile, schema) = self.lookup(pool, connection)?;
        let command = Self::interpret(sql);
        Self::run_blocking(move || {
            let mut conn = lock_or_recover(&handle, "oracle connection");
            Self::ensure_alive(&mut conn, &profile, schema.as_deref())?;
            match command {
                OracleCommand::UseSchema(schema) => {
                    conn.execute(&SqlDialect::Oracle.use_database_sql(&schema), &[])?;
                    Ok(ExecuteResult::default())
                }
                OracleCommand::AutoCommit(enabled) => {
                    conn.set_autocommit(enabled);
                    Ok(ExecuteResult::default())
                }
                OracleCommand::Commit => {
                    conn.commit()?;
                    Ok(ExecuteResult::default())
                }
                OracleCommand::Rollback => {
                    conn.rollback()?;
                    Ok(ExecuteResult::default())
                }
                OracleCommand::Sql(sql) => {
                    let stmt = conn.execute(&sql, &[])?;
                    Ok(ExecuteResult {
                        affected_rows: stmt.row_count()?,
                        last_insert_id: None,
                    })
                }
            }
        })
        .await
    }

    async fn query(&self, pool: PoolId, connection: ConnectionId, sql: &str) -> PoolResult<RowSet> {
        let (handle, profile, schema) = self.lookup(pool, connection)?;
        let sql = sql.to_string();
        Self::run_blocking(move || {
            let mut conn = lock_or_recover(&handle, "oracle connection");
            Self::ensure_alive(&mut conn, &profile, schema.as_deref())?;
            let rows = match Self::explain_target(&sql) {
                Some(target) => Self::explain_plan(&conn, &target)?,
                None => Self::fetch_rows(&conn, &Self::clean_statement(&sql))?,
            };
            Ok(rows)
        })
        .await
    }

    async fn query_multi(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<MultiResult> {
        let (handle, profile, schema) = self.lookup(pool, connection)?;
        let block = Self::call_as_block(sql);
        Self::run_blocking(move || {
            let mut conn = lock_or_recover(&handle, "oracle connection");
            Self::ensure_alive(&mut conn, &profile, schema.as_deref())?;
            let mut stmt = conn.statement(&block).build()?;
            stmt.execute(&[])?;
            let mut result_sets = Vec::new();
            while let Some(mut cursor) = stmt.implicit_result()? {
                result_sets.push(Self::drain_cursor(&mut cursor)?);
            }
            Ok(MultiResult {
                result_sets,
                affected_rows: stmt.row_count()?,
                last_insert_id: None,
            })
        })
        .await
    }

    async fn set_database(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        database: &str,
    ) -> PoolResult<()> {
        let mut pools = lock_or_recover(&self.pools, "oracle pool table");
        let entry = pools.get_mut(&pool).ok_or(PoolError::UnknownPool(pool))?;
        if !entry.connections.contains_key(&connection) {
            return Err(PoolError::UnknownConnection(pool, connection));
        }
        // Remembered so an auto-reconnect lands in the same schema.
        entry.schemas.insert(connection, database.to_string());
        Ok(())
    }
}
