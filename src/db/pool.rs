use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::db::query::{ExecuteResult, MultiResult, RowSet};
use crate::db::ConnectionProfile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "pool#{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("unknown pool {0}")]
    UnknownPool(PoolId),

    #[error("unknown connection {1} in {0}")]
    UnknownConnection(PoolId, ConnectionId),

    #[error("{0}")]
    Database(String),

    #[error("pool worker failed: {0}")]
    Worker(String),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Backend that owns pooled database connections. Every call is a suspension
/// point; implementations must tolerate releasing an already-released slot.
#[async_trait]
pub trait PoolService: Send + Sync {
    async fn create(&self, profile: &ConnectionProfile) -> PoolResult<PoolId>;

    async fn get_connection(
        &self,
        pool: PoolId,
        initial_database: Option<&str>,
    ) -> PoolResult<ConnectionId>;

    async fn release_connection(&self, pool: PoolId, connection: ConnectionId) -> PoolResult<()>;

    async fn close(&self, pool: PoolId) -> PoolResult<()>;

    async fn close_all(&self) -> PoolResult<()>;

    async fn execute(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<ExecuteResult>;

    async fn query(&self, pool: PoolId, connection: ConnectionId, sql: &str) -> PoolResult<RowSet>;

    async fn query_multi(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        sql: &str,
    ) -> PoolResult<MultiResult>;

    /// Bookkeeping for a database switch that already happened on the
    /// connection; does not itself issue `USE`.
    async fn set_database(
        &self,
        pool: PoolId,
        connection: ConnectionId,
        database: &str,
    ) -> PoolResult<()>;
}
