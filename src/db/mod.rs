pub mod connection;
pub mod dialect;
pub mod oracle_pool;
pub mod pool;
pub mod query;
pub mod session;

pub use connection::*;
pub use dialect::*;
pub use oracle_pool::OraclePoolService;
pub use pool::*;
pub use query::*;
pub use session::*;
