//! The connection pool: [`ConnectionFactory`] + [`PooledConnection`] define
//! what the pool manages, [`TtlConnection`] is one lifetime-bounded,
//! self-refreshing endpoint, and [`ConnectionPool`] is the bounded
//! channel of them.

pub mod factory;
pub mod pool;
pub mod ttl_connection;

pub use factory::ConnectionFactory;
pub use pool::{ConnectionPool, PoolConfig, PoolError, PoolState};
pub use ttl_connection::{PooledConnection, TtlConnection, TtlConnectionConfig};
