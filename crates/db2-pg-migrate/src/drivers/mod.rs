//! Database drivers.
//!
//! - [`db2`]: DB2 source over ODBC
//! - [`postgres`]: PostgreSQL target over a deadpool connection pool
//! - [`retry`]: connection retry shared by both

pub mod db2;
pub mod postgres;
pub mod retry;

pub use db2::Db2Source;
pub use postgres::PgTarget;
pub use retry::{connect_with_retry, RetryPolicy};
