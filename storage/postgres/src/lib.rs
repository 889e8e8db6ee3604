//! Document collections stored in Postgres.
//!
//! Each collection is a table of `(id TEXT PRIMARY KEY, data JSONB)` rows. Filters and updates
//! from [`mongres_ql`] are compiled into parameterized SQL over the `data` column, and every
//! write is a single statement, so a failed update never leaves a document half-changed.
//!
//! Connections come from bb8 pools handed out by a [`PoolRegistry`], one pool per target string.

mod collection;
mod cursor;
mod error;
pub mod mutation;
mod options;
mod pool;
pub mod predicate;
mod results;
pub mod sql_builder;
pub mod value;

pub use collection::PostgresCollection;
pub use cursor::{Cursor, DocumentStream};
pub use error::{error_kind, Error, ErrorKind, Operation};
pub use options::{FindOptions, SortDirection};
pub use pool::{PgConnection, PgPool, PoolConfig, PoolHandle, PoolRegistry, DEFAULT_CONNECTION_TIMEOUT, DEFAULT_POOL_SIZE};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
