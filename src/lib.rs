//! Dynamic SQL access for PostgreSQL, MySQL and SQLite.
//!
//! A [`DbHelper`] runs parameterized statements over a primary database and
//! optional read replicas, with explicit transactions, entity mapping,
//! condition and command builders, and paged reads.

pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod mapping;
pub mod models;
pub mod sql;

pub use config::{DatabaseConfig, HelperOptions, PoolOptions};
pub use db::{
    CommandExecutor, DbCommand, DbHelper, DbPool, IdentityResult, PagingReader, PagingStrategy,
    ProviderRegistry,
};
pub use error::{DbError, DbResult};
pub use mapping::{DbEntity, DbField, EMPTY_GROUP, NO_GROUP, Operable};
pub use models::{DbParameter, DbParameters, DbRow, DbType, DbValue};
pub use sql::{CommandBuilder, ConditionBuilder, SqlSyntax};
