//! Database access layer.
//!
//! - Connection pools and the accessor registry
//! - Per-backend SQL dialects
//! - Statement preparation, binding and row decoding
//! - The per-unit-of-work helper and its commands
//! - Entity CRUD and paged reads

pub mod command;
pub mod dialect;
mod driver;
pub mod executor;
pub mod helper;
#[macro_use]
pub mod macros;
pub mod paging;
pub mod params;
pub mod pool;
pub mod types;

pub use command::{DbCommand, IdentityResult};
pub use dialect::{
    Dialect, IdentityFetch, MySqlDialect, PlaceholderStyle, PostgresDialect, SqliteDialect,
    dialect_for,
};
pub use executor::{CommandExecutor, DEFAULT_ID_COLUMN};
pub use helper::{DbHelper, RouteHasher};
pub use paging::{PagingReader, PagingState, PagingStrategy};
pub use pool::{DbConnection, DbPool, ProviderRegistry, create_pool};
