//! Per-backend match helpers for [`DbPool`] and [`DbConnection`].
//!
//! Each arm binds the concrete sqlx pool or connection, so a body written
//! once per backend reads as three parallel lines at the call site.
//!
//! [`DbPool`]: crate::db::pool::DbPool
//! [`DbConnection`]: crate::db::pool::DbConnection

/// Match on a `DbPool`, one arm per backend.
///
/// ```ignore
/// impl_db_dispatch!(&self.pool, {
///     MySql(p) => p.close().await,
///     Postgres(p) => p.close().await,
///     SQLite(p) => p.close().await,
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($backend:ident($inner:ident) => $arm:expr),+ $(,)? }) => {
        match $pool {
            $( $crate::db::pool::DbPool::$backend($inner) => $arm, )+
        }
    };
}

/// Match on a checked-out `DbConnection`.
#[macro_export]
macro_rules! impl_conn_dispatch {
    ($conn:expr, { $($backend:ident($inner:ident) => $arm:expr),+ $(,)? }) => {
        match $conn {
            $( $crate::db::pool::DbConnection::$backend($inner) => $arm, )+
        }
    };
}

pub use impl_conn_dispatch;
pub use impl_db_dispatch;
