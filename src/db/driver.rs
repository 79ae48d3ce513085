//! Statement execution on a checked-out connection.
//!
//! # Architecture
//!
//! Each submodule provides the same interface adapted to its database type:
//! `execute` returns the affected row count, `fetch` streams rows, skips
//! `skip` of them client side and collects at most `take`. Statements
//! without binds are sent as raw SQL so that text the driver cannot prepare
//! (transaction control, DDL) still runs.

use crate::db::params::PreparedStatement;
use crate::db::pool::DbConnection;
use crate::db::types::RowDecode;
use crate::error::{DbError, DbResult};
use crate::impl_conn_dispatch;
use crate::models::DbRow;
use futures_util::StreamExt;
use std::time::Duration;
use tokio::time::timeout;

pub(crate) async fn execute(
    conn: &mut DbConnection,
    stmt: &PreparedStatement,
    limit: Duration,
) -> DbResult<u64> {
    impl_conn_dispatch!(conn, {
        MySql(c) => mysql::execute(c, stmt, limit).await,
        Postgres(c) => postgres::execute(c, stmt, limit).await,
        SQLite(c) => sqlite::execute(c, stmt, limit).await,
    })
}

pub(crate) async fn fetch(
    conn: &mut DbConnection,
    stmt: &PreparedStatement,
    skip: usize,
    take: Option<usize>,
    limit: Duration,
) -> DbResult<Vec<DbRow>> {
    impl_conn_dispatch!(conn, {
        MySql(c) => mysql::fetch(c, stmt, skip, take, limit).await,
        Postgres(c) => postgres::fetch(c, stmt, skip, take, limit).await,
        SQLite(c) => sqlite::fetch(c, stmt, skip, take, limit).await,
    })
}

/// Run statement text without parameters, e.g. `COMMIT`.
pub(crate) async fn execute_raw(
    conn: &mut DbConnection,
    sql: &str,
    limit: Duration,
) -> DbResult<u64> {
    let stmt = PreparedStatement {
        sql: sql.to_string(),
        binds: Vec::new(),
    };
    execute(conn, &stmt, limit).await
}

// =============================================================================
// Common Helper Functions
// =============================================================================

fn collect_rows<R: RowDecode>(results: Vec<Result<R, sqlx::Error>>) -> DbResult<Vec<DbRow>> {
    let mut rows = Vec::with_capacity(results.len());
    for result in results {
        rows.push(result.map_err(DbError::from)?.to_db_row());
    }
    Ok(rows)
}

fn timeout_error(operation: &str, limit: Duration) -> DbError {
    DbError::timeout(operation, limit)
}

// =============================================================================
// Database-Specific Implementations
// =============================================================================
//
// The code structure is intentionally parallel to make differences obvious.

mod mysql {
    use super::*;
    use crate::db::params::bind_mysql_param;
    use sqlx::MySql;
    use sqlx::pool::PoolConnection;

    pub async fn execute(
        conn: &mut PoolConnection<MySql>,
        stmt: &PreparedStatement,
        limit: Duration,
    ) -> DbResult<u64> {
        let result = if stmt.binds.is_empty() {
            use sqlx::Executor;
            timeout(limit, (&mut **conn).execute(stmt.sql.as_str())).await
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_mysql_param(query, param);
            }
            timeout(limit, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", limit)),
        }
    }

    pub async fn fetch(
        conn: &mut PoolConnection<MySql>,
        stmt: &PreparedStatement,
        skip: usize,
        take: Option<usize>,
        limit: Duration,
    ) -> DbResult<Vec<DbRow>> {
        let take = take.unwrap_or(usize::MAX);
        let rows_future = if stmt.binds.is_empty() {
            use sqlx::Executor;
            let stream = (&mut **conn).fetch(stmt.sql.as_str());
            stream.skip(skip).take(take).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_mysql_param(query, param);
            }
            let stream = query.fetch(&mut **conn);
            stream.skip(skip).take(take).collect::<Vec<_>>()
        };

        match timeout(limit, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", limit)),
        }
    }
}

mod postgres {
    use super::*;
    use crate::db::params::bind_postgres_param;
    use sqlx::Postgres;
    use sqlx::pool::PoolConnection;

    pub async fn execute(
        conn: &mut PoolConnection<Postgres>,
        stmt: &PreparedStatement,
        limit: Duration,
    ) -> DbResult<u64> {
        let result = if stmt.binds.is_empty() {
            use sqlx::Executor;
            timeout(limit, (&mut **conn).execute(stmt.sql.as_str())).await
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_postgres_param(query, param);
            }
            timeout(limit, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", limit)),
        }
    }

    pub async fn fetch(
        conn: &mut PoolConnection<Postgres>,
        stmt: &PreparedStatement,
        skip: usize,
        take: Option<usize>,
        limit: Duration,
    ) -> DbResult<Vec<DbRow>> {
        let take = take.unwrap_or(usize::MAX);
        let rows_future = if stmt.binds.is_empty() {
            use sqlx::Executor;
            let stream = (&mut **conn).fetch(stmt.sql.as_str());
            stream.skip(skip).take(take).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_postgres_param(query, param);
            }
            let stream = query.fetch(&mut **conn);
            stream.skip(skip).take(take).collect::<Vec<_>>()
        };

        match timeout(limit, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", limit)),
        }
    }
}

mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite_param;
    use sqlx::Sqlite;
    use sqlx::pool::PoolConnection;

    pub async fn execute(
        conn: &mut PoolConnection<Sqlite>,
        stmt: &PreparedStatement,
        limit: Duration,
    ) -> DbResult<u64> {
        let result = if stmt.binds.is_empty() {
            use sqlx::Executor;
            timeout(limit, (&mut **conn).execute(stmt.sql.as_str())).await
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_sqlite_param(query, param);
            }
            timeout(limit, query.execute(&mut **conn)).await
        };

        match result {
            Ok(Ok(r)) => Ok(r.rows_affected()),
            Ok(Err(e)) => Err(DbError::from(e)),
            Err(_) => Err(timeout_error("statement execution", limit)),
        }
    }

    pub async fn fetch(
        conn: &mut PoolConnection<Sqlite>,
        stmt: &PreparedStatement,
        skip: usize,
        take: Option<usize>,
        limit: Duration,
    ) -> DbResult<Vec<DbRow>> {
        let take = take.unwrap_or(usize::MAX);
        let rows_future = if stmt.binds.is_empty() {
            use sqlx::Executor;
            let stream = (&mut **conn).fetch(stmt.sql.as_str());
            stream.skip(skip).take(take).collect::<Vec<_>>()
        } else {
            let mut query = sqlx::query(&stmt.sql);
            for param in &stmt.binds {
                query = bind_sqlite_param(query, param);
            }
            let stream = query.fetch(&mut **conn);
            stream.skip(skip).take(take).collect::<Vec<_>>()
        };

        match timeout(limit, rows_future).await {
            Ok(results) => collect_rows(results),
            Err(_) => Err(timeout_error("query execution", limit)),
        }
    }
}
