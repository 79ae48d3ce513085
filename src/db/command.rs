//! One statement bound to a helper.
//!
//! A [`DbCommand`] borrows its [`DbHelper`] mutably for its whole life, so a
//! helper runs one statement at a time. Executing consumes the command.

use crate::db::dialect::IdentityFetch;
use crate::db::driver;
use crate::db::helper::DbHelper;
use crate::db::params::{PreparedStatement, prepare_statement};
use crate::db::pool::DbConnection;
use crate::error::{DbError, DbResult};
use crate::mapping::{DbEntity, to_entity, to_entity_list};
use crate::models::{
    CommandKind, ConnectionTarget, DbParameter, DbParameters, DbRow, DbType, DbValue, FromDbValue,
};
use std::time::{Duration, Instant};
use tracing::{debug, error};

/// Outcome of an INSERT that reports the generated key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IdentityResult {
    pub rows_affected: u64,
    /// `None` when no row was inserted or the backend reported no key.
    pub identity: Option<i64>,
}

enum Operation {
    NonQuery,
    Rows { skip: usize, take: Option<usize> },
    Identity(IdentityFetch),
}

enum Outcome {
    Affected(u64),
    Rows(Vec<DbRow>),
    Identity(IdentityResult),
}

pub struct DbCommand<'h> {
    helper: &'h mut DbHelper,
    kind: CommandKind,
    text: String,
    parameters: DbParameters,
    keep_connection: bool,
    timeout: Duration,
}

impl<'h> DbCommand<'h> {
    pub(crate) fn new(helper: &'h mut DbHelper, kind: CommandKind, text: String) -> Self {
        let timeout = helper.statement_timeout();
        Self {
            helper,
            kind,
            text,
            parameters: DbParameters::new(),
            keep_connection: false,
            timeout,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn parameters(&self) -> &DbParameters {
        &self.parameters
    }

    pub fn with_parameters(mut self, parameters: DbParameters) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn parameter(mut self, parameter: DbParameter) -> Self {
        self.parameters.add(parameter);
        self
    }

    /// Add a parameter typed from its value. `name` may omit the prefix.
    pub fn bind(mut self, name: &str, value: impl Into<DbValue>) -> Self {
        let value = value.into();
        let param = self
            .helper
            .syntax()
            .create_parameter(name, DbType::of(&value), None, value);
        self.parameters.add(param);
        self
    }

    pub fn kind(mut self, kind: CommandKind) -> Self {
        self.kind = kind;
        self
    }

    /// Leave the connection open after execution.
    pub fn keep_connection(mut self, keep: bool) -> Self {
        self.keep_connection = keep;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Connection this command would run on right now.
    pub fn target(&self) -> ConnectionTarget {
        self.helper.route(self.kind, &self.text)
    }

    pub async fn execute_non_query(self) -> DbResult<u64> {
        match self.run(Operation::NonQuery).await? {
            Outcome::Affected(n) => Ok(n),
            Outcome::Rows(rows) => Ok(rows.len() as u64),
            Outcome::Identity(r) => Ok(r.rows_affected),
        }
    }

    pub async fn execute_rows(self) -> DbResult<Vec<DbRow>> {
        self.execute_row_range(0, None).await
    }

    /// Skip `skip` rows of the result and return at most `take` of the rest.
    pub async fn execute_row_range(self, skip: usize, take: Option<usize>) -> DbResult<Vec<DbRow>> {
        match self.run(Operation::Rows { skip, take }).await? {
            Outcome::Rows(rows) => Ok(rows),
            _ => Ok(Vec::new()),
        }
    }

    /// First column of the first row; `None` when the result is empty.
    pub async fn execute_scalar(self) -> DbResult<Option<DbValue>> {
        let rows = self.execute_row_range(0, Some(1)).await?;
        Ok(rows.into_iter().next().and_then(|row| row.first().cloned()))
    }

    /// Scalar converted to `T`. An empty result or NULL gives `None`.
    pub async fn execute_scalar_as<T: FromDbValue>(self) -> DbResult<Option<T>> {
        match self.execute_scalar().await? {
            None | Some(DbValue::Null) => Ok(None),
            Some(value) => {
                let converted = T::from_db_value(value)
                    .map_err(|e| DbError::conversion("scalar", e.to_string()))?;
                Ok(Some(converted))
            }
        }
    }

    pub async fn execute_entity<T: DbEntity>(self) -> DbResult<Option<T>> {
        let rows = self.execute_row_range(0, Some(1)).await?;
        Ok(rows.first().map(to_entity::<T>))
    }

    pub async fn execute_entities<T: DbEntity>(self) -> DbResult<Vec<T>> {
        self.execute_entity_range(0, None).await
    }

    pub async fn execute_entity_range<T: DbEntity>(
        self,
        skip: usize,
        take: Option<usize>,
    ) -> DbResult<Vec<T>> {
        let rows = self.execute_row_range(skip, take).await?;
        Ok(to_entity_list::<T>(rows))
    }

    /// Run an INSERT and report the key generated for `identity_column`.
    pub async fn execute_identity(self, identity_column: &str) -> DbResult<IdentityResult> {
        let fetch = self.helper.dialect().identity_fetch(identity_column);
        match self.run(Operation::Identity(fetch)).await? {
            Outcome::Identity(r) => Ok(r),
            Outcome::Affected(n) => Ok(IdentityResult {
                rows_affected: n,
                identity: None,
            }),
            Outcome::Rows(rows) => Ok(IdentityResult {
                rows_affected: rows.len() as u64,
                identity: None,
            }),
        }
    }

    async fn run(self, op: Operation) -> DbResult<Outcome> {
        let DbCommand {
            helper,
            kind,
            text,
            parameters,
            keep_connection,
            timeout,
        } = self;

        let target = helper.route(kind, &text);
        let sql_text = match kind {
            CommandKind::Text => text,
            CommandKind::TableDirect => {
                format!("SELECT * FROM {}", helper.syntax().quote_identifier(&text))
            }
        };
        let mut prepared = prepare_statement(&sql_text, helper.dialect().as_ref(), &parameters);
        if let Operation::Identity(IdentityFetch::Returning(suffix)) = &op {
            let trimmed = prepared.sql.trim_end().trim_end_matches(';').len();
            prepared.sql.truncate(trimmed);
            prepared.sql.push_str(suffix);
        }

        debug!(
            sql = %prepared.sql,
            params = %parameters,
            target = %target,
            "Executing statement"
        );

        let opened_here = match helper.ensure_session(target).await {
            Ok(opened) => opened,
            Err(e) => {
                error!(sql = %prepared.sql, params = %parameters, error = %e, "Failed to open connection");
                return Err(e);
            }
        };
        let keep = keep_connection || helper.keep_connection() || helper.in_transaction();

        let start = Instant::now();
        let result = match helper.session_mut(target) {
            Some(conn) => run_on(conn, &prepared, &op, timeout).await,
            None => Err(DbError::internal(format!(
                "No open connection for {}",
                target
            ))),
        };
        let elapsed = start.elapsed();

        if opened_here && (result.is_err() || !keep) {
            helper.release_session(target);
        }

        match &result {
            Ok(_) => helper.log_slow(&prepared.sql, &parameters, elapsed),
            Err(e) => error!(
                sql = %prepared.sql,
                params = %parameters,
                elapsed_ms = elapsed.as_millis() as u64,
                error = %e,
                "Statement failed"
            ),
        }
        result
    }
}

async fn run_on(
    conn: &mut DbConnection,
    prepared: &PreparedStatement,
    op: &Operation,
    timeout: Duration,
) -> DbResult<Outcome> {
    match op {
        Operation::NonQuery => driver::execute(conn, prepared, timeout)
            .await
            .map(Outcome::Affected),
        Operation::Rows { skip, take } => driver::fetch(conn, prepared, *skip, *take, timeout)
            .await
            .map(Outcome::Rows),
        Operation::Identity(IdentityFetch::Returning(_)) => {
            let rows = driver::fetch(conn, prepared, 0, None, timeout).await?;
            let identity = rows.first().and_then(|row| row.first()).and_then(identity_of);
            Ok(Outcome::Identity(IdentityResult {
                rows_affected: rows.len() as u64,
                identity,
            }))
        }
        Operation::Identity(IdentityFetch::FollowUp(sql)) => {
            let rows_affected = driver::execute(conn, prepared, timeout).await?;
            // No row means the key function still holds an older value
            let identity = if rows_affected > 0 {
                let follow_up = PreparedStatement {
                    sql: sql.clone(),
                    binds: Vec::new(),
                };
                let rows = driver::fetch(conn, &follow_up, 0, Some(1), timeout).await?;
                rows.first().and_then(|row| row.first()).and_then(identity_of)
            } else {
                None
            };
            Ok(Outcome::Identity(IdentityResult {
                rows_affected,
                identity,
            }))
        }
    }
}

fn identity_of(value: &DbValue) -> Option<i64> {
    match value {
        DbValue::Null => None,
        other => i64::from_db_value(other.clone()).ok(),
    }
}

impl std::fmt::Debug for DbCommand<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbCommand")
            .field("kind", &self.kind)
            .field("text", &self.text)
            .field("parameters", &self.parameters)
            .field("keep_connection", &self.keep_connection)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}
