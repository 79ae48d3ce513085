//! Per-unit-of-work database helper.
//!
//! A [`DbHelper`] owns at most one checked-out connection per pool (the
//! primary plus any replicas). Statements open the connection they need and
//! release it afterwards unless the helper is told to keep it, or a
//! transaction is pinned to it.
//!
//! # Routing
//!
//! Reads go to a replica when replicas exist, no transaction is active and
//! routing is not disabled. With several replicas the statement text is
//! hashed so the same statement lands on the same replica.
//!
//! # Cancellation
//!
//! A statement future dropped mid-flight leaves its session pinned in the
//! helper; the next [`close`](DbHelper::close) or drop releases it.

use crate::config::HelperOptions;
use crate::db::command::DbCommand;
use crate::db::dialect::{Dialect, dialect_for};
use crate::db::driver;
use crate::db::executor::CommandExecutor;
use crate::db::paging::PagingReader;
use crate::db::pool::{DbConnection, DbPool};
use crate::error::{DbError, DbResult};
use crate::mapping::DbEntity;
use crate::models::{
    CommandKind, ConnectionTarget, DatabaseType, DbParameters, DbRow, DbValue, IsolationLevel,
};
use crate::sql::{CommandBuilder, ConditionBuilder, SqlSyntax};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Maps statement text to a hash used to pick a replica.
pub type RouteHasher = Arc<dyn Fn(&str) -> u64 + Send + Sync>;

#[derive(Debug, Clone, Copy)]
struct TransactionScope {
    /// The transaction opened the primary session and must release it.
    opened_connection: bool,
}

pub struct DbHelper {
    /// Slot 0 is the primary, replicas follow.
    pools: Vec<DbPool>,
    sessions: Vec<Option<DbConnection>>,
    syntax: SqlSyntax,
    transaction: Option<TransactionScope>,
    keep_connection: bool,
    ignore_replicas: bool,
    slow_threshold: Option<Duration>,
    statement_timeout: Duration,
    route_hasher: Option<RouteHasher>,
}

impl DbHelper {
    pub fn new(pool: DbPool) -> Self {
        Self::with_options(pool, &HelperOptions::default())
    }

    pub fn with_options(pool: DbPool, options: &HelperOptions) -> Self {
        let syntax = SqlSyntax::new(dialect_for(pool.db_type()));
        Self {
            pools: vec![pool],
            sessions: vec![None],
            syntax,
            transaction: None,
            keep_connection: options.keep_connection,
            ignore_replicas: false,
            slow_threshold: options.slow_query_threshold(),
            statement_timeout: options.effective_statement_timeout(),
            route_hasher: None,
        }
    }

    /// Replace the dialect, e.g. to change how identities are fetched.
    pub fn with_dialect(mut self, dialect: Arc<dyn Dialect>) -> DbResult<Self> {
        if dialect.database_type() != self.database_type() {
            return Err(DbError::configuration(format!(
                "Dialect for {} cannot drive a {} pool",
                dialect.database_type(),
                self.database_type()
            )));
        }
        self.syntax = SqlSyntax::new(dialect);
        Ok(self)
    }

    pub fn add_replica(&mut self, pool: DbPool) -> DbResult<()> {
        if pool.db_type() != self.database_type() {
            return Err(DbError::configuration(format!(
                "Replica backend {} does not match primary backend {}",
                pool.db_type(),
                self.database_type()
            )));
        }
        self.pools.push(pool);
        self.sessions.push(None);
        Ok(())
    }

    pub fn database_type(&self) -> DatabaseType {
        self.pools[0].db_type()
    }

    pub fn syntax(&self) -> &SqlSyntax {
        &self.syntax
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        self.syntax.dialect()
    }

    pub fn replica_count(&self) -> usize {
        self.pools.len() - 1
    }

    pub fn keep_connection(&self) -> bool {
        self.keep_connection
    }

    pub fn set_keep_connection(&mut self, keep: bool) {
        self.keep_connection = keep;
    }

    pub fn ignore_replicas(&self) -> bool {
        self.ignore_replicas
    }

    /// Send every statement to the primary.
    pub fn set_ignore_replicas(&mut self, ignore: bool) {
        self.ignore_replicas = ignore;
    }

    pub fn set_route_hasher(&mut self, hasher: RouteHasher) {
        self.route_hasher = Some(hasher);
    }

    pub fn slow_query_threshold(&self) -> Option<Duration> {
        self.slow_threshold
    }

    pub fn set_slow_query_threshold(&mut self, threshold: Option<Duration>) {
        self.slow_threshold = threshold;
    }

    pub fn statement_timeout(&self) -> Duration {
        self.statement_timeout
    }

    pub fn set_statement_timeout(&mut self, timeout: Duration) {
        self.statement_timeout = timeout;
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn is_open(&self, target: ConnectionTarget) -> bool {
        self.sessions
            .get(target.slot())
            .is_some_and(|s| s.is_some())
    }

    /// Pick the connection a statement runs on.
    pub fn route(&self, kind: CommandKind, text: &str) -> ConnectionTarget {
        let replicas = self.replica_count();
        if self.ignore_replicas || self.transaction.is_some() || replicas == 0 {
            return ConnectionTarget::Primary;
        }

        let is_read = match kind {
            CommandKind::TableDirect => true,
            CommandKind::Text => starts_with_select(text),
        };
        if !is_read {
            return ConnectionTarget::Primary;
        }
        if replicas == 1 {
            return ConnectionTarget::Replica(0);
        }

        let hash = match &self.route_hasher {
            Some(hasher) => hasher(text),
            None => {
                let mut h = DefaultHasher::new();
                text.hash(&mut h);
                h.finish()
            }
        };
        ConnectionTarget::Replica((hash % replicas as u64) as usize)
    }

    pub fn create_command(&mut self, text: impl Into<String>) -> DbCommand<'_> {
        DbCommand::new(self, CommandKind::Text, text.into())
    }

    /// Command that reads a whole table.
    pub fn create_table_command(&mut self, table: impl Into<String>) -> DbCommand<'_> {
        DbCommand::new(self, CommandKind::TableDirect, table.into())
    }

    pub fn condition_builder(&self) -> ConditionBuilder {
        ConditionBuilder::new(self.syntax.clone())
    }

    pub fn command_builder(&self, table: &str) -> CommandBuilder {
        CommandBuilder::new(self.syntax.clone(), table)
    }

    pub fn executor(&mut self) -> CommandExecutor<'_> {
        CommandExecutor::new(self)
    }

    pub fn paging_reader(&mut self, select: impl Into<String>) -> PagingReader<'_> {
        PagingReader::new(self, select.into())
    }

    pub fn escape_string(&self, value: &str) -> String {
        self.syntax.escape_string(value)
    }

    pub fn next_parameter_name(&self) -> String {
        self.syntax.next_parameter_name()
    }

    // =========================================================================
    // Shorthands
    // =========================================================================

    pub async fn execute_non_query(
        &mut self,
        text: impl Into<String>,
        params: DbParameters,
    ) -> DbResult<u64> {
        self.create_command(text)
            .with_parameters(params)
            .execute_non_query()
            .await
    }

    pub async fn execute_scalar(
        &mut self,
        text: impl Into<String>,
        params: DbParameters,
    ) -> DbResult<Option<DbValue>> {
        self.create_command(text)
            .with_parameters(params)
            .execute_scalar()
            .await
    }

    pub async fn execute_rows(
        &mut self,
        text: impl Into<String>,
        params: DbParameters,
    ) -> DbResult<Vec<DbRow>> {
        self.create_command(text)
            .with_parameters(params)
            .execute_rows()
            .await
    }

    pub async fn execute_entity<T: DbEntity>(
        &mut self,
        text: impl Into<String>,
        params: DbParameters,
    ) -> DbResult<Option<T>> {
        self.create_command(text)
            .with_parameters(params)
            .execute_entity()
            .await
    }

    pub async fn execute_entities<T: DbEntity>(
        &mut self,
        text: impl Into<String>,
        params: DbParameters,
    ) -> DbResult<Vec<T>> {
        self.create_command(text)
            .with_parameters(params)
            .execute_entities()
            .await
    }

    // =========================================================================
    // Connection Lifecycle
    // =========================================================================

    /// Open the primary connection and keep it until [`close`](Self::close).
    pub async fn open(&mut self) -> DbResult<()> {
        self.ensure_session(ConnectionTarget::Primary).await?;
        Ok(())
    }

    /// Release every connection. An active transaction is rolled back first.
    pub async fn close(&mut self) {
        if self.transaction.is_some() {
            warn!("Closing helper with an active transaction; rolling back");
            // rollback never fails; errors are logged inside
            let _ = self.rollback().await;
        }
        for slot in 0..self.sessions.len() {
            self.release_slot(slot);
        }
    }

    /// Which slots currently hold a session, primary first.
    pub(crate) fn open_slots(&self) -> Vec<bool> {
        self.sessions.iter().map(Option::is_some).collect()
    }

    /// Release sessions opened after `before` was taken. Sessions that were
    /// already open stay, as do the transaction connection and everything
    /// under `keep_connection`.
    pub(crate) fn release_sessions_opened_since(&mut self, before: &[bool]) {
        if self.keep_connection {
            return;
        }
        for slot in 0..self.sessions.len() {
            let was_open = before.get(slot).copied().unwrap_or(false);
            if was_open || (slot == 0 && self.transaction.is_some()) {
                continue;
            }
            self.release_slot(slot);
        }
    }

    /// Open the session for `target` if needed. Returns true when this call opened it.
    pub(crate) async fn ensure_session(&mut self, target: ConnectionTarget) -> DbResult<bool> {
        let slot = target.slot();
        let Some(pool) = self.pools.get(slot) else {
            return Err(DbError::internal(format!("No pool for {}", target)));
        };
        if self.sessions[slot].is_some() {
            return Ok(false);
        }
        let conn = pool.acquire().await?;
        self.sessions[slot] = Some(conn);
        debug!(target = %target, "Connection opened");
        Ok(true)
    }

    pub(crate) fn session_mut(&mut self, target: ConnectionTarget) -> Option<&mut DbConnection> {
        self.sessions.get_mut(target.slot()).and_then(Option::as_mut)
    }

    pub(crate) fn release_session(&mut self, target: ConnectionTarget) {
        self.release_slot(target.slot());
    }

    fn release_slot(&mut self, slot: usize) {
        let Some(session) = self.sessions.get_mut(slot) else {
            return;
        };
        if session.take().is_some() {
            debug!(slot, "Connection released");
            if slot == 0 {
                self.syntax.reset_sequence();
            }
        }
    }

    pub(crate) fn log_slow(&self, sql: &str, params: &DbParameters, elapsed: Duration) {
        let Some(threshold) = self.slow_threshold else {
            return;
        };
        if exceeds(elapsed, threshold) {
            info!(
                sql = %sql,
                params = %params,
                elapsed_ms = elapsed.as_millis() as u64,
                threshold_ms = threshold.as_millis() as u64,
                "Slow statement"
            );
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Begin a transaction on the primary. Does nothing when one is active.
    pub async fn begin_transaction(&mut self) -> DbResult<()> {
        self.begin(None).await
    }

    pub async fn begin_transaction_with(&mut self, level: IsolationLevel) -> DbResult<()> {
        self.begin(Some(level)).await
    }

    async fn begin(&mut self, level: Option<IsolationLevel>) -> DbResult<()> {
        if self.transaction.is_some() {
            debug!("Transaction already active");
            return Ok(());
        }

        let opened = self.ensure_session(ConnectionTarget::Primary).await?;
        let statements = self.dialect().begin_statements(level);
        for sql in statements {
            if let Err(e) = self.run_on_primary(&sql).await {
                error!(sql = %sql, error = %e, "Failed to begin transaction");
                if opened {
                    self.release_session(ConnectionTarget::Primary);
                }
                return Err(DbError::transaction(format!("Failed to begin transaction: {}", e)));
            }
        }

        self.transaction = Some(TransactionScope {
            opened_connection: opened,
        });
        debug!(isolation = ?level, "Transaction started");
        Ok(())
    }

    /// Commit the active transaction.
    ///
    /// On failure a rollback is attempted and the original error is returned.
    pub async fn commit(&mut self) -> DbResult<()> {
        let Some(scope) = self.transaction.take() else {
            return Err(DbError::transaction("No active transaction to commit"));
        };

        let commit = self.dialect().commit_statement();
        let result = self.run_on_primary(commit).await;
        match result {
            Ok(_) => {
                debug!("Transaction committed");
                self.finish_transaction(scope);
                Ok(())
            }
            Err(e) => {
                error!(error = %e, "Commit failed; rolling back");
                let rollback = self.dialect().rollback_statement();
                if let Err(rollback_err) = self.run_on_primary(rollback).await {
                    warn!(error = %rollback_err, "Rollback after failed commit also failed");
                    self.discard_primary();
                }
                self.finish_transaction(scope);
                Err(DbError::transaction(format!("Commit failed: {}", e)))
            }
        }
    }

    /// Roll back the active transaction. Does nothing when none is active.
    pub async fn rollback(&mut self) -> DbResult<()> {
        let Some(scope) = self.transaction.take() else {
            return Ok(());
        };

        let rollback = self.dialect().rollback_statement();
        match self.run_on_primary(rollback).await {
            Ok(_) => debug!("Transaction rolled back"),
            Err(e) => {
                warn!(error = %e, "Rollback failed; discarding connection");
                self.discard_primary();
            }
        }
        self.finish_transaction(scope);
        Ok(())
    }

    fn finish_transaction(&mut self, scope: TransactionScope) {
        if scope.opened_connection && !self.keep_connection {
            self.release_session(ConnectionTarget::Primary);
        }
    }

    /// Drop the primary session without returning it to the pool.
    fn discard_primary(&mut self) {
        if let Some(Some(conn)) = self.sessions.get_mut(0) {
            conn.close_on_drop();
        }
        self.release_session(ConnectionTarget::Primary);
    }

    async fn run_on_primary(&mut self, sql: &str) -> DbResult<u64> {
        let timeout = self.statement_timeout;
        match self.session_mut(ConnectionTarget::Primary) {
            Some(conn) => driver::execute_raw(conn, sql, timeout).await,
            None => Err(DbError::transaction("Transaction connection is not open")),
        }
    }
}

impl Drop for DbHelper {
    fn drop(&mut self) {
        if self.transaction.is_some() {
            // An open transaction must not go back to the pool
            if let Some(Some(conn)) = self.sessions.get_mut(0) {
                conn.close_on_drop();
            }
            warn!("Helper dropped with an active transaction; connection discarded");
        }
    }
}

impl std::fmt::Debug for DbHelper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbHelper")
            .field("database_type", &self.database_type())
            .field("replicas", &self.replica_count())
            .field(
                "open_sessions",
                &self.sessions.iter().filter(|s| s.is_some()).count(),
            )
            .field("in_transaction", &self.transaction.is_some())
            .field("keep_connection", &self.keep_connection)
            .field("ignore_replicas", &self.ignore_replicas)
            .finish_non_exhaustive()
    }
}

fn starts_with_select(text: &str) -> bool {
    text.trim_start()
        .get(..6)
        .is_some_and(|head| head.eq_ignore_ascii_case("select"))
}

/// Strictly longer than the threshold; a statement taking exactly it is not slow.
fn exceeds(elapsed: Duration, threshold: Duration) -> bool {
    elapsed > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slow_threshold_is_exclusive() {
        let threshold = Duration::from_millis(250);
        assert!(!exceeds(Duration::from_millis(249), threshold));
        assert!(!exceeds(threshold, threshold));
        assert!(exceeds(Duration::from_millis(251), threshold));
    }

    #[test]
    fn test_starts_with_select() {
        assert!(starts_with_select("  select * from t"));
        assert!(starts_with_select("SELECT 1"));
        assert!(!starts_with_select("UPDATE t SET a=1"));
        assert!(!starts_with_select("sel"));
        assert!(!starts_with_select(" WITH x AS (SELECT 1) SELECT * FROM x"));
    }
}
