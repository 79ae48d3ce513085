//! Provider dialects.
//!
//! A [`Dialect`] captures everything that differs textually between
//! backends: identifier quoting, parameter prefix and placeholder style,
//! how the identity of an inserted row is fetched, paging clauses and the
//! transaction control statements. The helper only talks to this trait.

use crate::models::{DatabaseType, IsolationLevel};
use std::fmt::Debug;
use std::sync::Arc;

/// Placeholder form the driver expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaceholderStyle {
    /// `?` for every parameter, bound in order of appearance.
    Positional,
    /// `$1`, `$2`, ... with a repeated name reusing its index.
    Numbered,
}

/// How an INSERT reports the identity of the new row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityFetch {
    /// Suffix appended to the INSERT itself; the statement yields one row
    /// whose first column is the identity.
    Returning(String),
    /// Statement run after the INSERT on the same connection.
    FollowUp(String),
}

pub trait Dialect: Send + Sync + Debug {
    fn database_type(&self) -> DatabaseType;

    /// Prefix of named parameters in statement text.
    fn parameter_prefix(&self) -> char {
        '@'
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Positional
    }

    /// Quote one identifier. Callers pass names without dots.
    fn quote_identifier(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    fn identity_fetch(&self, identity_column: &str) -> IdentityFetch;

    /// Native `offset/count` clause, `None` when rows must be skipped client side.
    fn paging_clause(&self, offset: u64, count: u64) -> Option<String> {
        Some(format!(" LIMIT {} OFFSET {}", count, offset))
    }

    fn limit_clause(&self, count: u64) -> String {
        format!(" LIMIT {}", count)
    }

    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String>;

    fn commit_statement(&self) -> &'static str {
        "COMMIT"
    }

    fn rollback_statement(&self) -> &'static str {
        "ROLLBACK"
    }

    /// Escape text for inclusion inside a single-quoted literal.
    fn escape_string(&self, value: &str) -> String {
        value.replace('\'', "''")
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlDialect;

impl Dialect for MySqlDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn parameter_prefix(&self) -> char {
        '?'
    }

    fn quote_identifier(&self, name: &str) -> String {
        format!("`{}`", name.replace('`', "``"))
    }

    fn identity_fetch(&self, _identity_column: &str) -> IdentityFetch {
        IdentityFetch::FollowUp("SELECT LAST_INSERT_ID()".to_string())
    }

    fn paging_clause(&self, offset: u64, count: u64) -> Option<String> {
        Some(format!(" LIMIT {},{}", offset, count))
    }

    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String> {
        let mut stmts = Vec::with_capacity(2);
        if let Some(level) = level {
            stmts.push(format!("SET TRANSACTION ISOLATION LEVEL {}", level.as_sql()));
        }
        stmts.push("START TRANSACTION".to_string());
        stmts
    }

    fn escape_string(&self, value: &str) -> String {
        let mut out = String::with_capacity(value.len());
        for ch in value.chars() {
            match ch {
                '\'' => out.push_str("''"),
                '\\' => out.push_str("\\\\"),
                '\0' => out.push_str("\\0"),
                _ => out.push(ch),
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresDialect;

impl Dialect for PostgresDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn placeholder_style(&self) -> PlaceholderStyle {
        PlaceholderStyle::Numbered
    }

    fn identity_fetch(&self, identity_column: &str) -> IdentityFetch {
        IdentityFetch::Returning(format!(" RETURNING {}", self.quote_identifier(identity_column)))
    }

    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String> {
        match level {
            Some(level) => vec![format!("BEGIN ISOLATION LEVEL {}", level.as_sql())],
            None => vec!["BEGIN".to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDialect;

impl Dialect for SqliteDialect {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn identity_fetch(&self, _identity_column: &str) -> IdentityFetch {
        IdentityFetch::FollowUp("SELECT last_insert_rowid()".to_string())
    }

    // SQLite has no isolation levels; serializable takes the write lock up front.
    fn begin_statements(&self, level: Option<IsolationLevel>) -> Vec<String> {
        match level {
            Some(IsolationLevel::Serializable) => vec!["BEGIN IMMEDIATE".to_string()],
            _ => vec!["BEGIN".to_string()],
        }
    }
}

/// Built-in dialect for a backend.
pub fn dialect_for(db_type: DatabaseType) -> Arc<dyn Dialect> {
    match db_type {
        DatabaseType::MySQL => Arc::new(MySqlDialect),
        DatabaseType::PostgreSQL => Arc::new(PostgresDialect),
        DatabaseType::SQLite => Arc::new(SqliteDialect),
    }
}
