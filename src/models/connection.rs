//! Connection-related data models.
//!
//! This module defines the backend kinds, command kinds, routing targets and
//! transaction isolation levels shared by the helper and the dialects.

use serde::{Deserialize, Serialize};

/// Backend behind an accessor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// MariaDB URLs map here as well.
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Backend named by the URL scheme; `None` for anything else.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let (scheme, _) = connection_string.split_once(':')?;
        match scheme.to_ascii_lowercase().as_str() {
            "postgres" | "postgresql" => Some(Self::PostgreSQL),
            "mysql" | "mariadb" => Some(Self::MySQL),
            "sqlite" => Some(Self::SQLite),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.display_name())
    }
}

/// How the text of a command is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CommandKind {
    /// Plain SQL text.
    #[default]
    Text,
    /// The text is a table name; the statement reads the whole table.
    TableDirect,
}

/// Which connection of a helper a statement runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionTarget {
    Primary,
    /// Index into the helper's replica list.
    Replica(usize),
}

impl ConnectionTarget {
    /// Slot index: 0 is the primary, replicas follow.
    pub(crate) fn slot(&self) -> usize {
        match self {
            Self::Primary => 0,
            Self::Replica(idx) => idx + 1,
        }
    }
}

impl std::fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Replica(idx) => write!(f, "replica[{}]", idx),
        }
    }
}

/// Transaction isolation level requested at begin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IsolationLevel {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

impl IsolationLevel {
    /// SQL keyword form, e.g. `READ COMMITTED`.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}
