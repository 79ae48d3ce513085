//! Error types for the data access layer.
//!
//! All fallible operations return [`DbResult`]. Statement failures reported by
//! the driver are converted once (see the `From<sqlx::Error>` impl) and then
//! propagated unchanged; the helper never retries on its own.

use sqlx::error::ErrorKind;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    /// The pool could not hand out a working connection.
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    /// The backend rejected a statement.
    #[error("Database error: {message}")]
    Database {
        message: String,
        /// e.g., "23505" for a unique violation
        sql_state: Option<String>,
        suggestion: String,
    },

    /// Invalid provider or accessor configuration, detected at construction time.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Conversion error on '{column}': {message}")]
    Conversion { column: String, message: String },

    #[error("Transaction error: {message}")]
    Transaction { message: String },

    #[error("Statement timed out after {}ms: {operation}", .limit.as_millis())]
    Timeout { operation: String, limit: Duration },

    #[error("No accessor registered as '{id}'")]
    AccessorNotFound { id: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn conversion(column: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Conversion {
            column: column.into(),
            message: message.into(),
        }
    }

    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, limit: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            limit,
        }
    }

    pub fn accessor_not_found(id: impl Into<String>) -> Self {
        Self::AccessorNotFound { id: id.into() }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Hint for the caller, for connection and statement failures.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } | Self::Database { suggestion, .. } => {
                Some(suggestion)
            }
            _ => None,
        }
    }

    /// Whether running the same call again may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::Timeout { .. })
    }
}

fn constraint_suggestion(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::UniqueViolation => "A row with the same key already exists",
        ErrorKind::ForeignKeyViolation => "The referenced row is missing or still referenced",
        ErrorKind::NotNullViolation => "Bind a value for every NOT NULL column",
        ErrorKind::CheckViolation => "A value breaks a CHECK constraint on the table",
        _ => "Check the statement text and the referenced tables and columns",
    }
}

impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                let suggestion = constraint_suggestion(db_err.kind());
                DbError::database(db_err.message(), code, suggestion)
            }
            sqlx::Error::Configuration(msg) => DbError::configuration(msg.to_string()),
            sqlx::Error::PoolTimedOut => DbError::connection(
                "Timed out waiting for a pooled connection",
                "Release idle helpers or raise max_connections / acquire_timeout",
            ),
            sqlx::Error::PoolClosed => DbError::connection(
                "Connection pool is closed",
                "The accessor was disconnected; register it again",
            ),
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnNotFound(col) => {
                DbError::conversion(col, "column missing from the result")
            }
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::conversion(index, source.to_string())
            }
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            other => DbError::internal(format!("Driver error: {}", other)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
