//! Data models shared by the builders and the execution layer.
//!
//! This module re-exports all model types used throughout the crate.

pub mod connection;
pub mod parameter;
pub mod range;
pub mod row;
pub mod value;

// Re-export commonly used types
pub use connection::{CommandKind, ConnectionTarget, DatabaseType, IsolationLevel};
pub use parameter::{DbParameter, DbParameters, ParameterDirection};
pub use range::{Compare, DateTimeRange, Relation, TrueOrFalse, ValueRange};
pub use row::DbRow;
pub use value::{ConvertError, CriteriaValue, DbType, DbValue, FromDbValue};
