//! Identifier quoting and parameter factory bound to one dialect.

use crate::db::dialect::Dialect;
use crate::models::{DatabaseType, DbParameter, DbType, DbValue};
use crate::models::value::is_unset_datetime;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};

/// Dialect-aware text helpers shared by a helper and the builders it hands out.
///
/// Clones share the quoting cache and the parameter-name sequence.
#[derive(Debug, Clone)]
pub struct SqlSyntax {
    dialect: Arc<dyn Dialect>,
    quoted: Arc<RwLock<HashMap<String, String>>>,
    sequence: Arc<AtomicU32>,
}

impl SqlSyntax {
    pub fn new(dialect: Arc<dyn Dialect>) -> Self {
        Self {
            dialect,
            quoted: Arc::new(RwLock::new(HashMap::new())),
            sequence: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn dialect(&self) -> &Arc<dyn Dialect> {
        &self.dialect
    }

    pub fn database_type(&self) -> DatabaseType {
        self.dialect.database_type()
    }

    pub fn parameter_prefix(&self) -> char {
        self.dialect.parameter_prefix()
    }

    /// Quote a column or table name.
    ///
    /// Qualified names (`schema.table`) and names that already carry quotes
    /// are returned unchanged.
    pub fn quote_identifier(&self, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() {
            return String::new();
        }
        if name.contains('.') || name.starts_with(['"', '`', '[']) {
            return name.to_string();
        }

        if let Ok(cache) = self.quoted.read() {
            if let Some(q) = cache.get(name) {
                return q.clone();
            }
        }

        let quoted = self.dialect.quote_identifier(name);
        if let Ok(mut cache) = self.quoted.write() {
            cache.insert(name.to_string(), quoted.clone());
        }
        quoted
    }

    /// Prefixed parameter name for `name`; dots become underscores.
    pub fn parameter_name(&self, name: &str) -> String {
        let prefix = self.parameter_prefix();
        if name.starts_with(prefix) {
            return name.to_string();
        }
        format!("{}{}", prefix, name.replace('.', "_"))
    }

    /// Next sequential name, `p1`, `p2`, ... (without prefix).
    pub fn next_parameter_name(&self) -> String {
        let n = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        format!("p{}", n)
    }

    pub fn reset_sequence(&self) {
        self.sequence.store(0, Ordering::Relaxed);
    }

    /// Build a parameter, applying value coercion.
    ///
    /// Unset datetimes (min/max) become NULL, and string values longer
    /// than a non-zero `size` are truncated to `size` characters.
    pub fn create_parameter(
        &self,
        name: &str,
        db_type: DbType,
        size: Option<usize>,
        value: impl Into<DbValue>,
    ) -> DbParameter {
        let value = coerce_value(value.into(), db_type, size);
        DbParameter {
            name: self.parameter_name(name),
            db_type,
            size: size.filter(|s| *s > 0),
            direction: Default::default(),
            value,
        }
    }

    pub fn escape_string(&self, value: &str) -> String {
        self.dialect.escape_string(value)
    }
}

fn coerce_value(value: DbValue, db_type: DbType, size: Option<usize>) -> DbValue {
    match value {
        DbValue::DateTime(v) if is_unset_datetime(&v) => DbValue::Null,
        DbValue::String(s) if db_type.is_string() => match size {
            Some(size) if size > 0 && s.chars().count() > size => {
                DbValue::String(s.chars().take(size).collect())
            }
            _ => DbValue::String(s),
        },
        other => other,
    }
}
