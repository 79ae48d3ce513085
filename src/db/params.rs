//! Statement preparation and parameter binding.
//!
//! Statement text is written with provider-prefixed named parameters
//! (`@name`, or `?name` on MySQL). [`prepare_statement`] rewrites every
//! token that names a known parameter into the driver's placeholder and
//! collects the bind list in placeholder order. Tokens inside string
//! literals, quoted identifiers and comments are never touched, and tokens
//! that do not name a parameter are copied unchanged.

use crate::db::dialect::{Dialect, PlaceholderStyle};
use crate::models::{DbParameter, DbParameters, DbType, DbValue};
use chrono::NaiveDateTime;
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::collections::HashMap;

/// Driver-ready statement text and its binds in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedStatement {
    pub sql: String,
    pub binds: Vec<DbParameter>,
}

impl PreparedStatement {
    pub fn has_binds(&self) -> bool {
        !self.binds.is_empty()
    }
}

pub fn prepare_statement(
    text: &str,
    dialect: &dyn Dialect,
    params: &DbParameters,
) -> PreparedStatement {
    if params.is_empty() {
        return PreparedStatement {
            sql: text.to_string(),
            binds: Vec::new(),
        };
    }

    let prefix = dialect.parameter_prefix();
    let style = dialect.placeholder_style();
    let backslash_escapes = prefix == '?';
    let chars: Vec<char> = text.chars().collect();
    let n = chars.len();

    let mut sql = String::with_capacity(text.len());
    let mut binds: Vec<DbParameter> = Vec::new();
    let mut numbered: HashMap<String, usize> = HashMap::new();
    let mut i = 0;

    while i < n {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                i = copy_quoted(&chars, i, backslash_escapes && c == '\'', &mut sql);
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < n && chars[i] != '\n' {
                    sql.push(chars[i]);
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                sql.push_str("/*");
                i += 2;
                while i < n && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    sql.push(chars[i]);
                    i += 1;
                }
                if i < n {
                    sql.push_str("*/");
                    i += 2;
                }
            }
            c if c == prefix && chars.get(i + 1) == Some(&prefix) => {
                // `@@var` system variables
                sql.push(c);
                sql.push(c);
                i += 2;
            }
            c if c == prefix && chars.get(i + 1).is_some_and(|ch| is_ident_start(*ch)) => {
                let start = i + 1;
                let mut end = start;
                while end < n && is_ident_char(chars[end]) {
                    end += 1;
                }
                let name: String = chars[start..end].iter().collect();
                let token = format!("{}{}", prefix, name);
                match params.get(&token) {
                    Some(param) => {
                        match style {
                            PlaceholderStyle::Positional => {
                                binds.push(param.clone());
                                sql.push('?');
                            }
                            PlaceholderStyle::Numbered => {
                                let key = token.to_lowercase();
                                let idx = match numbered.get(&key) {
                                    Some(idx) => *idx,
                                    None => {
                                        binds.push(param.clone());
                                        numbered.insert(key, binds.len());
                                        binds.len()
                                    }
                                };
                                sql.push('$');
                                sql.push_str(&idx.to_string());
                            }
                        }
                    }
                    None => sql.push_str(&token),
                }
                i = end;
            }
            _ => {
                sql.push(c);
                i += 1;
            }
        }
    }

    PreparedStatement { sql, binds }
}

/// Copy a quoted run starting at `start`; returns the index after the closing quote.
fn copy_quoted(chars: &[char], start: usize, backslash_escapes: bool, out: &mut String) -> usize {
    let quote = chars[start];
    out.push(quote);
    let mut i = start + 1;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if backslash_escapes && c == '\\' {
            if let Some(next) = chars.get(i + 1) {
                out.push(*next);
            }
            i += 2;
            continue;
        }
        if c == quote {
            // doubled quote stays inside the literal
            if chars.get(i + 1) == Some(&quote) {
                out.push(quote);
                i += 2;
                continue;
            }
            return i + 1;
        }
        i += 1;
    }
    i
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Bind a parameter to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match &param.value {
        DbValue::Null => match param.db_type {
            DbType::Boolean => query.bind(None::<bool>),
            DbType::Int16 | DbType::Int32 | DbType::Int64 => query.bind(None::<i64>),
            DbType::Float | DbType::Double => query.bind(None::<f64>),
            DbType::DateTime => query.bind(None::<NaiveDateTime>),
            DbType::Binary => query.bind(None::<Vec<u8>>),
            _ => query.bind(None::<String>),
        },
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::DateTime(v) => query.bind(*v),
        DbValue::String(v) => query.bind(v.as_str()),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
        DbValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a PostgreSQL query.
///
/// NULLs are bound with the declared type so the server can infer the
/// parameter type.
pub(crate) fn bind_postgres_param<'q>(
    query: sqlx::query::Query<'q, Postgres, PgArguments>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, Postgres, PgArguments> {
    match &param.value {
        DbValue::Null => match param.db_type {
            DbType::Boolean => query.bind(None::<bool>),
            DbType::Int16 => query.bind(None::<i16>),
            DbType::Int32 => query.bind(None::<i32>),
            DbType::Int64 => query.bind(None::<i64>),
            DbType::Float => query.bind(None::<f32>),
            DbType::Double => query.bind(None::<f64>),
            DbType::DateTime => query.bind(None::<NaiveDateTime>),
            DbType::Binary => query.bind(None::<Vec<u8>>),
            DbType::Json => query.bind(None::<Json<serde_json::Value>>),
            _ => query.bind(None::<String>),
        },
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => match param.db_type {
            DbType::Int16 => match i16::try_from(*v) {
                Ok(v) => query.bind(v),
                Err(_) => query.bind(*v),
            },
            DbType::Int32 => match i32::try_from(*v) {
                Ok(v) => query.bind(v),
                Err(_) => query.bind(*v),
            },
            _ => query.bind(*v),
        },
        DbValue::Float(v) => query.bind(*v),
        DbValue::DateTime(v) => query.bind(*v),
        DbValue::String(v) => query.bind(v.as_str()),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
        DbValue::Json(v) => query.bind(Json(v)),
    }
}

/// Bind a parameter to a SQLite query.
pub(crate) fn bind_sqlite_param<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    param: &'q DbParameter,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match &param.value {
        DbValue::Null => query.bind(None::<String>),
        DbValue::Bool(v) => query.bind(*v),
        DbValue::Int(v) => query.bind(*v),
        DbValue::Float(v) => query.bind(*v),
        DbValue::DateTime(v) => query.bind(*v),
        DbValue::String(v) => query.bind(v.as_str()),
        DbValue::Bytes(v) => query.bind(v.as_slice()),
        // SQLite doesn't have native JSON type, store as string
        DbValue::Json(v) => query.bind(v.to_string()),
    }
}
