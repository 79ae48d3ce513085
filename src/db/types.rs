//! Row decoding into provider-neutral values.
//!
//! MySQL and PostgreSQL columns carry a declared type, which is mapped to a
//! [`ColumnKind`] once per column and then decoded with the matching Rust
//! type. SQLite types each value individually, so its decoder reads the
//! storage class of the value and only uses the declared type as a hint.
//!
//! Values that fail to decode become [`DbValue::Null`] and are logged; a
//! single odd column never fails a whole result set.

use crate::models::{DatabaseType, DbRow, DbValue};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Decode, Row, Type, TypeInfo};

/// What a declared column type decodes as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Decimal,
    Boolean,
    DateTime,
    Date,
    Time,
    Binary,
    Json,
    Text,
}

impl ColumnKind {
    /// Map a declared type name (`VARCHAR(20)`, `int8`, `TIMESTAMPTZ`) to a kind.
    pub fn classify(type_name: &str, db: DatabaseType) -> Self {
        let name = type_name.to_ascii_lowercase();
        let name = name.split('(').next().unwrap_or_default().trim();

        match name {
            // SQLite NUMERIC affinity stores REAL values
            "numeric" if db == DatabaseType::SQLite => return Self::Float,
            "bool" | "boolean" => return Self::Boolean,
            "date" => return Self::Date,
            "datetime" => return Self::DateTime,
            "json" | "jsonb" => return Self::Json,
            "bytea" => return Self::Binary,
            "real" => return Self::Float,
            // contain "int" but are not integers
            "interval" | "point" => return Self::Text,
            _ => {}
        }

        if name.contains("decimal") || name.contains("numeric") {
            Self::Decimal
        } else if name.starts_with("timestamp") {
            Self::DateTime
        } else if name.starts_with("time") {
            Self::Time
        } else if name.contains("blob") || name.contains("binary") {
            Self::Binary
        } else if name.contains("text") || name.contains("char") {
            Self::Text
        } else if ["int", "serial", "tiny"].iter().any(|p| name.contains(p)) {
            Self::Integer
        } else if name.contains("float") || name.contains("double") {
            Self::Float
        } else {
            Self::Text
        }
    }
}

/// DECIMAL / NUMERIC text exactly as the server sent it.
#[derive(Debug)]
pub struct DecimalText(pub String);

macro_rules! decimal_text_for {
    ($db:ty) => {
        impl Type<$db> for DecimalText {
            fn type_info() -> <$db as sqlx::Database>::TypeInfo {
                <String as Type<$db>>::type_info()
            }

            fn compatible(ty: &<$db as sqlx::Database>::TypeInfo) -> bool {
                let name = ty.name().to_ascii_lowercase();
                name.contains("decimal") || name.contains("numeric")
            }
        }

        impl<'r> Decode<'r, $db> for DecimalText {
            fn decode(
                value: <$db as sqlx::Database>::ValueRef<'r>,
            ) -> Result<Self, sqlx::error::BoxDynError> {
                <&str as Decode<$db>>::decode(value).map(|s| DecimalText(s.to_owned()))
            }
        }
    };
}

decimal_text_for!(sqlx::MySql);
decimal_text_for!(sqlx::Postgres);

/// Convert a driver row into a [`DbRow`].
pub trait RowDecode {
    fn to_db_row(&self) -> DbRow;
}

fn build_row<R: Row>(row: &R, mut decode: impl FnMut(usize, &str) -> DbValue) -> DbRow {
    let (columns, values) = row
        .columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| (col.name().to_string(), decode(idx, col.type_info().name())))
        .unzip();
    DbRow::new(columns, values)
}

impl RowDecode for MySqlRow {
    fn to_db_row(&self) -> DbRow {
        build_row(self, |idx, declared| {
            mysql::decode_column(self, idx, ColumnKind::classify(declared, DatabaseType::MySQL))
        })
    }
}

impl RowDecode for PgRow {
    fn to_db_row(&self) -> DbRow {
        build_row(self, |idx, declared| {
            let kind = ColumnKind::classify(declared, DatabaseType::PostgreSQL);
            postgres::decode_column(self, idx, kind)
        })
    }
}

impl RowDecode for SqliteRow {
    fn to_db_row(&self) -> DbRow {
        build_row(self, |idx, declared| sqlite::decode_column(self, idx, declared))
    }
}

fn time_value(v: NaiveTime) -> DbValue {
    DbValue::String(v.format("%H:%M:%S%.f").to_string())
}

fn date_value(v: NaiveDate) -> DbValue {
    DbValue::DateTime(v.and_time(NaiveTime::MIN))
}

fn utc_value(v: DateTime<Utc>) -> DbValue {
    DbValue::DateTime(v.naive_utc())
}

fn decimal_value(result: Result<Option<DecimalText>, sqlx::Error>, idx: usize) -> DbValue {
    match result {
        Ok(Some(v)) => DbValue::String(v.0),
        Ok(None) => DbValue::Null,
        Err(e) => {
            tracing::error!(column = idx, error = %e, "Failed to decode decimal column");
            DbValue::Null
        }
    }
}

mod mysql {
    use super::*;

    pub fn decode_column(row: &MySqlRow, idx: usize, kind: ColumnKind) -> DbValue {
        let value = match kind {
            ColumnKind::Decimal => return decimal_value(row.try_get(idx), idx),
            ColumnKind::Integer => decode_integer(row, idx),
            ColumnKind::Boolean => get::<bool>(row, idx).map(DbValue::Bool),
            ColumnKind::Float => get::<f64>(row, idx)
                .or_else(|| get::<f32>(row, idx).map(f64::from))
                .map(DbValue::Float),
            ColumnKind::DateTime => get::<NaiveDateTime>(row, idx)
                .map(DbValue::DateTime)
                .or_else(|| get::<DateTime<Utc>>(row, idx).map(utc_value)),
            ColumnKind::Date => get::<NaiveDate>(row, idx).map(date_value),
            ColumnKind::Time => get::<NaiveTime>(row, idx).map(time_value),
            ColumnKind::Binary => get::<Vec<u8>>(row, idx).map(DbValue::Bytes),
            ColumnKind::Json => get::<JsonValue>(row, idx).map(DbValue::Json),
            // VARBINARY-collated text comes back as bytes
            ColumnKind::Text => get::<String>(row, idx)
                .map(DbValue::String)
                .or_else(|| get::<Vec<u8>>(row, idx).map(DbValue::Bytes)),
        };
        value.unwrap_or(DbValue::Null)
    }

    fn get<'r, T>(row: &'r MySqlRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::MySql> + Type<sqlx::MySql>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    /// sqlx checks integer width and signedness, so try each in turn.
    fn decode_integer(row: &MySqlRow, idx: usize) -> Option<DbValue> {
        get::<i64>(row, idx)
            .or_else(|| get::<i32>(row, idx).map(i64::from))
            .or_else(|| get::<i16>(row, idx).map(i64::from))
            .or_else(|| get::<i8>(row, idx).map(i64::from))
            .or_else(|| get::<u32>(row, idx).map(i64::from))
            .or_else(|| get::<u16>(row, idx).map(i64::from))
            .or_else(|| get::<u8>(row, idx).map(i64::from))
            .map(DbValue::Int)
            .or_else(|| get::<u64>(row, idx).map(DbValue::from))
    }
}

mod postgres {
    use super::*;

    pub fn decode_column(row: &PgRow, idx: usize, kind: ColumnKind) -> DbValue {
        let value = match kind {
            ColumnKind::Decimal => return decimal_value(row.try_get(idx), idx),
            ColumnKind::Integer => get::<i64>(row, idx)
                .or_else(|| get::<i32>(row, idx).map(i64::from))
                .or_else(|| get::<i16>(row, idx).map(i64::from))
                .map(DbValue::Int),
            ColumnKind::Boolean => get::<bool>(row, idx).map(DbValue::Bool),
            ColumnKind::Float => get::<f64>(row, idx)
                .or_else(|| get::<f32>(row, idx).map(f64::from))
                .map(DbValue::Float),
            ColumnKind::DateTime => get::<NaiveDateTime>(row, idx)
                .map(DbValue::DateTime)
                .or_else(|| get::<DateTime<Utc>>(row, idx).map(utc_value)),
            ColumnKind::Date => get::<NaiveDate>(row, idx).map(date_value),
            ColumnKind::Time => get::<NaiveTime>(row, idx).map(time_value),
            ColumnKind::Binary => get::<Vec<u8>>(row, idx).map(DbValue::Bytes),
            ColumnKind::Json => get::<JsonValue>(row, idx).map(DbValue::Json),
            ColumnKind::Text => get::<String>(row, idx).map(DbValue::String),
        };
        value.unwrap_or(DbValue::Null)
    }

    fn get<'r, T>(row: &'r PgRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Postgres> + Type<sqlx::Postgres>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }
}

mod sqlite {
    use super::*;
    use sqlx::ValueRef;

    fn get<'r, T>(row: &'r SqliteRow, idx: usize) -> Option<T>
    where
        T: Decode<'r, sqlx::Sqlite> + Type<sqlx::Sqlite>,
    {
        row.try_get::<Option<T>, _>(idx).ok().flatten()
    }

    pub fn decode_column(row: &SqliteRow, idx: usize, declared: &str) -> DbValue {
        let storage = match row.try_get_raw(idx) {
            Ok(raw) if raw.is_null() => return DbValue::Null,
            Ok(raw) => raw.type_info().name().to_ascii_uppercase(),
            Err(e) => {
                tracing::warn!(column = idx, error = %e, "Failed to read SQLite value");
                return DbValue::Null;
            }
        };
        let kind = ColumnKind::classify(declared, DatabaseType::SQLite);

        let value = match storage.as_str() {
            "INTEGER" | "INT" | "BIGINT" | "BOOLEAN" => get::<i64>(row, idx).map(|v| {
                if kind == ColumnKind::Boolean {
                    DbValue::Bool(v != 0)
                } else {
                    DbValue::Int(v)
                }
            }),
            "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => get::<f64>(row, idx).map(DbValue::Float),
            "BLOB" => get::<Vec<u8>>(row, idx).map(DbValue::Bytes),
            _ => get::<String>(row, idx).map(|text| refine_text(text, kind)),
        };
        value.unwrap_or(DbValue::Null)
    }

    /// TEXT values whose declared type says JSON or a date are parsed when possible.
    fn refine_text(text: String, kind: ColumnKind) -> DbValue {
        match kind {
            ColumnKind::Json => serde_json::from_str::<JsonValue>(&text)
                .map(DbValue::Json)
                .unwrap_or(DbValue::String(text)),
            ColumnKind::DateTime | ColumnKind::Date => crate::models::value::parse_datetime(&text)
                .map(DbValue::DateTime)
                .unwrap_or(DbValue::String(text)),
            _ => DbValue::String(text),
        }
    }
}
