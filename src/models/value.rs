//! Provider-neutral values.
//!
//! [`DbValue`] is what parameters carry to the driver and what decoded row
//! columns carry back. [`FromDbValue`] is the lenient conversion used when
//! copying columns into mapped fields, and [`CriteriaValue`] decides whether
//! a value is "present" for the condition builder helpers.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;

/// Datetime text layout used for logging and string conversion.
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Layouts accepted when a datetime arrives as text (SQLite stores them as TEXT).
const DATETIME_PARSE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// A single value bound to a parameter or read from a column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DbValue {
    /// NULL value
    Null,
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    Float(f64),
    DateTime(NaiveDateTime),
    String(String),
    /// Binary data (base64 encoded in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
    Json(JsonValue),
}

impl DbValue {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::DateTime(_) => "datetime",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Json(_) => "json",
        }
    }

    /// Convert into a JSON value; bytes become base64 text.
    pub fn to_json(&self) -> JsonValue {
        use base64::{Engine as _, engine::general_purpose::STANDARD};

        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(v) => JsonValue::Bool(*v),
            Self::Int(v) => JsonValue::Number((*v).into()),
            Self::Float(v) => serde_json::Number::from_f64(*v)
                .map(JsonValue::Number)
                .unwrap_or_else(|| JsonValue::String(v.to_string())),
            Self::DateTime(v) => JsonValue::String(v.format(DATETIME_FORMAT).to_string()),
            Self::String(v) => JsonValue::String(v.clone()),
            Self::Bytes(v) => JsonValue::String(STANDARD.encode(v)),
            Self::Json(v) => v.clone(),
        }
    }
}

impl fmt::Display for DbValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "NULL"),
            Self::Bool(v) => write!(f, "{}", v),
            Self::Int(v) => write!(f, "{}", v),
            Self::Float(v) => write!(f, "{}", v),
            Self::DateTime(v) => write!(f, "'{}'", v.format(DATETIME_FORMAT)),
            Self::String(v) => write!(f, "'{}'", v),
            Self::Bytes(v) => write!(f, "<{} bytes>", v.len()),
            Self::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Custom serialization for binary data as base64.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        STANDARD.encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Declared database type of a parameter or mapped field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DbType {
    Boolean,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    String,
    FixedString,
    DateTime,
    Binary,
    Json,
    /// Type left to the driver.
    Object,
}

impl DbType {
    /// Whether a declared size truncates values of this type.
    pub fn is_string(&self) -> bool {
        matches!(self, Self::String | Self::FixedString)
    }

    /// Best guess for a runtime value.
    pub fn of(value: &DbValue) -> Self {
        match value {
            DbValue::Null => Self::Object,
            DbValue::Bool(_) => Self::Boolean,
            DbValue::Int(_) => Self::Int64,
            DbValue::Float(_) => Self::Double,
            DbValue::DateTime(_) => Self::DateTime,
            DbValue::String(_) => Self::String,
            DbValue::Bytes(_) => Self::Binary,
            DbValue::Json(_) => Self::Json,
        }
    }
}

// =============================================================================
// Rust -> DbValue
// =============================================================================

macro_rules! impl_from_int {
    ($($t:ty),+) => {
        $(
            impl From<$t> for DbValue {
                fn from(v: $t) -> Self {
                    DbValue::Int(v as i64)
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<u64> for DbValue {
    fn from(v: u64) -> Self {
        i64::try_from(v)
            .map(DbValue::Int)
            .unwrap_or_else(|_| DbValue::String(v.to_string()))
    }
}

impl From<bool> for DbValue {
    fn from(v: bool) -> Self {
        DbValue::Bool(v)
    }
}

impl From<f32> for DbValue {
    fn from(v: f32) -> Self {
        DbValue::Float(v as f64)
    }
}

impl From<f64> for DbValue {
    fn from(v: f64) -> Self {
        DbValue::Float(v)
    }
}

impl From<String> for DbValue {
    fn from(v: String) -> Self {
        DbValue::String(v)
    }
}

impl From<&str> for DbValue {
    fn from(v: &str) -> Self {
        DbValue::String(v.to_string())
    }
}

impl From<NaiveDateTime> for DbValue {
    fn from(v: NaiveDateTime) -> Self {
        DbValue::DateTime(v)
    }
}

impl From<NaiveDate> for DbValue {
    fn from(v: NaiveDate) -> Self {
        DbValue::DateTime(v.and_time(chrono::NaiveTime::MIN))
    }
}

impl From<DateTime<Utc>> for DbValue {
    fn from(v: DateTime<Utc>) -> Self {
        DbValue::DateTime(v.naive_utc())
    }
}

impl From<Vec<u8>> for DbValue {
    fn from(v: Vec<u8>) -> Self {
        DbValue::Bytes(v)
    }
}

impl From<&[u8]> for DbValue {
    fn from(v: &[u8]) -> Self {
        DbValue::Bytes(v.to_vec())
    }
}

impl From<JsonValue> for DbValue {
    fn from(v: JsonValue) -> Self {
        DbValue::Json(v)
    }
}

impl<T: Into<DbValue>> From<Option<T>> for DbValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(DbValue::Null)
    }
}

// =============================================================================
// DbValue -> Rust
// =============================================================================

/// A value could not be converted into the requested Rust type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("cannot convert {found} value to {expected}")]
pub struct ConvertError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl ConvertError {
    fn new(expected: &'static str, value: &DbValue) -> Self {
        Self {
            expected,
            found: value.type_name(),
        }
    }
}

/// Lenient conversion from a column value.
///
/// NULL converts to the type's zero value for non-`Option` targets.
pub trait FromDbValue: Sized {
    /// Database type a field of this Rust type is declared as by default.
    const DB_TYPE: DbType;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError>;
}

macro_rules! impl_from_db_value_int {
    ($($t:ty => $db:ident),+) => {
        $(
            impl FromDbValue for $t {
                const DB_TYPE: DbType = DbType::$db;

                fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
                    let err = ConvertError::new(stringify!($t), &value);
                    match value {
                        DbValue::Null => Ok(0),
                        DbValue::Int(v) => <$t>::try_from(v).map_err(|_| err),
                        DbValue::Bool(v) => Ok(v as $t),
                        DbValue::Float(v) if v.fract() == 0.0 => {
                            <$t>::try_from(v as i64).map_err(|_| err)
                        }
                        DbValue::String(s) => s.trim().parse::<$t>().map_err(|_| err),
                        _ => Err(err),
                    }
                }
            }
        )+
    };
}

impl_from_db_value_int!(
    i8 => Int16,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    u8 => Int16,
    u16 => Int32,
    u32 => Int64,
    u64 => Int64
);

macro_rules! impl_from_db_value_float {
    ($($t:ty => $db:ident),+) => {
        $(
            impl FromDbValue for $t {
                const DB_TYPE: DbType = DbType::$db;

                fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
                    let err = ConvertError::new(stringify!($t), &value);
                    match value {
                        DbValue::Null => Ok(0.0),
                        DbValue::Float(v) => Ok(v as $t),
                        DbValue::Int(v) => Ok(v as $t),
                        DbValue::Bool(v) => Ok(if v { 1.0 } else { 0.0 }),
                        DbValue::String(s) => s.trim().parse::<$t>().map_err(|_| err),
                        _ => Err(err),
                    }
                }
            }
        )+
    };
}

impl_from_db_value_float!(f32 => Float, f64 => Double);

impl FromDbValue for bool {
    const DB_TYPE: DbType = DbType::Boolean;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        let err = ConvertError::new("bool", &value);
        match value {
            DbValue::Null => Ok(false),
            DbValue::Bool(v) => Ok(v),
            DbValue::Int(v) => Ok(v != 0),
            DbValue::Float(v) => Ok(v != 0.0),
            DbValue::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(true),
                "false" | "0" | "" => Ok(false),
                _ => Err(err),
            },
            _ => Err(err),
        }
    }
}

impl FromDbValue for String {
    const DB_TYPE: DbType = DbType::String;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        match value {
            DbValue::Null => Ok(String::new()),
            DbValue::String(s) => Ok(s),
            DbValue::Bool(v) => Ok(v.to_string()),
            DbValue::Int(v) => Ok(v.to_string()),
            DbValue::Float(v) => Ok(v.to_string()),
            DbValue::DateTime(v) => Ok(v.format(DATETIME_FORMAT).to_string()),
            DbValue::Json(v) => Ok(v.to_string()),
            DbValue::Bytes(v) => {
                String::from_utf8(v).map_err(|_| ConvertError {
                    expected: "String",
                    found: "bytes",
                })
            }
        }
    }
}

impl FromDbValue for NaiveDateTime {
    const DB_TYPE: DbType = DbType::DateTime;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        let err = ConvertError::new("NaiveDateTime", &value);
        match value {
            DbValue::Null => Ok(NaiveDateTime::default()),
            DbValue::DateTime(v) => Ok(v),
            DbValue::String(s) => parse_datetime(&s).ok_or(err),
            DbValue::Int(secs) => DateTime::from_timestamp(secs, 0)
                .map(|dt| dt.naive_utc())
                .ok_or(err),
            _ => Err(err),
        }
    }
}

impl FromDbValue for Vec<u8> {
    const DB_TYPE: DbType = DbType::Binary;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        match value {
            DbValue::Null => Ok(Vec::new()),
            DbValue::Bytes(v) => Ok(v),
            DbValue::String(s) => Ok(s.into_bytes()),
            other => Err(ConvertError::new("Vec<u8>", &other)),
        }
    }
}

impl FromDbValue for JsonValue {
    const DB_TYPE: DbType = DbType::Json;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        Ok(match value {
            DbValue::Json(v) => v,
            DbValue::String(s) => serde_json::from_str(&s).unwrap_or(JsonValue::String(s)),
            other => other.to_json(),
        })
    }
}

impl<T: FromDbValue> FromDbValue for Option<T> {
    const DB_TYPE: DbType = T::DB_TYPE;

    fn from_db_value(value: DbValue) -> Result<Self, ConvertError> {
        match value {
            DbValue::Null => Ok(None),
            other => T::from_db_value(other).map(Some),
        }
    }
}

/// Parse the datetime text layouts drivers commonly produce.
pub fn parse_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    DATETIME_PARSE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(chrono::NaiveTime::MIN))
        })
        .or_else(|| DateTime::parse_from_rfc3339(text).ok().map(|d| d.naive_utc()))
}

// =============================================================================
// Value presence for criteria helpers
// =============================================================================

/// Decides whether a criteria value is present.
///
/// Plain scalars count as present when they differ from their zero value,
/// `Option`s when they are `Some`, strings when they are non-empty.
pub trait CriteriaValue {
    /// The declared type and bound value, or `None` when the value is absent.
    fn into_criteria(self) -> Option<(DbType, DbValue)>;
}

macro_rules! impl_criteria_scalar {
    ($($t:ty),+) => {
        $(
            impl CriteriaValue for $t {
                fn into_criteria(self) -> Option<(DbType, DbValue)> {
                    if self == <$t>::default() {
                        None
                    } else {
                        Some((<$t as FromDbValue>::DB_TYPE, self.into()))
                    }
                }
            }

            impl CriteriaValue for Option<$t> {
                fn into_criteria(self) -> Option<(DbType, DbValue)> {
                    self.map(|v| (<$t as FromDbValue>::DB_TYPE, v.into()))
                }
            }
        )+
    };
}

impl_criteria_scalar!(bool, i8, i16, i32, i64, u8, u16, u32, u64, f32, f64);

impl CriteriaValue for NaiveDateTime {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        if self == NaiveDateTime::default() || is_unset_datetime(&self) {
            None
        } else {
            Some((DbType::DateTime, self.into()))
        }
    }
}

impl CriteriaValue for Option<NaiveDateTime> {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        self.map(|v| (DbType::DateTime, v.into()))
    }
}

impl CriteriaValue for &str {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        (!self.is_empty()).then(|| (DbType::String, self.into()))
    }
}

impl CriteriaValue for String {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        (!self.is_empty()).then(|| (DbType::String, self.into()))
    }
}

impl CriteriaValue for &String {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        self.as_str().into_criteria()
    }
}

impl CriteriaValue for Option<&str> {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        self.and_then(CriteriaValue::into_criteria)
    }
}

impl CriteriaValue for Option<String> {
    fn into_criteria(self) -> Option<(DbType, DbValue)> {
        self.and_then(CriteriaValue::into_criteria)
    }
}

/// The minimum and maximum representable datetimes mean "unset".
pub fn is_unset_datetime(value: &NaiveDateTime) -> bool {
    *value == NaiveDateTime::MIN || *value == NaiveDateTime::MAX
}
