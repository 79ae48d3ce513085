//! Range, comparison and tri-state filter values used by the condition builder.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::value::is_unset_datetime;

/// A closed range with optional bounds.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ValueRange<T> {
    pub start: Option<T>,
    pub end: Option<T>,
}

impl<T> ValueRange<T> {
    pub fn new(start: Option<T>, end: Option<T>) -> Self {
        Self { start, end }
    }

    pub fn between(start: T, end: T) -> Self {
        Self::new(Some(start), Some(end))
    }

    pub fn at_least(start: T) -> Self {
        Self::new(Some(start), None)
    }

    pub fn at_most(end: T) -> Self {
        Self::new(None, Some(end))
    }

    pub fn is_empty(&self) -> bool {
        self.start.is_none() && self.end.is_none()
    }
}

/// Datetime range; the minimum and maximum datetimes count as unbounded.
pub type DateTimeRange = ValueRange<NaiveDateTime>;

impl DateTimeRange {
    /// Build a range, dropping sentinel bounds.
    pub fn datetimes(start: Option<NaiveDateTime>, end: Option<NaiveDateTime>) -> Self {
        Self {
            start: start.filter(|v| !is_unset_datetime(v)),
            end: end.filter(|v| !is_unset_datetime(v)),
        }
    }

    /// Whole-day range: from the start day's midnight to one millisecond
    /// before the day after `end`.
    pub fn dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start: start.map(|d| d.and_time(NaiveTime::MIN)),
            end: end.and_then(|d| {
                d.succ_opt()
                    .map(|next| next.and_time(NaiveTime::MIN) - Duration::milliseconds(1))
            }),
        }
    }
}

/// Tri-state boolean filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TrueOrFalse {
    /// No filter.
    #[default]
    Any,
    False,
    True,
}

impl TrueOrFalse {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Any => None,
            Self::False => Some(false),
            Self::True => Some(true),
        }
    }
}

impl From<Option<bool>> for TrueOrFalse {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Any,
            Some(false) => Self::False,
            Some(true) => Self::True,
        }
    }
}

/// Comparison operator for a single-column predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Compare {
    Lt,
    LtOrEqual,
    Gt,
    GtOrEqual,
    Equal,
    Unequal,
    IsNull,
    IsNotNull,
}

impl Compare {
    /// Operator text placed between column and parameter.
    pub fn operator(&self) -> &'static str {
        match self {
            Self::Lt => "<",
            Self::LtOrEqual => "<=",
            Self::Gt => ">",
            Self::GtOrEqual => ">=",
            Self::Equal => "=",
            Self::Unequal => "!=",
            Self::IsNull => " IS NULL",
            Self::IsNotNull => " IS NOT NULL",
        }
    }

    /// `IS NULL` forms take no parameter.
    pub fn takes_value(&self) -> bool {
        !matches!(self, Self::IsNull | Self::IsNotNull)
    }
}

/// Logical connective placed before a predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Relation {
    #[default]
    And,
    Or,
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::And => write!(f, "AND"),
            Self::Or => write!(f, "OR"),
        }
    }
}
