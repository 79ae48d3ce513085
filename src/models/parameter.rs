//! Statement parameters.

use super::value::{DbType, DbValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterDirection {
    #[default]
    Input,
    Output,
    InputOutput,
    ReturnValue,
}

/// A named, typed value attached to a statement.
///
/// `name` carries the provider prefix (`@id`, `?id`), exactly as it appears
/// in the statement text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DbParameter {
    pub name: String,
    pub db_type: DbType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(default)]
    pub direction: ParameterDirection,
    pub value: DbValue,
}

impl DbParameter {
    pub fn new(name: impl Into<String>, db_type: DbType, value: impl Into<DbValue>) -> Self {
        Self {
            name: name.into(),
            db_type,
            size: None,
            direction: ParameterDirection::Input,
            value: value.into(),
        }
    }

    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_direction(mut self, direction: ParameterDirection) -> Self {
        self.direction = direction;
        self
    }

    /// Name without the provider prefix.
    pub fn bare_name(&self) -> &str {
        self.name.trim_start_matches(['@', '?', ':', '$'])
    }
}

impl fmt::Display for DbParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Parameter set of one statement.
///
/// Names compare case-insensitively. Adding a name that is already present
/// replaces the earlier parameter in place, so insertion order is kept and
/// no name ever appears twice.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DbParameters {
    items: Vec<DbParameter>,
}

impl DbParameters {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a parameter.
    pub fn add(&mut self, param: DbParameter) {
        match self.position(&param.name) {
            Some(idx) => self.items[idx] = param,
            None => self.items.push(param),
        }
    }

    /// Add or replace every parameter of `other`, in order.
    pub fn extend(&mut self, other: impl IntoIterator<Item = DbParameter>) {
        for param in other {
            self.add(param);
        }
    }

    pub fn get(&self, name: &str) -> Option<&DbParameter> {
        self.position(name).map(|idx| &self.items[idx])
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut DbParameter> {
        self.position(name).map(move |idx| &mut self.items[idx])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    pub fn remove(&mut self, name: &str) -> Option<DbParameter> {
        self.position(name).map(|idx| self.items.remove(idx))
    }

    pub fn iter(&self) -> std::slice::Iter<'_, DbParameter> {
        self.items.iter()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for DbParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, param) in self.items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, "]")
    }
}

impl IntoIterator for DbParameters {
    type Item = DbParameter;
    type IntoIter = std::vec::IntoIter<DbParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a DbParameters {
    type Item = &'a DbParameter;
    type IntoIter = std::slice::Iter<'a, DbParameter>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<DbParameter> for DbParameters {
    fn from_iter<I: IntoIterator<Item = DbParameter>>(iter: I) -> Self {
        let mut params = Self::new();
        params.extend(iter);
        params
    }
}
