//! Decoded result rows.

use super::value::DbValue;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// One decoded row: column names and values in select order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DbRow {
    pub columns: Vec<String>,
    pub values: Vec<DbValue>,
}

impl DbRow {
    pub fn new(columns: Vec<String>, values: Vec<DbValue>) -> Self {
        Self { columns, values }
    }

    /// Value by column name (case-insensitive, first match).
    pub fn get(&self, column: &str) -> Option<&DbValue> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values.get(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&DbValue> {
        self.values.get(idx)
    }

    /// First column value, the scalar result of a statement.
    pub fn first(&self) -> Option<&DbValue> {
        self.values.first()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterate `(column, value)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &DbValue)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn to_json(&self) -> JsonValue {
        let map: Map<String, JsonValue> = self
            .iter()
            .map(|(c, v)| (c.to_string(), v.to_json()))
            .collect();
        JsonValue::Object(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DbRow {
        DbRow::new(
            vec!["Id".into(), "Name".into(), "Avatar".into()],
            vec![
                DbValue::Int(1),
                DbValue::String("alice".into()),
                DbValue::Bytes(vec![0xff]),
            ],
        )
    }

    #[test]
    fn test_lookup_ignores_case() {
        let row = sample();
        assert_eq!(row.get("name"), Some(&DbValue::String("alice".into())));
        assert_eq!(row.get("missing"), None);
        assert_eq!(row.first(), Some(&DbValue::Int(1)));
    }

    #[test]
    fn test_to_json() {
        let json = sample().to_json();
        assert_eq!(json["Id"], 1);
        assert_eq!(json["Avatar"], "/w==");
    }
}
