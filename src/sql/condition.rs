//! WHERE / ORDER BY clause builder with nested grouping.
//!
//! Groups opened with [`ConditionBuilder::begin_parentheses`] are only
//! written once a predicate lands inside them, so a group that stays empty
//! leaves no trace in the clause. Reading the condition closes every group
//! that is still open.

use super::syntax::SqlSyntax;
use crate::error::{DbError, DbResult};
use crate::models::{
    Compare, CriteriaValue, DateTimeRange, DbParameter, DbParameters, DbType, DbValue, Relation,
    TrueOrFalse, ValueRange,
};
use crate::models::value::is_unset_datetime;

#[derive(Debug, Clone)]
pub struct ConditionBuilder {
    syntax: SqlSyntax,
    clause: String,
    params: DbParameters,
    order_by: String,
    total_open: usize,
    pending_open: usize,
    materialized_open: usize,
}

impl ConditionBuilder {
    pub fn new(syntax: SqlSyntax) -> Self {
        Self {
            syntax,
            clause: String::new(),
            params: DbParameters::new(),
            order_by: String::new(),
            total_open: 0,
            pending_open: 0,
            materialized_open: 0,
        }
    }

    pub fn syntax(&self) -> &SqlSyntax {
        &self.syntax
    }

    /// Append a predicate joined with `AND`.
    pub fn add(&mut self, predicate: &str) -> DbResult<&mut Self> {
        self.add_with(predicate, Relation::And, [])
    }

    /// Append a predicate with its parameters.
    pub fn add_with(
        &mut self,
        predicate: &str,
        relation: Relation,
        params: impl IntoIterator<Item = DbParameter>,
    ) -> DbResult<&mut Self> {
        if predicate.trim().is_empty() {
            return Err(DbError::invalid_input("Predicate text cannot be empty"));
        }
        self.push(predicate, relation, params);
        Ok(self)
    }

    pub fn begin_parentheses(&mut self) -> &mut Self {
        self.total_open += 1;
        self.pending_open += 1;
        self
    }

    pub fn end_parentheses(&mut self) -> &mut Self {
        if self.total_open > 0 {
            if self.materialized_open > 0 {
                self.clause.push(')');
                self.materialized_open -= 1;
            }
            self.total_open -= 1;
        }
        self.pending_open = self.pending_open.min(self.total_open);
        self
    }

    /// Finalized WHERE text (without the keyword). Closes open groups.
    pub fn condition(&mut self) -> String {
        while self.total_open > 0 {
            self.end_parentheses();
        }
        self.clause.clone()
    }

    pub fn order_by(&self) -> &str {
        &self.order_by
    }

    pub fn parameters(&self) -> &DbParameters {
        &self.params
    }

    pub fn has_condition(&self) -> bool {
        !self.clause.is_empty()
    }

    pub fn has_order_by(&self) -> bool {
        !self.order_by.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        !self.has_condition() && !self.has_order_by()
    }

    /// ` WHERE ...` and ` ORDER BY ...` parts, each only when non-empty.
    pub fn to_clause(&mut self) -> String {
        let condition = self.condition();
        let mut text = String::new();
        if !condition.is_empty() {
            text.push_str(" WHERE ");
            text.push_str(&condition);
        }
        if !self.order_by.is_empty() {
            text.push_str(" ORDER BY ");
            text.push_str(&self.order_by);
        }
        text
    }

    /// Reset clause, parameters and group counters. ORDER BY is kept.
    pub fn clear(&mut self) -> &mut Self {
        self.clause.clear();
        self.params.clear();
        self.total_open = 0;
        self.pending_open = 0;
        self.materialized_open = 0;
        self
    }

    pub fn clear_order_by(&mut self) -> &mut Self {
        self.order_by.clear();
        self
    }

    pub fn add_order_by(&mut self, name: &str, descending: bool) -> &mut Self {
        if !self.order_by.is_empty() {
            self.order_by.push(',');
        }
        self.order_by.push_str(&self.syntax.quote_identifier(name));
        self.order_by
            .push_str(if descending { " DESC" } else { " ASC" });
        self
    }

    /// Replace ORDER BY with raw text.
    pub fn set_order_by(&mut self, order_by: impl Into<String>) -> &mut Self {
        self.order_by = order_by.into();
        self
    }

    // =========================================================================
    // Criteria helpers
    // =========================================================================

    /// `name=@pN` when `value` is present.
    pub fn add_criteria<V: CriteriaValue>(&mut self, name: &str, value: V) -> &mut Self {
        self.add_compare_criteria(name, Compare::Equal, value)
    }

    /// `name<op>@pN` when `value` is present; `IS NULL` forms ignore `value`.
    pub fn add_compare_criteria<V: CriteriaValue>(
        &mut self,
        name: &str,
        compare: Compare,
        value: V,
    ) -> &mut Self {
        let column = self.syntax.quote_identifier(name);
        if !compare.takes_value() {
            self.push(&format!("{}{}", column, compare.operator()), Relation::And, []);
            return self;
        }
        if let Some((db_type, value)) = value.into_criteria() {
            let param = self.sequence_parameter(db_type, None, value);
            let predicate = format!("{}{}{}", column, compare.operator(), param.name);
            self.push(&predicate, Relation::And, [param]);
        }
        self
    }

    pub fn add_is_null(&mut self, name: &str) -> &mut Self {
        self.add_compare_criteria(name, Compare::IsNull, None::<i64>)
    }

    pub fn add_is_not_null(&mut self, name: &str) -> &mut Self {
        self.add_compare_criteria(name, Compare::IsNotNull, None::<i64>)
    }

    /// Exact (`=`) or fuzzy (`LIKE '%value%'`) text match, skipped for empty text.
    pub fn add_text_criteria(
        &mut self,
        name: &str,
        value: &str,
        fuzzy: bool,
        size: Option<usize>,
    ) -> &mut Self {
        if value.is_empty() {
            return self;
        }
        let column = self.syntax.quote_identifier(name);
        if fuzzy {
            let text: String = match size {
                Some(size) if size > 0 => value.chars().take(size).collect(),
                _ => value.to_string(),
            };
            let param = self.sequence_parameter(
                DbType::String,
                size.filter(|s| *s > 0).map(|s| s + 2),
                DbValue::String(format!("%{}%", text)),
            );
            let predicate = format!("{} LIKE {}", column, param.name);
            self.push(&predicate, Relation::And, [param]);
        } else {
            let param = self.sequence_parameter(DbType::String, size, value.into());
            let predicate = format!("{}={}", column, param.name);
            self.push(&predicate, Relation::And, [param]);
        }
        self
    }

    /// `name IN (@p1,@p2,...)`; nothing for an empty list.
    pub fn add_in_criteria<V, I>(&mut self, name: &str, values: I) -> &mut Self
    where
        V: Into<DbValue>,
        I: IntoIterator<Item = V>,
    {
        self.push_in(name, values, false)
    }

    /// `NOT name IN (@p1,@p2,...)`; nothing for an empty list.
    pub fn add_not_in_criteria<V, I>(&mut self, name: &str, values: I) -> &mut Self
    where
        V: Into<DbValue>,
        I: IntoIterator<Item = V>,
    {
        self.push_in(name, values, true)
    }

    /// `BETWEEN` for two bounds, `>=` / `<=` for one, nothing for none.
    pub fn add_range_criteria<V: Into<DbValue>>(
        &mut self,
        name: &str,
        start: Option<V>,
        end: Option<V>,
    ) -> &mut Self {
        let column = self.syntax.quote_identifier(name);
        match (start, end) {
            (Some(start), Some(end)) => {
                let p1 = self.typed_parameter(start.into());
                let p2 = self.typed_parameter(end.into());
                let predicate = format!("{} BETWEEN {} AND {}", column, p1.name, p2.name);
                self.push(&predicate, Relation::And, [p1, p2]);
            }
            (Some(start), None) => {
                let p = self.typed_parameter(start.into());
                let predicate = format!("{}>={}", column, p.name);
                self.push(&predicate, Relation::And, [p]);
            }
            (None, Some(end)) => {
                let p = self.typed_parameter(end.into());
                let predicate = format!("{}<={}", column, p.name);
                self.push(&predicate, Relation::And, [p]);
            }
            (None, None) => {}
        }
        self
    }

    pub fn add_range<V: Into<DbValue> + Clone>(&mut self, name: &str, range: &ValueRange<V>) -> &mut Self {
        self.add_range_criteria(name, range.start.clone(), range.end.clone())
    }

    /// Datetime range; min/max sentinels count as open bounds.
    pub fn add_date_range(&mut self, name: &str, range: &DateTimeRange) -> &mut Self {
        let start = range.start.filter(|v| !is_unset_datetime(v));
        let end = range.end.filter(|v| !is_unset_datetime(v));
        self.add_range_criteria(name, start, end)
    }

    pub fn add_bool_criteria(&mut self, name: &str, value: TrueOrFalse) -> &mut Self {
        match value.as_bool() {
            Some(v) => self.add_criteria(name, Some(v)),
            None => self,
        }
    }

    fn push_in<V, I>(&mut self, name: &str, values: I, negate: bool) -> &mut Self
    where
        V: Into<DbValue>,
        I: IntoIterator<Item = V>,
    {
        let params: Vec<DbParameter> = values
            .into_iter()
            .map(|v| self.typed_parameter(v.into()))
            .collect();
        if params.is_empty() {
            return self;
        }
        let names: Vec<&str> = params.iter().map(|p| p.name.as_str()).collect();
        let column = self.syntax.quote_identifier(name);
        let predicate = if negate {
            format!("NOT {} IN ({})", column, names.join(","))
        } else {
            format!("{} IN ({})", column, names.join(","))
        };
        self.push(&predicate, Relation::And, params);
        self
    }

    fn typed_parameter(&mut self, value: DbValue) -> DbParameter {
        self.sequence_parameter(DbType::of(&value), None, value)
    }

    /// Parameter with a fresh sequential name not yet used by this builder.
    fn sequence_parameter(
        &mut self,
        db_type: DbType,
        size: Option<usize>,
        value: DbValue,
    ) -> DbParameter {
        let name = loop {
            let name = self.syntax.parameter_name(&self.syntax.next_parameter_name());
            if !self.params.contains(&name) {
                break name;
            }
        };
        let param = self.syntax.create_parameter(&name, db_type, size, value);
        // Reserve the name so further parameters of the same predicate skip it.
        self.params.add(param.clone());
        param
    }

    fn push(
        &mut self,
        predicate: &str,
        relation: Relation,
        params: impl IntoIterator<Item = DbParameter>,
    ) {
        if !self.clause.is_empty() {
            self.clause.push(' ');
            self.clause.push_str(&relation.to_string());
            self.clause.push(' ');
        }
        if self.pending_open > 0 {
            for _ in 0..self.pending_open {
                self.clause.push('(');
            }
            self.materialized_open += self.pending_open;
            self.pending_open = 0;
        }
        self.clause.push_str(predicate);
        self.params.extend(params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::{MySqlDialect, SqliteDialect};
    use std::sync::Arc;

    fn builder() -> ConditionBuilder {
        ConditionBuilder::new(SqlSyntax::new(Arc::new(SqliteDialect)))
    }

    #[test]
    fn test_add_joins_with_relation() {
        let mut cb = builder();
        cb.add("a=1").unwrap();
        cb.add_with("b=2", Relation::Or, []).unwrap();
        assert_eq!(cb.condition(), "a=1 OR b=2");
    }

    #[test]
    fn test_empty_predicate_rejected() {
        let mut cb = builder();
        assert!(matches!(cb.add("  "), Err(DbError::InvalidInput { .. })));
        assert!(!cb.has_condition());
    }

    #[test]
    fn test_group_materialized_on_first_predicate() {
        let mut cb = builder();
        cb.add("a=1").unwrap();
        cb.begin_parentheses();
        cb.add("b=2").unwrap();
        cb.add_with("c=3", Relation::Or, []).unwrap();
        cb.end_parentheses();
        assert_eq!(cb.condition(), "a=1 AND (b=2 OR c=3)");
    }

    #[test]
    fn test_empty_group_leaves_no_trace() {
        let mut cb = builder();
        cb.add("a=1").unwrap();
        cb.begin_parentheses();
        cb.end_parentheses();
        cb.add("b=2").unwrap();
        assert_eq!(cb.condition(), "a=1 AND b=2");
    }

    #[test]
    fn test_nested_groups_emit_together() {
        let mut cb = builder();
        cb.begin_parentheses().begin_parentheses();
        cb.add("a=1").unwrap();
        cb.end_parentheses();
        cb.add("b=2").unwrap();
        cb.end_parentheses();
        assert_eq!(cb.condition(), "((a=1) AND b=2)");
    }

    #[test]
    fn test_condition_closes_open_groups() {
        let mut cb = builder();
        cb.begin_parentheses();
        cb.add("a=1").unwrap();
        cb.begin_parentheses();
        cb.add("b=2").unwrap();
        assert_eq!(cb.condition(), "(a=1 AND (b=2))");
        // extra closes are ignored
        cb.end_parentheses().end_parentheses();
        assert_eq!(cb.condition(), "(a=1 AND (b=2))");
    }

    #[test]
    fn test_criteria_skips_zero_values() {
        let mut cb = builder();
        cb.add_criteria("Age", 0);
        assert!(!cb.has_condition());
        assert!(cb.parameters().is_empty());

        cb.add_criteria("Age", 5);
        assert_eq!(cb.condition(), "\"Age\"=@p1");
        assert_eq!(cb.parameters().len(), 1);
        assert_eq!(cb.parameters().get("@p1").unwrap().value, DbValue::Int(5));
    }

    #[test]
    fn test_text_criteria() {
        let mut cb = builder();
        cb.add_text_criteria("Name", "", false, None);
        cb.add_text_criteria("Name", "bob", true, None);
        cb.add_text_criteria("Code", "abcdef", false, Some(3));
        assert_eq!(cb.condition(), "\"Name\" LIKE @p1 AND \"Code\"=@p2");
        assert_eq!(
            cb.parameters().get("@p1").unwrap().value,
            DbValue::String("%bob%".into())
        );
        assert_eq!(
            cb.parameters().get("@p2").unwrap().value,
            DbValue::String("abc".into())
        );
    }

    #[test]
    fn test_compare_and_null_criteria() {
        let mut cb = builder();
        cb.add_compare_criteria("Age", Compare::Gt, 18);
        cb.add_is_null("DeletedAt");
        cb.add_compare_criteria("Score", Compare::Unequal, Some(0.0f64));
        assert_eq!(
            cb.condition(),
            "\"Age\">@p1 AND \"DeletedAt\" IS NULL AND \"Score\"!=@p2"
        );
        assert_eq!(cb.parameters().len(), 2);
    }

    #[test]
    fn test_in_and_not_in() {
        let mut cb = builder();
        cb.add_in_criteria("Id", Vec::<i64>::new());
        assert!(!cb.has_condition());
        cb.add_in_criteria("Id", [1i64, 2, 3]);
        cb.add_not_in_criteria("Status", ["x", "y"]);
        assert_eq!(
            cb.condition(),
            "\"Id\" IN (@p1,@p2,@p3) AND NOT \"Status\" IN (@p4,@p5)"
        );
        assert_eq!(cb.parameters().len(), 5);
    }

    #[test]
    fn test_range_criteria() {
        let mut cb = builder();
        cb.add_range_criteria::<i32>("Created", None, None);
        assert!(cb.parameters().is_empty());

        cb.add_range_criteria("Created", Some(1), None);
        assert_eq!(cb.condition(), "\"Created\">=@p1");
        assert_eq!(cb.parameters().len(), 1);

        cb.clear();
        cb.add_range_criteria("Created", Some(1), Some(9));
        assert_eq!(cb.condition(), "\"Created\" BETWEEN @p2 AND @p3");
        assert_eq!(cb.parameters().len(), 2);

        cb.clear();
        cb.add_range("Created", &ValueRange::at_most(4));
        assert_eq!(cb.condition(), "\"Created\"<=@p4");
    }

    #[test]
    fn test_bool_criteria() {
        let mut cb = builder();
        cb.add_bool_criteria("Active", TrueOrFalse::Any);
        assert!(!cb.has_condition());
        cb.add_bool_criteria("Active", TrueOrFalse::False);
        assert_eq!(cb.condition(), "\"Active\"=@p1");
        assert_eq!(cb.parameters().get("@p1").unwrap().value, DbValue::Bool(false));
    }

    #[test]
    fn test_order_by_and_clause() {
        let mut cb = ConditionBuilder::new(SqlSyntax::new(Arc::new(MySqlDialect)));
        assert_eq!(cb.to_clause(), "");
        cb.add_criteria("Age", 3);
        cb.add_order_by("Name", false).add_order_by("Id", true);
        assert_eq!(
            cb.to_clause(),
            " WHERE `Age`=?p1 ORDER BY `Name` ASC,`Id` DESC"
        );

        cb.clear();
        assert!(!cb.has_condition());
        assert!(cb.has_order_by());
        assert_eq!(cb.to_clause(), " ORDER BY `Name` ASC,`Id` DESC");
        cb.clear_order_by();
        assert!(cb.is_empty());
    }

    #[test]
    fn test_sequence_skips_existing_names() {
        let syntax = SqlSyntax::new(Arc::new(SqliteDialect));
        let mut cb = ConditionBuilder::new(syntax.clone());
        let manual = syntax.create_parameter("p1", DbType::Int32, None, 7);
        cb.add_with("x=@p1", Relation::And, [manual]).unwrap();
        cb.add_criteria("Age", 2);
        assert_eq!(cb.condition(), "x=@p1 AND \"Age\"=@p2");
    }
}
