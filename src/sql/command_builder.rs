//! INSERT / UPDATE synthesis from field and condition pairs.

use super::syntax::SqlSyntax;
use crate::db::command::IdentityResult;
use crate::db::helper::DbHelper;
use crate::error::DbResult;
use crate::models::{DbParameter, DbParameters, DbType, DbValue};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct CommandBuilder {
    table: String,
    syntax: SqlSyntax,
    field_names: Vec<String>,
    condition_names: Vec<String>,
    // keyed by lowercase name; value keeps the caller's spelling
    fields: HashMap<String, (String, DbParameter)>,
    conditions: HashMap<String, (String, DbParameter)>,
}

impl CommandBuilder {
    pub fn new(syntax: SqlSyntax, table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            syntax,
            field_names: Vec::new(),
            condition_names: Vec::new(),
            fields: HashMap::new(),
            conditions: HashMap::new(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn set_table(&mut self, table: impl Into<String>) -> &mut Self {
        self.table = table.into();
        self
    }

    /// Add a field; the declared type follows the value.
    pub fn add_field(&mut self, name: &str, value: impl Into<DbValue>) -> &mut Self {
        let value = value.into();
        self.add_field_typed(name, DbType::of(&value), None, value)
    }

    pub fn add_field_typed(
        &mut self,
        name: &str,
        db_type: DbType,
        size: Option<usize>,
        value: impl Into<DbValue>,
    ) -> &mut Self {
        let param = self.syntax.create_parameter(name, db_type, size, value);
        self.add_field_parameter(name, param)
    }

    /// Add a field with a prepared parameter. Re-adding a name replaces its
    /// parameter but keeps the original column position.
    pub fn add_field_parameter(&mut self, name: &str, param: DbParameter) -> &mut Self {
        insert_named(&mut self.field_names, &mut self.fields, name, param);
        self
    }

    pub fn add_condition(&mut self, name: &str, value: impl Into<DbValue>) -> &mut Self {
        let value = value.into();
        self.add_condition_typed(name, DbType::of(&value), None, value)
    }

    pub fn add_condition_typed(
        &mut self,
        name: &str,
        db_type: DbType,
        size: Option<usize>,
        value: impl Into<DbValue>,
    ) -> &mut Self {
        let param = self.syntax.create_parameter(name, db_type, size, value);
        self.add_condition_parameter(name, param)
    }

    pub fn add_condition_parameter(&mut self, name: &str, param: DbParameter) -> &mut Self {
        insert_named(&mut self.condition_names, &mut self.conditions, name, param);
        self
    }

    pub fn has_fields(&self) -> bool {
        !self.field_names.is_empty()
    }

    pub fn has_conditions(&self) -> bool {
        !self.condition_names.is_empty()
    }

    /// Field or condition parameter by name; conditions win.
    pub fn get_parameter(&self, name: &str) -> Option<&DbParameter> {
        let key = name.to_lowercase();
        self.conditions
            .get(&key)
            .or_else(|| self.fields.get(&key))
            .map(|(_, p)| p)
    }

    pub fn contains_parameter(&self, name: &str) -> bool {
        self.get_parameter(name).is_some()
    }

    /// `INSERT INTO t (a,b) VALUES (@a,@b)`, empty when there are no fields.
    pub fn insert_text(&self) -> String {
        if !self.has_fields() || self.table.is_empty() {
            return String::new();
        }
        let (columns, values): (Vec<String>, Vec<&str>) = self
            .ordered(&self.field_names, &self.fields)
            .map(|(name, param)| (self.syntax.quote_identifier(name), param.name.as_str()))
            .unzip();
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.syntax.quote_identifier(&self.table),
            columns.join(","),
            values.join(",")
        )
    }

    /// `UPDATE t SET a=@a,b=@b WHERE c=@c AND d=@d`, empty when there are no fields.
    pub fn update_text(&self) -> String {
        if !self.has_fields() || self.table.is_empty() {
            return String::new();
        }
        let set: Vec<String> = self
            .ordered(&self.field_names, &self.fields)
            .map(|(name, param)| format!("{}={}", self.syntax.quote_identifier(name), param.name))
            .collect();
        let mut text = format!(
            "UPDATE {} SET {}",
            self.syntax.quote_identifier(&self.table),
            set.join(",")
        );
        if self.has_conditions() {
            let wheres: Vec<String> = self
                .ordered(&self.condition_names, &self.conditions)
                .map(|(name, param)| {
                    format!("{}={}", self.syntax.quote_identifier(name), param.name)
                })
                .collect();
            text.push_str(" WHERE ");
            text.push_str(&wheres.join(" AND "));
        }
        text
    }

    /// Field parameters not shadowed by a same-named condition, then all
    /// condition parameters.
    pub fn parameters(&self) -> DbParameters {
        let mut params = DbParameters::new();
        for (name, param) in self.ordered(&self.field_names, &self.fields) {
            if !self.conditions.contains_key(&name.to_lowercase()) {
                params.add(param.clone());
            }
        }
        for (_, param) in self.ordered(&self.condition_names, &self.conditions) {
            params.add(param.clone());
        }
        params
    }

    /// Run the INSERT. Returns 0 without touching the database when no field was added.
    pub async fn insert(&self, helper: &mut DbHelper) -> DbResult<u64> {
        if !self.has_fields() {
            return Ok(0);
        }
        helper
            .create_command(self.insert_text())
            .with_parameters(self.parameters())
            .execute_non_query()
            .await
    }

    /// Run the INSERT and fetch the generated identity.
    pub async fn insert_identity(
        &self,
        helper: &mut DbHelper,
        identity_column: &str,
    ) -> DbResult<IdentityResult> {
        if !self.has_fields() {
            return Ok(IdentityResult::default());
        }
        helper
            .create_command(self.insert_text())
            .with_parameters(self.parameters())
            .execute_identity(identity_column)
            .await
    }

    /// Run the UPDATE. Returns 0 without touching the database when no field was added.
    pub async fn update(&self, helper: &mut DbHelper) -> DbResult<u64> {
        if !self.has_fields() {
            return Ok(0);
        }
        helper
            .create_command(self.update_text())
            .with_parameters(self.parameters())
            .execute_non_query()
            .await
    }

    /// Drop every field and condition; the table is kept.
    pub fn clear_all(&mut self) -> &mut Self {
        self.field_names.clear();
        self.condition_names.clear();
        self.fields.clear();
        self.conditions.clear();
        self
    }

    fn ordered<'a>(
        &'a self,
        names: &'a [String],
        map: &'a HashMap<String, (String, DbParameter)>,
    ) -> impl Iterator<Item = (&'a str, &'a DbParameter)> + 'a {
        names.iter().filter_map(move |key| {
            map.get(key)
                .map(|(name, param)| (name.as_str(), param))
        })
    }
}

fn insert_named(
    names: &mut Vec<String>,
    map: &mut HashMap<String, (String, DbParameter)>,
    name: &str,
    param: DbParameter,
) {
    let key = name.to_lowercase();
    if !map.contains_key(&key) {
        names.push(key.clone());
    }
    map.insert(key, (name.to_string(), param));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::dialect::{MySqlDialect, SqliteDialect};
    use std::sync::Arc;

    fn builder(table: &str) -> CommandBuilder {
        CommandBuilder::new(SqlSyntax::new(Arc::new(SqliteDialect)), table)
    }

    #[test]
    fn test_insert_text() {
        let mut cb = builder("Users");
        cb.add_field("Name", "alice").add_field("Age", 30);
        assert_eq!(
            cb.insert_text(),
            "INSERT INTO \"Users\" (\"Name\",\"Age\") VALUES (@Name,@Age)"
        );
        assert_eq!(cb.parameters().len(), 2);
    }

    #[test]
    fn test_update_text_with_conditions() {
        let mut cb = CommandBuilder::new(SqlSyntax::new(Arc::new(MySqlDialect)), "Users");
        cb.add_field("Name", "bob")
            .add_field("Age", 31)
            .add_condition("Id", 7)
            .add_condition("Tenant", 1);
        assert_eq!(
            cb.update_text(),
            "UPDATE `Users` SET `Name`=?Name,`Age`=?Age WHERE `Id`=?Id AND `Tenant`=?Tenant"
        );
    }

    #[test]
    fn test_update_without_conditions() {
        let mut cb = builder("Users");
        cb.add_field("Active", false);
        assert_eq!(cb.update_text(), "UPDATE \"Users\" SET \"Active\"=@Active");
    }

    #[test]
    fn test_empty_builder_renders_nothing() {
        let mut cb = builder("Users");
        assert_eq!(cb.insert_text(), "");
        assert_eq!(cb.update_text(), "");
        cb.add_condition("Id", 1);
        assert_eq!(cb.update_text(), "");
    }

    #[test]
    fn test_field_overwrite_keeps_position() {
        let mut cb = builder("T");
        cb.add_field("A", 1).add_field("B", 2).add_field("a", 3);
        assert_eq!(cb.insert_text(), "INSERT INTO \"T\" (\"a\",\"B\") VALUES (@a,@B)");
        assert_eq!(cb.get_parameter("A").unwrap().value, DbValue::Int(3));
    }

    #[test]
    fn test_condition_shadows_field_parameter() {
        let mut cb = builder("T");
        cb.add_field("Id", 1).add_field("Name", "x").add_condition("Id", 2);
        let params = cb.parameters();
        let names: Vec<_> = params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["@Name", "@Id"]);
        assert_eq!(params.get("@Id").unwrap().value, DbValue::Int(2));
        assert!(cb.contains_parameter("id"));
    }

    #[test]
    fn test_sized_field_truncates() {
        let mut cb = builder("T");
        cb.add_field_typed("Code", DbType::FixedString, Some(2), "ABCD");
        assert_eq!(
            cb.get_parameter("Code").unwrap().value,
            DbValue::String("AB".into())
        );
    }

    #[test]
    fn test_clear_all() {
        let mut cb = builder("T");
        cb.add_field("A", 1).add_condition("B", 2);
        cb.clear_all();
        assert!(!cb.has_fields());
        assert!(!cb.has_conditions());
        assert!(cb.parameters().is_empty());
        assert_eq!(cb.table(), "T");
    }
}
