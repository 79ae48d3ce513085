//! Entity-level CRUD on top of a helper.
//!
//! The executor turns a [`DbEntity`]'s field table into SELECT, INSERT,
//! UPDATE and DELETE statements. Column lists follow the field table; WHERE
//! clauses come from a [`ConditionBuilder`] or from caller text.

use crate::db::helper::DbHelper;
use crate::error::{DbError, DbResult};
use crate::mapping::DbEntity;
use crate::models::{DbParameters, DbType, DbValue};
use crate::sql::ConditionBuilder;
use tracing::{debug, warn};

/// Key column used when an entity declares no single primary key.
pub const DEFAULT_ID_COLUMN: &str = "Id";

pub struct CommandExecutor<'h> {
    helper: &'h mut DbHelper,
}

impl<'h> CommandExecutor<'h> {
    pub fn new(helper: &'h mut DbHelper) -> Self {
        Self { helper }
    }

    pub fn helper(&mut self) -> &mut DbHelper {
        self.helper
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Rows of `table` matching `condition`, in its ORDER BY, at most `limit`.
    pub async fn select<T: DbEntity>(
        &mut self,
        table: &str,
        condition: &mut ConditionBuilder,
        limit: Option<u64>,
    ) -> DbResult<Vec<T>> {
        let clause = condition.to_clause();
        let params = condition.parameters().clone();
        self.select_with::<T>(table, &clause, params, limit).await
    }

    /// Same as [`select`](Self::select) with WHERE text written by the caller.
    pub async fn select_where<T: DbEntity>(
        &mut self,
        table: &str,
        where_text: &str,
        params: DbParameters,
        limit: Option<u64>,
    ) -> DbResult<Vec<T>> {
        let clause = where_clause(where_text);
        self.select_with::<T>(table, &clause, params, limit).await
    }

    async fn select_with<T: DbEntity>(
        &mut self,
        table: &str,
        clause: &str,
        params: DbParameters,
        limit: Option<u64>,
    ) -> DbResult<Vec<T>> {
        let mut sql = self.select_prefix::<T>(table);
        sql.push_str(clause);
        if let Some(n) = limit {
            sql.push_str(&self.helper.dialect().limit_clause(n));
        }
        self.helper
            .create_command(sql)
            .with_parameters(params)
            .execute_entities()
            .await
    }

    /// First row matching `condition`.
    pub async fn get_by<T: DbEntity>(
        &mut self,
        table: &str,
        condition: &mut ConditionBuilder,
    ) -> DbResult<Option<T>> {
        let mut sql = self.select_prefix::<T>(table);
        sql.push_str(&condition.to_clause());
        if condition.has_order_by() {
            sql.push_str(&self.helper.dialect().limit_clause(1));
        }
        self.helper
            .create_command(sql)
            .with_parameters(condition.parameters().clone())
            .execute_entity()
            .await
    }

    /// Row whose key equals `id`.
    pub async fn get_by_id<T: DbEntity>(
        &mut self,
        table: &str,
        id: impl Into<DbValue>,
    ) -> DbResult<Option<T>> {
        let column = key_column::<T>();
        let id = id.into();
        let syntax = self.helper.syntax().clone();
        let param = syntax.create_parameter(&column, DbType::of(&id), None, id);
        let sql = format!(
            "{} WHERE {}={}",
            self.select_prefix::<T>(table),
            syntax.quote_identifier(&column),
            param.name
        );
        self.helper
            .create_command(sql)
            .parameter(param)
            .execute_entity()
            .await
    }

    /// True when at least one row matches.
    pub async fn exists(&mut self, table: &str, condition: &mut ConditionBuilder) -> DbResult<bool> {
        let where_text = condition.condition();
        let params = condition.parameters().clone();
        self.exists_where(table, &where_text, params).await
    }

    pub async fn exists_where(
        &mut self,
        table: &str,
        where_text: &str,
        params: DbParameters,
    ) -> DbResult<bool> {
        let sql = format!(
            "SELECT 1 FROM {}{}",
            self.helper.syntax().quote_identifier(table),
            where_clause(where_text)
        );
        let rows = self
            .helper
            .create_command(sql)
            .with_parameters(params)
            .execute_row_range(0, Some(1))
            .await?;
        Ok(!rows.is_empty())
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Insert `entity`. The generated key, if any, is written back into it.
    ///
    /// Returns true when a row was inserted.
    pub async fn insert<T: DbEntity>(
        &mut self,
        table: &str,
        entity: &mut T,
        group: i64,
    ) -> DbResult<bool> {
        let fields = T::field_table();
        let mut builder = self.helper.command_builder(table);
        for field in fields.fields().iter().filter(|f| f.can_insert(group)) {
            let value = entity.get_value(field.property()).unwrap_or(DbValue::Null);
            builder.add_field_typed(field.column_name(), field.field_type(), field.field_size(), value);
        }

        let Some(identity) = fields.identity() else {
            let affected = builder.insert(self.helper).await?;
            return Ok(affected > 0);
        };

        let result = builder
            .insert_identity(self.helper, identity.column_name())
            .await?;
        if result.rows_affected == 0 {
            return Ok(false);
        }
        match result.identity {
            Some(id) => {
                if let Err(e) = entity.set_value(identity.property(), DbValue::Int(id)) {
                    warn!(field = identity.property(), error = %e, "Failed to assign generated key");
                }
            }
            None => debug!(table = %table, "Insert reported no generated key"),
        }
        Ok(true)
    }

    /// Update the row identified by the entity's primary key fields.
    ///
    /// Returns true when a row was changed.
    pub async fn update<T: DbEntity>(&mut self, table: &str, entity: &T, group: i64) -> DbResult<bool> {
        let fields = T::field_table();
        if fields.primary_keys().next().is_none() {
            return Err(DbError::invalid_input(format!(
                "Cannot update '{}': the entity declares no primary key",
                table
            )));
        }

        let mut builder = self.helper.command_builder(table);
        for field in fields.fields() {
            if field.can_update(group) {
                let value = entity.get_value(field.property()).unwrap_or(DbValue::Null);
                builder.add_field_typed(field.column_name(), field.field_type(), field.field_size(), value);
            }
        }
        for field in fields.primary_keys() {
            let value = entity.get_value(field.property()).unwrap_or(DbValue::Null);
            builder.add_condition_typed(field.column_name(), field.field_type(), field.field_size(), value);
        }

        let affected = builder.update(self.helper).await?;
        Ok(affected > 0)
    }

    /// Delete rows matching `condition`. An empty condition deletes every row.
    pub async fn delete(&mut self, table: &str, condition: &mut ConditionBuilder) -> DbResult<u64> {
        let where_text = condition.condition();
        let params = condition.parameters().clone();
        self.delete_where(table, &where_text, params).await
    }

    pub async fn delete_where(
        &mut self,
        table: &str,
        where_text: &str,
        params: DbParameters,
    ) -> DbResult<u64> {
        let sql = format!(
            "DELETE FROM {}{}",
            self.helper.syntax().quote_identifier(table),
            where_clause(where_text)
        );
        self.helper
            .create_command(sql)
            .with_parameters(params)
            .execute_non_query()
            .await
    }

    /// Delete rows whose [`DEFAULT_ID_COLUMN`] is in `ids`.
    pub async fn delete_by_ids<V, I>(&mut self, table: &str, ids: I) -> DbResult<u64>
    where
        V: Into<DbValue>,
        I: IntoIterator<Item = V>,
    {
        self.delete_in(table, DEFAULT_ID_COLUMN, ids).await
    }

    /// Delete rows whose `column` is in `values`. Nothing runs for an empty list.
    pub async fn delete_in<V, I>(&mut self, table: &str, column: &str, values: I) -> DbResult<u64>
    where
        V: Into<DbValue>,
        I: IntoIterator<Item = V>,
    {
        let mut condition = self.helper.condition_builder();
        condition.add_in_criteria(column, values);
        if !condition.has_condition() {
            return Ok(0);
        }
        self.delete(table, &mut condition).await
    }

    /// Delete the rows matching `condition` and return them.
    ///
    /// Runs in the active transaction, or in its own one when none is active.
    pub async fn remove<T: DbEntity>(
        &mut self,
        table: &str,
        condition: &mut ConditionBuilder,
    ) -> DbResult<Vec<T>> {
        let own_transaction = !self.helper.in_transaction();
        if own_transaction {
            self.helper.begin_transaction().await?;
        }

        match self.select_and_delete::<T>(table, condition).await {
            Ok(rows) => {
                if own_transaction {
                    self.helper.commit().await?;
                }
                Ok(rows)
            }
            Err(e) => {
                if own_transaction {
                    self.helper.rollback().await?;
                }
                Err(e)
            }
        }
    }

    async fn select_and_delete<T: DbEntity>(
        &mut self,
        table: &str,
        condition: &mut ConditionBuilder,
    ) -> DbResult<Vec<T>> {
        let where_text = condition.condition();
        let params = condition.parameters().clone();
        let rows = self
            .select_where::<T>(table, &where_text, params.clone(), None)
            .await?;
        if !rows.is_empty() {
            self.delete_where(table, &where_text, params).await?;
        }
        Ok(rows)
    }

    fn select_prefix<T: DbEntity>(&self, table: &str) -> String {
        let syntax = self.helper.syntax();
        let columns = T::field_table().select_list(syntax);
        let columns = if columns.is_empty() { "*".to_string() } else { columns };
        format!("SELECT {} FROM {}", columns, syntax.quote_identifier(table))
    }
}

/// Key column of `T`: its only primary key, else [`DEFAULT_ID_COLUMN`].
fn key_column<T: DbEntity>() -> String {
    let mut keys = T::field_table().primary_keys();
    match (keys.next(), keys.next()) {
        (Some(key), None) => key.column_name().to_string(),
        _ => DEFAULT_ID_COLUMN.to_string(),
    }
}

fn where_clause(where_text: &str) -> String {
    let trimmed = where_text.trim();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_where_clause() {
        assert_eq!(where_clause(""), "");
        assert_eq!(where_clause("   "), "");
        assert_eq!(where_clause(" a=1 "), " WHERE a=1");
    }
}
