//! Entity mapping metadata.
//!
//! A type opts into row mapping with [`db_entity!`](crate::db_entity), which
//! implements [`DbEntity`] and builds the type's [`FieldTable`] once.
//!
//! ```ignore
//! #[derive(Debug, Default)]
//! struct Order {
//!     id: i64,
//!     customer: String,
//!     note: Option<String>,
//! }
//!
//! db_entity!(Order {
//!     id: i64 => DbField::new().column("Id").primary_key().identity(),
//!     customer: String => DbField::new().size(64),
//!     note: Option<String>,
//! });
//! ```
//!
//! # Groups
//!
//! Fields may belong to groups, a bitmask. Insert and update take a group
//! value that selects which fields take part; see [`allow_operation`].

use crate::models::{ConvertError, DbRow, DbType, DbValue};
use crate::sql::SqlSyntax;
use std::collections::HashMap;
use tracing::{error, warn};

/// Group value that matches every field.
pub const EMPTY_GROUP: i64 = 0;
/// Group value that matches only fields without groups.
pub const NO_GROUP: i64 = -1;

/// Whether a field takes part in INSERT or UPDATE.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Operable {
    #[default]
    Allowed,
    /// Only when the caller's group selects the field.
    OnlyGroup,
    Unallowed,
}

/// Mapping of one struct field to one column.
#[derive(Debug, Clone, PartialEq)]
pub struct DbField {
    property: &'static str,
    column: Option<String>,
    db_type: Option<DbType>,
    size: Option<usize>,
    primary_key: bool,
    identity: bool,
    read_only: bool,
    groups: i64,
    insertable: Operable,
    updatable: Operable,
}

impl Default for DbField {
    fn default() -> Self {
        Self::new()
    }
}

impl DbField {
    pub fn new() -> Self {
        Self {
            property: "",
            column: None,
            db_type: None,
            size: None,
            primary_key: false,
            identity: false,
            read_only: false,
            groups: EMPTY_GROUP,
            insertable: Operable::Allowed,
            updatable: Operable::Allowed,
        }
    }

    pub fn column(mut self, name: impl Into<String>) -> Self {
        self.column = Some(name.into());
        self
    }

    /// Override the type inferred from the field's Rust type.
    pub fn db_type(mut self, db_type: DbType) -> Self {
        self.db_type = Some(db_type);
        self
    }

    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    /// Database-generated key. Never written; filled back after INSERT.
    pub fn identity(mut self) -> Self {
        self.identity = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn groups(mut self, groups: i64) -> Self {
        self.groups = groups;
        self
    }

    pub fn insertable(mut self, operable: Operable) -> Self {
        self.insertable = operable;
        self
    }

    pub fn updatable(mut self, operable: Operable) -> Self {
        self.updatable = operable;
        self
    }

    /// Attach the field name and inferred type. Called by `db_entity!`.
    #[doc(hidden)]
    pub fn bind(mut self, property: &'static str, inferred: DbType) -> Self {
        self.property = property;
        if self.db_type.is_none() {
            self.db_type = Some(inferred);
        }
        self
    }

    pub fn property(&self) -> &'static str {
        self.property
    }

    pub fn column_name(&self) -> &str {
        self.column.as_deref().unwrap_or(self.property)
    }

    pub fn field_type(&self) -> DbType {
        self.db_type.unwrap_or(DbType::Object)
    }

    pub fn field_size(&self) -> Option<usize> {
        self.size
    }

    pub fn is_primary_key(&self) -> bool {
        self.primary_key
    }

    pub fn is_identity(&self) -> bool {
        self.identity
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn group_mask(&self) -> i64 {
        self.groups
    }

    pub fn can_insert(&self, group: i64) -> bool {
        !self.identity && !self.read_only && allow_operation(self.insertable, self.groups, group)
    }

    pub fn can_update(&self, group: i64) -> bool {
        !self.identity && !self.read_only && allow_operation(self.updatable, self.groups, group)
    }
}

/// A field declaring [`NO_GROUP`] belongs to no group at all.
fn declared_groups(field_groups: i64) -> i64 {
    if field_groups == NO_GROUP {
        EMPTY_GROUP
    } else {
        field_groups
    }
}

/// Whether a field with `field_groups` is selected by the caller's `group`.
pub fn in_groups(field_groups: i64, group: i64) -> bool {
    let field_groups = declared_groups(field_groups);
    if group == EMPTY_GROUP {
        return true;
    }
    if field_groups == EMPTY_GROUP {
        return group == NO_GROUP;
    }
    if group == NO_GROUP {
        return false;
    }
    field_groups & group != 0
}

/// Whether an operation gated by `operable` includes the field.
///
/// - `Allowed`: included unless the field declares groups the caller's
///   group does not select.
/// - `OnlyGroup`: included only when the caller's group selects the field;
///   a field without groups is then selected by [`NO_GROUP`] alone.
/// - `Unallowed`: never.
pub fn allow_operation(operable: Operable, field_groups: i64, group: i64) -> bool {
    let field_groups = declared_groups(field_groups);
    match operable {
        Operable::Unallowed => false,
        Operable::Allowed => field_groups == EMPTY_GROUP || in_groups(field_groups, group),
        Operable::OnlyGroup => {
            if field_groups == EMPTY_GROUP {
                group == NO_GROUP
            } else {
                group != EMPTY_GROUP && group != NO_GROUP && field_groups & group != 0
            }
        }
    }
}

/// All field mappings of one entity type.
#[derive(Debug, Clone)]
pub struct FieldTable {
    fields: Vec<DbField>,
    by_column: HashMap<String, usize>,
    by_property: HashMap<String, usize>,
}

impl FieldTable {
    pub fn new(fields: Vec<DbField>) -> Self {
        let mut by_column = HashMap::with_capacity(fields.len());
        let mut by_property = HashMap::with_capacity(fields.len());
        for (idx, field) in fields.iter().enumerate() {
            by_column
                .entry(field.column_name().to_lowercase())
                .or_insert(idx);
            by_property
                .entry(field.property().to_lowercase())
                .or_insert(idx);
        }
        Self {
            fields,
            by_column,
            by_property,
        }
    }

    pub fn fields(&self) -> &[DbField] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn by_column(&self, column: &str) -> Option<&DbField> {
        self.by_column
            .get(&column.to_lowercase())
            .map(|idx| &self.fields[*idx])
    }

    pub fn by_property(&self, property: &str) -> Option<&DbField> {
        self.by_property
            .get(&property.to_lowercase())
            .map(|idx| &self.fields[*idx])
    }

    /// Field for a result column: column name first, then property name.
    pub fn for_result_column(&self, column: &str) -> Option<&DbField> {
        self.by_column(column).or_else(|| self.by_property(column))
    }

    pub fn primary_keys(&self) -> impl Iterator<Item = &DbField> {
        self.fields.iter().filter(|f| f.is_primary_key())
    }

    pub fn identity(&self) -> Option<&DbField> {
        self.fields.iter().find(|f| f.is_identity())
    }

    /// Quoted, comma-separated column list.
    pub fn select_list(&self, syntax: &SqlSyntax) -> String {
        self.fields
            .iter()
            .map(|f| syntax.quote_identifier(f.column_name()))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A type whose values map to and from rows.
pub trait DbEntity: Default + Send {
    fn field_table() -> &'static FieldTable;

    /// Current value of a field, by property name.
    fn get_value(&self, property: &str) -> Option<DbValue>;

    /// Assign a field from a column value. `Ok(false)` when no field has that name.
    fn set_value(&mut self, property: &str, value: DbValue) -> Result<bool, ConvertError>;
}

/// Build an entity from a row, skipping columns that fail to convert.
pub fn to_entity<T: DbEntity>(row: &DbRow) -> T {
    let table = T::field_table();
    let mut entity = T::default();
    for (column, value) in row.iter() {
        let Some(field) = table.for_result_column(column) else {
            continue;
        };
        if let Err(e) = entity.set_value(field.property(), value.clone()) {
            warn!(column = %column, error = %e, "Column skipped during mapping");
        }
    }
    entity
}

/// Build entities from rows.
///
/// A conversion error stops the mapping: the entities built so far are
/// returned and the error is logged.
pub fn to_entity_list<T: DbEntity>(rows: Vec<DbRow>) -> Vec<T> {
    let table = T::field_table();
    let mut entities = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let mut entity = T::default();
        for (column, value) in row.iter() {
            let Some(field) = table.for_result_column(column) else {
                continue;
            };
            if let Err(e) = entity.set_value(field.property(), value.clone()) {
                error!(
                    row = idx,
                    column = %column,
                    error = %e,
                    "Mapping aborted; returning rows mapped so far"
                );
                return entities;
            }
        }
        entities.push(entity);
    }
    entities
}

/// Implement [`DbEntity`](crate::mapping::DbEntity) for a struct.
///
/// Each listed field needs `Default`, `Clone`, `Into<DbValue>` and
/// [`FromDbValue`](crate::models::FromDbValue). An optional `=> DbField`
/// expression sets the column name, key flags, size and groups.
#[macro_export]
macro_rules! db_entity {
    (@field) => {
        $crate::mapping::DbField::new()
    };
    (@field $def:expr) => {
        $def
    };
    ($entity:ty { $( $field:ident : $fty:ty $(=> $def:expr)? ),* $(,)? }) => {
        impl $crate::mapping::DbEntity for $entity {
            fn field_table() -> &'static $crate::mapping::FieldTable {
                static TABLE: ::std::sync::OnceLock<$crate::mapping::FieldTable> =
                    ::std::sync::OnceLock::new();
                TABLE.get_or_init(|| {
                    $crate::mapping::FieldTable::new(vec![
                        $(
                            $crate::db_entity!(@field $($def)?).bind(
                                stringify!($field),
                                <$fty as $crate::models::FromDbValue>::DB_TYPE,
                            ),
                        )*
                    ])
                })
            }

            fn get_value(&self, property: &str) -> Option<$crate::models::DbValue> {
                $(
                    if property.eq_ignore_ascii_case(stringify!($field)) {
                        return Some($crate::models::DbValue::from(self.$field.clone()));
                    }
                )*
                None
            }

            fn set_value(
                &mut self,
                property: &str,
                value: $crate::models::DbValue,
            ) -> Result<bool, $crate::models::ConvertError> {
                $(
                    if property.eq_ignore_ascii_case(stringify!($field)) {
                        self.$field = <$fty as $crate::models::FromDbValue>::from_db_value(value)?;
                        return Ok(true);
                    }
                )*
                let _ = value;
                Ok(false)
            }
        }
    };
}
