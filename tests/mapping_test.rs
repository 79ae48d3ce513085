//! Row to entity mapping.

use db_access::config::PoolOptions;
use db_access::db::{DbHelper, create_pool};
use db_access::db_entity;
use db_access::mapping::{DbEntity, DbField, to_entity, to_entity_list};
use db_access::models::{DatabaseType, DbParameters, DbRow, DbType, DbValue};
use tempfile::NamedTempFile;

#[derive(Debug, Default, Clone, PartialEq)]
struct Account {
    id: i64,
    owner: String,
    balance: f64,
    active: bool,
    closed_reason: Option<String>,
}

db_entity!(Account {
    id: i64 => DbField::new().column("account_id").primary_key(),
    owner: String => DbField::new().db_type(DbType::FixedString).size(8),
    balance: f64,
    active: bool,
    closed_reason: Option<String>,
});

fn row(values: Vec<(&str, DbValue)>) -> DbRow {
    let (columns, values): (Vec<_>, Vec<_>) = values
        .into_iter()
        .map(|(c, v)| (c.to_string(), v))
        .unzip();
    DbRow::new(columns, values)
}

#[test]
fn test_field_table_metadata() {
    let table = Account::field_table();
    assert_eq!(table.len(), 5);

    let id = table.by_property("id").unwrap();
    assert_eq!(id.column_name(), "account_id");
    assert!(id.is_primary_key());
    assert_eq!(id.field_type(), DbType::Int64);

    let owner = table.by_column("OWNER").unwrap();
    assert_eq!(owner.field_type(), DbType::FixedString);
    assert_eq!(owner.field_size(), Some(8));

    let reason = table.by_property("closed_reason").unwrap();
    assert_eq!(reason.field_type(), DbType::String);

    assert_eq!(table.primary_keys().count(), 1);
    assert!(table.identity().is_none());
}

#[test]
fn test_columns_match_by_column_then_property() {
    let r = row(vec![
        ("ACCOUNT_ID", DbValue::Int(7)),
        ("Owner", DbValue::String("kim".into())),
        ("balance", DbValue::String("12.5".into())),
        ("active", DbValue::Int(1)),
        ("closed_reason", DbValue::Null),
        ("unmapped", DbValue::Int(0)),
    ]);
    let account: Account = to_entity(&r);
    assert_eq!(
        account,
        Account {
            id: 7,
            owner: "kim".into(),
            balance: 12.5,
            active: true,
            closed_reason: None,
        }
    );
}

#[test]
fn test_single_row_mapping_skips_bad_columns() {
    let r = row(vec![
        ("account_id", DbValue::String("not a number".into())),
        ("owner", DbValue::String("lee".into())),
        ("balance", DbValue::Float(3.0)),
    ]);
    let account: Account = to_entity(&r);
    assert_eq!(account.id, 0);
    assert_eq!(account.owner, "lee");
    assert_eq!(account.balance, 3.0);
}

#[test]
fn test_list_mapping_stops_at_first_bad_row() {
    let rows = vec![
        row(vec![("account_id", DbValue::Int(1))]),
        row(vec![("account_id", DbValue::Int(2))]),
        row(vec![("account_id", DbValue::Bytes(vec![1, 2]))]),
        row(vec![("account_id", DbValue::Int(4))]),
    ];
    let accounts: Vec<Account> = to_entity_list(rows);
    let ids: Vec<_> = accounts.iter().map(|a| a.id).collect();
    assert_eq!(ids, vec![1, 2]);
}

#[test]
fn test_get_and_set_value() {
    let mut account = Account::default();
    assert_eq!(account.set_value("OWNER", "ann".into()), Ok(true));
    assert_eq!(account.set_value("missing", DbValue::Int(1)), Ok(false));
    assert!(account.set_value("active", DbValue::String("maybe".into())).is_err());

    assert_eq!(
        account.get_value("owner"),
        Some(DbValue::String("ann".into()))
    );
    assert_eq!(account.get_value("closed_reason"), Some(DbValue::Null));
    assert_eq!(account.get_value("nope"), None);
}

#[tokio::test]
async fn test_entities_from_query() {
    let temp_file = NamedTempFile::new().unwrap();
    let db_path = temp_file
        .into_temp_path()
        .keep()
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    let url = format!("sqlite:{}?mode=rwc", db_path);
    let opts = PoolOptions {
        max_connections: Some(2),
        ..Default::default()
    };
    let pool = create_pool(&url, DatabaseType::SQLite, &opts, false)
        .await
        .unwrap();
    let mut helper = DbHelper::new(pool);

    helper
        .execute_non_query(
            "CREATE TABLE accounts (account_id INTEGER, owner TEXT, balance REAL, active INTEGER, closed_reason TEXT)",
            DbParameters::new(),
        )
        .await
        .unwrap();
    helper
        .execute_non_query(
            "INSERT INTO accounts VALUES (1, 'a', 1.0, 1, NULL), (2, 'b', 2.5, 0, 'moved'), (3, 'c', 0, 1, NULL)",
            DbParameters::new(),
        )
        .await
        .unwrap();

    let all: Vec<Account> = helper
        .execute_entities("SELECT * FROM accounts ORDER BY account_id", DbParameters::new())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[1].closed_reason.as_deref(), Some("moved"));
    assert!(!all[1].active);

    let one: Option<Account> = helper
        .execute_entity(
            "SELECT * FROM accounts WHERE account_id = 3",
            DbParameters::new(),
        )
        .await
        .unwrap();
    assert_eq!(one.map(|a| a.owner), Some("c".to_string()));

    let none: Option<Account> = helper
        .execute_entity(
            "SELECT * FROM accounts WHERE account_id = 99",
            DbParameters::new(),
        )
        .await
        .unwrap();
    assert!(none.is_none());

    let page: Vec<Account> = helper
        .create_command("SELECT * FROM accounts ORDER BY account_id")
        .execute_entity_range(1, Some(1))
        .await
        .unwrap();
    assert_eq!(page.len(), 1);
    assert_eq!(page[0].id, 2);
}
