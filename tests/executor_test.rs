//! Entity CRUD through the command executor, against SQLite.

use db_access::config::PoolOptions;
use db_access::db::{DbHelper, create_pool};
use db_access::error::DbError;
use db_access::mapping::{DbField, EMPTY_GROUP, NO_GROUP, Operable};
use db_access::models::{Compare, DatabaseType, DbParameters, DbType};
use db_access::db_entity;
use tempfile::NamedTempFile;

#[derive(Debug, Default, Clone, PartialEq)]
struct Product {
    id: i64,
    name: String,
    price: f64,
    stock: i32,
    note: Option<String>,
}

db_entity!(Product {
    id: i64 => DbField::new().column("Id").primary_key().identity(),
    name: String => DbField::new().column("Name").size(20),
    price: f64 => DbField::new().column("Price"),
    stock: i32 => DbField::new()
        .column("Stock")
        .groups(0b10)
        .updatable(Operable::OnlyGroup),
    note: Option<String> => DbField::new().column("Note"),
});

/// Entity without a primary key.
#[derive(Debug, Default, Clone)]
struct LogLine {
    message: String,
}

db_entity!(LogLine { message: String });

fn product(name: &str, price: f64, stock: i32) -> Product {
    Product {
        name: name.to_string(),
        price,
        stock,
        ..Default::default()
    }
}

async fn setup_helper() -> DbHelper {
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
        max_connections: Some(4),
        ..Default::default()
    };
    let pool = create_pool(&url, DatabaseType::SQLite, &opts, false)
        .await
        .unwrap();

    let mut helper = DbHelper::new(pool);
    helper
        .execute_non_query(
            "CREATE TABLE products (
                Id INTEGER PRIMARY KEY AUTOINCREMENT,
                Name TEXT NOT NULL,
                Price REAL NOT NULL,
                Stock INTEGER DEFAULT 5,
                Note TEXT
            )",
            DbParameters::new(),
        )
        .await
        .unwrap();
    helper
        .execute_non_query("CREATE TABLE logs (message TEXT)", DbParameters::new())
        .await
        .unwrap();
    helper
}

async fn seed(helper: &mut DbHelper) -> Vec<Product> {
    let mut items = vec![
        product("apple", 1.5, 10),
        product("banana", 0.25, 40),
        product("cherry", 6.0, 0),
        product("durian", 12.75, 2),
    ];
    let mut executor = helper.executor();
    for item in items.iter_mut() {
        assert!(executor.insert("products", item, EMPTY_GROUP).await.unwrap());
    }
    items
}

#[tokio::test]
async fn test_insert_writes_back_identity() {
    let mut helper = setup_helper().await;
    let items = seed(&mut helper).await;

    let ids: Vec<i64> = items.iter().map(|p| p.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);

    let loaded: Option<Product> = helper
        .executor()
        .get_by_id("products", 3)
        .await
        .unwrap();
    assert_eq!(loaded, Some(items[2].clone()));
}

#[tokio::test]
async fn test_insert_truncates_sized_text() {
    let mut helper = setup_helper().await;
    let mut item = product("a name that is much longer than twenty", 1.0, 1);
    helper
        .executor()
        .insert("products", &mut item, EMPTY_GROUP)
        .await
        .unwrap();

    let loaded: Product = helper
        .executor()
        .get_by_id("products", item.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.name, "a name that is much ");
    assert_eq!(loaded.name.chars().count(), 20);
}

#[tokio::test]
async fn test_insert_group_skips_grouped_fields() {
    let mut helper = setup_helper().await;
    let mut item = product("pear", 2.0, 99);
    helper
        .executor()
        .insert("products", &mut item, NO_GROUP)
        .await
        .unwrap();

    let loaded: Product = helper
        .executor()
        .get_by_id("products", item.id)
        .await
        .unwrap()
        .unwrap();
    // Stock belongs to a group, so the column default applies
    assert_eq!(loaded.stock, 5);
    assert_eq!(loaded.name, "pear");
}

#[tokio::test]
async fn test_update_respects_only_group() {
    let mut helper = setup_helper().await;
    let mut items = seed(&mut helper).await;

    let mut apple = items.remove(0);
    apple.name = "green apple".to_string();
    apple.stock = 77;
    apple.note = Some("sour".to_string());

    // Without the group, the OnlyGroup field stays untouched
    assert!(helper
        .executor()
        .update("products", &apple, EMPTY_GROUP)
        .await
        .unwrap());
    let loaded: Product = helper
        .executor()
        .get_by_id("products", apple.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.name, "green apple");
    assert_eq!(loaded.note.as_deref(), Some("sour"));
    assert_eq!(loaded.stock, 10);

    assert!(helper
        .executor()
        .update("products", &apple, 0b10)
        .await
        .unwrap());
    let loaded: Product = helper
        .executor()
        .get_by_id("products", apple.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.stock, 77);

    // A caller group with extra bits still selects the field
    apple.stock = 5;
    apple.name = "red apple".to_string();
    assert!(helper
        .executor()
        .update("products", &apple, 0b11)
        .await
        .unwrap());
    let loaded: Product = helper
        .executor()
        .get_by_id("products", apple.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(loaded.stock, 5);
    assert_eq!(loaded.name, "red apple");
}

#[tokio::test]
async fn test_update_missing_row_and_missing_key() {
    let mut helper = setup_helper().await;
    let mut ghost = product("ghost", 1.0, 1);
    ghost.id = 404;
    assert!(!helper
        .executor()
        .update("products", &ghost, EMPTY_GROUP)
        .await
        .unwrap());

    let line = LogLine {
        message: "hello".into(),
    };
    let result = helper.executor().update("logs", &line, EMPTY_GROUP).await;
    assert!(matches!(result, Err(DbError::InvalidInput { .. })));
}

#[tokio::test]
async fn test_insert_without_identity() {
    let mut helper = setup_helper().await;
    let mut line = LogLine {
        message: "started".into(),
    };
    assert!(helper
        .executor()
        .insert("logs", &mut line, EMPTY_GROUP)
        .await
        .unwrap());

    let rows: Vec<LogLine> = helper
        .executor()
        .select_where("logs", "", DbParameters::new(), None)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].message, "started");
}

#[tokio::test]
async fn test_select_with_condition_order_and_limit() {
    let mut helper = setup_helper().await;
    seed(&mut helper).await;

    let mut cond = helper.condition_builder();
    cond.add_compare_criteria("Price", Compare::Gt, 1.0);
    cond.add_order_by("Price", true);

    let found: Vec<Product> = helper
        .executor()
        .select("products", &mut cond, Some(2))
        .await
        .unwrap();
    let names: Vec<_> = found.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["durian", "cherry"]);

    let mut empty = helper.condition_builder();
    let all: Vec<Product> = helper
        .executor()
        .select("products", &mut empty, None)
        .await
        .unwrap();
    assert_eq!(all.len(), 4);
}

#[tokio::test]
async fn test_get_by_and_exists() {
    let mut helper = setup_helper().await;
    seed(&mut helper).await;

    let mut cond = helper.condition_builder();
    cond.add_criteria("Name", "banana");
    let banana: Option<Product> = helper.executor().get_by("products", &mut cond).await.unwrap();
    assert_eq!(banana.map(|p| p.stock), Some(40));

    let mut cond = helper.condition_builder();
    cond.add_order_by("Stock", true);
    let top: Option<Product> = helper.executor().get_by("products", &mut cond).await.unwrap();
    assert_eq!(top.map(|p| p.name), Some("banana".to_string()));

    let mut cond = helper.condition_builder();
    cond.add_criteria("Name", "kiwi");
    assert!(!helper.executor().exists("products", &mut cond).await.unwrap());
    let missing: Option<Product> = helper.executor().get_by("products", &mut cond).await.unwrap();
    assert!(missing.is_none());

    let mut params = DbParameters::new();
    params.add(helper.syntax().create_parameter(
        "min",
        DbType::Int32,
        None,
        30,
    ));
    assert!(helper
        .executor()
        .exists_where("products", "Stock >= @min", params)
        .await
        .unwrap());
}

#[tokio::test]
async fn test_delete_variants() {
    let mut helper = setup_helper().await;
    seed(&mut helper).await;

    let none: Vec<i64> = Vec::new();
    assert_eq!(
        helper.executor().delete_by_ids("products", none).await.unwrap(),
        0
    );
    assert_eq!(
        helper
            .executor()
            .delete_by_ids("products", [1i64, 2, 99])
            .await
            .unwrap(),
        2
    );

    let mut cond = helper.condition_builder();
    cond.add_criteria("Name", "cherry");
    assert_eq!(helper.executor().delete("products", &mut cond).await.unwrap(), 1);

    let left: Vec<Product> = helper
        .executor()
        .select_where("products", "", DbParameters::new(), None)
        .await
        .unwrap();
    assert_eq!(left.len(), 1);
    assert_eq!(left[0].name, "durian");
}

#[tokio::test]
async fn test_remove_returns_deleted_rows() {
    let mut helper = setup_helper().await;
    seed(&mut helper).await;

    let mut cond = helper.condition_builder();
    cond.add_compare_criteria("Stock", Compare::Lt, 5);
    let removed: Vec<Product> = helper.executor().remove("products", &mut cond).await.unwrap();
    let mut names: Vec<_> = removed.into_iter().map(|p| p.name).collect();
    names.sort();
    assert_eq!(names, vec!["cherry".to_string(), "durian".to_string()]);

    assert!(!helper.in_transaction());
    let count = helper
        .create_command("SELECT COUNT(*) FROM products")
        .execute_scalar_as::<i64>()
        .await
        .unwrap();
    assert_eq!(count, Some(2));
}

#[tokio::test]
async fn test_remove_joins_active_transaction() {
    let mut helper = setup_helper().await;
    seed(&mut helper).await;

    helper.begin_transaction().await.unwrap();
    let mut cond = helper.condition_builder();
    cond.add_criteria("Name", "apple");
    let removed: Vec<Product> = helper.executor().remove("products", &mut cond).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert!(helper.in_transaction());
    helper.rollback().await.unwrap();

    let mut cond = helper.condition_builder();
    cond.add_criteria("Name", "apple");
    assert!(helper.executor().exists("products", &mut cond).await.unwrap());
}
