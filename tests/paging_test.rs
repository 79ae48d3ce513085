//! Paged reads against SQLite.

use db_access::config::PoolOptions;
use db_access::db::paging::count_sql;
use db_access::db::{DbHelper, PagingState, PagingStrategy, create_pool};
use db_access::db_entity;
use db_access::mapping::DbField;
use db_access::models::{ConnectionTarget, DatabaseType, DbParameters, DbValue};
use tempfile::NamedTempFile;

#[derive(Debug, Default, Clone)]
struct Item {
    id: i64,
    kind: String,
}

db_entity!(Item {
    id: i64 => DbField::new().column("Id").primary_key(),
    kind: String => DbField::new().column("Kind"),
});

async fn setup_helper(rows: i64) -> DbHelper {
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
            "CREATE TABLE items (Id INTEGER PRIMARY KEY, Kind TEXT NOT NULL)",
            DbParameters::new(),
        )
        .await
        .unwrap();

    helper.begin_transaction().await.unwrap();
    for id in 1..=rows {
        let kind = if id % 2 == 0 { "even" } else { "odd" };
        helper
            .create_command("INSERT INTO items (Id, Kind) VALUES (@id, @kind)")
            .bind("id", id)
            .bind("kind", kind)
            .execute_non_query()
            .await
            .unwrap();
    }
    helper.commit().await.unwrap();
    helper
}

fn first_ids(rows: &[db_access::models::DbRow]) -> Vec<i64> {
    rows.iter()
        .map(|r| match r.get("Id") {
            Some(DbValue::Int(v)) => *v,
            other => panic!("unexpected id {:?}", other),
        })
        .collect()
}

#[tokio::test]
async fn test_pages_cover_all_rows() {
    let mut helper = setup_helper(25).await;
    let mut reader = helper.paging_reader("SELECT Id, Kind FROM items");
    reader.condition().add_order_by("Id", false);
    reader.set_page_size(10);

    assert_eq!(reader.state(), PagingState::Idle);
    assert_eq!(reader.init_page_count().await.unwrap(), 25);
    assert_eq!(reader.page_count(), Some(3));
    assert_eq!(reader.state(), PagingState::CountComputed);

    let mut seen = Vec::new();
    for page in 1..=3 {
        reader.set_page_number(page);
        let rows = reader.read_rows().await.unwrap();
        assert_eq!(reader.state(), PagingState::PageLoaded);
        seen.extend(first_ids(&rows));
    }
    assert_eq!(seen, (1..=25).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_last_page_and_clamping() {
    let mut helper = setup_helper(25).await;
    let mut reader = helper.paging_reader("SELECT Id, Kind FROM items");
    reader.condition().add_order_by("Id", false);
    reader.set_page_size(10);
    reader.init_page_count().await.unwrap();

    reader.set_page_number(99);
    assert_eq!(reader.page_number(), 3);
    let rows = reader.read_rows().await.unwrap();
    assert_eq!(first_ids(&rows), vec![21, 22, 23, 24, 25]);

    reader.set_page_number(0);
    assert_eq!(reader.page_number(), 1);
}

#[tokio::test]
async fn test_generic_strategy_matches_native() {
    let mut helper = setup_helper(25).await;

    let mut reader = helper.paging_reader("SELECT Id FROM items");
    reader.condition().add_order_by("Id", true);
    reader.set_page_size(7);
    reader.set_page_number(2);
    let native = reader.read_rows().await.unwrap();

    let mut reader = helper.paging_reader("SELECT Id FROM items");
    reader.condition().add_order_by("Id", true);
    reader.set_strategy(PagingStrategy::Generic);
    reader.set_page_size(7);
    reader.set_page_number(2);
    let generic = reader.read_rows().await.unwrap();

    assert_eq!(first_ids(&native), vec![18, 17, 16, 15, 14, 13, 12]);
    assert_eq!(first_ids(&native), first_ids(&generic));
}

#[tokio::test]
async fn test_condition_filters_and_recounts() {
    let mut helper = setup_helper(25).await;
    let mut reader = helper.paging_reader("SELECT * FROM items");
    reader.set_page_size(5);
    assert_eq!(reader.init_page_count().await.unwrap(), 25);

    reader.condition().add_criteria("Kind", "even");
    assert_eq!(reader.record_count(), None);
    assert_eq!(reader.init_page_count().await.unwrap(), 12);
    assert_eq!(reader.page_count(), Some(3));

    reader.condition().add_order_by("Id", false);
    reader.set_page_number(3);
    let items: Vec<Item> = reader.read().await.unwrap();
    let ids: Vec<_> = items.iter().map(|i| i.id).collect();
    assert_eq!(ids, vec![22, 24]);
    assert!(items.iter().all(|i| i.kind == "even"));
}

#[tokio::test]
async fn test_empty_result_has_one_page() {
    let mut helper = setup_helper(0).await;
    let mut reader = helper.paging_reader("SELECT * FROM items");
    let rows = reader.read_rows().await.unwrap();
    assert!(rows.is_empty());
    assert_eq!(reader.record_count(), Some(0));
    assert_eq!(reader.page_count(), Some(1));
    assert_eq!(reader.page_number(), 1);
}

#[tokio::test]
async fn test_known_count_skips_counting() {
    let mut helper = setup_helper(25).await;
    let mut reader = helper.paging_reader("SELECT Id FROM items");
    reader.condition().add_order_by("Id", false);
    reader.set_page_size(10);
    // A stale count from elsewhere is trusted as is
    reader.set_record_count(15);
    assert_eq!(reader.page_count(), Some(2));
    reader.set_page_number(5);
    assert_eq!(reader.page_number(), 2);

    let rows = reader.read_rows().await.unwrap();
    assert_eq!(first_ids(&rows), (11..=20).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_reader_releases_connection() {
    let mut helper = setup_helper(3).await;
    {
        let mut reader = helper.paging_reader("SELECT * FROM items");
        reader.read_rows().await.unwrap();
    }
    assert!(!helper.keep_connection());
    assert!(!helper.is_open(ConnectionTarget::Primary));

    helper.set_keep_connection(true);
    {
        let mut reader = helper.paging_reader("SELECT * FROM items");
        reader.read_rows().await.unwrap();
    }
    assert!(helper.is_open(ConnectionTarget::Primary));
    helper.close().await;
}

#[tokio::test]
async fn test_reader_keeps_connection_opened_by_caller() {
    let mut helper = setup_helper(12).await;
    helper.open().await.unwrap();
    helper
        .execute_non_query(
            "CREATE TEMP TABLE scratch AS SELECT Id FROM items WHERE Kind = 'odd'",
            DbParameters::new(),
        )
        .await
        .unwrap();

    for page in 1..=2 {
        let mut reader = helper.paging_reader("SELECT Id FROM scratch");
        reader.condition().add_order_by("Id", false);
        reader.set_page_size(4);
        reader.set_page_number(page);
        let rows = reader.read_rows().await.unwrap();
        assert!(!rows.is_empty());
    }

    // The session, and with it the temp table, survived both reads
    assert!(helper.is_open(ConnectionTarget::Primary));
    let count = helper
        .create_command("SELECT COUNT(*) FROM scratch")
        .execute_scalar_as::<i64>()
        .await
        .unwrap();
    assert_eq!(count, Some(6));
    helper.close().await;
    assert!(!helper.is_open(ConnectionTarget::Primary));
}

#[tokio::test]
async fn test_grouped_select_counts_groups() {
    let mut helper = setup_helper(10).await;
    let mut reader = helper.paging_reader("SELECT Kind, COUNT(*) AS n FROM items GROUP BY Kind");
    assert_eq!(reader.init_page_count().await.unwrap(), 2);

    let mut reader = helper.paging_reader("SELECT DISTINCT Kind FROM items");
    assert_eq!(reader.init_page_count().await.unwrap(), 2);
}

#[test]
fn test_count_sql_shapes() {
    assert_eq!(
        count_sql("SELECT a, (SELECT 1 FROM t2) AS x FROM t1", "a > 1"),
        "SELECT COUNT(*) FROM t1 WHERE a > 1"
    );
    assert_eq!(
        count_sql("select distinct a from t", ""),
        "SELECT COUNT(*) FROM (select distinct a from t) AS _tb1"
    );
    assert_eq!(
        count_sql("SELECT a FROM t", "1=1 GROUP BY a"),
        "SELECT COUNT(*) FROM (SELECT a FROM t WHERE 1=1 GROUP BY a) AS _tb1"
    );
}
