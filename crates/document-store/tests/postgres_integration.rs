//! PostgreSQL integration tests
//!
//! These tests use a shared PostgreSQL container for efficiency.
//! Run with:
//!
//! ```bash
//! cargo test -p document-store --test postgres_integration -- --test-threads=1
//! ```

use std::sync::Arc;

use document_store::{
    Change, ChangeSet, DocumentId, DocumentStore, DocumentStoreError, DocumentStoreExt,
    PostgresDocumentStore, SessionOptions, Version,
};
use serde::{Deserialize, Serialize};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_documents_table.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh store with its own pool and an empty table
async fn get_test_store() -> PostgresDocumentStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE documents")
        .execute(&pool)
        .await
        .unwrap();

    PostgresDocumentStore::new(pool)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct OrderState {
    lines: Vec<String>,
}

fn order_id(key: &str) -> DocumentId {
    DocumentId::from_parts("OrderProcessor", key)
}

#[tokio::test]
#[serial]
async fn put_and_load_document() {
    let store = get_test_store().await;

    let versions = store
        .commit(ChangeSet::from_iter([Change::put(
            order_id("a"),
            serde_json::json!({"lines": ["widget"]}),
        )
        .expect_new()]))
        .await
        .unwrap();
    assert_eq!(versions, vec![(order_id("a"), Version::first())]);

    let doc = store.load(&order_id("a")).await.unwrap().unwrap();
    assert_eq!(doc.version, Version::first());
    assert_eq!(
        doc.into_body::<OrderState>().unwrap(),
        OrderState {
            lines: vec!["widget".to_string()]
        }
    );
}

#[tokio::test]
#[serial]
async fn missing_document_loads_as_none() {
    let store = get_test_store().await;
    assert!(store.load(&order_id("missing")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn expect_new_conflicts_with_existing_document() {
    let store = get_test_store().await;
    store
        .commit(ChangeSet::from_iter([Change::put(order_id("a"), serde_json::json!({}))]))
        .await
        .unwrap();

    let err = store
        .commit(ChangeSet::from_iter([
            Change::put(order_id("a"), serde_json::json!({})).expect_new(),
        ]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        DocumentStoreError::ConcurrencyConflict { expected, actual, .. }
            if expected == Version::initial() && actual == Version::first()
    ));
}

#[tokio::test]
#[serial]
async fn failed_change_set_rolls_back() {
    let store = get_test_store().await;
    store
        .commit(ChangeSet::from_iter([Change::put(order_id("b"), serde_json::json!({}))]))
        .await
        .unwrap();

    let result = store
        .commit(ChangeSet::from_iter([
            Change::put(order_id("a"), serde_json::json!({})).expect_new(),
            Change::put(order_id("b"), serde_json::json!({})).expect_version(Version::new(5)),
        ]))
        .await;

    assert!(result.unwrap_err().is_concurrency_conflict());
    assert!(store.load(&order_id("a")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn versioned_update_and_delete() {
    let store = get_test_store().await;
    store
        .commit(ChangeSet::from_iter([Change::put(order_id("a"), serde_json::json!(1))]))
        .await
        .unwrap();

    let versions = store
        .commit(ChangeSet::from_iter([
            Change::put(order_id("a"), serde_json::json!(2)).expect_version(Version::first()),
        ]))
        .await
        .unwrap();
    assert_eq!(versions[0].1, Version::new(2));

    let stale_delete = store
        .commit(ChangeSet::from_iter([
            Change::delete(order_id("a")).expect_version(Version::first()),
        ]))
        .await;
    assert!(stale_delete.unwrap_err().is_concurrency_conflict());

    store
        .commit(ChangeSet::from_iter([
            Change::delete(order_id("a")).expect_version(Version::new(2)),
        ]))
        .await
        .unwrap();
    assert!(store.load(&order_id("a")).await.unwrap().is_none());
}

#[tokio::test]
#[serial]
async fn sessions_detect_lost_updates() {
    let store: Arc<dyn DocumentStore> = Arc::new(get_test_store().await);

    let mut seed = store.open_session(SessionOptions::optimistic());
    seed.store(order_id("a"), &OrderState { lines: vec![] }).unwrap();
    seed.save_changes().await.unwrap();

    let mut first = store.open_session(SessionOptions::optimistic());
    let mut second = store.open_session(SessionOptions::optimistic());
    let _: Option<OrderState> = first.load(&order_id("a")).await.unwrap();
    let _: Option<OrderState> = second.load(&order_id("a")).await.unwrap();

    first
        .store(order_id("a"), &OrderState { lines: vec!["one".into()] })
        .unwrap();
    first.save_changes().await.unwrap();

    second
        .store(order_id("a"), &OrderState { lines: vec!["two".into()] })
        .unwrap();
    assert!(second.save_changes().await.unwrap_err().is_concurrency_conflict());
}
