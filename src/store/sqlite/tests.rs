use super::*;
use crate::store::{ColumnSpec, FilterValue, ForeignKeySpec};

use tempfile::TempDir;

async fn demand_store(dir: &TempDir) -> Store {
    let store = Store::create(&dir.path().join("model.db")).await.unwrap();

    store
        .create_table(
            "_set_REGION",
            &[
                ColumnSpec::new("id", "INTEGER PRIMARY KEY"),
                ColumnSpec::new("region_Name", "TEXT UNIQUE"),
            ],
            &[],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "_set_REGION",
            &["region_Name".to_string()],
            &[
                vec![Some("north".to_string())],
                vec![Some("south".to_string())],
            ],
            100,
        )
        .await
        .unwrap();

    store
        .create_table(
            "demand",
            &[
                ColumnSpec::new("id", "INTEGER PRIMARY KEY"),
                ColumnSpec::new("region_Name", "TEXT"),
                ColumnSpec::new("values", "REAL"),
            ],
            &[ForeignKeySpec {
                column: "region_Name".to_string(),
                references_table: "_set_REGION".to_string(),
                references_column: "region_Name".to_string(),
            }],
        )
        .await
        .unwrap();
    store
        .insert_rows(
            "demand",
            &["region_Name".to_string()],
            &[
                vec![Some("north".to_string())],
                vec![Some("south".to_string())],
            ],
            100,
        )
        .await
        .unwrap();

    store
}

fn coord_headers() -> Vec<String> {
    vec!["region_Name".to_string()]
}

#[tokio::test]
async fn create_refuses_to_overwrite() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("model.db");

    let store = Store::create(&path).await.unwrap();
    store.close().await;

    assert!(matches!(
        Store::create(&path).await,
        Err(Error::DatabaseAlreadyExists(_))
    ));
    assert!(Store::open(&path).await.is_ok());
}

#[tokio::test]
async fn open_requires_existing_file() {
    let dir = TempDir::new().unwrap();
    assert!(matches!(
        Store::open(&dir.path().join("missing.db")).await,
        Err(Error::DatabaseDoesNotExist(_))
    ));
}

#[tokio::test]
async fn foreign_keys_reject_unknown_labels() {
    let dir = TempDir::new().unwrap();
    let store = demand_store(&dir).await;

    let result = store
        .insert_rows(
            "demand",
            &coord_headers(),
            &[vec![Some("atlantis".to_string())]],
            100,
        )
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn select_where_honors_single_and_list_filters() {
    let dir = TempDir::new().unwrap();
    let store = demand_store(&dir).await;

    let mut filters = FilterMap::new();
    filters.insert(
        "region_Name".to_string(),
        FilterValue::One("north".to_string()),
    );
    let rows = store
        .select_where("demand", &coord_headers(), &filters)
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].coords["region_Name"], "north");
    assert_eq!(rows[0].value, None);

    let mut filters = FilterMap::new();
    filters.insert(
        "region_Name".to_string(),
        FilterValue::Many(vec!["north".to_string(), "south".to_string()]),
    );
    let rows = store
        .select_where("demand", &coord_headers(), &filters)
        .await
        .unwrap();
    assert_eq!(rows.len(), 2);
}

#[tokio::test]
async fn upsert_updates_then_inserts() {
    let dir = TempDir::new().unwrap();
    let store = demand_store(&dir).await;

    store
        .bulk_upsert(
            "demand",
            &coord_headers(),
            &[
                (vec!["north".to_string()], Some(7.0)),
                (vec!["south".to_string()], Some(15.0)),
            ],
            1,
        )
        .await
        .unwrap();

    let rows = store.table_rows("demand", &coord_headers()).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value, Some(7.0));
    assert_eq!(rows[1].value, Some(15.0));
    assert!(store.null_rows("demand").await.unwrap().is_empty());

    store.null_out_values("demand").await.unwrap();
    assert_eq!(store.null_rows("demand").await.unwrap().len(), 2);
}

#[tokio::test]
async fn relative_diff_aligns_on_coordinates() {
    let dir = TempDir::new().unwrap();
    let store = demand_store(&dir).await;

    store
        .bulk_upsert(
            "demand",
            &coord_headers(),
            &[
                (vec!["north".to_string()], Some(10.0)),
                (vec!["south".to_string()], Some(100.0)),
            ],
            100,
        )
        .await
        .unwrap();

    let snapshot = dir.path().join("previous.db");
    store.snapshot_to(&snapshot).await.unwrap();

    store
        .bulk_upsert(
            "demand",
            &coord_headers(),
            &[(vec!["north".to_string()], Some(8.0))],
            100,
        )
        .await
        .unwrap();

    let tables = vec![("demand".to_string(), coord_headers())];
    let diff = store
        .relative_diff(&tables, &snapshot, 5)
        .await
        .unwrap();
    assert_eq!(diff["demand"], 0.2);

    assert!(!store
        .equal_within_tolerance(&tables, &snapshot, 0.01)
        .await
        .unwrap());
    assert!(store
        .equal_within_tolerance(&tables, &snapshot, 0.5)
        .await
        .unwrap());
}

#[tokio::test]
async fn restore_rolls_the_file_back() {
    let dir = TempDir::new().unwrap();
    let mut store = demand_store(&dir).await;

    store
        .bulk_upsert(
            "demand",
            &coord_headers(),
            &[(vec!["north".to_string()], Some(1.0))],
            100,
        )
        .await
        .unwrap();

    let backup = dir.path().join("backup.db");
    store.snapshot_to(&backup).await.unwrap();

    store
        .bulk_upsert(
            "demand",
            &coord_headers(),
            &[(vec!["north".to_string()], Some(99.0))],
            100,
        )
        .await
        .unwrap();

    store.restore_from(&backup).await.unwrap();

    let rows = store.table_rows("demand", &coord_headers()).await.unwrap();
    assert_eq!(rows[0].value, Some(1.0));
    // the backup file was consumed by the rename
    assert!(!backup.exists());
}
