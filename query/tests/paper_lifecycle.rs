//! Integration tests for the commercial paper lifecycle.
//!
//! These tests issue, trade and redeem papers through a [`StateStore`] and
//! verify what the query façade reports, on the in-memory backend and on
//! SlateDB over a local object store.

use bytes::Bytes;
use common::StorageConfig;
use common::storage::config::{LocalObjectStoreConfig, ObjectStoreConfig, SlateDbStorageConfig};
use query::{
    CompositeKey, Config, DeltaKind, EntityKey, Error, LedgerStub, Payload, ResultIterator,
    StateStore, TxContext, TxTimestamp, drain,
};
use serde_json::{Value, json};
use tempfile::TempDir;

fn local_storage_config(dir: &TempDir) -> StorageConfig {
    StorageConfig::SlateDb(SlateDbStorageConfig {
        path: "ledger-data".to_string(),
        object_store: ObjectStoreConfig::Local(LocalObjectStoreConfig {
            path: dir.path().to_string_lossy().to_string(),
        }),
        settings_path: None,
    })
}

fn paper_key(store: &StateStore, issuer: &str, number: &str) -> CompositeKey {
    CompositeKey::new(store.namespace(), EntityKey::new([issuer, number]).unwrap()).unwrap()
}

fn paper(issuer: &str, number: &str, owner: &str, state: &str) -> Bytes {
    Bytes::from(
        json!({
            "issuer": issuer,
            "paperNumber": number,
            "owner": owner,
            "faceValue": 5000000,
            "currentState": state
        })
        .to_string(),
    )
}

fn tx(tx_id: &str, seconds: i64) -> TxContext {
    TxContext::new(tx_id, TxTimestamp::new(seconds, 250_000_000))
}

/// Issues 00001 and 00002 from MagnetoCorp and 00001 from Hedgematic, then
/// trades MagnetoCorp 00001 to DigiBank and redeems it.
async fn run_lifecycle(store: &StateStore) {
    let steps = [
        ("issue-1", 100, "MagnetoCorp", "00001", "MagnetoCorp", "ISSUED"),
        ("issue-2", 110, "MagnetoCorp", "00002", "MagnetoCorp", "ISSUED"),
        ("issue-3", 120, "Hedgematic", "00001", "Hedgematic", "ISSUED"),
        ("buy-1", 200, "MagnetoCorp", "00001", "DigiBank", "TRADING"),
        ("redeem-1", 300, "MagnetoCorp", "00001", "MagnetoCorp", "REDEEMED"),
    ];
    for (tx_id, seconds, issuer, number, owner, state) in steps {
        store
            .put_state(
                &tx(tx_id, seconds),
                &paper_key(store, issuer, number),
                paper(issuer, number, owner, state),
            )
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn should_query_papers_by_issuer_prefix() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    run_lifecycle(&store).await;

    // when
    let records = store.query().query_by_prefix(&["MagnetoCorp"]).await.unwrap();

    // then
    let keys: Vec<String> = records.iter().map(|r| r.key.key.to_string()).collect();
    assert_eq!(keys, vec!["MagnetoCorp:00001", "MagnetoCorp:00002"]);
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn should_query_papers_by_owner() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    run_lifecycle(&store).await;
    let magneto_2 = paper_key(&store, "MagnetoCorp", "00002");
    store
        .put_state(
            &tx("buy-2", 400),
            &magneto_2,
            paper("MagnetoCorp", "00002", "DigiBank", "TRADING"),
        )
        .await
        .unwrap();

    // when
    let owned = store.query().query_by_owner("DigiBank").await.unwrap();

    // then
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].key, magneto_2);
    let fields = owned[0].payload.fields().unwrap();
    assert_eq!(fields["owner"], json!("DigiBank"));
}

#[tokio::test]
async fn should_run_adhoc_rich_query() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    run_lifecycle(&store).await;

    // when
    let issued = store
        .query()
        .query_adhoc(r#"{"selector":{"currentState":"ISSUED","issuer":{"$ne":"Hedgematic"}}}"#)
        .await
        .unwrap();
    let malformed = store
        .query()
        .query_adhoc(r#"{"selector":{"owner":{"$regex":"x"}}}"#)
        .await;

    // then
    assert_eq!(issued.len(), 1);
    assert_eq!(issued[0].key.key.to_string(), "MagnetoCorp:00002");
    assert!(matches!(malformed, Err(Error::Query(_))));
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn should_report_history_and_deltas_for_one_paper() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    run_lifecycle(&store).await;
    let query = store.query();

    // when
    let versions = query.get_history(&["MagnetoCorp", "00001"]).await.unwrap();
    let deltas = query.history_deltas(&["MagnetoCorp", "00001"]).await.unwrap();
    let table = query.history_table(&["MagnetoCorp", "00001"]).await.unwrap();

    // then
    let tx_ids: Vec<&str> = versions.iter().map(|v| v.tx_id.as_str()).collect();
    assert_eq!(tx_ids, vec!["issue-1", "buy-1", "redeem-1"]);
    assert_eq!(versions[0].timestamp.timestamp_millis(), 100_250);

    let changes: Vec<(&str, &Value)> = deltas
        .iter()
        .filter(|d| d.kind == DeltaKind::Change)
        .map(|d| (d.name.as_str(), &d.value))
        .collect();
    assert_eq!(
        changes,
        vec![
            ("owner", &json!("DigiBank")),
            ("currentState", &json!("TRADING")),
            ("owner", &json!("MagnetoCorp")),
            ("currentState", &json!("REDEEMED")),
        ]
    );

    let parsed: Value = serde_json::from_str(&table).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 2);
    assert_eq!(parsed[0]["TxId"], json!("issue-1"));
    assert_eq!(parsed[0]["Timestamp"], json!("1970-01-01T00:01:40.250Z"));
    assert_eq!(parsed[1]["TxId"], json!("buy-1"));
    assert_eq!(store.open_cursors(), 0);
}

#[tokio::test]
async fn should_keep_history_after_delete() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    run_lifecycle(&store).await;
    let magneto_1 = paper_key(&store, "MagnetoCorp", "00001");

    // when
    store.delete_state(&tx("archive-1", 400), &magneto_1).await.unwrap();

    // then
    let query = store.query();
    assert!(query.get_state(&["MagnetoCorp", "00001"]).await.unwrap().is_none());
    let versions = query.get_history(&["MagnetoCorp", "00001"]).await.unwrap();
    assert_eq!(versions.len(), 3);

    let mut raw = store.get_history_for_key(&magneto_1).await.unwrap();
    let mut last = None;
    while let Some(entry) = raw.next().await.unwrap() {
        last = Some(entry);
    }
    raw.close().await.unwrap();
    let last = last.unwrap();
    assert_eq!(last.tx_id, "archive-1");
    assert!(last.is_delete);
}

#[tokio::test]
async fn should_keep_raw_values_verbatim() {
    // given
    let store = StateStore::open(&Config::default()).await.unwrap();
    let note = paper_key(&store, "MagnetoCorp", "note");
    store
        .put_state(&tx("note-1", 1), &note, Bytes::from("issued under master agreement"))
        .await
        .unwrap();

    // when
    let iter = store
        .get_state_by_partial_composite_key(store.namespace(), &["MagnetoCorp".to_string()])
        .await
        .unwrap();
    let records = drain(iter).await.unwrap();

    // then
    assert_eq!(
        records[0].payload,
        Payload::Raw("issued under master agreement".to_string())
    );
}

#[tokio::test]
async fn should_read_history_after_reopening_slatedb_store() {
    // given
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let config = Config {
        storage: local_storage_config(&temp_dir),
        ..Default::default()
    };
    let writer = StateStore::open(&config).await.expect("Failed to open store");
    run_lifecycle(&writer).await;
    writer.flush().await.expect("Failed to flush");
    writer.close().await.expect("Failed to close");

    // when
    let reader = StateStore::open(&config).await.expect("Failed to reopen store");
    let versions = reader
        .query()
        .get_history(&["MagnetoCorp", "00001"])
        .await
        .unwrap();

    // then
    let tx_ids: Vec<&str> = versions.iter().map(|v| v.tx_id.as_str()).collect();
    assert_eq!(tx_ids, vec!["issue-1", "buy-1", "redeem-1"]);

    let magneto_2 = paper_key(&reader, "MagnetoCorp", "00002");
    reader
        .put_state(
            &tx("buy-2", 400),
            &magneto_2,
            paper("MagnetoCorp", "00002", "DigiBank", "TRADING"),
        )
        .await
        .unwrap();
    let history = reader
        .query()
        .get_history(&["MagnetoCorp", "00002"])
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].tx_id, "buy-2");
}
