use std::sync::Arc;

use coldbase::store::BlobStore;
use coldbase::{Coldbase, FindOptions, MemoryStore};
use serde_json::json;

fn db() -> (Coldbase, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Coldbase::new(store.clone()), store)
}

#[tokio::test]
async fn time_travel_ignores_newer_records() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    store
        .put("c.mutation.100-one", br#"[["k",{"id":"k","v":1},100]]"#)
        .await
        .unwrap();
    store
        .put("c.mutation.300-two", br#"[["k",{"id":"k","v":2},300]]"#)
        .await
        .unwrap();

    assert_eq!(c.get_at("k", Some(200)).await.unwrap().unwrap()["v"], 1);
    assert_eq!(c.get_at("k", Some(300)).await.unwrap().unwrap()["v"], 2);
    assert_eq!(c.get_at("k", Some(50)).await.unwrap(), None);
    assert_eq!(c.get("k").await.unwrap().unwrap()["v"], 2);

    assert_eq!(c.count_at(Some(200)).await.unwrap(), 1);
    assert_eq!(c.count_at(Some(50)).await.unwrap(), 0);
}

#[tokio::test]
async fn time_travel_applies_to_snapshot_lines_too() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    // Snapshot holds a record newer than the bound; it must not win.
    store
        .put(
            "c.jsonl",
            b"[\"k\",{\"id\":\"k\",\"v\":1},100]\n[\"k\",{\"id\":\"k\",\"v\":9},900]",
        )
        .await
        .unwrap();

    assert_eq!(c.get_at("k", Some(500)).await.unwrap().unwrap()["v"], 1);
    let rows = c
        .find(FindOptions {
            at: Some(500),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["v"], 1);
}

#[tokio::test]
async fn tombstone_hides_record_at_and_after_its_timestamp() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    store
        .put("c.mutation.100-put", br#"[["k",{"id":"k","v":1},100]]"#)
        .await
        .unwrap();
    store
        .put("c.mutation.200-del", br#"[["k",null,200]]"#)
        .await
        .unwrap();

    assert_eq!(c.get("k").await.unwrap(), None);
    assert_eq!(c.get_at("k", Some(150)).await.unwrap().unwrap()["v"], 1);
}

#[tokio::test]
async fn legacy_two_element_lines_still_parse() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    store
        .put("c.jsonl", br#"["old",{"id":"old","v":1}]"#)
        .await
        .unwrap();

    let got = c.get("old").await.unwrap().unwrap();
    assert_eq!(got["v"], 1);

    // A write from this engine supersedes the ts-less record.
    c.put(json!({"id": "old", "v": 2})).await.unwrap();
    assert_eq!(c.get("old").await.unwrap().unwrap()["v"], 2);
}

#[tokio::test]
async fn malformed_snapshot_lines_are_skipped() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    store
        .put(
            "c.jsonl",
            b"[\"a\",{\"id\":\"a\"},100]\nnot json at all\n[\"b\",{\"id\":\"b\"},200]",
        )
        .await
        .unwrap();

    assert_eq!(c.count().await.unwrap(), 2);
    assert!(c.get("a").await.unwrap().is_some());
    assert!(c.get("b").await.unwrap().is_some());
}

#[tokio::test]
async fn vanished_mutation_blobs_are_skipped() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    c.put(json!({"id": "a"})).await.unwrap();
    c.put(json!({"id": "b"})).await.unwrap();

    // Open the stream (pinning the key list), then yank one blob the
    // way a concurrent compaction would.
    let mut stream = c.read(None).await.unwrap();
    let keys = store.list("c.mutation.", None).await.unwrap().keys;
    store.delete(&keys[..1]).await.unwrap();

    let mut seen = 0;
    while let Some(_rec) = stream.next().await.unwrap() {
        seen += 1;
    }
    assert_eq!(seen, 1);
}

#[tokio::test]
async fn stream_yields_snapshot_before_mutations() {
    let (db, store) = db();
    let c = db.collection("c").unwrap();

    store
        .put("c.jsonl", br#"["snap",{"id":"snap"},100]"#)
        .await
        .unwrap();
    c.put(json!({"id": "pending"})).await.unwrap();

    let mut stream = c.read(None).await.unwrap();
    let first = stream.next().await.unwrap().unwrap();
    let second = stream.next().await.unwrap().unwrap();
    assert_eq!(first.id, "snap");
    assert_eq!(second.id, "pending");
    assert!(stream.next().await.unwrap().is_none());
}

#[tokio::test]
async fn reads_merge_many_mutation_chunks() {
    let store = Arc::new(MemoryStore::new());
    let db = Coldbase::new(store.clone()).with_defaults(coldbase::CollectionOptions {
        read_chunk_size: 3,
        read_parallelism: 2,
        ..Default::default()
    });
    let c = db.collection("c").unwrap();

    for i in 0..10 {
        c.put(json!({"id": format!("id-{i}"), "n": i})).await.unwrap();
    }
    assert_eq!(c.count().await.unwrap(), 10);
    let found = c.get_many((0..10).map(|i| format!("id-{i}"))).await.unwrap();
    assert_eq!(found.len(), 10);
}
