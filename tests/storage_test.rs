//! Evidence store persistence and fault reporting.

mod common;

use std::sync::Arc;

use chrono::Utc;
use custody_chain::protocol::{EventPayload, RawEvent};
use custody_chain::storage::{NONCE_LEN, TAG_LEN};
use custody_chain::{Collector, CustodyError, KeyManager, Storage, VerificationEngine};

use common::{harness_with, setup_harness};

fn status_event(device_id: &str) -> RawEvent {
    let mut payload = EventPayload::new();
    payload.insert("status".to_string(), serde_json::json!("ok"));
    RawEvent::new(device_id, "generic", "status", payload, Utc::now())
}

#[tokio::test]
async fn test_fetch_returns_stored_fields() -> Result<(), Box<dyn std::error::Error>> {
    let harness = setup_harness(1).await;
    let collector = &harness.collectors[0];
    let record_id = collector.collect(&status_event("dev-001")).await?;

    let record = harness.storage.fetch(record_id).await?;
    assert_eq!(record.record_id, record_id);
    assert_eq!(record.collector_id, "collector-01");
    assert_eq!(record.nonce.len(), NONCE_LEN);
    assert_eq!(record.auth_tag.len(), TAG_LEN);
    assert_eq!(record.plaintext_digest.len(), 32);

    let key = harness.key_manager.lookup("collector-01").await?;
    assert_eq!(record.key_id, key.key_id());

    // Ciphertext is not the canonical plaintext.
    let text = String::from_utf8_lossy(&record.ciphertext);
    assert!(!text.contains("dev-001"));
    Ok(())
}

#[tokio::test]
async fn test_fetch_missing_record_is_not_found() {
    let harness = setup_harness(1).await;
    assert!(matches!(
        harness.storage.fetch(7).await,
        Err(CustodyError::NotFound(7))
    ));
}

#[tokio::test]
async fn test_fetch_all_is_ordered() {
    let harness = setup_harness(2).await;
    let collected = harness.collect(3, 3).await;

    let records = harness.storage.fetch_all().await.unwrap();
    assert_eq!(records.len(), collected);
    let ids: Vec<i64> = records.iter().map(|r| r.record_id).collect();
    assert_eq!(ids, (1..=collected as i64).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_colliding_record_id_is_reported() {
    let harness = setup_harness(1).await;
    let collector = &harness.collectors[0];
    collector.collect(&status_event("dev-001")).await.unwrap();

    // A row written behind the store's back takes the next id.
    sqlx::query(
        "INSERT INTO evidence_records \
         SELECT 2, collector_id, key_id, nonce, ciphertext, auth_tag, plaintext_digest, metadata_bytes, stored_at \
         FROM evidence_records WHERE record_id = 1",
    )
    .execute(harness.storage.pool())
    .await
    .unwrap();

    let err = collector
        .collect(&status_event("dev-001"))
        .await
        .unwrap_err();
    assert!(matches!(err, CustodyError::DuplicateRecordId(2)));
    assert!(!err.is_fatal());
    assert_eq!(collector.collected().await, 1);
}

#[tokio::test]
async fn test_file_store_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forensic.db");

    let key_manager = Arc::new(KeyManager::new());
    {
        let storage = Arc::new(Storage::open(&path).await.unwrap());
        let collector = Collector::new("collector-01", key_manager.clone(), storage.clone());
        for i in 0..5 {
            collector
                .collect(&status_event(&format!("dev-{:03}", i + 1)))
                .await
                .unwrap();
        }
        storage.close().await;
    }

    let storage = Arc::new(Storage::open(&path).await.unwrap());
    assert_eq!(storage.count().await.unwrap(), 5);

    let engine = VerificationEngine::new(storage.clone(), key_manager.clone());
    let results = engine.verify_all().await.unwrap();
    assert!(results.iter().all(|r| r.is_ok()));

    // New records continue after the highest stored id.
    let collector = Collector::new("collector-02", key_manager, storage.clone());
    let record_id = collector.collect(&status_event("dev-009")).await.unwrap();
    assert_eq!(record_id, 6);
}

#[tokio::test]
async fn test_records_from_a_previous_run_lack_keys() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("forensic.db");

    let first = harness_with(Storage::open(&path).await.unwrap(), 1);
    first.collect(2, 2).await;
    first.storage.close().await;

    let second = harness_with(Storage::open(&path).await.unwrap(), 1);
    let results = second.engine().verify_all().await.unwrap();
    assert_eq!(results.len(), 4);
    assert!(results.iter().all(|r| !r.is_ok()));
}
