//! Evidence Collector
//!
//! Turns raw device events into sealed evidence records. Intake is strictly
//! sequential within one collector; separate collectors run independently.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::crypto::KeyManager;
use crate::device::IoTDevice;
use crate::error::{CustodyError, Result};
use crate::protocol::{build_metadata, canonicalize, digest, RawEvent, RecordDigest};
use crate::storage::Storage;

/// Tail of this collector's chain.
#[derive(Debug, Default)]
struct ChainHead {
    last_sequence: u64,
    last_digest: Option<RecordDigest>,
}

pub struct Collector {
    collector_id: String,
    key_manager: Arc<KeyManager>,
    storage: Arc<Storage>,
    head: Mutex<ChainHead>,
}

impl Collector {
    pub fn new(
        collector_id: impl Into<String>,
        key_manager: Arc<KeyManager>,
        storage: Arc<Storage>,
    ) -> Self {
        Self {
            collector_id: collector_id.into(),
            key_manager,
            storage,
            head: Mutex::new(ChainHead::default()),
        }
    }

    pub fn collector_id(&self) -> &str {
        &self.collector_id
    }

    /// Seal and persist one event, returning its `record_id`.
    ///
    /// The chain head only advances once the record is committed, so a
    /// failed collection leaves no gap in the sequence.
    pub async fn collect(&self, event: &RawEvent) -> Result<i64> {
        let mut head = self.head.lock().await;

        let key = self.key_manager.issue_key(&self.collector_id).await?;
        let sequence_number = head.last_sequence + 1;
        let metadata = build_metadata(
            &self.collector_id,
            sequence_number as i64,
            head.last_digest.as_ref().map(|d| d.as_bytes().as_slice()),
            Utc::now(),
        )?;

        let canonical = canonicalize(event, &metadata)?;
        let record = self
            .storage
            .seal_and_store(&canonical, &metadata, &key)
            .await?;

        head.last_sequence = sequence_number;
        head.last_digest = Some(digest(&canonical));

        debug!(
            "Collector {} sealed event {} from {} as record {}",
            self.collector_id, event.event_type, event.device_id, record.record_id
        );
        Ok(record.record_id)
    }

    /// Number of records this collector has committed.
    pub async fn collected(&self) -> u64 {
        self.head.lock().await.last_sequence
    }
}

/// Drive a device fleet through several collectors at once.
///
/// Devices are dealt to collectors round-robin. Each collector runs as its
/// own task and handles its devices one after another, so ordering holds
/// within a collector while collectors proceed independently. Returns the
/// number of events collected.
pub async fn collect_fleet(
    collectors: &[Arc<Collector>],
    devices: Vec<IoTDevice>,
    events_per_device: usize,
) -> Result<usize> {
    if collectors.is_empty() {
        return Err(CustodyError::validation("no collectors to drive the fleet"));
    }

    let mut assignments: Vec<Vec<IoTDevice>> = collectors.iter().map(|_| Vec::new()).collect();
    for (i, device) in devices.into_iter().enumerate() {
        assignments[i % collectors.len()].push(device);
    }

    let mut join_set = JoinSet::new();
    for (collector, mut devices) in collectors.iter().cloned().zip(assignments) {
        join_set.spawn(async move {
            let mut collected = 0usize;
            for device in devices.iter_mut() {
                for event in device.events(events_per_device) {
                    collector.collect(&event).await?;
                    collected += 1;
                }
            }
            info!(
                "Collector {} stored {} records",
                collector.collector_id(),
                collected
            );
            Ok::<usize, CustodyError>(collected)
        });
    }

    let mut total = 0;
    while let Some(joined) = join_set.join_next().await {
        total += joined.map_err(|e| CustodyError::WorkerError(e.to_string()))??;
    }
    Ok(total)
}
