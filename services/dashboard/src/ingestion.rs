//! Batch ingestion of exported heart-rate records into the key-value store.
//!
//! Every record becomes exactly one put. Puts are dispatched together and the
//! batch waits for all of them; the first failure is reported afterwards and
//! nothing is rolled back.

use crate::error::{ApiError, StoreError};
use crate::key_value::{KeyValueStore, KvItem};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use tracing::{info, instrument, warn};

/// Exported heart-rate record as found in the source file.
///
/// Fields are read leniently so that one odd record only fails its own put.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HrvSourceRecord {
    #[serde(default)]
    pub metadata: RecordMetadata,
    #[serde(default)]
    pub samples: Vec<HeartRateSample>,
    pub start_time: Option<String>,
    pub beats_per_minute: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecordMetadata {
    /// Stored as found, string or number
    pub id: Option<Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartRateSample {
    pub time: Option<String>,
    pub beats_per_minute: Option<f64>,
}

/// Item written to the HRV table
#[derive(Debug, Clone, PartialEq)]
pub struct HrvSample {
    pub id: Option<Value>,
    pub time: Option<String>,
    pub beats_per_minute: Option<f64>,
}

impl From<&HrvSourceRecord> for HrvSample {
    fn from(record: &HrvSourceRecord) -> Self {
        let first = record.samples.first();

        Self {
            id: record.metadata.id.clone(),
            time: first
                .and_then(|s| s.time.clone())
                .or_else(|| record.start_time.clone()),
            beats_per_minute: first
                .and_then(|s| s.beats_per_minute)
                .or(record.beats_per_minute),
        }
    }
}

impl HrvSample {
    /// Absent fields are left out, so a missing key attribute fails the put
    pub fn into_item(self) -> KvItem {
        let mut item = KvItem::new();
        if let Some(id) = self.id {
            item.insert("id".to_string(), id);
        }
        if let Some(time) = self.time {
            item.insert("time".to_string(), Value::String(time));
        }
        if let Some(bpm) = self.beats_per_minute {
            item.insert("beatsPerMinute".to_string(), Value::from(bpm));
        }
        item
    }
}

/// Summary of a fully successful batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    pub attempted: usize,
    pub written: usize,
}

/// Read the source file into records
pub async fn load_source(path: impl AsRef<Path>) -> Result<Vec<HrvSourceRecord>, ApiError> {
    let path = path.as_ref();
    let raw = tokio::fs::read(path)
        .await
        .map_err(|e| ApiError::Source(format!("{}: {e}", path.display())))?;

    serde_json::from_slice(&raw).map_err(|e| ApiError::Source(format!("{}: {e}", path.display())))
}

/// Put one item per record, all at once.
///
/// Returns the first failure in record order once every put has settled.
#[instrument(skip(store, records), fields(records = records.len()))]
pub async fn ingest_batch(
    store: &dyn KeyValueStore,
    table: &str,
    records: &[HrvSourceRecord],
) -> Result<BatchReport, StoreError> {
    let puts = records
        .iter()
        .map(|record| store.put_item(table, HrvSample::from(record).into_item()));

    let results = join_all(puts).await;
    let attempted = results.len();
    let written = results.iter().filter(|r| r.is_ok()).count();

    metrics::counter!("dashboard.hrv.puts").increment(written as u64);

    if let Some(err) = results.into_iter().find_map(Result::err) {
        metrics::counter!("dashboard.hrv.put_failures").increment((attempted - written) as u64);
        warn!(
            attempted = attempted,
            written = written,
            "Batch ingestion finished with failures"
        );
        return Err(err);
    }

    info!(written = written, table = %table, "Batch ingestion finished");

    Ok(BatchReport { attempted, written })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryKeyValueStore;
    use serde_json::json;

    fn records(value: Value) -> Vec<HrvSourceRecord> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_sample_prefers_first_sample_time() {
        let record = &records(json!([{
            "metadata": { "id": "r1" },
            "samples": [
                { "time": "2024-01-15T10:00:00Z", "beatsPerMinute": 64 },
                { "time": "2024-01-15T10:01:00Z", "beatsPerMinute": 66 }
            ],
            "startTime": "2024-01-15T09:59:00Z"
        }]))[0];

        let sample = HrvSample::from(record);
        assert_eq!(sample.id, Some(json!("r1")));
        assert_eq!(sample.time.as_deref(), Some("2024-01-15T10:00:00Z"));
        assert_eq!(sample.beats_per_minute, Some(64.0));
    }

    #[test]
    fn test_sample_falls_back_to_start_time() {
        let record = &records(json!([{
            "metadata": { "id": "r2" },
            "startTime": "2024-01-15T09:59:00Z",
            "beatsPerMinute": 70
        }]))[0];

        let item = HrvSample::from(record).into_item();
        assert_eq!(item["id"], "r2");
        assert_eq!(item["time"], "2024-01-15T09:59:00Z");
        assert_eq!(item["beatsPerMinute"], json!(70.0));
    }

    #[test]
    fn test_item_omits_missing_time() {
        let record = &records(json!([{ "metadata": { "id": "r3" } }]))[0];
        let item = HrvSample::from(record).into_item();
        assert!(!item.contains_key("time"));
        assert!(!item.contains_key("beatsPerMinute"));
    }

    #[tokio::test]
    async fn test_ingest_batch_writes_every_record() {
        let store = MemoryKeyValueStore::new("id", Some("time"));
        let input = records(json!([
            { "metadata": { "id": "a" }, "startTime": "t1" },
            { "metadata": { "id": "b" }, "startTime": "t2" }
        ]));

        let report = ingest_batch(&store, "HRV", &input).await.unwrap();
        assert_eq!(report, BatchReport { attempted: 2, written: 2 });
        assert_eq!(store.scan("HRV").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_ingest_batch_is_not_atomic() {
        let store = MemoryKeyValueStore::new("id", Some("time"));
        store.fail_puts_for("id", "b");

        let input = records(json!([
            { "metadata": { "id": "a" }, "startTime": "t1" },
            { "metadata": { "id": "b" }, "startTime": "t2" },
            { "metadata": { "id": "c" }, "startTime": "t3" }
        ]));

        let err = ingest_batch(&store, "HRV", &input).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyValue(_)));
        assert_eq!(store.put_attempts(), 3);

        let mut ids: Vec<String> = store
            .scan("HRV")
            .await
            .unwrap()
            .iter()
            .map(|item| item["id"].as_str().unwrap().to_string())
            .collect();
        ids.sort();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[tokio::test]
    async fn test_odd_record_only_fails_its_own_put() {
        let store = MemoryKeyValueStore::new("id", Some("time"));
        let input = records(json!([
            { "metadata": { "id": 7 }, "startTime": "t1", "beatsPerMinute": 61 },
            { "startTime": "t2" },
            { "metadata": { "id": "c" } }
        ]));

        let err = ingest_batch(&store, "HRV", &input).await.unwrap_err();
        assert!(matches!(err, StoreError::KeyValue(_)));
        assert_eq!(store.put_attempts(), 3);

        let items = store.scan("HRV").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["id"], json!(7));
        assert_eq!(items[0]["beatsPerMinute"], json!(61.0));
    }

    #[tokio::test]
    async fn test_repeated_ingestion_overwrites_same_key() {
        let store = MemoryKeyValueStore::new("id", Some("time"));
        let first = records(json!([{ "metadata": { "id": "a" }, "startTime": "t1", "beatsPerMinute": 60 }]));
        let second = records(json!([{ "metadata": { "id": "a" }, "startTime": "t1", "beatsPerMinute": 80 }]));

        ingest_batch(&store, "HRV", &first).await.unwrap();
        ingest_batch(&store, "HRV", &second).await.unwrap();

        let items = store.scan("HRV").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["beatsPerMinute"], json!(80.0));
    }

    #[tokio::test]
    async fn test_load_source_reports_missing_file() {
        let err = load_source("/nonexistent/hrv.json").await.unwrap_err();
        assert!(matches!(err, ApiError::Source(_)));
    }

    #[tokio::test]
    async fn test_load_source_parses_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            file.path(),
            r#"[{"metadata":{"id":"x"},"samples":[{"time":"t","beatsPerMinute":55}]}]"#,
        )
        .unwrap();

        let loaded = load_source(file.path()).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].metadata.id, Some(json!("x")));
    }
}
