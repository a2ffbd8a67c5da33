//! In-memory stores for tests.

use crate::document_store::{DocumentStore, StoreResult, WriteOutcome};
use crate::error::StoreError;
use crate::key_value::{KeyValueStore, KvItem};
use crate::queries::{
    format_ds, parse_timestamp, DayMemoKey, PredictionQuery, RecordLookup, TypedMemoKey,
};
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Document store holding JSON documents per collection.
///
/// Dates are kept as RFC 3339 strings under `timestamp` and `ds`.
pub struct MemoryDocumentStore {
    user_collection: String,
    memo_collection: String,
    collections: Mutex<HashMap<String, Vec<Value>>>,
}

impl MemoryDocumentStore {
    pub fn new(user_collection: &str, memo_collection: &str) -> Self {
        Self {
            user_collection: user_collection.to_string(),
            memo_collection: memo_collection.to_string(),
            collections: Mutex::new(HashMap::new()),
        }
    }

    pub fn insert(&self, collection: &str, document: Value) {
        self.collections
            .lock()
            .unwrap()
            .entry(collection.to_string())
            .or_default()
            .push(document);
    }

    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .map_or(0, Vec::len)
    }

    pub fn documents(&self, collection: &str) -> Vec<Value> {
        self.collections
            .lock()
            .unwrap()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    fn matching(&self, collection: &str, predicate: impl Fn(&Value) -> bool) -> Vec<Value> {
        self.documents(collection)
            .into_iter()
            .filter(|d| predicate(d))
            .collect()
    }

    fn set_memo_where(
        &self,
        collection: &str,
        user_email: &str,
        timestamp: &DateTime<Utc>,
        memo: &str,
    ) -> u64 {
        let mut collections = self.collections.lock().unwrap();
        let mut matched = 0;

        if let Some(documents) = collections.get_mut(collection) {
            if let Some(document) = documents
                .iter_mut()
                .find(|d| same_key(d, user_email, timestamp))
            {
                document["memo"] = Value::String(memo.to_string());
                matched = 1;
            }
        }

        matched
    }
}

fn same_key(document: &Value, user_email: &str, timestamp: &DateTime<Utc>) -> bool {
    document["user_email"] == user_email
        && document["timestamp"]
            .as_str()
            .and_then(parse_timestamp)
            .map_or(false, |t| t == *timestamp)
}

fn rfc3339(timestamp: &DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }

    async fn find_record(&self, lookup: &RecordLookup) -> StoreResult<Option<Value>> {
        Ok(self
            .matching(&lookup.collection, |d| d["user_email"] == lookup.user_email.as_str())
            .into_iter()
            .next())
    }

    async fn predicted_bpm(&self, query: &PredictionQuery) -> StoreResult<Vec<Value>> {
        let rows = self
            .matching(&query.collection, |d| d["user_email"] == query.user_email.as_str())
            .into_iter()
            .map(|d| {
                let ds = d["ds"]
                    .as_str()
                    .and_then(parse_timestamp)
                    .map_or(Value::Null, |ds| Value::String(format_ds(&ds)));

                let mut row = serde_json::Map::new();
                row.insert("ds".to_string(), ds);
                for field in ["min_pred_bpm", "hour_pred_bpm"] {
                    if let Some(value) = d.get(field) {
                        row.insert(field.to_string(), value.clone());
                    }
                }
                Value::Object(row)
            })
            .collect();

        Ok(rows)
    }

    async fn day_memos(&self, key: &DayMemoKey) -> StoreResult<Vec<Value>> {
        Ok(self.matching(&self.memo_collection, |d| {
            same_key(d, &key.user_email, &key.timestamp) && d.get("memo").is_some()
        }))
    }

    async fn all_users(&self) -> StoreResult<Vec<Value>> {
        Ok(self.documents(&self.user_collection))
    }

    async fn upsert_day_memo(&self, key: &DayMemoKey, memo: &str) -> StoreResult<WriteOutcome> {
        let matched =
            self.set_memo_where(&self.memo_collection, &key.user_email, &key.timestamp, memo);

        if matched == 0 {
            self.insert(
                &self.memo_collection,
                json!({
                    "user_email": key.user_email,
                    "timestamp": rfc3339(&key.timestamp),
                    "memo": memo,
                }),
            );
        }

        Ok(WriteOutcome {
            matched,
            upserted: matched == 0,
        })
    }

    async fn update_typed_memo(&self, key: &TypedMemoKey, memo: &str) -> StoreResult<WriteOutcome> {
        let matched =
            self.set_memo_where(&key.collection(), &key.user_email, &key.timestamp, memo);

        Ok(WriteOutcome {
            matched,
            upserted: false,
        })
    }
}

/// Key-value store with a fixed key schema and optional put failures
pub struct MemoryKeyValueStore {
    partition_key: String,
    sort_key: Option<String>,
    tables: Mutex<HashMap<String, Vec<KvItem>>>,
    failing: Mutex<Option<(String, Value)>>,
    put_attempts: AtomicUsize,
}

impl MemoryKeyValueStore {
    pub fn new(partition_key: &str, sort_key: Option<&str>) -> Self {
        Self {
            partition_key: partition_key.to_string(),
            sort_key: sort_key.map(str::to_string),
            tables: Mutex::new(HashMap::new()),
            failing: Mutex::new(None),
            put_attempts: AtomicUsize::new(0),
        }
    }

    /// Reject every put whose `attribute` equals `value`
    pub fn fail_puts_for(&self, attribute: &str, value: &str) {
        *self.failing.lock().unwrap() =
            Some((attribute.to_string(), Value::String(value.to_string())));
    }

    pub fn put_attempts(&self) -> usize {
        self.put_attempts.load(Ordering::SeqCst)
    }

    fn key_attributes(&self) -> Vec<&str> {
        std::iter::once(self.partition_key.as_str())
            .chain(self.sort_key.as_deref())
            .collect()
    }

    fn same_key(&self, a: &KvItem, b: &KvItem) -> bool {
        self.key_attributes().iter().all(|k| a.get(*k) == b.get(*k))
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn put_item(&self, table: &str, item: KvItem) -> Result<(), StoreError> {
        self.put_attempts.fetch_add(1, Ordering::SeqCst);

        if let Some((attribute, value)) = self.failing.lock().unwrap().as_ref() {
            if item.get(attribute) == Some(value) {
                return Err(StoreError::KeyValue("injected put failure".to_string()));
            }
        }

        if let Some(missing) = self.key_attributes().into_iter().find(|k| !item.contains_key(*k)) {
            return Err(StoreError::KeyValue(format!(
                "missing key attribute: {missing}"
            )));
        }

        let mut tables = self.tables.lock().unwrap();
        let items = tables.entry(table.to_string()).or_default();
        match items.iter_mut().find(|existing| self.same_key(existing, &item)) {
            Some(existing) => *existing = item,
            None => items.push(item),
        }

        Ok(())
    }

    async fn get_item(&self, table: &str, key: KvItem) -> Result<Option<KvItem>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .and_then(|items| items.iter().find(|i| self.same_key(i, &key)).cloned()))
    }

    async fn scan(&self, table: &str) -> Result<Vec<KvItem>, StoreError> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default())
    }
}
