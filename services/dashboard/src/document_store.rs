use crate::config::DocumentStoreConfig;
use crate::error::StoreError;
use crate::queries::{
    set_memo, DayMemoKey, PredictionQuery, RecordLookup, TypedMemoKey,
};
use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::bson::{doc, Bson, Document};
use mongodb::options::{ClientOptions, UpdateOptions};
use mongodb::{Client, Collection, Database};
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument};

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a memo write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOutcome {
    /// Documents matched by the filter
    pub matched: u64,
    /// Whether a new document was inserted
    pub upserted: bool,
}

/// Read/write operations the dashboard performs against the document store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Round-trip to the server
    async fn ping(&self) -> StoreResult<()>;

    /// `findOne({user_email})` in the named collection
    async fn find_record(&self, lookup: &RecordLookup) -> StoreResult<Option<Value>>;

    /// Run the predicted-BPM aggregation. Rows are passed through as projected.
    async fn predicted_bpm(&self, query: &PredictionQuery) -> StoreResult<Vec<Value>>;

    /// Memo documents matching the exact `(user_email, timestamp)` key
    async fn day_memos(&self, key: &DayMemoKey) -> StoreResult<Vec<Value>>;

    /// Every document of the user collection
    async fn all_users(&self) -> StoreResult<Vec<Value>>;

    /// Set the memo, inserting the document when the key is new
    async fn upsert_day_memo(&self, key: &DayMemoKey, memo: &str) -> StoreResult<WriteOutcome>;

    /// Set the memo on an existing typed document. Never inserts.
    async fn update_typed_memo(&self, key: &TypedMemoKey, memo: &str) -> StoreResult<WriteOutcome>;
}

/// Lazily-established MongoDB connection, shared for the process lifetime.
///
/// The first caller builds the client; concurrent first callers wait on the
/// same initialization instead of racing.
pub struct MongoConnector {
    uri: Option<String>,
    app_name: String,
    client: OnceCell<Client>,
}

impl MongoConnector {
    pub fn new(config: &DocumentStoreConfig) -> Self {
        Self {
            uri: config.uri.clone(),
            app_name: config.app_name.clone(),
            client: OnceCell::new(),
        }
    }

    /// Get the shared client, connecting on first use
    pub async fn client(&self) -> StoreResult<&Client> {
        self.client
            .get_or_try_init(|| async {
                let uri = self
                    .uri
                    .as_deref()
                    .ok_or(StoreError::NotConfigured("document_store.uri"))?;

                let mut options = ClientOptions::parse(uri).await?;
                options.app_name = Some(self.app_name.clone());

                let client = Client::with_options(options)?;
                info!(app_name = %self.app_name, "Document store client initialized");

                Ok::<_, StoreError>(client)
            })
            .await
    }

    pub async fn database(&self, name: &str) -> StoreResult<Database> {
        Ok(self.client().await?.database(name))
    }

    pub fn is_connected(&self) -> bool {
        self.client.initialized()
    }
}

/// MongoDB-backed [`DocumentStore`]
pub struct MongoDocumentStore {
    connector: MongoConnector,
    database: String,
    user_collection: String,
    memo_collection: String,
}

impl MongoDocumentStore {
    pub fn new(config: &DocumentStoreConfig) -> Self {
        Self {
            connector: MongoConnector::new(config),
            database: config.database.clone(),
            user_collection: config.user_collection.clone(),
            memo_collection: config.memo_collection.clone(),
        }
    }

    async fn collection(&self, name: &str) -> StoreResult<Collection<Document>> {
        Ok(self.connector.database(&self.database).await?.collection(name))
    }
}

#[async_trait]
impl DocumentStore for MongoDocumentStore {
    async fn ping(&self) -> StoreResult<()> {
        self.connector
            .database(&self.database)
            .await?
            .run_command(doc! { "ping": 1 }, None)
            .await?;
        Ok(())
    }

    #[instrument(skip(self), fields(collection = %lookup.collection))]
    async fn find_record(&self, lookup: &RecordLookup) -> StoreResult<Option<Value>> {
        let record = self
            .collection(&lookup.collection)
            .await?
            .find_one(lookup.filter(), None)
            .await?;

        debug!(found = record.is_some(), "Record lookup finished");
        Ok(record.map(to_json))
    }

    #[instrument(skip(self), fields(collection = %query.collection))]
    async fn predicted_bpm(&self, query: &PredictionQuery) -> StoreResult<Vec<Value>> {
        let documents: Vec<Document> = self
            .collection(&query.collection)
            .await?
            .aggregate(query.pipeline(), None)
            .await?
            .try_collect()
            .await?;

        debug!(rows = documents.len(), "Prediction aggregation finished");
        Ok(documents.into_iter().map(to_json).collect())
    }

    #[instrument(skip(self))]
    async fn day_memos(&self, key: &DayMemoKey) -> StoreResult<Vec<Value>> {
        let documents: Vec<Document> = self
            .collection(&self.memo_collection)
            .await?
            .find(key.memo_filter(), None)
            .await?
            .try_collect()
            .await?;

        Ok(documents.into_iter().map(to_json).collect())
    }

    #[instrument(skip(self))]
    async fn all_users(&self) -> StoreResult<Vec<Value>> {
        let documents: Vec<Document> = self
            .collection(&self.user_collection)
            .await?
            .find(None, None)
            .await?
            .try_collect()
            .await?;

        Ok(documents.into_iter().map(to_json).collect())
    }

    #[instrument(skip(self, memo))]
    async fn upsert_day_memo(&self, key: &DayMemoKey, memo: &str) -> StoreResult<WriteOutcome> {
        let options = UpdateOptions::builder().upsert(true).build();
        let result = self
            .collection(&self.memo_collection)
            .await?
            .update_one(key.filter(), set_memo(memo), options)
            .await?;

        Ok(WriteOutcome {
            matched: result.matched_count,
            upserted: result.upserted_id.is_some(),
        })
    }

    #[instrument(skip(self, memo), fields(collection = %key.collection()))]
    async fn update_typed_memo(&self, key: &TypedMemoKey, memo: &str) -> StoreResult<WriteOutcome> {
        let result = self
            .collection(&key.collection())
            .await?
            .update_one(key.filter(), set_memo(memo), None)
            .await?;

        Ok(WriteOutcome {
            matched: result.matched_count,
            upserted: false,
        })
    }
}

/// Render a stored document as relaxed extended JSON
fn to_json(document: Document) -> Value {
    Bson::Document(document).into_relaxed_extjson()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unconfigured_connector_fails_on_first_use() {
        let connector = MongoConnector::new(&DocumentStoreConfig::default());
        assert!(!connector.is_connected());

        let err = connector.client().await.unwrap_err();
        assert!(matches!(err, StoreError::NotConfigured("document_store.uri")));
        assert!(!connector.is_connected());
    }

    #[tokio::test]
    async fn test_connector_initializes_once() {
        let config = DocumentStoreConfig {
            uri: Some("mongodb://localhost:27017".to_string()),
            ..Default::default()
        };
        let connector = MongoConnector::new(&config);

        // Building the client does not open a socket yet.
        let first = connector.client().await.unwrap() as *const Client;
        let second = connector.client().await.unwrap() as *const Client;
        assert_eq!(first, second);
        assert!(connector.is_connected());
    }

    #[test]
    fn test_to_json_keeps_fields() {
        let value = to_json(doc! { "user_email": "a@b.com", "data": { "steps": 1200 } });
        assert_eq!(value["user_email"], "a@b.com");
        assert_eq!(value["data"]["steps"], 1200);
    }

    #[test]
    fn test_to_json_keeps_prediction_rows_as_projected() {
        let value = to_json(doc! { "ds": Bson::Null, "min_pred_bpm": 60, "hour_pred_bpm": 62.5 });
        assert_eq!(
            value,
            serde_json::json!({ "ds": null, "min_pred_bpm": 60, "hour_pred_bpm": 62.5 })
        );
    }
}
