use crate::config::KeyValueConfig;
use crate::error::StoreError;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::{Builder as DynamoConfigBuilder, Credentials};
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::AttributeValue;
use aws_sdk_dynamodb::Client as DynamoClient;
use aws_types::SdkConfig;
use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::future::Future;
use tracing::{debug, info, instrument};

/// One key-value item, attribute name to JSON value
pub type KvItem = Map<String, Value>;

/// Table-addressed primitives over the key-value store
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Write an item, replacing any item with the same key attributes
    async fn put_item(&self, table: &str, item: KvItem) -> Result<(), StoreError>;

    /// Read the item addressed by the given key attributes
    async fn get_item(&self, table: &str, key: KvItem) -> Result<Option<KvItem>, StoreError>;

    /// Read every item in the table
    async fn scan(&self, table: &str) -> Result<Vec<KvItem>, StoreError>;
}

/// DynamoDB-backed [`KeyValueStore`].
///
/// Credentials and region are resolved once at startup; a fresh client is
/// built from them for every operation.
pub struct DynamoStore {
    sdk_config: SdkConfig,
    endpoint_url: Option<String>,
}

impl DynamoStore {
    pub async fn new(config: &KeyValueConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()));

        // Static credentials from configuration win over the provider chain
        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            loader = loader.credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "dashboard-config",
            ));
        }

        let sdk_config = loader.load().await;

        info!(
            region = %config.region,
            table = %config.table,
            "Key-value store configured"
        );

        Self {
            sdk_config,
            endpoint_url: config.endpoint_url.clone(),
        }
    }

    fn client(&self) -> DynamoClient {
        let mut builder = DynamoConfigBuilder::from(&self.sdk_config);

        // Custom endpoint for LocalStack / DynamoDB Local
        if let Some(ref endpoint_url) = self.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        DynamoClient::from_conf(builder.build())
    }
}

#[async_trait]
impl KeyValueStore for DynamoStore {
    #[instrument(skip(self, item))]
    async fn put_item(&self, table: &str, item: KvItem) -> Result<(), StoreError> {
        self.client()
            .put_item()
            .table_name(table)
            .set_item(Some(to_attributes(&item)))
            .send()
            .await
            .map_err(|e| StoreError::KeyValue(DisplayErrorContext(&e).to_string()))?;

        Ok(())
    }

    #[instrument(skip(self, key))]
    async fn get_item(&self, table: &str, key: KvItem) -> Result<Option<KvItem>, StoreError> {
        let output = self
            .client()
            .get_item()
            .table_name(table)
            .set_key(Some(to_attributes(&key)))
            .send()
            .await
            .map_err(|e| StoreError::KeyValue(DisplayErrorContext(&e).to_string()))?;

        Ok(output.item().map(from_attributes))
    }

    #[instrument(skip(self))]
    async fn scan(&self, table: &str) -> Result<Vec<KvItem>, StoreError> {
        let client = self.client();

        let items = collect_pages(|start_key| {
            let request = client
                .scan()
                .table_name(table)
                .set_exclusive_start_key(start_key);

            async move {
                let output = request
                    .send()
                    .await
                    .map_err(|e| StoreError::KeyValue(DisplayErrorContext(&e).to_string()))?;

                Ok::<_, StoreError>(ScanPage {
                    items: output.items().to_vec(),
                    last_evaluated_key: output.last_evaluated_key().cloned(),
                })
            }
        })
        .await?;

        debug!(count = items.len(), "Scan finished");
        Ok(items)
    }
}

type AttributeMap = HashMap<String, AttributeValue>;

/// One page of a scan and the key to resume from
struct ScanPage {
    items: Vec<AttributeMap>,
    last_evaluated_key: Option<AttributeMap>,
}

/// Fetch pages until the store stops returning a resume key
async fn collect_pages<F, Fut>(mut fetch: F) -> Result<Vec<KvItem>, StoreError>
where
    F: FnMut(Option<AttributeMap>) -> Fut,
    Fut: Future<Output = Result<ScanPage, StoreError>>,
{
    let mut items = Vec::new();
    let mut start_key = None;

    loop {
        let page = fetch(start_key.take()).await?;
        items.extend(page.items.iter().map(from_attributes));

        match page.last_evaluated_key {
            Some(last) if !last.is_empty() => start_key = Some(last),
            _ => break,
        }
    }

    Ok(items)
}

/// Convert a JSON item into DynamoDB attributes
pub fn to_attributes(item: &KvItem) -> HashMap<String, AttributeValue> {
    item.iter()
        .map(|(name, value)| (name.clone(), to_attribute(value)))
        .collect()
}

fn to_attribute(value: &Value) -> AttributeValue {
    match value {
        Value::Null => AttributeValue::Null(true),
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => AttributeValue::N(n.to_string()),
        Value::String(s) => AttributeValue::S(s.clone()),
        Value::Array(values) => AttributeValue::L(values.iter().map(to_attribute).collect()),
        Value::Object(map) => AttributeValue::M(to_attributes(map)),
    }
}

/// Convert DynamoDB attributes into a JSON item
pub fn from_attributes(attributes: &HashMap<String, AttributeValue>) -> KvItem {
    attributes
        .iter()
        .map(|(name, value)| (name.clone(), from_attribute(value)))
        .collect()
}

fn from_attribute(value: &AttributeValue) -> Value {
    match value {
        AttributeValue::S(s) => Value::String(s.clone()),
        AttributeValue::N(n) => parse_number(n),
        AttributeValue::Bool(b) => Value::Bool(*b),
        AttributeValue::Null(_) => Value::Null,
        AttributeValue::L(values) => Value::Array(values.iter().map(from_attribute).collect()),
        AttributeValue::M(map) => Value::Object(from_attributes(map)),
        AttributeValue::Ss(values) => {
            Value::Array(values.iter().cloned().map(Value::String).collect())
        }
        AttributeValue::Ns(values) => Value::Array(values.iter().map(|n| parse_number(n)).collect()),
        AttributeValue::B(blob) => Value::String(encode_blob(blob)),
        AttributeValue::Bs(blobs) => {
            Value::Array(blobs.iter().map(|b| Value::String(encode_blob(b))).collect())
        }
        _ => Value::Null,
    }
}

fn parse_number(n: &str) -> Value {
    if let Ok(i) = n.parse::<i64>() {
        return Value::Number(i.into());
    }
    n.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(n.to_string()))
}

fn encode_blob(blob: &Blob) -> String {
    STANDARD.encode(blob.as_ref())
}
