use crate::config::ApiConfig;
use crate::document_store::DocumentStore;
use crate::error::ApiError;
use crate::inference::{ImageAnalyzer, ImagePayload};
use crate::ingestion::{ingest_batch, load_source};
use crate::key_value::{KeyValueStore, KvItem};
use crate::payment::{record_event, PaymentEvent};
use crate::queries::{parse_timestamp, DayMemoKey, PredictionQuery, RecordLookup, TypedMemoKey};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, DefaultBodyLimit, Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub documents: Arc<dyn DocumentStore>,
    pub key_value: Arc<dyn KeyValueStore>,
    pub analyzer: Arc<dyn ImageAnalyzer>,
    pub hrv_table: HrvTable,
    pub ingestion_source: PathBuf,
}

/// Name and key schema of the HRV table
#[derive(Debug, Clone)]
pub struct HrvTable {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

/// Plain acknowledgement body
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AnalyzeImageRequest {
    pub image: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeImageResponse {
    pub analysis: String,
}

/// `collection` + `user_email` query parameters
#[derive(Debug, Deserialize)]
pub struct UserCollectionParams {
    pub collection: Option<String>,
    pub user_email: Option<String>,
}

impl UserCollectionParams {
    fn into_parts(self) -> Result<(String, String), ApiError> {
        check_required(&[
            ("collection", self.collection.as_deref()),
            ("user_email", self.user_email.as_deref()),
        ])?;
        Ok((
            self.collection.unwrap_or_default(),
            self.user_email.unwrap_or_default(),
        ))
    }
}

#[derive(Debug, Deserialize)]
pub struct DayMemoParams {
    pub user_email: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveMemoRequest {
    pub user_email: Option<String>,
    pub timestamp: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SaveTypedMemoRequest {
    pub user_email: Option<String>,
    #[serde(rename = "dataType")]
    pub data_type: Option<String>,
    pub timestamp: Option<String>,
    pub memo: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HrvItemParams {
    pub id: Option<String>,
    pub time: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IngestResponse {
    pub message: String,
    pub count: usize,
}

/// Reject the request when any parameter is absent or empty
fn check_required(params: &[(&str, Option<&str>)]) -> Result<(), ApiError> {
    let missing: Vec<&str> = params
        .iter()
        .filter(|(_, value)| value.map_or(true, str::is_empty))
        .map(|(name, _)| *name)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(ApiError::missing(&missing.join(", ")))
    }
}

fn timestamp_param(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    parse_timestamp(raw).ok_or_else(|| ApiError::Validation(format!("Invalid timestamp: {raw}")))
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        if config.cors_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<_> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/api/analyze-image", post(analyze_image))
        .route("/api/hrv", get(scan_hrv))
        .route("/api/hrv/item", get(get_hrv_item))
        .route("/api/hrv/ingest", post(ingest_hrv))
        .route("/api/data", get(get_record))
        .route("/api/predictions", get(get_predictions))
        .route("/api/memo", get(get_day_memos).post(save_day_memo))
        .route("/api/memo/typed", post(save_typed_memo))
        .route("/api/user-info", get(get_user_info))
        .route("/api/payment/webhook", post(payment_webhook))
        .layer(DefaultBodyLimit::max(config.max_body_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "dashboard-service"
    }))
}

/// Readiness check endpoint
async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    match state.documents.ping().await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "status": "ready",
                "document_store": "connected"
            })),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({
                "status": "not_ready",
                "document_store": "disconnected",
                "error": e.to_string()
            })),
        ),
    }
}

/// Analyze a dashboard screenshot
#[instrument(skip_all)]
async fn analyze_image(
    State(state): State<AppState>,
    payload: Result<Json<AnalyzeImageRequest>, JsonRejection>,
) -> Result<Json<AnalyzeImageResponse>, ApiError> {
    let Json(request) = payload?;
    check_required(&[("image", request.image.as_deref())])?;
    let image = ImagePayload::from_data_uri(request.image.as_deref().unwrap_or_default());

    let analysis = state.analyzer.analyze(&image).await?;

    Ok(Json(AnalyzeImageResponse { analysis }))
}

/// Every item of the HRV table
#[instrument(skip(state))]
async fn scan_hrv(State(state): State<AppState>) -> Result<Json<Vec<KvItem>>, ApiError> {
    let items = state.key_value.scan(&state.hrv_table.name).await?;
    Ok(Json(items))
}

/// One HRV item by key
#[instrument(skip(state))]
async fn get_hrv_item(
    State(state): State<AppState>,
    Query(params): Query<HrvItemParams>,
) -> Result<Json<KvItem>, ApiError> {
    let table = &state.hrv_table;

    let mut key = KvItem::new();
    check_required(&[("id", params.id.as_deref())])?;
    key.insert(
        table.partition_key.clone(),
        Value::String(params.id.unwrap_or_default()),
    );

    if let Some(sort_key) = &table.sort_key {
        check_required(&[("time", params.time.as_deref())])?;
        key.insert(sort_key.clone(), Value::String(params.time.unwrap_or_default()));
    }

    state
        .key_value
        .get_item(&table.name, key)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Item not found".to_string()))
}

/// Load the local export and write it to the HRV table
#[instrument(skip(state))]
async fn ingest_hrv(State(state): State<AppState>) -> Result<Json<IngestResponse>, ApiError> {
    let records = load_source(&state.ingestion_source).await?;
    let report = ingest_batch(state.key_value.as_ref(), &state.hrv_table.name, &records).await?;

    Ok(Json(IngestResponse {
        message: "HRV records ingested".to_string(),
        count: report.written,
    }))
}

/// `data` field of the user's document in a collection
#[instrument(skip(state))]
async fn get_record(
    State(state): State<AppState>,
    Query(params): Query<UserCollectionParams>,
) -> Result<Json<Value>, ApiError> {
    let (collection, user_email) = params.into_parts()?;
    let lookup = RecordLookup {
        collection,
        user_email,
    };

    let record = state
        .documents
        .find_record(&lookup)
        .await?
        .ok_or_else(|| ApiError::NotFound("Record not found".to_string()))?;

    Ok(Json(record.get("data").cloned().unwrap_or(Value::Null)))
}

/// Predicted-BPM series; empty when the user has none
#[instrument(skip(state))]
async fn get_predictions(
    State(state): State<AppState>,
    Query(params): Query<UserCollectionParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    let (collection, user_email) = params.into_parts()?;
    let query = PredictionQuery {
        collection,
        user_email,
    };

    Ok(Json(state.documents.predicted_bpm(&query).await?))
}

/// Memos written for one user and day
#[instrument(skip(state))]
async fn get_day_memos(
    State(state): State<AppState>,
    Query(params): Query<DayMemoParams>,
) -> Result<Json<Vec<Value>>, ApiError> {
    check_required(&[
        ("user_email", params.user_email.as_deref()),
        ("timestamp", params.timestamp.as_deref()),
    ])?;

    let key = DayMemoKey {
        timestamp: timestamp_param(params.timestamp.as_deref().unwrap_or_default())?,
        user_email: params.user_email.unwrap_or_default(),
    };

    Ok(Json(state.documents.day_memos(&key).await?))
}

/// Create or overwrite a day memo
#[instrument(skip_all)]
async fn save_day_memo(
    State(state): State<AppState>,
    payload: Result<Json<SaveMemoRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload?;
    check_required(&[
        ("user_email", request.user_email.as_deref()),
        ("timestamp", request.timestamp.as_deref()),
    ])?;
    let memo = request.memo.ok_or_else(|| ApiError::missing("memo"))?;

    let key = DayMemoKey {
        timestamp: timestamp_param(request.timestamp.as_deref().unwrap_or_default())?,
        user_email: request.user_email.unwrap_or_default(),
    };

    let outcome = state.documents.upsert_day_memo(&key, &memo).await?;
    info!(
        user_email = %key.user_email,
        upserted = outcome.upserted,
        "Day memo saved"
    );

    Ok(MessageResponse::new("Memo saved successfully"))
}

/// Set the memo of an existing typed document
#[instrument(skip_all)]
async fn save_typed_memo(
    State(state): State<AppState>,
    payload: Result<Json<SaveTypedMemoRequest>, JsonRejection>,
) -> Result<Json<MessageResponse>, ApiError> {
    let Json(request) = payload?;
    check_required(&[
        ("user_email", request.user_email.as_deref()),
        ("dataType", request.data_type.as_deref()),
        ("timestamp", request.timestamp.as_deref()),
    ])?;
    let memo = request.memo.ok_or_else(|| ApiError::missing("memo"))?;

    let key = TypedMemoKey {
        timestamp: timestamp_param(request.timestamp.as_deref().unwrap_or_default())?,
        data_type: request.data_type.unwrap_or_default(),
        user_email: request.user_email.unwrap_or_default(),
    };

    let outcome = state.documents.update_typed_memo(&key, &memo).await?;
    if outcome.matched == 0 {
        return Err(ApiError::NotFound("No matching document found".to_string()));
    }

    Ok(MessageResponse::new("Memo updated successfully"))
}

/// Every user document
#[instrument(skip(state))]
async fn get_user_info(State(state): State<AppState>) -> Result<Json<Vec<Value>>, ApiError> {
    Ok(Json(state.documents.all_users().await?))
}

/// Payment provider callback.
///
/// Always acknowledges, whatever the body. The signature is not verified.
#[instrument(skip_all)]
async fn payment_webhook(body: Bytes) -> Json<MessageResponse> {
    let event = PaymentEvent::from_body(&body);
    record_event(&event);

    MessageResponse::new("Webhook received")
}

/// Start the dashboard API server
pub async fn start_api_server(state: AppState, config: &ApiConfig) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting dashboard API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .await
        .context("API server error")?;

    Ok(())
}
