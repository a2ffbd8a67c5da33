//! Health Dashboard Service
//!
//! Backend for the personal health dashboard. Serves heart-rate, activity and
//! prediction data stored per user in a document store, keeps day memos,
//! ingests exported heart-rate records into a key-value table and forwards
//! dashboard screenshots to a multimodal model for a written analysis.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!   Dashboard ──────▶│ HTTP API     │──────────────────┐
//!                    └──────────────┘                  │
//!                      │         │                     │
//!                      ▼         ▼                     ▼
//!             ┌──────────────┐ ┌──────────────┐ ┌──────────────┐
//!             │ Document     │ │ Key-Value    │ │ Image        │
//!             │ Store        │ │ Store (HRV)  │ │ Analyzer     │
//!             └──────────────┘ └──────────────┘ └──────────────┘
//!                                     ▲
//!                                     │
//!                              ┌──────────────┐
//!                              │ Batch        │
//!                              │ Ingestion    │
//!                              └──────────────┘
//! ```
//!
//! Backends are contacted lazily. A missing connection string or API key
//! surfaces as a 500 on the first request that needs it.

pub mod config;
pub mod document_store;
pub mod error;
pub mod inference;
pub mod ingestion;
pub mod key_value;
pub mod payment;
pub mod queries;
pub mod routes;

#[cfg(test)]
mod memory;

pub use config::Config;
pub use document_store::{DocumentStore, MongoDocumentStore, WriteOutcome};
pub use error::{ApiError, InferenceError, StoreError};
pub use inference::{GeminiAnalyzer, ImageAnalyzer, ImagePayload};
pub use ingestion::{ingest_batch, load_source, BatchReport, HrvSample, HrvSourceRecord};
pub use key_value::{DynamoStore, KeyValueStore, KvItem};
pub use payment::PaymentEvent;
pub use routes::{create_router, start_api_server, AppState, HrvTable};
