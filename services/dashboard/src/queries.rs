//! Typed query objects for the document store.
//!
//! Collections disagree on document identity: some hold at most one document
//! per `(user_email, collection)`, others one per `(user_email, timestamp)`.
//! Each key shape gets its own type so the filters cannot be mixed up.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use mongodb::bson::{doc, DateTime as BsonDateTime, Document};

/// `$dateToString` format used for predicted-BPM timestamps
pub const DS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S.%L%z";

/// chrono equivalent of [`DS_FORMAT`]
const DS_CHRONO_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Suffix of the collections targeted by typed memo updates
pub const TYPED_MEMO_SUFFIX: &str = "_test3";

/// One document per user in a named collection
#[derive(Debug, Clone, PartialEq)]
pub struct RecordLookup {
    pub collection: String,
    pub user_email: String,
}

impl RecordLookup {
    pub fn filter(&self) -> Document {
        doc! { "user_email": self.user_email.as_str() }
    }
}

/// Predicted-BPM series of one user in a named collection
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionQuery {
    pub collection: String,
    pub user_email: String,
}

impl PredictionQuery {
    /// Match on the user, then rewrite `ds` as a UTC ISO-8601 string with
    /// millisecond precision and an explicit offset.
    pub fn pipeline(&self) -> Vec<Document> {
        vec![
            doc! { "$match": { "user_email": self.user_email.as_str() } },
            doc! {
                "$project": {
                    "_id": 0,
                    "ds": {
                        "$dateToString": {
                            "format": DS_FORMAT,
                            "date": { "$add": ["$ds"] },
                            "timezone": "UTC",
                        }
                    },
                    "min_pred_bpm": 1,
                    "hour_pred_bpm": 1,
                }
            },
        ]
    }
}

/// Day memo identity: one document per `(user_email, timestamp)`
#[derive(Debug, Clone, PartialEq)]
pub struct DayMemoKey {
    pub user_email: String,
    pub timestamp: DateTime<Utc>,
}

impl DayMemoKey {
    /// Exact-match key used by the upsert
    pub fn filter(&self) -> Document {
        doc! {
            "user_email": self.user_email.as_str(),
            "timestamp": to_bson_datetime(&self.timestamp),
        }
    }

    /// Key plus the requirement that a memo has been written
    pub fn memo_filter(&self) -> Document {
        let mut filter = self.filter();
        filter.insert("memo", doc! { "$exists": true });
        filter
    }
}

/// Memo attached to a typed time-series document
#[derive(Debug, Clone, PartialEq)]
pub struct TypedMemoKey {
    pub data_type: String,
    pub user_email: String,
    pub timestamp: DateTime<Utc>,
}

impl TypedMemoKey {
    pub fn collection(&self) -> String {
        format!("{}{}", self.data_type, TYPED_MEMO_SUFFIX)
    }

    pub fn filter(&self) -> Document {
        doc! {
            "user_email": self.user_email.as_str(),
            "timestamp": to_bson_datetime(&self.timestamp),
        }
    }
}

/// `$set` of the memo field, shared by both memo writes
pub fn set_memo(memo: &str) -> Document {
    doc! { "$set": { "memo": memo } }
}

pub fn to_bson_datetime(timestamp: &DateTime<Utc>) -> BsonDateTime {
    BsonDateTime::from_millis(timestamp.timestamp_millis())
}

/// Format a stored date the way the aggregation pipeline does
pub fn format_ds(timestamp: &DateTime<Utc>) -> String {
    timestamp.format(DS_CHRONO_FORMAT).to_string()
}

/// Parse a timestamp parameter.
///
/// Accepts RFC 3339, a zone-less date-time (read as UTC) and a bare date
/// (UTC midnight).
pub fn parse_timestamp(input: &str) -> Option<DateTime<Utc>> {
    let input = input.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(input) {
        return Some(parsed.with_timezone(&Utc));
    }

    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }

    NaiveDate::parse_from_str(input, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
