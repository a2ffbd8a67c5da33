use serde::Deserialize;
use tracing::{debug, info};

/// Status value that marks a completed payment
pub const PAID: &str = "PAID";

/// Payment provider callback payload. Nothing is persisted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentEvent {
    pub payment_id: Option<String>,
    pub status: Option<String>,
}

impl PaymentEvent {
    /// Parse a raw callback body. Unreadable bodies become an empty event.
    pub fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|e| {
            debug!(error = %e, "Unreadable payment callback body");
            Self::default()
        })
    }

    pub fn is_paid(&self) -> bool {
        self.status.as_deref() == Some(PAID)
    }
}

/// Log-only side effect of a callback. Returns whether the payment completed.
pub fn record_event(event: &PaymentEvent) -> bool {
    if !event.is_paid() {
        debug!(status = ?event.status, "Ignoring payment callback");
        return false;
    }

    info!(
        payment_id = event.payment_id.as_deref().unwrap_or_default(),
        "Payment completed"
    );
    metrics::counter!("dashboard.payments.paid").increment(1);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_event() {
        let event = PaymentEvent::from_body(br#"{"paymentId":"x","status":"PAID"}"#);
        assert_eq!(event.payment_id.as_deref(), Some("x"));
        assert!(record_event(&event));
    }

    #[test]
    fn test_other_statuses_are_ignored() {
        let event = PaymentEvent::from_body(br#"{"paymentId":"x","status":"CANCELLED"}"#);
        assert!(!record_event(&event));

        let lowercase = PaymentEvent::from_body(br#"{"status":"paid"}"#);
        assert!(!lowercase.is_paid());
    }

    #[test]
    fn test_malformed_bodies_become_empty_events() {
        assert!(PaymentEvent::from_body(b"{}").status.is_none());
        assert!(PaymentEvent::from_body(b"not json").status.is_none());
        assert!(PaymentEvent::from_body(b"").payment_id.is_none());
    }
}
