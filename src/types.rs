use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One event from a HubSpot webhook batch. Field names follow the provider's
/// camelCase wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    pub object_id: i64,
    pub object_type: String,
    pub event_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<serde_json::Value>,
    /// Epoch milliseconds on the wire.
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub occurred_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub property_value: Option<String>,
}

impl WebhookEvent {
    /// Events sharing this key describe the same underlying object and collapse
    /// into a single dispatch per debounce window.
    pub fn coalesce_key(&self) -> String {
        format!("{}:{}", self.object_type.to_ascii_lowercase(), self.object_id)
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.as_ref()?.get(name)?.as_str()
    }
}

/// Object types the dispatch handler knows how to route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Contact,
    Deal,
    Company,
    Ticket,
}

impl ObjectType {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_lowercase().as_str() {
            "contact" => Some(Self::Contact),
            "deal" => Some(Self::Deal),
            "company" => Some(Self::Company),
            "ticket" => Some(Self::Ticket),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contact => "contact",
            Self::Deal => "deal",
            Self::Company => "company",
            Self::Ticket => "ticket",
        }
    }
}

/// Record handed to the contribution sink after a coalesced event is routed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewContribution {
    pub title: String,
    pub description: String,
    pub source: String,
    pub source_type: String,
    pub source_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A failed dispatch held for inspection or reprocessing.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub event: WebhookEvent,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(event: WebhookEvent, error: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event,
            error: error.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Point-in-time counters for operational polling.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStats {
    pub last_webhook: Option<DateTime<Utc>>,
    /// Milliseconds since the last received webhook; null until one arrives.
    pub last_webhook_age_ms: Option<i64>,
    pub queue_depth: usize,
    pub dlq_depth: usize,
    pub processed_total: u64,
    pub failed_total: u64,
}

/// Outcome of a single dead-letter reprocess pass.
#[derive(Debug, Clone, Serialize)]
pub struct ReprocessReport {
    pub attempted: usize,
    pub requeued: usize,
}
