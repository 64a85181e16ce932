use crate::error::SinkError;
use crate::types::{NewContribution, ObjectType, WebhookEvent};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// Where coalesced events end up. Persistence and user resolution live behind
/// this seam; the coalescer's job stops at routing and formatting.
#[async_trait]
pub trait ContributionSink: Send + Sync {
    async fn create(&self, contribution: NewContribution) -> Result<(), SinkError>;
}

/// Production sink: POSTs contributions to the domain API.
pub struct HttpContributionSink {
    client: reqwest::Client,
    endpoint: String,
    api_token: String,
}

impl HttpContributionSink {
    pub fn new(base_url: &str, api_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: format!("{}/contributions", base_url.trim_end_matches('/')),
            api_token: api_token.into(),
        }
    }
}

#[async_trait]
impl ContributionSink for HttpContributionSink {
    async fn create(&self, contribution: NewContribution) -> Result<(), SinkError> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_token)
            .json(&contribution)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(SinkError::Rejected(response.status().as_u16()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Routed and persisted through the sink.
    Completed,
    /// Unknown object type; dropped without a sink call.
    Skipped,
}

/// Routes a coalesced event to its type-specific formatter and pushes the
/// resulting contribution through the sink.
pub struct Dispatcher {
    sink: Arc<dyn ContributionSink>,
}

impl Dispatcher {
    pub fn new(sink: Arc<dyn ContributionSink>) -> Self {
        Self { sink }
    }

    pub async fn dispatch(&self, event: &WebhookEvent) -> Result<DispatchOutcome, SinkError> {
        let Some(object_type) = ObjectType::parse(&event.object_type) else {
            warn!(
                object_type = %event.object_type,
                object_id = event.object_id,
                "unknown object type, dropping event"
            );
            return Ok(DispatchOutcome::Skipped);
        };
        self.sink.create(contribution_for(object_type, event)).await?;
        Ok(DispatchOutcome::Completed)
    }
}

fn contribution_for(object_type: ObjectType, event: &WebhookEvent) -> NewContribution {
    let (title, mut description) = match object_type {
        ObjectType::Contact => {
            let who = match (event.property("firstname"), event.property("lastname")) {
                (Some(first), Some(last)) => format!("{first} {last}"),
                (Some(first), None) => first.to_string(),
                _ => event
                    .property("email")
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("contact {}", event.object_id)),
            };
            (
                format!("Contact activity: {who}"),
                format!("HubSpot {} on {who}", event.event_type),
            )
        }
        ObjectType::Deal => {
            let name = event
                .property("dealname")
                .map(str::to_string)
                .unwrap_or_else(|| format!("deal {}", event.object_id));
            let mut detail = format!("HubSpot {} on {name}", event.event_type);
            if let Some(stage) = event.property("dealstage") {
                detail.push_str(&format!(", stage {stage}"));
            }
            if let Some(amount) = event.property("amount") {
                detail.push_str(&format!(", amount {amount}"));
            }
            (format!("Deal activity: {name}"), detail)
        }
        ObjectType::Company => {
            let name = event
                .property("name")
                .or_else(|| event.property("domain"))
                .map(str::to_string)
                .unwrap_or_else(|| format!("company {}", event.object_id));
            (
                format!("Company activity: {name}"),
                format!("HubSpot {} on {name}", event.event_type),
            )
        }
        ObjectType::Ticket => {
            let subject = event
                .property("subject")
                .map(str::to_string)
                .unwrap_or_else(|| format!("ticket {}", event.object_id));
            let mut detail = format!("HubSpot {} on ticket \"{subject}\"", event.event_type);
            if let Some(content) = event.property("content") {
                detail.push_str(&format!(": {content}"));
            }
            (format!("Ticket activity: {subject}"), detail)
        }
    };

    if let (Some(name), Some(value)) = (&event.property_name, &event.property_value) {
        description.push_str(&format!("; {name} changed to {value}"));
    }

    NewContribution {
        title,
        description,
        source: "hubspot".into(),
        source_type: object_type.as_str().into(),
        source_id: event.object_id.to_string(),
        occurred_at: event.occurred_at,
    }
}
