//! Interfaces of the services the rules module talks to, plus the
//! notification channel used for long-polling observers.

use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fishwatch_model::movement::MovementFact;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{GatewayError, StoreError};

#[async_trait]
pub trait MailGateway: Send + Sync {
    async fn send_email(&self, address: &str, subject: &str, body: &str)
        -> Result<(), GatewayError>;
}

#[async_trait]
pub trait EndpointGateway: Send + Sync {
    async fn send_to_endpoint(
        &self,
        endpoint: &str,
        report: &EndpointReport,
    ) -> Result<(), GatewayError>;
}

/// User and organisation lookups.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Current email address of a user, if one is registered.
    async fn contact_email(&self, owner: &str) -> Result<Option<String>, GatewayError>;

    async fn find_organisations(&self, name: &str) -> Result<Vec<Organisation>, GatewayError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn audit(
        &self,
        object: AuditObject,
        operation: AuditOperation,
        subject: &str,
        actor: &str,
    ) -> Result<(), StoreError>;
}

/// Code-list lookups exposed to rule expressions as `isPresentInList`.
pub trait LookupService: Send + Sync {
    fn is_present_in_list(&self, list: &str, value: &str) -> Result<bool, LookupError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupError(pub String);

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lookup failed: {}", self.0)
    }
}

impl std::error::Error for LookupError {}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Organisation {
    pub name: String,
    #[serde(default)]
    pub endpoints: Vec<Endpoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Endpoint {
    pub name: String,
    pub uri: String,
}

/// Key/value recipient of a forwarded report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecipientInfo {
    pub key: String,
    pub value: String,
}

/// Movement report forwarded to an organisation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EndpointReport {
    pub rule_name: String,
    pub endpoint: String,
    pub date: DateTime<Utc>,
    pub movement: Option<MovementFact>,
    pub recipients: Vec<RecipientInfo>,
    pub vessel_name: Option<String>,
    pub vessel_ircs: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditObject {
    Ticket,
    Alarm,
    CustomRuleAction,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditOperation {
    Create,
    SendEmail,
    SendToEndpoint,
}

/// Event published whenever a ticket or alarm is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum NotificationEvent {
    TicketCreated { guid: String },
    TicketCountChanged,
    AlarmCreated { guid: String },
    AlarmCountChanged,
}

/// Broadcast channel for notification events. Sending without subscribers
/// is not an error.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<NotificationEvent>,
}

impl Notifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NotificationEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: NotificationEvent) {
        if self.sender.send(event).is_err() {
            debug!("notification dropped, no subscribers");
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new(256)
    }
}
