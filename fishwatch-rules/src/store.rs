use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fishwatch_model::incident::{AlarmReport, Ticket, TicketStatus};
use fishwatch_model::rule::{BusinessRule, RuleDefinition, SanityRule};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{RuleError, StoreError};
use crate::loader::{load_rules, RuleDocument};

/// Source of rule definitions.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn list_sanity_rules(&self) -> Result<Vec<SanityRule>, StoreError>;

    /// Custom rules that are active and not archived.
    async fn list_runnable_custom_rules(&self) -> Result<Vec<RuleDefinition>, StoreError>;

    async fn update_last_triggered(&self, guid: &str, at: DateTime<Utc>) -> Result<(), StoreError>;

    async fn find_custom_rule(&self, guid: &str) -> Result<Option<RuleDefinition>, StoreError>;

    /// Active business rules of every fact type.
    async fn list_business_rules(&self) -> Result<Vec<BusinessRule>, StoreError>;
}

/// Persistence of the incidents raised by rule firings.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    async fn create_ticket(&self, ticket: Ticket) -> Result<Ticket, StoreError>;

    async fn create_alarm(&self, alarm: AlarmReport) -> Result<AlarmReport, StoreError>;

    async fn find_open_ticket_by_vessel(&self, vessel_guid: &str) -> Result<Option<Ticket>, StoreError>;
}

#[derive(Default)]
struct RuleTables {
    sanity: BTreeMap<String, SanityRule>,
    custom: BTreeMap<String, RuleDefinition>,
    business: BTreeMap<String, BusinessRule>,
}

/// In-memory rule store. Rules are kept ordered by name (sanity), guid
/// (custom) and business rule id so listings are stable.
#[derive(Default, Clone)]
pub struct InMemoryRuleStore {
    inner: Arc<RwLock<RuleTables>>,
    offline: Arc<AtomicBool>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a store from a YAML file or directory.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleError> {
        Ok(Self::from_document(load_rules(path)?))
    }

    pub fn from_document(document: RuleDocument) -> Self {
        let store = Self::new();
        for rule in document.sanity_rules {
            store.put_sanity_rule(rule, None);
        }
        for rule in document.custom_rules {
            store.put_custom_rule(rule, None);
        }
        for rule in document.business_rules {
            store.put_business_rule(rule, None);
        }
        store
    }

    /// Inserts or replaces a sanity rule. `updated` is stamped when an
    /// author is given.
    pub fn put_sanity_rule(&self, mut rule: SanityRule, updated_by: Option<String>) -> SanityRule {
        if let Some(author) = updated_by {
            rule.updated = Some(Utc::now());
            rule.updated_by = Some(author);
        }
        self.inner
            .write()
            .sanity
            .insert(rule.name.clone(), rule.clone());
        rule
    }

    /// Inserts or replaces a custom rule, generating a guid when blank.
    pub fn put_custom_rule(
        &self,
        mut rule: RuleDefinition,
        updated_by: Option<String>,
    ) -> RuleDefinition {
        if rule.guid.trim().is_empty() {
            rule.guid = Uuid::new_v4().to_string();
        }
        if let Some(author) = updated_by {
            rule.updated = Some(Utc::now());
            rule.updated_by = Some(author);
        }
        self.inner
            .write()
            .custom
            .insert(rule.guid.clone(), rule.clone());
        rule
    }

    pub fn put_business_rule(&self, mut rule: BusinessRule, updated_by: Option<String>) -> BusinessRule {
        if let Some(author) = updated_by {
            rule.updated = Some(Utc::now());
            rule.updated_by = Some(author);
        }
        self.inner
            .write()
            .business
            .insert(rule.br_id.clone(), rule.clone());
        rule
    }

    pub fn remove_sanity_rule(&self, name: &str) -> Option<SanityRule> {
        self.inner.write().sanity.remove(name)
    }

    pub fn remove_business_rule(&self, br_id: &str) -> Option<BusinessRule> {
        self.inner.write().business.remove(br_id)
    }

    /// Archives a custom rule so it is no longer listed as runnable.
    pub fn archive_custom_rule(
        &self,
        guid: &str,
        updated_by: Option<String>,
    ) -> Result<RuleDefinition, StoreError> {
        let mut inner = self.inner.write();
        let rule = inner
            .custom
            .get_mut(guid)
            .ok_or_else(|| StoreError::NotFound(guid.to_string()))?;
        if !rule.archived {
            rule.archived = true;
            rule.updated = Some(Utc::now());
            rule.updated_by = updated_by;
        }
        Ok(rule.clone())
    }

    /// Simulates an outage: every call fails with `Unavailable` while set.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("rule store offline".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_sanity_rules(&self) -> Result<Vec<SanityRule>, StoreError> {
        self.check_online()?;
        Ok(self.inner.read().sanity.values().cloned().collect())
    }

    async fn list_runnable_custom_rules(&self) -> Result<Vec<RuleDefinition>, StoreError> {
        self.check_online()?;
        Ok(self
            .inner
            .read()
            .custom
            .values()
            .filter(|rule| rule.is_runnable())
            .cloned()
            .collect())
    }

    async fn update_last_triggered(&self, guid: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.check_online()?;
        let mut inner = self.inner.write();
        let rule = inner
            .custom
            .get_mut(guid)
            .ok_or_else(|| StoreError::NotFound(guid.to_string()))?;
        rule.last_triggered = Some(at);
        Ok(())
    }

    async fn find_custom_rule(&self, guid: &str) -> Result<Option<RuleDefinition>, StoreError> {
        self.check_online()?;
        Ok(self.inner.read().custom.get(guid).cloned())
    }

    async fn list_business_rules(&self) -> Result<Vec<BusinessRule>, StoreError> {
        self.check_online()?;
        Ok(self
            .inner
            .read()
            .business
            .values()
            .filter(|rule| rule.active)
            .cloned()
            .collect())
    }
}

/// In-memory incident store keyed by guid.
#[derive(Default, Clone)]
pub struct InMemoryIncidentStore {
    tickets: Arc<RwLock<HashMap<String, Ticket>>>,
    alarms: Arc<RwLock<HashMap<String, AlarmReport>>>,
}

impl InMemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tickets(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.tickets.read().values().cloned().collect();
        tickets.sort_by(|a, b| a.open_date.cmp(&b.open_date).then(a.guid.cmp(&b.guid)));
        tickets
    }

    pub fn alarms(&self) -> Vec<AlarmReport> {
        let mut alarms: Vec<AlarmReport> = self.alarms.read().values().cloned().collect();
        alarms.sort_by(|a, b| a.open_date.cmp(&b.open_date).then(a.guid.cmp(&b.guid)));
        alarms
    }
}

#[async_trait]
impl IncidentStore for InMemoryIncidentStore {
    async fn create_ticket(&self, ticket: Ticket) -> Result<Ticket, StoreError> {
        self.tickets
            .write()
            .insert(ticket.guid.clone(), ticket.clone());
        Ok(ticket)
    }

    async fn create_alarm(&self, alarm: AlarmReport) -> Result<AlarmReport, StoreError> {
        self.alarms.write().insert(alarm.guid.clone(), alarm.clone());
        Ok(alarm)
    }

    async fn find_open_ticket_by_vessel(&self, vessel_guid: &str) -> Result<Option<Ticket>, StoreError> {
        Ok(self
            .tickets
            .read()
            .values()
            .find(|ticket| {
                ticket.status == TicketStatus::Open
                    && ticket.vessel_guid.as_deref() == Some(vessel_guid)
            })
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use fishwatch_model::fact::{FactType, Severity};
    use fishwatch_model::rule::Availability;

    use super::*;

    fn custom_rule(guid: &str) -> RuleDefinition {
        RuleDefinition {
            guid: guid.to_string(),
            name: "demo".into(),
            description: None,
            availability: Availability::Private,
            organisation: None,
            active: true,
            archived: false,
            aggregate_invocations: false,
            segments: vec![],
            actions: vec![],
            intervals: vec![],
            subscriptions: vec![],
            last_triggered: None,
            updated: None,
            updated_by: None,
        }
    }

    #[tokio::test]
    async fn archived_rules_are_not_runnable() {
        let store = InMemoryRuleStore::new();
        store.put_custom_rule(custom_rule("a"), None);
        store.put_custom_rule(custom_rule("b"), None);

        let archived = store
            .archive_custom_rule("b", Some("alice".into()))
            .expect("archive");
        assert!(archived.archived);
        assert_eq!(archived.updated_by.as_deref(), Some("alice"));

        let runnable = store.list_runnable_custom_rules().await.expect("list");
        assert_eq!(runnable.len(), 1);
        assert_eq!(runnable[0].guid, "a");
    }

    #[tokio::test]
    async fn blank_guid_is_generated_and_last_triggered_updates() {
        let store = InMemoryRuleStore::new();
        let rule = store.put_custom_rule(custom_rule(" "), Some("bob".into()));
        assert!(Uuid::parse_str(&rule.guid).is_ok());
        assert!(rule.updated.is_some());

        let at = Utc::now();
        store.update_last_triggered(&rule.guid, at).await.expect("update");
        let found = store.find_custom_rule(&rule.guid).await.expect("find");
        assert_eq!(found.and_then(|r| r.last_triggered), Some(at));

        let missing = store.update_last_triggered("nope", at).await.unwrap_err();
        assert_eq!(missing, StoreError::NotFound("nope".into()));
    }

    #[tokio::test]
    async fn inactive_business_rules_are_not_listed() {
        let store = InMemoryRuleStore::new();
        let rule = BusinessRule {
            br_id: "SALE-L00-00-0010".into(),
            fact_type: FactType::SalesPrice,
            expression: "currency == null".into(),
            message: "currency missing".into(),
            error_type: Severity::Error,
            level: "L00".into(),
            property_names: None,
            active: true,
            updated: None,
            updated_by: None,
        };
        store.put_business_rule(rule.clone(), Some("carol".into()));
        store.put_business_rule(
            BusinessRule {
                br_id: "SALE-L00-00-0020".into(),
                active: false,
                ..rule
            },
            None,
        );

        let listed = store.list_business_rules().await.expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].updated_by.as_deref(), Some("carol"));
        assert!(store.remove_business_rule("SALE-L00-00-0010").is_some());
        assert!(store.list_business_rules().await.expect("list").is_empty());
    }

    #[tokio::test]
    async fn open_tickets_are_found_by_vessel() {
        let store = InMemoryIncidentStore::new();
        let ticket = |guid: &str, vessel: &str, status| Ticket {
            guid: guid.into(),
            status,
            open_date: Utc::now(),
            rule_name: "r".into(),
            rule_guid: "g".into(),
            movement_guid: None,
            vessel_guid: Some(vessel.into()),
            recipient: None,
            updated_by: "UVMS".into(),
        };
        store.create_ticket(ticket("t-1", "v-1", TicketStatus::Closed)).await.expect("create");
        store.create_ticket(ticket("t-2", "v-2", TicketStatus::Open)).await.expect("create");

        assert!(store.find_open_ticket_by_vessel("v-1").await.expect("find").is_none());
        let open = store.find_open_ticket_by_vessel("v-2").await.expect("find");
        assert_eq!(open.map(|t| t.guid), Some("t-2".to_string()));
    }

    #[tokio::test]
    async fn offline_store_reports_unavailable() {
        let store = InMemoryRuleStore::new();
        store.set_offline(true);
        assert!(matches!(
            store.list_sanity_rules().await,
            Err(StoreError::Unavailable(_))
        ));
    }
}
