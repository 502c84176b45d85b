//! Recording fakes of the collaborator traits, for unit and integration
//! tests.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::collaborators::{
    AuditLog, AuditObject, AuditOperation, Directory, EndpointGateway, EndpointReport,
    LookupError, LookupService, MailGateway, Notifier, Organisation,
};
use crate::dispatcher::Collaborators;
use crate::error::{GatewayError, StoreError};
use crate::store::{InMemoryIncidentStore, InMemoryRuleStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentEmail {
    pub address: String,
    pub subject: String,
    pub body: String,
}

/// Mail gateway that records every message. Addresses registered with
/// [`RecordingMailGateway::failing_for`] are rejected.
#[derive(Debug, Default)]
pub struct RecordingMailGateway {
    sent: Mutex<Vec<SentEmail>>,
    failing: HashSet<String>,
}

impl RecordingMailGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sent: Mutex::default(),
            failing: addresses.into_iter().map(Into::into).collect(),
        }
    }

    pub fn sent(&self) -> Vec<SentEmail> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl MailGateway for RecordingMailGateway {
    async fn send_email(&self, address: &str, subject: &str, body: &str) -> Result<(), GatewayError> {
        if self.failing.contains(address) {
            return Err(GatewayError::Unavailable(format!("mail to {} refused", address)));
        }
        self.sent.lock().push(SentEmail {
            address: address.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        });
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingEndpointGateway {
    sent: Mutex<Vec<(String, EndpointReport)>>,
}

impl RecordingEndpointGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, EndpointReport)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl EndpointGateway for RecordingEndpointGateway {
    async fn send_to_endpoint(&self, endpoint: &str, report: &EndpointReport) -> Result<(), GatewayError> {
        self.sent.lock().push((endpoint.to_string(), report.clone()));
        Ok(())
    }
}

/// Directory backed by fixed maps.
#[derive(Debug, Default, Clone)]
pub struct StaticDirectory {
    emails: HashMap<String, String>,
    organisations: HashMap<String, Vec<Organisation>>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contact(mut self, owner: impl Into<String>, email: impl Into<String>) -> Self {
        self.emails.insert(owner.into(), email.into());
        self
    }

    pub fn with_organisation(mut self, lookup: impl Into<String>, organisation: Organisation) -> Self {
        self.organisations
            .entry(lookup.into())
            .or_default()
            .push(organisation);
        self
    }
}

#[async_trait]
impl Directory for StaticDirectory {
    async fn contact_email(&self, owner: &str) -> Result<Option<String>, GatewayError> {
        Ok(self.emails.get(owner).cloned())
    }

    async fn find_organisations(&self, name: &str) -> Result<Vec<Organisation>, GatewayError> {
        Ok(self.organisations.get(name).cloned().unwrap_or_default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    pub object: AuditObject,
    pub operation: AuditOperation,
    pub subject: String,
    pub actor: String,
}

#[derive(Debug, Default)]
pub struct RecordingAuditLog {
    entries: Mutex<Vec<AuditEntry>>,
}

impl RecordingAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<AuditEntry> {
        self.entries.lock().clone()
    }
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn audit(
        &self,
        object: AuditObject,
        operation: AuditOperation,
        subject: &str,
        actor: &str,
    ) -> Result<(), StoreError> {
        self.entries.lock().push(AuditEntry {
            object,
            operation,
            subject: subject.to_string(),
            actor: actor.to_string(),
        });
        Ok(())
    }
}

/// Code lists held in memory. Unknown lists are an error.
#[derive(Debug, Default, Clone)]
pub struct StaticLookup {
    lists: HashMap<String, HashSet<String>>,
}

impl StaticLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_list<I, S>(mut self, list: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.lists
            .insert(list.into(), values.into_iter().map(Into::into).collect());
        self
    }
}

impl LookupService for StaticLookup {
    fn is_present_in_list(&self, list: &str, value: &str) -> Result<bool, LookupError> {
        self.lists
            .get(list)
            .map(|values| values.contains(value))
            .ok_or_else(|| LookupError(format!("unknown list {}", list)))
    }
}

/// Every collaborator as a fake, kept reachable for assertions.
#[derive(Clone)]
pub struct Fakes {
    pub rules: InMemoryRuleStore,
    pub incidents: InMemoryIncidentStore,
    pub mail: Arc<RecordingMailGateway>,
    pub endpoints: Arc<RecordingEndpointGateway>,
    pub directory: Arc<StaticDirectory>,
    pub audit: Arc<RecordingAuditLog>,
    pub notifier: Notifier,
}

impl Fakes {
    pub fn new(rules: InMemoryRuleStore) -> Self {
        Self {
            rules,
            incidents: InMemoryIncidentStore::new(),
            mail: Arc::new(RecordingMailGateway::new()),
            endpoints: Arc::new(RecordingEndpointGateway::new()),
            directory: Arc::new(StaticDirectory::new()),
            audit: Arc::new(RecordingAuditLog::new()),
            notifier: Notifier::default(),
        }
    }

    pub fn with_mail(mut self, mail: RecordingMailGateway) -> Self {
        self.mail = Arc::new(mail);
        self
    }

    pub fn with_directory(mut self, directory: StaticDirectory) -> Self {
        self.directory = Arc::new(directory);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators {
            rules: Arc::new(self.rules.clone()),
            incidents: Arc::new(self.incidents.clone()),
            mail: self.mail.clone(),
            endpoints: self.endpoints.clone(),
            directory: self.directory.clone(),
            audit: self.audit.clone(),
            notifier: self.notifier.clone(),
        }
    }
}
