use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use fishwatch_core::config::RulesConfig;
use fishwatch_model::fact::FactKind;
use fishwatch_model::incident::{AlarmReport, Ticket, TicketStatus};
use fishwatch_model::movement::{MovementFact, PreviousReport};
use fishwatch_model::rule::ActionKind;
use tracing::{debug, error, info, warn};
use url::Url;
use uuid::Uuid;

use crate::action::{email_body, email_subject, parse_actions, DeclaredAction, TicketPolicy};
use crate::collaborators::{
    AuditLog, AuditObject, AuditOperation, Directory, EndpointGateway, EndpointReport,
    MailGateway, NotificationEvent, Notifier, RecipientInfo,
};
use crate::compiler::RuleEffect;
use crate::error::DispatchError;
use crate::session::Firing;
use crate::store::{IncidentStore, RuleStore};

/// Rule name and guid of the tickets opened for vessels that stopped
/// reporting.
pub const ASSET_NOT_SENDING_RULE: &str = "Asset not sending";

/// External services the dispatcher calls.
#[derive(Clone)]
pub struct Collaborators {
    pub rules: Arc<dyn RuleStore>,
    pub incidents: Arc<dyn IncidentStore>,
    pub mail: Arc<dyn MailGateway>,
    pub endpoints: Arc<dyn EndpointGateway>,
    pub directory: Arc<dyn Directory>,
    pub audit: Arc<dyn AuditLog>,
    pub notifier: Notifier,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatcherConfig {
    pub policy: TicketPolicy,
    /// Recorded as `updated_by` on incidents and as the audit actor.
    pub system_user: String,
    pub asset_silence_threshold: Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            policy: TicketPolicy::default(),
            system_user: "UVMS".to_string(),
            asset_silence_threshold: Duration::from_secs(2 * 60 * 60),
        }
    }
}

impl From<&RulesConfig> for DispatcherConfig {
    fn from(config: &RulesConfig) -> Self {
        Self {
            policy: TicketPolicy::from_flag(config.always_ticket_on_fire),
            system_user: config.system_user.clone(),
            asset_silence_threshold: config.asset_silence_threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAction {
    pub action: String,
    pub error: String,
}

/// What dispatching one or more firings produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchSummary {
    pub tickets: Vec<Ticket>,
    pub alarms: Vec<AlarmReport>,
    pub executed: Vec<ActionKind>,
    pub failed: Vec<FailedAction>,
}

impl DispatchSummary {
    pub fn merge(&mut self, other: DispatchSummary) {
        self.tickets.extend(other.tickets);
        self.alarms.extend(other.alarms);
        self.executed.extend(other.executed);
        self.failed.extend(other.failed);
    }

    fn record(&mut self, action: impl Into<String>, err: DispatchError) {
        let action = action.into();
        error!(action = %action, error = %err, "rule action failed");
        self.failed.push(FailedAction {
            action,
            error: err.to_string(),
        });
    }
}

/// Turns rule firings into side effects. Every action is isolated: a
/// failure is logged and recorded, and the remaining actions still run.
pub struct ActionDispatcher {
    collaborators: Collaborators,
    config: DispatcherConfig,
}

impl ActionDispatcher {
    pub fn new(collaborators: Collaborators, config: DispatcherConfig) -> Self {
        Self {
            collaborators,
            config,
        }
    }

    pub fn notifier(&self) -> &Notifier {
        &self.collaborators.notifier
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub async fn dispatch_all(&self, firings: &[Firing]) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for firing in firings {
            summary.merge(self.dispatch(firing).await);
        }
        summary
    }

    pub async fn dispatch(&self, firing: &Firing) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        match &firing.effect {
            RuleEffect::Alarm => self.raise_alarm(firing, &mut summary).await,
            RuleEffect::Custom { guid, actions } => match &firing.fact {
                FactKind::Movement(movement) => {
                    self.custom_rule_triggered(firing, guid, actions, movement, &mut summary)
                        .await
                }
                _ => summary.record("RULE", DispatchError::NotAMovement(firing.fact_id)),
            },
            RuleEffect::Outcome { level, .. } => {
                debug!(rule = %firing.rule_id, fact = %firing.fact_id, outcome_level = %level, "outcome recorded on fact")
            }
        }
        summary
    }

    /// Opens an asset-not-sending ticket for every vessel whose last report
    /// is older than the configured threshold.
    pub async fn check_previous_reports(
        &self,
        reports: &[PreviousReport],
        now: DateTime<Utc>,
    ) -> DispatchSummary {
        let mut summary = DispatchSummary::default();
        for report in reports {
            if !report.is_silent(now, self.config.asset_silence_threshold) {
                continue;
            }
            match self.timer_rule_triggered(ASSET_NOT_SENDING_RULE, report).await {
                Ok(ticket) => summary.tickets.extend(ticket),
                Err(err) => summary.record(ActionKind::Ticket.as_str(), err),
            }
        }
        summary
    }

    /// Opens a ticket for a silent vessel unless one is already open for it.
    pub async fn timer_rule_triggered(
        &self,
        rule_guid: &str,
        report: &PreviousReport,
    ) -> Result<Option<Ticket>, DispatchError> {
        info!(rule_guid, vessel = %report.vessel_guid, "timer rule triggered");
        let incidents = &self.collaborators.incidents;
        if let Some(open) = incidents.find_open_ticket_by_vessel(&report.vessel_guid).await? {
            debug!(vessel = %report.vessel_guid, ticket = %open.guid, "ticket already open for vessel");
            return Ok(None);
        }

        let ticket = Ticket {
            guid: Uuid::new_v4().to_string(),
            status: TicketStatus::Open,
            open_date: Utc::now(),
            rule_name: ASSET_NOT_SENDING_RULE.to_string(),
            rule_guid: rule_guid.to_string(),
            movement_guid: report.movement_guid.clone(),
            vessel_guid: Some(report.vessel_guid.clone()),
            recipient: None,
            updated_by: self.config.system_user.clone(),
        };
        self.open_ticket(ticket).await.map(Some)
    }

    async fn raise_alarm(&self, firing: &Firing, summary: &mut DispatchSummary) {
        let raw = match &firing.fact {
            FactKind::RawMovement(raw) => Some(raw.clone()),
            _ => None,
        };
        let alarm = AlarmReport::for_sanity_rule(&firing.rule_name, raw, &self.config.system_user);

        match self.collaborators.incidents.create_alarm(alarm).await {
            Ok(alarm) => {
                info!(rule = %firing.rule_name, alarm = %alarm.guid, "alarm created");
                self.audit(AuditObject::Alarm, AuditOperation::Create, &alarm.guid)
                    .await;
                let notifier = &self.collaborators.notifier;
                notifier.publish(NotificationEvent::AlarmCreated {
                    guid: alarm.guid.clone(),
                });
                notifier.publish(NotificationEvent::AlarmCountChanged);
                summary.alarms.push(alarm);
            }
            Err(err) => summary.record("ALARM", err.into()),
        }
    }

    async fn custom_rule_triggered(
        &self,
        firing: &Firing,
        guid: &str,
        actions: &str,
        movement: &MovementFact,
        summary: &mut DispatchSummary,
    ) {
        info!(rule = %firing.rule_name, guid, actions, "custom rule triggered");

        if let Err(err) = self
            .collaborators
            .rules
            .update_last_triggered(guid, firing.fired_at)
            .await
        {
            warn!(guid, error = %err, "failed to update last triggered");
        }

        if self.config.policy == TicketPolicy::AlwaysTicketOnFire {
            match self.create_ticket(&firing.rule_name, guid, movement).await {
                Ok(ticket) => summary.tickets.push(ticket),
                Err(err) => summary.record(ActionKind::Ticket.as_str(), err),
            }
            self.mail_subscribers(&firing.rule_name, guid, movement, summary)
                .await;
        }

        for action in parse_actions(actions) {
            match self.run_action(&action, firing, guid, movement).await {
                Ok(ticket) => {
                    summary.tickets.extend(ticket);
                    summary.executed.push(action.kind);
                }
                Err(err) => summary.record(action.kind.as_str(), err),
            }
        }
    }

    async fn run_action(
        &self,
        action: &DeclaredAction,
        firing: &Firing,
        guid: &str,
        movement: &MovementFact,
    ) -> Result<Option<Ticket>, DispatchError> {
        let rule_name = &firing.rule_name;
        match action.kind {
            ActionKind::Email => {
                let address = required(action)?;
                self.send_email(address, rule_name, movement).await?;
            }
            ActionKind::Ticket => {
                if self.config.policy == TicketPolicy::TicketOnlyIfDeclared {
                    return self.create_ticket(rule_name, guid, movement).await.map(Some);
                }
                debug!(rule = %rule_name, "ticket already created for firing");
            }
            ActionKind::SendToEndpoint => {
                let endpoint = required(action)?;
                self.send_to_endpoint(endpoint, rule_name, movement).await?;
            }
            ActionKind::ManualPoll => {
                info!(rule = %rule_name, vessel = ?movement.vessel_guid, "manual poll requested");
            }
            ActionKind::OnHold => {
                info!(rule = %rule_name, vessel = ?movement.vessel_guid, "asset put on hold");
            }
            ActionKind::Sms => {
                info!(rule = %rule_name, recipient = %action.value, "sms requested");
            }
            ActionKind::TopBarNotification => {
                info!(rule = %rule_name, "top bar notification requested");
            }
        }
        Ok(None)
    }

    async fn create_ticket(
        &self,
        rule_name: &str,
        rule_guid: &str,
        movement: &MovementFact,
    ) -> Result<Ticket, DispatchError> {
        let ticket = Ticket {
            guid: Uuid::new_v4().to_string(),
            status: TicketStatus::Open,
            open_date: Utc::now(),
            rule_name: rule_name.to_string(),
            rule_guid: rule_guid.to_string(),
            movement_guid: movement.movement_guid.clone(),
            vessel_guid: movement.vessel_guid.clone(),
            recipient: movement.eez_code().map(str::to_string),
            updated_by: self.config.system_user.clone(),
        };
        self.open_ticket(ticket).await
    }

    async fn open_ticket(&self, ticket: Ticket) -> Result<Ticket, DispatchError> {
        let ticket = self.collaborators.incidents.create_ticket(ticket).await?;
        info!(rule = %ticket.rule_name, ticket = %ticket.guid, "ticket created");
        self.audit(AuditObject::Ticket, AuditOperation::Create, &ticket.guid)
            .await;
        let notifier = &self.collaborators.notifier;
        notifier.publish(NotificationEvent::TicketCreated {
            guid: ticket.guid.clone(),
        });
        notifier.publish(NotificationEvent::TicketCountChanged);
        Ok(ticket)
    }

    async fn mail_subscribers(
        &self,
        rule_name: &str,
        guid: &str,
        movement: &MovementFact,
        summary: &mut DispatchSummary,
    ) {
        let rule = match self.collaborators.rules.find_custom_rule(guid).await {
            Ok(Some(rule)) => rule,
            Ok(None) => {
                debug!(guid, "rule not found, no subscribers to mail");
                return;
            }
            Err(err) => {
                summary.record(ActionKind::Email.as_str(), err.into());
                return;
            }
        };

        for owner in rule.email_subscribers() {
            let address = match self.collaborators.directory.contact_email(owner).await {
                Ok(Some(address)) => address,
                Ok(None) => {
                    warn!(owner, "subscriber has no email address");
                    continue;
                }
                Err(err) => {
                    summary.record(ActionKind::Email.as_str(), err.into());
                    continue;
                }
            };
            if let Err(err) = self.send_email(&address, rule_name, movement).await {
                summary.record(ActionKind::Email.as_str(), err);
            }
        }
    }

    async fn send_email(
        &self,
        address: &str,
        rule_name: &str,
        movement: &MovementFact,
    ) -> Result<(), DispatchError> {
        info!(address, "sending email");
        self.collaborators
            .mail
            .send_email(address, &email_subject(rule_name), &email_body(rule_name, movement))
            .await?;
        self.audit(AuditObject::CustomRuleAction, AuditOperation::SendEmail, address)
            .await;
        Ok(())
    }

    async fn send_to_endpoint(
        &self,
        endpoint: &str,
        rule_name: &str,
        movement: &MovementFact,
    ) -> Result<(), DispatchError> {
        info!(endpoint, "sending to endpoint");
        let organisations = self
            .collaborators
            .directory
            .find_organisations(endpoint)
            .await?;

        let mut recipients = Vec::new();
        for organisation in &organisations {
            for target in &organisation.endpoints {
                if let Err(err) = Url::parse(&target.uri) {
                    warn!(organisation = %organisation.name, uri = %target.uri, error = %err, "skipping endpoint with invalid uri");
                    continue;
                }
                recipients.push(RecipientInfo {
                    key: target.name.clone(),
                    value: target.uri.clone(),
                });
            }
        }

        let report = EndpointReport {
            rule_name: rule_name.to_string(),
            endpoint: endpoint.to_string(),
            date: Utc::now(),
            movement: Some(movement.clone()),
            recipients,
            vessel_name: movement.vessel_name.clone(),
            vessel_ircs: movement.vessel_ircs.clone(),
        };
        self.collaborators
            .endpoints
            .send_to_endpoint(endpoint, &report)
            .await?;
        self.audit(
            AuditObject::CustomRuleAction,
            AuditOperation::SendToEndpoint,
            endpoint,
        )
        .await;
        Ok(())
    }

    async fn audit(&self, object: AuditObject, operation: AuditOperation, subject: &str) {
        if let Err(err) = self
            .collaborators
            .audit
            .audit(object, operation, subject, &self.config.system_user)
            .await
        {
            warn!(?object, ?operation, subject, error = %err, "audit entry not recorded");
        }
    }
}

fn required(action: &DeclaredAction) -> Result<&str, DispatchError> {
    if action.value.is_empty() {
        Err(DispatchError::MissingValue {
            action: action.kind.to_string(),
        })
    } else {
        Ok(&action.value)
    }
}
