use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::fact::{FactType, Severity};
use crate::field::{Criteria, SubCriteria};

/// Visibility of a custom rule.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Availability {
    #[default]
    Private,
    Public,
    Global,
}

/// Comparison operator of a condition segment.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl ConditionOperator {
    pub fn symbol(&self) -> &'static str {
        match self {
            ConditionOperator::Eq => "==",
            ConditionOperator::Ne => "!=",
            ConditionOperator::Gt => ">",
            ConditionOperator::Ge => ">=",
            ConditionOperator::Lt => "<",
            ConditionOperator::Le => "<=",
        }
    }
}

/// Connective between a segment and the one following it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogicOperator {
    And,
    Or,
    #[default]
    None,
}

/// One comparison of a custom rule, with optional grouping markers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConditionSegment {
    /// Zero or more `(` characters opening groups before this comparison.
    #[serde(default)]
    pub start_operator: String,
    pub criteria: Criteria,
    pub sub_criteria: SubCriteria,
    pub condition: ConditionOperator,
    pub value: String,
    /// Zero or more `)` characters closing groups after this comparison.
    #[serde(default)]
    pub end_operator: String,
    #[serde(default)]
    pub logic_operator: LogicOperator,
    #[serde(default)]
    pub order: u32,
}

/// Side effect a custom rule can declare.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionKind {
    Email,
    Ticket,
    SendToEndpoint,
    ManualPoll,
    OnHold,
    Sms,
    TopBarNotification,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Email => "EMAIL",
            ActionKind::Ticket => "TICKET",
            ActionKind::SendToEndpoint => "SEND_TO_ENDPOINT",
            ActionKind::ManualPoll => "MANUAL_POLL",
            ActionKind::OnHold => "ON_HOLD",
            ActionKind::Sms => "SMS",
            ActionKind::TopBarNotification => "TOP_BAR_NOTIFICATION",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionKind {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let kind = match value.trim().to_ascii_uppercase().as_str() {
            "EMAIL" => ActionKind::Email,
            "TICKET" => ActionKind::Ticket,
            "SEND_TO_ENDPOINT" => ActionKind::SendToEndpoint,
            "MANUAL_POLL" => ActionKind::ManualPoll,
            "ON_HOLD" => ActionKind::OnHold,
            "SMS" => ActionKind::Sms,
            "TOP_BAR_NOTIFICATION" => ActionKind::TopBarNotification,
            other => return Err(ModelError::UnknownAction(other.to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RuleActionDef {
    pub action: ActionKind,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub order: u32,
}

/// Window during which a rule may fire. Open ends are unbounded.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeInterval {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl TimeInterval {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start.map_or(true, |start| start <= instant)
            && self.end.map_or(true, |end| instant <= end)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionKind {
    Ticket,
    Email,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleSubscription {
    pub owner: String,
    pub kind: SubscriptionKind,
}

/// User-authored business rule evaluated against enriched movements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RuleDefinition {
    pub guid: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub availability: Availability,
    #[serde(default)]
    pub organisation: Option<String>,
    #[serde(default = "RuleDefinition::default_active")]
    pub active: bool,
    #[serde(default)]
    pub archived: bool,
    /// Stored and round-tripped with the definition; evaluation does not
    /// read it.
    #[serde(default)]
    pub aggregate_invocations: bool,
    #[serde(default)]
    pub segments: Vec<ConditionSegment>,
    #[serde(default)]
    pub actions: Vec<RuleActionDef>,
    #[serde(default)]
    pub intervals: Vec<TimeInterval>,
    #[serde(default)]
    pub subscriptions: Vec<RuleSubscription>,
    #[serde(default)]
    pub last_triggered: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl RuleDefinition {
    pub fn default_active() -> bool {
        true
    }

    /// Active and not archived.
    pub fn is_runnable(&self) -> bool {
        self.active && !self.archived
    }

    /// Whether `instant` falls inside one of the validity intervals. A rule
    /// without intervals is always valid.
    pub fn is_active_at(&self, instant: DateTime<Utc>) -> bool {
        self.intervals.is_empty() || self.intervals.iter().any(|i| i.contains(instant))
    }

    pub fn sorted_segments(&self) -> Vec<&ConditionSegment> {
        let mut segments: Vec<&ConditionSegment> = self.segments.iter().collect();
        segments.sort_by_key(|segment| segment.order);
        segments
    }

    /// Renders the declared actions as `ACTION,VALUE;ACTION,VALUE`.
    pub fn actions_string(&self) -> String {
        let mut actions: Vec<&RuleActionDef> = self.actions.iter().collect();
        actions.sort_by_key(|action| action.order);
        actions
            .iter()
            .map(|action| {
                format!(
                    "{},{}",
                    action.action.as_str(),
                    action.value.as_deref().unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    pub fn email_subscribers(&self) -> impl Iterator<Item = &str> {
        self.subscriptions
            .iter()
            .filter(|sub| sub.kind == SubscriptionKind::Email)
            .map(|sub| sub.owner.as_str())
    }
}

/// Validation rule for one fact type, identified by its business rule id.
/// A firing attaches an outcome to the fact instead of raising an alarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BusinessRule {
    pub br_id: String,
    pub fact_type: FactType,
    pub expression: String,
    pub message: String,
    pub error_type: Severity,
    pub level: String,
    /// Property the outcome points at, e.g. `senderOrReceiver`.
    #[serde(default)]
    pub property_names: Option<String>,
    #[serde(default = "BusinessRule::default_active")]
    pub active: bool,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}

impl BusinessRule {
    pub fn default_active() -> bool {
        true
    }
}

/// Fixed validity check applied to raw movements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SanityRule {
    pub name: String,
    pub expression: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_by: Option<String>,
}
