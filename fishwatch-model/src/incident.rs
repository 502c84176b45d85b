use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::movement::RawMovementFact;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmStatus {
    Open,
    Closed,
    Pending,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketStatus {
    Open,
    Closed,
    Pending,
    PollPending,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmItem {
    pub guid: String,
    /// `"sanity rule - <name>"` for sanity firings.
    pub rule_guid: String,
    pub rule_name: String,
}

/// Alarm raised when a raw movement fails a sanity rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AlarmReport {
    pub guid: String,
    pub status: AlarmStatus,
    pub open_date: DateTime<Utc>,
    pub raw_movement: Option<RawMovementFact>,
    pub plugin_type: Option<String>,
    pub vessel_guid: Option<String>,
    pub updated_by: String,
    pub inactivate_position: bool,
    pub alarm_items: Vec<AlarmItem>,
}

impl AlarmReport {
    /// Opens an alarm for a single sanity rule firing.
    pub fn for_sanity_rule(
        rule_name: &str,
        raw_movement: Option<RawMovementFact>,
        updated_by: impl Into<String>,
    ) -> Self {
        let plugin_type = raw_movement.as_ref().and_then(|raw| raw.plugin_type.clone());
        let vessel_guid = raw_movement.as_ref().and_then(|raw| raw.asset_guid.clone());
        Self {
            guid: Uuid::new_v4().to_string(),
            status: AlarmStatus::Open,
            open_date: Utc::now(),
            raw_movement,
            plugin_type,
            vessel_guid,
            updated_by: updated_by.into(),
            inactivate_position: false,
            alarm_items: vec![AlarmItem {
                guid: Uuid::new_v4().to_string(),
                rule_guid: format!("sanity rule - {}", rule_name),
                rule_name: rule_name.to_string(),
            }],
        }
    }
}

/// Ticket raised when a movement triggers a custom rule.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub guid: String,
    pub status: TicketStatus,
    pub open_date: DateTime<Utc>,
    pub rule_name: String,
    pub rule_guid: String,
    pub movement_guid: Option<String>,
    pub vessel_guid: Option<String>,
    /// EEZ code of the triggering movement, when it lies in one.
    pub recipient: Option<String>,
    pub updated_by: String,
}
