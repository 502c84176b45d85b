use std::fmt::{Display, Write as _};
use std::str::FromStr;

use fishwatch_model::movement::MovementFact;
use fishwatch_model::rule::ActionKind;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// One entry of a custom rule's `ACTION,VALUE;ACTION,VALUE` list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeclaredAction {
    pub kind: ActionKind,
    /// Empty when the rule declares no value.
    pub value: String,
}

/// How tickets are raised for custom rule firings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TicketPolicy {
    /// Every firing opens a ticket and mails the rule's subscribers before
    /// the declared actions run. `TICKET` entries are then no-ops.
    #[default]
    AlwaysTicketOnFire,
    /// Only declared actions run; `TICKET` opens the ticket.
    TicketOnlyIfDeclared,
}

impl TicketPolicy {
    pub fn from_flag(always_ticket_on_fire: bool) -> Self {
        if always_ticket_on_fire {
            TicketPolicy::AlwaysTicketOnFire
        } else {
            TicketPolicy::TicketOnlyIfDeclared
        }
    }
}

/// Parses an actions string. Entries with an unknown action are logged and
/// skipped; a missing value or the literal `null` becomes empty.
pub fn parse_actions(actions: &str) -> Vec<DeclaredAction> {
    actions
        .split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let (kind, value) = match entry.split_once(',') {
                Some((kind, value)) => (kind, value.trim()),
                None => (entry, ""),
            };
            match ActionKind::from_str(kind) {
                Ok(kind) => Some(DeclaredAction {
                    kind,
                    value: if value == "null" {
                        String::new()
                    } else {
                        value.to_string()
                    },
                }),
                Err(err) => {
                    warn!(entry, error = %err, "skipping unknown rule action");
                    None
                }
            }
        })
        .collect()
}

pub fn email_subject(rule_name: &str) -> String {
    format!("Rule '{}' has been triggered.", rule_name)
}

const LINE: &str = "<br>&nbsp;&nbsp;";

/// HTML mail body describing the asset and the position that triggered
/// `rule_name`. Absent values print as `null`.
pub fn email_body(rule_name: &str, fact: &MovementFact) -> String {
    let mut body = String::from("<html>");
    body.push_str(&email_subject(rule_name));
    body.push_str("<br><br>");

    body.push_str("<b>Asset:</b>");
    line(&mut body, "Name", &fact.vessel_name);
    line(&mut body, "IRCS", &fact.vessel_ircs);
    line(&mut body, "CFR", &fact.vessel_cfr);
    body.push_str("<br>");

    body.push_str("<b>Position report:</b>");
    line(
        &mut body,
        "Report timestamp",
        &fact.position_time.map(|time| time.to_rfc3339()),
    );
    line(&mut body, "Longitude", &fact.longitude);
    line(&mut body, "Latitude", &fact.latitude);
    line(&mut body, "Status code", &fact.status_code);
    line(&mut body, "Reported speed", &fact.reported_speed);
    line(&mut body, "Reported course", &fact.reported_course);
    line(&mut body, "Calculated speed", &fact.calculated_speed);
    line(&mut body, "Calculated course", &fact.calculated_course);
    line(&mut body, "Com channel type", &fact.com_channel_type);
    line(&mut body, "Segment type", &fact.segment_type);
    line(&mut body, "Source", &fact.source);
    line(&mut body, "Movement type", &fact.movement_type);
    line(&mut body, "Activity type", &fact.activity_message_type);
    line(&mut body, "Closest port", &fact.closest_port_code);
    line(&mut body, "Closest country", &fact.closest_country_code);

    body.push_str(LINE);
    body.push_str("Areas:");
    for (code, ty) in fact.areas() {
        let _ = write!(body, "<br>&nbsp;&nbsp;&nbsp;&nbsp;{} ({})", code, ty);
    }
    body.push_str("</html>");
    body
}

fn line<T: Display>(body: &mut String, label: &str, value: &Option<T>) {
    body.push_str(LINE);
    match value {
        Some(value) => {
            let _ = write!(body, "{}: {}", label, value);
        }
        None => {
            let _ = write!(body, "{}: null", label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_values_nulls_and_unknowns() {
        let actions = parse_actions("TICKET,;EMAIL,a@b.com;MANUAL_POLL,null;BOGUS,x;on_hold");
        assert_eq!(
            actions,
            vec![
                DeclaredAction {
                    kind: ActionKind::Ticket,
                    value: String::new()
                },
                DeclaredAction {
                    kind: ActionKind::Email,
                    value: "a@b.com".into()
                },
                DeclaredAction {
                    kind: ActionKind::ManualPoll,
                    value: String::new()
                },
                DeclaredAction {
                    kind: ActionKind::OnHold,
                    value: String::new()
                },
            ]
        );
        assert!(parse_actions("").is_empty());
    }

    #[test]
    fn body_lists_asset_position_and_areas() {
        let fact = MovementFact {
            vessel_name: Some("Nordkap".into()),
            vessel_ircs: Some("SBRA".into()),
            latitude: Some(57.5),
            area_codes: vec!["DNK".into(), "SWE_PORT".into()],
            area_types: vec!["EEZ".into(), "PORT".into()],
            ..Default::default()
        };
        let body = email_body("SWE in DNK", &fact);

        assert!(body.starts_with("<html>Rule 'SWE in DNK' has been triggered.<br><br><b>Asset:</b>"));
        assert!(body.contains("Name: Nordkap<br>&nbsp;&nbsp;IRCS: SBRA<br>&nbsp;&nbsp;CFR: null<br>"));
        assert!(body.contains("Latitude: 57.5"));
        assert!(body.contains("Areas:<br>&nbsp;&nbsp;&nbsp;&nbsp;DNK (EEZ)<br>&nbsp;&nbsp;&nbsp;&nbsp;SWE_PORT (PORT)</html>"));
    }

    #[test]
    fn policy_follows_configuration_flag() {
        assert_eq!(TicketPolicy::from_flag(true), TicketPolicy::AlwaysTicketOnFire);
        assert_eq!(TicketPolicy::from_flag(false), TicketPolicy::TicketOnlyIfDeclared);
    }
}
