#![allow(dead_code)]

use std::sync::Arc;

use fishwatch::rules::testing::Fakes;
use fishwatch::rules::LookupService;
use fishwatch::{
    ActionKind, Availability, ConditionOperator, ConditionSegment, Criteria, LogicOperator,
    MovementFact, RuleActionDef, RuleDefinition, RulesConfig, RulesModule, SanityRule,
    SubCriteria,
};

pub fn sanity(name: &str, expression: &str) -> SanityRule {
    SanityRule {
        name: name.to_string(),
        expression: expression.to_string(),
        description: None,
        updated: None,
        updated_by: None,
    }
}

fn segment(
    criteria: Criteria,
    sub_criteria: SubCriteria,
    value: &str,
    logic_operator: LogicOperator,
    order: u32,
) -> ConditionSegment {
    ConditionSegment {
        start_operator: String::new(),
        criteria,
        sub_criteria,
        condition: ConditionOperator::Eq,
        value: value.to_string(),
        end_operator: String::new(),
        logic_operator,
        order,
    }
}

/// `flagState EQ <flag> AND areaCode EQ <area>` with the given actions.
pub fn flag_in_area(guid: &str, flag: &str, area: &str, actions: &[(ActionKind, &str)]) -> RuleDefinition {
    RuleDefinition {
        guid: guid.to_string(),
        name: format!("{} in {}", flag, area),
        description: None,
        availability: Availability::Private,
        organisation: None,
        active: true,
        archived: false,
        aggregate_invocations: false,
        segments: vec![
            segment(Criteria::Asset, SubCriteria::FlagState, flag, LogicOperator::And, 0),
            segment(Criteria::Area, SubCriteria::AreaCode, area, LogicOperator::None, 1),
        ],
        actions: actions
            .iter()
            .enumerate()
            .map(|(order, (action, value))| RuleActionDef {
                action: *action,
                value: if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                },
                order: order as u32,
            })
            .collect(),
        intervals: vec![],
        subscriptions: vec![],
        last_triggered: None,
        updated: None,
        updated_by: None,
    }
}

pub fn movement(guid: &str, flag: &str, eez: &str) -> MovementFact {
    MovementFact {
        movement_guid: Some(guid.to_string()),
        vessel_guid: Some(format!("asset-{}", guid)),
        vessel_name: Some("Nordkap".to_string()),
        flag_state: Some(flag.to_string()),
        area_codes: vec![eez.to_string()],
        area_types: vec!["EEZ".to_string()],
        ..Default::default()
    }
}

pub fn config(always_ticket_on_fire: bool) -> RulesConfig {
    RulesConfig {
        always_ticket_on_fire,
        ..RulesConfig::default()
    }
}

pub async fn start(fakes: &Fakes, config: &RulesConfig) -> RulesModule {
    RulesModule::start(config, fakes.collaborators(), None)
        .await
        .expect("module starts")
}

pub async fn start_with_lookup(
    fakes: &Fakes,
    config: &RulesConfig,
    lookup: Arc<dyn LookupService>,
) -> RulesModule {
    RulesModule::start(config, fakes.collaborators(), Some(lookup))
        .await
        .expect("module starts")
}
