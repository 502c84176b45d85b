mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use fishwatch::rules::testing::Fakes;
use fishwatch::rules::{
    AuditObject, InMemoryRuleStore, LookupError, LookupService, NotificationEvent, RuleCategory,
};
use fishwatch::{RawMovementFact, Severity};

use common::{config, sanity, start, start_with_lookup};

fn valid_raw(flag: &str) -> RawMovementFact {
    RawMovementFact {
        asset_guid: Some(format!("asset-{}", flag)),
        flag_state: Some(flag.to_string()),
        latitude: Some(57.7),
        longitude: Some(11.9),
        position_time: Some(Utc::now() - Duration::hours(1)),
        ..Default::default()
    }
}

fn sanity_store() -> InMemoryRuleStore {
    let store = InMemoryRuleStore::new();
    store.put_sanity_rule(sanity("Lat missing", "latitude == null"), None);
    store.put_sanity_rule(sanity("Time in future", "positionTime > now()"), None);
    store
}

#[tokio::test]
async fn null_latitude_and_future_positions_raise_alarms() {
    let config = config(true);
    let _ = fishwatch::init_tracing(config.log_level.as_deref().or(Some("debug")));
    let fakes = Fakes::new(sanity_store());
    let module = start(&fakes, &config).await;
    let mut events = module.notifier().subscribe();

    let mut no_latitude = valid_raw("SWE");
    no_latitude.latitude = None;
    let mut future = valid_raw("DNK");
    future.position_time = Some(Utc::now() + Duration::hours(2));

    let outcome = module
        .validate_raw_movements(vec![no_latitude, future, valid_raw("NOR")])
        .await;

    let facts = &outcome.report.facts;
    assert!(!facts[0].ok);
    assert_eq!(facts[0].outcomes.len(), 1);
    assert_eq!(facts[0].outcomes[0].severity, Severity::Error);
    assert_eq!(facts[0].outcomes[0].rule_id, "Lat missing");
    assert!(!facts[1].ok);
    assert!(facts[2].ok);

    let alarms = fakes.incidents.alarms();
    assert_eq!(alarms.len(), 2);
    let mut rules: Vec<&str> = alarms
        .iter()
        .map(|alarm| alarm.alarm_items[0].rule_name.as_str())
        .collect();
    rules.sort();
    assert_eq!(rules, ["Lat missing", "Time in future"]);
    assert!(alarms.iter().all(|alarm| alarm.updated_by == "UVMS"));

    let audited = fakes
        .audit
        .entries()
        .iter()
        .filter(|entry| entry.object == AuditObject::Alarm)
        .count();
    assert_eq!(audited, 2);
    assert!(matches!(
        events.recv().await,
        Ok(NotificationEvent::AlarmCreated { .. })
    ));

    module.shutdown().await;
}

#[tokio::test]
async fn empty_batch_and_empty_rule_set_do_nothing() {
    let fakes = Fakes::new(sanity_store());
    let module = start(&fakes, &config(true)).await;
    let outcome = module.validate_raw_movements(vec![]).await;
    assert!(outcome.report.facts.is_empty());
    assert!(outcome.report.firings.is_empty());
    module.shutdown().await;

    let fakes = Fakes::new(InMemoryRuleStore::new());
    let module = start(&fakes, &config(true)).await;
    assert!(module.cache().current(RuleCategory::Sanity).is_none());

    let outcome = module
        .validate_raw_movements(vec![RawMovementFact::default()])
        .await;
    assert_eq!(outcome.report.facts.len(), 1);
    assert!(outcome.report.facts[0].ok);
    assert!(outcome.report.facts[0].outcomes.is_empty());
    assert!(fakes.incidents.alarms().is_empty());
    module.shutdown().await;
}

struct FlagRegistry;

impl LookupService for FlagRegistry {
    fn is_present_in_list(&self, _list: &str, value: &str) -> Result<bool, LookupError> {
        match value {
            "???" => Err(LookupError(format!("flag {} cannot be resolved", value))),
            "XXX" => Ok(false),
            _ => Ok(true),
        }
    }
}

#[tokio::test]
async fn one_failing_fact_is_isolated_from_the_rest() {
    let store = InMemoryRuleStore::new();
    store.put_sanity_rule(
        sanity("Unknown flag", r#"!isPresentInList("FLAG_STATE", flagState)"#),
        None,
    );
    let fakes = Fakes::new(store);
    let module = start_with_lookup(&fakes, &config(true), Arc::new(FlagRegistry)).await;

    let batch = vec![
        valid_raw("SWE"),
        valid_raw("???"),
        valid_raw("XXX"),
        valid_raw("DNK"),
    ];
    let outcome = module.validate_raw_movements(batch).await;

    assert_eq!(outcome.report.facts.len(), 3);
    assert_eq!(outcome.report.exceptions.len(), 1);
    let exception = &outcome.report.exceptions[0];
    assert!(!exception.ok);
    assert_eq!(exception.outcomes[0].severity, Severity::Warning);
    assert_eq!(exception.outcomes[0].level, "L099");

    assert_eq!(outcome.report.firings.len(), 1);
    assert_eq!(fakes.incidents.alarms().len(), 1);
    assert_eq!(
        fakes.incidents.alarms()[0].vessel_guid.as_deref(),
        Some("asset-XXX")
    );
    module.shutdown().await;
}
