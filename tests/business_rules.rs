mod common;

use chrono::{Duration, Utc};
use fishwatch::rules::testing::Fakes;
use fishwatch::rules::{InMemoryRuleStore, RuleCategory, ASSET_NOT_SENDING_RULE};
use fishwatch::{
    Amount, BusinessRule, Fact, FactType, FishingActivityFact, PreviousReport, SalesPriceFact,
    Severity,
};

use common::{config, start};

fn business(br_id: &str, fact_type: FactType, expression: &str, error_type: Severity) -> BusinessRule {
    BusinessRule {
        br_id: br_id.to_string(),
        fact_type,
        expression: expression.to_string(),
        message: format!("{} failed", br_id),
        error_type,
        level: "L00".to_string(),
        property_names: None,
        active: true,
        updated: None,
        updated_by: None,
    }
}

fn sale(value: f64) -> SalesPriceFact {
    SalesPriceFact {
        charge_amounts: vec![Amount {
            value,
            currency: Some("EUR".to_string()),
        }],
    }
}

#[tokio::test]
async fn business_rules_attach_outcomes_per_fact_type() {
    let store = InMemoryRuleStore::new();
    store.put_business_rule(
        business("SALE-L00-00-0400", FactType::SalesPrice, "chargeAmount == 0", Severity::Warning),
        None,
    );
    store.put_business_rule(
        business("FA-L00-00-0010", FactType::FishingActivity, "catchWeight < 0", Severity::Error),
        None,
    );
    let mut retired = business("FA-L00-00-0020", FactType::FishingActivity, "vesselCfr == null", Severity::Error);
    retired.active = false;
    store.put_business_rule(retired, None);
    let fakes = Fakes::new(store);
    let module = start(&fakes, &config(true)).await;

    let negative_catch = FishingActivityFact {
        catch_weight: Some(-12.0),
        ..Default::default()
    };
    let outcome = module
        .validate_facts(vec![
            Fact::new(sale(0.0)),
            Fact::new(sale(120.0)),
            Fact::new(negative_catch),
        ])
        .await;

    let facts = &outcome.report.facts;
    assert_eq!(facts[0].outcomes.len(), 1);
    assert_eq!(facts[0].outcomes[0].rule_id, "SALE-L00-00-0400");
    assert_eq!(facts[0].outcomes[0].severity, Severity::Warning);
    assert!(facts[0].ok);
    assert!(facts[1].outcomes.is_empty());
    assert_eq!(facts[2].outcomes.len(), 1);
    assert_eq!(facts[2].outcomes[0].rule_id, "FA-L00-00-0010");
    assert!(!facts[2].ok);

    assert_eq!(outcome.report.firings.len(), 2);
    assert!(outcome.dispatched.tickets.is_empty());
    assert!(outcome.dispatched.alarms.is_empty());
    assert!(fakes.incidents.alarms().is_empty());
    assert_eq!(
        module.cache().current(RuleCategory::Business).map(|set| set.rules.len()),
        Some(2)
    );
    module.shutdown().await;
}

#[tokio::test]
async fn facts_sharing_a_business_key_are_reported_once() {
    let store = InMemoryRuleStore::new();
    store.put_business_rule(
        business("SALE-L00-00-0400", FactType::SalesPrice, "chargeAmount == 0", Severity::Error),
        None,
    );
    let fakes = Fakes::new(store);
    let module = start(&fakes, &config(true)).await;

    let outcome = module
        .validate_facts(vec![
            Fact::new(sale(0.0)).with_unique_id("SN-1"),
            Fact::new(sale(0.0)).with_unique_id("SN-1"),
            Fact::new(sale(0.0)).with_unique_id("SN-2"),
        ])
        .await;

    let reported: Vec<usize> = outcome
        .report
        .facts
        .iter()
        .map(|fact| fact.outcomes.len())
        .collect();
    assert_eq!(reported, [1, 0, 1]);
    assert_eq!(outcome.report.firings.len(), 2);
    module.shutdown().await;
}

#[tokio::test]
async fn silent_vessels_are_ticketed_once() {
    let fakes = Fakes::new(InMemoryRuleStore::new());
    let mut config = config(false);
    config.asset_silence_threshold = std::time::Duration::from_secs(60 * 60);
    let module = start(&fakes, &config).await;

    let reports = vec![
        PreviousReport {
            vessel_guid: "asset-silent".to_string(),
            movement_guid: Some("m-17".to_string()),
            position_time: Utc::now() - Duration::hours(2),
        },
        PreviousReport {
            vessel_guid: "asset-active".to_string(),
            movement_guid: Some("m-18".to_string()),
            position_time: Utc::now() - Duration::minutes(10),
        },
    ];

    let first = module.check_silent_vessels(&reports).await;
    assert_eq!(first.tickets.len(), 1);
    assert_eq!(first.tickets[0].vessel_guid.as_deref(), Some("asset-silent"));
    assert_eq!(first.tickets[0].rule_name, ASSET_NOT_SENDING_RULE);

    let second = module.check_silent_vessels(&reports).await;
    assert!(second.tickets.is_empty());
    assert_eq!(fakes.incidents.tickets().len(), 1);
    module.shutdown().await;
}
