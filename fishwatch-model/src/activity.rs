use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::{number, text, texts, time, FactPayload, FieldDef, FieldType, FieldValue};

/// Monetary amount reported on a sales note.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Amount {
    pub value: f64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Price section of a sales report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SalesPriceFact {
    #[serde(default)]
    pub charge_amounts: Vec<Amount>,
}

static SALES_PRICE_FIELDS: &[FieldDef<SalesPriceFact>] = &[
    FieldDef {
        name: "chargeAmount",
        sub_criteria: None,
        ty: FieldType::NumberList,
        get: |f| {
            FieldValue::List(
                f.charge_amounts
                    .iter()
                    .map(|amount| FieldValue::Number(amount.value))
                    .collect(),
            )
        },
    },
    FieldDef {
        name: "currency",
        sub_criteria: None,
        ty: FieldType::TextList,
        get: |f| {
            FieldValue::List(
                f.charge_amounts
                    .iter()
                    .map(|amount| text(&amount.currency))
                    .collect(),
            )
        },
    },
];

impl FactPayload for SalesPriceFact {
    fn fields() -> &'static [FieldDef<Self>] {
        SALES_PRICE_FIELDS
    }
}

/// Fishing activity declared in a logbook report.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FishingActivityFact {
    #[serde(default)]
    pub activity_type: Option<String>,
    #[serde(default)]
    pub occurrence: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vessel_cfr: Option<String>,
    #[serde(default)]
    pub flag_state: Option<String>,
    #[serde(default)]
    pub fao_area: Option<String>,
    #[serde(default)]
    pub species: Vec<String>,
    /// Total live weight of the declared catch, in kilograms.
    #[serde(default)]
    pub catch_weight: Option<f64>,
    #[serde(default)]
    pub operation_count: Option<f64>,
}

static FISHING_ACTIVITY_FIELDS: &[FieldDef<FishingActivityFact>] = &[
    FieldDef { name: "activityType", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.activity_type) },
    FieldDef { name: "occurrence", sub_criteria: None, ty: FieldType::Time, get: |f| time(f.occurrence) },
    FieldDef { name: "vesselCfr", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.vessel_cfr) },
    FieldDef { name: "flagState", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.flag_state) },
    FieldDef { name: "faoArea", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.fao_area) },
    FieldDef { name: "species", sub_criteria: None, ty: FieldType::TextList, get: |f| texts(&f.species) },
    FieldDef { name: "catchWeight", sub_criteria: None, ty: FieldType::Number, get: |f| number(f.catch_weight) },
    FieldDef { name: "operationCount", sub_criteria: None, ty: FieldType::Number, get: |f| number(f.operation_count) },
];

impl FactPayload for FishingActivityFact {
    fn fields() -> &'static [FieldDef<Self>] {
        FISHING_ACTIVITY_FIELDS
    }
}
