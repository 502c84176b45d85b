use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::activity::{FishingActivityFact, SalesPriceFact};
use crate::error::ModelError;
use crate::field::{describe, describe_sub_criteria, FactPayload, FieldInfo, FieldValue, SubCriteria};
use crate::movement::{MovementFact, RawMovementFact};

/// Discriminant of the fact kinds known to the rule interpreter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactType {
    RawMovement,
    Movement,
    SalesPrice,
    FishingActivity,
}

impl FactType {
    pub const ALL: [FactType; 4] = [
        FactType::RawMovement,
        FactType::Movement,
        FactType::SalesPrice,
        FactType::FishingActivity,
    ];

    /// Name used for the fact type in rendered rule sources.
    pub fn as_str(&self) -> &'static str {
        match self {
            FactType::RawMovement => "RawMovement",
            FactType::Movement => "Movement",
            FactType::SalesPrice => "SalesPrice",
            FactType::FishingActivity => "FishingActivity",
        }
    }

    pub fn parse(value: &str) -> Option<FactType> {
        FactType::ALL
            .into_iter()
            .find(|ty| ty.as_str().eq_ignore_ascii_case(value.trim()))
    }

    /// Resolves a property by name in the static field table of this type.
    pub fn field(&self, name: &str) -> Option<FieldInfo> {
        match self {
            FactType::RawMovement => describe(RawMovementFact::fields(), name),
            FactType::Movement => describe(MovementFact::fields(), name),
            FactType::SalesPrice => describe(SalesPriceFact::fields(), name),
            FactType::FishingActivity => describe(FishingActivityFact::fields(), name),
        }
    }

    /// Resolves the property a custom rule sub-criteria points at.
    pub fn field_for(&self, sub_criteria: SubCriteria) -> Option<FieldInfo> {
        match self {
            FactType::RawMovement => describe_sub_criteria(RawMovementFact::fields(), sub_criteria),
            FactType::Movement => describe_sub_criteria(MovementFact::fields(), sub_criteria),
            FactType::SalesPrice => describe_sub_criteria(SalesPriceFact::fields(), sub_criteria),
            FactType::FishingActivity => {
                describe_sub_criteria(FishingActivityFact::fields(), sub_criteria)
            }
        }
    }
}

impl FromStr for FactType {
    type Err = ModelError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        FactType::parse(value).ok_or_else(|| ModelError::UnknownFactType(value.to_string()))
    }
}

impl fmt::Display for FactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a fact, one variant per fact type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FactKind {
    RawMovement(RawMovementFact),
    Movement(MovementFact),
    SalesPrice(SalesPriceFact),
    FishingActivity(FishingActivityFact),
}

impl FactKind {
    pub fn fact_type(&self) -> FactType {
        match self {
            FactKind::RawMovement(_) => FactType::RawMovement,
            FactKind::Movement(_) => FactType::Movement,
            FactKind::SalesPrice(_) => FactType::SalesPrice,
            FactKind::FishingActivity(_) => FactType::FishingActivity,
        }
    }

    /// Reads the property at `index` of this kind's field table.
    pub fn value_at(&self, index: usize) -> Option<FieldValue> {
        match self {
            FactKind::RawMovement(payload) => payload.value_at(index),
            FactKind::Movement(payload) => payload.value_at(index),
            FactKind::SalesPrice(payload) => payload.value_at(index),
            FactKind::FishingActivity(payload) => payload.value_at(index),
        }
    }
}

impl From<RawMovementFact> for FactKind {
    fn from(value: RawMovementFact) -> Self {
        FactKind::RawMovement(value)
    }
}

impl From<MovementFact> for FactKind {
    fn from(value: MovementFact) -> Self {
        FactKind::Movement(value)
    }
}

impl From<SalesPriceFact> for FactKind {
    fn from(value: SalesPriceFact) -> Self {
        FactKind::SalesPrice(value)
    }
}

impl From<FishingActivityFact> for FactKind {
    fn from(value: FishingActivityFact) -> Self {
        FactKind::FishingActivity(value)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Error,
    Warning,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Error => "ERROR",
            Severity::Warning => "WARNING",
        }
    }
}

/// One validation result attached to a fact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub struct ValidationOutcome {
    pub severity: Severity,
    pub message: String,
    pub rule_id: String,
    pub level: String,
    /// Path of the offending property in the originating document, if any.
    #[serde(default)]
    pub field_path: String,
}

/// Back-reference from a fact to the document it was extracted from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceRef {
    pub sequence: u32,
    pub path: String,
}

/// Short-lived snapshot of a domain entity presented to the rule interpreter.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    pub id: Uuid,
    pub kind: FactKind,
    #[serde(default)]
    pub outcomes: Vec<ValidationOutcome>,
    #[serde(default = "Fact::default_ok")]
    pub ok: bool,
    /// Keys shared by facts describing the same business object; used to
    /// report an error once per object rather than once per fact.
    #[serde(default)]
    pub unique_ids: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,
}

impl Fact {
    pub fn new(kind: impl Into<FactKind>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            outcomes: Vec::new(),
            ok: true,
            unique_ids: BTreeSet::new(),
            source: None,
        }
    }

    fn default_ok() -> bool {
        true
    }

    pub fn with_unique_id(mut self, id: impl Into<String>) -> Self {
        self.unique_ids.insert(id.into());
        self
    }

    pub fn with_source(mut self, sequence: u32, path: impl Into<String>) -> Self {
        self.source = Some(SourceRef {
            sequence,
            path: path.into(),
        });
        self
    }

    pub fn fact_type(&self) -> FactType {
        self.kind.fact_type()
    }

    pub fn value_at(&self, index: usize) -> Option<FieldValue> {
        self.kind.value_at(index)
    }

    /// Records a validation outcome. Identical outcomes are only kept once.
    pub fn add_warning_or_error(
        &mut self,
        severity: Severity,
        message: impl Into<String>,
        rule_id: impl Into<String>,
        level: impl Into<String>,
        field_path: impl Into<String>,
    ) {
        let outcome = ValidationOutcome {
            severity,
            message: message.into(),
            rule_id: rule_id.into(),
            level: level.into(),
            field_path: field_path.into(),
        };
        if severity == Severity::Error {
            self.ok = false;
        }
        if !self.outcomes.contains(&outcome) {
            self.outcomes.push(outcome);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.severity == Severity::Error)
    }

    pub fn has_warnings(&self) -> bool {
        self.outcomes
            .iter()
            .any(|outcome| outcome.severity == Severity::Warning)
    }

    pub fn as_movement(&self) -> Option<&MovementFact> {
        match &self.kind {
            FactKind::Movement(movement) => Some(movement),
            _ => None,
        }
    }

    pub fn as_raw_movement(&self) -> Option<&RawMovementFact> {
        match &self.kind {
            FactKind::RawMovement(raw) => Some(raw),
            _ => None,
        }
    }
}
