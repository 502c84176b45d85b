use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Top level grouping of the properties a custom rule can reference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Criteria {
    Activity,
    Area,
    Asset,
    AssetGroup,
    MobileTerminal,
    Position,
}

/// Concrete property a custom rule condition segment points at.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubCriteria {
    ActivityCallback,
    ActivityMessageId,
    ActivityMessageType,

    AreaCode,
    AreaType,
    AreaCodeEnt,
    AreaTypeEnt,
    AreaCodeExt,
    AreaTypeExt,

    AssetIdGearType,
    ExternalMarking,
    FlagState,
    AssetCfr,
    AssetIrcs,
    AssetName,
    AssetStatus,

    AssetGroup,

    ComchannelType,
    MtDnid,
    MtMemberId,
    MtSerialNo,

    Altitude,
    Latitude,
    Longitude,
    CalculatedCourse,
    CalculatedSpeed,
    MovementType,
    PositionReportTime,
    ReportedCourse,
    ReportedSpeed,
    SegmentType,
    Source,
    StatusCode,
    ClosestCountryCode,
    ClosestPortCode,
}

impl SubCriteria {
    /// Criteria the sub-criteria belongs to.
    pub fn criteria(&self) -> Criteria {
        use SubCriteria::*;
        match self {
            ActivityCallback | ActivityMessageId | ActivityMessageType => Criteria::Activity,
            AreaCode | AreaType | AreaCodeEnt | AreaTypeEnt | AreaCodeExt | AreaTypeExt => {
                Criteria::Area
            }
            AssetIdGearType | ExternalMarking | FlagState | AssetCfr | AssetIrcs | AssetName
            | AssetStatus => Criteria::Asset,
            AssetGroup => Criteria::AssetGroup,
            ComchannelType | MtDnid | MtMemberId | MtSerialNo => Criteria::MobileTerminal,
            _ => Criteria::Position,
        }
    }
}

/// Declared type of a fact property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    Text,
    Number,
    Bool,
    Time,
    TextList,
    NumberList,
}

impl FieldType {
    pub fn is_list(&self) -> bool {
        matches!(self, FieldType::TextList | FieldType::NumberList)
    }

    /// Scalar type of the list elements, or the type itself for scalars.
    pub fn element(&self) -> FieldType {
        match self {
            FieldType::TextList => FieldType::Text,
            FieldType::NumberList => FieldType::Number,
            other => *other,
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Text => "text",
            FieldType::Number => "number",
            FieldType::Bool => "bool",
            FieldType::Time => "time",
            FieldType::TextList => "text list",
            FieldType::NumberList => "number list",
        };
        f.write_str(name)
    }
}

/// Runtime value of a fact property.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Null,
    Text(String),
    Number(f64),
    Bool(bool),
    Time(DateTime<Utc>),
    List(Vec<FieldValue>),
}

impl FieldValue {
    pub fn is_null(&self) -> bool {
        matches!(self, FieldValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::Null => "null",
            FieldValue::Text(_) => "text",
            FieldValue::Number(_) => "number",
            FieldValue::Bool(_) => "bool",
            FieldValue::Time(_) => "time",
            FieldValue::List(_) => "list",
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Null => f.write_str("null"),
            FieldValue::Text(value) => f.write_str(value),
            FieldValue::Number(value) => write!(f, "{}", value),
            FieldValue::Bool(value) => write!(f, "{}", value),
            FieldValue::Time(value) => write!(f, "{}", value.to_rfc3339()),
            FieldValue::List(items) => {
                let rendered: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "[{}]", rendered.join(", "))
            }
        }
    }
}

/// Static description of one addressable property of a fact payload.
pub struct FieldDef<T: 'static> {
    pub name: &'static str,
    pub sub_criteria: Option<SubCriteria>,
    pub ty: FieldType,
    pub get: fn(&T) -> FieldValue,
}

/// Resolved field of a fact type, independent of the payload type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldInfo {
    pub index: usize,
    pub name: &'static str,
    pub ty: FieldType,
    pub sub_criteria: Option<SubCriteria>,
}

/// Implemented by every fact payload; exposes its field table.
pub trait FactPayload: Sized + 'static {
    fn fields() -> &'static [FieldDef<Self>];

    fn value_at(&self, index: usize) -> Option<FieldValue> {
        Self::fields().get(index).map(|field| (field.get)(self))
    }
}

pub(crate) fn describe<T>(fields: &'static [FieldDef<T>], name: &str) -> Option<FieldInfo> {
    let position = fields
        .iter()
        .position(|field| field.name == name)
        .or_else(|| {
            fields
                .iter()
                .position(|field| field.name.eq_ignore_ascii_case(name))
        })?;
    Some(info(fields, position))
}

pub(crate) fn describe_sub_criteria<T>(
    fields: &'static [FieldDef<T>],
    sub_criteria: SubCriteria,
) -> Option<FieldInfo> {
    let position = fields
        .iter()
        .position(|field| field.sub_criteria == Some(sub_criteria))?;
    Some(info(fields, position))
}

fn info<T>(fields: &'static [FieldDef<T>], index: usize) -> FieldInfo {
    let field = &fields[index];
    FieldInfo {
        index,
        name: field.name,
        ty: field.ty,
        sub_criteria: field.sub_criteria,
    }
}

pub(crate) fn text(value: &Option<String>) -> FieldValue {
    value
        .as_ref()
        .map(|value| FieldValue::Text(value.clone()))
        .unwrap_or(FieldValue::Null)
}

pub(crate) fn number(value: Option<f64>) -> FieldValue {
    value.map(FieldValue::Number).unwrap_or(FieldValue::Null)
}

pub(crate) fn time(value: Option<DateTime<Utc>>) -> FieldValue {
    value.map(FieldValue::Time).unwrap_or(FieldValue::Null)
}

pub(crate) fn texts(values: &[String]) -> FieldValue {
    FieldValue::List(values.iter().cloned().map(FieldValue::Text).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_criteria_groups_under_criteria() {
        assert_eq!(SubCriteria::FlagState.criteria(), Criteria::Asset);
        assert_eq!(SubCriteria::AreaCodeEnt.criteria(), Criteria::Area);
        assert_eq!(SubCriteria::ReportedSpeed.criteria(), Criteria::Position);
    }

    #[test]
    fn list_values_render_inline() {
        let value = texts(&["DNK".to_string(), "SWE".to_string()]);
        assert_eq!(value.to_string(), "[DNK, SWE]");
    }
}
