use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::field::{number, text, texts, time, FactPayload, FieldDef, FieldType};
use crate::field::SubCriteria as S;

/// Position report as received from a plugin, before enrichment.
///
/// Sanity rules run against this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawMovementFact {
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default)]
    pub plugin_type: Option<String>,
    #[serde(default)]
    pub asset_guid: Option<String>,
    #[serde(default)]
    pub mobile_terminal_connect_id: Option<String>,
    #[serde(default)]
    pub ircs: Option<String>,
    #[serde(default)]
    pub cfr: Option<String>,
    #[serde(default)]
    pub mmsi: Option<String>,
    #[serde(default)]
    pub flag_state: Option<String>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub position_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub date_received: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub reported_speed: Option<f64>,
    #[serde(default)]
    pub reported_course: Option<f64>,
    #[serde(default)]
    pub com_channel_type: Option<String>,
    #[serde(default)]
    pub movement_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub mobile_terminal_dnid: Option<String>,
    #[serde(default)]
    pub mobile_terminal_member_id: Option<String>,
    #[serde(default)]
    pub mobile_terminal_serial_number: Option<String>,
}

static RAW_MOVEMENT_FIELDS: &[FieldDef<RawMovementFact>] = &[
    FieldDef { name: "guid", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.guid) },
    FieldDef { name: "pluginType", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.plugin_type) },
    FieldDef { name: "assetGuid", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.asset_guid) },
    FieldDef { name: "mobileTerminalConnectId", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.mobile_terminal_connect_id) },
    FieldDef { name: "ircs", sub_criteria: Some(S::AssetIrcs), ty: FieldType::Text, get: |f| text(&f.ircs) },
    FieldDef { name: "cfr", sub_criteria: Some(S::AssetCfr), ty: FieldType::Text, get: |f| text(&f.cfr) },
    FieldDef { name: "mmsi", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.mmsi) },
    FieldDef { name: "flagState", sub_criteria: Some(S::FlagState), ty: FieldType::Text, get: |f| text(&f.flag_state) },
    FieldDef { name: "latitude", sub_criteria: Some(S::Latitude), ty: FieldType::Number, get: |f| number(f.latitude) },
    FieldDef { name: "longitude", sub_criteria: Some(S::Longitude), ty: FieldType::Number, get: |f| number(f.longitude) },
    FieldDef { name: "altitude", sub_criteria: Some(S::Altitude), ty: FieldType::Number, get: |f| number(f.altitude) },
    FieldDef { name: "positionTime", sub_criteria: Some(S::PositionReportTime), ty: FieldType::Time, get: |f| time(f.position_time) },
    FieldDef { name: "dateReceived", sub_criteria: None, ty: FieldType::Time, get: |f| time(f.date_received) },
    FieldDef { name: "statusCode", sub_criteria: Some(S::StatusCode), ty: FieldType::Text, get: |f| text(&f.status_code) },
    FieldDef { name: "reportedSpeed", sub_criteria: Some(S::ReportedSpeed), ty: FieldType::Number, get: |f| number(f.reported_speed) },
    FieldDef { name: "reportedCourse", sub_criteria: Some(S::ReportedCourse), ty: FieldType::Number, get: |f| number(f.reported_course) },
    FieldDef { name: "comChannelType", sub_criteria: Some(S::ComchannelType), ty: FieldType::Text, get: |f| text(&f.com_channel_type) },
    FieldDef { name: "movementType", sub_criteria: Some(S::MovementType), ty: FieldType::Text, get: |f| text(&f.movement_type) },
    FieldDef { name: "source", sub_criteria: Some(S::Source), ty: FieldType::Text, get: |f| text(&f.source) },
    FieldDef { name: "mobileTerminalDnid", sub_criteria: Some(S::MtDnid), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_dnid) },
    FieldDef { name: "mobileTerminalMemberId", sub_criteria: Some(S::MtMemberId), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_member_id) },
    FieldDef { name: "mobileTerminalSerialNumber", sub_criteria: Some(S::MtSerialNo), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_serial_number) },
];

impl FactPayload for RawMovementFact {
    fn fields() -> &'static [FieldDef<Self>] {
        RAW_MOVEMENT_FIELDS
    }
}

/// Enriched movement (asset, terminal and area data resolved). Custom rules
/// run against this shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MovementFact {
    #[serde(default)]
    pub movement_guid: Option<String>,
    #[serde(default)]
    pub vessel_guid: Option<String>,
    #[serde(default)]
    pub vessel_name: Option<String>,
    #[serde(default)]
    pub vessel_ircs: Option<String>,
    #[serde(default)]
    pub vessel_cfr: Option<String>,
    #[serde(default)]
    pub external_marking: Option<String>,
    #[serde(default)]
    pub flag_state: Option<String>,
    #[serde(default)]
    pub gear_type: Option<String>,
    #[serde(default)]
    pub asset_status: Option<String>,
    #[serde(default)]
    pub asset_groups: Vec<String>,
    #[serde(default)]
    pub com_channel_type: Option<String>,
    #[serde(default)]
    pub mobile_terminal_dnid: Option<String>,
    #[serde(default)]
    pub mobile_terminal_member_id: Option<String>,
    #[serde(default)]
    pub mobile_terminal_serial_number: Option<String>,
    #[serde(default)]
    pub altitude: Option<f64>,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default)]
    pub position_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub status_code: Option<String>,
    #[serde(default)]
    pub reported_speed: Option<f64>,
    #[serde(default)]
    pub reported_course: Option<f64>,
    #[serde(default)]
    pub calculated_speed: Option<f64>,
    #[serde(default)]
    pub calculated_course: Option<f64>,
    #[serde(default)]
    pub segment_type: Option<String>,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub movement_type: Option<String>,
    #[serde(default)]
    pub activity_message_type: Option<String>,
    #[serde(default)]
    pub activity_message_id: Option<String>,
    #[serde(default)]
    pub activity_callback: Option<String>,
    #[serde(default)]
    pub closest_port_code: Option<String>,
    #[serde(default)]
    pub closest_country_code: Option<String>,
    /// Codes of the areas containing the position. Parallel to `area_types`.
    #[serde(default)]
    pub area_codes: Vec<String>,
    #[serde(default)]
    pub area_types: Vec<String>,
    #[serde(default)]
    pub entered_area_codes: Vec<String>,
    #[serde(default)]
    pub entered_area_types: Vec<String>,
    #[serde(default)]
    pub exited_area_codes: Vec<String>,
    #[serde(default)]
    pub exited_area_types: Vec<String>,
}

impl MovementFact {
    /// Pairs of (area code, area type) the position lies in.
    pub fn areas(&self) -> impl Iterator<Item = (&str, &str)> {
        self.area_codes
            .iter()
            .zip(self.area_types.iter())
            .map(|(code, ty)| (code.as_str(), ty.as_str()))
    }

    /// Code of the exclusive economic zone the position lies in, if known.
    /// The last EEZ wins when several are reported.
    pub fn eez_code(&self) -> Option<&str> {
        self.areas()
            .filter(|(_, ty)| *ty == "EEZ")
            .map(|(code, _)| code)
            .last()
    }
}

static MOVEMENT_FIELDS: &[FieldDef<MovementFact>] = &[
    FieldDef { name: "movementGuid", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.movement_guid) },
    FieldDef { name: "vesselGuid", sub_criteria: None, ty: FieldType::Text, get: |f| text(&f.vessel_guid) },
    FieldDef { name: "vesselName", sub_criteria: Some(S::AssetName), ty: FieldType::Text, get: |f| text(&f.vessel_name) },
    FieldDef { name: "vesselIrcs", sub_criteria: Some(S::AssetIrcs), ty: FieldType::Text, get: |f| text(&f.vessel_ircs) },
    FieldDef { name: "vesselCfr", sub_criteria: Some(S::AssetCfr), ty: FieldType::Text, get: |f| text(&f.vessel_cfr) },
    FieldDef { name: "externalMarking", sub_criteria: Some(S::ExternalMarking), ty: FieldType::Text, get: |f| text(&f.external_marking) },
    FieldDef { name: "flagState", sub_criteria: Some(S::FlagState), ty: FieldType::Text, get: |f| text(&f.flag_state) },
    FieldDef { name: "gearType", sub_criteria: Some(S::AssetIdGearType), ty: FieldType::Text, get: |f| text(&f.gear_type) },
    FieldDef { name: "assetStatus", sub_criteria: Some(S::AssetStatus), ty: FieldType::Text, get: |f| text(&f.asset_status) },
    FieldDef { name: "assetGroup", sub_criteria: Some(S::AssetGroup), ty: FieldType::TextList, get: |f| texts(&f.asset_groups) },
    FieldDef { name: "comChannelType", sub_criteria: Some(S::ComchannelType), ty: FieldType::Text, get: |f| text(&f.com_channel_type) },
    FieldDef { name: "mobileTerminalDnid", sub_criteria: Some(S::MtDnid), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_dnid) },
    FieldDef { name: "mobileTerminalMemberId", sub_criteria: Some(S::MtMemberId), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_member_id) },
    FieldDef { name: "mobileTerminalSerialNumber", sub_criteria: Some(S::MtSerialNo), ty: FieldType::Text, get: |f| text(&f.mobile_terminal_serial_number) },
    FieldDef { name: "altitude", sub_criteria: Some(S::Altitude), ty: FieldType::Number, get: |f| number(f.altitude) },
    FieldDef { name: "latitude", sub_criteria: Some(S::Latitude), ty: FieldType::Number, get: |f| number(f.latitude) },
    FieldDef { name: "longitude", sub_criteria: Some(S::Longitude), ty: FieldType::Number, get: |f| number(f.longitude) },
    FieldDef { name: "positionTime", sub_criteria: Some(S::PositionReportTime), ty: FieldType::Time, get: |f| time(f.position_time) },
    FieldDef { name: "statusCode", sub_criteria: Some(S::StatusCode), ty: FieldType::Text, get: |f| text(&f.status_code) },
    FieldDef { name: "reportedSpeed", sub_criteria: Some(S::ReportedSpeed), ty: FieldType::Number, get: |f| number(f.reported_speed) },
    FieldDef { name: "reportedCourse", sub_criteria: Some(S::ReportedCourse), ty: FieldType::Number, get: |f| number(f.reported_course) },
    FieldDef { name: "calculatedSpeed", sub_criteria: Some(S::CalculatedSpeed), ty: FieldType::Number, get: |f| number(f.calculated_speed) },
    FieldDef { name: "calculatedCourse", sub_criteria: Some(S::CalculatedCourse), ty: FieldType::Number, get: |f| number(f.calculated_course) },
    FieldDef { name: "segmentType", sub_criteria: Some(S::SegmentType), ty: FieldType::Text, get: |f| text(&f.segment_type) },
    FieldDef { name: "source", sub_criteria: Some(S::Source), ty: FieldType::Text, get: |f| text(&f.source) },
    FieldDef { name: "movementType", sub_criteria: Some(S::MovementType), ty: FieldType::Text, get: |f| text(&f.movement_type) },
    FieldDef { name: "activityMessageType", sub_criteria: Some(S::ActivityMessageType), ty: FieldType::Text, get: |f| text(&f.activity_message_type) },
    FieldDef { name: "activityMessageId", sub_criteria: Some(S::ActivityMessageId), ty: FieldType::Text, get: |f| text(&f.activity_message_id) },
    FieldDef { name: "activityCallback", sub_criteria: Some(S::ActivityCallback), ty: FieldType::Text, get: |f| text(&f.activity_callback) },
    FieldDef { name: "closestPortCode", sub_criteria: Some(S::ClosestPortCode), ty: FieldType::Text, get: |f| text(&f.closest_port_code) },
    FieldDef { name: "closestCountryCode", sub_criteria: Some(S::ClosestCountryCode), ty: FieldType::Text, get: |f| text(&f.closest_country_code) },
    FieldDef { name: "areaCode", sub_criteria: Some(S::AreaCode), ty: FieldType::TextList, get: |f| texts(&f.area_codes) },
    FieldDef { name: "areaType", sub_criteria: Some(S::AreaType), ty: FieldType::TextList, get: |f| texts(&f.area_types) },
    FieldDef { name: "enteredAreaCode", sub_criteria: Some(S::AreaCodeEnt), ty: FieldType::TextList, get: |f| texts(&f.entered_area_codes) },
    FieldDef { name: "enteredAreaType", sub_criteria: Some(S::AreaTypeEnt), ty: FieldType::TextList, get: |f| texts(&f.entered_area_types) },
    FieldDef { name: "exitedAreaCode", sub_criteria: Some(S::AreaCodeExt), ty: FieldType::TextList, get: |f| texts(&f.exited_area_codes) },
    FieldDef { name: "exitedAreaType", sub_criteria: Some(S::AreaTypeExt), ty: FieldType::TextList, get: |f| texts(&f.exited_area_types) },
];

impl FactPayload for MovementFact {
    fn fields() -> &'static [FieldDef<Self>] {
        MOVEMENT_FIELDS
    }
}

/// Latest position report received from a vessel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreviousReport {
    pub vessel_guid: String,
    #[serde(default)]
    pub movement_guid: Option<String>,
    pub position_time: DateTime<Utc>,
}

impl PreviousReport {
    /// Whether no report arrived within `threshold` before `now`.
    pub fn is_silent(&self, now: DateTime<Utc>, threshold: std::time::Duration) -> bool {
        (now - self.position_time)
            .to_std()
            .map_or(false, |elapsed| elapsed >= threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eez_code_prefers_last_reported_zone() {
        let movement = MovementFact {
            area_codes: vec!["SWE".into(), "DNK".into(), "NOR".into()],
            area_types: vec!["EEZ".into(), "PORT".into(), "EEZ".into()],
            ..Default::default()
        };
        assert_eq!(movement.eez_code(), Some("NOR"));
    }

    #[test]
    fn silence_is_measured_from_the_last_position() {
        use chrono::TimeZone;

        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let report = PreviousReport {
            vessel_guid: "v-1".into(),
            movement_guid: None,
            position_time: now - chrono::Duration::hours(2),
        };
        let two_hours = std::time::Duration::from_secs(7200);
        assert!(report.is_silent(now, two_hours));
        assert!(!report.is_silent(now - chrono::Duration::minutes(1), two_hours));
        assert!(!report.is_silent(now - chrono::Duration::hours(3), two_hours));
    }

    #[test]
    fn every_movement_sub_criteria_is_unique() {
        let mut seen = std::collections::HashSet::new();
        for field in MovementFact::fields() {
            if let Some(sub) = field.sub_criteria {
                assert!(seen.insert(sub), "duplicate sub criteria {:?}", sub);
            }
        }
    }
}
