use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

use crate::token::id_to_string;

/// A device as returned by the device listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    #[serde(default)]
    pub id: Value,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Device {
    pub fn id(&self) -> Option<String> {
        id_to_string(&self.id)
    }

    pub fn serial_number(&self) -> Option<&str> {
        self.properties
            .get("serial_number")
            .and_then(|p| p.get("value"))
            .and_then(Value::as_str)
    }

    pub fn model_description(&self) -> Option<&str> {
        self.properties
            .get("model_description")
            .and_then(|p| p.get("value"))
            .and_then(Value::as_str)
    }
}

#[derive(Debug, Deserialize)]
pub struct DevicesResponse {
    #[serde(default)]
    pub data: Vec<Device>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnrichedData {
    #[serde(default)]
    pub water_treatment: Option<Map<String, Value>>,
}

/// Detail envelope of a single device. Each property is an object carrying a
/// `value` and sometimes a `converted_value`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeviceDetail {
    #[serde(default)]
    pub properties: Map<String, Value>,
    #[serde(default)]
    pub enriched_data: Option<EnrichedData>,
}

#[derive(Debug, Deserialize)]
pub struct DeviceDetailResponse {
    #[serde(default)]
    pub device: DeviceDetail,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftenerState {
    Online,
    Offline,
}

impl fmt::Display for SoftenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SoftenerState::Online => write!(f, "Online"),
            SoftenerState::Offline => write!(f, "Offline"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeUnit {
    Gallons,
    Liters,
}

impl VolumeUnit {
    fn from_enum(value: i64) -> Self {
        match value {
            1 => VolumeUnit::Liters,
            _ => VolumeUnit::Gallons,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            VolumeUnit::Gallons => "gal",
            VolumeUnit::Liters => "L",
        }
    }
}

/// Telemetry snapshot of a softener.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftenerData {
    pub timestamp: DateTime<Utc>,
    pub model: String,
    pub state: SoftenerState,
    pub device_date_time: DateTime<Utc>,
    pub volume_unit: VolumeUnit,
    pub current_water_flow: f64,
    pub today_use: i64,
    pub average_daily_use: i64,
    pub total_water_available: i64,
    pub days_since_last_regeneration: i64,
    pub salt_level: i64,
    pub salt_level_percent: i64,
    pub out_of_salt_estimated_days: i64,
    pub hardness_grains: i64,
    pub water_shutoff_valve_state: i64,
}

impl SoftenerData {
    pub fn from_detail(detail: &DeviceDetail) -> Self {
        Self::from_detail_at(detail, Utc::now())
    }

    /// Map a device detail, using `now` for the snapshot timestamp and as the
    /// fallback device clock.
    pub fn from_detail_at(detail: &DeviceDetail, now: DateTime<Utc>) -> Self {
        let model = format!(
            "{} ({})",
            detail
                .text("model_description")
                .unwrap_or_else(|| "Unknown Model".to_string()),
            detail.text("model_id").unwrap_or_else(|| "N/A".to_string())
        );

        let state = match detail.value("service_active") {
            Some(Value::Bool(false)) => SoftenerState::Offline,
            _ => SoftenerState::Online,
        };

        let device_date_time = detail
            .text("device_date")
            .and_then(|s| parse_device_date(&s))
            .unwrap_or(now);

        Self {
            timestamp: now,
            model,
            state,
            device_date_time,
            volume_unit: VolumeUnit::from_enum(detail.int("volume_unit_enum")),
            current_water_flow: detail.current_flow(),
            today_use: detail.int("gallons_used_today"),
            average_daily_use: detail.int("avg_daily_use_gals"),
            total_water_available: detail.int("treated_water_avail_gals"),
            days_since_last_regeneration: detail.int("days_since_last_regen"),
            salt_level: (detail.float("salt_level_tenths") / 10.0) as i64,
            salt_level_percent: detail.salt_level_percent().unwrap_or(0.0) as i64,
            out_of_salt_estimated_days: detail.int("out_of_salt_estimate_days"),
            hardness_grains: detail.int("hardness_grains"),
            water_shutoff_valve_state: detail.int("water_shutoff_valve"),
        }
    }
}

/// Flow rate and salt level only.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowAndSalt {
    pub flow_gpm: f64,
    pub salt_percent: Option<f64>,
}

impl FlowAndSalt {
    pub fn from_detail(detail: &DeviceDetail) -> Self {
        Self {
            flow_gpm: detail.current_flow(),
            salt_percent: detail.salt_level_percent(),
        }
    }
}

impl DeviceDetail {
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.properties
            .get(name)
            .and_then(|p| p.get("value"))
            .filter(|v| !v.is_null())
    }

    fn current_flow(&self) -> f64 {
        self.properties
            .get("current_water_flow_gpm")
            .and_then(|p| p.get("converted_value"))
            .and_then(as_f64)
            .unwrap_or(0.0)
    }

    fn text(&self, name: &str) -> Option<String> {
        match self.value(name)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn float(&self, name: &str) -> f64 {
        self.value(name).and_then(as_f64).unwrap_or(0.0)
    }

    fn int(&self, name: &str) -> i64 {
        self.float(name) as i64
    }

    fn salt_level_percent(&self) -> Option<f64> {
        self.enriched_data
            .as_ref()
            .and_then(|e| e.water_treatment.as_ref())
            .and_then(|w| w.get("salt_level_percent"))
            .and_then(as_f64)
    }
}

/// Numbers sometimes arrive as strings.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn parse_device_date(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }
    let naive = raw.trim_end_matches('Z');
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
}

/// Body of `PUT /devices/{id}/command`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceCommand {
    pub function: &'static str,
    pub action: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValveAction {
    Open,
    Close,
}

impl From<ValveAction> for DeviceCommand {
    fn from(action: ValveAction) -> Self {
        DeviceCommand {
            function: "water_shutoff_valve",
            action: match action {
                ValveAction::Open => "open",
                ValveAction::Close => "close",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerationAction {
    Schedule,
    Cancel,
    Now,
}

impl From<RegenerationAction> for DeviceCommand {
    fn from(action: RegenerationAction) -> Self {
        DeviceCommand {
            function: "regenerate",
            action: match action {
                RegenerationAction::Schedule => "schedule",
                RegenerationAction::Cancel => "cancel",
                RegenerationAction::Now => "regenerate",
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn detail(value: Value) -> DeviceDetail {
        serde_json::from_value::<DeviceDetailResponse>(value)
            .unwrap()
            .device
    }

    #[test]
    fn test_device_serial_and_id() {
        let device: Device = serde_json::from_value(json!({
            "id": 1234,
            "properties": { "serial_number": { "value": "SN-1" } }
        }))
        .unwrap();

        assert_eq!(device.id().as_deref(), Some("1234"));
        assert_eq!(device.serial_number(), Some("SN-1"));
    }

    #[test]
    fn test_device_without_properties() {
        let device: Device = serde_json::from_value(json!({ "id": "abc" })).unwrap();
        assert_eq!(device.serial_number(), None);
    }

    #[test]
    fn test_softener_data_mapping() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let detail = detail(json!({
            "device": {
                "properties": {
                    "model_description": { "value": "Signature 2" },
                    "model_id": { "value": 77 },
                    "service_active": { "value": false },
                    "device_date": { "value": "2024-04-30T08:15:00Z" },
                    "volume_unit_enum": { "value": 1 },
                    "current_water_flow_gpm": { "value": 12, "converted_value": 1.5 },
                    "gallons_used_today": { "value": "42" },
                    "salt_level_tenths": { "value": 57 },
                    "water_shutoff_valve": { "value": 1 }
                },
                "enriched_data": { "water_treatment": { "salt_level_percent": 64.5 } }
            }
        }));

        let data = SoftenerData::from_detail_at(&detail, now);
        assert_eq!(data.model, "Signature 2 (77)");
        assert_eq!(data.state, SoftenerState::Offline);
        assert_eq!(
            data.device_date_time,
            Utc.with_ymd_and_hms(2024, 4, 30, 8, 15, 0).unwrap()
        );
        assert_eq!(data.volume_unit, VolumeUnit::Liters);
        assert_eq!(data.current_water_flow, 1.5);
        assert_eq!(data.today_use, 42);
        assert_eq!(data.salt_level, 5);
        assert_eq!(data.salt_level_percent, 64);
        assert_eq!(data.water_shutoff_valve_state, 1);
        assert_eq!(data.hardness_grains, 0);
    }

    #[test]
    fn test_softener_data_defaults() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let data = SoftenerData::from_detail_at(&DeviceDetail::default(), now);

        assert_eq!(data.model, "Unknown Model (N/A)");
        assert_eq!(data.state, SoftenerState::Online);
        assert_eq!(data.device_date_time, now);
        assert_eq!(data.volume_unit, VolumeUnit::Gallons);
        assert_eq!(data.current_water_flow, 0.0);
    }

    #[test]
    fn test_unparseable_device_date_falls_back() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let detail = detail(json!({
            "device": { "properties": { "device_date": { "value": "yesterday" } } }
        }));
        assert_eq!(SoftenerData::from_detail_at(&detail, now).device_date_time, now);
    }

    #[test]
    fn test_naive_device_date() {
        assert_eq!(
            parse_device_date("2024-04-30T08:15:00.250"),
            Some(
                Utc.with_ymd_and_hms(2024, 4, 30, 8, 15, 0).unwrap()
                    + chrono::Duration::milliseconds(250)
            )
        );
    }

    #[test]
    fn test_flow_and_salt() {
        let detail = detail(json!({
            "device": {
                "properties": { "current_water_flow_gpm": { "converted_value": "0.8" } },
                "enriched_data": { "water_treatment": {} }
            }
        }));
        let summary = FlowAndSalt::from_detail(&detail);
        assert_eq!(summary.flow_gpm, 0.8);
        assert_eq!(summary.salt_percent, None);
    }

    #[test]
    fn test_command_payloads() {
        assert_eq!(
            serde_json::to_value(DeviceCommand::from(ValveAction::Close)).unwrap(),
            json!({ "function": "water_shutoff_valve", "action": "close" })
        );
        assert_eq!(
            DeviceCommand::from(RegenerationAction::Now).action,
            "regenerate"
        );
    }
}
