//! Maintenance event normalization

use super::{
    normalize_audience, normalize_crns, required_str, str_array_field, str_field,
    timestamp_field,
};
use crate::catalog::CatalogSource;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use pnp_common::crn::Crn;
use pnp_common::ids::record_id;
use pnp_common::model::MaintenanceState;
use serde_json::{Map, Value};

/// Marker value of the `Process` field signalling a bulk refresh
pub const BULK_MARKER: &str = "BULK";

/// A canonical maintenance event
#[derive(Debug, Clone)]
pub struct MaintenanceEvent {
    pub record_id: String,
    pub source: String,
    pub source_id: String,
    pub source_creation_time: Option<DateTime<Utc>>,
    pub source_update_time: Option<DateTime<Utc>>,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub short_description: Option<String>,
    pub current_status: Option<String>,
    pub customer_impact: Option<String>,
    pub state: MaintenanceState,
    pub disruptive: bool,
    pub crns: Vec<Crn>,
    pub disruption_type: Option<String>,
    pub disruption_description: Option<String>,
    pub disruption_duration: Option<i64>,
    pub maintenance_duration: Option<i64>,
    pub completion_code: Option<String>,
    pub audience: Option<String>,
    pub targeted_url: Option<String>,
    pub regulatory_domain: Option<String>,
    /// Bulk refresh: hash-based skip is honored but notifications are
    /// suppressed
    pub bulk: bool,
}

/// Normalize a maintenance attribute map
pub async fn normalize_maintenance(
    map: &Map<String, Value>,
    catalog: &dyn CatalogSource,
    allowed_cnames: &[String],
) -> Result<MaintenanceEvent, PipelineError> {
    let source = required_str(map, "source")?;
    let source_id = required_str(map, "number")?;
    let state_raw = required_str(map, "state")?;

    let raw_crns = match str_array_field(map, "crn") {
        Some(list) if !list.is_empty() => list,
        _ => {
            return Err(PipelineError::malformed(
                "required field 'crn' is missing or empty",
            ))
        }
    };
    let crns = normalize_crns(&raw_crns, catalog, allowed_cnames).await?;

    let targeted_url = str_field(map, "u_targeted_notification_url")
        .map(|url| super::apply_url_template(&url, &source_id));

    let bulk = str_field(map, "Process")
        .map(|v| v.trim().eq_ignore_ascii_case(BULK_MARKER))
        .unwrap_or(false);

    Ok(MaintenanceEvent {
        record_id: record_id(&source, &source_id),
        source_creation_time: timestamp_field(map, "sys_created_on")?,
        source_update_time: timestamp_field(map, "sys_updated_on")?,
        planned_start_time: timestamp_field(map, "u_disruption_began")?,
        planned_end_time: timestamp_field(map, "u_disruption_ended")?,
        short_description: str_field(map, "short_description"),
        current_status: str_field(map, "u_current_status"),
        customer_impact: str_field(map, "u_description_customer_impact"),
        state: MaintenanceState::from_source(&state_raw),
        disruptive: super::bool_field(map, "disruptive").unwrap_or(false),
        crns,
        disruption_type: str_field(map, "disruption_type"),
        disruption_description: str_field(map, "disruption_description"),
        disruption_duration: super::i64_field(map, "disruption_duration"),
        maintenance_duration: super::i64_field(map, "maintenance_duration")
            .or_else(|| super::i64_field(map, "u_outage_duration")),
        completion_code: str_field(map, "completion_code"),
        audience: normalize_audience(str_field(map, "u_audience")),
        targeted_url,
        regulatory_domain: str_field(map, "u_environment"),
        bulk,
        source,
        source_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use serde_json::json;

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(&["cloudant"], &[])
    }

    fn payload() -> Map<String, Value> {
        json!({
            "source": "servicenow",
            "number": "CHG0001234",
            "sys_created_on": "2024-02-01 00:00:00",
            "sys_updated_on": "2024-02-02 00:00:00",
            "u_disruption_began": "2024-02-10 01:00:00",
            "u_disruption_ended": "2024-02-10 03:00:00",
            "short_description": "Database upgrade",
            "state": "Scheduled",
            "disruptive": true,
            "maintenance_duration": 120,
            "disruption_type": "full outage",
            "disruption_duration": "30",
            "crn": ["crn:v1:pubcloud:public:cloudant:us-south::::"]
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[tokio::test]
    async fn normalizes_a_full_payload() {
        let event = normalize_maintenance(&payload(), &catalog(), &[]).await.unwrap();
        assert_eq!(event.state, MaintenanceState::Scheduled);
        assert!(event.disruptive);
        assert_eq!(event.maintenance_duration, Some(120));
        assert_eq!(event.disruption_duration, Some(30));
        assert!(!event.bulk);
        assert_eq!(event.crns.len(), 1);
    }

    #[tokio::test]
    async fn missing_state_is_malformed() {
        let mut map = payload();
        map.remove("state");
        assert!(normalize_maintenance(&map, &catalog(), &[]).await.is_err());
    }

    #[tokio::test]
    async fn bulk_marker_is_recognized() {
        let mut map = payload();
        map.insert("Process".into(), json!("BULK"));
        let event = normalize_maintenance(&map, &catalog(), &[]).await.unwrap();
        assert!(event.bulk);
    }

    #[tokio::test]
    async fn string_booleans_are_accepted() {
        let mut map = payload();
        map.insert("disruptive".into(), json!("false"));
        let event = normalize_maintenance(&map, &catalog(), &[]).await.unwrap();
        assert!(!event.disruptive);
    }

    #[tokio::test]
    async fn outage_duration_is_a_fallback() {
        let mut map = payload();
        map.remove("maintenance_duration");
        map.insert("u_outage_duration".into(), json!(45));
        let event = normalize_maintenance(&map, &catalog(), &[]).await.unwrap();
        assert_eq!(event.maintenance_duration, Some(45));
    }
}
