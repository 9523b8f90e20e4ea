//! Incident event normalization

use super::{
    normalize_audience, normalize_crns, required_str, str_array_field, str_field,
    timestamp_field,
};
use crate::catalog::CatalogSource;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use pnp_common::crn::Crn;
use pnp_common::ids::record_id;
use pnp_common::model::{Classification, IncidentState, Severity};
use serde_json::{Map, Value};

/// A canonical incident event.
///
/// `Option` fields distinguish absent from empty: `None` means the source
/// did not provide the field and an update inherits the prior value.
#[derive(Debug, Clone)]
pub struct IncidentEvent {
    pub record_id: String,
    pub source: String,
    pub source_id: String,
    pub source_creation_time: Option<DateTime<Utc>>,
    pub source_update_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub short_description: Option<String>,
    pub current_status: Option<String>,
    pub customer_impact: Option<String>,
    pub state: IncidentState,
    pub classification: Classification,
    pub severity: Severity,
    /// Pipeline-eligible CRNs after normalization. May be empty when every
    /// provided CRN was filtered; the reconciler turns that into
    /// tombstone-or-skip, never insert.
    pub crns: Vec<Crn>,
    pub audience: Option<String>,
    pub targeted_url: Option<String>,
    pub affected_activity: Option<String>,
    pub regulatory_domain: Option<String>,
}

/// Normalize an incident attribute map
pub async fn normalize_incident(
    map: &Map<String, Value>,
    catalog: &dyn CatalogSource,
    allowed_cnames: &[String],
) -> Result<IncidentEvent, PipelineError> {
    let source = required_str(map, "source")?;
    let source_id = required_str(map, "number")?;
    let state_raw = required_str(map, "incident_state")?;

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

    Ok(IncidentEvent {
        record_id: record_id(&source, &source_id),
        source_creation_time: timestamp_field(map, "sys_created_on")?,
        source_update_time: timestamp_field(map, "sys_updated_on")?,
        start_time: timestamp_field(map, "u_disruption_began")?,
        end_time: timestamp_field(map, "u_disruption_ended")?,
        short_description: str_field(map, "short_description"),
        current_status: str_field(map, "u_current_status"),
        customer_impact: str_field(map, "u_description_customer_impact"),
        state: IncidentState::from_source(&state_raw),
        classification: str_field(map, "u_status")
            .map(|raw| Classification::from_source(&raw))
            .unwrap_or(Classification::Unknown),
        severity: str_field(map, "priority")
            .map(|raw| Severity::from_source(&raw))
            .unwrap_or(Severity::Unknown),
        crns,
        audience: normalize_audience(str_field(map, "u_audience")),
        targeted_url,
        affected_activity: str_field(map, "u_affected_activity"),
        regulatory_domain: str_field(map, "u_environment"),
        source,
        source_id,
    })
}
