//! Normalizer: attribute map to canonical event
//!
//! Maps source-system codes to canonical enumerations, normalizes
//! timestamps and resource identifiers, composes the structured long
//! description, and applies audience/URL defaulting. Unknown enumeration
//! values map to sentinels; a missing required field or bad timestamp
//! grammar is a malformed message.

pub mod incident;
pub mod maintenance;

pub use incident::{normalize_incident, IncidentEvent};
pub use maintenance::{normalize_maintenance, MaintenanceEvent};

use crate::catalog::CatalogSource;
use crate::error::PipelineError;
use chrono::{DateTime, Utc};
use pnp_common::crn::{Crn, HEARTBEAT_SERVICE};
use pnp_common::events::EventKind;
use pnp_common::time::parse_source_timestamp;
use serde_json::{Map, Value};
use std::collections::HashSet;
use tracing::debug;

/// Separator between the description section and the current-status section
pub const STATUS_SEPARATOR: &str = "\n\n--- Current Status and Next Steps ---\n\n";

/// Separator between the current-status section and the customer-impact section
pub const IMPACT_SEPARATOR: &str = "\n\n--- Customer Impact ---\n\n";

/// Literal token in targeted URLs, substituted with the event's source-id
pub const URL_TOKEN: &str = "$SN_RECORD_ID";

/// Sentinel stored when the source supplied an audience field left empty
pub const AUDIENCE_NONE: &str = "none";

/// Payload keys that only appear on maintenance events
const MAINTENANCE_KEYS: &[&str] = &[
    "disruptive",
    "maintenance_duration",
    "disruption_type",
    "disruption_description",
    "disruption_duration",
    "completion_code",
    "u_outage_duration",
];

/// A canonical event produced by the normalizer
#[derive(Debug, Clone)]
pub enum Event {
    Incident(IncidentEvent),
    Maintenance(MaintenanceEvent),
}

impl Event {
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Incident(_) => EventKind::Incident,
            Event::Maintenance(_) => EventKind::Maintenance,
        }
    }

    pub fn source(&self) -> &str {
        match self {
            Event::Incident(e) => &e.source,
            Event::Maintenance(e) => &e.source,
        }
    }

    pub fn source_id(&self) -> &str {
        match self {
            Event::Incident(e) => &e.source_id,
            Event::Maintenance(e) => &e.source_id,
        }
    }
}

/// Decide which event kind a payload describes.
///
/// The bus does not label messages; maintenance payloads are recognized by
/// their maintenance-only fields.
pub fn classify(map: &Map<String, Value>) -> EventKind {
    if MAINTENANCE_KEYS.iter().any(|key| map.contains_key(*key)) {
        EventKind::Maintenance
    } else {
        EventKind::Incident
    }
}

/// Normalize a decoded attribute map into a canonical event
pub async fn normalize(
    map: &Map<String, Value>,
    catalog: &dyn CatalogSource,
    allowed_cnames: &[String],
) -> Result<Event, PipelineError> {
    match classify(map) {
        EventKind::Incident => Ok(Event::Incident(
            normalize_incident(map, catalog, allowed_cnames).await?,
        )),
        EventKind::Maintenance => Ok(Event::Maintenance(
            normalize_maintenance(map, catalog, allowed_cnames).await?,
        )),
    }
}

// ---------------------------------------------------------------------------
// Field access
//
// Absent and null both mean "not provided" (None); an empty string is a
// provided-but-empty value (Some("")). Consumers use None to inherit prior
// state on update.
// ---------------------------------------------------------------------------

pub(crate) fn str_field(map: &Map<String, Value>, key: &str) -> Option<String> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(other) => Some(other.to_string()),
    }
}

pub(crate) fn required_str(
    map: &Map<String, Value>,
    key: &str,
) -> Result<String, PipelineError> {
    match str_field(map, key) {
        Some(value) if !value.trim().is_empty() => Ok(value),
        _ => Err(PipelineError::malformed(format!(
            "required field '{key}' is missing or empty"
        ))),
    }
}

pub(crate) fn timestamp_field(
    map: &Map<String, Value>,
    key: &str,
) -> Result<Option<DateTime<Utc>>, PipelineError> {
    match str_field(map, key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_source_timestamp(&raw)
            .map(Some)
            .map_err(|e| PipelineError::malformed(format!("field '{key}': {e}"))),
    }
}

pub(crate) fn bool_field(map: &Map<String, Value>, key: &str) -> Option<bool> {
    match map.get(key) {
        Some(Value::Bool(b)) => Some(*b),
        Some(Value::String(s)) => Some(s.eq_ignore_ascii_case("true")),
        _ => None,
    }
}

pub(crate) fn i64_field(map: &Map<String, Value>, key: &str) -> Option<i64> {
    match map.get(key) {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

/// String-array field. Scalar strings are accepted as a single-element list;
/// `None` means the field was absent or null.
pub(crate) fn str_array_field(map: &Map<String, Value>, key: &str) -> Option<Vec<String>> {
    match map.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect(),
        ),
        Some(Value::String(s)) => Some(vec![s.clone()]),
        Some(_) => Some(Vec::new()),
    }
}

// ---------------------------------------------------------------------------
// Long-description composition
// ---------------------------------------------------------------------------

/// Join the three named sections with the fixed separators
pub fn build_long_description(description: &str, status: &str, impact: &str) -> String {
    format!("{description}{STATUS_SEPARATOR}{status}{IMPACT_SEPARATOR}{impact}")
}

/// Split a stored long description back into its three sections.
///
/// A value that predates the composite form (no separators) comes back as a
/// bare description with empty status and impact sections.
pub fn split_long_description(composite: &str) -> (String, String, String) {
    let (description, rest) = match composite.split_once(STATUS_SEPARATOR) {
        Some((d, r)) => (d, r),
        None => return (composite.to_string(), String::new(), String::new()),
    };
    let (status, impact) = match rest.split_once(IMPACT_SEPARATOR) {
        Some((s, i)) => (s, i),
        None => (rest, ""),
    };
    (description.to_string(), status.to_string(), impact.to_string())
}

/// Merge new sections over a prior composite: any section empty in the new
/// event inherits the prior section.
pub fn merge_long_description(
    new_description: &str,
    new_status: &str,
    new_impact: &str,
    prior: &str,
) -> String {
    let (prior_description, prior_status, prior_impact) = split_long_description(prior);
    let pick = |new: &str, old: String| {
        if new.is_empty() {
            old
        } else {
            new.to_string()
        }
    };
    build_long_description(
        &pick(new_description, prior_description),
        &pick(new_status, prior_status),
        &pick(new_impact, prior_impact),
    )
}

// ---------------------------------------------------------------------------
// Audience and URL defaulting
// ---------------------------------------------------------------------------

/// Present-but-empty audience becomes the "none provided" sentinel; absence
/// stays absent so updates inherit the prior value.
pub fn normalize_audience(raw: Option<String>) -> Option<String> {
    raw.map(|value| {
        if value.trim().is_empty() {
            AUDIENCE_NONE.to_string()
        } else {
            value
        }
    })
}

/// Substitute the source-id for the URL token
pub fn apply_url_template(url: &str, source_id: &str) -> String {
    url.replace(URL_TOKEN, source_id)
}

// ---------------------------------------------------------------------------
// Resource-identifier pipeline
// ---------------------------------------------------------------------------

/// Normalize a raw CRN list: parse (dropping invalid entries), rewrite
/// services to their status-page parent, drop pipeline-ineligible entries,
/// and remove duplicates while preserving order.
///
/// A catalog that cannot answer is a transient error; filtering against a
/// missing catalog view would misclassify every entry as ineligible.
pub async fn normalize_crns(
    raw: &[String],
    catalog: &dyn CatalogSource,
    allowed_cnames: &[String],
) -> Result<Vec<Crn>, PipelineError> {
    let mut seen = HashSet::new();
    let mut eligible = Vec::new();

    for entry in raw {
        let crn = match Crn::parse(entry) {
            Ok(crn) => crn,
            Err(e) => {
                debug!("Dropping unparseable CRN '{}': {}", entry, e);
                continue;
            }
        };

        // Coalesce sub-components into the published surface
        let crn = match catalog.status_page_parent(&crn.service).await? {
            Some(parent) => crn.with_service(&parent),
            None => crn,
        };

        if !crn.is_public_cloud(allowed_cnames) {
            debug!("Dropping out-of-program CRN '{}'", crn);
            continue;
        }

        let enabled = crn.service == HEARTBEAT_SERVICE
            || catalog.is_service_enabled(&crn.service).await?;
        if !enabled {
            debug!("Dropping CRN for disabled service '{}'", crn.service);
            continue;
        }

        if seen.insert(crn.to_string()) {
            eligible.push(crn);
        }
    }

    Ok(eligible)
}
