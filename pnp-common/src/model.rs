//! Materialized record models
//!
//! Canonical enumerations and the two record kinds the pipeline owns in the
//! relational store. Source-system codes are mapped onto these enums by the
//! normalizer; unknown codes map to the `Unknown` sentinel rather than
//! failing the message.

use crate::crn::Crn;
use crate::time::to_utc_string;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Incident lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncidentState {
    New,
    InProgress,
    Resolved,
    Unknown,
}

impl IncidentState {
    /// Map a source-system code or display string to the canonical state
    pub fn from_source(raw: &str) -> IncidentState {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "new" => IncidentState::New,
            "6" | "resolved" => IncidentState::Resolved,
            "7" | "closed" => IncidentState::Resolved,
            "in progress" | "in-progress" | "active" | "work in progress" => {
                IncidentState::InProgress
            }
            _ => IncidentState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentState::New => "new",
            IncidentState::InProgress => "in-progress",
            IncidentState::Resolved => "resolved",
            IncidentState::Unknown => "unknown",
        }
    }

    pub fn from_stored(raw: &str) -> IncidentState {
        match raw {
            "new" => IncidentState::New,
            "in-progress" => IncidentState::InProgress,
            "resolved" => IncidentState::Resolved,
            _ => IncidentState::Unknown,
        }
    }
}

/// Maintenance lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MaintenanceState {
    New,
    Scheduled,
    InProgress,
    Complete,
    Unknown,
}

impl MaintenanceState {
    pub fn from_source(raw: &str) -> MaintenanceState {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "new" => MaintenanceState::New,
            "2" | "scheduled" => MaintenanceState::Scheduled,
            "3" | "in progress" | "in-progress" | "implement" => MaintenanceState::InProgress,
            "4" | "complete" | "completed" | "closed" => MaintenanceState::Complete,
            _ => MaintenanceState::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MaintenanceState::New => "new",
            MaintenanceState::Scheduled => "scheduled",
            MaintenanceState::InProgress => "in-progress",
            MaintenanceState::Complete => "complete",
            MaintenanceState::Unknown => "unknown",
        }
    }

    pub fn from_stored(raw: &str) -> MaintenanceState {
        match raw {
            "new" => MaintenanceState::New,
            "scheduled" => MaintenanceState::Scheduled,
            "in-progress" => MaintenanceState::InProgress,
            "complete" => MaintenanceState::Complete,
            _ => MaintenanceState::Unknown,
        }
    }
}

/// Incident classification: whether the incident is client-impacting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Classification {
    ConfirmedCie,
    PotentialCie,
    Normal,
    Unknown,
}

impl Classification {
    pub fn from_source(raw: &str) -> Classification {
        match raw.trim().to_ascii_lowercase().as_str() {
            "21" | "confirmed cie" => Classification::ConfirmedCie,
            "20" | "potential cie" => Classification::PotentialCie,
            "normal" => Classification::Normal,
            _ => Classification::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::ConfirmedCie => "confirmed-cie",
            Classification::PotentialCie => "potential-cie",
            Classification::Normal => "normal",
            Classification::Unknown => "unknown",
        }
    }

    pub fn from_stored(raw: &str) -> Classification {
        match raw {
            "confirmed-cie" => Classification::ConfirmedCie,
            "potential-cie" => Classification::PotentialCie,
            "normal" => Classification::Normal,
            _ => Classification::Unknown,
        }
    }

    /// Only client-impacting classifications qualify for publication
    pub fn is_cie(&self) -> bool {
        matches!(self, Classification::ConfirmedCie | Classification::PotentialCie)
    }
}

/// Incident severity 1 (highest) through 4
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Sev1,
    Sev2,
    Sev3,
    Sev4,
    Unknown,
}

impl Severity {
    pub fn from_source(raw: &str) -> Severity {
        match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "sev - 1" => Severity::Sev1,
            "2" | "sev - 2" => Severity::Sev2,
            "3" | "sev - 3" => Severity::Sev3,
            "4" | "sev - 4" => Severity::Sev4,
            _ => Severity::Unknown,
        }
    }

    /// Stored form; `None` for the unknown sentinel
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Severity::Sev1 => Some(1),
            Severity::Sev2 => Some(2),
            Severity::Sev3 => Some(3),
            Severity::Sev4 => Some(4),
            Severity::Unknown => None,
        }
    }

    pub fn from_stored(raw: Option<i64>) -> Severity {
        match raw {
            Some(1) => Severity::Sev1,
            Some(2) => Severity::Sev2,
            Some(3) => Severity::Sev3,
            Some(4) => Severity::Sev4,
            _ => Severity::Unknown,
        }
    }

    /// Severity 1 and 2 qualify for publication
    pub fn is_publishable(&self) -> bool {
        matches!(self, Severity::Sev1 | Severity::Sev2)
    }
}

/// A materialized incident record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    pub record_id: String,
    pub source: String,
    pub source_id: String,
    pub source_creation_time: Option<DateTime<Utc>>,
    pub source_update_time: Option<DateTime<Utc>>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub short_description: String,
    /// Three-section composite; see the normalizer's long-description builder
    pub long_description: String,
    pub state: IncidentState,
    pub classification: Classification,
    pub severity: Severity,
    pub crns: Vec<Crn>,
    pub audience: Option<String>,
    pub targeted_url: Option<String>,
    pub affected_activity: Option<String>,
    pub customer_impact: Option<String>,
    pub regulatory_domain: Option<String>,
    /// Tombstone flag: row preserved but hidden from public readers
    pub pnp_removed: bool,
}

impl Incident {
    /// An incident is publishable iff severity 1 or 2, a client-impacting
    /// classification, and at least one pipeline-eligible CRN.
    pub fn is_publishable(&self) -> bool {
        self.severity.is_publishable() && self.classification.is_cie() && !self.crns.is_empty()
    }
}

/// A materialized maintenance record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Maintenance {
    pub record_id: String,
    pub source: String,
    pub source_id: String,
    pub source_creation_time: Option<DateTime<Utc>>,
    pub source_update_time: Option<DateTime<Utc>>,
    pub planned_start_time: Option<DateTime<Utc>>,
    pub planned_end_time: Option<DateTime<Utc>>,
    pub short_description: String,
    pub long_description: String,
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
    /// Stable content digest used for no-op update detection
    pub record_hash: String,
    pub pnp_removed: bool,
}

impl Maintenance {
    /// A non-disruptive maintenance is never publishable
    pub fn is_publishable(&self) -> bool {
        self.disruptive && !self.crns.is_empty()
    }

    /// Digest of the content-bearing fields, in a fixed order with a
    /// separator byte between fields. CRNs are sorted so association order
    /// does not change the hash.
    pub fn compute_record_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |part: &str| {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        };
        field(&self.source);
        field(&self.source_id);
        field(&self.short_description);
        field(&self.long_description);
        field(self.state.as_str());
        field(if self.disruptive { "true" } else { "false" });
        field(&opt_time(&self.planned_start_time));
        field(&opt_time(&self.planned_end_time));
        field(self.disruption_type.as_deref().unwrap_or(""));
        field(self.disruption_description.as_deref().unwrap_or(""));
        field(&opt_i64(&self.disruption_duration));
        field(&opt_i64(&self.maintenance_duration));
        field(self.completion_code.as_deref().unwrap_or(""));
        field(self.audience.as_deref().unwrap_or(""));
        field(self.targeted_url.as_deref().unwrap_or(""));
        field(self.regulatory_domain.as_deref().unwrap_or(""));

        let mut crns: Vec<String> = self.crns.iter().map(|c| c.to_string()).collect();
        crns.sort();
        for crn in &crns {
            field(crn);
        }
        format!("{:x}", hasher.finalize())
    }
}

fn opt_time(ts: &Option<DateTime<Utc>>) -> String {
    ts.as_ref().map(to_utc_string).unwrap_or_default()
}

fn opt_i64(value: &Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
