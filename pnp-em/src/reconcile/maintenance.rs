//! Maintenance reconciliation
//!
//! Same state machine as incidents, plus a content-hash comparison: bulk
//! refreshes replay every open maintenance with fresh update times, so an
//! event whose merged content hashes identically to the stored row is a
//! skip even when it passes the freshness check.

use super::{is_fresher, Action};
use crate::db::StorageGateway;
use crate::normalize::{build_long_description, merge_long_description, MaintenanceEvent};
use pnp_common::model::Maintenance;
use pnp_common::Result;
use tracing::debug;

/// The reconciler's decision for one maintenance event
#[derive(Debug, Clone)]
pub struct MaintenanceOutcome {
    pub action: Action,
    pub prior: Option<Maintenance>,
    pub record: Maintenance,
}

/// Reconcile a canonical maintenance event against stored state
pub async fn reconcile_maintenance(
    gateway: &StorageGateway,
    event: &MaintenanceEvent,
) -> Result<MaintenanceOutcome> {
    let prior = gateway.read_maintenance(&event.record_id).await?;

    if let Some(prior_record) = &prior {
        if !is_fresher(event.source_update_time, prior_record.source_update_time) {
            debug!(record_id = %event.record_id, "Maintenance event is not newer than stored state");
            let record = merge_event(event, Some(prior_record));
            return Ok(MaintenanceOutcome {
                action: Action::Skipped,
                prior,
                record,
            });
        }
    }

    let mut record = merge_event(event, prior.as_ref());

    if let Some(prior_record) = &prior {
        if record.record_hash == prior_record.record_hash && !prior_record.pnp_removed {
            debug!(record_id = %event.record_id, "Maintenance content unchanged, skipping");
            return Ok(MaintenanceOutcome {
                action: Action::Skipped,
                prior,
                record,
            });
        }
    }

    let action = match &prior {
        None => {
            if !record.is_publishable() {
                Action::Skipped
            } else if gateway.insert_maintenance(&record).await? {
                Action::Inserted
            } else {
                Action::Skipped
            }
        }
        Some(prior_record) => {
            if !record.is_publishable() {
                record.pnp_removed = true;
                if gateway.update_maintenance(&record).await? {
                    Action::Tombstoned
                } else {
                    Action::Skipped
                }
            } else if prior_record.pnp_removed {
                record.pnp_removed = false;
                if gateway.update_maintenance(&record).await? {
                    Action::Restored
                } else {
                    Action::Skipped
                }
            } else if gateway.update_maintenance(&record).await? {
                Action::Updated
            } else {
                Action::Skipped
            }
        }
    };

    Ok(MaintenanceOutcome {
        action,
        prior,
        record,
    })
}

/// Merge an event over the prior row, then stamp the content hash of the
/// merged result
fn merge_event(event: &MaintenanceEvent, prior: Option<&Maintenance>) -> Maintenance {
    let description = event.short_description.as_deref().unwrap_or("");
    let status = event.current_status.as_deref().unwrap_or("");
    let impact = event.customer_impact.as_deref().unwrap_or("");
    let long_description = match prior {
        Some(p) => merge_long_description(description, status, impact, &p.long_description),
        None => build_long_description(description, status, impact),
    };

    let inherit = |new: &Option<String>, old: fn(&Maintenance) -> Option<String>| {
        new.clone().or_else(|| prior.and_then(old))
    };

    let mut record = Maintenance {
        record_id: event.record_id.clone(),
        source: event.source.clone(),
        source_id: event.source_id.clone(),
        source_creation_time: event
            .source_creation_time
            .or_else(|| prior.and_then(|p| p.source_creation_time)),
        source_update_time: event.source_update_time,
        planned_start_time: event
            .planned_start_time
            .or_else(|| prior.and_then(|p| p.planned_start_time)),
        planned_end_time: event
            .planned_end_time
            .or_else(|| prior.and_then(|p| p.planned_end_time)),
        short_description: event
            .short_description
            .clone()
            .or_else(|| prior.map(|p| p.short_description.clone()))
            .unwrap_or_default(),
        long_description,
        state: event.state,
        disruptive: event.disruptive,
        crns: event.crns.clone(),
        disruption_type: inherit(&event.disruption_type, |p| p.disruption_type.clone()),
        disruption_description: inherit(&event.disruption_description, |p| {
            p.disruption_description.clone()
        }),
        disruption_duration: event
            .disruption_duration
            .or_else(|| prior.and_then(|p| p.disruption_duration)),
        maintenance_duration: event
            .maintenance_duration
            .or_else(|| prior.and_then(|p| p.maintenance_duration)),
        completion_code: inherit(&event.completion_code, |p| p.completion_code.clone()),
        audience: inherit(&event.audience, |p| p.audience.clone()),
        targeted_url: inherit(&event.targeted_url, |p| p.targeted_url.clone()),
        regulatory_domain: inherit(&event.regulatory_domain, |p| p.regulatory_domain.clone()),
        record_hash: String::new(),
        pnp_removed: false,
    };
    record.record_hash = record.compute_record_hash();
    record
}
