//! Notification intents
//!
//! Maps reconciliation outcomes to the notification intents handed to the
//! downstream emitter. Intents are produced on qualifying transitions only:
//! a first insert, a restore, or an update that changed user-visible fields.
//! Skips and tombstones never notify, and bulk-refresh maintenance events
//! are suppressed entirely.

use crate::reconcile::{Action, IncidentOutcome, MaintenanceOutcome};
use chrono::Utc;
use pnp_common::crn::Crn;
use pnp_common::events::{
    ChangeDescriptor, EventKind, NotificationIntent, NotificationReceiver,
};
use tracing::{debug, info};

/// Decide the notification intent for an incident outcome
pub fn intent_for_incident(outcome: &IncidentOutcome) -> Option<NotificationIntent> {
    let change = match outcome.action {
        Action::Inserted => ChangeDescriptor::Inserted,
        Action::Restored => ChangeDescriptor::Restored,
        Action::Updated => {
            let prior = outcome.prior.as_ref()?;
            fields_changed(
                prior.short_description != outcome.record.short_description,
                prior.state != outcome.record.state,
                crn_set_changed(&prior.crns, &outcome.record.crns),
            )?
        }
        Action::Skipped | Action::Tombstoned => return None,
    };

    Some(NotificationIntent {
        kind: EventKind::Incident,
        record_id: outcome.record.record_id.clone(),
        change,
        crns: outcome.record.crns.clone(),
        timestamp: Utc::now(),
    })
}

/// Decide the notification intent for a maintenance outcome. `bulk` events
/// may still write, but they never notify.
pub fn intent_for_maintenance(
    outcome: &MaintenanceOutcome,
    bulk: bool,
) -> Option<NotificationIntent> {
    if bulk {
        return None;
    }

    let change = match outcome.action {
        Action::Inserted => ChangeDescriptor::Inserted,
        Action::Restored => ChangeDescriptor::Restored,
        Action::Updated => {
            let prior = outcome.prior.as_ref()?;
            fields_changed(
                prior.short_description != outcome.record.short_description,
                prior.state != outcome.record.state,
                crn_set_changed(&prior.crns, &outcome.record.crns),
            )?
        }
        Action::Skipped | Action::Tombstoned => return None,
    };

    Some(NotificationIntent {
        kind: EventKind::Maintenance,
        record_id: outcome.record.record_id.clone(),
        change,
        crns: outcome.record.crns.clone(),
        timestamp: Utc::now(),
    })
}

fn fields_changed(
    short_description: bool,
    state: bool,
    crns: bool,
) -> Option<ChangeDescriptor> {
    if short_description || state || crns {
        Some(ChangeDescriptor::FieldsChanged {
            short_description,
            state,
            crns,
        })
    } else {
        None
    }
}

/// CRN-set comparison is order-insensitive; the junction table has no
/// meaningful row order.
fn crn_set_changed(prior: &[Crn], new: &[Crn]) -> bool {
    let mut a: Vec<String> = prior.iter().map(Crn::to_string).collect();
    let mut b: Vec<String> = new.iter().map(Crn::to_string).collect();
    a.sort();
    b.sort();
    a != b
}

/// Drain task that hands intents to the downstream emitter.
///
/// Runs until every sender is dropped. Emission here is a structured log
/// line; the emitter service consumes the same channel in deployment.
pub async fn run_notification_drain(mut rx: NotificationReceiver) {
    debug!("Notification drain started");

    while let Some(intent) = rx.recv().await {
        info!(
            kind = intent.kind.as_str(),
            record_id = %intent.record_id,
            change = ?intent.change,
            crn_count = intent.crns.len(),
            "Notification intent emitted"
        );
    }

    debug!("Notification drain stopped (all senders dropped)");
}
