//! Reconciler: canonical event against prior stored state
//!
//! Decides, per event, whether the store gains a row, an existing row is
//! rewritten, tombstoned, or restored, or nothing happens at all. Ordering
//! is enforced twice: a freshness check against the prior row here, and the
//! conditional guard inside the storage gateway for the write itself. A
//! write that loses the guard race is reported as a skip, so replaying the
//! same event stream in any arrival order converges on the same rows.

pub mod incident;
pub mod maintenance;

pub use incident::{reconcile_incident, IncidentOutcome};
pub use maintenance::{reconcile_maintenance, MaintenanceOutcome};

use chrono::{DateTime, Utc};

/// What the reconciler did with an event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Inserted,
    Updated,
    Skipped,
    Tombstoned,
    Restored,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Inserted => "inserted",
            Action::Updated => "updated",
            Action::Skipped => "skipped",
            Action::Tombstoned => "tombstoned",
            Action::Restored => "restored",
        }
    }
}

/// An event may rewrite a row only when it is strictly newer than the row.
/// An event with no update time cannot be ordered against existing state,
/// so it never overwrites.
pub(crate) fn is_fresher(
    event_time: Option<DateTime<Utc>>,
    prior_time: Option<DateTime<Utc>>,
) -> bool {
    match (event_time, prior_time) {
        (None, _) => false,
        (Some(_), None) => true,
        (Some(event), Some(prior)) => event > prior,
    }
}
