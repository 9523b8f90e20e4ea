//! Incident reconciliation

use super::{is_fresher, Action};
use crate::db::StorageGateway;
use crate::normalize::{build_long_description, merge_long_description, IncidentEvent};
use pnp_common::model::{Classification, Incident, Severity};
use pnp_common::Result;
use tracing::debug;

/// The reconciler's decision for one incident event. `record` is the merged
/// candidate; on a skip it was never written.
#[derive(Debug, Clone)]
pub struct IncidentOutcome {
    pub action: Action,
    pub prior: Option<Incident>,
    pub record: Incident,
}

/// Reconcile a canonical incident event against stored state
pub async fn reconcile_incident(
    gateway: &StorageGateway,
    event: &IncidentEvent,
) -> Result<IncidentOutcome> {
    let prior = gateway.read_incident(&event.record_id).await?;

    if let Some(prior_record) = &prior {
        if !is_fresher(event.source_update_time, prior_record.source_update_time) {
            debug!(record_id = %event.record_id, "Incident event is not newer than stored state");
            let record = merge_event(event, Some(prior_record));
            return Ok(IncidentOutcome {
                action: Action::Skipped,
                prior,
                record,
            });
        }
    }

    let mut record = merge_event(event, prior.as_ref());

    let action = match &prior {
        None => {
            if !record.is_publishable() {
                // Nothing stored and nothing worth storing
                Action::Skipped
            } else if gateway.insert_incident(&record).await? {
                Action::Inserted
            } else {
                // Another worker inserted the same record first
                Action::Skipped
            }
        }
        Some(prior_record) => {
            if !record.is_publishable() {
                record.pnp_removed = true;
                if gateway.update_incident(&record).await? {
                    Action::Tombstoned
                } else {
                    Action::Skipped
                }
            } else if prior_record.pnp_removed {
                record.pnp_removed = false;
                if gateway.update_incident(&record).await? {
                    Action::Restored
                } else {
                    Action::Skipped
                }
            } else if gateway.update_incident(&record).await? {
                Action::Updated
            } else {
                Action::Skipped
            }
        }
    };

    Ok(IncidentOutcome {
        action,
        prior,
        record,
    })
}

/// Merge an event over the prior row. Fields the event did not provide
/// inherit the prior value; unknown classification and severity sentinels
/// also inherit so a partial update cannot demote a record it never
/// mentioned.
fn merge_event(event: &IncidentEvent, prior: Option<&Incident>) -> Incident {
    let description = event.short_description.as_deref().unwrap_or("");
    let status = event.current_status.as_deref().unwrap_or("");
    let impact = event.customer_impact.as_deref().unwrap_or("");
    let long_description = match prior {
        Some(p) => merge_long_description(description, status, impact, &p.long_description),
        None => build_long_description(description, status, impact),
    };

    let inherit = |new: &Option<String>, old: fn(&Incident) -> Option<String>| {
        new.clone().or_else(|| prior.and_then(old))
    };

    let classification = match (event.classification, prior) {
        (Classification::Unknown, Some(p)) => p.classification,
        (c, _) => c,
    };
    let severity = match (event.severity, prior) {
        (Severity::Unknown, Some(p)) => p.severity,
        (s, _) => s,
    };

    Incident {
        record_id: event.record_id.clone(),
        source: event.source.clone(),
        source_id: event.source_id.clone(),
        source_creation_time: event
            .source_creation_time
            .or_else(|| prior.and_then(|p| p.source_creation_time)),
        source_update_time: event.source_update_time,
        start_time: event.start_time.or_else(|| prior.and_then(|p| p.start_time)),
        end_time: event.end_time.or_else(|| prior.and_then(|p| p.end_time)),
        short_description: event
            .short_description
            .clone()
            .or_else(|| prior.map(|p| p.short_description.clone()))
            .unwrap_or_default(),
        long_description,
        state: event.state,
        classification,
        severity,
        crns: event.crns.clone(),
        audience: inherit(&event.audience, |p| p.audience.clone()),
        targeted_url: inherit(&event.targeted_url, |p| p.targeted_url.clone()),
        affected_activity: inherit(&event.affected_activity, |p| p.affected_activity.clone()),
        customer_impact: inherit(&event.customer_impact, |p| p.customer_impact.clone()),
        regulatory_domain: inherit(&event.regulatory_domain, |p| p.regulatory_domain.clone()),
        pnp_removed: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use pnp_common::crn::Crn;
    use pnp_common::db::create_schema;
    use pnp_common::ids::record_id;
    use pnp_common::model::IncidentState;
    use pnp_common::time::parse_source_timestamp;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn gateway() -> StorageGateway {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        StorageGateway::new(pool, Duration::from_secs(30), false)
    }

    fn ts(raw: &str) -> Option<DateTime<Utc>> {
        Some(parse_source_timestamp(raw).unwrap())
    }

    fn event(update_time: &str) -> IncidentEvent {
        IncidentEvent {
            record_id: record_id("servicenow", "INC0012345"),
            source: "servicenow".into(),
            source_id: "INC0012345".into(),
            source_creation_time: ts("2024-01-01 00:00:00"),
            source_update_time: ts(update_time),
            start_time: None,
            end_time: None,
            short_description: Some("Elevated error rates".into()),
            current_status: Some("Investigating".into()),
            customer_impact: Some("Requests may fail".into()),
            state: IncidentState::New,
            classification: Classification::ConfirmedCie,
            severity: Severity::Sev1,
            crns: vec![Crn::parse("crn:v1:pubcloud:public:cloudant:us-south::::").unwrap()],
            audience: Some("public".into()),
            targeted_url: None,
            affected_activity: None,
            regulatory_domain: None,
        }
    }

    #[tokio::test]
    async fn fresh_publishable_event_inserts() {
        let gateway = gateway().await;
        let outcome = reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();
        assert_eq!(outcome.action, Action::Inserted);
        assert!(outcome.prior.is_none());
        assert!(!outcome.record.pnp_removed);

        let stored = gateway
            .read_incident(&outcome.record.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.short_description, "Elevated error rates");
    }

    #[tokio::test]
    async fn unpublishable_event_with_no_prior_skips() {
        let gateway = gateway().await;
        let mut sev3 = event("2024-01-02 00:00:00");
        sev3.severity = Severity::Sev3;
        let outcome = reconcile_incident(&gateway, &sev3).await.unwrap();
        assert_eq!(outcome.action, Action::Skipped);
        assert!(gateway
            .read_incident(&sev3.record_id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn stale_event_skips_without_writing() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();

        let mut stale = event("2024-01-01 12:00:00");
        stale.short_description = Some("should not land".into());
        let outcome = reconcile_incident(&gateway, &stale).await.unwrap();
        assert_eq!(outcome.action, Action::Skipped);

        let stored = gateway
            .read_incident(&stale.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.short_description, "Elevated error rates");
    }

    #[tokio::test]
    async fn event_without_update_time_never_overwrites() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();

        let mut unordered = event("2024-01-03 00:00:00");
        unordered.source_update_time = None;
        let outcome = reconcile_incident(&gateway, &unordered).await.unwrap();
        assert_eq!(outcome.action, Action::Skipped);
    }

    #[tokio::test]
    async fn downgrade_tombstones_the_record() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();

        let mut downgraded = event("2024-01-03 00:00:00");
        downgraded.severity = Severity::Sev3;
        let outcome = reconcile_incident(&gateway, &downgraded).await.unwrap();
        assert_eq!(outcome.action, Action::Tombstoned);

        let stored = gateway
            .read_incident(&downgraded.record_id)
            .await
            .unwrap()
            .unwrap();
        assert!(stored.pnp_removed);
    }

    #[tokio::test]
    async fn requalifying_event_restores_a_tombstone() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();
        let mut downgraded = event("2024-01-03 00:00:00");
        downgraded.severity = Severity::Sev3;
        reconcile_incident(&gateway, &downgraded).await.unwrap();

        let requalified = event("2024-01-04 00:00:00");
        let outcome = reconcile_incident(&gateway, &requalified).await.unwrap();
        assert_eq!(outcome.action, Action::Restored);

        let stored = gateway
            .read_incident(&requalified.record_id)
            .await
            .unwrap()
            .unwrap();
        assert!(!stored.pnp_removed);
    }

    #[tokio::test]
    async fn empty_crn_list_tombstones_an_existing_record() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();

        let mut no_crns = event("2024-01-03 00:00:00");
        no_crns.crns.clear();
        let outcome = reconcile_incident(&gateway, &no_crns).await.unwrap();
        assert_eq!(outcome.action, Action::Tombstoned);
    }

    #[tokio::test]
    async fn partial_update_inherits_prior_fields() {
        let gateway = gateway().await;
        reconcile_incident(&gateway, &event("2024-01-02 00:00:00"))
            .await
            .unwrap();

        let mut partial = event("2024-01-03 00:00:00");
        partial.short_description = None;
        partial.customer_impact = None;
        partial.audience = None;
        partial.current_status = Some("Mitigated".into());
        partial.classification = Classification::Unknown;
        partial.severity = Severity::Unknown;
        let outcome = reconcile_incident(&gateway, &partial).await.unwrap();
        assert_eq!(outcome.action, Action::Updated);

        let stored = gateway
            .read_incident(&partial.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.short_description, "Elevated error rates");
        assert_eq!(stored.audience.as_deref(), Some("public"));
        assert_eq!(stored.classification, Classification::ConfirmedCie);
        assert_eq!(stored.severity, Severity::Sev1);

        let (description, status, impact) =
            crate::normalize::split_long_description(&stored.long_description);
        assert_eq!(description, "Elevated error rates");
        assert_eq!(status, "Mitigated");
        assert_eq!(impact, "Requests may fail");
    }

    #[tokio::test]
    async fn replay_in_any_order_converges() {
        let gateway_a = gateway().await;
        let gateway_b = gateway().await;

        let first = event("2024-01-02 00:00:00");
        let mut second = event("2024-01-03 00:00:00");
        second.current_status = Some("Mitigated".into());

        reconcile_incident(&gateway_a, &first).await.unwrap();
        reconcile_incident(&gateway_a, &second).await.unwrap();

        reconcile_incident(&gateway_b, &second).await.unwrap();
        reconcile_incident(&gateway_b, &first).await.unwrap();

        let a = gateway_a
            .read_incident(&first.record_id)
            .await
            .unwrap()
            .unwrap();
        let b = gateway_b
            .read_incident(&first.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(a.source_update_time, second.source_update_time);
    }
}
