//! Incident storage operations

use super::{load_resources, replace_resources, validate_crns, StorageGateway};
use chrono::{DateTime, Utc};
use pnp_common::model::{Classification, Incident, IncidentState, Severity};
use pnp_common::time::{parse_source_timestamp, to_utc_string};
use pnp_common::{Error, Result, ValidationError};
use sqlx::Row;

/// Validate an incident against the closed error set before writing.
///
/// The CRN-list emptiness check is skipped for tombstoned records: an update
/// that removed every resource is stored as a tombstone, not rejected.
pub fn validate_incident(incident: &Incident) -> std::result::Result<(), ValidationError> {
    if incident.source.trim().is_empty() {
        return Err(ValidationError::NoSource);
    }
    if incident.source_id.trim().is_empty() {
        return Err(ValidationError::NoSourceId);
    }
    if !incident.pnp_removed {
        if incident.crns.is_empty() {
            return Err(ValidationError::NoCrn);
        }
        if incident.classification == Classification::Unknown {
            return Err(ValidationError::BadClassification);
        }
    }
    validate_crns(&incident.crns)
}

impl StorageGateway {
    /// Read the prior incident record, if any
    pub async fn read_incident(&self, record_id: &str) -> Result<Option<Incident>> {
        self.with_deadline("read incident", async {
            let row = sqlx::query(
                r#"
                SELECT record_id, source, source_id, source_creation_time,
                       source_update_time, start_time, end_time,
                       short_description, long_description, state,
                       classification, severity, audience, targeted_url,
                       affected_activity, customer_impact, regulatory_domain,
                       pnp_removed
                FROM incidents
                WHERE record_id = ?
                "#,
            )
            .bind(record_id)
            .fetch_optional(self.pool())
            .await?;

            let Some(row) = row else { return Ok(None) };

            let crns = load_resources(self.pool(), "incident_resources", record_id).await?;
            Ok(Some(Incident {
                record_id: row.get("record_id"),
                source: row.get("source"),
                source_id: row.get("source_id"),
                source_creation_time: read_time(&row, "source_creation_time")?,
                source_update_time: read_time(&row, "source_update_time")?,
                start_time: read_time(&row, "start_time")?,
                end_time: read_time(&row, "end_time")?,
                short_description: row.get("short_description"),
                long_description: row.get("long_description"),
                state: IncidentState::from_stored(row.get("state")),
                classification: Classification::from_stored(row.get("classification")),
                severity: Severity::from_stored(row.get("severity")),
                crns,
                audience: row.get("audience"),
                targeted_url: row.get("targeted_url"),
                affected_activity: row.get("affected_activity"),
                customer_impact: row.get("customer_impact"),
                regulatory_domain: row.get("regulatory_domain"),
                pnp_removed: row.get::<i64, _>("pnp_removed") != 0,
            }))
        })
        .await
    }

    /// Insert a new incident. A duplicate record ID is an idempotent no-op;
    /// the return value reports whether a row was actually inserted.
    pub async fn insert_incident(&self, incident: &Incident) -> Result<bool> {
        validate_incident(incident).map_err(Error::Validation)?;
        if self.writes_bypassed("insert incident") {
            return Ok(true);
        }

        self.with_deadline("insert incident", async {
            let mut tx = self.pool().begin().await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO incidents (
                    record_id, source, source_id, source_creation_time,
                    source_update_time, start_time, end_time,
                    short_description, long_description, state,
                    classification, severity, audience, targeted_url,
                    affected_activity, customer_impact, regulatory_domain,
                    pnp_removed
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(record_id) DO NOTHING
                "#,
            )
            .bind(&incident.record_id)
            .bind(&incident.source)
            .bind(&incident.source_id)
            .bind(opt_time(&incident.source_creation_time))
            .bind(opt_time(&incident.source_update_time))
            .bind(opt_time(&incident.start_time))
            .bind(opt_time(&incident.end_time))
            .bind(&incident.short_description)
            .bind(&incident.long_description)
            .bind(incident.state.as_str())
            .bind(incident.classification.as_str())
            .bind(incident.severity.as_i64())
            .bind(&incident.audience)
            .bind(&incident.targeted_url)
            .bind(&incident.affected_activity)
            .bind(&incident.customer_impact)
            .bind(&incident.regulatory_domain)
            .bind(incident.pnp_removed as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if inserted {
                replace_resources(&mut tx, "incident_resources", &incident.record_id, &incident.crns)
                    .await?;
            }
            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }

    /// Update an existing incident under the freshness guard. Returns false
    /// when the guard matched zero rows (a concurrent newer write won);
    /// callers treat that as a skip.
    pub async fn update_incident(&self, incident: &Incident) -> Result<bool> {
        validate_incident(incident).map_err(Error::Validation)?;
        if self.writes_bypassed("update incident") {
            return Ok(true);
        }

        self.with_deadline("update incident", async {
            let mut tx = self.pool().begin().await?;
            let updated = sqlx::query(
                r#"
                UPDATE incidents SET
                    source = ?, source_id = ?, source_creation_time = ?,
                    source_update_time = ?, start_time = ?, end_time = ?,
                    short_description = ?, long_description = ?, state = ?,
                    classification = ?, severity = ?, audience = ?,
                    targeted_url = ?, affected_activity = ?,
                    customer_impact = ?, regulatory_domain = ?,
                    pnp_removed = ?, updated_at = CURRENT_TIMESTAMP
                WHERE record_id = ?
                  AND (source_update_time IS NULL OR source_update_time < ?)
                "#,
            )
            .bind(&incident.source)
            .bind(&incident.source_id)
            .bind(opt_time(&incident.source_creation_time))
            .bind(opt_time(&incident.source_update_time))
            .bind(opt_time(&incident.start_time))
            .bind(opt_time(&incident.end_time))
            .bind(&incident.short_description)
            .bind(&incident.long_description)
            .bind(incident.state.as_str())
            .bind(incident.classification.as_str())
            .bind(incident.severity.as_i64())
            .bind(&incident.audience)
            .bind(&incident.targeted_url)
            .bind(&incident.affected_activity)
            .bind(&incident.customer_impact)
            .bind(&incident.regulatory_domain)
            .bind(incident.pnp_removed as i64)
            .bind(&incident.record_id)
            .bind(opt_time(&incident.source_update_time))
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if updated {
                replace_resources(&mut tx, "incident_resources", &incident.record_id, &incident.crns)
                    .await?;
            }
            tx.commit().await?;
            Ok(updated)
        })
        .await
    }
}

pub(crate) fn opt_time(ts: &Option<DateTime<Utc>>) -> Option<String> {
    ts.as_ref().map(to_utc_string)
}

pub(crate) fn read_time(
    row: &sqlx::sqlite::SqliteRow,
    column: &str,
) -> Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(column);
    match raw {
        None => Ok(None),
        Some(s) => parse_source_timestamp(&s)
            .map(Some)
            .map_err(|e| Error::Internal(format!("stored timestamp in '{column}': {e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pnp_common::crn::Crn;
    use pnp_common::db::create_schema;
    use pnp_common::ids::record_id;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn gateway() -> StorageGateway {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("Failed to create in-memory database");
        create_schema(&pool).await.unwrap();
        StorageGateway::new(pool, Duration::from_secs(30), false)
    }

    fn sample(update_time: &str) -> Incident {
        Incident {
            record_id: record_id("servicenow", "INC0012345"),
            source: "servicenow".into(),
            source_id: "INC0012345".into(),
            source_creation_time: None,
            source_update_time: Some(parse_source_timestamp(update_time).unwrap()),
            start_time: None,
            end_time: None,
            short_description: "Elevated error rates".into(),
            long_description: String::new(),
            state: IncidentState::New,
            classification: Classification::ConfirmedCie,
            severity: Severity::Sev1,
            crns: vec![Crn::parse("crn:v1:pubcloud:public:cloudant:us-south::::").unwrap()],
            audience: None,
            targeted_url: None,
            affected_activity: None,
            customer_impact: None,
            regulatory_domain: None,
            pnp_removed: false,
        }
    }

    #[tokio::test]
    async fn insert_then_read_round_trips() {
        let gateway = gateway().await;
        let incident = sample("2024-01-01 00:00:00");

        assert!(gateway.insert_incident(&incident).await.unwrap());
        let loaded = gateway
            .read_incident(&incident.record_id)
            .await
            .unwrap()
            .expect("record should exist");

        assert_eq!(loaded, incident);
    }

    #[tokio::test]
    async fn duplicate_insert_is_a_no_op() {
        let gateway = gateway().await;
        let incident = sample("2024-01-01 00:00:00");

        assert!(gateway.insert_incident(&incident).await.unwrap());
        assert!(!gateway.insert_incident(&incident).await.unwrap());
    }

    #[tokio::test]
    async fn stale_update_matches_zero_rows() {
        let gateway = gateway().await;
        let incident = sample("2024-01-01 00:00:01");
        gateway.insert_incident(&incident).await.unwrap();

        let stale = sample("2024-01-01 00:00:00");
        assert!(!gateway.update_incident(&stale).await.unwrap());

        let newer = sample("2024-01-01 00:00:02");
        assert!(gateway.update_incident(&newer).await.unwrap());
    }

    #[tokio::test]
    async fn update_replaces_resource_associations() {
        let gateway = gateway().await;
        let incident = sample("2024-01-01 00:00:00");
        gateway.insert_incident(&incident).await.unwrap();

        let mut newer = sample("2024-01-01 00:00:05");
        newer.crns = vec![Crn::parse("crn:v1:pubcloud:public:cloudant:eu-gb::::").unwrap()];
        gateway.update_incident(&newer).await.unwrap();

        let loaded = gateway
            .read_incident(&incident.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.crns.len(), 1);
        assert_eq!(loaded.crns[0].location, "eu-gb");
    }

    #[tokio::test]
    async fn validation_rejects_missing_source() {
        let gateway = gateway().await;
        let mut incident = sample("2024-01-01 00:00:00");
        incident.source = String::new();
        let err = gateway.insert_incident(&incident).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::NoSource)
        ));
    }

    #[tokio::test]
    async fn tombstone_with_no_crns_is_storable() {
        let gateway = gateway().await;
        let incident = sample("2024-01-01 00:00:00");
        gateway.insert_incident(&incident).await.unwrap();

        let mut tombstone = sample("2024-01-01 00:00:10");
        tombstone.crns.clear();
        tombstone.pnp_removed = true;
        assert!(gateway.update_incident(&tombstone).await.unwrap());

        let loaded = gateway
            .read_incident(&incident.record_id)
            .await
            .unwrap()
            .unwrap();
        assert!(loaded.pnp_removed);
        assert!(loaded.crns.is_empty());
    }

    #[tokio::test]
    async fn bypass_skips_writes() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        create_schema(&pool).await.unwrap();
        let gateway = StorageGateway::new(pool, Duration::from_secs(30), true);

        let incident = sample("2024-01-01 00:00:00");
        assert!(gateway.insert_incident(&incident).await.unwrap());
        assert!(gateway
            .read_incident(&incident.record_id)
            .await
            .unwrap()
            .is_none());
    }
}
