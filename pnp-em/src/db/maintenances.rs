//! Maintenance storage operations

use super::incidents::{opt_time, read_time};
use super::{load_resources, replace_resources, validate_crns, StorageGateway};
use pnp_common::model::{Maintenance, MaintenanceState};
use pnp_common::{Error, Result, ValidationError};
use sqlx::Row;

/// Validate a maintenance against the closed error set before writing.
/// Same tombstone carve-out as incidents: an empty CRN list and an unknown
/// state are only rejected for records that remain visible.
pub fn validate_maintenance(maintenance: &Maintenance) -> std::result::Result<(), ValidationError> {
    if maintenance.source.trim().is_empty() {
        return Err(ValidationError::NoSource);
    }
    if maintenance.source_id.trim().is_empty() {
        return Err(ValidationError::NoSourceId);
    }
    if !maintenance.pnp_removed {
        if maintenance.crns.is_empty() {
            return Err(ValidationError::NoCrn);
        }
        if maintenance.state == MaintenanceState::Unknown {
            return Err(ValidationError::BadState);
        }
    }
    validate_crns(&maintenance.crns)
}

impl StorageGateway {
    /// Read the prior maintenance record, if any
    pub async fn read_maintenance(&self, record_id: &str) -> Result<Option<Maintenance>> {
        self.with_deadline("read maintenance", async {
            let row = sqlx::query(
                r#"
                SELECT record_id, source, source_id, source_creation_time,
                       source_update_time, planned_start_time, planned_end_time,
                       short_description, long_description, state, disruptive,
                       disruption_type, disruption_description,
                       disruption_duration, maintenance_duration,
                       completion_code, audience, targeted_url,
                       regulatory_domain, record_hash, pnp_removed
                FROM maintenances
                WHERE record_id = ?
                "#,
            )
            .bind(record_id)
            .fetch_optional(self.pool())
            .await?;

            let Some(row) = row else { return Ok(None) };

            let crns = load_resources(self.pool(), "maintenance_resources", record_id).await?;
            Ok(Some(Maintenance {
                record_id: row.get("record_id"),
                source: row.get("source"),
                source_id: row.get("source_id"),
                source_creation_time: read_time(&row, "source_creation_time")?,
                source_update_time: read_time(&row, "source_update_time")?,
                planned_start_time: read_time(&row, "planned_start_time")?,
                planned_end_time: read_time(&row, "planned_end_time")?,
                short_description: row.get("short_description"),
                long_description: row.get("long_description"),
                state: MaintenanceState::from_stored(row.get("state")),
                disruptive: row.get::<i64, _>("disruptive") != 0,
                crns,
                disruption_type: row.get("disruption_type"),
                disruption_description: row.get("disruption_description"),
                disruption_duration: row.get("disruption_duration"),
                maintenance_duration: row.get("maintenance_duration"),
                completion_code: row.get("completion_code"),
                audience: row.get("audience"),
                targeted_url: row.get("targeted_url"),
                regulatory_domain: row.get("regulatory_domain"),
                record_hash: row.get("record_hash"),
                pnp_removed: row.get::<i64, _>("pnp_removed") != 0,
            }))
        })
        .await
    }

    /// Insert a new maintenance. A duplicate record ID is an idempotent
    /// no-op; the return value reports whether a row was actually inserted.
    pub async fn insert_maintenance(&self, maintenance: &Maintenance) -> Result<bool> {
        validate_maintenance(maintenance).map_err(Error::Validation)?;
        if self.writes_bypassed("insert maintenance") {
            return Ok(true);
        }

        self.with_deadline("insert maintenance", async {
            let mut tx = self.pool().begin().await?;
            let inserted = sqlx::query(
                r#"
                INSERT INTO maintenances (
                    record_id, source, source_id, source_creation_time,
                    source_update_time, planned_start_time, planned_end_time,
                    short_description, long_description, state, disruptive,
                    disruption_type, disruption_description,
                    disruption_duration, maintenance_duration,
                    completion_code, audience, targeted_url,
                    regulatory_domain, record_hash, pnp_removed
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(record_id) DO NOTHING
                "#,
            )
            .bind(&maintenance.record_id)
            .bind(&maintenance.source)
            .bind(&maintenance.source_id)
            .bind(opt_time(&maintenance.source_creation_time))
            .bind(opt_time(&maintenance.source_update_time))
            .bind(opt_time(&maintenance.planned_start_time))
            .bind(opt_time(&maintenance.planned_end_time))
            .bind(&maintenance.short_description)
            .bind(&maintenance.long_description)
            .bind(maintenance.state.as_str())
            .bind(maintenance.disruptive as i64)
            .bind(&maintenance.disruption_type)
            .bind(&maintenance.disruption_description)
            .bind(maintenance.disruption_duration)
            .bind(maintenance.maintenance_duration)
            .bind(&maintenance.completion_code)
            .bind(&maintenance.audience)
            .bind(&maintenance.targeted_url)
            .bind(&maintenance.regulatory_domain)
            .bind(&maintenance.record_hash)
            .bind(maintenance.pnp_removed as i64)
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if inserted {
                replace_resources(
                    &mut tx,
                    "maintenance_resources",
                    &maintenance.record_id,
                    &maintenance.crns,
                )
                .await?;
            }
            tx.commit().await?;
            Ok(inserted)
        })
        .await
    }

    /// Update an existing maintenance under the freshness guard
    pub async fn update_maintenance(&self, maintenance: &Maintenance) -> Result<bool> {
        validate_maintenance(maintenance).map_err(Error::Validation)?;
        if self.writes_bypassed("update maintenance") {
            return Ok(true);
        }

        self.with_deadline("update maintenance", async {
            let mut tx = self.pool().begin().await?;
            let updated = sqlx::query(
                r#"
                UPDATE maintenances SET
                    source = ?, source_id = ?, source_creation_time = ?,
                    source_update_time = ?, planned_start_time = ?,
                    planned_end_time = ?, short_description = ?,
                    long_description = ?, state = ?, disruptive = ?,
                    disruption_type = ?, disruption_description = ?,
                    disruption_duration = ?, maintenance_duration = ?,
                    completion_code = ?, audience = ?, targeted_url = ?,
                    regulatory_domain = ?, record_hash = ?, pnp_removed = ?,
                    updated_at = CURRENT_TIMESTAMP
                WHERE record_id = ?
                  AND (source_update_time IS NULL OR source_update_time < ?)
                "#,
            )
            .bind(&maintenance.source)
            .bind(&maintenance.source_id)
            .bind(opt_time(&maintenance.source_creation_time))
            .bind(opt_time(&maintenance.source_update_time))
            .bind(opt_time(&maintenance.planned_start_time))
            .bind(opt_time(&maintenance.planned_end_time))
            .bind(&maintenance.short_description)
            .bind(&maintenance.long_description)
            .bind(maintenance.state.as_str())
            .bind(maintenance.disruptive as i64)
            .bind(&maintenance.disruption_type)
            .bind(&maintenance.disruption_description)
            .bind(maintenance.disruption_duration)
            .bind(maintenance.maintenance_duration)
            .bind(&maintenance.completion_code)
            .bind(&maintenance.audience)
            .bind(&maintenance.targeted_url)
            .bind(&maintenance.regulatory_domain)
            .bind(&maintenance.record_hash)
            .bind(maintenance.pnp_removed as i64)
            .bind(&maintenance.record_id)
            .bind(opt_time(&maintenance.source_update_time))
            .execute(&mut *tx)
            .await?
            .rows_affected()
                > 0;

            if updated {
                replace_resources(
                    &mut tx,
                    "maintenance_resources",
                    &maintenance.record_id,
                    &maintenance.crns,
                )
                .await?;
            }
            tx.commit().await?;
            Ok(updated)
        })
        .await
    }
}
