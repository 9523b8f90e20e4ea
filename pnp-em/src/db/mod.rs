//! Storage gateway
//!
//! Idempotent insert/update against the relational store. Validation errors
//! (the closed set in `pnp_common::ValidationError`) are permanent and never
//! retried; everything else surfaced from sqlx is transient. Every call
//! carries a deadline.
//!
//! Updates use a conditional guard on `source_update_time` so that two
//! workers processing events for the same record cannot produce a lost
//! update: the stale write matches zero rows and is treated as a skip.

pub mod incidents;
pub mod maintenances;

use pnp_common::crn::Crn;
use pnp_common::{Error, Result, ValidationError};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Gateway over the four core tables
#[derive(Clone)]
pub struct StorageGateway {
    pool: SqlitePool,
    deadline: Duration,
    bypass_writes: bool,
}

impl StorageGateway {
    pub fn new(pool: SqlitePool, deadline: Duration, bypass_writes: bool) -> StorageGateway {
        StorageGateway {
            pool,
            deadline,
            bypass_writes,
        }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Whether writes are disabled (`BYPASS_LOCAL_STORAGE=true` test hook)
    pub(crate) fn writes_bypassed(&self, operation: &str) -> bool {
        if self.bypass_writes {
            debug!(operation, "Local storage bypassed, skipping write");
        }
        self.bypass_writes
    }

    /// Run a storage operation under the configured deadline.
    /// A timeout is a transient error.
    pub(crate) async fn with_deadline<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout(format!(
                "storage operation '{operation}' exceeded {:?}",
                self.deadline
            ))),
        }
    }
}

/// Per-CRN field validation shared by both record kinds
pub(crate) fn validate_crns(crns: &[Crn]) -> std::result::Result<(), ValidationError> {
    for crn in crns {
        if crn.version.is_empty() {
            return Err(ValidationError::NoCrnVersion);
        }
        if crn.cname.is_empty() {
            return Err(ValidationError::NoCname);
        }
        if crn.ctype.is_empty() {
            return Err(ValidationError::NoCtype);
        }
        if crn.service.is_empty() {
            return Err(ValidationError::NoService);
        }
        if crn.location.is_empty() {
            return Err(ValidationError::NoLocation);
        }
        let segments = [
            &crn.version,
            &crn.cname,
            &crn.ctype,
            &crn.service,
            &crn.location,
            &crn.scope,
            &crn.instance,
            &crn.resource_type,
            &crn.resource,
        ];
        if segments.iter().any(|s| s.chars().any(char::is_whitespace)) {
            return Err(ValidationError::BadCrnFormat);
        }
    }
    Ok(())
}

/// Replace the resource-association rows for one record
pub(crate) async fn replace_resources(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    record_id: &str,
    crns: &[Crn],
) -> Result<()> {
    sqlx::query(&format!("DELETE FROM {table} WHERE record_id = ?"))
        .bind(record_id)
        .execute(&mut **tx)
        .await?;

    for crn in crns {
        sqlx::query(&format!(
            "INSERT INTO {table} (record_id, crn, service, location) VALUES (?, ?, ?, ?)"
        ))
        .bind(record_id)
        .bind(crn.to_string())
        .bind(&crn.service)
        .bind(&crn.location)
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

/// Load the CRN list for one record from its junction table
pub(crate) async fn load_resources(
    pool: &SqlitePool,
    table: &str,
    record_id: &str,
) -> Result<Vec<Crn>> {
    use sqlx::Row;
    let rows = sqlx::query(&format!(
        "SELECT crn FROM {table} WHERE record_id = ? ORDER BY crn"
    ))
    .bind(record_id)
    .fetch_all(pool)
    .await?;

    let mut crns = Vec::with_capacity(rows.len());
    for row in rows {
        let raw: String = row.get("crn");
        let crn = Crn::parse(&raw)
            .map_err(|e| Error::Internal(format!("stored CRN failed to parse: {e}")))?;
        crns.push(crn);
    }
    Ok(crns)
}
