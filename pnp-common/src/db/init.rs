//! Database initialization
//!
//! Creates the connection pool and the schema on first run. All table
//! creation is idempotent (CREATE TABLE IF NOT EXISTS), safe to call on
//! every startup.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize the database connection pool and create tables if needed
pub async fn init_db_pool(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(20)
        .min_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;

    // WAL allows concurrent readers with one writer; the worker pool
    // performs parallel reads against in-flight writes.
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(&pool).await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create all tables this pipeline touches (idempotent)
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_incidents_table(pool).await?;
    create_incident_resources_table(pool).await?;
    create_maintenances_table(pool).await?;
    create_maintenance_resources_table(pool).await?;
    create_resources_table(pool).await?;
    Ok(())
}

/// Incident table. `record_id` is the deterministic hash of
/// `(source, source_id)`; timestamps are stored as fixed-width RFC 3339 UTC
/// strings so SQL string comparison orders them chronologically.
pub async fn create_incidents_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incidents (
            record_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_creation_time TEXT,
            source_update_time TEXT,
            start_time TEXT,
            end_time TEXT,
            short_description TEXT NOT NULL DEFAULT '',
            long_description TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL,
            classification TEXT NOT NULL,
            severity INTEGER,
            audience TEXT,
            targeted_url TEXT,
            affected_activity TEXT,
            customer_impact TEXT,
            regulatory_domain TEXT,
            pnp_removed INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Junction between incidents and the resources they affect
pub async fn create_incident_resources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS incident_resources (
            record_id TEXT NOT NULL REFERENCES incidents(record_id) ON DELETE CASCADE,
            crn TEXT NOT NULL,
            service TEXT NOT NULL,
            location TEXT NOT NULL,
            PRIMARY KEY (record_id, crn)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Maintenance table
pub async fn create_maintenances_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS maintenances (
            record_id TEXT PRIMARY KEY,
            source TEXT NOT NULL,
            source_id TEXT NOT NULL,
            source_creation_time TEXT,
            source_update_time TEXT,
            planned_start_time TEXT,
            planned_end_time TEXT,
            short_description TEXT NOT NULL DEFAULT '',
            long_description TEXT NOT NULL DEFAULT '',
            state TEXT NOT NULL,
            disruptive INTEGER NOT NULL DEFAULT 0,
            disruption_type TEXT,
            disruption_description TEXT,
            disruption_duration INTEGER,
            maintenance_duration INTEGER,
            completion_code TEXT,
            audience TEXT,
            targeted_url TEXT,
            regulatory_domain TEXT,
            record_hash TEXT NOT NULL DEFAULT '',
            pnp_removed INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Junction between maintenances and the resources they affect
pub async fn create_maintenance_resources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS maintenance_resources (
            record_id TEXT NOT NULL REFERENCES maintenances(record_id) ON DELETE CASCADE,
            crn TEXT NOT NULL,
            service TEXT NOT NULL,
            location TEXT NOT NULL,
            PRIMARY KEY (record_id, crn)
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}

/// Resource table. Read-only for this pipeline; owned by the catalog
/// importer elsewhere in the system.
pub async fn create_resources_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS resources (
            crn TEXT PRIMARY KEY,
            service TEXT NOT NULL,
            location TEXT NOT NULL,
            status TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;
    Ok(())
}
