//! # PnP Common Library
//!
//! Shared code for the PnP event materialization pipeline including:
//! - Error taxonomy and the closed validation-error set
//! - CRN (Cloud Resource Name) parsing and normalization
//! - Deterministic record identifiers
//! - Source timestamp grammar
//! - Materialized record models (incidents, maintenances)
//! - Notification intent types
//! - Database pool initialization and schema

pub mod crn;
pub mod db;
pub mod error;
pub mod events;
pub mod ids;
pub mod model;
pub mod time;

pub use crn::Crn;
pub use error::{Error, Result, ValidationError};
