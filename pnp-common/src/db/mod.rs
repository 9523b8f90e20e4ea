//! Database module
//!
//! Pool initialization and schema creation for the PnP operational store.
//! Only the four tables this pipeline touches are created here: incidents,
//! maintenances, their resource-association junctions, and the read-only
//! resources table.

pub mod init;

pub use init::{create_schema, init_db_pool};
