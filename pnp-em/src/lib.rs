//! pnp-em - Event Materializer
//!
//! Consumes heterogeneous change-events from the message bus, decrypts them,
//! normalizes them into canonical incident and maintenance records,
//! reconciles each against prior state in the relational store, and decides
//! whether to insert, update, skip, tombstone, or restore.
//!
//! # Architecture
//! - **Decoder**: decrypt + parse into a generic attribute map
//! - **Normalizer**: source codes to canonical enumerations, CRN cleanup
//! - **Reconciler**: per-record state machine against prior stored state
//! - **Storage gateway**: idempotent writes with a conditional-guard UPDATE
//! - **Retry controller**: unbounded retry for transient faults, immediate
//!   abort for malformed input and validation rejections
//! - **Notification emitter**: side-effect intents on qualifying transitions
//!
//! Workers never share mutable state except through the database and the
//! catalog client's internal cache.

pub mod catalog;
pub mod config;
pub mod db;
pub mod decoder;
pub mod error;
pub mod normalize;
pub mod notify;
pub mod reconcile;
pub mod retry;
pub mod worker;

pub use error::{ErrorTag, PipelineError};
