//! Core types and pipeline for the diversion facility metrics engine.

/// Facility metrics and their county and state rollups.
pub mod aggregate;
/// Configuration values passed into every component.
pub mod config;
/// Derived metric rows and the aggregate report.
pub mod metrics;
/// Domain models for facilities and raw source rows.
pub mod model;
/// Raw row canonicalization and the material rename chain.
pub mod normalize;
/// Traits describing the source and sink interfaces.
pub mod ports;
/// Registry routing published layers to sinks.
pub mod registry;
/// High-level service facade used by clients.
pub mod service;
/// Year-over-year validation.
pub mod validate;

pub use aggregate::{
    aggregate, county_summaries, deduplicate, facility_metrics, material_shares, state_summary,
};
pub use config::*;
pub use metrics::*;
pub use model::*;
pub use normalize::*;
pub use ports::*;
pub use registry::*;
pub use service::*;
pub use validate::*;
