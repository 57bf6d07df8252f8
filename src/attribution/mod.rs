//! Multi-touch attribution
//!
//! Turns a conversion and the clicks that preceded it into per-channel
//! credit, then folds many conversions into an `AttributionReport`.

pub mod data_driven;
pub mod engine;
pub mod models;
pub mod report;
pub mod touchpoints;

pub use data_driven::ChannelPopulation;
pub use engine::AttributionEngine;
pub use models::{Attribution, AttributionModel, AttributionReport, ChannelBreakdown, ReportWindow};
pub use report::ReportBuilder;
pub use touchpoints::touchpoint_sequence;
