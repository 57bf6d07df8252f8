pub mod assignment;
pub mod models;
pub mod sequential;
pub mod service;
pub mod stats;

pub use assignment::{assign_index, validate_traffic_split};
pub use models::{
    AbTest, CreateAbTestRequest, CreateVariantRequest, NewAbTest, NewVariant, StopTestRequest,
    TestState, Variant, VariantStats,
};
pub use sequential::{SequentialDecision, SequentialResult, SequentialTest, SprtConfig};
pub use service::{
    Assignment, ExperimentConversion, ExperimentService, SequentialReport, SignificanceReport,
    TestPage,
};
pub use stats::{ArmCounts, ConfidenceLevel, SignificanceResult, StatStatus};
