//! Budget versioning, board review, and the parent acknowledgment
//! threshold engine.

pub mod db;
pub mod endpoints;
pub mod models;
pub mod workflow;

pub use models::{
    ApprovalProgress, Budget, BudgetAllocation, BudgetEnvelope, BudgetStatus, BudgetVersion,
    EnvelopeMatchType, ThresholdConfig,
};
