//! Transaction validation: facts gathering, the check engine, and the
//! violation model.

pub mod context;
pub mod engine;
pub mod models;

pub use context::{TransactionFacts, ValidationContext, load_context, load_context_now};
pub use engine::validate;
pub use models::{
    ExceptionSeverity, ValidationResult, Violation, ViolationCode, ViolationSeverity,
};
