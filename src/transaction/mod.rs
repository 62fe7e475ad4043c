//! Transactions: entry, bank-feed import, validation on write, and the
//! status state machine.

pub mod core;
pub mod endpoints;
pub mod import;
pub mod models;

pub use core::NewTransaction;
pub use models::{Transaction, TransactionStatus, TransactionType};
