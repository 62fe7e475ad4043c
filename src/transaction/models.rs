//! Transaction model types and the status state machine.

use serde::{Deserialize, Serialize};
use time::{Date, OffsetDateTime};

use crate::{
    ids::{CategoryId, TeamId, TransactionId},
    receipt::ReceiptStatus,
    validation::{ExceptionSeverity, ValidationResult},
};

/// Whether money came in or went out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionType {
    /// Money received, e.g. fundraising proceeds.
    Income,
    /// Money spent.
    Expense,
}

impl TransactionType {
    /// The stored form of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionType::Income => "INCOME",
            TransactionType::Expense => "EXPENSE",
        }
    }

    /// Parse a type from its stored form.
    pub fn parse(value: &str) -> Option<TransactionType> {
        match value {
            "INCOME" => Some(TransactionType::Income),
            "EXPENSE" => Some(TransactionType::Expense),
            _ => None,
        }
    }
}

/// The lifecycle status of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    /// Entered by hand, not yet validated.
    Draft,
    /// Arrived via a bank-feed import, not yet validated.
    Imported,
    /// Passed validation with no blocking violations.
    Validated,
    /// Failed validation with at least one blocking violation.
    Exception,
    /// An exception that was corrected or overridden.
    Resolved,
    /// Frozen by season closure. Terminal.
    Locked,
}

impl TransactionStatus {
    /// The stored form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            TransactionStatus::Draft => "DRAFT",
            TransactionStatus::Imported => "IMPORTED",
            TransactionStatus::Validated => "VALIDATED",
            TransactionStatus::Exception => "EXCEPTION",
            TransactionStatus::Resolved => "RESOLVED",
            TransactionStatus::Locked => "LOCKED",
        }
    }

    /// Parse a status from its stored form.
    pub fn parse(value: &str) -> Option<TransactionStatus> {
        match value {
            "DRAFT" => Some(TransactionStatus::Draft),
            "IMPORTED" => Some(TransactionStatus::Imported),
            "VALIDATED" => Some(TransactionStatus::Validated),
            "EXCEPTION" => Some(TransactionStatus::Exception),
            "RESOLVED" => Some(TransactionStatus::Resolved),
            "LOCKED" => Some(TransactionStatus::Locked),
            _ => None,
        }
    }

    /// Whether the state machine permits moving from `self` to `to`.
    pub fn can_transition_to(self, to: TransactionStatus) -> bool {
        use TransactionStatus::*;

        matches!(
            (self, to),
            (Draft, Imported | Validated | Exception)
                | (Imported, Draft | Validated | Exception)
                | (Exception, Draft | Validated | Resolved)
                | (Validated, Exception | Locked)
                | (Resolved, Locked)
        )
    }
}

/// The mapping from retired statuses onto the current state machine.
///
/// Applied once by the database migration in `db::initialize`; no runtime
/// code reads or writes the legacy statuses.
pub const LEGACY_STATUS_MAP: [(&str, &str); 4] = [
    ("PENDING", "EXCEPTION"),
    ("APPROVED", "RESOLVED"),
    ("APPROVED_AUTOMATIC", "VALIDATED"),
    ("REJECTED", "EXCEPTION"),
];

/// A team transaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transaction {
    /// The transaction's database ID.
    pub id: TransactionId,
    /// The team that owns the transaction.
    pub team_id: TeamId,
    /// The amount in cents, always positive.
    pub amount_cents: i64,
    /// Income or expense.
    pub transaction_type: TransactionType,
    /// The spending category, if assigned.
    pub category_id: Option<CategoryId>,
    /// Who was paid or who paid.
    pub vendor: String,
    /// The day the money moved.
    pub transaction_date: Date,
    /// Where the receipt is stored, if one was attached.
    pub receipt_url: Option<String>,
    /// A human-readable description.
    pub description: String,
    /// The lifecycle status.
    pub status: TransactionStatus,
    /// The most recent validation result, if validation has run.
    pub validation: Option<ValidationResult>,
    /// The derived severity while the transaction is in exception status.
    pub exception_severity: Option<ExceptionSeverity>,
    /// Whether the receipt requirement is satisfied.
    pub receipt_status: ReceiptStatus,
    /// The bank-feed row hash, for imported transactions.
    pub import_id: Option<String>,
    /// When the transaction was soft-deleted, if it was.
    pub deleted_at: Option<OffsetDateTime>,
}
