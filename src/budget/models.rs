//! Budget model types and the budget status state machine.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{
    governance::ThresholdMode,
    identity::Actor,
    ids::{BudgetId, BudgetVersionId, CategoryId, EnvelopeId, TeamId, TeamSeasonId, UserId},
};

/// The lifecycle status of a budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BudgetStatus {
    /// Being drafted by the treasurer.
    Draft,
    /// Under board review.
    Review,
    /// Open for parent acknowledgment.
    Presented,
    /// Threshold met, awaiting the association's final sign-off.
    Approved,
    /// Acknowledged and frozen. Terminal.
    Locked,
}

impl BudgetStatus {
    /// The stored form of this status.
    pub fn as_str(self) -> &'static str {
        match self {
            BudgetStatus::Draft => "DRAFT",
            BudgetStatus::Review => "REVIEW",
            BudgetStatus::Presented => "PRESENTED",
            BudgetStatus::Approved => "APPROVED",
            BudgetStatus::Locked => "LOCKED",
        }
    }

    /// Parse a status from its stored form.
    pub fn parse(value: &str) -> Option<BudgetStatus> {
        match value {
            "DRAFT" => Some(BudgetStatus::Draft),
            "REVIEW" => Some(BudgetStatus::Review),
            "PRESENTED" => Some(BudgetStatus::Presented),
            "APPROVED" => Some(BudgetStatus::Approved),
            "LOCKED" => Some(BudgetStatus::Locked),
            _ => None,
        }
    }
}

/// One budget document for a (team, season) pair.
#[derive(Debug, Clone, PartialEq)]
pub struct Budget {
    /// The budget's database ID.
    pub id: BudgetId,
    /// The team whose money this budget plans.
    pub team_id: TeamId,
    /// The season the budget covers.
    pub team_season_id: TeamSeasonId,
    /// The lifecycle status.
    pub status: BudgetStatus,
    /// The latest version number, 1-based and monotonic.
    pub current_version_number: i64,
    /// The version currently open for acknowledgment, once presented.
    pub presented_version_number: Option<i64>,
    /// Whether the board approved the budget during review.
    pub board_approved: bool,
    /// When the budget locked.
    pub locked_at: Option<OffsetDateTime>,
    /// Who locked the budget, the system for threshold locks.
    pub locked_by: Option<Actor>,
    /// The board's notes from the most recent review.
    pub review_notes: Option<String>,
}

/// An append-only version of a budget's allocations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetVersion {
    /// The version's database ID.
    pub id: BudgetVersionId,
    /// The budget this version belongs to.
    pub budget_id: BudgetId,
    /// The 1-based version number.
    pub version_number: i64,
    /// The sum of all allocations, in cents.
    pub total_cents: i64,
    /// What changed relative to the previous version. Required from
    /// version 2 onward.
    pub change_summary: Option<String>,
    /// The user who created the version.
    pub created_by: UserId,
    /// When the version was created.
    pub created_at: OffsetDateTime,
}

/// One category's allocation within a budget version.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BudgetAllocation {
    /// The category receiving the allocation.
    pub category_id: CategoryId,
    /// The allocated amount, in cents.
    pub allocated_cents: i64,
}

/// The acknowledgment threshold a budget was presented with.
///
/// Frozen at presentation time; only the eligible family count tracks the
/// roster, and only until the budget locks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdConfig {
    /// COUNT or PERCENT.
    pub mode: ThresholdMode,
    /// The required acknowledgment count, set iff mode is COUNT.
    pub count_threshold: Option<i64>,
    /// The required acknowledgment percent, set iff mode is PERCENT.
    pub percent_threshold: Option<i64>,
    /// The denominator for percent mode.
    pub eligible_family_count: i64,
    /// Whether the association signs off after the threshold is met.
    pub requires_association_approval: bool,
}

/// Acknowledgment progress against a budget's threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ApprovalProgress {
    /// Families that acknowledged the presented version.
    pub approved_count: i64,
    /// Families currently eligible to acknowledge.
    pub eligible_count: i64,
    /// `approved_count` as a share of `eligible_count`, 0 when no family
    /// is eligible.
    pub percent_approved: f64,
    /// Whether the threshold is satisfied.
    pub threshold_met: bool,
    /// The threshold mode.
    pub threshold_mode: ThresholdMode,
    /// The threshold value in the mode's unit.
    pub threshold_value: i64,
}

/// How an envelope's vendor pattern is matched against transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnvelopeMatchType {
    /// The vendor must equal the pattern, ignoring case.
    Exact,
    /// The vendor must contain the pattern, ignoring case.
    Contains,
    /// Every transaction in the category matches.
    Any,
}

impl EnvelopeMatchType {
    /// The stored form of this match type.
    pub fn as_str(self) -> &'static str {
        match self {
            EnvelopeMatchType::Exact => "EXACT",
            EnvelopeMatchType::Contains => "CONTAINS",
            EnvelopeMatchType::Any => "ANY",
        }
    }

    /// Parse a match type from its stored form.
    pub fn parse(value: &str) -> Option<EnvelopeMatchType> {
        match value {
            "EXACT" => Some(EnvelopeMatchType::Exact),
            "CONTAINS" => Some(EnvelopeMatchType::Contains),
            "ANY" => Some(EnvelopeMatchType::Any),
            _ => None,
        }
    }

    /// Whether `vendor` matches `pattern` under this match type.
    pub fn matches(self, pattern: Option<&str>, vendor: &str) -> bool {
        match (self, pattern) {
            (EnvelopeMatchType::Any, _) => true,
            (EnvelopeMatchType::Exact, Some(pattern)) => vendor.eq_ignore_ascii_case(pattern),
            (EnvelopeMatchType::Contains, Some(pattern)) => vendor
                .to_ascii_lowercase()
                .contains(&pattern.to_ascii_lowercase()),
            // EXACT and CONTAINS need a pattern to match against.
            _ => false,
        }
    }
}

/// A vendor-scoped sub-cap within a budget category.
#[derive(Debug, Clone, PartialEq)]
pub struct BudgetEnvelope {
    /// The envelope's database ID.
    pub id: EnvelopeId,
    /// The team that owns the envelope.
    pub team_id: TeamId,
    /// The category the envelope constrains.
    pub category_id: CategoryId,
    /// The vendor pattern, unset for ANY envelopes.
    pub vendor_match: Option<String>,
    /// How the pattern is matched.
    pub match_type: EnvelopeMatchType,
    /// The total spend cap across matching transactions, in cents.
    pub cap_cents: i64,
    /// An optional per-transaction limit, in cents.
    pub max_single_transaction_cents: Option<i64>,
}
